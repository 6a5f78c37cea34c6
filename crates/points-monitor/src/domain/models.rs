use std::fmt;

#[derive(Debug, Clone)]
pub struct Redemption {
    pub user_id: String,
    pub user_name: String,
    pub reward_id: String,
    pub reward_title: String,
    pub cost: u32,
    pub user_input: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Event {
    RedemptionAdded(Redemption),
    Unhandled { kind: String },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::RedemptionAdded(r) => {
                write!(
                    f,
                    "{} redeemed \"{}\" for {} points",
                    r.user_name, r.reward_title, r.cost
                )?;
                if let Some(input) = &r.user_input {
                    write!(f, ": {input}")?;
                }
                Ok(())
            }
            Event::Unhandled { kind } => write!(f, "unhandled event of type {kind}"),
        }
    }
}

/// Why the monitor stopped; hosts alert on `Fatal`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitKind {
    Requested,
    Fatal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_redemption(input: Option<&str>) -> Redemption {
        Redemption {
            user_id: "9001".into(),
            user_name: "Cooler_User".into(),
            reward_id: "reward-1".into(),
            reward_title: "hydrate".into(),
            cost: 250,
            user_input: input.map(ToString::to_string),
        }
    }

    #[test]
    fn test_redemption_line_without_input() {
        let event = Event::RedemptionAdded(make_redemption(None));
        assert_eq!(
            event.to_string(),
            "Cooler_User redeemed \"hydrate\" for 250 points"
        );
    }

    #[test]
    fn test_redemption_line_with_input() {
        let event = Event::RedemptionAdded(make_redemption(Some("pogchamp")));
        assert_eq!(
            event.to_string(),
            "Cooler_User redeemed \"hydrate\" for 250 points: pogchamp"
        );
    }

    #[test]
    fn test_unhandled_line() {
        let event = Event::Unhandled {
            kind: "channel.follow".into(),
        };
        assert_eq!(event.to_string(), "unhandled event of type channel.follow");
    }
}
