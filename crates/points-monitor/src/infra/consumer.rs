use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::{consumer::EventConsumer, models::Event};

/// Writes one line per redemption to stdout. Unhandled event types only
/// show up at debug level.
#[derive(Default)]
pub struct ConsolePrinter;

impl ConsolePrinter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventConsumer for ConsolePrinter {
    async fn consume(&self, mut ch: mpsc::Receiver<Event>) {
        while let Some(event) = ch.recv().await {
            match &event {
                Event::RedemptionAdded(_) => println!("{event}"),
                Event::Unhandled { .. } => debug!("{event}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Redemption;

    #[tokio::test]
    async fn test_consume_drains_the_channel() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Event::RedemptionAdded(Redemption {
            user_id: "1".into(),
            user_name: "user".into(),
            reward_id: "r".into(),
            reward_title: "title".into(),
            cost: 1,
            user_input: None,
        }))
        .await
        .unwrap();
        drop(tx);

        ConsolePrinter::new().consume(rx).await;
    }
}
