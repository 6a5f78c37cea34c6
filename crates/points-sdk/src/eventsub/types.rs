use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct EventSubFrame {
    pub metadata: FrameMetadata,
    pub payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct FrameMetadata {
    pub message_type: String,
    #[serde(default)]
    pub subscription_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionPayload {
    pub session: Session,
}

/// Identity of one live WebSocket connection. Created on welcome,
/// superseded wholesale by the next welcome after a reconnect.
#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub keepalive_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub reconnect_url: Option<String>,
}

/// Server-side subscription record as it appears in notification,
/// revocation, and REST response payloads.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    pub status: String,
    #[serde(default)]
    pub condition: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct NotificationPayload {
    pub subscription: SubscriptionInfo,
    pub event: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionPayload {
    pub subscription: SubscriptionInfo,
}

#[derive(Debug, Deserialize)]
pub struct RewardRedemptionEvent {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_input: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    pub reward: RewardInfo,
}

#[derive(Debug, Deserialize)]
pub struct RewardInfo {
    pub id: String,
    pub title: String,
    pub cost: u32,
}

/// Typed events the monitor forwards to its sink. Notifications for
/// types the client never asked for still flow through as `Unhandled`;
/// only revocation touches local bookkeeping.
#[derive(Debug, Clone)]
pub enum ChannelPointsEvent {
    RedemptionAdded {
        redemption_id: String,
        user_id: String,
        user_name: String,
        reward_id: String,
        reward_title: String,
        cost: u32,
        user_input: Option<String>,
    },
    Unhandled {
        subscription_type: String,
        event: serde_json::Value,
    },
}

/// How the monitor finished: an operator-requested stop or an
/// unrecoverable failure the host should alert on.
#[derive(Debug)]
pub enum MonitorExit {
    Requested,
    Fatal(anyhow::Error),
}

impl MonitorExit {
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}
