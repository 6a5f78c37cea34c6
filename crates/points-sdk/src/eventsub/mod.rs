pub mod client;
pub mod connection;
pub mod subscriber;
pub mod types;

pub use client::{EventSubClient, OnTokenRefresh};
pub use connection::{EventSubConnection, Frame};
pub use subscriber::{EventConfig, EventSubSubscriber, REDEMPTION_ADD_TYPE, SubscribeOptions};
pub use types::{ChannelPointsEvent, MonitorExit, Session, SubscriptionInfo};
