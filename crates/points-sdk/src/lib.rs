pub mod auth;
pub mod error;
pub mod eventsub;

pub use auth::{Credential, CredentialSink, CredentialStore, StateTokenManager, TokenRefresher, TokenValidator};
pub use error::{ParseError, SubscriptionError, TokenRefreshError, TokenValidationError};
pub use eventsub::{ChannelPointsEvent, EventSubClient, EventSubSubscriber, MonitorExit};
