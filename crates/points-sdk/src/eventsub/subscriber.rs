use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::types::SubscriptionInfo;
use crate::error::SubscriptionError;

const EVENTSUB_API_URL: &str = "https://api.twitch.tv/helix/eventsub/subscriptions";
const EVENTSUB_API_TIMEOUT_SECS: u64 = 10;
const MAX_SUBSCRIBE_ATTEMPTS: u32 = 5;
const BACKOFF_BASE: Duration = Duration::from_secs(1);

pub const REDEMPTION_ADD_TYPE: &str = "channel.channel_points_custom_reward_redemption.add";

/// The event filter for one subscription; immutable once created.
#[derive(Debug, Clone)]
pub struct EventConfig {
    pub kind: String,
    pub version: String,
    pub condition: serde_json::Value,
}

impl EventConfig {
    #[must_use]
    pub fn redemption_add(broadcaster_id: &str) -> Self {
        Self {
            kind: REDEMPTION_ADD_TYPE.to_string(),
            version: "1".to_string(),
            condition: serde_json::json!({ "broadcaster_user_id": broadcaster_id }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    pub retry: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self { retry: true }
    }
}

#[derive(Debug, Serialize)]
struct SubscriptionRequest<'a> {
    #[serde(rename = "type")]
    sub_type: &'a str,
    version: &'a str,
    condition: &'a serde_json::Value,
    transport: Transport<'a>,
}

#[derive(Debug, Serialize)]
struct Transport<'a> {
    method: &'static str,
    session_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubscriptionListResponse {
    data: Vec<SubscriptionInfo>,
}

/// REST-level CRUD over EventSub subscriptions plus the authoritative
/// local cache of what the client believes is currently registered. A
/// single long-lived value: token refresh re-arms it through
/// [`Self::update_token`] rather than replacement, so the map survives.
pub struct EventSubSubscriber {
    client: Client,
    api_url: String,
    client_id: String,
    bearer_token: String,
    subscriptions: HashMap<String, SubscriptionInfo>,
}

impl EventSubSubscriber {
    #[must_use]
    pub fn new(client_id: String, access_token: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(EVENTSUB_API_TIMEOUT_SECS))
            .build()
            .expect("default TLS backend");

        Self {
            client,
            api_url: EVENTSUB_API_URL.to_string(),
            client_id,
            bearer_token: access_token,
            subscriptions: HashMap::new(),
        }
    }

    /// Point at a mock Helix endpoint. For testing only.
    #[cfg(any(test, feature = "test-support"))]
    #[must_use]
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Replace the bearer used by all subsequent REST calls, in place.
    /// The subscription map is untouched.
    pub fn update_token(&mut self, new_access_token: String) {
        self.bearer_token = new_access_token;
    }

    /// Subscriptions this instance believes are live on the server.
    #[must_use]
    pub fn tracked(&self) -> &HashMap<String, SubscriptionInfo> {
        &self.subscriptions
    }

    /// POST a websocket-transport subscription bound to `session_id`.
    /// 429 and 5xx responses (and connection failures) are retried with
    /// exponential backoff up to a fixed cap; other rejections fail
    /// immediately. The returned record is also inserted into the local
    /// map.
    pub async fn subscribe(
        &mut self,
        config: &EventConfig,
        session_id: &str,
        options: &SubscribeOptions,
    ) -> Result<SubscriptionInfo, SubscriptionError> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.try_subscribe(config, session_id).await {
                Ok(subscription) => {
                    info!("subscribed to {} as {}", config.kind, subscription.id);
                    self.subscriptions
                        .insert(subscription.id.clone(), subscription.clone());
                    return Ok(subscription);
                }
                Err(e) if options.retry && e.is_retryable() && attempt < MAX_SUBSCRIBE_ATTEMPTS => {
                    let delay = BACKOFF_BASE * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        "subscribe attempt {attempt}/{MAX_SUBSCRIBE_ATTEMPTS} failed: {e}; \
                         retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_subscribe(
        &self,
        config: &EventConfig,
        session_id: &str,
    ) -> Result<SubscriptionInfo, SubscriptionError> {
        let request = SubscriptionRequest {
            sub_type: &config.kind,
            version: &config.version,
            condition: &config.condition,
            transport: Transport {
                method: "websocket",
                session_id,
            },
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.bearer_token))
            .header("Client-Id", &self.client_id)
            .json(&request)
            .send()
            .await
            .map_err(|source| SubscriptionError::Transport {
                event_type: config.kind.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SubscriptionError::Rejected {
                event_type: config.kind.clone(),
                status,
                body,
            });
        }

        let parsed: SubscriptionListResponse = response
            .json()
            .await
            .map_err(|e| SubscriptionError::MalformedResponse(e.to_string()))?;

        parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| SubscriptionError::MalformedResponse("empty data array".into()))
    }

    /// DELETE by id. The id leaves the local map only on server-confirmed
    /// success; on failure the caller must not assume it was removed.
    pub async fn unsubscribe(&mut self, id: &str) -> Result<(), SubscriptionError> {
        let response = self
            .client
            .delete(&self.api_url)
            .query(&[("id", id)])
            .header("Authorization", format!("Bearer {}", self.bearer_token))
            .header("Client-Id", &self.client_id)
            .send()
            .await
            .map_err(|source| SubscriptionError::Transport {
                event_type: id.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SubscriptionError::DeleteRejected {
                id: id.to_string(),
                status,
                body,
            });
        }

        self.subscriptions.remove(id);
        debug!("unsubscribed {id}");
        Ok(())
    }

    /// The server's list, not the local cache; used for reconciliation
    /// and cleanup.
    pub async fn get_subscriptions(&self) -> Result<Vec<SubscriptionInfo>, SubscriptionError> {
        let response = self
            .client
            .get(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.bearer_token))
            .header("Client-Id", &self.client_id)
            .send()
            .await
            .map_err(|source| SubscriptionError::Transport {
                event_type: "list".to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SubscriptionError::ListRejected { status, body });
        }

        let parsed: SubscriptionListResponse = response
            .json()
            .await
            .map_err(|e| SubscriptionError::MalformedResponse(e.to_string()))?;

        Ok(parsed.data)
    }

    /// Delete everything the server lists, sequentially. A failure
    /// partway leaves earlier deletions done; the error propagates with
    /// no retry of the failed one. Returns the completed count.
    pub async fn delete_all(&mut self) -> Result<usize, SubscriptionError> {
        let listed = self.get_subscriptions().await?;
        let mut deleted = 0usize;

        for subscription in listed {
            self.unsubscribe(&subscription.id).await?;
            deleted += 1;
        }

        Ok(deleted)
    }

    /// Server pushed a revocation: purely local cleanup, no round-trip.
    pub fn handle_revocation(&mut self, id: &str, reason: &str) {
        if self.subscriptions.remove(id).is_some() {
            warn!("subscription {id} revoked: {reason}");
        } else {
            debug!("revocation for untracked subscription {id}: {reason}");
        }
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn insert_for_test(&mut self, subscription: SubscriptionInfo) {
        self.subscriptions
            .insert(subscription.id.clone(), subscription);
    }

    #[cfg(any(test, feature = "test-support"))]
    #[must_use]
    pub fn bearer_token_for_test(&self) -> &str {
        &self.bearer_token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_subscription(id: &str) -> SubscriptionInfo {
        SubscriptionInfo {
            id: id.to_string(),
            kind: REDEMPTION_ADD_TYPE.to_string(),
            version: "1".to_string(),
            status: "enabled".to_string(),
            condition: serde_json::json!({"broadcaster_user_id": "1337"}),
        }
    }

    fn make_subscriber() -> EventSubSubscriber {
        EventSubSubscriber::new("client".into(), "token0".into())
    }

    #[test]
    fn test_redemption_add_config() {
        let config = EventConfig::redemption_add("1337");
        assert_eq!(config.kind, REDEMPTION_ADD_TYPE);
        assert_eq!(config.version, "1");
        assert_eq!(config.condition["broadcaster_user_id"], "1337");
    }

    #[test]
    fn test_handle_revocation_removes_entry() {
        let mut subscriber = make_subscriber();
        subscriber.insert_for_test(make_subscription("sub-1"));
        assert_eq!(subscriber.tracked().len(), 1);

        subscriber.handle_revocation("sub-1", "authorization_revoked");
        assert!(subscriber.tracked().is_empty());
    }

    #[test]
    fn test_handle_revocation_for_unknown_id_is_noop() {
        let mut subscriber = make_subscriber();
        subscriber.insert_for_test(make_subscription("sub-1"));

        subscriber.handle_revocation("sub-other", "user_removed");
        assert_eq!(subscriber.tracked().len(), 1);
    }

    #[test]
    fn test_update_token_preserves_subscriptions() {
        let mut subscriber = make_subscriber();
        subscriber.insert_for_test(make_subscription("sub-1"));
        subscriber.insert_for_test(make_subscription("sub-2"));

        subscriber.update_token("token1".into());

        assert_eq!(subscriber.bearer_token_for_test(), "token1");
        assert_eq!(subscriber.tracked().len(), 2);
    }

    #[test]
    fn test_subscribe_options_default_to_retry() {
        assert!(SubscribeOptions::default().retry);
    }
}
