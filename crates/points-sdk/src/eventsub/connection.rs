use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use super::types::{
    EventSubFrame, NotificationPayload, Session, SessionPayload, SubscriptionInfo,
    SubscriptionPayload,
};
use crate::error::ParseError;

const EVENTSUB_WS_URL: &str = "wss://eventsub.wss.twitch.tv/ws";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One fully decoded inbound frame, dispatched by `metadata.message_type`.
#[derive(Debug)]
pub enum Frame {
    Welcome(Session),
    Keepalive,
    Notification {
        subscription: SubscriptionInfo,
        subscription_type: Option<String>,
        event: serde_json::Value,
    },
    Reconnect {
        reconnect_url: Option<String>,
    },
    Revocation {
        subscription: SubscriptionInfo,
    },
    Unknown(String),
}

/// Owns at most one live socket and turns its messages into [`Frame`]s.
/// Holds no reconnect policy of its own: when the stream ends it reports
/// that and lets the orchestrator decide, based on whether a reconnect
/// URL is currently recorded, whether to dial again or shut down.
pub struct EventSubConnection {
    default_url: String,
    reconnect_url: Option<String>,
    stream: Option<WsStream>,
}

impl Default for EventSubConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSubConnection {
    #[must_use]
    pub fn new() -> Self {
        Self {
            default_url: EVENTSUB_WS_URL.to_string(),
            reconnect_url: None,
            stream: None,
        }
    }

    /// Dial a custom endpoint instead of Twitch. For testing only.
    #[cfg(any(test, feature = "test-support"))]
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.default_url = url.into();
        self
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    #[must_use]
    pub fn has_reconnect_url(&self) -> bool {
        self.reconnect_url.is_some()
    }

    /// Opens a connection to the reconnect URL if one is recorded,
    /// otherwise the default endpoint. A no-op while a socket is already
    /// open, so re-entry from the reconnect flow cannot stack sockets.
    pub async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let url = Url::parse(self.reconnect_url.as_deref().unwrap_or(&self.default_url))
            .context("invalid EventSub URL")?;

        info!("connecting to EventSub: {url}");
        let (stream, _) = connect_async(url.to_string())
            .await
            .with_context(|| format!("EventSub WebSocket connection to {url} failed"))?;

        self.stream = Some(stream);
        Ok(())
    }

    /// Records the new target and closes the current socket; the next
    /// `connect` picks the new URL up.
    pub async fn begin_reconnect(&mut self, new_url: String) {
        self.reconnect_url = Some(new_url);
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }

    /// Closes the socket and leaves reconnect state untouched; meant for
    /// terminal shutdown.
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }

    /// Pulls the next decoded frame. Malformed frames are dropped and
    /// logged; the connection stays open and later well-formed frames
    /// still come through. `None` means the stream ended.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let stream = self.stream.as_mut()?;

            let Some(message) = stream.next().await else {
                self.stream = None;
                return None;
            };

            let message = match message {
                Ok(m) => m,
                Err(e) => {
                    // Transport errors are logged; the close sequence of
                    // the socket itself governs what happens next.
                    warn!("EventSub transport error: {e}");
                    self.stream = None;
                    return None;
                }
            };

            let text = match message {
                Message::Text(t) => t,
                Message::Close(_) => {
                    info!("EventSub sent close frame");
                    self.stream = None;
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Binary(_) => {
                    debug!("ignoring binary EventSub message");
                    continue;
                }
                Message::Frame(_) => continue,
            };

            match classify_frame(&text) {
                Ok(frame) => return Some(frame),
                Err(e) => {
                    warn!("dropping frame: {e}");
                    continue;
                }
            }
        }
    }
}

/// Decode one raw frame into a [`Frame`], failing with [`ParseError`]
/// when the envelope or the per-type payload cannot be read.
pub(crate) fn classify_frame(text: &str) -> Result<Frame, ParseError> {
    let parsed: EventSubFrame = serde_json::from_str(text)?;

    let frame = match parsed.metadata.message_type.as_str() {
        "session_welcome" => {
            let payload: SessionPayload = serde_json::from_value(parsed.payload)?;
            Frame::Welcome(payload.session)
        }
        "session_keepalive" => Frame::Keepalive,
        "notification" => {
            let payload: NotificationPayload = serde_json::from_value(parsed.payload)?;
            Frame::Notification {
                subscription: payload.subscription,
                subscription_type: parsed.metadata.subscription_type,
                event: payload.event,
            }
        }
        "session_reconnect" => {
            let payload: SessionPayload = serde_json::from_value(parsed.payload)?;
            Frame::Reconnect {
                reconnect_url: payload.session.reconnect_url,
            }
        }
        "revocation" => {
            let payload: SubscriptionPayload = serde_json::from_value(parsed.payload)?;
            Frame::Revocation {
                subscription: payload.subscription,
            }
        }
        other => Frame::Unknown(other.to_string()),
    };

    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_welcome() {
        let raw = r#"{
            "metadata": {"message_type": "session_welcome"},
            "payload": {"session": {"id": "S1", "keepalive_timeout_seconds": 10}}
        }"#;

        match classify_frame(raw).unwrap() {
            Frame::Welcome(session) => {
                assert_eq!(session.id, "S1");
                assert_eq!(session.keepalive_timeout_seconds, Some(10));
                assert!(session.reconnect_url.is_none());
            }
            other => panic!("expected Welcome, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_keepalive() {
        let raw = r#"{"metadata": {"message_type": "session_keepalive"}, "payload": {}}"#;
        assert!(matches!(classify_frame(raw).unwrap(), Frame::Keepalive));
    }

    #[test]
    fn test_classify_notification() {
        let raw = r#"{
            "metadata": {
                "message_type": "notification",
                "subscription_type": "channel.channel_points_custom_reward_redemption.add"
            },
            "payload": {
                "subscription": {
                    "id": "sub-1",
                    "type": "channel.channel_points_custom_reward_redemption.add",
                    "version": "1",
                    "status": "enabled",
                    "condition": {"broadcaster_user_id": "1337"}
                },
                "event": {"user_name": "someone"}
            }
        }"#;

        match classify_frame(raw).unwrap() {
            Frame::Notification {
                subscription,
                subscription_type,
                event,
            } => {
                assert_eq!(subscription.id, "sub-1");
                assert_eq!(
                    subscription_type.as_deref(),
                    Some("channel.channel_points_custom_reward_redemption.add")
                );
                assert_eq!(event["user_name"], "someone");
            }
            other => panic!("expected Notification, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_reconnect_carries_url() {
        let raw = r#"{
            "metadata": {"message_type": "session_reconnect"},
            "payload": {"session": {"id": "S1", "reconnect_url": "wss://next.example/ws"}}
        }"#;

        match classify_frame(raw).unwrap() {
            Frame::Reconnect { reconnect_url } => {
                assert_eq!(reconnect_url.as_deref(), Some("wss://next.example/ws"));
            }
            other => panic!("expected Reconnect, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_revocation() {
        let raw = r#"{
            "metadata": {"message_type": "revocation"},
            "payload": {
                "subscription": {
                    "id": "sub-9",
                    "type": "channel.channel_points_custom_reward_redemption.add",
                    "version": "1",
                    "status": "authorization_revoked",
                    "condition": {}
                }
            }
        }"#;

        match classify_frame(raw).unwrap() {
            Frame::Revocation { subscription } => {
                assert_eq!(subscription.id, "sub-9");
                assert_eq!(subscription.status, "authorization_revoked");
            }
            other => panic!("expected Revocation, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_unknown_type_falls_through() {
        let raw = r#"{"metadata": {"message_type": "surprise"}, "payload": {}}"#;
        match classify_frame(raw).unwrap() {
            Frame::Unknown(kind) => assert_eq!(kind, "surprise"),
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_frame_is_parse_error() {
        assert!(classify_frame("not json").is_err());
        assert!(classify_frame(r#"{"metadata": {}}"#).is_err());
    }
}
