use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use points_sdk::auth::{Credential, CredentialStore};
use points_sdk::eventsub::{ChannelPointsEvent, EventSubClient, MonitorExit};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::Shutdowner;
use crate::domain::{
    fetcher::EventFetcher,
    models::{Event, ExitKind, Redemption},
};
use crate::infra::Config;
use crate::infra::config::{
    KEY_ACCESS_TOKEN, KEY_BROADCASTER_ID, KEY_CLIENT_ID, KEY_CLIENT_SECRET, KEY_REFRESH_TOKEN,
};
use crate::infra::store::FileCredentialStore;

#[non_exhaustive]
pub struct PointsFetcher {
    client: Mutex<EventSubClient>,
    cancel_token: CancellationToken,
}

impl PointsFetcher {
    pub fn new(config: &Config, sink: Arc<FileCredentialStore>) -> Result<Self> {
        Self::with_cancel_token(config, sink, CancellationToken::new())
    }

    pub fn with_cancel_token(
        config: &Config,
        sink: Arc<FileCredentialStore>,
        cancel_token: CancellationToken,
    ) -> Result<Self> {
        let broadcaster_id = config.require(KEY_BROADCASTER_ID)?.to_string();
        let credential = build_credential(config, &sink)?;

        let store = Arc::new(CredentialStore::new(credential));
        let client = EventSubClient::new(store, broadcaster_id)
            .with_cancel_token(cancel_token.clone())
            .with_credential_sink(sink)
            .with_token_refresh_callback(Box::new(|_| {
                info!("access token refreshed");
            }));

        Ok(Self {
            client: Mutex::new(client),
            cancel_token,
        })
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}

/// Identity comes from the environment; the rotating token pair is
/// overlaid from the credentials file when one exists, since tokens on
/// disk postdate whatever the environment was started with.
fn build_credential(config: &Config, sink: &FileCredentialStore) -> Result<Credential> {
    let mut credential = Credential {
        client_id: config.require(KEY_CLIENT_ID)?.to_string(),
        client_secret: config.optional(KEY_CLIENT_SECRET).map(ToString::to_string),
        access_token: config.require(KEY_ACCESS_TOKEN)?.to_string(),
        refresh_token: config.optional(KEY_REFRESH_TOKEN).map(ToString::to_string),
    };

    if let Some(stored) = sink.load()? {
        info!("using persisted tokens from previous run");
        credential.access_token = stored.access_token;
        if stored.refresh_token.is_some() {
            credential.refresh_token = stored.refresh_token;
        }
    }

    Ok(credential)
}

#[async_trait]
impl Shutdowner for PointsFetcher {
    async fn shutdown(&self) -> anyhow::Result<ExitKind> {
        self.cancel_token.cancel();
        let exit = self.client.lock().await.shutdown().await?;
        Ok(match exit {
            MonitorExit::Requested => ExitKind::Requested,
            MonitorExit::Fatal(err) => ExitKind::Fatal(format!("{err:#}")),
        })
    }
}

impl Drop for PointsFetcher {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[async_trait]
impl EventFetcher for PointsFetcher {
    async fn fetch(&self) -> mpsc::Receiver<Event> {
        let mut sdk_rx = self.client.lock().await.connect();
        let (tx, rx) = mpsc::channel(100);

        let cancellation_token = self.cancel_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = cancellation_token.cancelled() => {
                        info!("fetcher cancelled, stopping...");
                        break
                    }

                    maybe_event = sdk_rx.recv() => {
                        match maybe_event {
                            Some(cp) => {
                                let event = cp.into();
                                if tx.send(event).await.is_err() {
                                    info!("receiver dropped");
                                    break;
                                }
                            }
                            None => {
                                info!("sdk channel closed");
                                break;
                            }
                        }
                    }
                }
            }
        });

        rx
    }
}

impl From<ChannelPointsEvent> for Event {
    fn from(event: ChannelPointsEvent) -> Self {
        match event {
            ChannelPointsEvent::RedemptionAdded {
                user_id,
                user_name,
                reward_id,
                reward_title,
                cost,
                user_input,
                ..
            } => Event::RedemptionAdded(Redemption {
                user_id,
                user_name,
                reward_id,
                reward_title,
                cost,
                user_input,
            }),
            ChannelPointsEvent::Unhandled {
                subscription_type, ..
            } => Event::Unhandled {
                kind: subscription_type,
            },
        }
    }
}
