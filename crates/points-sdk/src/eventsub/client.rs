use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::connection::{EventSubConnection, Frame};
use super::subscriber::{
    EventConfig, EventSubSubscriber, REDEMPTION_ADD_TYPE, SubscribeOptions,
};
use super::types::{ChannelPointsEvent, MonitorExit, RewardRedemptionEvent, Session};
use crate::auth::{Credential, CredentialSink, CredentialStore, TokenRefresher, TokenValidator};
use crate::error::TokenValidationError;

const CHANNEL_BUFFER_SIZE: usize = 100;
const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(3600);
const REFRESH_RETRY_ATTEMPTS: u32 = 3;
const REFRESH_RETRY_BASE: Duration = Duration::from_secs(1);

pub type OnTokenRefresh = Box<dyn Fn(&Credential) + Send + Sync>;

/// The orchestrator tying connection, subscriber, validator, and
/// refresher together: welcome -> validate (refreshing if possible) ->
/// subscribe -> forward notifications, with a periodic token-refresh
/// deadline running independently of frame traffic.
#[non_exhaustive]
pub struct EventSubClient {
    store: Arc<CredentialStore>,
    broadcaster_id: String,
    refresh_interval: Duration,
    cancel_token: CancellationToken,
    sink: Option<Arc<dyn CredentialSink>>,
    on_refresh: Option<OnTokenRefresh>,
    handle: Option<JoinHandle<MonitorExit>>,
    #[cfg(any(test, feature = "test-support"))]
    ws_url: Option<String>,
    #[cfg(any(test, feature = "test-support"))]
    api_url: Option<String>,
    #[cfg(any(test, feature = "test-support"))]
    validate_url: Option<String>,
    #[cfg(any(test, feature = "test-support"))]
    token_url: Option<String>,
}

struct LifecycleParams {
    event_tx: mpsc::Sender<ChannelPointsEvent>,
    store: Arc<CredentialStore>,
    broadcaster_id: String,
    refresh_interval: Duration,
    cancel_token: CancellationToken,
    sink: Option<Arc<dyn CredentialSink>>,
    on_refresh: Option<OnTokenRefresh>,
    connection: EventSubConnection,
    subscriber: EventSubSubscriber,
    validator: TokenValidator,
    refresher: TokenRefresher,
}

impl Drop for EventSubClient {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

impl EventSubClient {
    #[must_use]
    pub fn new(store: Arc<CredentialStore>, broadcaster_id: String) -> Self {
        Self {
            store,
            broadcaster_id,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            cancel_token: CancellationToken::new(),
            sink: None,
            on_refresh: None,
            handle: None,
            #[cfg(any(test, feature = "test-support"))]
            ws_url: None,
            #[cfg(any(test, feature = "test-support"))]
            api_url: None,
            #[cfg(any(test, feature = "test-support"))]
            validate_url: None,
            #[cfg(any(test, feature = "test-support"))]
            token_url: None,
        }
    }

    #[must_use]
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    #[must_use]
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Durable store refreshed credentials are written back to.
    #[must_use]
    pub fn with_credential_sink(mut self, sink: Arc<dyn CredentialSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Fired whenever a refresh path (reactive or periodic) replaces the
    /// credential, so a host can persist or broadcast the change.
    #[must_use]
    pub fn with_token_refresh_callback(mut self, callback: OnTokenRefresh) -> Self {
        self.on_refresh = Some(callback);
        self
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Point every endpoint at mock servers. For testing only.
    #[cfg(any(test, feature = "test-support"))]
    #[must_use]
    pub fn with_endpoints(
        mut self,
        ws_url: impl Into<String>,
        api_url: impl Into<String>,
        validate_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        self.ws_url = Some(ws_url.into());
        self.api_url = Some(api_url.into());
        self.validate_url = Some(validate_url.into());
        self.token_url = Some(token_url.into());
        self
    }

    /// Spawns the lifecycle task and returns the notification stream.
    pub fn connect(&mut self) -> mpsc::Receiver<ChannelPointsEvent> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);

        let credential = self.store.current();

        #[allow(unused_mut)]
        let mut connection = EventSubConnection::new();
        #[allow(unused_mut)]
        let mut subscriber =
            EventSubSubscriber::new(credential.client_id.clone(), credential.access_token);
        #[allow(unused_mut)]
        let mut validator = TokenValidator::new();
        #[allow(unused_mut)]
        let mut refresher = TokenRefresher::new();

        #[cfg(any(test, feature = "test-support"))]
        {
            if let Some(url) = self.ws_url.clone() {
                connection = connection.with_url(url);
            }
            if let Some(url) = self.api_url.clone() {
                subscriber = subscriber.with_api_url(url);
            }
            if let Some(url) = self.validate_url.clone() {
                validator = validator.with_validate_url(url);
            }
            if let Some(url) = self.token_url.clone() {
                refresher = refresher.with_token_url(url);
            }
        }

        let params = LifecycleParams {
            event_tx: tx,
            store: self.store.clone(),
            broadcaster_id: self.broadcaster_id.clone(),
            refresh_interval: self.refresh_interval,
            cancel_token: self.cancel_token.clone(),
            sink: self.sink.clone(),
            on_refresh: self.on_refresh.take(),
            connection,
            subscriber,
            validator,
            refresher,
        };

        self.handle = Some(tokio::spawn(run_lifecycle(params)));
        rx
    }

    /// Cancel and wait for the lifecycle to finish.
    pub async fn shutdown(&mut self) -> anyhow::Result<MonitorExit> {
        self.cancel_token.cancel();
        self.join().await
    }

    /// Wait for the lifecycle to finish on its own (used to harvest the
    /// exit reason after the event stream closes).
    pub async fn join(&mut self) -> anyhow::Result<MonitorExit> {
        match self.handle.take() {
            Some(handle) => Ok(handle.await?),
            None => Ok(MonitorExit::Requested),
        }
    }
}

async fn run_lifecycle(mut params: LifecycleParams) -> MonitorExit {
    info!("starting EventSub monitor lifecycle");

    match drive(&mut params).await {
        Ok(()) => {
            info!("EventSub monitor stopped");
            MonitorExit::Requested
        }
        Err(e) if params.cancel_token.is_cancelled() => {
            debug!("error during shutdown ignored: {e:?}");
            MonitorExit::Requested
        }
        Err(e) => {
            error!("EventSub monitor failed: {e:#}");
            MonitorExit::Fatal(e)
        }
    }
}

async fn drive(p: &mut LifecycleParams) -> anyhow::Result<()> {
    let mut current_session: Option<Session> = None;
    let mut subscribed = false;
    let mut refresh_armed = false;
    let mut next_refresh_at = Instant::now() + p.refresh_interval;

    p.connection.connect().await?;

    loop {
        tokio::select! {
            biased;

            _ = p.cancel_token.cancelled() => {
                info!("shutdown requested");
                p.connection.disconnect().await;
                return Ok(());
            }

            _ = sleep_until(next_refresh_at), if refresh_armed => {
                // Rescheduled unconditionally before the check runs so a
                // failed attempt can never stall the cadence.
                next_refresh_at = Instant::now() + p.refresh_interval;
                periodic_refresh_check(p).await;
            }

            frame = p.connection.next_frame() => match frame {
                Some(Frame::Welcome(session)) => {
                    // Session id is captured before validation begins so
                    // a reconnect instruction arriving mid-validation
                    // still has an id to subscribe against.
                    let session_id = session.id.clone();
                    match current_session.replace(session) {
                        Some(old) => info!(
                            "EventSub session {} superseded by {}",
                            old.id, session_id
                        ),
                        None => info!("EventSub session established: {session_id}"),
                    }

                    if !subscribed {
                        ensure_valid_token(p).await?;

                        let config = EventConfig::redemption_add(&p.broadcaster_id);
                        p.subscriber
                            .subscribe(&config, &session_id, &SubscribeOptions::default())
                            .await
                            .context("subscription creation rejected")?;
                        subscribed = true;

                        refresh_armed = true;
                        next_refresh_at = Instant::now() + p.refresh_interval;
                    } else {
                        // Existing subscription ids stay valid across a
                        // server-driven reconnect; nothing is recreated.
                        info!("session resumed; keeping existing subscriptions");
                    }
                }

                Some(Frame::Keepalive) => {
                    debug!("EventSub keepalive");
                }

                Some(Frame::Notification { subscription, subscription_type, event }) => {
                    let kind = subscription_type.unwrap_or(subscription.kind);
                    let out = map_notification(&kind, event);
                    if p.event_tx.send(out).await.is_err() {
                        info!("event receiver dropped, stopping");
                        p.connection.disconnect().await;
                        return Ok(());
                    }
                }

                Some(Frame::Reconnect { reconnect_url }) => {
                    match reconnect_url {
                        Some(url) => {
                            info!("EventSub requested reconnect");
                            p.connection.begin_reconnect(url).await;
                            p.connection.connect().await?;
                        }
                        None => warn!("reconnect instruction without a URL; ignoring"),
                    }
                }

                Some(Frame::Revocation { subscription }) => {
                    p.subscriber
                        .handle_revocation(&subscription.id, &subscription.status);
                }

                Some(Frame::Unknown(kind)) => {
                    debug!("unknown EventSub message type: {kind}");
                }

                None => {
                    if p.connection.has_reconnect_url() {
                        p.connection.connect().await?;
                    } else {
                        anyhow::bail!("EventSub connection closed unexpectedly");
                    }
                }
            }
        }
    }
}

/// Validate the current token for the broadcaster; on a refreshable
/// rejection, run the refresh grant when the credential supports it.
/// Structural failures (ownership, scope, refresh unavailable or
/// rejected) are fatal: an invalid token is not a transient condition.
async fn ensure_valid_token(p: &mut LifecycleParams) -> anyhow::Result<()> {
    let (version, credential) = p.store.snapshot();

    let validation_err = match p
        .validator
        .validate_for_broadcaster(&credential.access_token, &p.broadcaster_id)
        .await
    {
        Ok(status) => {
            debug!("token validated for {} ({}s left)", status.login, status.expires_in);
            p.subscriber.update_token(credential.access_token);
            return Ok(());
        }
        Err(e) => e,
    };

    if !validation_err.is_refreshable() {
        anyhow::bail!(
            "access token unusable: {validation_err}; re-run the authorization flow \
             with the broadcaster account"
        );
    }

    if !credential.can_refresh() {
        anyhow::bail!(
            "access token invalid ({validation_err}) and auto-refresh is unavailable; \
             re-run the authorization flow"
        );
    }

    warn!("access token invalid ({validation_err}); attempting refresh");
    p.refresher
        .refresh_and_install(&p.store, version, p.sink.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("token refresh failed: {e}; {}", e.remediation()))?;

    apply_refreshed_credential(p);
    Ok(())
}

/// One periodic tick: cheap expiry probe, immediate refresh when the
/// remaining lifetime would not survive until the next tick. Never
/// fatal; the deadline is already re-armed by the caller.
async fn periodic_refresh_check(p: &mut LifecycleParams) {
    let (version, credential) = p.store.snapshot();

    match p.validator.validate(&credential.access_token).await {
        Ok(status) if !needs_refresh(status.expires_in, p.refresh_interval) => {
            debug!("token healthy, {}s remaining", status.expires_in);
            return;
        }
        Ok(status) => {
            info!(
                "token expires in {}s, inside the {}s check interval; refreshing now",
                status.expires_in,
                p.refresh_interval.as_secs()
            );
        }
        Err(TokenValidationError::Rejected { status }) => {
            warn!("token no longer valid ({status}); refreshing");
        }
        Err(e) => {
            warn!("periodic validation failed: {e}; will retry at next tick");
            return;
        }
    }

    if !credential.can_refresh() {
        error!("token needs refresh but auto-refresh is unavailable; re-run the authorization flow");
        return;
    }

    for attempt in 1..=REFRESH_RETRY_ATTEMPTS {
        match p
            .refresher
            .refresh_and_install(&p.store, version, p.sink.as_deref())
            .await
        {
            Ok(_) => {
                apply_refreshed_credential(p);
                return;
            }
            Err(e) if e.is_transient() && attempt < REFRESH_RETRY_ATTEMPTS => {
                let delay = REFRESH_RETRY_BASE * 2u32.saturating_pow(attempt - 1);
                warn!(
                    "periodic refresh attempt {attempt}/{REFRESH_RETRY_ATTEMPTS} failed: {e}; \
                     retrying in {delay:?}"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                // Standing warning only; the deadline stays armed so a
                // later, recovered attempt can still succeed.
                error!("periodic token refresh failed: {e}; {}", e.remediation());
                return;
            }
        }
    }
}

/// Terminal step of whichever refresh completed: re-arm the REST bearer
/// from the store's current view (which the versioned install already
/// arbitrated) and fire the host signal.
fn apply_refreshed_credential(p: &mut LifecycleParams) {
    let current = p.store.current();
    p.subscriber.update_token(current.access_token.clone());

    if let Some(callback) = p.on_refresh.as_ref() {
        callback(&current);
    }
}

fn needs_refresh(expires_in: u64, interval: Duration) -> bool {
    expires_in < interval.as_secs()
}

fn map_notification(kind: &str, event: serde_json::Value) -> ChannelPointsEvent {
    if kind == REDEMPTION_ADD_TYPE {
        match serde_json::from_value::<RewardRedemptionEvent>(event.clone()) {
            Ok(redemption) => {
                return ChannelPointsEvent::RedemptionAdded {
                    redemption_id: redemption.id,
                    user_id: redemption.user_id,
                    user_name: redemption.user_name,
                    reward_id: redemption.reward.id,
                    reward_title: redemption.reward.title,
                    cost: redemption.reward.cost,
                    user_input: redemption.user_input,
                };
            }
            Err(e) => warn!("malformed redemption event, forwarding raw: {e}"),
        }
    }

    ChannelPointsEvent::Unhandled {
        subscription_type: kind.to_string(),
        event,
    }
}
