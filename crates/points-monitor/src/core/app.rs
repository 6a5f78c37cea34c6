use std::time::Duration;

use tokio::time::timeout;
use tracing::{error, info};

use crate::{
    core::Shutdowner,
    domain::{SignalHandler, consumer::EventConsumer, fetcher::EventFetcher, models::ExitKind},
    infra::LogGuard,
};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct App<S, F, C> {
    _log_guard: LogGuard,
    signal_handler: S,
    fetcher: F,
    consumer: C,
}

impl<S, F, C> App<S, F, C>
where
    S: SignalHandler,
    F: EventFetcher + Shutdowner,
    C: EventConsumer,
{
    pub fn new(signal_handler: S, fetcher: F, consumer: C) -> anyhow::Result<Self> {
        let log_guard = LogGuard::init();

        Ok(Self {
            _log_guard: log_guard,
            signal_handler,
            fetcher,
            consumer,
        })
    }

    /// Runs until the operator signals a stop or the monitor exits on
    /// its own; an unrecoverable monitor failure surfaces as an error so
    /// the process exits non-zero.
    pub async fn run(self) -> anyhow::Result<()> {
        info!("channel points monitor running...");

        let Self {
            signal_handler,
            fetcher,
            consumer,
            ..
        } = self;

        let event_ch = fetcher.fetch().await;
        let mut handle = tokio::spawn(async move {
            consumer.consume(event_ch).await;
        });

        tokio::select! {
            signal = signal_handler.wait_for_shutdown() => {
                info!("received signal {signal}, stopping");
            }
            res = &mut handle => {
                info!("event stream ended on its own");
                res?;
            }
        }

        let exit = fetcher.shutdown().await?;

        if !handle.is_finished() {
            match timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(res) => {
                    info!("graceful shutdown complete");
                    res?;
                }
                Err(_) => {
                    error!("shutdown timeout exceeded, forcing exit");
                }
            }
        }

        match exit {
            ExitKind::Requested => Ok(()),
            ExitKind::Fatal(reason) => Err(anyhow::anyhow!("monitor failed: {reason}")),
        }
    }
}
