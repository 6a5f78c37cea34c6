use std::fmt;

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownKind {
    Interrupt,
    Terminate,
    Hangup,
}

impl fmt::Display for ShutdownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownKind::Interrupt => "SIGINT",
            ShutdownKind::Terminate => "SIGTERM",
            ShutdownKind::Hangup => "SIGHUP",
        };
        write!(f, "{name}")
    }
}

#[async_trait]
pub trait SignalHandler: Send + Sync + 'static {
    async fn wait_for_shutdown(&self) -> ShutdownKind;
}
