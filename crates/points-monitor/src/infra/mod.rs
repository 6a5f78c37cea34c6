pub mod config;
pub mod consumer;
pub mod fetchers;
pub mod logging;
pub mod signal;
pub mod store;

pub use config::Config;
pub use consumer::ConsolePrinter;
pub use fetchers::PointsFetcher;
pub use logging::LogGuard;
pub use signal::UnixSignalHandler;
pub use store::FileCredentialStore;
