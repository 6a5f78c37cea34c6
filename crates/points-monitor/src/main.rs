mod core;
mod domain;
mod infra;

use std::path::Path;
use std::sync::Arc;

use core::App;

use infra::{Config, ConsolePrinter, FileCredentialStore, PointsFetcher, UnixSignalHandler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_config()?;

    let config = Config::new();

    let sink = Arc::new(FileCredentialStore::from_config(&config));
    let fetcher = PointsFetcher::new(&config, sink)?;
    let consumer = ConsolePrinter::new();

    let app = App::new(UnixSignalHandler::new(), fetcher, consumer)?;
    app.run().await
}

fn load_config() -> anyhow::Result<()> {
    if Path::new("./config").exists() {
        dotenv::from_path("./config")?;
    }
    Ok(())
}
