mod blur;
mod config;
mod dither;
mod error;
mod http;
mod options;
mod pipeline;
mod raster;
mod reduce;
mod tone;
mod worker;
use std::path::PathBuf;

use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config first so we can honor logging.filter directive.
    let path = std::env::args().nth(1).map(PathBuf::from);
    let shared = config::ConfigManager::load(path).await?;
    let cfg_snapshot = config::ConfigManager::to_struct(&shared).await?;
    let filter_directive = cfg_snapshot
        .logging
        .as_ref()
        .and_then(|l| l.filter.clone())
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info,dither_worker=debug".to_string());
    fmt()
        .with_env_filter(EnvFilter::new(filter_directive))
        .init();
    let dispatcher =
        worker::Dispatcher::start(cfg_snapshot.workers(), cfg_snapshot.queue_capacity());
    let state = http::AppState {
        cfg: shared,
        dispatcher,
    };
    let app = http::router(state, cfg_snapshot.max_body_bytes());
    http::serve(app, cfg_snapshot.bind_address()).await?;
    Ok(())
}
