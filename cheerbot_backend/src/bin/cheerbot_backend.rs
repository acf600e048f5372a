use anyhow::{Context, Result};
use cheerbot_backend::config::EngineConfig;
use cheerbot_backend::runtime::BackendRuntime;
use cheerbot_backend::server::serve_backend;
use flume::unbounded;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cheerbot_backend=debug")),
        )
        .init();

    let config = EngineConfig::load().context("failed to load config")?;
    let (event_tx, event_rx) = unbounded();
    let runtime = BackendRuntime::bootstrap(config, event_tx)
        .context("failed to bootstrap backend runtime")?;

    tracing::info!(
        "Starting backend service (set CHEERBOT_BACKEND_TOKEN, or CHEERBOT_BACKEND_OPEN=1; optional CHEERBOT_BACKEND_BIND)"
    );

    let server_rt = tokio::runtime::Runtime::new().context("failed to start server runtime")?;
    server_rt.block_on(serve_backend(runtime, event_rx))
}
