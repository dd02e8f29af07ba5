//! `browserflow-server`: binds the orchestrator's HTTP API and serves it
//! until shut down.

use browserflow::config::Cli;
use browserflow::start_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    env_logger::init();

    let config = Cli::load();
    start_server(config).await?;
    Ok(())
}
