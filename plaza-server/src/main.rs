use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Use JSON logs in production (PLAZA_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("PLAZA_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("plaza_server=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }

    let config = plaza_server::config::ServerConfig::parse();
    tracing::info!("Starting chat relay on {}", config.bind_addr());
    tracing::info!(
        "Reconciling sessions every {}s, static files from {}",
        config.reconcile_interval().as_secs(),
        config.static_dir,
    );

    let server = plaza_server::server::Server::new(config);
    server.run().await
}
