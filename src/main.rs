//! WorkPlan Agent - HTTP server binary.

use workplan_agent::{api, config::Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting WorkPlan Agent v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    tracing::info!(
        "Using model {} (analyzing up to {} rows per upload)",
        config.model,
        config.max_analyzed_rows
    );

    api::serve(config).await
}
