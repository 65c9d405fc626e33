use neobloom_core::{config, NeoBloomCore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // NEOBLOOM_LOG_FORMAT=json switches to machine-readable output.
    let log_format = std::env::var("NEOBLOOM_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "neobloom=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let config = config::get_or_init().await?;
    let core = NeoBloomCore::start(config).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    core.shutdown().await
}
