use anyhow::{Context, Result};
use sendgate::app::Services;
use sendgate::config::{load_config, new_runtime_config, SendgateConfig};
use sendgate::storage::Database;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sendgate=info".into()),
        )
        .init();

    info!("Sendgate starting...");

    let mut config = match std::env::var("SENDGATE_CONFIG") {
        Ok(path) => load_config(&path)
            .map_err(|e| anyhow::anyhow!("Failed to load config '{}': {}", path, e))?,
        Err(_) => SendgateConfig::default(),
    };
    config.apply_env();

    if config.webhook.secret.is_none() {
        warn!("No webhook secret configured: signature verification is DISABLED");
    }
    if config.server.admin_token.is_none() {
        warn!("No admin token configured: admin API is closed");
    }

    info!(
        bind_addr = %config.server.bind_addr,
        db_path = %config.database.path,
        timezone = %config.capacity.timezone,
        "Configuration loaded"
    );

    let db = Database::open(&config.database.path)
        .with_context(|| format!("Failed to open database '{}'", config.database.path))?;
    info!("Database initialized");

    let services = Services::new(db, &config, new_runtime_config())?;
    let router = services.router();

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .context("Failed to bind HTTP listener")?;
    info!(addr = %config.server.bind_addr, "HTTP API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("Sendgate stopped");

    Ok(())
}
