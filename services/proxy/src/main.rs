//! dog
//!
//! Routing proxy for PostgreSQL clients.
//!
//! This service:
//! - Accepts client connections on one TCP or unix socket listener
//! - Routes each session by the database named in its startup packet
//! - Rewrites the database name and relays frames to the backend
//! - Optionally serves routing requests on an admin endpoint

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dog_proxy::{bootstrap, AdminServer, Config, Listener, RouteTable};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to DOG_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting dog");
    info!(
        listen = %config.listen,
        admin = ?config.admin.as_ref().map(ToString::to_string),
        max_connections = config.max_connections,
        connect_timeout_ms = config.connect_timeout.as_millis() as u64,
        idle_timeout_secs = ?config.idle_timeout.map(|t| t.as_secs()),
        "Configuration loaded"
    );

    let route_table = Arc::new(RouteTable::new());

    if let Some(path) = &config.bootstrap_file {
        bootstrap(&route_table, path).await?;
    }

    if let Some(admin) = &config.admin {
        let server = AdminServer::bind(admin, Arc::clone(&route_table))
            .await
            .with_context(|| format!("failed to bind admin endpoint {}", admin))?;
        let server = Arc::new(server);
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!(error = %e, "Admin endpoint error");
            }
        });
    }

    let listener = Listener::bind(config.listener_config(), route_table)
        .await
        .with_context(|| format!("failed to bind listener {}", config.listen))?;

    Arc::new(listener).run().await?;
    Ok(())
}
