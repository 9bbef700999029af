//! Proxy configuration.

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};

use crate::proxy::{Endpoint, ListenerConfig, DEFAULT_MAX_CONNECTIONS};

/// Default client listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:6432";

/// Proxy configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Where clients connect (host:port, or a unix socket path).
    pub listen: Endpoint,

    /// Optional admin endpoint for routing requests.
    pub admin: Option<Endpoint>,

    /// Requests applied to the empty route table at startup.
    pub bootstrap_file: Option<PathBuf>,

    /// Maximum concurrent client sessions.
    pub max_connections: usize,

    /// Backend dial timeout.
    pub connect_timeout: Duration,

    /// Relay idle timeout; `None` disables it.
    pub idle_timeout: Option<Duration>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let listen = Endpoint::parse(
            &var("DOG_LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
        );

        let admin = var("DOG_ADMIN_ADDR")
            .filter(|v| !v.is_empty())
            .map(|v| Endpoint::parse(&v));

        let bootstrap_file = var("DOG_BOOTSTRAP_FILE")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let max_connections: usize = var("DOG_MAX_CONNECTIONS")
            .map(|v| v.parse())
            .transpose()
            .context("DOG_MAX_CONNECTIONS must be an integer.")?
            .unwrap_or(DEFAULT_MAX_CONNECTIONS)
            .max(1);

        let connect_timeout_ms: u64 = var("DOG_CONNECT_TIMEOUT_MS")
            .map(|v| v.parse())
            .transpose()
            .context("DOG_CONNECT_TIMEOUT_MS must be an integer (milliseconds).")?
            .unwrap_or(2000);
        let connect_timeout = Duration::from_millis(connect_timeout_ms.max(1));

        let idle_timeout = var("DOG_IDLE_TIMEOUT_SECS")
            .filter(|v| !v.is_empty())
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("DOG_IDLE_TIMEOUT_SECS must be an integer (seconds).")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let log_level = var("DOG_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            listen,
            admin,
            bootstrap_file,
            max_connections,
            connect_timeout,
            idle_timeout,
            log_level,
        })
    }

    /// Settings for the client listener.
    pub fn listener_config(&self) -> ListenerConfig {
        let mut config = ListenerConfig::new(self.listen.clone());
        config.max_connections = self.max_connections;
        config.connect_timeout = self.connect_timeout;
        config.idle_timeout = self.idle_timeout;
        config
    }
}
