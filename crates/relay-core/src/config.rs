// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

/// Relay Core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// HTTP server address for the task API and internal trigger endpoint
    pub http_addr: SocketAddr,
    /// Base URL triggers are POSTed to (normally this server's own address)
    pub trigger_base_url: String,
    /// Liveness threshold after which a run counts as stale
    pub stale_after: Duration,
    /// How often the reconciler sweeps
    pub reconcile_interval: Duration,
    /// Re-trigger budget per stack run before a timeout failure
    pub max_trigger_attempts: i32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `RELAY_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `RELAY_HTTP_PORT`: HTTP server port (default: 8080)
    /// - `RELAY_TRIGGER_BASE_URL`: processor endpoint base (default: `http://127.0.0.1:<port>`)
    /// - `RELAY_STALE_AFTER_SECS`: liveness threshold in seconds (default: 30)
    /// - `RELAY_RECONCILE_INTERVAL_SECS`: sweep interval in seconds (default: 5)
    /// - `RELAY_MAX_TRIGGER_ATTEMPTS`: re-trigger budget (default: 5)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("RELAY_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("RELAY_DATABASE_URL"))?;

        let http_port: u16 = std::env::var("RELAY_HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("RELAY_HTTP_PORT", "must be a valid port number")
            })?;

        let trigger_base_url = std::env::var("RELAY_TRIGGER_BASE_URL")
            .unwrap_or_else(|_| format!("http://127.0.0.1:{}", http_port));

        let stale_after_secs: u64 = std::env::var("RELAY_STALE_AFTER_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("RELAY_STALE_AFTER_SECS", "must be a positive integer")
            })?;

        let reconcile_interval_secs: u64 = std::env::var("RELAY_RECONCILE_INTERVAL_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "RELAY_RECONCILE_INTERVAL_SECS",
                    "must be a positive integer",
                )
            })?;

        let max_trigger_attempts: i32 = std::env::var("RELAY_MAX_TRIGGER_ATTEMPTS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("RELAY_MAX_TRIGGER_ATTEMPTS", "must be a positive integer")
            })?;

        Ok(Self {
            database_url,
            http_addr: SocketAddr::from(([0, 0, 0, 0], http_port)),
            trigger_base_url,
            stale_after: Duration::from_secs(stale_after_secs),
            reconcile_interval: Duration::from_secs(reconcile_interval_secs),
            max_trigger_attempts,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
