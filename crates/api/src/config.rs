//! Application configuration loaded from environment variables.

use std::time::Duration;

use coordination::LimiterConfig;
use idempotency::IdempotencyConfig;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default `"0.0.0.0"`)
/// - `PORT`: listen port (default `3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `PG_GATEWAY_PERMITS`: concurrent payment gateway calls (default `10`)
/// - `PG_GATEWAY_WAIT_SECS`: wait for a gateway permit (default `5`)
/// - `INVENTORY_LOCK_WAIT_SECS`: wait for a product lock (default `5`)
/// - `IDEMPOTENCY_TTL_SECS`: lifetime of cached responses (default `86400`)
/// - `DATABASE_URL`: PostgreSQL for saga ledgers (unset keeps them in memory)
/// - `DATABASE_MAX_CONNECTIONS`: ledger pool size (default `5`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub pg_gateway_permits: usize,
    pub pg_gateway_wait: Duration,
    pub inventory_lock_wait: Duration,
    pub idempotency_ttl: Duration,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_parse("PORT").unwrap_or(defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            pg_gateway_permits: env_parse("PG_GATEWAY_PERMITS")
                .filter(|&permits| permits > 0)
                .unwrap_or(defaults.pg_gateway_permits),
            pg_gateway_wait: env_parse("PG_GATEWAY_WAIT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.pg_gateway_wait),
            inventory_lock_wait: env_parse("INVENTORY_LOCK_WAIT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.inventory_lock_wait),
            idempotency_ttl: env_parse("IDEMPOTENCY_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.idempotency_ttl),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            database_max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
                .filter(|&n| n > 0)
                .unwrap_or(defaults.database_max_connections),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Limiter guarding the payment gateway.
    pub fn gateway_limiter(&self) -> LimiterConfig {
        LimiterConfig {
            permits: self.pg_gateway_permits,
            wait: self.pg_gateway_wait,
            ..LimiterConfig::default()
        }
    }

    /// Idempotency policy with the configured TTL. Keys are required.
    pub fn idempotency(&self) -> IdempotencyConfig {
        IdempotencyConfig {
            ttl: self.idempotency_ttl,
            ..IdempotencyConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            pg_gateway_permits: 10,
            pg_gateway_wait: Duration::from_secs(5),
            inventory_lock_wait: Duration::from_secs(5),
            idempotency_ttl: Duration::from_secs(86_400),
            database_url: None,
            database_max_connections: 5,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
