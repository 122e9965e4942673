//! Database connectivity
//!
//! Builds the PostgreSQL connection pool that gets threaded explicitly
//! through the inspector, runner, and seed runner. There is no module-level
//! engine or ambient handle: tests and tooling can point independent pools at
//! isolated databases without cross-contamination.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::{MigrateError, MigrateResult};

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Seconds to wait for a connection before giving up
    pub acquire_timeout: u64,
}

impl DatabaseConfig {
    /// Read configuration from the environment (`DATABASE_URL`).
    pub fn from_env() -> MigrateResult<Self> {
        let url = std::env::var("DATABASE_URL").map_err(|_| {
            MigrateError::Configuration("DATABASE_URL is not set".to_string())
        })?;
        Ok(Self::new(url))
    }

    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: 30,
        }
    }
}

/// Connect to the database described by `config`.
///
/// The pool is validated with a round-trip query so connectivity problems
/// surface here, before any step is considered, rather than mid-run.
pub async fn connect(config: &DatabaseConfig) -> MigrateResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout))
        .connect(&config.url)
        .await
        .map_err(MigrateError::Connectivity)?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(MigrateError::Connectivity)?;

    tracing::debug!(
        max_connections = config.max_connections,
        "database pool established"
    );

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_are_conservative() {
        let config = DatabaseConfig::new("postgres://localhost/erp");
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.acquire_timeout, 30);
    }

    #[test]
    fn from_env_requires_database_url() {
        // Isolate from any ambient DATABASE_URL.
        let prev = std::env::var("DATABASE_URL").ok();
        std::env::remove_var("DATABASE_URL");
        let result = DatabaseConfig::from_env();
        if let Some(prev) = prev {
            std::env::set_var("DATABASE_URL", prev);
        }
        assert!(matches!(result, Err(MigrateError::Configuration(_))));
    }
}
