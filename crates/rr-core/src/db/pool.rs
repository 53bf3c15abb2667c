//! SQLite connection pool management.

use super::StoreError;
use std::time::Duration;

#[cfg(feature = "database")]
use sqlx::SqlitePool;

/// Options for creating a database connection pool.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Minimum number of connections to keep open.
    pub min_connections: u32,
    /// Maximum time to wait for a connection.
    pub acquire_timeout: Duration,
    /// How long a writer waits on a locked database before giving up.
    pub busy_timeout: Duration,
    pub max_lifetime: Option<Duration>,
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        let max_connections = std::env::var("RR_DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8);

        Self {
            max_connections,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
            max_lifetime: Some(Duration::from_secs(1800)),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }
}

impl PoolOptions {
    /// Options for a `sqlite::memory:` database.
    ///
    /// Every connection to an in-memory database sees its own empty database,
    /// so the pool holds exactly one connection and never recycles it.
    pub fn in_memory() -> Self {
        Self {
            max_connections: 1,
            min_connections: 1,
            max_lifetime: None,
            idle_timeout: None,
            ..Self::default()
        }
    }
}

/// Whether the URL names a private in-memory database.
pub fn is_memory_url(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

/// Creates a SQLite pool from a `sqlite:` URL, creating the file if needed.
#[cfg(feature = "database")]
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, StoreError> {
    let options = if is_memory_url(database_url) {
        PoolOptions::in_memory()
    } else {
        PoolOptions::default()
    };
    create_pool_with_options(database_url, options).await
}

/// Creates a SQLite pool with custom options.
#[cfg(feature = "database")]
pub async fn create_pool_with_options(
    database_url: &str,
    options: PoolOptions,
) -> Result<SqlitePool, StoreError> {
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
    use std::str::FromStr;
    use tracing::info;

    if !database_url.starts_with("sqlite:") {
        return Err(StoreError::Configuration(format!(
            "Unsupported database URL scheme. Expected sqlite:, got: {}",
            database_url.split(':').next().unwrap_or("unknown")
        )));
    }

    let mut connect = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| StoreError::Configuration(e.to_string()))?
        .create_if_missing(true)
        .busy_timeout(options.busy_timeout);
    if !is_memory_url(database_url) {
        connect = connect.journal_mode(SqliteJournalMode::Wal);
    }

    info!(max_connections = options.max_connections, "Creating SQLite connection pool");
    let pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .min_connections(options.min_connections)
        .acquire_timeout(options.acquire_timeout)
        .max_lifetime(options.max_lifetime)
        .idle_timeout(options.idle_timeout)
        .connect_with(connect)
        .await?;
    Ok(pool)
}
