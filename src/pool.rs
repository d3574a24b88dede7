//! Connection pool management.
//!
//! Database-specific pools (MySqlPool, PgPool, SqlitePool) behind a single
//! enum, so the rest of the crate can dispatch per backend without losing
//! driver-specific type support.

use crate::config::ConnectionConfig;
use crate::error::{MapError, MapResult};
use sqlx::{
    MySqlPool, PgPool, SqlitePool, mysql::MySqlConnectOptions, mysql::MySqlPoolOptions,
    postgres::PgPoolOptions, sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions,
};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Database backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DatabaseType {
    MySql,
    Postgres,
    SQLite,
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseType::MySql => write!(f, "mysql"),
            DatabaseType::Postgres => write!(f, "postgresql"),
            DatabaseType::SQLite => write!(f, "sqlite"),
        }
    }
}

impl DatabaseType {
    /// Infer the backend from a connection URL scheme.
    pub fn from_url(url: &str) -> MapResult<Self> {
        if url.starts_with("mysql://") {
            Ok(DatabaseType::MySql)
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(DatabaseType::Postgres)
        } else if url.starts_with("sqlite:") {
            Ok(DatabaseType::SQLite)
        } else {
            Err(MapError::connection(format!(
                "Unsupported connection URL scheme: '{}'. Expected mysql://, postgres://, or sqlite:",
                url.split(':').next().unwrap_or(url)
            )))
        }
    }
}

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Connect to the database named by the config's URL.
    pub async fn connect(config: &ConnectionConfig) -> MapResult<Self> {
        let db_type = DatabaseType::from_url(&config.url)?;
        info!(name = %config.name, db_type = %db_type, "Connecting to database");

        let pool_opts = &config.pool_options;
        let is_sqlite = db_type == DatabaseType::SQLite;
        let acquire_timeout = pool_opts.acquire_timeout_or_default();
        let idle_timeout = Some(pool_opts.idle_timeout_or_default());

        let pool = match db_type {
            DatabaseType::MySql => {
                let options = MySqlConnectOptions::from_str(&config.url)
                    .map_err(|e| {
                        MapError::connection(format!("Invalid MySQL connection string: {}", e))
                    })?
                    .charset("utf8mb4");

                let pool = MySqlPoolOptions::new()
                    .min_connections(pool_opts.min_connections_or_default())
                    .max_connections(pool_opts.max_connections_or_default(is_sqlite))
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .test_before_acquire(pool_opts.test_before_acquire_or_default())
                    .connect_with(options)
                    .await
                    .map_err(|e| MapError::connection(format!("Failed to connect: {}", e)))?;
                DbPool::MySql(pool)
            }
            DatabaseType::Postgres => {
                let pool = PgPoolOptions::new()
                    .min_connections(pool_opts.min_connections_or_default())
                    .max_connections(pool_opts.max_connections_or_default(is_sqlite))
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .test_before_acquire(pool_opts.test_before_acquire_or_default())
                    .connect(&config.url)
                    .await
                    .map_err(|e| MapError::connection(format!("Failed to connect: {}", e)))?;
                DbPool::Postgres(pool)
            }
            DatabaseType::SQLite => {
                let options = SqliteConnectOptions::from_str(&config.url)
                    .map_err(|e| {
                        MapError::connection(format!("Invalid SQLite connection string: {}", e))
                    })?
                    .create_if_missing(true);

                let pool = SqlitePoolOptions::new()
                    .min_connections(pool_opts.min_connections_or_default())
                    .max_connections(pool_opts.max_connections_or_default(is_sqlite))
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .test_before_acquire(pool_opts.test_before_acquire_or_default())
                    .connect_with(options)
                    .await
                    .map_err(|e| MapError::connection(format!("Failed to connect: {}", e)))?;
                DbPool::SQLite(pool)
            }
        };

        if let Some(version) = pool.server_version().await {
            debug!(name = %config.name, version = %version, "Connected");
        }

        Ok(pool)
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        match self {
            DbPool::MySql(pool) => pool.close().await,
            DbPool::Postgres(pool) => pool.close().await,
            DbPool::SQLite(pool) => pool.close().await,
        }
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::MySql(_) => DatabaseType::MySql,
            DbPool::Postgres(_) => DatabaseType::Postgres,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Get the server version from the connected database.
    pub async fn server_version(&self) -> Option<String> {
        let result = match self {
            DbPool::MySql(pool) => {
                sqlx::query_scalar::<_, String>("SELECT version()")
                    .fetch_one(pool)
                    .await
            }
            DbPool::Postgres(pool) => {
                sqlx::query_scalar::<_, String>("SELECT version()")
                    .fetch_one(pool)
                    .await
            }
            DbPool::SQLite(pool) => {
                sqlx::query_scalar::<_, String>("SELECT sqlite_version()")
                    .fetch_one(pool)
                    .await
            }
        };
        match result {
            Ok(version) => Some(version),
            Err(e) => {
                warn!(error = %e, "Failed to get server version");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_type_from_url() {
        assert_eq!(
            DatabaseType::from_url("mysql://u:p@localhost/db").unwrap(),
            DatabaseType::MySql
        );
        assert_eq!(
            DatabaseType::from_url("postgres://u:p@localhost/db").unwrap(),
            DatabaseType::Postgres
        );
        assert_eq!(
            DatabaseType::from_url("postgresql://u:p@localhost/db").unwrap(),
            DatabaseType::Postgres
        );
        assert_eq!(
            DatabaseType::from_url("sqlite::memory:").unwrap(),
            DatabaseType::SQLite
        );
    }

    #[test]
    fn test_db_type_from_url_rejects_unknown() {
        assert!(DatabaseType::from_url("oracle://x").is_err());
        assert!(DatabaseType::from_url("not a url").is_err());
    }

    #[test]
    fn test_db_type_display() {
        assert_eq!(DatabaseType::MySql.to_string(), "mysql");
        assert_eq!(DatabaseType::Postgres.to_string(), "postgresql");
        assert_eq!(DatabaseType::SQLite.to_string(), "sqlite");
    }
}
