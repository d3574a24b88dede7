//! Command execution engine.
//!
//! Wraps the four execution shapes (row set, single row, scalar, non-query)
//! with:
//! - named-parameter expansion for the backend in use
//! - routing into an active transaction scope for the executor's connection
//!   name, falling back to the pool when none is active
//! - per-command timeouts
//! - before/after instrumentation hooks; the after hook runs fire-and-forget
//!   on a background task and can never affect the calling operation
//! - an optional error-translation hook applied to execution failures
//!
//! Connection acquisition and release are handled by the sqlx pool on both the
//! success and error paths.

use crate::error::{MapError, MapResult};
use crate::params::{bind_mysql_value, bind_postgres_value, bind_sqlite_value, expand_named};
use crate::pool::DbPool;
use crate::row::{DecodeRow, ResultRow};
use crate::scope::ScopeRegistry;
use crate::value::SqlValue;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Default per-command timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Correlation token returned by the before hook and handed to the after hook.
pub type MonitorToken = u64;

type BeforeHook = dyn Fn(&str) -> MonitorToken + Send + Sync;
type AfterHook = dyn Fn(String, MonitorToken, Vec<(String, SqlValue)>) + Send + Sync;
type ErrorHook = dyn Fn(MapError) -> MapError + Send + Sync;

/// One executable command: text with `@name` placeholders plus resolved
/// named values and an optional timeout override.
#[derive(Debug, Clone)]
pub struct Command {
    pub text: String,
    pub values: Vec<(String, SqlValue)>,
    pub timeout: Option<Duration>,
}

impl Command {
    /// Create a command with no parameters.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            values: Vec::new(),
            timeout: None,
        }
    }

    /// Attach a named value.
    pub fn value(mut self, name: impl Into<String>, value: SqlValue) -> Self {
        self.values.push((name.into(), value));
        self
    }

    /// Override the executor's default timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Executes commands against one named connection.
#[derive(Clone)]
pub struct CommandExecutor {
    pool: DbPool,
    connection_name: String,
    scopes: ScopeRegistry,
    before_hook: Option<Arc<BeforeHook>>,
    after_hook: Option<Arc<AfterHook>>,
    error_hook: Option<Arc<ErrorHook>>,
    default_timeout: Duration,
}

impl CommandExecutor {
    /// Create an executor over a pool, bound to a connection name in the
    /// given scope registry.
    pub fn new(pool: DbPool, connection_name: impl Into<String>, scopes: ScopeRegistry) -> Self {
        Self {
            pool,
            connection_name: connection_name.into(),
            scopes,
            before_hook: None,
            after_hook: None,
            error_hook: None,
            default_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Install a hook invoked before each execution with the command text;
    /// its return value correlates the matching after-hook call.
    pub fn with_before_hook(
        mut self,
        hook: impl Fn(&str) -> MonitorToken + Send + Sync + 'static,
    ) -> Self {
        self.before_hook = Some(Arc::new(hook));
        self
    }

    /// Install a hook invoked on a background task after each execution with
    /// the command text, the correlation token, and a snapshot of the bound
    /// values. Best effort; failures are contained in the task.
    pub fn with_after_hook(
        mut self,
        hook: impl Fn(String, MonitorToken, Vec<(String, SqlValue)>) + Send + Sync + 'static,
    ) -> Self {
        self.after_hook = Some(Arc::new(hook));
        self
    }

    /// Install a hook that translates execution errors before they reach the
    /// caller. The hook must produce an error; a command execution always
    /// either succeeds or raises.
    pub fn with_error_hook(
        mut self,
        hook: impl Fn(MapError) -> MapError + Send + Sync + 'static,
    ) -> Self {
        self.error_hook = Some(Arc::new(hook));
        self
    }

    /// Change the default per-command timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// The pool this executor runs against.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// The connection name scoped transactions are keyed by.
    pub fn connection_name(&self) -> &str {
        &self.connection_name
    }

    /// The scope registry this executor consults.
    pub fn scopes(&self) -> &ScopeRegistry {
        &self.scopes
    }

    /// Execute a row-returning command.
    pub async fn query(&self, command: &Command) -> MapResult<Vec<ResultRow>> {
        let token = self.run_before(&command.text);
        let (sql, ordered) = expand_named(&command.text, &command.values, self.pool.db_type())?;
        let command_timeout = command.timeout.unwrap_or(self.default_timeout);

        debug!(
            sql = %command.text,
            params = command.values.len(),
            timeout_secs = command_timeout.as_secs(),
            "Executing query"
        );

        let result = self.fetch_rows(&sql, &ordered, command_timeout).await;
        self.run_after(&command.text, token, &command.values);
        result.map_err(|e| self.translate(e))
    }

    /// Execute a row-returning command and take the first row, if any.
    pub async fn query_one(&self, command: &Command) -> MapResult<Option<ResultRow>> {
        let mut rows = self.query(command).await?;
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows.swap_remove(0)))
        }
    }

    /// Execute a command and return the first column of the first row, or
    /// NULL when the result set is empty.
    pub async fn scalar(&self, command: &Command) -> MapResult<SqlValue> {
        let row = self.query_one(command).await?;
        Ok(row
            .and_then(|r| r.first_value().cloned())
            .unwrap_or(SqlValue::Null))
    }

    /// Execute a non-query command and return the affected row count.
    pub async fn non_query(&self, command: &Command) -> MapResult<u64> {
        let token = self.run_before(&command.text);
        let (sql, ordered) = expand_named(&command.text, &command.values, self.pool.db_type())?;
        let command_timeout = command.timeout.unwrap_or(self.default_timeout);

        debug!(
            sql = %command.text,
            params = command.values.len(),
            timeout_secs = command_timeout.as_secs(),
            "Executing non-query"
        );

        let result = self.execute_write(&sql, &ordered, command_timeout).await;
        self.run_after(&command.text, token, &command.values);
        result.map_err(|e| self.translate(e))
    }

    async fn fetch_rows(
        &self,
        sql: &str,
        ordered: &[SqlValue],
        command_timeout: Duration,
    ) -> MapResult<Vec<ResultRow>> {
        // Route into a live transaction scope first
        let scoped = timeout(
            command_timeout,
            self.scopes.query_in_scope(&self.connection_name, sql, ordered),
        )
        .await
        .map_err(|_| timeout_error("query execution", command_timeout))??;
        if let Some(rows) = scoped {
            return Ok(rows);
        }

        match &self.pool {
            DbPool::MySql(p) => mysql::fetch_rows(p, sql, ordered, command_timeout).await,
            DbPool::Postgres(p) => postgres::fetch_rows(p, sql, ordered, command_timeout).await,
            DbPool::SQLite(p) => sqlite::fetch_rows(p, sql, ordered, command_timeout).await,
        }
    }

    async fn execute_write(
        &self,
        sql: &str,
        ordered: &[SqlValue],
        command_timeout: Duration,
    ) -> MapResult<u64> {
        let scoped = timeout(
            command_timeout,
            self.scopes
                .execute_in_scope(&self.connection_name, sql, ordered),
        )
        .await
        .map_err(|_| timeout_error("write operation", command_timeout))??;
        if let Some(rows_affected) = scoped {
            return Ok(rows_affected);
        }

        match &self.pool {
            DbPool::MySql(p) => mysql::execute_write(p, sql, ordered, command_timeout).await,
            DbPool::Postgres(p) => postgres::execute_write(p, sql, ordered, command_timeout).await,
            DbPool::SQLite(p) => sqlite::execute_write(p, sql, ordered, command_timeout).await,
        }
    }

    /// Invoke the before hook; panics inside it are swallowed.
    fn run_before(&self, text: &str) -> MonitorToken {
        match &self.before_hook {
            Some(hook) => {
                let hook = Arc::clone(hook);
                catch_unwind(AssertUnwindSafe(|| hook(text))).unwrap_or(0)
            }
            None => 0,
        }
    }

    /// Dispatch the after hook on a background task.
    fn run_after(&self, text: &str, token: MonitorToken, values: &[(String, SqlValue)]) {
        if let Some(hook) = &self.after_hook {
            let hook = Arc::clone(hook);
            let text = text.to_string();
            let snapshot = values.to_vec();
            tokio::spawn(async move {
                hook(text, token, snapshot);
            });
        }
    }

    fn translate(&self, err: MapError) -> MapError {
        // Configuration errors are programmer errors; only execution-stage
        // failures pass through the translation hook.
        if err.is_config() {
            return err;
        }
        match &self.error_hook {
            Some(hook) => hook(err),
            None => err,
        }
    }
}

fn timeout_error(operation: &str, elapsed: Duration) -> MapError {
    MapError::timeout(operation, elapsed.as_secs())
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// The code structure is intentionally parallel to make differences obvious.

mod mysql {
    use super::*;
    use sqlx::MySqlPool;

    pub async fn fetch_rows(
        pool: &MySqlPool,
        sql: &str,
        values: &[SqlValue],
        command_timeout: Duration,
    ) -> MapResult<Vec<ResultRow>> {
        let mut query = sqlx::query(sql);
        for value in values {
            query = bind_mysql_value(query, value);
        }
        match timeout(command_timeout, query.fetch_all(pool)).await {
            Ok(Ok(rows)) => Ok(rows.iter().map(|r| r.to_result_row()).collect()),
            Ok(Err(e)) => Err(MapError::from(e)),
            Err(_) => Err(timeout_error("query execution", command_timeout)),
        }
    }

    pub async fn execute_write(
        pool: &MySqlPool,
        sql: &str,
        values: &[SqlValue],
        command_timeout: Duration,
    ) -> MapResult<u64> {
        let mut query = sqlx::query(sql);
        for value in values {
            query = bind_mysql_value(query, value);
        }
        match timeout(command_timeout, query.execute(pool)).await {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(MapError::from(e)),
            Err(_) => Err(timeout_error("write operation", command_timeout)),
        }
    }
}

mod postgres {
    use super::*;
    use sqlx::PgPool;

    pub async fn fetch_rows(
        pool: &PgPool,
        sql: &str,
        values: &[SqlValue],
        command_timeout: Duration,
    ) -> MapResult<Vec<ResultRow>> {
        let mut query = sqlx::query(sql);
        for value in values {
            query = bind_postgres_value(query, value);
        }
        match timeout(command_timeout, query.fetch_all(pool)).await {
            Ok(Ok(rows)) => Ok(rows.iter().map(|r| r.to_result_row()).collect()),
            Ok(Err(e)) => Err(MapError::from(e)),
            Err(_) => Err(timeout_error("query execution", command_timeout)),
        }
    }

    pub async fn execute_write(
        pool: &PgPool,
        sql: &str,
        values: &[SqlValue],
        command_timeout: Duration,
    ) -> MapResult<u64> {
        let mut query = sqlx::query(sql);
        for value in values {
            query = bind_postgres_value(query, value);
        }
        match timeout(command_timeout, query.execute(pool)).await {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(MapError::from(e)),
            Err(_) => Err(timeout_error("write operation", command_timeout)),
        }
    }
}

mod sqlite {
    use super::*;
    use sqlx::SqlitePool;

    pub async fn fetch_rows(
        pool: &SqlitePool,
        sql: &str,
        values: &[SqlValue],
        command_timeout: Duration,
    ) -> MapResult<Vec<ResultRow>> {
        let mut query = sqlx::query(sql);
        for value in values {
            query = bind_sqlite_value(query, value);
        }
        match timeout(command_timeout, query.fetch_all(pool)).await {
            Ok(Ok(rows)) => Ok(rows.iter().map(|r| r.to_result_row()).collect()),
            Ok(Err(e)) => Err(MapError::from(e)),
            Err(_) => Err(timeout_error("query execution", command_timeout)),
        }
    }

    pub async fn execute_write(
        pool: &SqlitePool,
        sql: &str,
        values: &[SqlValue],
        command_timeout: Duration,
    ) -> MapResult<u64> {
        let mut query = sqlx::query(sql);
        for value in values {
            query = bind_sqlite_value(query, value);
        }
        match timeout(command_timeout, query.execute(pool)).await {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(MapError::from(e)),
            Err(_) => Err(timeout_error("write operation", command_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = Command::new("SELECT 1")
            .value("Id", SqlValue::Int(5))
            .with_timeout(Duration::from_secs(10));
        assert_eq!(cmd.text, "SELECT 1");
        assert_eq!(cmd.values.len(), 1);
        assert_eq!(cmd.timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_command_defaults() {
        let cmd = Command::new("SELECT 1");
        assert!(cmd.values.is_empty());
        assert!(cmd.timeout.is_none());
    }

    #[test]
    fn test_timeout_error_shape() {
        let err = timeout_error("query execution", Duration::from_secs(30));
        assert!(matches!(err, MapError::Timeout { .. }));
        assert!(err.to_string().contains("30"));
    }
}
