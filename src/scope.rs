//! Named transaction scopes with stack-like nesting.
//!
//! A [`ScopeRegistry`] holds at most one live transaction per connection name.
//! The first scope opened for a name begins a real database transaction and
//! becomes the root; scopes opened for the same name while it is active join
//! the existing transaction as observers. Only the root decides the outcome on
//! [`TransactionScope::finish`]: commit when [`TransactionScope::complete`]
//! was called, rollback otherwise. Registered commit/rollback callbacks are
//! invoked with the connection name when the root resolves.
//!
//! The registry is an explicit context object passed to executors; there is
//! no hidden per-thread state.

use crate::error::{MapError, MapResult};
use crate::params::{bind_mysql_value, bind_postgres_value, bind_sqlite_value};
use crate::pool::DbPool;
use crate::row::{DecodeRow, ResultRow};
use crate::value::SqlValue;
use chrono::{DateTime, Utc};
use sqlx::{MySql, Postgres, Sqlite, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Database-specific transaction wrapper.
pub enum DbTransaction {
    MySql(Transaction<'static, MySql>),
    Postgres(Transaction<'static, Postgres>),
    SQLite(Transaction<'static, Sqlite>),
}

impl DbTransaction {
    /// Commit the transaction.
    pub async fn commit(self) -> MapResult<()> {
        match self {
            DbTransaction::MySql(tx) => tx.commit().await.map_err(MapError::from),
            DbTransaction::Postgres(tx) => tx.commit().await.map_err(MapError::from),
            DbTransaction::SQLite(tx) => tx.commit().await.map_err(MapError::from),
        }
    }

    /// Rollback the transaction.
    pub async fn rollback(self) -> MapResult<()> {
        match self {
            DbTransaction::MySql(tx) => tx.rollback().await.map_err(MapError::from),
            DbTransaction::Postgres(tx) => tx.rollback().await.map_err(MapError::from),
            DbTransaction::SQLite(tx) => tx.rollback().await.map_err(MapError::from),
        }
    }
}

struct ActiveScope {
    /// None means the transaction was torn out from under live scopes, which
    /// executors treat as a fatal invariant violation.
    transaction: Option<DbTransaction>,
    depth: u32,
    started_at: DateTime<Utc>,
}

type ScopeEvent = Box<dyn Fn(&str) + Send + Sync>;

/// Registry of live named transactions plus commit/rollback subscribers.
#[derive(Clone)]
pub struct ScopeRegistry {
    scopes: Arc<RwLock<HashMap<String, ActiveScope>>>,
    commit_handlers: Arc<std::sync::RwLock<Vec<ScopeEvent>>>,
    rollback_handlers: Arc<std::sync::RwLock<Vec<ScopeEvent>>>,
}

impl ScopeRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            scopes: Arc::new(RwLock::new(HashMap::new())),
            commit_handlers: Arc::new(std::sync::RwLock::new(Vec::new())),
            rollback_handlers: Arc::new(std::sync::RwLock::new(Vec::new())),
        }
    }

    /// Open a scope for `name`. Begins a transaction on `pool` if none is
    /// active for that name, otherwise joins the existing one.
    pub async fn begin(&self, pool: &DbPool, name: impl Into<String>) -> MapResult<TransactionScope> {
        let name = name.into();
        let mut scopes = self.scopes.write().await;

        if let Some(entry) = scopes.get_mut(&name) {
            entry.depth += 1;
            debug!(connection = %name, depth = entry.depth, "Joined existing transaction scope");
            return Ok(TransactionScope {
                registry: self.clone(),
                connection_name: name,
                root: false,
                completed: false,
                finished: false,
            });
        }

        let tx = match pool {
            DbPool::MySql(p) => DbTransaction::MySql(p.begin().await.map_err(MapError::from)?),
            DbPool::Postgres(p) => {
                DbTransaction::Postgres(p.begin().await.map_err(MapError::from)?)
            }
            DbPool::SQLite(p) => DbTransaction::SQLite(p.begin().await.map_err(MapError::from)?),
        };

        scopes.insert(
            name.clone(),
            ActiveScope {
                transaction: Some(tx),
                depth: 1,
                started_at: Utc::now(),
            },
        );

        info!(connection = %name, "Transaction scope started");

        Ok(TransactionScope {
            registry: self.clone(),
            connection_name: name,
            root: true,
            completed: false,
            finished: false,
        })
    }

    /// Register a callback fired with the connection name on root commit.
    pub fn on_commit(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.commit_handlers
            .write()
            .expect("commit handler lock poisoned")
            .push(Box::new(handler));
    }

    /// Register a callback fired with the connection name on root rollback.
    pub fn on_rollback(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.rollback_handlers
            .write()
            .expect("rollback handler lock poisoned")
            .push(Box::new(handler));
    }

    /// Check whether a transaction is active for `name`.
    pub async fn is_active(&self, name: &str) -> bool {
        let scopes = self.scopes.read().await;
        scopes.contains_key(name)
    }

    /// Number of live transactions.
    pub async fn count(&self) -> usize {
        let scopes = self.scopes.read().await;
        scopes.len()
    }

    /// Seconds since the transaction for `name` started, if one is active.
    pub async fn active_duration_secs(&self, name: &str) -> Option<i64> {
        let scopes = self.scopes.read().await;
        scopes
            .get(name)
            .map(|e| Utc::now().signed_duration_since(e.started_at).num_seconds())
    }

    /// Execute a non-query inside the active transaction for `name`.
    ///
    /// Returns `Ok(None)` when no transaction is active, so the caller falls
    /// back to the pool. An entry with an empty transaction slot is a fatal
    /// state violation.
    pub(crate) async fn execute_in_scope(
        &self,
        name: &str,
        sql: &str,
        values: &[SqlValue],
    ) -> MapResult<Option<u64>> {
        let mut scopes = self.scopes.write().await;
        let Some(entry) = scopes.get_mut(name) else {
            return Ok(None);
        };
        let tx = entry.transaction.as_mut().ok_or_else(|| {
            MapError::transaction_state(name, "active scope entry has no live transaction")
        })?;

        let rows_affected = match tx {
            DbTransaction::MySql(tx) => {
                let mut query = sqlx::query(sql);
                for value in values {
                    query = bind_mysql_value(query, value);
                }
                query
                    .execute(&mut **tx)
                    .await
                    .map_err(MapError::from)?
                    .rows_affected()
            }
            DbTransaction::Postgres(tx) => {
                let mut query = sqlx::query(sql);
                for value in values {
                    query = bind_postgres_value(query, value);
                }
                query
                    .execute(&mut **tx)
                    .await
                    .map_err(MapError::from)?
                    .rows_affected()
            }
            DbTransaction::SQLite(tx) => {
                let mut query = sqlx::query(sql);
                for value in values {
                    query = bind_sqlite_value(query, value);
                }
                query
                    .execute(&mut **tx)
                    .await
                    .map_err(MapError::from)?
                    .rows_affected()
            }
        };

        debug!(connection = %name, rows_affected, "Executed in transaction scope");
        Ok(Some(rows_affected))
    }

    /// Run a row-returning command inside the active transaction for `name`.
    ///
    /// Returns `Ok(None)` when no transaction is active.
    pub(crate) async fn query_in_scope(
        &self,
        name: &str,
        sql: &str,
        values: &[SqlValue],
    ) -> MapResult<Option<Vec<ResultRow>>> {
        use futures_util::TryStreamExt;

        let mut scopes = self.scopes.write().await;
        let Some(entry) = scopes.get_mut(name) else {
            return Ok(None);
        };
        let tx = entry.transaction.as_mut().ok_or_else(|| {
            MapError::transaction_state(name, "active scope entry has no live transaction")
        })?;

        let rows: Vec<ResultRow> = match tx {
            DbTransaction::MySql(tx) => {
                let mut query = sqlx::query(sql);
                for value in values {
                    query = bind_mysql_value(query, value);
                }
                let rows: Vec<sqlx::mysql::MySqlRow> = query
                    .fetch(&mut **tx)
                    .try_collect()
                    .await
                    .map_err(MapError::from)?;
                rows.iter().map(|r| r.to_result_row()).collect()
            }
            DbTransaction::Postgres(tx) => {
                let mut query = sqlx::query(sql);
                for value in values {
                    query = bind_postgres_value(query, value);
                }
                let rows: Vec<sqlx::postgres::PgRow> = query
                    .fetch(&mut **tx)
                    .try_collect()
                    .await
                    .map_err(MapError::from)?;
                rows.iter().map(|r| r.to_result_row()).collect()
            }
            DbTransaction::SQLite(tx) => {
                let mut query = sqlx::query(sql);
                for value in values {
                    query = bind_sqlite_value(query, value);
                }
                let rows: Vec<sqlx::sqlite::SqliteRow> = query
                    .fetch(&mut **tx)
                    .try_collect()
                    .await
                    .map_err(MapError::from)?;
                rows.iter().map(|r| r.to_result_row()).collect()
            }
        };

        debug!(connection = %name, row_count = rows.len(), "Queried in transaction scope");
        Ok(Some(rows))
    }

    /// Root resolution: commit or roll back and notify subscribers.
    async fn resolve_root(&self, name: &str, commit: bool) -> MapResult<()> {
        let entry = {
            let mut scopes = self.scopes.write().await;
            let Some(entry) = scopes.remove(name) else {
                return Err(MapError::transaction_state(
                    name,
                    "root scope finished but no registry entry exists",
                ));
            };
            if entry.depth > 1 {
                let depth = entry.depth;
                scopes.insert(name.to_string(), entry);
                return Err(MapError::transaction_state(
                    name,
                    format!("root scope finished with {} nested scope(s) still open", depth - 1),
                ));
            }
            entry
        };

        let tx = entry.transaction.ok_or_else(|| {
            MapError::transaction_state(name, "active scope entry has no live transaction")
        })?;

        if commit {
            tx.commit().await?;
            info!(connection = %name, "Transaction scope committed");
            self.fire(&self.commit_handlers, name);
        } else {
            tx.rollback().await?;
            info!(connection = %name, "Transaction scope rolled back");
            self.fire(&self.rollback_handlers, name);
        }
        Ok(())
    }

    /// Decrement the nesting depth for a non-root scope.
    async fn leave_nested(&self, name: &str) -> MapResult<()> {
        let mut scopes = self.scopes.write().await;
        let Some(entry) = scopes.get_mut(name) else {
            return Err(MapError::transaction_state(
                name,
                "nested scope finished but no registry entry exists",
            ));
        };
        entry.depth = entry.depth.saturating_sub(1);
        debug!(connection = %name, depth = entry.depth, "Left nested transaction scope");
        Ok(())
    }

    /// Roll back and drop an abandoned root scope's transaction. Best effort.
    async fn abandon(&self, name: &str) {
        let entry = {
            let mut scopes = self.scopes.write().await;
            scopes.remove(name)
        };
        if let Some(entry) = entry {
            if let Some(tx) = entry.transaction {
                warn!(connection = %name, "Rolling back abandoned transaction scope");
                let _ = tx.rollback().await;
            }
            self.fire(&self.rollback_handlers, name);
        }
    }

    fn fire(&self, handlers: &Arc<std::sync::RwLock<Vec<ScopeEvent>>>, name: &str) {
        let handlers = handlers.read().expect("handler lock poisoned");
        for handler in handlers.iter() {
            handler(name);
        }
    }
}

impl Default for ScopeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// One `using`-style scope over a named transaction.
///
/// Call [`complete`](Self::complete) before [`finish`](Self::finish) to vote
/// commit; finishing the root without completing rolls the transaction back.
/// Finishing a nested scope never touches the transaction.
pub struct TransactionScope {
    registry: ScopeRegistry,
    connection_name: String,
    root: bool,
    completed: bool,
    finished: bool,
}

impl TransactionScope {
    /// Whether this scope owns the transaction outcome.
    pub fn is_root(&self) -> bool {
        self.root
    }

    /// The connection name this scope is bound to.
    pub fn connection_name(&self) -> &str {
        &self.connection_name
    }

    /// Mark the scope's work as successful.
    pub fn complete(&mut self) {
        self.completed = true;
    }

    /// Close the scope. Root scopes commit (if completed) or roll back and
    /// notify subscribers; nested scopes only decrement the join depth.
    ///
    /// A failed finish leaves the scope unfinished, so dropping it hands the
    /// transaction to the best-effort abandon path instead of leaking it.
    pub async fn finish(mut self) -> MapResult<()> {
        let result = if self.root {
            self.registry
                .resolve_root(&self.connection_name, self.completed)
                .await
        } else {
            self.registry.leave_nested(&self.connection_name).await
        };
        if result.is_ok() {
            self.finished = true;
        }
        result
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let registry = self.registry.clone();
        let name = self.connection_name.clone();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if self.root {
            warn!(
                connection = %name,
                "Root transaction scope dropped without finish(); rolling back"
            );
            handle.spawn(async move {
                registry.abandon(&name).await;
            });
        } else {
            // Early returns drop nested scopes without finish(); the depth
            // must still come back down or the root can never resolve.
            debug!(
                connection = %name,
                "Nested transaction scope dropped without finish()"
            );
            handle.spawn(async move {
                let _ = registry.leave_nested(&name).await;
            });
        }
    }
}
