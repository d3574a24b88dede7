//! Error types for the mapping layer.
//!
//! This module defines all error types using `thiserror`. The taxonomy follows
//! the layering of the crate: configuration errors are programmer errors raised
//! at registration time and never retried, parameter-resolution errors name the
//! offending property, and transaction-state errors are fatal invariant
//! violations rather than recoverable conditions.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MapError {
    /// Invalid or duplicate mapping registration. Raised synchronously while
    /// the adapter's configuration closure runs; indicates a programming
    /// mistake, not a data/runtime condition.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A call-time value could not be matched against the registered bindings.
    #[error("Parameter resolution failed for property '{property}' ({action}): {message}")]
    ParamResolution {
        property: String,
        action: String,
        message: String,
    },

    /// Command execution failed in the underlying driver.
    #[error("Execution error: {message}")]
    Execution {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    /// Scoped-transaction bookkeeping is inconsistent (e.g. a live scope entry
    /// with no transaction behind it). Not recoverable.
    #[error("Transaction state violation for connection '{connection}': {message}")]
    TransactionState { connection: String, message: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl MapError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a parameter-resolution error naming the property and action.
    pub fn param_resolution(
        property: impl Into<String>,
        action: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ParamResolution {
            property: property.into(),
            action: action.into(),
            message: message.into(),
        }
    }

    /// Create an execution error with optional SQL state.
    pub fn execution(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Execution {
            message: message.into(),
            sql_state,
        }
    }

    /// Create a transaction-state invariant violation.
    pub fn transaction_state(connection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransactionState {
            connection: connection.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this error is a registration-time programmer error.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Convert sqlx errors to MapError.
impl From<sqlx::Error> for MapError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => MapError::connection(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                MapError::execution(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => MapError::execution("No rows returned", None),
            sqlx::Error::PoolTimedOut => MapError::timeout("connection pool acquire", 30),
            sqlx::Error::PoolClosed => MapError::connection("Connection pool is closed"),
            sqlx::Error::Io(io_err) => MapError::connection(format!("I/O error: {}", io_err)),
            sqlx::Error::Tls(tls_err) => MapError::connection(format!("TLS error: {}", tls_err)),
            sqlx::Error::Protocol(msg) => MapError::connection(format!("Protocol error: {}", msg)),
            sqlx::Error::ColumnNotFound(col) => {
                MapError::execution(format!("Column not found: {}", col), None)
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => MapError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                MapError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => MapError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => MapError::internal("Database worker crashed"),
            _ => MapError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for mapping-layer operations.
pub type MapResult<T> = Result<T, MapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MapError::config("duplicate binding for 'Id'");
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("Id"));
    }

    #[test]
    fn test_param_resolution_names_property_and_action() {
        let err = MapError::param_resolution("Name", "Select", "no binding registered");
        let text = err.to_string();
        assert!(text.contains("Name"));
        assert!(text.contains("Select"));
    }

    #[test]
    fn test_error_retryable() {
        assert!(MapError::timeout("query", 30).is_retryable());
        assert!(MapError::connection("refused").is_retryable());
        assert!(!MapError::config("bad mapping").is_retryable());
        assert!(!MapError::transaction_state("main", "missing tx").is_retryable());
    }

    #[test]
    fn test_is_config() {
        assert!(MapError::config("x").is_config());
        assert!(!MapError::execution("y", None).is_config());
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_execution() {
        let err = MapError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, MapError::Execution { .. }));
    }

    #[test]
    fn test_sqlx_pool_closed_maps_to_connection() {
        let err = MapError::from(sqlx::Error::PoolClosed);
        assert!(matches!(err, MapError::Connection { .. }));
    }
}
