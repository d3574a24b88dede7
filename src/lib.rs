//! Declarative SQL mapping and execution.
//!
//! This library binds plain Rust row structs to SQL commands (SQLite,
//! PostgreSQL, MySQL): named-parameter bindings for the command direction,
//! column-to-field bindings for the materialization direction, explicit
//! nestable transaction scopes, and a command executor with monitoring and
//! error-translation hooks.

pub mod adapter;
pub mod config;
pub mod error;
pub mod executor;
pub mod params;
pub mod pool;
pub mod row;
pub mod scope;
pub mod value;

pub use adapter::{ActionKind, Adapter, CommandConfig, CommandKind, MappingBuilder, ParamSet};
pub use error::{MapError, MapResult};
pub use executor::{Command, CommandExecutor};
pub use pool::{DatabaseType, DbPool};
pub use row::ResultRow;
pub use scope::{ScopeRegistry, TransactionScope};
pub use value::{FromSql, SqlType, SqlValue, ToSql};
