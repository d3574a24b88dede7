//! Declarative mapping adapter.
//!
//! An [`Adapter`] pairs one row struct with up to four SQL commands
//! (select/insert/update/delete) and a set of registered bindings: property →
//! named parameter for the command direction, result column → field setter
//! for the materialization direction. Registration happens once, lazily, on
//! first use; after that the mapping tables are immutable and executions can
//! run concurrently.
//!
//! Call-time values travel in a [`ParamSet`] keyed by property name. Every
//! registered parameter the set leaves unset binds NULL; a value for a
//! property with no binding for that action is an error naming the property.
//!
//! ```no_run
//! # use rowbind::{Adapter, CommandExecutor, ParamSet, ScopeRegistry, DbPool};
//! # use rowbind::config::ConnectionConfig;
//! #[derive(Default)]
//! struct Person {
//!     id: i64,
//!     name: String,
//! }
//!
//! # async fn demo() -> rowbind::MapResult<()> {
//! # let pool = DbPool::connect(&ConnectionConfig::new("main", "sqlite::memory:")).await?;
//! # let executor = CommandExecutor::new(pool, "main", ScopeRegistry::new());
//! let people = Adapter::<Person>::new(executor, |b| {
//!     b.select_text("SELECT Id, Name FROM People WHERE Id = @Id")?;
//!     b.select_param("Id", "@Id")?;
//!     b.select_field("Id", "Id", |r: &mut Person, v: i64| r.id = v)?;
//!     b.select_field("Name", "Name", |r: &mut Person, v: String| r.name = v)?;
//!     Ok(())
//! });
//! let rows = people.get(ParamSet::new().set("Id", 5)).await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;

pub use builder::{ActionKind, CommandConfig, CommandKind, MappingBuilder};

use crate::error::{MapError, MapResult};
use crate::executor::{Command, CommandExecutor};
use crate::pool::DatabaseType;
use crate::value::{SqlValue, ToSql};
use builder::Mappings;
use tokio::sync::OnceCell;
use tracing::debug;

/// Call-time named parameter values.
///
/// Property names refer to the names used at registration, not SQL parameter
/// names. Setting the same property twice is reported at execution time.
#[derive(Default, Clone)]
pub struct ParamSet {
    values: Vec<(String, SqlValue)>,
}

impl ParamSet {
    /// Create an empty set. Executing with it binds NULL for every
    /// registered parameter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Supply a value for a registered property.
    pub fn set<T: ToSql>(mut self, property: impl Into<String>, value: T) -> Self {
        self.values.push((property.into(), value.to_sql()));
        self
    }

    /// Supply an explicit NULL for a registered property.
    pub fn set_null(self, property: impl Into<String>) -> Self {
        self.set(property, SqlValue::Null)
    }

    /// Number of supplied values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A configured mapping between one row struct and its SQL commands.
///
/// Intended to be a long-lived singleton per logical data-access use case:
/// construct once, share, execute many times. The registration closure runs
/// exactly once, on first execution, under the configuration gate.
pub struct Adapter<R> {
    executor: CommandExecutor,
    init: Box<dyn Fn(&mut MappingBuilder<R>) -> MapResult<()> + Send + Sync>,
    mappings: OnceCell<Mappings<R>>,
}

impl<R> Adapter<R> {
    /// Create an adapter whose mappings are registered by `init` on first use.
    pub fn new(
        executor: CommandExecutor,
        init: impl Fn(&mut MappingBuilder<R>) -> MapResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            executor,
            init: Box::new(init),
            mappings: OnceCell::new(),
        }
    }

    /// The executor this adapter runs commands through.
    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    /// Run the registration closure once and return the mapping tables.
    async fn mappings(&self) -> MapResult<&Mappings<R>> {
        self.mappings
            .get_or_try_init(|| async {
                let mut b = MappingBuilder::new();
                (self.init)(&mut b)?;
                debug!(
                    commands = b.commands.len(),
                    params = b.params.len(),
                    fields = b.fields.len(),
                    "Adapter configured"
                );
                Ok(b.finish())
            })
            .await
    }

    /// Execute the select command and materialize one row struct per result
    /// row through the registered field bindings.
    pub async fn get(&self, params: ParamSet) -> MapResult<Vec<R>>
    where
        R: Default,
    {
        let mappings = self.mappings().await?;
        let config = mappings.command(ActionKind::Select)?;
        let values = resolve_params(ActionKind::Select, mappings, &params)?;
        let command = render_command(
            config,
            ActionKind::Select,
            values,
            self.executor.pool().db_type(),
        )?;
        let result_rows = self.executor.query(&command).await?;

        let mut rows = Vec::with_capacity(result_rows.len());
        for result in &result_rows {
            let mut row = R::default();
            for field in &mappings.fields {
                (field.apply)(&mut row, result)?;
            }
            rows.push(row);
        }
        Ok(rows)
    }

    /// Execute the select command and return the first materialized row, if
    /// any.
    pub async fn get_one(&self, params: ParamSet) -> MapResult<Option<R>>
    where
        R: Default,
    {
        let mut rows = self.get(params).await?;
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows.swap_remove(0)))
        }
    }

    /// Execute the select command and return the single scalar value, or
    /// NULL when the result set is empty.
    pub async fn get_scalar(&self, params: ParamSet) -> MapResult<SqlValue> {
        let mappings = self.mappings().await?;
        let config = mappings.command(ActionKind::Select)?;
        let values = resolve_params(ActionKind::Select, mappings, &params)?;
        let command = render_command(
            config,
            ActionKind::Select,
            values,
            self.executor.pool().db_type(),
        )?;
        self.executor.scalar(&command).await
    }

    /// Execute the insert command, binding values from the row's own fields.
    ///
    /// With key-retrieval bindings registered, the insert runs as a
    /// row-returning command and the first returned row's bound columns are
    /// copied back into the row; with none, it runs as a non-query and the
    /// row is left untouched.
    pub async fn add(&self, row: &mut R) -> MapResult<()> {
        let mappings = self.mappings().await?;
        let config = mappings.command(ActionKind::Insert)?;

        let values = insert_values(mappings, row)?;
        let command = render_command(
            config,
            ActionKind::Insert,
            values,
            self.executor.pool().db_type(),
        )?;

        if mappings.keys.is_empty() {
            self.executor.non_query(&command).await?;
            return Ok(());
        }

        match self.executor.query_one(&command).await? {
            Some(result) => {
                for key in &mappings.keys {
                    (key.apply)(row, &result)?;
                }
                Ok(())
            }
            None => Err(MapError::execution(
                "insert with key-retrieval bindings returned no rows",
                None,
            )),
        }
    }

    /// Execute the update command as a non-query; returns rows affected.
    pub async fn update(&self, params: ParamSet) -> MapResult<u64> {
        self.non_query(ActionKind::Update, params).await
    }

    /// Execute the delete command as a non-query; returns rows affected.
    pub async fn delete(&self, params: ParamSet) -> MapResult<u64> {
        self.non_query(ActionKind::Delete, params).await
    }

    async fn non_query(&self, action: ActionKind, params: ParamSet) -> MapResult<u64> {
        let mappings = self.mappings().await?;
        let config = mappings.command(action)?;
        let values = resolve_params(action, mappings, &params)?;
        let command = render_command(config, action, values, self.executor.pool().db_type())?;
        self.executor.non_query(&command).await
    }
}

/// Read insert values from the row's registered getters, coerced to each
/// binding's declared type the same way resolved parameters are.
fn insert_values<R>(mappings: &Mappings<R>, row: &R) -> MapResult<Vec<(String, SqlValue)>> {
    let mut values = Vec::with_capacity(mappings.inserts.len());
    for entry in &mappings.inserts {
        let value = (entry.get)(row).coerce(entry.sql_type)?;
        values.push((entry.parameter.clone(), value));
    }
    Ok(values)
}

/// Match supplied values against the registered bindings for one action.
///
/// Every registered parameter the set leaves unset resolves to NULL.
/// Converters run on supplied values only; declared types coerce after
/// conversion.
fn resolve_params<R>(
    action: ActionKind,
    mappings: &Mappings<R>,
    params: &ParamSet,
) -> MapResult<Vec<(String, SqlValue)>> {
    // Duplicate property references within one set are an error
    for (i, (property, _)) in params.values.iter().enumerate() {
        if params.values[..i].iter().any(|(p, _)| p == property) {
            return Err(MapError::param_resolution(
                property,
                action.to_string(),
                "property supplied more than once",
            ));
        }
    }

    // A value for an unbound property is an error naming the property
    for (property, _) in &params.values {
        if !mappings
            .params_for(action)
            .any(|e| &e.property == property)
        {
            return Err(MapError::param_resolution(
                property,
                action.to_string(),
                "no parameter binding registered for this property",
            ));
        }
    }

    let mut resolved = Vec::new();
    for entry in mappings.params_for(action) {
        let supplied = params
            .values
            .iter()
            .find(|(p, _)| p == &entry.property)
            .map(|(_, v)| v.clone());

        let mut value = match supplied {
            Some(v) => match &entry.convert {
                Some(convert) => convert(v),
                None => v,
            },
            None => SqlValue::Null,
        };
        if let Some(sql_type) = entry.sql_type {
            value = value.coerce(sql_type)?;
        }
        resolved.push((entry.parameter.clone(), value));
    }
    Ok(resolved)
}

/// Build the executable command for a config: inline text as-is, stored
/// procedures rendered as a CALL with the action's parameters in
/// registration order.
fn render_command(
    config: &CommandConfig,
    action: ActionKind,
    values: Vec<(String, SqlValue)>,
    db_type: DatabaseType,
) -> MapResult<Command> {
    let text = match config.kind {
        CommandKind::Text => config.text.clone(),
        CommandKind::Procedure => {
            if db_type == DatabaseType::SQLite {
                return Err(MapError::config(format!(
                    "{} command is a stored procedure, which SQLite does not support",
                    action
                )));
            }
            let args = values
                .iter()
                .map(|(name, _)| format!("@{}", name.trim_start_matches('@')))
                .collect::<Vec<_>>()
                .join(", ");
            format!("CALL {}({})", config.text, args)
        }
    };

    let mut command = Command::new(text);
    command.values = values;
    command.timeout = config.timeout;
    Ok(command)
}
