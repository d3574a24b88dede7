//! Mapping registration.
//!
//! A [`MappingBuilder`] accumulates command configs, parameter bindings, and
//! field bindings for one adapter. Every registration is validated
//! immediately: duplicate bindings, empty command text, and re-configured
//! actions fail with a configuration error naming the offender. The finished
//! [`Mappings`] table is immutable and read concurrently without locking.

use crate::error::{MapError, MapResult};
use crate::row::ResultRow;
use crate::value::{FromSql, SqlType, SqlValue, ToSql};
use std::sync::Arc;
use std::time::Duration;

/// The category of SQL operation a command config belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Select,
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Select => write!(f, "Select"),
            ActionKind::Insert => write!(f, "Insert"),
            ActionKind::Update => write!(f, "Update"),
            ActionKind::Delete => write!(f, "Delete"),
        }
    }
}

/// Whether command text is inline SQL or a stored procedure name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Text,
    Procedure,
}

/// Command registration for one action.
#[derive(Debug, Clone)]
pub struct CommandConfig {
    pub text: String,
    pub kind: CommandKind,
    pub timeout: Option<Duration>,
}

impl CommandConfig {
    /// Inline SQL command.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: CommandKind::Text,
            timeout: None,
        }
    }

    /// Stored procedure command; `name` is the procedure name.
    pub fn procedure(name: impl Into<String>) -> Self {
        Self {
            text: name.into(),
            kind: CommandKind::Procedure,
            timeout: None,
        }
    }

    /// Set a per-command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

pub(crate) type ValueConvert = Arc<dyn Fn(SqlValue) -> SqlValue + Send + Sync>;

/// Binding of a property to a named SQL parameter for one action.
pub(crate) struct ParamEntry {
    pub property: String,
    pub action: ActionKind,
    pub parameter: String,
    pub sql_type: Option<SqlType>,
    pub convert: Option<ValueConvert>,
}

/// Binding of a result column to a row field setter.
pub(crate) struct FieldEntry<R> {
    pub property: String,
    pub apply: Box<dyn Fn(&mut R, &ResultRow) -> MapResult<()> + Send + Sync>,
}

/// Binding of a row field getter to an insert parameter.
pub(crate) struct InsertEntry<R> {
    pub property: String,
    pub parameter: String,
    pub sql_type: SqlType,
    pub get: Box<dyn Fn(&R) -> SqlValue + Send + Sync>,
}

/// Post-insert copy-back of a returned column into a row field.
pub(crate) struct KeyEntry<R> {
    pub property: String,
    pub apply: Box<dyn Fn(&mut R, &ResultRow) -> MapResult<()> + Send + Sync>,
}

/// Registration surface for one adapter's mappings.
pub struct MappingBuilder<R> {
    pub(crate) commands: Vec<(ActionKind, CommandConfig)>,
    pub(crate) params: Vec<ParamEntry>,
    pub(crate) fields: Vec<FieldEntry<R>>,
    pub(crate) inserts: Vec<InsertEntry<R>>,
    pub(crate) keys: Vec<KeyEntry<R>>,
}

impl<R> std::fmt::Debug for MappingBuilder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappingBuilder")
            .field("commands", &self.commands.len())
            .field("params", &self.params.len())
            .field("fields", &self.fields.len())
            .field("inserts", &self.inserts.len())
            .field("keys", &self.keys.len())
            .finish()
    }
}

impl<R> MappingBuilder<R> {
    pub(crate) fn new() -> Self {
        Self {
            commands: Vec::new(),
            params: Vec::new(),
            fields: Vec::new(),
            inserts: Vec::new(),
            keys: Vec::new(),
        }
    }

    /// Register the command for one action. At most one config per action.
    pub fn command(&mut self, action: ActionKind, config: CommandConfig) -> MapResult<&mut Self> {
        if config.text.trim().is_empty() {
            return Err(MapError::config(format!(
                "{} command text must not be empty",
                action
            )));
        }
        if self.commands.iter().any(|(a, _)| *a == action) {
            return Err(MapError::config(format!(
                "{} command is already configured",
                action
            )));
        }
        self.commands.push((action, config));
        Ok(self)
    }

    /// Register inline SQL for the select action.
    pub fn select_text(&mut self, text: impl Into<String>) -> MapResult<&mut Self> {
        self.command(ActionKind::Select, CommandConfig::text(text))
    }

    /// Register inline SQL for the insert action.
    pub fn insert_text(&mut self, text: impl Into<String>) -> MapResult<&mut Self> {
        self.command(ActionKind::Insert, CommandConfig::text(text))
    }

    /// Register inline SQL for the update action.
    pub fn update_text(&mut self, text: impl Into<String>) -> MapResult<&mut Self> {
        self.command(ActionKind::Update, CommandConfig::text(text))
    }

    /// Register inline SQL for the delete action.
    pub fn delete_text(&mut self, text: impl Into<String>) -> MapResult<&mut Self> {
        self.command(ActionKind::Delete, CommandConfig::text(text))
    }

    /// Map a result column onto a row field. Missing columns and SQL NULL
    /// assign the field type's default.
    pub fn select_field<T>(
        &mut self,
        property: impl Into<String>,
        column: impl Into<String>,
        setter: impl Fn(&mut R, T) + Send + Sync + 'static,
    ) -> MapResult<&mut Self>
    where
        T: FromSql + Default,
    {
        self.select_field_with(property, column, |v: T| v, setter)
    }

    /// Map a result column onto a row field through a converter applied after
    /// decoding.
    pub fn select_field_with<T, V>(
        &mut self,
        property: impl Into<String>,
        column: impl Into<String>,
        convert: impl Fn(T) -> V + Send + Sync + 'static,
        setter: impl Fn(&mut R, V) + Send + Sync + 'static,
    ) -> MapResult<&mut Self>
    where
        T: FromSql + Default,
    {
        let property = property.into();
        let column = column.into();
        if self.fields.iter().any(|f| f.property == property) {
            return Err(MapError::config(format!(
                "field binding for property '{}' is already registered",
                property
            )));
        }
        self.fields.push(FieldEntry {
            property,
            apply: Box::new(move |row, result| {
                let decoded = match result.get(&column) {
                    None | Some(SqlValue::Null) => T::default(),
                    Some(value) => T::from_sql(value)?,
                };
                setter(row, convert(decoded));
                Ok(())
            }),
        });
        Ok(self)
    }

    /// Bind a property to a select parameter.
    pub fn select_param(
        &mut self,
        property: impl Into<String>,
        parameter: impl Into<String>,
    ) -> MapResult<&mut Self> {
        self.param(ActionKind::Select, property, parameter, None, None)
    }

    /// Bind a property to a select parameter with an explicit declared type.
    pub fn select_param_typed(
        &mut self,
        property: impl Into<String>,
        parameter: impl Into<String>,
        sql_type: SqlType,
    ) -> MapResult<&mut Self> {
        self.param(ActionKind::Select, property, parameter, Some(sql_type), None)
    }

    /// Bind a property to a select parameter with a value converter applied
    /// before binding.
    pub fn select_param_with(
        &mut self,
        property: impl Into<String>,
        parameter: impl Into<String>,
        convert: impl Fn(SqlValue) -> SqlValue + Send + Sync + 'static,
    ) -> MapResult<&mut Self> {
        self.param(
            ActionKind::Select,
            property,
            parameter,
            None,
            Some(Arc::new(convert)),
        )
    }

    /// Bind a property to an update parameter.
    pub fn update_param(
        &mut self,
        property: impl Into<String>,
        parameter: impl Into<String>,
    ) -> MapResult<&mut Self> {
        self.param(ActionKind::Update, property, parameter, None, None)
    }

    /// Bind a property to an update parameter with an explicit declared type.
    pub fn update_param_typed(
        &mut self,
        property: impl Into<String>,
        parameter: impl Into<String>,
        sql_type: SqlType,
    ) -> MapResult<&mut Self> {
        self.param(ActionKind::Update, property, parameter, Some(sql_type), None)
    }

    /// Bind a property to an update parameter with a value converter.
    pub fn update_param_with(
        &mut self,
        property: impl Into<String>,
        parameter: impl Into<String>,
        convert: impl Fn(SqlValue) -> SqlValue + Send + Sync + 'static,
    ) -> MapResult<&mut Self> {
        self.param(
            ActionKind::Update,
            property,
            parameter,
            None,
            Some(Arc::new(convert)),
        )
    }

    /// Bind a property to a delete parameter.
    pub fn delete_param(
        &mut self,
        property: impl Into<String>,
        parameter: impl Into<String>,
    ) -> MapResult<&mut Self> {
        self.param(ActionKind::Delete, property, parameter, None, None)
    }

    /// Bind a property to a delete parameter with an explicit declared type.
    pub fn delete_param_typed(
        &mut self,
        property: impl Into<String>,
        parameter: impl Into<String>,
        sql_type: SqlType,
    ) -> MapResult<&mut Self> {
        self.param(ActionKind::Delete, property, parameter, Some(sql_type), None)
    }

    /// Bind a property to a delete parameter with a value converter.
    pub fn delete_param_with(
        &mut self,
        property: impl Into<String>,
        parameter: impl Into<String>,
        convert: impl Fn(SqlValue) -> SqlValue + Send + Sync + 'static,
    ) -> MapResult<&mut Self> {
        self.param(
            ActionKind::Delete,
            property,
            parameter,
            None,
            Some(Arc::new(convert)),
        )
    }

    /// Bind a row field getter to an insert parameter. The declared type is
    /// taken from the getter's return type.
    pub fn insert_param<T>(
        &mut self,
        property: impl Into<String>,
        parameter: impl Into<String>,
        getter: impl Fn(&R) -> T + Send + Sync + 'static,
    ) -> MapResult<&mut Self>
    where
        T: ToSql,
    {
        let property = property.into();
        if self.inserts.iter().any(|e| e.property == property) {
            return Err(MapError::config(format!(
                "insert binding for property '{}' is already registered",
                property
            )));
        }
        self.inserts.push(InsertEntry {
            property,
            parameter: parameter.into(),
            sql_type: T::SQL_TYPE,
            get: Box::new(move |row| getter(row).to_sql()),
        });
        Ok(self)
    }

    /// Register post-insert key retrieval: after the insert runs as a
    /// row-returning command, `column` of the first returned row is written
    /// back into the row via `setter`.
    pub fn insert_key_field<T>(
        &mut self,
        property: impl Into<String>,
        column: impl Into<String>,
        setter: impl Fn(&mut R, T) + Send + Sync + 'static,
    ) -> MapResult<&mut Self>
    where
        T: FromSql + Default,
    {
        let property = property.into();
        let column = column.into();
        if self.keys.iter().any(|k| k.property == property) {
            return Err(MapError::config(format!(
                "key binding for property '{}' is already registered",
                property
            )));
        }
        self.keys.push(KeyEntry {
            property,
            apply: Box::new(move |row, result| {
                let decoded = match result.get(&column) {
                    None | Some(SqlValue::Null) => T::default(),
                    Some(value) => T::from_sql(value)?,
                };
                setter(row, decoded);
                Ok(())
            }),
        });
        Ok(self)
    }

    fn param(
        &mut self,
        action: ActionKind,
        property: impl Into<String>,
        parameter: impl Into<String>,
        sql_type: Option<SqlType>,
        convert: Option<ValueConvert>,
    ) -> MapResult<&mut Self> {
        let property = property.into();
        if self
            .params
            .iter()
            .any(|e| e.action == action && e.property == property)
        {
            return Err(MapError::config(format!(
                "{} parameter binding for property '{}' is already registered",
                action, property
            )));
        }
        self.params.push(ParamEntry {
            property,
            action,
            parameter: parameter.into(),
            sql_type,
            convert,
        });
        Ok(self)
    }

    pub(crate) fn finish(self) -> Mappings<R> {
        Mappings {
            commands: self.commands,
            params: self.params,
            fields: self.fields,
            inserts: self.inserts,
            keys: self.keys,
        }
    }
}

/// Immutable mapping tables produced by a finished builder.
pub(crate) struct Mappings<R> {
    pub commands: Vec<(ActionKind, CommandConfig)>,
    pub params: Vec<ParamEntry>,
    pub fields: Vec<FieldEntry<R>>,
    pub inserts: Vec<InsertEntry<R>>,
    pub keys: Vec<KeyEntry<R>>,
}

impl<R> Mappings<R> {
    /// Look up the command for an action; not having one configured is a
    /// configuration error surfaced on first use.
    pub fn command(&self, action: ActionKind) -> MapResult<&CommandConfig> {
        self.commands
            .iter()
            .find(|(a, _)| *a == action)
            .map(|(_, c)| c)
            .ok_or_else(|| MapError::config(format!("no {} command configured", action)))
    }

    /// Parameter entries for one action, in registration order.
    pub fn params_for(&self, action: ActionKind) -> impl Iterator<Item = &ParamEntry> {
        self.params.iter().filter(move |e| e.action == action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct TestRow {
        id: i64,
        name: String,
    }

    #[test]
    fn test_duplicate_command_config_fails() {
        let mut b = MappingBuilder::<TestRow>::new();
        b.select_text("SELECT 1").unwrap();
        let err = b.select_text("SELECT 2").unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("Select"));
    }

    #[test]
    fn test_empty_command_text_fails() {
        let mut b = MappingBuilder::<TestRow>::new();
        let err = b.select_text("   ").unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_duplicate_field_binding_names_property() {
        let mut b = MappingBuilder::<TestRow>::new();
        b.select_field("Id", "Id", |r: &mut TestRow, v: i64| r.id = v)
            .unwrap();
        let err = b
            .select_field("Id", "OtherColumn", |r: &mut TestRow, v: i64| r.id = v)
            .unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("Id"));
    }

    #[test]
    fn test_duplicate_param_binding_per_action_fails() {
        let mut b = MappingBuilder::<TestRow>::new();
        b.select_param("Id", "@Id").unwrap();
        let err = b.select_param("Id", "@Other").unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("Id"));
        // Same property under a different action is fine
        b.delete_param("Id", "@Id").unwrap();
    }

    #[test]
    fn test_duplicate_insert_binding_fails() {
        let mut b = MappingBuilder::<TestRow>::new();
        b.insert_param("Name", "@Name", |r: &TestRow| r.name.clone())
            .unwrap();
        let err = b
            .insert_param("Name", "@Name2", |r: &TestRow| r.name.clone())
            .unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("Name"));
    }

    #[test]
    fn test_duplicate_key_binding_fails() {
        let mut b = MappingBuilder::<TestRow>::new();
        b.insert_key_field("Id", "Id", |r: &mut TestRow, v: i64| r.id = v)
            .unwrap();
        let err = b
            .insert_key_field("Id", "Id", |r: &mut TestRow, v: i64| r.id = v)
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_missing_command_lookup_fails() {
        let b = MappingBuilder::<TestRow>::new();
        let m = b.finish();
        let err = m.command(ActionKind::Update).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("Update"));
    }

    #[test]
    fn test_field_apply_defaults_on_missing_and_null() {
        let mut b = MappingBuilder::<TestRow>::new();
        b.select_field("Id", "Id", |r: &mut TestRow, v: i64| r.id = v)
            .unwrap();
        b.select_field("Name", "Name", |r: &mut TestRow, v: String| r.name = v)
            .unwrap();
        let m = b.finish();

        let result = ResultRow::from_pairs(vec![("Name".to_string(), SqlValue::Null)]);
        let mut row = TestRow {
            id: 99,
            name: "old".to_string(),
        };
        for field in &m.fields {
            (field.apply)(&mut row, &result).unwrap();
        }
        // "Id" column absent, "Name" NULL: both get defaults
        assert_eq!(row.id, 0);
        assert_eq!(row.name, "");
    }

    #[test]
    fn test_field_apply_with_converter() {
        let mut b = MappingBuilder::<TestRow>::new();
        b.select_field_with(
            "Name",
            "Name",
            |v: String| v.to_uppercase(),
            |r: &mut TestRow, v: String| r.name = v,
        )
        .unwrap();
        let m = b.finish();

        let result =
            ResultRow::from_pairs(vec![("Name".to_string(), SqlValue::Text("abc".into()))]);
        let mut row = TestRow::default();
        (m.fields[0].apply)(&mut row, &result).unwrap();
        assert_eq!(row.name, "ABC");
    }

    #[test]
    fn test_insert_entry_captures_static_type() {
        let mut b = MappingBuilder::<TestRow>::new();
        b.insert_param("Id", "@Id", |r: &TestRow| r.id).unwrap();
        let m = b.finish();
        assert_eq!(m.inserts[0].sql_type, SqlType::Int);
        let row = TestRow {
            id: 7,
            name: String::new(),
        };
        assert_eq!((m.inserts[0].get)(&row), SqlValue::Int(7));
    }

    #[test]
    fn test_params_for_preserves_registration_order() {
        let mut b = MappingBuilder::<TestRow>::new();
        b.select_param("B", "@B").unwrap();
        b.select_param("A", "@A").unwrap();
        b.update_param("C", "@C").unwrap();
        let m = b.finish();
        let names: Vec<&str> = m
            .params_for(ActionKind::Select)
            .map(|e| e.property.as_str())
            .collect();
        assert_eq!(names, vec!["B", "A"]);
    }
}
