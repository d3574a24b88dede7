//! Unified SQL value type and conversion traits.
//!
//! `SqlValue` is the crate's single wire-value representation; every bound
//! parameter and every decoded result column passes through it. Rust-side
//! types opt in via `ToSql` (parameter direction, with a compile-time
//! `SQL_TYPE` so the adapter can infer the database type of a binding) and
//! `FromSql` (result direction). Enum-typed columns are handled by
//! implementing `ToSql`/`FromSql` on the enum in terms of its underlying
//! integral representation.

use crate::error::{MapError, MapResult};
use serde::{Deserialize, Serialize};

/// Logical database type of a bound value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlType {
    Bool,
    Int,
    Float,
    Text,
    Bytes,
}

/// A value travelling to or from the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    Text(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl SqlValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Logical type of this value; `None` for NULL.
    pub fn sql_type(&self) -> Option<SqlType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(SqlType::Bool),
            Self::Int(_) => Some(SqlType::Int),
            Self::Float(_) => Some(SqlType::Float),
            Self::Text(_) => Some(SqlType::Text),
            Self::Bytes(_) => Some(SqlType::Bytes),
        }
    }

    /// Get the type name of this value for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Coerce this value to an explicitly declared binding type.
    ///
    /// NULL passes through untouched. Widening and stringifying conversions
    /// are supported; anything else is a configuration error, since the
    /// declared type came from a registration call.
    pub fn coerce(self, target: SqlType) -> MapResult<SqlValue> {
        if self.is_null() || self.sql_type() == Some(target) {
            return Ok(self);
        }
        match (self, target) {
            (SqlValue::Int(v), SqlType::Float) => Ok(SqlValue::Float(v as f64)),
            (SqlValue::Int(v), SqlType::Text) => Ok(SqlValue::Text(v.to_string())),
            (SqlValue::Int(v), SqlType::Bool) => Ok(SqlValue::Bool(v != 0)),
            (SqlValue::Bool(v), SqlType::Int) => Ok(SqlValue::Int(v as i64)),
            (SqlValue::Float(v), SqlType::Text) => Ok(SqlValue::Text(v.to_string())),
            (SqlValue::Text(v), SqlType::Bytes) => Ok(SqlValue::Bytes(v.into_bytes())),
            (value, target) => Err(MapError::config(format!(
                "cannot coerce {} value to declared type {:?}",
                value.type_name(),
                target
            ))),
        }
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Conversion into a bound SQL parameter value.
///
/// `SQL_TYPE` is the statically known database type of the implementor,
/// replacing runtime type inspection: an adapter can validate a binding's
/// declared type against the value type at compile time rather than on first
/// execution.
pub trait ToSql {
    const SQL_TYPE: SqlType;

    fn to_sql(self) -> SqlValue;
}

macro_rules! impl_to_sql_int {
    ($($t:ty),+) => {
        $(
            impl ToSql for $t {
                const SQL_TYPE: SqlType = SqlType::Int;

                fn to_sql(self) -> SqlValue {
                    SqlValue::Int(self as i64)
                }
            }
        )+
    };
}

impl_to_sql_int!(i8, i16, i32, i64, u8, u16, u32);

impl ToSql for bool {
    const SQL_TYPE: SqlType = SqlType::Bool;

    fn to_sql(self) -> SqlValue {
        SqlValue::Bool(self)
    }
}

impl ToSql for f32 {
    const SQL_TYPE: SqlType = SqlType::Float;

    fn to_sql(self) -> SqlValue {
        SqlValue::Float(self as f64)
    }
}

impl ToSql for f64 {
    const SQL_TYPE: SqlType = SqlType::Float;

    fn to_sql(self) -> SqlValue {
        SqlValue::Float(self)
    }
}

impl ToSql for String {
    const SQL_TYPE: SqlType = SqlType::Text;

    fn to_sql(self) -> SqlValue {
        SqlValue::Text(self)
    }
}

impl ToSql for &str {
    const SQL_TYPE: SqlType = SqlType::Text;

    fn to_sql(self) -> SqlValue {
        SqlValue::Text(self.to_string())
    }
}

impl ToSql for Vec<u8> {
    const SQL_TYPE: SqlType = SqlType::Bytes;

    fn to_sql(self) -> SqlValue {
        SqlValue::Bytes(self)
    }
}

impl ToSql for &[u8] {
    const SQL_TYPE: SqlType = SqlType::Bytes;

    fn to_sql(self) -> SqlValue {
        SqlValue::Bytes(self.to_vec())
    }
}

impl<T: ToSql> ToSql for Option<T> {
    const SQL_TYPE: SqlType = T::SQL_TYPE;

    fn to_sql(self) -> SqlValue {
        match self {
            Some(v) => v.to_sql(),
            None => SqlValue::Null,
        }
    }
}

impl ToSql for SqlValue {
    // Passthrough; the runtime value carries its own type.
    const SQL_TYPE: SqlType = SqlType::Text;

    fn to_sql(self) -> SqlValue {
        self
    }
}

/// Conversion out of a decoded result column.
///
/// Implementations are lenient across the representations the supported
/// backends actually produce: SQLite has no boolean affinity and returns
/// integers, MySQL returns TINYINT(1) for bool, integers may arrive narrower
/// than i64.
pub trait FromSql: Sized {
    fn from_sql(value: &SqlValue) -> MapResult<Self>;
}

fn type_mismatch<T>(expected: &str, got: &SqlValue) -> MapResult<T> {
    Err(MapError::execution(
        format!("expected {} column value, got {}", expected, got.type_name()),
        None,
    ))
}

macro_rules! impl_from_sql_int {
    ($($t:ty),+) => {
        $(
            impl FromSql for $t {
                fn from_sql(value: &SqlValue) -> MapResult<Self> {
                    match value {
                        SqlValue::Int(v) => <$t>::try_from(*v).map_err(|_| {
                            MapError::execution(
                                format!("integer value {} out of range for target type", v),
                                None,
                            )
                        }),
                        SqlValue::Bool(v) => Ok(*v as $t),
                        other => type_mismatch("integer", other),
                    }
                }
            }
        )+
    };
}

impl_from_sql_int!(i8, i16, i32, i64, u8, u16, u32);

impl FromSql for bool {
    fn from_sql(value: &SqlValue) -> MapResult<Self> {
        match value {
            SqlValue::Bool(v) => Ok(*v),
            SqlValue::Int(v) => Ok(*v != 0),
            other => type_mismatch("boolean", other),
        }
    }
}

impl FromSql for f64 {
    fn from_sql(value: &SqlValue) -> MapResult<Self> {
        match value {
            SqlValue::Float(v) => Ok(*v),
            SqlValue::Int(v) => Ok(*v as f64),
            other => type_mismatch("float", other),
        }
    }
}

impl FromSql for f32 {
    fn from_sql(value: &SqlValue) -> MapResult<Self> {
        f64::from_sql(value).map(|v| v as f32)
    }
}

impl FromSql for String {
    fn from_sql(value: &SqlValue) -> MapResult<Self> {
        match value {
            SqlValue::Text(v) => Ok(v.clone()),
            SqlValue::Int(v) => Ok(v.to_string()),
            SqlValue::Float(v) => Ok(v.to_string()),
            other => type_mismatch("text", other),
        }
    }
}

impl FromSql for Vec<u8> {
    fn from_sql(value: &SqlValue) -> MapResult<Self> {
        match value {
            SqlValue::Bytes(v) => Ok(v.clone()),
            SqlValue::Text(v) => Ok(v.clone().into_bytes()),
            other => type_mismatch("bytes", other),
        }
    }
}

impl<T: FromSql> FromSql for Option<T> {
    fn from_sql(value: &SqlValue) -> MapResult<Self> {
        match value {
            SqlValue::Null => Ok(None),
            other => T::from_sql(other).map(Some),
        }
    }
}

impl FromSql for SqlValue {
    fn from_sql(value: &SqlValue) -> MapResult<Self> {
        Ok(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_types() {
        assert!(SqlValue::Null.is_null());
        assert!(!SqlValue::Bool(true).is_null());
        assert_eq!(SqlValue::Int(42).type_name(), "int");
        assert_eq!(SqlValue::Int(42).sql_type(), Some(SqlType::Int));
        assert_eq!(SqlValue::Null.sql_type(), None);
    }

    #[test]
    fn test_to_sql_primitives() {
        assert_eq!(5i32.to_sql(), SqlValue::Int(5));
        assert_eq!(true.to_sql(), SqlValue::Bool(true));
        assert_eq!("abc".to_sql(), SqlValue::Text("abc".to_string()));
        assert_eq!(1.5f64.to_sql(), SqlValue::Float(1.5));
        assert_eq!(None::<i64>.to_sql(), SqlValue::Null);
        assert_eq!(Some(7u16).to_sql(), SqlValue::Int(7));
    }

    #[test]
    fn test_to_sql_static_types() {
        assert_eq!(<i32 as ToSql>::SQL_TYPE, SqlType::Int);
        assert_eq!(<Option<String> as ToSql>::SQL_TYPE, SqlType::Text);
        assert_eq!(<Vec<u8> as ToSql>::SQL_TYPE, SqlType::Bytes);
    }

    #[test]
    fn test_from_sql_lenient_integers() {
        assert_eq!(i32::from_sql(&SqlValue::Int(5)).unwrap(), 5);
        assert!(bool::from_sql(&SqlValue::Int(1)).unwrap());
        assert!(!bool::from_sql(&SqlValue::Int(0)).unwrap());
        assert!(i8::from_sql(&SqlValue::Int(300)).is_err());
    }

    #[test]
    fn test_from_sql_option_null() {
        assert_eq!(Option::<i64>::from_sql(&SqlValue::Null).unwrap(), None);
        assert_eq!(
            Option::<i64>::from_sql(&SqlValue::Int(9)).unwrap(),
            Some(9)
        );
    }

    #[test]
    fn test_from_sql_mismatch() {
        assert!(i64::from_sql(&SqlValue::Text("x".to_string())).is_err());
        assert!(Vec::<u8>::from_sql(&SqlValue::Int(1)).is_err());
    }

    #[test]
    fn test_coerce_widening() {
        assert_eq!(
            SqlValue::Int(3).coerce(SqlType::Float).unwrap(),
            SqlValue::Float(3.0)
        );
        assert_eq!(
            SqlValue::Int(3).coerce(SqlType::Text).unwrap(),
            SqlValue::Text("3".to_string())
        );
        assert_eq!(
            SqlValue::Bool(true).coerce(SqlType::Int).unwrap(),
            SqlValue::Int(1)
        );
    }

    #[test]
    fn test_coerce_null_passes_through() {
        assert_eq!(
            SqlValue::Null.coerce(SqlType::Int).unwrap(),
            SqlValue::Null
        );
    }

    #[test]
    fn test_coerce_rejects_lossy() {
        assert!(SqlValue::Float(1.5).coerce(SqlType::Int).is_err());
        assert!(
            SqlValue::Bytes(vec![1, 2]).coerce(SqlType::Int).is_err()
        );
    }

    #[test]
    fn test_bytes_serde_base64() {
        let v = SqlValue::Bytes(b"hello".to_vec());
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"aGVsbG8=\"");
    }
}
