//! Named-parameter expansion and per-backend value binding.
//!
//! Command text uses `@name` placeholders regardless of backend. Before
//! execution the text is rewritten to the driver's positional form: `?` for
//! MySQL and SQLite, `$n` for PostgreSQL (with one ordinal per distinct name).
//! Placeholders inside quoted literals and MySQL `@@` system variables are
//! left alone.

use crate::error::{MapError, MapResult};
use crate::pool::DatabaseType;
use crate::value::SqlValue;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::{MySql, Postgres, Sqlite};

/// Rewrite `@name` placeholders to the backend's positional placeholders and
/// return the values in placeholder order.
///
/// Parameter names in `values` may carry the `@` prefix or not; matching is
/// done on the bare name. A placeholder in the text with no matching value is
/// a configuration error, since values for every registered binding are
/// resolved (to NULL if unset) before this point.
pub fn expand_named(
    sql: &str,
    values: &[(String, SqlValue)],
    db_type: DatabaseType,
) -> MapResult<(String, Vec<SqlValue>)> {
    let lookup = |name: &str| {
        values
            .iter()
            .find(|(n, _)| n.trim_start_matches('@') == name)
            .map(|(_, v)| v.clone())
    };

    let mut out = String::with_capacity(sql.len());
    let mut ordered: Vec<SqlValue> = Vec::new();
    // PostgreSQL reuses one ordinal per distinct name
    let mut pg_ordinals: Vec<(String, usize)> = Vec::new();

    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                out.push(c);
            }
            '@' => {
                if chars.peek() == Some(&'@') {
                    // MySQL system variable, not a parameter
                    out.push('@');
                    out.push(chars.next().unwrap_or('@'));
                    continue;
                }
                let mut name = String::new();
                while let Some(&nc) = chars.peek() {
                    if nc.is_ascii_alphanumeric() || nc == '_' {
                        name.push(nc);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    out.push('@');
                    continue;
                }
                let value = lookup(&name).ok_or_else(|| {
                    MapError::config(format!(
                        "command text references parameter '@{}' with no registered binding",
                        name
                    ))
                })?;
                match db_type {
                    DatabaseType::Postgres => {
                        let ordinal = match pg_ordinals.iter().find(|(n, _)| n == &name) {
                            Some((_, i)) => *i,
                            None => {
                                ordered.push(value);
                                let i = ordered.len();
                                pg_ordinals.push((name.clone(), i));
                                i
                            }
                        };
                        out.push_str(&format!("${}", ordinal));
                    }
                    DatabaseType::MySql | DatabaseType::SQLite => {
                        ordered.push(value);
                        out.push('?');
                    }
                }
            }
            _ => out.push(c),
        }
    }

    Ok((out, ordered))
}

/// Bind a value to a MySQL query.
pub(crate) fn bind_mysql_value<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    value: &'q SqlValue,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
    }
}

/// Bind a value to a PostgreSQL query.
pub(crate) fn bind_postgres_value<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    value: &'q SqlValue,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
    }
}

/// Bind a value to a SQLite query.
pub(crate) fn bind_sqlite_value<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q SqlValue,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, SqlValue)]) -> Vec<(String, SqlValue)> {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_expand_question_style() {
        let vals = values(&[("Id", SqlValue::Int(5))]);
        let (sql, ordered) = expand_named(
            "SELECT Id, Name FROM T WHERE Id = @Id",
            &vals,
            DatabaseType::SQLite,
        )
        .unwrap();
        assert_eq!(sql, "SELECT Id, Name FROM T WHERE Id = ?");
        assert_eq!(ordered, vec![SqlValue::Int(5)]);
    }

    #[test]
    fn test_expand_repeated_name_question_style() {
        let vals = values(&[("X", SqlValue::Int(1))]);
        let (sql, ordered) =
            expand_named("SELECT @X + @X", &vals, DatabaseType::MySql).unwrap();
        assert_eq!(sql, "SELECT ? + ?");
        assert_eq!(ordered.len(), 2);
    }

    #[test]
    fn test_expand_dollar_style_reuses_ordinal() {
        let vals = values(&[("A", SqlValue::Int(1)), ("B", SqlValue::Int(2))]);
        let (sql, ordered) = expand_named(
            "SELECT @A, @B, @A",
            &vals,
            DatabaseType::Postgres,
        )
        .unwrap();
        assert_eq!(sql, "SELECT $1, $2, $1");
        assert_eq!(ordered, vec![SqlValue::Int(1), SqlValue::Int(2)]);
    }

    #[test]
    fn test_expand_skips_quoted_literals() {
        let vals = values(&[("Id", SqlValue::Int(5))]);
        let (sql, ordered) = expand_named(
            "SELECT 'user@host' AS tag WHERE Id = @Id",
            &vals,
            DatabaseType::SQLite,
        )
        .unwrap();
        assert_eq!(sql, "SELECT 'user@host' AS tag WHERE Id = ?");
        assert_eq!(ordered.len(), 1);
    }

    #[test]
    fn test_expand_skips_system_variables() {
        let vals = values(&[]);
        let (sql, ordered) =
            expand_named("SELECT @@version", &vals, DatabaseType::MySql).unwrap();
        assert_eq!(sql, "SELECT @@version");
        assert!(ordered.is_empty());
    }

    #[test]
    fn test_expand_unknown_parameter_is_config_error() {
        let vals = values(&[]);
        let err = expand_named("SELECT @Missing", &vals, DatabaseType::SQLite).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("@Missing"));
    }

    #[test]
    fn test_expand_accepts_prefixed_names() {
        let vals = values(&[("@Id", SqlValue::Int(9))]);
        let (_, ordered) =
            expand_named("WHERE Id = @Id", &vals, DatabaseType::SQLite).unwrap();
        assert_eq!(ordered, vec![SqlValue::Int(9)]);
    }

    #[test]
    fn test_expand_bare_at_passes_through() {
        let vals = values(&[]);
        let (sql, _) = expand_named("SELECT '@' , @ ", &vals, DatabaseType::SQLite).unwrap();
        assert_eq!(sql, "SELECT '@' , @ ");
    }
}
