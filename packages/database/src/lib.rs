#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Row-level persistence for small web applications.
//!
//! The crate is built from four pieces:
//!
//! * [`Database`] - a lazily connected handle that executes parameterized statements
//! * [`Record`] - one mutable row with new/existing state and dirty-field tracking
//! * [`Table`] - the schema of one SQL table, optionally linked to a per-locale
//!   translation table, that knows how to save records
//! * [`Query`] - a SELECT/COUNT builder driven by a map of named options
//!
//! Drivers plug in through the [`Connector`] and [`Connection`] traits. `SQLite` (via
//! `rusqlite`) and `MySQL` (via `mysql`) are provided behind features, together with an
//! in-memory [`simulator`] that records every executed statement.

pub mod database;
pub mod driver;
#[cfg(feature = "mysql")]
pub mod mysql;
pub mod query;
pub mod record;
#[cfg(feature = "sqlite-rusqlite")]
pub mod rusqlite;
#[cfg(feature = "simulator")]
pub mod simulator;
pub mod table;

use std::{collections::BTreeMap, fmt};

use serde::Serialize;
use thiserror::Error;

pub use database::Database;
pub use driver::{Connection, Connector, Dialect};
pub use query::{
    ConditionContributor, Fragment, JoinContributor, LocaleProvider, Query, QueryOptions,
    SelectField, SelectKind, Statement,
};
pub use record::Record;
pub use table::{Field, PrimaryKey, PrimaryKeyValue, Table, TableBuilder};

/// Bound statement parameters keyed by placeholder name, including the leading colon
/// (`":pk_id"`).
pub type Params = BTreeMap<String, DatabaseValue>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int64(i64),
    UInt64(u64),
    Real64(f64),
    String(String),
}

impl DatabaseValue {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(value) => Some(*value),
            Self::UInt64(value) => i64::try_from(*value).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt64(value) => Some(*value),
            Self::Int64(value) => u64::try_from(*value).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real64(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Converts a value read back from a driver into the representation of the given
    /// kind. Values that cannot be represented are returned unchanged.
    ///
    /// `SQLite` has no boolean storage class and `MySQL` reports generated ids as
    /// unsigned, so hydrated rows go through here to compare equal with what was saved.
    #[must_use]
    pub fn coerce(self, kind: ValueKind) -> Self {
        match (kind, self) {
            (_, Self::Null) => Self::Null,
            (ValueKind::Bool, Self::Int64(value)) => Self::Bool(value != 0),
            (ValueKind::Bool, Self::UInt64(value)) => Self::Bool(value != 0),
            (ValueKind::Bool, Self::String(value)) => match value.as_str() {
                "1" | "true" => Self::Bool(true),
                "0" | "false" => Self::Bool(false),
                _ => Self::String(value),
            },
            (ValueKind::Integer, Self::UInt64(value)) => {
                i64::try_from(value).map_or(Self::UInt64(value), Self::Int64)
            }
            (ValueKind::Integer, Self::Bool(value)) => Self::Int64(i64::from(value)),
            (ValueKind::Integer, Self::String(value)) => {
                value.trim().parse().map_or(Self::String(value), Self::Int64)
            }
            #[allow(clippy::cast_precision_loss)]
            (ValueKind::Real, Self::Int64(value)) => Self::Real64(value as f64),
            #[allow(clippy::cast_precision_loss)]
            (ValueKind::Real, Self::UInt64(value)) => Self::Real64(value as f64),
            (ValueKind::Real, Self::String(value)) => {
                value.trim().parse().map_or(Self::String(value), Self::Real64)
            }
            (ValueKind::Text, Self::Int64(value)) => Self::String(value.to_string()),
            (ValueKind::Text, Self::UInt64(value)) => Self::String(value.to_string()),
            (ValueKind::Text, Self::Real64(value)) => Self::String(value.to_string()),
            (_, value) => value,
        }
    }

    /// Converts a scalar JSON value. Arrays and objects have no column representation.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        Some(match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(value) => Self::Bool(*value),
            serde_json::Value::Number(number) => {
                if let Some(value) = number.as_i64() {
                    Self::Int64(value)
                } else if let Some(value) = number.as_u64() {
                    Self::UInt64(value)
                } else {
                    Self::Real64(number.as_f64()?)
                }
            }
            serde_json::Value::String(value) => Self::String(value.clone()),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => return None,
        })
    }
}

impl fmt::Display for DatabaseValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int64(value) => write!(f, "{value}"),
            Self::UInt64(value) => write!(f, "{value}"),
            Self::Real64(value) => write!(f, "{value}"),
            Self::String(value) => write!(f, "'{value}'"),
        }
    }
}

impl<T: Into<Self>> From<Option<T>> for DatabaseValue {
    fn from(val: Option<T>) -> Self {
        val.map_or(Self::Null, std::convert::Into::into)
    }
}

impl From<bool> for DatabaseValue {
    fn from(val: bool) -> Self {
        Self::Bool(val)
    }
}

impl From<&str> for DatabaseValue {
    fn from(val: &str) -> Self {
        Self::String(val.to_string())
    }
}

impl From<&String> for DatabaseValue {
    fn from(val: &String) -> Self {
        Self::String(val.clone())
    }
}

impl From<String> for DatabaseValue {
    fn from(val: String) -> Self {
        Self::String(val)
    }
}

impl From<f32> for DatabaseValue {
    fn from(val: f32) -> Self {
        Self::Real64(f64::from(val))
    }
}

impl From<f64> for DatabaseValue {
    fn from(val: f64) -> Self {
        Self::Real64(val)
    }
}

impl From<i8> for DatabaseValue {
    fn from(val: i8) -> Self {
        Self::Int64(i64::from(val))
    }
}

impl From<i16> for DatabaseValue {
    fn from(val: i16) -> Self {
        Self::Int64(i64::from(val))
    }
}

impl From<i32> for DatabaseValue {
    fn from(val: i32) -> Self {
        Self::Int64(i64::from(val))
    }
}

impl From<i64> for DatabaseValue {
    fn from(val: i64) -> Self {
        Self::Int64(val)
    }
}

impl From<u8> for DatabaseValue {
    fn from(val: u8) -> Self {
        Self::UInt64(u64::from(val))
    }
}

impl From<u16> for DatabaseValue {
    fn from(val: u16) -> Self {
        Self::UInt64(u64::from(val))
    }
}

impl From<u32> for DatabaseValue {
    fn from(val: u32) -> Self {
        Self::UInt64(u64::from(val))
    }
}

impl From<u64> for DatabaseValue {
    fn from(val: u64) -> Self {
        Self::UInt64(val)
    }
}

/// The declared type of a table field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Integer,
    Real,
    Text,
}

impl ValueKind {
    /// The kind a value naturally belongs to, `None` for `NULL`.
    #[must_use]
    pub const fn of(value: &DatabaseValue) -> Option<Self> {
        match value {
            DatabaseValue::Null => None,
            DatabaseValue::Bool(_) => Some(Self::Bool),
            DatabaseValue::Int64(_) | DatabaseValue::UInt64(_) => Some(Self::Integer),
            DatabaseValue::Real64(_) => Some(Self::Real),
            DatabaseValue::String(_) => Some(Self::Text),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub columns: Vec<(String, DatabaseValue)>,
}

impl Row {
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<DatabaseValue> {
        self.columns
            .iter()
            .find(|c| c.0 == column_name)
            .map(|c| c.1.clone())
    }

    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<&DatabaseValue> {
        self.columns.get(index).map(|c| &c.1)
    }
}

/// Builds a placeholder name (`":pk_id"`) from a prefix and a column name. Characters
/// that are not valid in a named placeholder are replaced by `_`.
#[must_use]
pub fn parameter_name(prefix: &str, name: &str) -> String {
    let mut result = String::with_capacity(prefix.len() + name.len() + 1);
    result.push(':');
    result.push_str(prefix);
    result.extend(
        name.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }),
    );
    result
}

/// Adds `source` to `target`, refusing to replace a placeholder that is already bound.
///
/// # Errors
///
/// * [`DatabaseError::DuplicateParameter`] on the first placeholder bound twice
pub(crate) fn merge_params(
    target: &mut Params,
    source: impl IntoIterator<Item = (String, DatabaseValue)>,
) -> Result<(), DatabaseError> {
    for (name, value) in source {
        if target.contains_key(&name) {
            return Err(DatabaseError::DuplicateParameter { name });
        }
        target.insert(name, value);
    }

    Ok(())
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[cfg(feature = "sqlite-rusqlite")]
    #[error(transparent)]
    Rusqlite(#[from] ::rusqlite::Error),
    #[cfg(feature = "mysql")]
    #[error(transparent)]
    Mysql(#[from] ::mysql::Error),
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database '{name}': {source}")]
    Connection { name: String, source: DriverError },
    #[error("Failed to execute query `{sql}`: {source}")]
    QueryExecution {
        sql: String,
        params: Params,
        source: DriverError,
    },
    #[error("Unknown field '{field}' on {}", .table.as_deref().unwrap_or("record"))]
    UnknownField {
        table: Option<String>,
        field: String,
    },
    #[error("Primary key of table '{table}' is {expected} but the value is {actual}")]
    PrimaryKeyShapeMismatch {
        table: String,
        expected: String,
        actual: String,
    },
    #[error("Table '{table}' has a composite primary key and can't be joined to a translation table")]
    UnsupportedCompositeKeyJoin { table: String },
    #[error("Translated field '{field}' collides with a field of table '{table}'")]
    TranslatedFieldCollision { table: String, field: String },
    #[error("Invalid definition of table '{table}': {reason}")]
    InvalidTableDefinition { table: String, reason: String },
    #[error("Invalid value for option '{option}': {reason}")]
    InvalidOption { option: String, reason: String },
    #[error("Placeholder '{name}' is bound twice in one statement")]
    DuplicateParameter { name: String },
}

impl DatabaseError {
    /// The statement text of a failed execution, if this error came from one.
    #[must_use]
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::QueryExecution { sql, .. } => Some(sql),
            _ => None,
        }
    }
}
