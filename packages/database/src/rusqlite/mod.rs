use std::{path::PathBuf, time::Duration};

use rusqlite::{
    ToSql,
    types::{ToSqlOutput, Value, ValueRef},
};

use crate::{
    DatabaseValue, DriverError, Params, Row,
    driver::{Connection, Connector, Dialect},
};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    Memory,
    File(PathBuf),
}

/// Opens `SQLite` databases through `rusqlite`.
#[derive(Debug, Clone)]
pub struct RusqliteConnector {
    location: Location,
    busy_timeout: Duration,
}

impl RusqliteConnector {
    /// A private in-memory database. It lives as long as the connection does.
    #[must_use]
    pub const fn memory() -> Self {
        Self {
            location: Location::Memory,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::File(path.into()),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }
}

impl Connector for RusqliteConnector {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn connect(&self) -> Result<Box<dyn Connection>, DriverError> {
        let connection = match &self.location {
            Location::Memory => rusqlite::Connection::open_in_memory()?,
            Location::File(path) => {
                log::debug!("Opening sqlite database at {}", path.display());
                rusqlite::Connection::open(path)?
            }
        };
        connection.busy_timeout(self.busy_timeout)?;

        Ok(Box::new(RusqliteConnection::new(connection)))
    }
}

#[derive(Debug)]
pub struct RusqliteConnection {
    connection: rusqlite::Connection,
}

impl RusqliteConnection {
    #[must_use]
    pub const fn new(connection: rusqlite::Connection) -> Self {
        Self { connection }
    }

    /// Runs semicolon-separated statements without parameters.
    ///
    /// # Errors
    ///
    /// * If any statement fails
    pub fn execute_batch(&self, sql: &str) -> Result<(), DriverError> {
        Ok(self.connection.execute_batch(sql)?)
    }
}

fn named_params(params: &Params) -> Vec<(&str, &dyn ToSql)> {
    params
        .iter()
        .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
        .collect()
}

impl Connection for RusqliteConnection {
    fn query(&mut self, sql: &str, params: &Params) -> Result<Vec<Row>, DriverError> {
        let mut statement = self.connection.prepare(sql)?;
        let column_names = statement
            .column_names()
            .into_iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();

        let named = named_params(params);
        let mut rows = statement.query(named.as_slice())?;
        let mut results = vec![];

        while let Some(row) = rows.next()? {
            results.push(from_row(&column_names, row)?);
        }

        log::trace!("query: {} row(s)", results.len());

        Ok(results)
    }

    fn execute(&mut self, sql: &str, params: &Params) -> Result<u64, DriverError> {
        let mut statement = self.connection.prepare(sql)?;
        let named = named_params(params);

        Ok(statement.execute(named.as_slice())? as u64)
    }

    fn last_insert_id(&mut self) -> Result<DatabaseValue, DriverError> {
        Ok(DatabaseValue::Int64(self.connection.last_insert_rowid()))
    }
}

fn from_row(column_names: &[String], row: &rusqlite::Row<'_>) -> Result<Row, rusqlite::Error> {
    let mut columns = Vec::with_capacity(column_names.len());

    for (i, column) in column_names.iter().enumerate() {
        columns.push((column.clone(), row.get::<_, Value>(i)?.into()));
    }

    Ok(Row { columns })
}

impl From<Value> for DatabaseValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Integer(value) => Self::Int64(value),
            Value::Real(value) => Self::Real64(value),
            Value::Text(value) => Self::String(value),
            Value::Blob(value) => Self::String(String::from_utf8_lossy(&value).into_owned()),
        }
    }
}

impl ToSql for DatabaseValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Bool(value) => ToSqlOutput::Owned(Value::Integer(i64::from(*value))),
            Self::Int64(value) => ToSqlOutput::Owned(Value::Integer(*value)),
            Self::UInt64(value) => ToSqlOutput::Owned(Value::Integer(
                i64::try_from(*value)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
            )),
            Self::Real64(value) => ToSqlOutput::Owned(Value::Real(*value)),
            Self::String(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn connection() -> Box<dyn Connection> {
        let mut connection = RusqliteConnector::memory().connect().unwrap();
        connection
            .execute(
                "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, active INTEGER, score REAL)",
                &Params::new(),
            )
            .unwrap();
        connection
    }

    fn params<const N: usize>(values: [(&str, DatabaseValue); N]) -> Params {
        values
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test_log::test]
    fn binds_named_parameters() {
        let mut connection = connection();

        let affected = connection
            .execute(
                "INSERT INTO users (name, active, score) VALUES (:name, :active, :score)",
                &params([
                    (":name", "ann".into()),
                    (":active", true.into()),
                    (":score", 1.5.into()),
                ]),
            )
            .unwrap();
        assert_eq!(affected, 1);
        assert_eq!(connection.last_insert_id().unwrap(), DatabaseValue::Int64(1));

        let rows = connection
            .query(
                "SELECT name, active, score FROM users WHERE name = :name",
                &params([(":name", "ann".into())]),
            )
            .unwrap();

        assert_eq!(
            rows,
            vec![Row {
                columns: vec![
                    ("name".to_string(), DatabaseValue::String("ann".into())),
                    ("active".to_string(), DatabaseValue::Int64(1)),
                    ("score".to_string(), DatabaseValue::Real64(1.5)),
                ],
            }]
        );
    }

    #[test_log::test]
    fn keeps_duplicate_column_names_by_position() {
        let mut connection = connection();

        let rows = connection
            .query("SELECT 1 AS a, 2 AS a", &Params::new())
            .unwrap();

        assert_eq!(rows[0].get_index(1), Some(&DatabaseValue::Int64(2)));
    }

    #[test_log::test]
    fn transactions_roll_back() {
        let mut connection = connection();

        connection.begin_transaction().unwrap();
        connection
            .execute(
                "INSERT INTO users (name) VALUES (:name)",
                &params([(":name", "bob".into())]),
            )
            .unwrap();
        connection.rollback().unwrap();

        let rows = connection
            .query("SELECT COUNT(1) AS total FROM users", &Params::new())
            .unwrap();
        assert_eq!(rows[0].get("total"), Some(DatabaseValue::Int64(0)));
    }

    #[test_log::test]
    fn oversized_unsigned_values_fail_to_bind() {
        let mut connection = connection();

        let result = connection.execute(
            "INSERT INTO users (score) VALUES (:score)",
            &params([(":score", DatabaseValue::UInt64(u64::MAX))]),
        );

        assert!(result.is_err());
    }
}
