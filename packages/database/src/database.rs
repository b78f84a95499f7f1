//! The connection-owning [`Database`] handle.
//!
//! A `Database` opens its connection on the first statement and keeps it for its whole
//! life. It is `Sync`, so one instance can be shared behind an `Arc` by every
//! [`Table`](crate::Table) that needs it.
//!
//! # Transactions
//!
//! [`Database::begin_transaction`], [`Database::commit`] and [`Database::rollback`] are
//! passed straight to the driver. Nesting is not tracked: starting a transaction while
//! another one is open is the caller's problem, and the driver decides what happens.

use std::sync::{Mutex, PoisonError};

use crate::{
    DatabaseError, DatabaseValue, DriverError, Params, Record, Row, merge_params, parameter_name,
    driver::{Connection, Connector, Dialect},
};

#[derive(Debug)]
pub struct Database {
    name: String,
    dialect: Dialect,
    connector: Box<dyn Connector>,
    connection: Mutex<Option<Box<dyn Connection>>>,
}

impl Database {
    /// Creates a handle without connecting.
    #[must_use]
    pub fn new(name: impl Into<String>, connector: impl Connector + 'static) -> Self {
        let dialect = connector.dialect();

        Self {
            name: name.into(),
            dialect,
            connector: Box::new(connector),
            connection: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    #[must_use]
    pub fn escape_identifier(&self, name: &str) -> String {
        self.dialect.escape_identifier(name)
    }

    fn connect(&self) -> Result<Box<dyn Connection>, DatabaseError> {
        log::debug!("Connecting to database '{}'", self.name);

        self.connector.connect().map_err(|source| {
            log::error!("Failed to connect to database '{}': {source}", self.name);
            DatabaseError::Connection {
                name: self.name.clone(),
                source,
            }
        })
    }

    fn run<T>(
        &self,
        sql: &str,
        params: &Params,
        op: impl FnOnce(&mut dyn Connection) -> Result<T, DriverError>,
    ) -> Result<T, DatabaseError> {
        let mut guard = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let connection = match guard.take() {
            Some(connection) => guard.insert(connection),
            None => guard.insert(self.connect()?),
        };

        if log::log_enabled!(log::Level::Info) {
            log::info!("Executing query:\n{sql}{}", format_params(params));
        }

        op(connection.as_mut()).map_err(|source| {
            log::error!(
                "Query failed: {source}\n{sql}{}",
                format_params(params)
            );
            DatabaseError::QueryExecution {
                sql: sql.to_string(),
                params: params.clone(),
                source,
            }
        })
    }

    /// Runs a statement that returns rows.
    ///
    /// # Errors
    ///
    /// * If the connection can't be established
    /// * If the statement fails
    pub fn query(&self, sql: &str, params: &Params) -> Result<Vec<Row>, DatabaseError> {
        self.run(sql, params, |connection| connection.query(sql, params))
    }

    /// Runs a statement and returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// * If the connection can't be established
    /// * If the statement fails
    pub fn execute(&self, sql: &str, params: &Params) -> Result<u64, DatabaseError> {
        self.run(sql, params, |connection| connection.execute(sql, params))
    }

    /// # Errors
    ///
    /// * If the connection can't be established
    /// * If the statement fails
    pub fn fetch_row(&self, sql: &str, params: &Params) -> Result<Option<Row>, DatabaseError> {
        Ok(self.query(sql, params)?.into_iter().next())
    }

    /// # Errors
    ///
    /// * If the connection can't be established
    /// * If the statement fails
    pub fn fetch_rows(&self, sql: &str, params: &Params) -> Result<Vec<Row>, DatabaseError> {
        self.query(sql, params)
    }

    /// Fetches the first row as an existing [`Record`].
    ///
    /// # Errors
    ///
    /// * If the connection can't be established
    /// * If the statement fails
    pub fn fetch_one(&self, sql: &str, params: &Params) -> Result<Option<Record>, DatabaseError> {
        Ok(self
            .fetch_row(sql, params)?
            .map(|row| Record::new(row.columns, false)))
    }

    /// # Errors
    ///
    /// * If the connection can't be established
    /// * If the statement fails
    pub fn fetch_all(&self, sql: &str, params: &Params) -> Result<Vec<Record>, DatabaseError> {
        Ok(self
            .query(sql, params)?
            .into_iter()
            .map(|row| Record::new(row.columns, false))
            .collect())
    }

    /// Fetches one column of the first row. `None` when there is no row or the row has
    /// fewer columns.
    ///
    /// # Errors
    ///
    /// * If the connection can't be established
    /// * If the statement fails
    pub fn fetch_scalar(
        &self,
        sql: &str,
        params: &Params,
        column_index: usize,
    ) -> Result<Option<DatabaseValue>, DatabaseError> {
        Ok(self
            .fetch_row(sql, params)?
            .and_then(|row| row.columns.into_iter().nth(column_index))
            .map(|(_, value)| value))
    }

    /// Inserts one row. Every column is bound as `:column`.
    ///
    /// # Errors
    ///
    /// * If the connection can't be established
    /// * If the statement fails
    pub fn insert<K: AsRef<str>>(
        &self,
        table_name: &str,
        values: &[(K, DatabaseValue)],
    ) -> Result<u64, DatabaseError> {
        let (sql, params) = self.insert_statement(table_name, values);
        self.execute(&sql, &params)
    }

    /// Inserts one row and reads the id it generated without releasing the connection in
    /// between, so another thread's insert can't be reported instead.
    ///
    /// # Errors
    ///
    /// * If the connection can't be established
    /// * If the statement fails or the driver can't report the id
    pub fn insert_returning_id<K: AsRef<str>>(
        &self,
        table_name: &str,
        values: &[(K, DatabaseValue)],
    ) -> Result<DatabaseValue, DatabaseError> {
        let (sql, params) = self.insert_statement(table_name, values);
        self.run(&sql, &params, |connection| {
            connection.execute(&sql, &params)?;
            connection.last_insert_id()
        })
    }

    fn insert_statement<K: AsRef<str>>(
        &self,
        table_name: &str,
        values: &[(K, DatabaseValue)],
    ) -> (String, Params) {
        let mut columns = Vec::with_capacity(values.len());
        let mut placeholders = Vec::with_capacity(values.len());
        let mut params = Params::new();

        for (name, value) in values {
            let name = name.as_ref();
            let placeholder = parameter_name("", name);
            columns.push(self.escape_identifier(name));
            placeholders.push(placeholder.clone());
            params.insert(placeholder, value.clone());
        }

        let sql = if values.is_empty() && self.dialect == Dialect::Sqlite {
            format!(
                "INSERT INTO {} DEFAULT VALUES",
                self.escape_identifier(table_name)
            )
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.escape_identifier(table_name),
                columns.join(", "),
                placeholders.join(", "),
            )
        };

        (sql, params)
    }

    /// Updates rows matching `where_clause`. Values are bound as `:set_column`. An empty
    /// `values` slice issues no statement and returns `0`.
    ///
    /// # Errors
    ///
    /// * [`DatabaseError::DuplicateParameter`] if a where parameter reuses a value
    ///   placeholder
    /// * If the connection can't be established
    /// * If the statement fails
    pub fn update<K: AsRef<str>>(
        &self,
        table_name: &str,
        values: &[(K, DatabaseValue)],
        where_clause: Option<&str>,
        where_params: &Params,
    ) -> Result<u64, DatabaseError> {
        if values.is_empty() {
            log::trace!("update: nothing to write to '{table_name}'");
            return Ok(0);
        }

        let mut assignments = Vec::with_capacity(values.len());
        let mut params = Params::new();

        for (name, value) in values {
            let name = name.as_ref();
            let placeholder = parameter_name("set_", name);
            assignments.push(format!("{} = {placeholder}", self.escape_identifier(name)));
            params.insert(placeholder, value.clone());
        }

        let mut sql = format!(
            "UPDATE {} SET {}",
            self.escape_identifier(table_name),
            assignments.join(", "),
        );

        if let Some(where_clause) = where_clause.filter(|x| !x.is_empty()) {
            sql.push_str(" WHERE ");
            sql.push_str(where_clause);
            merge_params(&mut params, where_params.clone())?;
        }

        self.execute(&sql, &params)
    }

    /// Builds the placeholder list for an `IN (...)` clause: `(":p0, :p1", params)`.
    #[must_use]
    pub fn in_condition(values: &[DatabaseValue], prefix: &str) -> (String, Params) {
        let mut params = Params::new();
        let placeholders = values
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let placeholder = parameter_name(prefix, &i.to_string());
                params.insert(placeholder.clone(), value.clone());
                placeholder
            })
            .collect::<Vec<_>>();

        (placeholders.join(", "), params)
    }

    /// The id generated by the most recent insert on this connection.
    ///
    /// # Errors
    ///
    /// * If the connection can't be established
    /// * If the driver can't report the id
    pub fn last_insert_id(&self) -> Result<DatabaseValue, DatabaseError> {
        self.run("-- last insert id", &Params::new(), |connection| connection.last_insert_id())
    }

    /// # Errors
    ///
    /// * If the connection can't be established
    /// * If the driver rejects the statement
    pub fn begin_transaction(&self) -> Result<(), DatabaseError> {
        self.run("BEGIN", &Params::new(), |connection| connection.begin_transaction())
    }

    /// # Errors
    ///
    /// * If the connection can't be established
    /// * If the driver rejects the statement
    pub fn commit(&self) -> Result<(), DatabaseError> {
        self.run("COMMIT", &Params::new(), |connection| connection.commit())
    }

    /// # Errors
    ///
    /// * If the connection can't be established
    /// * If the driver rejects the statement
    pub fn rollback(&self) -> Result<(), DatabaseError> {
        self.run("ROLLBACK", &Params::new(), |connection| connection.rollback())
    }
}

fn format_params(params: &Params) -> String {
    if params.is_empty() {
        return String::new();
    }

    format!(
        "\nParameters: {}",
        serde_json::to_string(params).unwrap_or_else(|e| format!("<{e}>"))
    )
}

#[cfg(all(test, feature = "simulator"))]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::simulator::SimulationConnector;

    use super::*;

    fn database() -> (Database, crate::simulator::SimulationLog) {
        let connector = SimulationConnector::new()
            .with_setup("CREATE TABLE posts (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT)");
        let log = connector.log();
        (Database::new("default", connector), log)
    }

    fn params<const N: usize>(values: [(&str, DatabaseValue); N]) -> Params {
        values
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test_log::test]
    fn connects_lazily_and_only_once() {
        let (db, log) = database();
        assert!(!db.is_connected());
        assert_eq!(log.connections(), 0);

        db.query("SELECT 1", &Params::new()).unwrap();
        db.query("SELECT 2", &Params::new()).unwrap();

        assert!(db.is_connected());
        assert_eq!(log.connections(), 1);
    }

    #[test_log::test]
    fn insert_binds_every_column() {
        let (db, log) = database();

        db.insert("posts", &[("title", DatabaseValue::from("hello"))])
            .unwrap();

        let statements = log.statements();
        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0].sql,
            "INSERT INTO \"posts\" (\"title\") VALUES (:title)"
        );
        assert_eq!(statements[0].params, params([(":title", "hello".into())]));
        assert_eq!(db.last_insert_id().unwrap(), DatabaseValue::Int64(1));
    }

    #[test_log::test]
    fn update_with_no_values_issues_no_statement() {
        let (db, log) = database();

        let affected = db
            .update::<&str>("posts", &[], Some("id = :id"), &Params::new())
            .unwrap();

        assert_eq!(affected, 0);
        assert!(log.statements().is_empty());
        assert!(!db.is_connected());
    }

    #[test_log::test]
    fn update_appends_where_clause_and_params() {
        let (db, log) = database();
        db.insert("posts", &[("title", DatabaseValue::from("a"))])
            .unwrap();

        let affected = db
            .update(
                "posts",
                &[("title", DatabaseValue::from("b"))],
                Some("(\"posts\".\"id\" = :pk_id)"),
                &params([(":pk_id", 1.into())]),
            )
            .unwrap();

        assert_eq!(affected, 1);
        let last = log.statements().pop().unwrap();
        assert_eq!(
            last.sql,
            "UPDATE \"posts\" SET \"title\" = :set_title WHERE (\"posts\".\"id\" = :pk_id)"
        );
        assert_eq!(
            last.params,
            params([(":pk_id", 1.into()), (":set_title", "b".into())])
        );
    }

    #[test_log::test]
    fn update_rejects_where_params_shadowing_values() {
        let (db, log) = database();

        let result = db.update(
            "posts",
            &[("title", DatabaseValue::from("b"))],
            Some("id = :set_title"),
            &params([(":set_title", 1.into())]),
        );

        assert!(matches!(
            result,
            Err(DatabaseError::DuplicateParameter { name }) if name == ":set_title"
        ));
        assert!(log.statements().is_empty());
    }

    #[test_log::test]
    fn insert_returning_id_reports_the_generated_id() {
        let (db, log) = database();

        let first = db
            .insert_returning_id("posts", &[("title", DatabaseValue::from("a"))])
            .unwrap();
        let second = db
            .insert_returning_id("posts", &[("title", DatabaseValue::from("b"))])
            .unwrap();

        assert_eq!(first, DatabaseValue::Int64(1));
        assert_eq!(second, DatabaseValue::Int64(2));
        assert_eq!(log.statements().len(), 2);
    }

    #[test_log::test]
    fn fetch_scalar_reads_one_column_of_the_first_row() {
        let (db, _log) = database();
        db.insert("posts", &[("title", DatabaseValue::from("a"))])
            .unwrap();

        let title = db
            .fetch_scalar("SELECT id, title FROM posts", &Params::new(), 1)
            .unwrap();
        assert_eq!(title, Some(DatabaseValue::String("a".into())));

        let missing = db
            .fetch_scalar("SELECT id FROM posts", &Params::new(), 3)
            .unwrap();
        assert_eq!(missing, None);
    }

    #[test_log::test]
    fn fetch_one_returns_existing_records() {
        let (db, _log) = database();
        db.insert("posts", &[("title", DatabaseValue::from("a"))])
            .unwrap();

        let record = db
            .fetch_one("SELECT title FROM posts", &Params::new())
            .unwrap()
            .unwrap();

        assert!(!record.is_new());
        assert!(record.modified().is_empty());
        assert_eq!(record.get("title").unwrap(), &DatabaseValue::from("a"));
    }

    #[test_log::test]
    fn failing_statements_carry_the_sql() {
        let (db, _log) = database();

        let err = db
            .query("SELECT * FROM missing_table", &Params::new())
            .unwrap_err();

        assert!(matches!(err, DatabaseError::QueryExecution { .. }));
        assert_eq!(err.sql(), Some("SELECT * FROM missing_table"));
    }

    #[test_log::test]
    fn rollback_discards_writes() {
        let (db, _log) = database();

        db.begin_transaction().unwrap();
        db.insert("posts", &[("title", DatabaseValue::from("a"))])
            .unwrap();
        db.rollback().unwrap();

        let count = db
            .fetch_scalar("SELECT COUNT(1) FROM posts", &Params::new(), 0)
            .unwrap();
        assert_eq!(count, Some(DatabaseValue::Int64(0)));
    }

    #[test_log::test]
    fn in_condition_numbers_placeholders() {
        let (sql, params) = Database::in_condition(&[1.into(), 2.into()], "ids");

        assert_eq!(sql, ":ids0, :ids1");
        assert_eq!(
            params,
            [
                (":ids0".to_string(), DatabaseValue::Int64(1)),
                (":ids1".to_string(), DatabaseValue::Int64(2)),
            ]
            .into_iter()
            .collect()
        );
    }
}
