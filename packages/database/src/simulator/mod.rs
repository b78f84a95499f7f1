//! An in-memory `SQLite` connector that records what it executes.
//!
//! Every connector gets its own database, created on connect and seeded with the
//! configured setup statements. Tests use the [`SimulationLog`] to assert which
//! statements were issued, or that none were.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

use crate::{
    DatabaseValue, DriverError, Params, Row,
    driver::{Connection, Connector, Dialect},
    rusqlite::RusqliteConnection,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    pub sql: String,
    pub params: Params,
}

/// Shared view of everything a [`SimulationConnector`] did.
#[derive(Debug, Clone, Default)]
pub struct SimulationLog {
    statements: Arc<Mutex<Vec<ExecutedStatement>>>,
    connections: Arc<AtomicUsize>,
}

impl SimulationLog {
    /// Statements run through `query` or `execute`, setup excluded.
    #[must_use]
    pub fn statements(&self) -> Vec<ExecutedStatement> {
        self.statements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.statements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// How many times the connector was asked to connect.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    fn push(&self, sql: &str, params: &Params) {
        self.statements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ExecutedStatement {
                sql: sql.to_string(),
                params: params.clone(),
            });
    }
}

#[allow(clippy::module_name_repetitions)]
#[derive(Debug)]
pub struct SimulationConnector {
    db_url: String,
    dialect: Dialect,
    setup: Vec<String>,
    log: SimulationLog,
}

impl Default for SimulationConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationConnector {
    #[must_use]
    pub fn new() -> Self {
        static ID: AtomicU64 = AtomicU64::new(0);

        let id = ID.fetch_add(1, Ordering::Relaxed);
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |x| x.as_nanos());

        Self {
            db_url: format!("file:rowkit_memdb_{id}_{timestamp}:?mode=memory&cache=shared&uri=true"),
            dialect: Dialect::Sqlite,
            setup: vec![],
            log: SimulationLog::default(),
        }
    }

    /// Statements run once, right after connecting.
    #[must_use]
    pub fn with_setup(mut self, sql: impl Into<String>) -> Self {
        self.setup.push(sql.into());
        self
    }

    /// Renders statements for another dialect while still executing on `SQLite`. Only
    /// useful for asserting statement text: syntax `SQLite` doesn't know will fail.
    #[must_use]
    pub const fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    #[must_use]
    pub fn log(&self) -> SimulationLog {
        self.log.clone()
    }
}

impl Connector for SimulationConnector {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn connect(&self) -> Result<Box<dyn Connection>, DriverError> {
        self.log.connections.fetch_add(1, Ordering::SeqCst);

        let connection = ::rusqlite::Connection::open(&self.db_url)?;
        connection.busy_timeout(std::time::Duration::from_millis(10))?;

        let inner = RusqliteConnection::new(connection);
        for sql in &self.setup {
            inner.execute_batch(sql)?;
        }

        Ok(Box::new(SimulationConnection {
            inner,
            log: self.log.clone(),
        }))
    }
}

#[derive(Debug)]
struct SimulationConnection {
    inner: RusqliteConnection,
    log: SimulationLog,
}

impl Connection for SimulationConnection {
    fn query(&mut self, sql: &str, params: &Params) -> Result<Vec<Row>, DriverError> {
        self.log.push(sql, params);
        self.inner.query(sql, params)
    }

    fn execute(&mut self, sql: &str, params: &Params) -> Result<u64, DriverError> {
        self.log.push(sql, params);
        self.inner.execute(sql, params)
    }

    fn last_insert_id(&mut self) -> Result<DatabaseValue, DriverError> {
        self.inner.last_insert_id()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn records_statements_but_not_setup() {
        let connector = SimulationConnector::new().with_setup("CREATE TABLE t (a INTEGER)");
        let log = connector.log();

        let mut connection = connector.connect().unwrap();
        connection
            .execute("INSERT INTO t (a) VALUES (:a)", &[(":a".to_string(), 1.into())].into_iter().collect())
            .unwrap();

        let statements = log.statements();
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].sql, "INSERT INTO t (a) VALUES (:a)");
        assert_eq!(log.connections(), 1);

        log.clear();
        assert!(log.statements().is_empty());
    }

    #[test_log::test]
    fn connectors_do_not_share_databases() {
        let first = SimulationConnector::new().with_setup("CREATE TABLE t (a INTEGER)");
        let second = SimulationConnector::new().with_setup("CREATE TABLE t (a INTEGER)");

        let mut first = first.connect().unwrap();
        let mut second = second.connect().unwrap();
        first
            .execute("INSERT INTO t (a) VALUES (1)", &Params::new())
            .unwrap();

        let rows = second
            .query("SELECT COUNT(1) AS n FROM t", &Params::new())
            .unwrap();
        assert_eq!(rows[0].get("n"), Some(DatabaseValue::Int64(0)));
    }
}
