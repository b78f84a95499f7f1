use mysql::{Conn, OptsBuilder, Params as MysqlParams, Value, prelude::Queryable as _};

use crate::{
    DatabaseValue, DriverError, Params, Row,
    driver::{Connection, Connector, Dialect},
};

/// Connects to `MySQL` or `MariaDB` through the synchronous `mysql` client.
#[derive(Clone, Default)]
pub struct MysqlConnector {
    host: String,
    port: Option<u16>,
    database: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

impl std::fmt::Debug for MysqlConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MysqlConnector")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "******"))
            .finish()
    }
}

impl MysqlConnector {
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub const fn port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn database(mut self, database: Option<String>) -> Self {
        self.database = database;
        self
    }

    #[must_use]
    pub fn user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    #[must_use]
    pub fn password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port_number(&self) -> Option<u16> {
        self.port
    }

    #[must_use]
    pub fn database_name(&self) -> Option<&str> {
        self.database.as_deref()
    }
}

impl Connector for MysqlConnector {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn connect(&self) -> Result<Box<dyn Connection>, DriverError> {
        log::debug!(
            "Connecting to mysql at {}:{}",
            self.host,
            self.port.unwrap_or(3306)
        );

        let mut opts = OptsBuilder::new()
            .ip_or_hostname(Some(self.host.clone()))
            .db_name(self.database.clone())
            .user(self.user.clone())
            .pass(self.password.clone());
        if let Some(port) = self.port {
            opts = opts.tcp_port(port);
        }

        let mut conn = Conn::new(opts)?;
        conn.query_drop("SET NAMES 'utf8mb4'")?;

        Ok(Box::new(MysqlConnection { conn }))
    }
}

pub struct MysqlConnection {
    conn: Conn,
}

impl std::fmt::Debug for MysqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MysqlConnection")
            .field("connection_id", &self.conn.connection_id())
            .finish()
    }
}

impl Connection for MysqlConnection {
    fn query(&mut self, sql: &str, params: &Params) -> Result<Vec<Row>, DriverError> {
        let rows: Vec<mysql::Row> = self.conn.exec(sql, to_mysql_params(params))?;

        Ok(rows.iter().map(from_row).collect())
    }

    fn execute(&mut self, sql: &str, params: &Params) -> Result<u64, DriverError> {
        self.conn.exec_drop(sql, to_mysql_params(params))?;
        Ok(self.conn.affected_rows())
    }

    fn last_insert_id(&mut self) -> Result<DatabaseValue, DriverError> {
        Ok(DatabaseValue::UInt64(self.conn.last_insert_id()))
    }

    fn begin_transaction(&mut self) -> Result<(), DriverError> {
        Ok(self.conn.query_drop("START TRANSACTION")?)
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        Ok(self.conn.query_drop("COMMIT")?)
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        Ok(self.conn.query_drop("ROLLBACK")?)
    }
}

/// The client expects placeholder names without the leading colon.
fn to_mysql_params(params: &Params) -> MysqlParams {
    if params.is_empty() {
        return MysqlParams::Empty;
    }

    MysqlParams::Named(
        params
            .iter()
            .map(|(name, value)| {
                (
                    name.trim_start_matches(':').as_bytes().to_vec(),
                    to_mysql_value(value),
                )
            })
            .collect(),
    )
}

fn to_mysql_value(value: &DatabaseValue) -> Value {
    match value {
        DatabaseValue::Null => Value::NULL,
        DatabaseValue::Bool(value) => Value::Int(i64::from(*value)),
        DatabaseValue::Int64(value) => Value::Int(*value),
        DatabaseValue::UInt64(value) => Value::UInt(*value),
        DatabaseValue::Real64(value) => Value::Double(*value),
        DatabaseValue::String(value) => Value::Bytes(value.as_bytes().to_vec()),
    }
}

fn from_row(row: &mysql::Row) -> Row {
    Row {
        columns: row
            .columns_ref()
            .iter()
            .enumerate()
            .map(|(i, column)| {
                (
                    column.name_str().to_string(),
                    row.as_ref(i).map_or(DatabaseValue::Null, from_mysql_value),
                )
            })
            .collect(),
    }
}

fn from_mysql_value(value: &Value) -> DatabaseValue {
    match value {
        Value::NULL => DatabaseValue::Null,
        Value::Bytes(bytes) => DatabaseValue::String(String::from_utf8_lossy(bytes).into_owned()),
        Value::Int(value) => DatabaseValue::Int64(*value),
        Value::UInt(value) => DatabaseValue::UInt64(*value),
        Value::Float(value) => DatabaseValue::Real64(f64::from(*value)),
        Value::Double(value) => DatabaseValue::Real64(*value),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let mut formatted = format!(
                "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
            );
            if *micros > 0 {
                formatted.push_str(&format!(".{micros:06}"));
            }
            DatabaseValue::String(formatted)
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let hours = u32::from(*hours) + days * 24;
            let sign = if *negative { "-" } else { "" };
            let mut formatted = format!("{sign}{hours:02}:{minutes:02}:{seconds:02}");
            if *micros > 0 {
                formatted.push_str(&format!(".{micros:06}"));
            }
            DatabaseValue::String(formatted)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn strips_colons_from_named_params() {
        let params: Params = [(":pk_id".to_string(), DatabaseValue::Int64(7))]
            .into_iter()
            .collect();

        let MysqlParams::Named(named) = to_mysql_params(&params) else {
            panic!("expected named params");
        };

        assert_eq!(named.get(b"pk_id".as_slice()), Some(&Value::Int(7)));
    }

    #[test_log::test]
    fn empty_params_are_empty() {
        assert!(matches!(to_mysql_params(&Params::new()), MysqlParams::Empty));
    }

    #[test_log::test]
    fn formats_dates_and_times() {
        assert_eq!(
            from_mysql_value(&Value::Date(2024, 3, 9, 7, 5, 0, 0)),
            DatabaseValue::String("2024-03-09 07:05:00".into())
        );
        assert_eq!(
            from_mysql_value(&Value::Time(true, 1, 2, 3, 4, 0)),
            DatabaseValue::String("-26:03:04".into())
        );
    }

    #[test_log::test]
    fn connector_does_not_connect_until_asked() {
        let connector = MysqlConnector::new("localhost")
            .port(Some(3307))
            .database(Some("app".into()))
            .password(Some("secret".into()));

        assert_eq!(connector.dialect(), Dialect::MySql);
        assert_eq!(connector.host(), "localhost");
        assert_eq!(connector.port_number(), Some(3307));
        assert_eq!(connector.database_name(), Some("app"));
        assert!(!format!("{connector:?}").contains("secret"));
    }
}
