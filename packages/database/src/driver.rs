//! The seam between [`Database`](crate::Database) and a concrete SQL driver.

use crate::{DatabaseValue, DriverError, Params, Row};

/// The SQL flavor a connector speaks. Only identifier quoting and a couple of syntax
/// details differ between the supported dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Sqlite,
}

impl Dialect {
    #[must_use]
    pub const fn quote_char(self) -> char {
        match self {
            Self::MySql => '`',
            Self::Sqlite => '"',
        }
    }

    /// Quotes every dot-separated segment of `name`. Embedded quote characters are
    /// doubled and a `*` segment is left bare, so `posts.*` stays a wildcard.
    #[must_use]
    pub fn escape_identifier(self, name: &str) -> String {
        let quote = self.quote_char();
        let doubled = format!("{quote}{quote}");

        name.split('.')
            .map(|segment| {
                if segment == "*" {
                    segment.to_string()
                } else {
                    format!("{quote}{}{quote}", segment.replace(quote, &doubled))
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Whether `DELETE ... LIMIT n` is accepted.
    #[must_use]
    pub const fn supports_delete_limit(self) -> bool {
        matches!(self, Self::MySql)
    }

    /// The clause appended to a `LIKE` pattern so that `\%` matches a literal percent.
    #[must_use]
    pub const fn like_escape_clause(self) -> &'static str {
        match self {
            Self::MySql => "",
            Self::Sqlite => " ESCAPE '\\'",
        }
    }
}

/// Opens physical connections. A [`Database`](crate::Database) holds exactly one
/// connector and calls [`Connector::connect`] at most once, on its first statement.
pub trait Connector: Send + Sync + std::fmt::Debug {
    fn dialect(&self) -> Dialect;

    /// # Errors
    ///
    /// * If the underlying driver fails to open the connection
    fn connect(&self) -> Result<Box<dyn Connection>, DriverError>;
}

/// A live connection. Placeholders in statements are named (`:name`) and `params` keys
/// carry the leading colon.
pub trait Connection: Send + std::fmt::Debug {
    /// # Errors
    ///
    /// * If the driver fails to prepare or run the statement
    fn query(&mut self, sql: &str, params: &Params) -> Result<Vec<Row>, DriverError>;

    /// Returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// * If the driver fails to prepare or run the statement
    fn execute(&mut self, sql: &str, params: &Params) -> Result<u64, DriverError>;

    /// # Errors
    ///
    /// * If the driver can't report the id
    fn last_insert_id(&mut self) -> Result<DatabaseValue, DriverError>;

    /// # Errors
    ///
    /// * If the driver rejects the statement
    fn begin_transaction(&mut self) -> Result<(), DriverError> {
        self.execute("BEGIN", &Params::new()).map(|_| ())
    }

    /// # Errors
    ///
    /// * If the driver rejects the statement
    fn commit(&mut self) -> Result<(), DriverError> {
        self.execute("COMMIT", &Params::new()).map(|_| ())
    }

    /// # Errors
    ///
    /// * If the driver rejects the statement
    fn rollback(&mut self) -> Result<(), DriverError> {
        self.execute("ROLLBACK", &Params::new()).map(|_| ())
    }
}
