#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Builds a [`Database`] from configuration.
//!
//! Connection strings follow the PDO-style forms:
//!
//! * `sqlite::memory:`
//! * `sqlite:<path>`
//! * `mysql:host=<host>;port=<port>;dbname=<name>`
//! * `mysql:<host>[:<port>]`
//!
//! No connection is opened here; the returned [`Database`] connects on its first
//! statement.

use std::{path::PathBuf, str::FromStr};

use rowkit_config::{Config, DatabaseConfig};
use rowkit_database::Database;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dsn {
    SqliteMemory,
    SqliteFile(PathBuf),
    Mysql {
        host: String,
        port: Option<u16>,
        database: Option<String>,
    },
}

#[derive(Debug, Error)]
pub enum DsnError {
    #[error("Unsupported database driver in '{0}'")]
    UnsupportedDriver(String),
    #[error("Missing host in '{0}'")]
    MissingHost(String),
    #[error("Invalid port in '{0}'")]
    InvalidPort(String),
    #[error("Missing sqlite database path in '{0}'")]
    MissingPath(String),
}

impl FromStr for Dsn {
    type Err = DsnError;

    fn from_str(dsn: &str) -> Result<Self, Self::Err> {
        let dsn = dsn.trim();
        let Some((driver, rest)) = dsn.split_once(':') else {
            return Err(DsnError::UnsupportedDriver(dsn.to_string()));
        };

        match driver.to_ascii_lowercase().as_str() {
            "sqlite" => match rest {
                ":memory:" => Ok(Self::SqliteMemory),
                "" => Err(DsnError::MissingPath(dsn.to_string())),
                path => Ok(Self::SqliteFile(PathBuf::from(path))),
            },
            "mysql" => parse_mysql(dsn, rest),
            _ => Err(DsnError::UnsupportedDriver(dsn.to_string())),
        }
    }
}

fn parse_mysql(dsn: &str, rest: &str) -> Result<Dsn, DsnError> {
    let parse_port = |port: &str| {
        port.trim()
            .parse::<u16>()
            .map_err(|_| DsnError::InvalidPort(dsn.to_string()))
    };

    let (host, port, database) = if rest.contains('=') {
        let mut host = None;
        let mut port = None;
        let mut database = None;

        for pair in rest.split(';').filter(|x| !x.trim().is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key.trim().to_ascii_lowercase().as_str() {
                "host" => host = Some(value.trim().to_string()),
                "port" => port = Some(parse_port(value)?),
                "dbname" => database = Some(value.trim().to_string()),
                other => log::debug!("Ignoring dsn attribute '{other}'"),
            }
        }

        (host, port, database)
    } else {
        match rest.rsplit_once(':') {
            Some((host, port)) => (Some(host.to_string()), Some(parse_port(port)?), None),
            None => (Some(rest.to_string()), None, None),
        }
    };

    let host = host
        .map(|x| x.trim().to_string())
        .filter(|x| !x.is_empty())
        .ok_or_else(|| DsnError::MissingHost(dsn.to_string()))?;

    Ok(Dsn::Mysql {
        host,
        port,
        database: database.filter(|x| !x.is_empty()),
    })
}

#[derive(Debug, Error)]
pub enum InitDbError {
    #[error(transparent)]
    Dsn(#[from] DsnError),
    #[error("No database named '{0}' is configured")]
    NotConfigured(String),
    #[error("Support for {0} databases is not enabled")]
    DriverNotEnabled(&'static str),
}

/// Connection details for a server database.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    host: String,
    port: Option<u16>,
    name: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "******"))
            .finish()
    }
}

impl Credentials {
    #[must_use]
    pub const fn new(
        host: String,
        port: Option<u16>,
        name: Option<String>,
        user: Option<String>,
        password: Option<String>,
    ) -> Self {
        Self {
            host,
            port,
            name,
            user,
            password,
        }
    }
}

/// Builds the database configured under `name`, with environment overrides applied.
///
/// # Errors
///
/// * If no database is configured under `name`
/// * If the DSN is malformed or names a driver that isn't enabled
pub fn init(name: &str, config: &Config) -> Result<Database, InitDbError> {
    let database = config
        .database(name)
        .ok_or_else(|| InitDbError::NotConfigured(name.to_string()))?;

    init_from_config(name, &database)
}

/// # Errors
///
/// * If the DSN is malformed or names a driver that isn't enabled
pub fn init_from_config(name: &str, config: &DatabaseConfig) -> Result<Database, InitDbError> {
    let dsn: Dsn = config.dsn.parse()?;
    log::debug!("init: database '{name}' uses {dsn:?}");

    match dsn {
        Dsn::SqliteMemory => init_sqlite(name, None),
        Dsn::SqliteFile(path) => init_sqlite(name, Some(path)),
        Dsn::Mysql {
            host,
            port,
            database,
        } => init_mysql(
            name,
            Credentials::new(
                host,
                port,
                database.or_else(|| config.name.clone()),
                config.user.clone(),
                config.password.clone(),
            ),
        ),
    }
}

/// An in-memory database when `location` is `None`.
///
/// # Errors
///
/// * If `SQLite` support is not enabled
#[allow(clippy::unnecessary_wraps, clippy::needless_pass_by_value)]
pub fn init_sqlite(
    #[allow(unused)] name: &str,
    #[allow(unused)] location: Option<PathBuf>,
) -> Result<Database, InitDbError> {
    #[cfg(feature = "sqlite-rusqlite")]
    {
        use rowkit_database::rusqlite::RusqliteConnector;

        let connector = match location {
            Some(path) => RusqliteConnector::file(path),
            None => RusqliteConnector::memory(),
        };
        Ok(Database::new(name, connector))
    }

    #[cfg(not(feature = "sqlite-rusqlite"))]
    Err(InitDbError::DriverNotEnabled("sqlite"))
}

/// # Errors
///
/// * If `MySQL` support is not enabled
#[allow(clippy::unnecessary_wraps, clippy::needless_pass_by_value)]
pub fn init_mysql(
    #[allow(unused)] name: &str,
    #[allow(unused)] creds: Credentials,
) -> Result<Database, InitDbError> {
    #[cfg(feature = "mysql")]
    {
        use rowkit_database::mysql::MysqlConnector;

        let connector = MysqlConnector::new(creds.host)
            .port(creds.port)
            .database(creds.name)
            .user(creds.user)
            .password(creds.password);
        Ok(Database::new(name, connector))
    }

    #[cfg(not(feature = "mysql"))]
    Err(InitDbError::DriverNotEnabled("mysql"))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn parses_sqlite_dsns() {
        assert_eq!("sqlite::memory:".parse::<Dsn>().unwrap(), Dsn::SqliteMemory);
        assert_eq!(
            "sqlite:/var/lib/app.db".parse::<Dsn>().unwrap(),
            Dsn::SqliteFile(PathBuf::from("/var/lib/app.db"))
        );
        assert!(matches!(
            "sqlite:".parse::<Dsn>(),
            Err(DsnError::MissingPath(_))
        ));
    }

    #[test_log::test]
    fn parses_mysql_attribute_dsns() {
        assert_eq!(
            "mysql:host=db.local;port=3307;dbname=app"
                .parse::<Dsn>()
                .unwrap(),
            Dsn::Mysql {
                host: "db.local".to_string(),
                port: Some(3307),
                database: Some("app".to_string()),
            }
        );
    }

    #[test_log::test]
    fn parses_mysql_host_dsns() {
        assert_eq!(
            "mysql:localhost".parse::<Dsn>().unwrap(),
            Dsn::Mysql {
                host: "localhost".to_string(),
                port: None,
                database: None,
            }
        );
        assert_eq!(
            "mysql:localhost:3306".parse::<Dsn>().unwrap(),
            Dsn::Mysql {
                host: "localhost".to_string(),
                port: Some(3306),
                database: None,
            }
        );
    }

    #[test_log::test]
    fn rejects_bad_dsns() {
        assert!(matches!(
            "postgres:host=x".parse::<Dsn>(),
            Err(DsnError::UnsupportedDriver(_))
        ));
        assert!(matches!(
            "mysql:dbname=app".parse::<Dsn>(),
            Err(DsnError::MissingHost(_))
        ));
        assert!(matches!(
            "mysql:localhost:port".parse::<Dsn>(),
            Err(DsnError::InvalidPort(_))
        ));
        assert!(matches!(
            "nothing".parse::<Dsn>(),
            Err(DsnError::UnsupportedDriver(_))
        ));
    }

    #[cfg(feature = "sqlite-rusqlite")]
    #[test_log::test]
    fn init_builds_an_unconnected_database() {
        let config: Config = r#"{ database: { default: { dsn: "sqlite::memory:" } } }"#
            .parse()
            .unwrap();

        let db = init("default", &config).unwrap();

        assert_eq!(db.name(), "default");
        assert_eq!(db.dialect(), rowkit_database::Dialect::Sqlite);
        assert!(!db.is_connected());
    }

    #[test_log::test]
    fn init_requires_a_configured_database() {
        assert!(matches!(
            init("missing", &Config::default()),
            Err(InitDbError::NotConfigured(name)) if name == "missing"
        ));
    }

    #[test_log::test]
    fn credentials_hide_the_password() {
        let creds = Credentials::new(
            "db".to_string(),
            None,
            None,
            Some("app".to_string()),
            Some("secret".to_string()),
        );

        assert!(!format!("{creds:?}").contains("secret"));
    }
}
