use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] json5::Error),
    #[error("Config directory not found")]
    ConfigDirNotFound,
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Named database connections; `default` is the one applications use unless told
    /// otherwise
    #[serde(rename = "database", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub databases: BTreeMap<String, DatabaseConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<TranslationConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// `sqlite::memory:`, `sqlite:<path>`, `mysql:host=<host>;port=<port>;dbname=<name>`
    /// or `mysql:<host>[:<port>]`
    pub dsn: String,
    /// Schema to select after connecting, when the DSN doesn't name one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl DatabaseConfig {
    /// Applies `ROWKIT_DATABASE_<NAME>_{DSN,NAME,USER,PASSWORD}` from the process
    /// environment. `<NAME>` is the upper-cased connection name.
    #[must_use]
    pub fn with_env_overrides(self, name: &str) -> Self {
        self.with_overrides(name, |key| std::env::var(key).ok())
    }

    /// Like [`DatabaseConfig::with_env_overrides`], reading values through `lookup`.
    #[must_use]
    pub fn with_overrides(mut self, name: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let prefix = format!(
            "ROWKIT_DATABASE_{}_",
            name.to_ascii_uppercase().replace(['-', '.'], "_")
        );
        let var = |suffix: &str| lookup(&format!("{prefix}{suffix}"));

        if let Some(dsn) = var("DSN") {
            log::debug!("Overriding dsn of database '{name}' from the environment");
            self.dsn = dsn;
        }
        if let Some(value) = var("NAME") {
            self.name = Some(value);
        }
        if let Some(value) = var("USER") {
            self.user = Some(value);
        }
        if let Some(value) = var("PASSWORD") {
            self.password = Some(value);
        }

        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// `info`, `warning` or `error`; any other `env_filter` level name is passed through
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Log file path; relative paths are resolved against the logs directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all: Vec<String>,
}

impl Config {
    /// The named database configuration with environment overrides applied.
    #[must_use]
    pub fn database(&self, name: &str) -> Option<DatabaseConfig> {
        self.databases
            .get(name)
            .cloned()
            .map(|x| x.with_env_overrides(name))
    }

    /// Looks up a dotted key such as `database.default.dsn`. Missing keys and keys that
    /// descend into scalars yield `None`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut value = serde_json::to_value(self).ok()?;

        for segment in key.split('.') {
            value = match value {
                serde_json::Value::Object(mut map) => map.remove(segment)?,
                serde_json::Value::Array(mut values) => {
                    let index = segment.parse::<usize>().ok()?;
                    if index >= values.len() {
                        return None;
                    }
                    values.swap_remove(index)
                }
                _ => return None,
            };
        }

        Some(value)
    }

    /// Like [`Config::get`] for string values.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            serde_json::Value::String(value) => Some(value),
            _ => None,
        }
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(json5::from_str(s)?)
    }
}

/// Get the path to a config file, preferring .json5 but also checking .json
fn get_config_file_path(dir: &Path, filename: &str) -> Option<PathBuf> {
    let json5_path = dir.join(format!("{filename}.json5"));
    if json5_path.exists() {
        return Some(json5_path);
    }

    let json_path = dir.join(format!("{filename}.json"));
    if json_path.exists() {
        return Some(json_path);
    }

    None
}

/// Load a config file from disk, parsing it with json5
///
/// # Errors
///
/// * If the config file cannot be read
/// * If the config file is malformed
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    log::debug!("Loading config from {}", path.display());
    let content = fs::read_to_string(path)?;
    content.parse()
}

/// Load `config.json5` (or `config.json`) from `dir`, or the default configuration when
/// neither exists.
///
/// # Errors
///
/// * If the config file cannot be read
/// * If the config file is malformed
pub fn load_config_from_dir(dir: &Path) -> Result<Config, ConfigError> {
    if let Some(path) = get_config_file_path(dir, "config") {
        load_config(&path)
    } else {
        log::debug!("No config file in {}, using defaults", dir.display());
        Ok(Config::default())
    }
}

/// Load the configuration from the rowkit config directory.
///
/// # Errors
///
/// * If the config directory cannot be found
/// * If the config file cannot be read
/// * If the config file is malformed
pub fn load_global_config() -> Result<Config, ConfigError> {
    let config_dir = crate::get_config_dir_path().ok_or(ConfigError::ConfigDirNotFound)?;
    load_config_from_dir(&config_dir)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const CONFIG: &str = r#"{
        // Connections by name
        database: {
            default: {
                dsn: "mysql:host=db.local;port=3307;dbname=app",
                user: "app",
                password: "secret",
            },
            cache: {
                dsn: "sqlite::memory:",
            },
        },
        logging: {
            level: "warning",
        },
        translation: {
            default: "de",
            all: ["de", "en"],
        },
    }"#;

    #[test_log::test]
    fn parses_json5_config() {
        let config: Config = CONFIG.parse().unwrap();

        assert_eq!(config.databases.len(), 2);
        assert_eq!(config.databases["cache"].dsn, "sqlite::memory:");
        assert_eq!(
            config.logging.as_ref().unwrap().level.as_deref(),
            Some("warning")
        );
        assert_eq!(
            config.translation.unwrap().all,
            vec!["de".to_string(), "en".to_string()]
        );
    }

    #[test_log::test]
    fn dotted_lookup() {
        let config: Config = CONFIG.parse().unwrap();

        assert_eq!(
            config.get_str("database.default.dsn").as_deref(),
            Some("mysql:host=db.local;port=3307;dbname=app")
        );
        assert_eq!(config.get_str("translation.all.1").as_deref(), Some("en"));
        assert_eq!(config.get("database.missing.dsn"), None);
        assert_eq!(config.get("logging.level.deeper"), None);
        assert_eq!(config.get_str("database.default"), None);
    }

    #[test_log::test]
    fn environment_overrides_replace_configured_values() {
        let config: Config = CONFIG.parse().unwrap();
        let env = |key: &str| match key {
            "ROWKIT_DATABASE_DEFAULT_DSN" => Some("sqlite:/tmp/app.db".to_string()),
            "ROWKIT_DATABASE_DEFAULT_PASSWORD" => Some("hunter2".to_string()),
            _ => None,
        };

        let database = config.databases["default"]
            .clone()
            .with_overrides("default", env);

        assert_eq!(
            database,
            DatabaseConfig {
                dsn: "sqlite:/tmp/app.db".to_string(),
                name: None,
                user: Some("app".to_string()),
                password: Some("hunter2".to_string()),
            }
        );
    }

    #[test_log::test]
    fn missing_config_file_yields_defaults() {
        let dir = std::env::temp_dir().join("rowkit_config_missing_dir_test");

        assert_eq!(load_config_from_dir(&dir).unwrap(), Config::default());
    }

    #[test_log::test]
    fn malformed_config_is_a_parse_error() {
        assert!(matches!(
            "{ database: ".parse::<Config>(),
            Err(ConfigError::ParseError(_))
        ));
    }
}
