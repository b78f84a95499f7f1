#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Configuration for rowkit applications.
//!
//! Settings live in a json5 file (`config.json5`, or `config.json`) inside the config
//! directory, `~/.local/rowkit` unless overridden with [`set_root_dir`].

use std::{
    path::PathBuf,
    sync::{LazyLock, Mutex, PoisonError},
};

pub mod file;

pub use file::{
    Config, ConfigError, DatabaseConfig, LoggingConfig, TranslationConfig, load_config,
    load_config_from_dir,
};

static ROOT_DIR: LazyLock<Mutex<Option<PathBuf>>> = LazyLock::new(|| Mutex::new(None));

/// Sets the root directory for rowkit configuration.
///
/// By default, the root directory is `~/.local/rowkit`.
pub fn set_root_dir(path: PathBuf) {
    *ROOT_DIR.lock().unwrap_or_else(PoisonError::into_inner) = Some(path);
}

#[must_use]
fn get_root_dir() -> Option<PathBuf> {
    let mut root_dir = ROOT_DIR.lock().unwrap_or_else(PoisonError::into_inner);

    if root_dir.is_some() {
        return root_dir.clone();
    }

    *root_dir = home::home_dir().map(|home| home.join(".local").join("rowkit"));

    root_dir.clone()
}

/// Returns the path to the rowkit configuration directory.
#[must_use]
pub fn get_config_dir_path() -> Option<PathBuf> {
    get_root_dir()
}

/// Returns the path to the log directory, `~/.local/rowkit/logs` by default.
#[must_use]
pub fn get_logs_dir_path() -> Option<PathBuf> {
    get_config_dir_path().map(|config| config.join("logs"))
}

/// Returns the path to the log directory, creating it if it doesn't exist.
#[must_use]
pub fn make_logs_dir_path() -> Option<PathBuf> {
    if let Some(path) = get_logs_dir_path()
        && (path.is_dir() || std::fs::create_dir_all(&path).is_ok())
    {
        return Some(path);
    }

    None
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn logs_dir_lives_under_the_root_dir() {
        let root = std::env::temp_dir().join("rowkit_config_test_root");
        set_root_dir(root.clone());

        assert_eq!(get_config_dir_path(), Some(root.clone()));
        assert_eq!(get_logs_dir_path(), Some(root.join("logs")));
    }
}
