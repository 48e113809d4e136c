//! Environment-driven runtime configuration.
//!
//! # Responsibility
//! - Read log level, log directory and database path from the environment.
//! - Open the configured store and start logging from those settings.
//!
//! # Invariants
//! - Missing variables fall back to defaults; blank values count as missing.

use crate::logging::{default_log_level, init_logging};
use crate::model::household::household_registry;
use crate::model::{Datastore, RegistryError};
use crate::store::{SqliteDocumentStore, StoreError};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;

pub const ENV_LOG_LEVEL: &str = "HEARTHLINK_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "HEARTHLINK_LOG_DIR";
pub const ENV_DB_PATH: &str = "HEARTHLINK_DB_PATH";

const DEFAULT_DB_FILE: &str = "hearthlink.sqlite3";

#[derive(Debug)]
pub enum ConfigError {
    Logging(String),
    Store(StoreError),
    Registry(RegistryError),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Logging(message) => write!(f, "logging setup failed: {message}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Registry(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Logging(_) => None,
            Self::Store(err) => Some(err),
            Self::Registry(err) => Some(err),
        }
    }
}

impl From<StoreError> for ConfigError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<RegistryError> for ConfigError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    pub log_level: String,
    /// Logging stays off when unset.
    pub log_dir: Option<PathBuf>,
    pub db_path: PathBuf,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level().to_string(),
            log_dir: None,
            db_path: std::env::temp_dir().join(DEFAULT_DB_FILE),
        }
    }
}

impl CoreConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup (environment, test map).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();
        Self {
            log_level: read(ENV_LOG_LEVEL).unwrap_or(defaults.log_level),
            log_dir: read(ENV_LOG_DIR).map(PathBuf::from),
            db_path: read(ENV_DB_PATH)
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
        }
    }

    /// Starts logging when a directory is configured.
    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match &self.log_dir {
            Some(dir) => init_logging(&self.log_level, dir).map_err(ConfigError::Logging),
            None => Ok(()),
        }
    }

    pub fn open_store(&self) -> Result<SqliteDocumentStore, ConfigError> {
        Ok(SqliteDocumentStore::open(&self.db_path)?)
    }

    /// Opens the store and pairs it with the household schema.
    pub fn open_datastore(&self) -> Result<Datastore, ConfigError> {
        let store = self.open_store()?;
        Ok(Datastore::new(
            Arc::new(store),
            Arc::new(household_registry()?),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::{CoreConfig, ENV_DB_PATH, ENV_LOG_DIR, ENV_LOG_LEVEL};
    use std::collections::HashMap;
    use std::path::PathBuf;

    #[test]
    fn lookup_overrides_defaults_and_ignores_blanks() {
        let vars: HashMap<&str, &str> = [
            (ENV_LOG_LEVEL, "warn"),
            (ENV_LOG_DIR, "   "),
            (ENV_DB_PATH, "/var/lib/hearthlink/db.sqlite3"),
        ]
        .into_iter()
        .collect();
        let config = CoreConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.log_level, "warn");
        assert_eq!(config.log_dir, None);
        assert_eq!(
            config.db_path,
            PathBuf::from("/var/lib/hearthlink/db.sqlite3")
        );
    }

    #[test]
    fn open_datastore_uses_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoreConfig {
            db_path: dir.path().join("core.sqlite3"),
            ..CoreConfig::default()
        };
        let db = config.open_datastore().unwrap();
        assert_eq!(db.registry().len(), 3);
        assert!(config.db_path.exists());
    }
}
