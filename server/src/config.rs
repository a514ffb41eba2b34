//! Configuration management for the server.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use quarry_engine::DEFAULT_MAX_ATTEMPTS;

/// Which repository adapter serves the record tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    /// SQLite through statements built with sqlx's query builder
    Orm,
    /// SQLite through statements rendered by the filter engine
    Sql,
    Document,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "orm" => Ok(Self::Orm),
            "sql" => Ok(Self::Sql),
            "document" => Ok(Self::Document),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub storage_backend: StorageBackend,
    /// SQLite URL for the `orm` and `sql` backends
    pub database_url: String,
    /// Directory for the file-backed document store; in memory when unset
    pub document_dir: Option<PathBuf>,
    /// Failed replays before a queued mutation is dead-lettered
    pub sync_max_attempts: u32,
    /// Upstream quarry server; when set this server runs as a sync client
    pub remote_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            storage_backend: StorageBackend::Memory,
            database_url: "sqlite::memory:".to_string(),
            document_dir: None,
            sync_max_attempts: DEFAULT_MAX_ATTEMPTS,
            remote_url: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host = lookup("HOST").unwrap_or(defaults.host);

        let port = match lookup("PORT") {
            Some(port) => port.trim().parse().map_err(|_| ConfigError::InvalidPort)?,
            None => defaults.port,
        };

        let storage_backend = match lookup("STORAGE_BACKEND") {
            Some(name) => name.parse()?,
            None => defaults.storage_backend,
        };

        let database_url = lookup("DATABASE_URL").unwrap_or(defaults.database_url);

        let document_dir = lookup("DOCUMENT_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);

        let sync_max_attempts = match lookup("SYNC_MAX_ATTEMPTS") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::InvalidMaxAttempts(raw)),
            },
            None => defaults.sync_max_attempts,
        };

        let remote_url = lookup("REMOTE_URL").filter(|url| !url.trim().is_empty());

        Ok(Self {
            host,
            port,
            storage_backend,
            database_url,
            document_dir,
            sync_max_attempts,
            remote_url,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Unknown STORAGE_BACKEND '{0}' (expected memory, orm, sql or document)")]
    UnknownBackend(String),

    #[error("Invalid SYNC_MAX_ATTEMPTS '{0}' (expected a positive integer)")]
    InvalidMaxAttempts(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.storage_backend, StorageBackend::Memory);
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.sync_max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(config.remote_url.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("PORT", "8080"),
            ("STORAGE_BACKEND", "SQL"),
            ("DOCUMENT_DIR", "/tmp/quarry"),
            ("SYNC_MAX_ATTEMPTS", "2"),
            ("REMOTE_URL", "http://upstream:3000"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.storage_backend, StorageBackend::Sql);
        assert_eq!(config.document_dir, Some(PathBuf::from("/tmp/quarry")));
        assert_eq!(config.sync_max_attempts, 2);
        assert_eq!(config.remote_url.as_deref(), Some("http://upstream:3000"));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(load(&[("PORT", "http")]), Err(ConfigError::InvalidPort)));
        assert!(matches!(
            load(&[("STORAGE_BACKEND", "postgres")]),
            Err(ConfigError::UnknownBackend(_))
        ));
        assert!(matches!(
            load(&[("SYNC_MAX_ATTEMPTS", "0")]),
            Err(ConfigError::InvalidMaxAttempts(_))
        ));
    }
}
