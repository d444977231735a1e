//! Storage configuration.

use thiserror::Error;

pub const DATABASE_URL_VAR: &str = "ORDERTRACK_DATABASE_URL";
pub const MAX_CONNECTIONS_VAR: &str = "ORDERTRACK_MAX_CONNECTIONS";

const DEFAULT_DATABASE_URL: &str = "sqlite::memory:";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Connection settings for [`crate::SqliteOrderStore`].
///
/// An in-memory SQLite database lives only as long as its connection, so the
/// default keeps a single connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub create_if_missing: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 1,
            create_if_missing: true,
        }
    }
}

impl StoreConfig {
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Read `ORDERTRACK_DATABASE_URL` and `ORDERTRACK_MAX_CONNECTIONS`,
    /// falling back to the defaults for unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup(DATABASE_URL_VAR) {
            if url.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    var: DATABASE_URL_VAR,
                    reason: "must not be empty".to_string(),
                });
            }
            config.database_url = url;
        }

        if let Some(raw) = lookup(MAX_CONNECTIONS_VAR) {
            let max = raw.trim().parse::<u32>().map_err(|e| ConfigError::Invalid {
                var: MAX_CONNECTIONS_VAR,
                reason: e.to_string(),
            })?;
            if max == 0 {
                return Err(ConfigError::Invalid {
                    var: MAX_CONNECTIONS_VAR,
                    reason: "must be at least 1".to_string(),
                });
            }
            config.max_connections = max;
        }

        Ok(config)
    }
}
