//! Environment configuration helpers.
//!
//! DESIGN
//! ======
//! Configuration is read through an `EnvLookup` rather than straight from
//! `std::env`, so callers that own a singleton (see `db::ConnectionManager`)
//! can be pointed at a fixed source. `process_env` is the production lookup.

use std::sync::Arc;

/// Source of configuration values, keyed by variable name.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Lookup backed by the process environment.
#[must_use]
pub fn process_env() -> EnvLookup {
    Arc::new(|key: &str| std::env::var(key).ok())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("environment variable {key} is mandatory")]
    Missing { key: String },
    #[error("environment variable {key} has invalid value {value:?}")]
    Invalid { key: String, value: String },
}

impl ConfigError {
    /// Name of the offending variable.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Missing { key } | Self::Invalid { key, .. } => key,
        }
    }
}

/// Read a mandatory variable. Absence fails closed with the key name.
///
/// # Errors
///
/// Returns [`ConfigError::Missing`] if `key` is not set.
pub fn required(env: &EnvLookup, key: &str) -> Result<String, ConfigError> {
    env(key).ok_or_else(|| ConfigError::Missing { key: key.to_owned() })
}

/// Read an optional variable, falling back to `default` when unset.
#[must_use]
pub fn or_default(env: &EnvLookup, key: &str, default: &str) -> String {
    env(key).unwrap_or_else(|| default.to_owned())
}

// =============================================================================
// DATABASE CONFIG
// =============================================================================

pub const DEFAULT_DB_PORT: &str = "5432";
pub const DEFAULT_DB_SSLMODE: &str = "disable";

const SSL_MODES: [&str; 6] = ["disable", "allow", "prefer", "require", "verify-ca", "verify-full"];

/// PostgreSQL connection parameters.
///
/// Required:
/// - `DB_HOST`, `DB_USER`, `DB_PASSWORD`, `DB_NAME`
///
/// Optional:
/// - `DB_PORT`: default `5432`
/// - `DB_SSLMODE`: default `disable`
#[derive(Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub name: String,
    pub port: u16,
    pub sslmode: String,
}

impl DbConfig {
    /// Read the database configuration from `env`.
    ///
    /// Mandatory keys are checked in declaration order, so the first missing
    /// one is the one reported.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] for an absent mandatory key and
    /// [`ConfigError::Invalid`] for an unparseable port or unknown sslmode.
    pub fn from_env(env: &EnvLookup) -> Result<Self, ConfigError> {
        let host = required(env, "DB_HOST")?;
        let user = required(env, "DB_USER")?;
        let password = required(env, "DB_PASSWORD")?;
        let name = required(env, "DB_NAME")?;

        let raw_port = or_default(env, "DB_PORT", DEFAULT_DB_PORT);
        let port = raw_port
            .parse::<u16>()
            .map_err(|_| ConfigError::Invalid { key: "DB_PORT".into(), value: raw_port.clone() })?;

        let sslmode = or_default(env, "DB_SSLMODE", DEFAULT_DB_SSLMODE);
        if !SSL_MODES.contains(&sslmode.as_str()) {
            return Err(ConfigError::Invalid { key: "DB_SSLMODE".into(), value: sslmode });
        }

        Ok(Self { host, user, password, name, port, sslmode })
    }
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .field("port", &self.port)
            .field("sslmode", &self.sslmode)
            .finish()
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
