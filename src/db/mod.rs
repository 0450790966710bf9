//! Process-wide PostgreSQL pool.
//!
//! SYSTEM CONTEXT
//! ==============
//! Startup calls `ConnectionManager::init_db` once; anything that needs the
//! database afterwards reads the same handle via `get_db` or through
//! `AppState`. The handle lives for the rest of the process.
//!
//! DESIGN
//! ======
//! The check-and-create sequence runs inside `tokio::sync::OnceCell`, so
//! concurrent first callers wait on one open instead of racing to build
//! several pools. The cell is only filled once the pool is open and fully
//! configured; a failed attempt leaves it empty and the error goes to the
//! caller. Retrying is the caller's call.

use std::sync::Arc;
use std::time::Duration;

use log::LevelFilter;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{ConnectOptions, PgPool};
use time::OffsetDateTime;
use tokio::sync::OnceCell;

use crate::config::{self, ConfigError, DbConfig, EnvLookup};

/// Idle connections the pool is sized for. sqlx cannot cap idle connections
/// directly, so idle ones are closed after `IDLE_TIMEOUT` instead.
pub const MAX_IDLE_CONNS: u32 = 10;
pub const MAX_OPEN_CONNS: u32 = 100;
pub const CONN_MAX_LIFETIME: Duration = Duration::from_secs(60 * 60);
/// How long a connection may sit idle before the pool closes it.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Queries slower than this are logged at WARN.
const SLOW_QUERY_THRESHOLD: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to connect to database: {0}")]
    Connection(#[source] sqlx::Error),
}

// =============================================================================
// DATABASE HANDLE
// =============================================================================

/// The shared database handle: a configured pool plus the UTC clock used for
/// any timestamp the application writes.
pub struct Database {
    pool: PgPool,
    clock: fn() -> OffsetDateTime,
}

impl Database {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool, clock: OffsetDateTime::now_utc }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Current time in UTC, independent of server or client time zone.
    #[must_use]
    pub fn now(&self) -> OffsetDateTime {
        (self.clock)()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("size", &self.pool.size())
            .field("idle", &self.pool.num_idle())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// CONNECTOR
// =============================================================================

/// Opens a pool from fully built options.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, pool: PgPoolOptions, connect: PgConnectOptions) -> Result<PgPool, sqlx::Error>;
}

/// Connects eagerly; fails if the server is unreachable.
pub struct PgConnector;

#[async_trait::async_trait]
impl Connector for PgConnector {
    async fn open(&self, pool: PgPoolOptions, connect: PgConnectOptions) -> Result<PgPool, sqlx::Error> {
        pool.connect_with(connect).await
    }
}

/// Pool bounds. No connections are held open eagerly; a burst's surplus
/// drains back to zero once each connection has been idle for `IDLE_TIMEOUT`.
#[must_use]
pub fn pool_options() -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(MAX_OPEN_CONNS)
        .min_connections(0)
        .idle_timeout(IDLE_TIMEOUT)
        .max_lifetime(CONN_MAX_LIFETIME)
}

/// Build connection options from config. Every session runs in UTC and logs
/// statements through the shared tracing sink.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if `sslmode` is not a PostgreSQL mode.
pub fn connect_options(config: &DbConfig) -> Result<PgConnectOptions, ConfigError> {
    let ssl_mode = config
        .sslmode
        .parse::<PgSslMode>()
        .map_err(|_| ConfigError::Invalid { key: "DB_SSLMODE".into(), value: config.sslmode.clone() })?;

    Ok(PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(&config.name)
        .ssl_mode(ssl_mode)
        .options([("TimeZone", "UTC")])
        .log_statements(LevelFilter::Debug)
        .log_slow_statements(LevelFilter::Warn, SLOW_QUERY_THRESHOLD))
}

// =============================================================================
// CONNECTION MANAGER
// =============================================================================

/// Owns the single `Database` for the process.
pub struct ConnectionManager {
    env: EnvLookup,
    connector: Arc<dyn Connector>,
    db: OnceCell<Arc<Database>>,
}

impl ConnectionManager {
    /// Manager reading `DB_*` from the process environment.
    #[must_use]
    pub fn new() -> Self {
        Self::with_env(config::process_env(), Arc::new(PgConnector))
    }

    #[must_use]
    pub fn with_env(env: EnvLookup, connector: Arc<dyn Connector>) -> Self {
        Self { env, connector, db: OnceCell::new() }
    }

    /// Return the shared handle, opening it on first use.
    ///
    /// Once a handle exists this returns it without reading configuration or
    /// touching the network.
    ///
    /// # Errors
    ///
    /// [`DbError::Config`] if a mandatory variable is missing (no I/O is
    /// attempted), [`DbError::Connection`] if the pool cannot be opened.
    pub async fn init_db(&self) -> Result<Arc<Database>, DbError> {
        let db = self.db.get_or_try_init(|| self.open()).await?;
        Ok(Arc::clone(db))
    }

    /// The shared handle, or `None` if `init_db` has not succeeded yet.
    #[must_use]
    pub fn get_db(&self) -> Option<Arc<Database>> {
        self.db.get().cloned()
    }

    async fn open(&self) -> Result<Arc<Database>, DbError> {
        let config = DbConfig::from_env(&self.env)?;
        let connect = connect_options(&config)?;

        let pool = self
            .connector
            .open(pool_options(), connect)
            .await
            .map_err(DbError::Connection)?;

        tracing::info!(
            host = %config.host,
            database = %config.name,
            max_open = MAX_OPEN_CONNS,
            idle_timeout_secs = IDLE_TIMEOUT.as_secs(),
            "database connection established"
        );
        Ok(Arc::new(Database::new(pool)))
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
