//! Dialect adapters.
//!
//! An adapter owns exactly one physical connection plus the buffered result
//! of the last statement (its cursor). Every dialect exposes the same
//! surface through the [`Adapter`] trait:
//!
//! - `connect` / `disconnect`, where `connect` also bootstraps the schema
//! - `execute` with bound parameters, then `fetch_one` / `fetch_all`
//! - `begin_transaction` / `commit` / `rollback`
//! - `reset_session`, the hook the pool uses to hand out a clean session
//!
//! Concrete adapters are [`SqlAdapter`]s parameterised by a [`Driver`], one
//! per dialect. [`DbAdapter`] wraps them in an enum so pools can store any
//! dialect without boxing.
//!
//! sqlx connections run in autocommit mode. Explicit transactions are opened
//! with the dialect's begin statement and tracked in `in_transaction`, which
//! also follows any `BEGIN` / `COMMIT` / `ROLLBACK` the caller executes
//! directly. The flag is informational: `commit`, `rollback` and
//! `reset_session` always send their statements while connected.

mod sql;

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use sql::{Driver, SqlAdapter};

#[cfg(feature = "mysql")]
pub use mysql::{MySqlAdapter, MySqlDriver};
#[cfg(feature = "postgres")]
pub use postgres::{PgAdapter, PgDriver};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteAdapter, SqliteDriver};

use crate::db::macros::impl_adapter_dispatch;
use crate::error::{DbError, DbResult, connection_suggestion};
use crate::models::{AdapterConfig, Dialect, QueryParam, Record};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error};

#[cfg(not(any(feature = "sqlite", feature = "mysql", feature = "postgres")))]
compile_error!("enable at least one of the `sqlite`, `mysql` or `postgres` features");

/// Bookkeeping shared by every adapter, independent of the driver.
#[derive(Debug, Clone)]
pub struct AdapterMeta {
    pub(crate) id: u64,
    pub(crate) dialect: Dialect,
    pub(crate) config: AdapterConfig,
    pub(crate) in_transaction: bool,
    pub(crate) created_at: Instant,
    pub(crate) last_active_at: Instant,
}

impl AdapterMeta {
    pub fn new(id: u64, dialect: Dialect, config: AdapterConfig) -> Self {
        let now = Instant::now();
        Self {
            id,
            dialect,
            config,
            in_transaction: false,
            created_at: now,
            last_active_at: now,
        }
    }

    /// Time since the adapter was created.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn apply(&mut self, effect: TransactionEffect) {
        match effect {
            TransactionEffect::Begin => self.in_transaction = true,
            TransactionEffect::End => self.in_transaction = false,
            TransactionEffect::None => {}
        }
    }
}

/// How a statement changes the transaction state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransactionEffect {
    Begin,
    End,
    None,
}

/// Classify a statement by its leading keywords.
///
/// `ROLLBACK TO [SAVEPOINT]` only unwinds to a savepoint and leaves the
/// transaction open.
pub(crate) fn transaction_effect(sql: &str) -> TransactionEffect {
    let mut words = sql
        .split(|c: char| c.is_whitespace() || c == ';')
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_uppercase);

    match words.next().as_deref() {
        Some("BEGIN") => TransactionEffect::Begin,
        Some("START") if words.next().as_deref() == Some("TRANSACTION") => {
            TransactionEffect::Begin
        }
        Some("COMMIT") | Some("END") => TransactionEffect::End,
        Some("ROLLBACK") if !words.any(|w| w == "TO") => TransactionEffect::End,
        _ => TransactionEffect::None,
    }
}

/// Log a failed statement and convert the driver error.
pub(crate) fn query_failed(meta: &AdapterMeta, sql: &str, err: sqlx::Error) -> DbError {
    let (message, sql_state) = match err.as_database_error() {
        Some(db_err) => (
            db_err.message().to_string(),
            db_err.code().map(|c| c.to_string()),
        ),
        None => (err.to_string(), None),
    };
    error!(
        adapter_id = meta.id,
        dialect = %meta.dialect,
        sql = %sql,
        sql_state = ?sql_state,
        error = %message,
        "Query failed"
    );
    DbError::query(message, sql_state)
}

/// Convert a driver error raised while opening a connection.
pub(crate) fn connect_failed(dialect: Dialect, err: sqlx::Error) -> DbError {
    match err {
        sqlx::Error::Configuration(msg) => DbError::configuration(msg.to_string()),
        other => {
            let message = format!("{} connection failed: {}", dialect, other);
            let suggestion = connection_suggestion(&message);
            DbError::connection(message, suggestion)
        }
    }
}

/// Look up a configuration key the dialect requires.
pub(crate) fn required<'a>(value: &'a Option<String>, key: &str, dialect: Dialect) -> DbResult<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            DbError::configuration(format!(
                "{} configuration is missing required key(s): {}",
                dialect, key
            ))
        })
}

/// Uniform operations over one physical connection.
///
/// Adapters are moved into and out of pools, so a single caller owns an
/// adapter at any time and every mutating method takes `&mut self`.
pub trait Adapter: Send {
    fn meta(&self) -> &AdapterMeta;

    fn meta_mut(&mut self) -> &mut AdapterMeta;

    /// Whether a physical connection is currently open.
    fn is_connected(&self) -> bool;

    /// Open the connection and bootstrap the schema.
    ///
    /// A no-op when already connected.
    fn connect(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// Drop the cursor and close the connection. A no-op when disconnected.
    fn disconnect(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// Run one statement, connecting first if needed.
    ///
    /// Result rows are buffered into the cursor; the return value is the
    /// number of rows affected.
    fn execute(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> impl Future<Output = DbResult<u64>> + Send;

    /// Run a multi-statement script without parameters, then commit.
    /// Rolls back if any statement fails.
    fn execute_script(&mut self, script: &str) -> impl Future<Output = DbResult<()>> + Send;

    /// Pop the next buffered row of the last statement.
    fn fetch_one(&mut self) -> DbResult<Option<Record>>;

    /// Drain every remaining buffered row of the last statement.
    fn fetch_all(&mut self) -> DbResult<Vec<Record>>;

    /// Rows affected by the last statement, if connected.
    fn rows_affected(&self) -> Option<u64>;

    /// Send `COMMIT`. No-op without a connection.
    fn commit(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn rollback(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// Open an explicit transaction. Idempotent.
    fn begin_transaction(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// Roll back anything left open and restore autocommit behaviour.
    fn reset_session(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// Create the bootstrap tables and indexes if absent. Idempotent.
    fn bootstrap_schema(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// Liveness probe (`SELECT 1`). Leaves the cursor untouched.
    fn ping(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn id(&self) -> u64 {
        self.meta().id
    }

    fn dialect(&self) -> Dialect {
        self.meta().dialect
    }

    fn config(&self) -> &AdapterConfig {
        &self.meta().config
    }

    fn in_transaction(&self) -> bool {
        self.meta().in_transaction
    }

    /// Time since the adapter was last returned to its pool.
    fn idle_for(&self) -> Duration {
        self.meta().last_active_at.elapsed()
    }

    /// Stamp the adapter as active now.
    fn touch(&mut self) {
        self.meta_mut().last_active_at = Instant::now();
    }
}

/// An adapter of any compiled-in dialect.
#[derive(Debug)]
pub enum DbAdapter {
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteAdapter),
    #[cfg(feature = "mysql")]
    MySql(MySqlAdapter),
    #[cfg(feature = "postgres")]
    Postgres(PgAdapter),
}

impl DbAdapter {
    /// Build a disconnected adapter for the dialect.
    ///
    /// Fails with `Configuration` when required keys are missing and with
    /// `DriverUnavailable` when the dialect's feature is disabled.
    pub fn new(id: u64, dialect: Dialect, config: AdapterConfig) -> DbResult<Self> {
        config.validate(dialect)?;
        match dialect {
            #[cfg(feature = "sqlite")]
            Dialect::Sqlite => Ok(Self::Sqlite(SqliteAdapter::new(id, config))),
            #[cfg(feature = "mysql")]
            Dialect::MySql => Ok(Self::MySql(MySqlAdapter::new(id, config))),
            #[cfg(feature = "postgres")]
            Dialect::Postgres => Ok(Self::Postgres(PgAdapter::new(id, config))),
            #[allow(unreachable_patterns)]
            _ => Err(DbError::driver_unavailable(dialect.display_name())),
        }
    }
}

impl Adapter for DbAdapter {
    fn meta(&self) -> &AdapterMeta {
        impl_adapter_dispatch!(self, a => a.meta())
    }

    fn meta_mut(&mut self) -> &mut AdapterMeta {
        impl_adapter_dispatch!(self, a => a.meta_mut())
    }

    fn is_connected(&self) -> bool {
        impl_adapter_dispatch!(self, a => a.is_connected())
    }

    async fn connect(&mut self) -> DbResult<()> {
        impl_adapter_dispatch!(self, a => a.connect().await)
    }

    async fn disconnect(&mut self) -> DbResult<()> {
        impl_adapter_dispatch!(self, a => a.disconnect().await)
    }

    async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        impl_adapter_dispatch!(self, a => a.execute(sql, params).await)
    }

    async fn execute_script(&mut self, script: &str) -> DbResult<()> {
        impl_adapter_dispatch!(self, a => a.execute_script(script).await)
    }

    fn fetch_one(&mut self) -> DbResult<Option<Record>> {
        impl_adapter_dispatch!(self, a => a.fetch_one())
    }

    fn fetch_all(&mut self) -> DbResult<Vec<Record>> {
        impl_adapter_dispatch!(self, a => a.fetch_all())
    }

    fn rows_affected(&self) -> Option<u64> {
        impl_adapter_dispatch!(self, a => a.rows_affected())
    }

    async fn commit(&mut self) -> DbResult<()> {
        impl_adapter_dispatch!(self, a => a.commit().await)
    }

    async fn rollback(&mut self) -> DbResult<()> {
        impl_adapter_dispatch!(self, a => a.rollback().await)
    }

    async fn begin_transaction(&mut self) -> DbResult<()> {
        impl_adapter_dispatch!(self, a => a.begin_transaction().await)
    }

    async fn reset_session(&mut self) -> DbResult<()> {
        impl_adapter_dispatch!(self, a => a.reset_session().await)
    }

    async fn bootstrap_schema(&mut self) -> DbResult<()> {
        impl_adapter_dispatch!(self, a => a.bootstrap_schema().await)
    }

    async fn ping(&mut self) -> DbResult<()> {
        impl_adapter_dispatch!(self, a => a.ping().await)
    }
}

/// Check that a database is reachable with the given settings.
///
/// Opens a throwaway connection, runs `SELECT 1` and closes it again. Unlike
/// `connect`, the schema is not bootstrapped.
pub async fn verify_connection(dialect: Dialect, config: &AdapterConfig) -> DbResult<()> {
    config.validate(dialect)?;
    debug!(dialect = %dialect, "Verifying database connection");
    match dialect {
        #[cfg(feature = "sqlite")]
        Dialect::Sqlite => sql::probe::<SqliteDriver>(config).await,
        #[cfg(feature = "mysql")]
        Dialect::MySql => sql::probe::<MySqlDriver>(config).await,
        #[cfg(feature = "postgres")]
        Dialect::Postgres => sql::probe::<PgDriver>(config).await,
        #[allow(unreachable_patterns)]
        _ => Err(DbError::driver_unavailable(dialect.display_name())),
    }
}
