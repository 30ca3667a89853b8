//! Driver-generic adapter implementation.
//!
//! [`SqlAdapter`] holds the session state and the transaction bookkeeping;
//! a [`Driver`] supplies the dialect specifics (how to open and close a
//! connection, how to run a statement, how to reset a session).

use super::{Adapter, AdapterMeta, query_failed, transaction_effect};
use crate::db::schema;
use crate::db::types::RowToRecord;
use crate::error::{DbError, DbResult};
use crate::models::{AdapterConfig, Dialect, QueryParam, Record};
use futures_util::TryStreamExt;
use futures_util::stream::BoxStream;
use sqlx::Either;
use std::collections::VecDeque;
use std::future::Future;
use std::marker::PhantomData;
use tracing::{debug, info, warn};

/// Dialect-specific connection handling.
pub trait Driver: Send + Sync + 'static {
    type Connection: Send;

    const DIALECT: Dialect;

    /// Statement that opens an explicit transaction.
    const BEGIN: &'static str;

    /// Open a new physical connection.
    fn open(config: &AdapterConfig) -> impl Future<Output = DbResult<Self::Connection>> + Send;

    /// Gracefully close a connection.
    fn close(connection: Self::Connection) -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    /// Run one statement and collect its rows and rows-affected count.
    fn run(
        connection: &mut Self::Connection,
        sql: &str,
        params: &[QueryParam],
    ) -> impl Future<Output = Result<(VecDeque<Record>, u64), sqlx::Error>> + Send;

    /// Run an unprepared multi-statement script.
    fn run_script(
        connection: &mut Self::Connection,
        script: &str,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    /// Statements that return a pooled session to autocommit with nothing
    /// pending. Sent whether or not a transaction is known to be open.
    fn reset_statements() -> &'static [&'static str] {
        &["ROLLBACK"]
    }

    /// Whether `err` only reports that there was no transaction to end.
    fn is_no_transaction(_err: &sqlx::Error) -> bool {
        false
    }
}

/// Drain a `fetch_many` stream into buffered records plus the merged
/// query result.
pub(crate) async fn collect_results<Q, R>(
    mut stream: BoxStream<'_, Result<Either<Q, R>, sqlx::Error>>,
) -> Result<(VecDeque<Record>, Q), sqlx::Error>
where
    Q: Default + Extend<Q> + Send,
    R: RowToRecord,
{
    let mut rows = VecDeque::new();
    let mut done = Q::default();
    while let Some(item) = stream.try_next().await? {
        match item {
            Either::Left(result) => done.extend(std::iter::once(result)),
            Either::Right(row) => rows.push_back(row.to_record()),
        }
    }
    Ok((rows, done))
}

/// Result buffer of the last statement.
#[derive(Debug, Default)]
struct Cursor {
    rows: VecDeque<Record>,
    rows_affected: u64,
}

/// An open connection together with its cursor.
struct Session<C> {
    connection: C,
    cursor: Cursor,
}

/// Adapter over a single connection of dialect `D`.
pub struct SqlAdapter<D: Driver> {
    meta: AdapterMeta,
    session: Option<Session<D::Connection>>,
    _driver: PhantomData<D>,
}

impl<D: Driver> std::fmt::Debug for SqlAdapter<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlAdapter")
            .field("meta", &self.meta)
            .field("connected", &self.session.is_some())
            .finish()
    }
}

impl<D: Driver> SqlAdapter<D> {
    pub fn new(id: u64, config: AdapterConfig) -> Self {
        Self {
            meta: AdapterMeta::new(id, D::DIALECT, config),
            session: None,
            _driver: PhantomData,
        }
    }

    fn session_mut(&mut self) -> DbResult<&mut Session<D::Connection>> {
        let id = self.meta.id;
        self.session.as_mut().ok_or_else(|| {
            DbError::illegal_state(format!("adapter {} has no open connection", id))
        })
    }

    async fn open_session(&mut self) -> DbResult<()> {
        self.meta.config.validate(D::DIALECT)?;
        let connection = D::open(&self.meta.config).await?;
        self.session = Some(Session {
            connection,
            cursor: Cursor::default(),
        });
        self.meta.in_transaction = false;
        debug!(
            adapter_id = self.meta.id,
            dialect = %D::DIALECT,
            "Connection opened"
        );
        Ok(())
    }

    async fn close_session(&mut self) -> DbResult<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        self.meta.in_transaction = false;
        D::close(session.connection).await.map_err(DbError::from)?;
        debug!(
            adapter_id = self.meta.id,
            dialect = %D::DIALECT,
            "Connection closed"
        );
        Ok(())
    }

    /// Open the session and create the schema, closing again on failure.
    async fn open_and_bootstrap(&mut self) -> DbResult<()> {
        self.open_session().await?;
        if let Err(e) = self.create_schema().await {
            if let Err(close_err) = self.close_session().await {
                warn!(
                    adapter_id = self.meta.id,
                    error = %close_err,
                    "Failed to close connection after bootstrap failure"
                );
            }
            return Err(e);
        }
        Ok(())
    }

    async fn ensure_connected(&mut self) -> DbResult<()> {
        if self.session.is_some() {
            Ok(())
        } else {
            self.open_and_bootstrap().await
        }
    }

    /// Run a statement into the cursor. Requires an open session.
    async fn run(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let session = self.session_mut()?;
        let result = D::run(&mut session.connection, sql, params).await;
        match result {
            Ok((rows, rows_affected)) => {
                session.cursor = Cursor {
                    rows,
                    rows_affected,
                };
                self.meta.apply(transaction_effect(sql));
                Ok(rows_affected)
            }
            Err(e) => {
                session.cursor = Cursor::default();
                Err(query_failed(&self.meta, sql, e))
            }
        }
    }

    /// Run a control statement without touching the cursor.
    async fn control(&mut self, sql: &str) -> DbResult<()> {
        let session = self.session_mut()?;
        let result = D::run(&mut session.connection, sql, &[]).await;
        match result {
            Ok(_) => {
                self.meta.apply(transaction_effect(sql));
                Ok(())
            }
            Err(e) => Err(query_failed(&self.meta, sql, e)),
        }
    }

    async fn create_schema(&mut self) -> DbResult<()> {
        let statements = schema::bootstrap_statements(D::DIALECT, &self.meta.config.prefix);
        for statement in &statements {
            self.control(statement).await?;
        }
        if self.meta.in_transaction {
            self.finish_transaction("COMMIT").await?;
        }
        debug!(
            adapter_id = self.meta.id,
            prefix = %self.meta.config.prefix,
            statements = statements.len(),
            "Schema bootstrapped"
        );
        Ok(())
    }

    /// Send a statement that ends any open transaction and clear the flag.
    ///
    /// The statement always reaches the driver: a transaction may have been
    /// opened by a `SAVEPOINT` or with autocommit switched off, neither of
    /// which sets `in_transaction`. A driver error saying there was nothing
    /// to end counts as success.
    async fn finish_transaction(&mut self, statement: &str) -> DbResult<()> {
        let Some(session) = self.session.as_mut() else {
            self.meta.in_transaction = false;
            return Ok(());
        };
        match D::run(&mut session.connection, statement, &[]).await {
            Ok(_) => {}
            Err(e) if D::is_no_transaction(&e) => {
                debug!(
                    adapter_id = self.meta.id,
                    statement = %statement,
                    "No transaction was open"
                );
            }
            Err(e) => return Err(query_failed(&self.meta, statement, e)),
        }
        self.meta.in_transaction = false;
        Ok(())
    }
}

impl<D: Driver> Adapter for SqlAdapter<D> {
    fn meta(&self) -> &AdapterMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut AdapterMeta {
        &mut self.meta
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    async fn connect(&mut self) -> DbResult<()> {
        if self.session.is_some() {
            return Ok(());
        }
        self.open_and_bootstrap().await?;
        info!(
            adapter_id = self.meta.id,
            dialect = %D::DIALECT,
            "Adapter connected"
        );
        Ok(())
    }

    async fn disconnect(&mut self) -> DbResult<()> {
        self.close_session().await
    }

    async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        self.ensure_connected().await?;
        self.run(sql, params).await
    }

    async fn execute_script(&mut self, script: &str) -> DbResult<()> {
        self.ensure_connected().await?;
        let session = self.session_mut()?;
        session.cursor = Cursor::default();
        let result = D::run_script(&mut session.connection, script).await;
        match result {
            Ok(()) => self.finish_transaction("COMMIT").await,
            Err(e) => {
                let err = query_failed(&self.meta, script, e);
                if let Err(rollback_err) = self.finish_transaction("ROLLBACK").await {
                    warn!(
                        adapter_id = self.meta.id,
                        error = %rollback_err,
                        "Rollback after failed script also failed"
                    );
                }
                Err(err)
            }
        }
    }

    fn fetch_one(&mut self) -> DbResult<Option<Record>> {
        Ok(self.session_mut()?.cursor.rows.pop_front())
    }

    fn fetch_all(&mut self) -> DbResult<Vec<Record>> {
        Ok(self.session_mut()?.cursor.rows.drain(..).collect())
    }

    fn rows_affected(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.cursor.rows_affected)
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.finish_transaction("COMMIT").await
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.finish_transaction("ROLLBACK").await
    }

    async fn begin_transaction(&mut self) -> DbResult<()> {
        self.ensure_connected().await?;
        if self.meta.in_transaction {
            return Ok(());
        }
        self.control(D::BEGIN).await?;
        self.meta.in_transaction = true;
        Ok(())
    }

    async fn reset_session(&mut self) -> DbResult<()> {
        if let Some(session) = self.session.as_mut() {
            session.cursor = Cursor::default();
        }
        for statement in D::reset_statements() {
            self.finish_transaction(statement).await?;
        }
        self.meta.in_transaction = false;
        Ok(())
    }

    async fn bootstrap_schema(&mut self) -> DbResult<()> {
        if self.session.is_none() {
            return self.open_and_bootstrap().await;
        }
        self.create_schema().await
    }

    async fn ping(&mut self) -> DbResult<()> {
        self.control("SELECT 1").await
    }
}

/// Open a connection, probe it and close it, without touching the schema.
pub(crate) async fn probe<D: Driver>(config: &AdapterConfig) -> DbResult<()> {
    let mut connection = D::open(config).await?;
    let result = D::run(&mut connection, "SELECT 1", &[]).await;
    if let Err(e) = D::close(connection).await {
        warn!(dialect = %D::DIALECT, error = %e, "Failed to close probe connection");
    }
    result.map(|_| ()).map_err(DbError::from)
}
