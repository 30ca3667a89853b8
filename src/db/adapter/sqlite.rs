//! Embedded SQLite driver.

use super::sql::{Driver, SqlAdapter, collect_results};
use super::connect_failed;
use crate::db::params::bind_sqlite_param;
use crate::error::{DbError, DbResult};
use crate::models::{AdapterConfig, Dialect, QueryParam, Record};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{Connection, Executor};
use std::collections::VecDeque;

pub type SqliteAdapter = SqlAdapter<SqliteDriver>;

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

impl Driver for SqliteDriver {
    type Connection = SqliteConnection;

    const DIALECT: Dialect = Dialect::Sqlite;
    const BEGIN: &'static str = "BEGIN";

    async fn open(config: &AdapterConfig) -> DbResult<SqliteConnection> {
        let path = config.path.as_deref().ok_or_else(|| {
            DbError::configuration("SQLite configuration is missing required key(s): path")
        })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DbError::connection(
                    format!("Cannot create directory {}: {}", parent.display(), e),
                    "Check that the database directory is writable",
                )
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        SqliteConnection::connect_with(&options)
            .await
            .map_err(|e| connect_failed(Dialect::Sqlite, e))
    }

    async fn close(connection: SqliteConnection) -> Result<(), sqlx::Error> {
        connection.close().await
    }

    async fn run(
        connection: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<(VecDeque<Record>, u64), sqlx::Error> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_sqlite_param(query, param);
        }
        let (rows, done) = collect_results(connection.fetch_many(query)).await?;
        Ok((rows, done.rows_affected()))
    }

    async fn run_script(connection: &mut SqliteConnection, script: &str) -> Result<(), sqlx::Error> {
        connection.execute(sqlx::raw_sql(script)).await.map(|_| ())
    }

    /// SQLite rejects COMMIT / ROLLBACK outside a transaction.
    fn is_no_transaction(err: &sqlx::Error) -> bool {
        err.as_database_error()
            .is_some_and(|e| e.message().contains("no transaction is active"))
    }
}
