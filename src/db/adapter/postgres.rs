//! PostgreSQL driver.

use super::sql::{Driver, SqlAdapter, collect_results};
use super::{connect_failed, required};
use crate::db::params::bind_postgres_param;
use crate::error::DbResult;
use crate::models::{AdapterConfig, Dialect, QueryParam, Record};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Executor};
use std::collections::VecDeque;

pub type PgAdapter = SqlAdapter<PgDriver>;

#[derive(Debug, Clone, Copy, Default)]
pub struct PgDriver;

impl Driver for PgDriver {
    type Connection = PgConnection;

    const DIALECT: Dialect = Dialect::Postgres;
    const BEGIN: &'static str = "BEGIN";

    async fn open(config: &AdapterConfig) -> DbResult<PgConnection> {
        let host = required(&config.host, "host", Dialect::Postgres)?;
        let user = required(&config.user, "user", Dialect::Postgres)?;
        let database = required(&config.database, "database", Dialect::Postgres)?;

        let mut options = PgConnectOptions::new()
            .host(host)
            .port(config.port_or_default(Dialect::Postgres))
            .username(user)
            .database(database);
        if let Some(password) = config.password.as_deref() {
            options = options.password(password);
        }

        PgConnection::connect_with(&options)
            .await
            .map_err(|e| connect_failed(Dialect::Postgres, e))
    }

    async fn close(connection: PgConnection) -> Result<(), sqlx::Error> {
        connection.close().await
    }

    async fn run(
        connection: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<(VecDeque<Record>, u64), sqlx::Error> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_postgres_param(query, param);
        }
        let (rows, done) = collect_results(connection.fetch_many(query)).await?;
        Ok((rows, done.rows_affected()))
    }

    async fn run_script(connection: &mut PgConnection, script: &str) -> Result<(), sqlx::Error> {
        connection.execute(sqlx::raw_sql(script)).await.map(|_| ())
    }
}
