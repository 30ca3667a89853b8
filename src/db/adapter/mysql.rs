//! MySQL / MariaDB driver.

use super::sql::{Driver, SqlAdapter, collect_results};
use super::{connect_failed, required};
use crate::db::params::bind_mysql_param;
use crate::error::DbResult;
use crate::models::{AdapterConfig, Dialect, QueryParam, Record};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{Connection, Executor};
use std::collections::VecDeque;

pub type MySqlAdapter = SqlAdapter<MySqlDriver>;

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDriver;

impl Driver for MySqlDriver {
    type Connection = MySqlConnection;

    const DIALECT: Dialect = Dialect::MySql;
    const BEGIN: &'static str = "START TRANSACTION";

    async fn open(config: &AdapterConfig) -> DbResult<MySqlConnection> {
        let host = required(&config.host, "host", Dialect::MySql)?;
        let user = required(&config.user, "user", Dialect::MySql)?;
        let database = required(&config.database, "database", Dialect::MySql)?;

        let mut options = MySqlConnectOptions::new()
            .host(host)
            .port(config.port_or_default(Dialect::MySql))
            .username(user)
            .database(database)
            .charset("utf8mb4");
        if let Some(password) = config.password.as_deref() {
            options = options.password(password);
        }

        MySqlConnection::connect_with(&options)
            .await
            .map_err(|e| connect_failed(Dialect::MySql, e))
    }

    async fn close(connection: MySqlConnection) -> Result<(), sqlx::Error> {
        connection.close().await
    }

    async fn run(
        connection: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<(VecDeque<Record>, u64), sqlx::Error> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_mysql_param(query, param);
        }
        let (rows, done) = collect_results(connection.fetch_many(query)).await?;
        Ok((rows, done.rows_affected()))
    }

    async fn run_script(connection: &mut MySqlConnection, script: &str) -> Result<(), sqlx::Error> {
        connection.execute(sqlx::raw_sql(script)).await.map(|_| ())
    }

    /// Always roll back first: `SET autocommit = 1` commits pending work if
    /// the caller had switched autocommit off.
    fn reset_statements() -> &'static [&'static str] {
        &["ROLLBACK", "SET autocommit = 1"]
    }
}
