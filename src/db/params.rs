//! Binding of `QueryParam` values to dialect queries.
//!
//! Placeholders are never rewritten: SQLite and MySQL take `?`, PostgreSQL
//! takes `$1`, `$2`, ...

use crate::models::QueryParam;

macro_rules! impl_bind_param {
    ($(#[$attr:meta])* $name:ident<$q:lifetime>, $db:ty, $args:ty) => {
        $(#[$attr])*
        pub(crate) fn $name<$q>(
            query: sqlx::query::Query<$q, $db, $args>,
            param: &$q QueryParam,
        ) -> sqlx::query::Query<$q, $db, $args> {
            match param {
                // Untyped NULL; the server infers the column type
                QueryParam::Null => query.bind(None::<String>),
                QueryParam::Bool(v) => query.bind(*v),
                QueryParam::Int(v) => query.bind(*v),
                QueryParam::Float(v) => query.bind(*v),
                QueryParam::String(v) => query.bind(v.as_str()),
                QueryParam::Bytes(v) => query.bind(v.as_slice()),
            }
        }
    };
}

impl_bind_param!(
    /// Bind a parameter to a MySQL query.
    #[cfg(feature = "mysql")]
    bind_mysql_param<'q>,
    sqlx::MySql,
    sqlx::mysql::MySqlArguments
);

impl_bind_param!(
    /// Bind a parameter to a PostgreSQL query.
    #[cfg(feature = "postgres")]
    bind_postgres_param<'q>,
    sqlx::Postgres,
    sqlx::postgres::PgArguments
);

impl_bind_param!(
    /// Bind a parameter to a SQLite query.
    #[cfg(feature = "sqlite")]
    bind_sqlite_param<'q>,
    sqlx::Sqlite,
    sqlx::sqlite::SqliteArguments<'q>
);
