//! Bootstrap schema DDL.
//!
//! Every adapter creates the same three tables on connect: `{prefix}users`,
//! `{prefix}options` and `{prefix}usermeta`, plus their indexes. The
//! statements are a pure function of the dialect and the table prefix so
//! they can be checked without a live database.
//!
//! All statements are create-if-absent, so running them repeatedly is a
//! no-op once the schema exists. MySQL has no `CREATE INDEX IF NOT EXISTS`,
//! so its indexes are declared inline in `CREATE TABLE` instead.

use crate::models::Dialect;

/// Quote an identifier for the dialect.
///
/// Needed for reserved column names such as `group` and `user`.
pub fn quote_ident(dialect: Dialect, ident: &str) -> String {
    match dialect {
        Dialect::MySql => format!("`{}`", ident.replace('`', "``")),
        Dialect::Sqlite | Dialect::Postgres => format!("\"{}\"", ident.replace('"', "\"\"")),
    }
}

/// Column definition for an auto-incrementing integer primary key.
fn auto_increment_pk(dialect: Dialect, column: &str) -> String {
    match dialect {
        Dialect::Sqlite => format!("{} INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT", column),
        Dialect::MySql => format!("{} INT NOT NULL PRIMARY KEY AUTO_INCREMENT", column),
        Dialect::Postgres => format!("{} SERIAL NOT NULL PRIMARY KEY", column),
    }
}

/// Trailing table options after the closing parenthesis.
fn table_options(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::MySql => " ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
        Dialect::Sqlite | Dialect::Postgres => "",
    }
}

/// Index names, columns and uniqueness for one table.
struct IndexDef {
    name: String,
    columns: Vec<String>,
    unique: bool,
}

fn options_indexes(dialect: Dialect, prefix: &str) -> Vec<IndexDef> {
    vec![IndexDef {
        name: format!("{}options__name_user", prefix),
        columns: vec!["name".to_string(), quote_ident(dialect, "user")],
        unique: true,
    }]
}

fn usermeta_indexes(prefix: &str) -> Vec<IndexDef> {
    vec![
        IndexDef {
            name: format!("{}usermeta_user_id", prefix),
            columns: vec!["user_id".to_string()],
            unique: false,
        },
        IndexDef {
            name: format!("{}usermeta_meta_key", prefix),
            columns: vec!["meta_key".to_string()],
            unique: false,
        },
        IndexDef {
            name: format!("{}usermeta_user_meta", prefix),
            columns: vec!["user_id".to_string(), "meta_key".to_string()],
            unique: false,
        },
    ]
}

/// Render a CREATE TABLE statement, inlining indexes for MySQL.
fn create_table(dialect: Dialect, table: &str, columns: &[String], indexes: &[IndexDef]) -> String {
    let mut body: Vec<String> = columns.to_vec();
    if dialect == Dialect::MySql {
        body.extend(indexes.iter().map(|idx| {
            format!(
                "{}KEY {} ({})",
                if idx.unique { "UNIQUE " } else { "" },
                idx.name,
                idx.columns.join(", ")
            )
        }));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n){}",
        table,
        body.join(",\n    "),
        table_options(dialect)
    )
}

fn create_indexes(dialect: Dialect, table: &str, indexes: &[IndexDef]) -> Vec<String> {
    if dialect == Dialect::MySql {
        return Vec::new();
    }
    indexes
        .iter()
        .map(|idx| {
            format!(
                "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
                if idx.unique { "UNIQUE " } else { "" },
                idx.name,
                table,
                idx.columns.join(", ")
            )
        })
        .collect()
}

fn users_columns(dialect: Dialect) -> Vec<String> {
    let uid = match dialect {
        // INTEGER PRIMARY KEY aliases the rowid and assigns ids on its own
        Dialect::Sqlite => "uid INTEGER NOT NULL PRIMARY KEY".to_string(),
        _ => auto_increment_pk(dialect, "uid"),
    };
    vec![
        uid,
        "name VARCHAR(32) DEFAULT NULL".to_string(),
        "password VARCHAR(64) DEFAULT NULL".to_string(),
        "mail VARCHAR(150) DEFAULT NULL".to_string(),
        "url VARCHAR(150) DEFAULT NULL".to_string(),
        "createdAt INTEGER DEFAULT 0".to_string(),
        "lastLogin INTEGER DEFAULT 0".to_string(),
        "isActive INTEGER DEFAULT 0".to_string(),
        "isLoggedIn INTEGER DEFAULT 0".to_string(),
        format!("{} VARCHAR(16) DEFAULT 'visitor'", quote_ident(dialect, "group")),
    ]
}

fn options_columns(dialect: Dialect) -> Vec<String> {
    vec![
        "name VARCHAR(32) NOT NULL".to_string(),
        format!("{} INTEGER DEFAULT 0 NOT NULL", quote_ident(dialect, "user")),
        "value TEXT".to_string(),
    ]
}

fn usermeta_columns(dialect: Dialect, users_table: &str) -> Vec<String> {
    vec![
        auto_increment_pk(dialect, "umeta_id"),
        "user_id INTEGER NOT NULL".to_string(),
        "meta_key VARCHAR(255) NOT NULL".to_string(),
        "meta_value TEXT".to_string(),
        "created_at INTEGER DEFAULT 0".to_string(),
        "updated_at INTEGER DEFAULT 0".to_string(),
        format!(
            "FOREIGN KEY (user_id) REFERENCES {} (uid) ON DELETE CASCADE",
            users_table
        ),
    ]
}

/// Names of the tables the bootstrap creates, in creation order.
pub fn table_names(prefix: &str) -> [String; 3] {
    [
        format!("{}users", prefix),
        format!("{}options", prefix),
        format!("{}usermeta", prefix),
    ]
}

/// Every DDL statement needed to bootstrap the schema, in execution order.
///
/// `users` comes before `usermeta` because of the foreign key.
pub fn bootstrap_statements(dialect: Dialect, prefix: &str) -> Vec<String> {
    let [users, options, usermeta] = table_names(prefix);
    let options_idx = options_indexes(dialect, prefix);
    let usermeta_idx = usermeta_indexes(prefix);

    let mut statements = vec![create_table(dialect, &users, &users_columns(dialect), &[])];

    statements.push(create_table(
        dialect,
        &options,
        &options_columns(dialect),
        &options_idx,
    ));
    statements.extend(create_indexes(dialect, &options, &options_idx));

    statements.push(create_table(
        dialect,
        &usermeta,
        &usermeta_columns(dialect, &users),
        &usermeta_idx,
    ));
    statements.extend(create_indexes(dialect, &usermeta, &usermeta_idx));

    statements
}
