//! Connection-related data models.
//!
//! This module defines the dialect enum, per-adapter connection settings and
//! the pool status snapshot.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Sqlite,
    /// Includes MariaDB
    MySql,
    #[serde(alias = "postgresql")]
    Postgres,
}

impl Dialect {
    /// Parse the dialect from a connection string scheme.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::Postgres)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySql)
        } else if lower.starts_with("sqlite:") {
            Some(Self::Sqlite)
        } else {
            None
        }
    }

    /// Get the display name for this dialect.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Sqlite => "SQLite",
            Self::MySql => "MySQL",
            Self::Postgres => "PostgreSQL",
        }
    }

    /// Get the default port for client/server dialects.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Sqlite => None,
            Self::MySql => Some(3306),
            Self::Postgres => Some(5432),
        }
    }

    /// Whether the driver for this dialect was compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            Self::Sqlite => cfg!(feature = "sqlite"),
            Self::MySql => cfg!(feature = "mysql"),
            Self::Postgres => cfg!(feature = "postgres"),
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for Dialect {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "mysql" | "mariadb" => Ok(Self::MySql),
            "postgresql" | "postgres" | "pg" => Ok(Self::Postgres),
            other => Err(DbError::configuration(format!(
                "Unsupported database type '{}'. Expected sqlite, mysql or postgresql",
                other
            ))),
        }
    }
}

/// Connection settings for a single adapter.
///
/// SQLite uses `path`; MySQL and PostgreSQL use `host`, `port`, `user`,
/// `password` and `database`. All dialects honour `prefix`, which is
/// prepended to every bootstrapped table and index name.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    /// Contains sensitive data - never log
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub prefix: String,
}

impl AdapterConfig {
    /// Settings for an embedded SQLite database file.
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Settings for a MySQL or PostgreSQL server.
    pub fn server(
        host: impl Into<String>,
        user: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: Some(host.into()),
            user: Some(user.into()),
            database: Some(database.into()),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Port to connect to, falling back to the dialect's well-known port.
    pub fn port_or_default(&self, dialect: Dialect) -> u16 {
        self.port
            .or_else(|| dialect.default_port())
            .unwrap_or_default()
    }

    /// Check that every key the dialect needs is present and the prefix is
    /// safe to splice into DDL.
    pub fn validate(&self, dialect: Dialect) -> DbResult<()> {
        if !self
            .prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(DbError::configuration(format!(
                "Table prefix '{}' may only contain ASCII letters, digits and '_'",
                self.prefix
            )));
        }

        let missing: Vec<&str> = match dialect {
            Dialect::Sqlite => {
                let empty = self.path.as_ref().is_none_or(|p| p.as_os_str().is_empty());
                if empty { vec!["path"] } else { Vec::new() }
            }
            Dialect::MySql | Dialect::Postgres => [
                ("host", &self.host),
                ("user", &self.user),
                ("database", &self.database),
            ]
            .into_iter()
            .filter(|(_, v)| v.as_deref().is_none_or(str::is_empty))
            .map(|(k, _)| k)
            .collect(),
        };

        if missing.is_empty() {
            Ok(())
        } else {
            Err(DbError::configuration(format!(
                "{} configuration is missing required key(s): {}",
                dialect,
                missing.join(", ")
            )))
        }
    }
}

impl std::fmt::Debug for AdapterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterConfig")
            .field("path", &self.path)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("database", &self.database)
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// Point-in-time view of a connection pool, safe to serialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub name: String,
    pub dialect: Dialect,
    pub capacity: usize,
    pub max_idle_secs: u64,
    /// Adapters waiting in the idle queue
    pub idle: usize,
    /// Adapters alive in the pool, idle or checked out
    pub live: usize,
    pub created: u64,
    pub disposed: u64,
    pub closed: bool,
}

impl PoolStatus {
    /// Adapters currently held by callers.
    pub fn checked_out(&self) -> usize {
        self.live.saturating_sub(self.idle)
    }
}
