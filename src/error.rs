//! Error types for the database access layer.
//!
//! Every fallible operation in the crate returns [`DbResult`]. Driver errors
//! are converted through `From<sqlx::Error>` so adapters can use `?` freely;
//! connection failures carry a suggestion aimed at the operator.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Driver unavailable: {dialect} support was not compiled in")]
    DriverUnavailable { dialect: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Query failed: {message}")]
    Query {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    #[error("Illegal state: {message}")]
    IllegalState { message: String },

    #[error("Pool '{pool}' exhausted: could not create a replacement connection")]
    PoolExhausted {
        pool: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Pool '{pool}' is closed")]
    PoolClosed { pool: String },

    #[error("Unknown database: {name}")]
    UnknownDatabase { name: String },

    #[error("Database '{name}' is already registered. Close it before registering again.")]
    DatabaseAlreadyRegistered { name: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a driver unavailable error.
    pub fn driver_unavailable(dialect: impl Into<String>) -> Self {
        Self::DriverUnavailable {
            dialect: dialect.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a query error with optional SQL state.
    pub fn query(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql_state,
        }
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Wrap the error that prevented a pool from creating a replacement adapter.
    pub fn pool_exhausted(pool: impl Into<String>, source: DbError) -> Self {
        Self::PoolExhausted {
            pool: pool.into(),
            source: Box::new(source),
        }
    }

    pub fn pool_closed(pool: impl Into<String>) -> Self {
        Self::PoolClosed { pool: pool.into() }
    }

    pub fn unknown_database(name: impl Into<String>) -> Self {
        Self::UnknownDatabase { name: name.into() }
    }

    pub fn already_registered(name: impl Into<String>) -> Self {
        Self::DatabaseAlreadyRegistered { name: name.into() }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::PoolExhausted { source, .. } => source.suggestion(),
            _ => None,
        }
    }

    /// Get the SQLSTATE reported by the server, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Query { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::PoolExhausted { .. })
    }
}

/// Pick an operator-facing hint from a driver connect failure message.
pub(crate) fn connection_suggestion(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    if lower.contains("access denied")
        || lower.contains("password authentication failed")
        || lower.contains("authentication")
    {
        "Check the user name and password"
    } else if lower.contains("unknown database") || lower.contains("does not exist") {
        "Check that the database exists on the server"
    } else if lower.contains("refused") || lower.contains("timed out") {
        "Check that the database server is running and reachable"
    } else if lower.contains("unable to open database") {
        "Check that the database file path is writable"
    } else {
        "Check the connection settings"
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::configuration(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::query(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => DbError::query("No rows returned", None),
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::PoolClosed => DbError::pool_closed("driver"),
            sqlx::Error::WorkerCrashed => DbError::connection(
                "Database worker crashed",
                "Reconnect to the database",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::query(format!("Failed to decode column {}: {}", index, source), None)
            }
            sqlx::Error::Decode(source) => DbError::query(format!("Decode error: {}", source), None),
            _ => DbError::query(err.to_string(), None),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
