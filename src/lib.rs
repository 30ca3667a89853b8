//! Database access layer for SQLite, MySQL and PostgreSQL.
//!
//! The crate is organised in three layers:
//!
//! - [`db::adapter`]: one physical connection per adapter, with a uniform
//!   [`Adapter`] trait over every dialect
//! - [`db::pool`]: a bounded, validating [`ConnectionPool`] per database
//! - [`db::registry`]: a [`Registry`] of named pools with a default
//!
//! ```ignore
//! let registry = Registry::new();
//! registry
//!     .register("main", Dialect::Sqlite, AdapterConfig::sqlite("app.db"), &PoolOptions::default())
//!     .await?;
//!
//! let mut adapter = registry.get(None).await?;
//! adapter.execute("SELECT name FROM users WHERE uid = ?", &[1.into()]).await?;
//! let row = adapter.fetch_one()?;
//! registry.put(adapter, None).await;
//!
//! registry.close_all().await;
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{Config, PoolOptions};
pub use db::{Adapter, ConnectionPool, DbAdapter, PooledAdapter, Registry};
pub use error::{DbError, DbResult};
pub use models::{AdapterConfig, Dialect, PoolStatus, QueryParam, Record};
