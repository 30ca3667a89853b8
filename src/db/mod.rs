//! Database access layer.
//!
//! This module provides:
//! - Dialect adapters over a single physical connection
//! - A bounded, validating connection pool per database
//! - A registry of named pools
//! - Bootstrap schema DDL, parameter binding and row decoding

pub(crate) mod macros;
pub mod adapter;
pub mod params;
pub mod pool;
pub mod registry;
pub mod schema;
pub mod types;

pub use adapter::{Adapter, AdapterMeta, DbAdapter, verify_connection};
pub use pool::{ConnectionPool, PooledAdapter};
pub use registry::Registry;
