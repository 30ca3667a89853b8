//! Data models shared by adapters, pools and the registry.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

pub use connection::{AdapterConfig, Dialect, PoolStatus};
pub use query::{QueryParam, Record};
