//! Adapter dispatch macro.
//!
//! `DbAdapter` wraps one concrete adapter per compiled-in dialect. The macro
//! below expands to a `match` with one arm per enabled cargo feature, so
//! every delegating method stays a one-liner.

/// Dispatch an expression over the `DbAdapter` variants.
///
/// # Example
///
/// ```ignore
/// impl_adapter_dispatch!(self, a => a.connect().await)
/// ```
macro_rules! impl_adapter_dispatch {
    ($adapter:expr, $a:ident => $body:expr) => {
        match $adapter {
            #[cfg(feature = "sqlite")]
            $crate::db::adapter::DbAdapter::Sqlite($a) => $body,
            #[cfg(feature = "mysql")]
            $crate::db::adapter::DbAdapter::MySql($a) => $body,
            #[cfg(feature = "postgres")]
            $crate::db::adapter::DbAdapter::Postgres($a) => $body,
        }
    };
}

pub(crate) use impl_adapter_dispatch;
