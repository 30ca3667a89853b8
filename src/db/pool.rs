//! Bounded connection pool over dialect adapters.
//!
//! A pool owns up to `capacity` idle adapters for one database. Adapters are
//! moved out on [`ConnectionPool::checkout`] and moved back on
//! [`ConnectionPool::checkin`]; the pool never shares an adapter between
//! callers.
//!
//! # Invariants
//!
//! - `idle.len() <= capacity`
//! - `live_count == created - disposed`
//! - After `close()` no adapter is handed out and every returned adapter is
//!   disposed
//!
//! # Lock Ordering
//!
//! The state mutex is a `std::sync::Mutex` and is only held for queue and
//! counter updates. Connecting, probing and disconnecting always happen
//! after the guard is released.
//!
//! # Growth
//!
//! When the idle queue is empty a new adapter is created on demand, so more
//! than `capacity` adapters may be live at once. Surplus adapters are
//! disposed when they come back and the idle queue is already full.

use crate::config::PoolOptions;
use crate::db::adapter::{Adapter, DbAdapter};
use crate::error::{DbError, DbResult};
use crate::models::{AdapterConfig, Dialect, PoolStatus};
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct PoolState {
    idle: VecDeque<DbAdapter>,
    live_count: usize,
    closed: bool,
    created: u64,
    disposed: u64,
}

impl PoolState {
    /// Give back the slot of a disposed adapter.
    ///
    /// Saturates at 0 to prevent underflow from a double disposal.
    fn release_slot(&mut self, pool: &str) {
        match self.live_count.checked_sub(1) {
            Some(n) => {
                self.live_count = n;
                self.disposed += 1;
            }
            None => {
                warn!(pool = %pool, "Live count underflow detected - adapter disposed twice");
            }
        }
    }
}

pub struct ConnectionPool {
    name: String,
    dialect: Dialect,
    config: AdapterConfig,
    capacity: usize,
    max_idle: Duration,
    state: Mutex<PoolState>,
    next_adapter_id: AtomicU64,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("name", &self.name)
            .field("dialect", &self.dialect)
            .field("config", &self.config)
            .field("capacity", &self.capacity)
            .field("max_idle", &self.max_idle)
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Create a pool and pre-warm it with `pool_size` connected adapters.
    ///
    /// Invalid settings and missing drivers fail immediately. A database
    /// that cannot be reached is not fatal: the failure is logged and the
    /// pool grows on demand once the database is back.
    pub async fn new(
        name: impl Into<String>,
        dialect: Dialect,
        config: AdapterConfig,
        options: &PoolOptions,
    ) -> DbResult<Self> {
        let name = name.into();
        options.validate().map_err(DbError::configuration)?;
        config.validate(dialect)?;
        if !dialect.is_available() {
            return Err(DbError::driver_unavailable(dialect.display_name()));
        }

        let pool = Self {
            name,
            dialect,
            config,
            capacity: options.pool_size_or_default(),
            max_idle: options.max_idle_or_default(),
            state: Mutex::new(PoolState::default()),
            next_adapter_id: AtomicU64::new(1),
        };

        for _ in 0..pool.capacity {
            match pool.create_adapter().await {
                Ok(adapter) => pool.lock_state().idle.push_back(adapter),
                Err(e @ (DbError::Configuration { .. } | DbError::DriverUnavailable { .. })) => {
                    pool.close().await;
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        pool = %pool.name,
                        dialect = %pool.dialect,
                        error = %e,
                        "Pre-warm failed, adapters will be created on demand"
                    );
                    break;
                }
            }
        }

        info!(
            pool = %pool.name,
            dialect = %pool.dialect,
            capacity = pool.capacity,
            idle = pool.idle_count(),
            "Connection pool ready"
        );
        Ok(pool)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_idle(&self) -> Duration {
        self.max_idle
    }

    pub fn idle_count(&self) -> usize {
        self.lock_state().idle.len()
    }

    /// Adapters alive in the pool, idle or checked out.
    pub fn live_count(&self) -> usize {
        self.lock_state().live_count
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    /// Hand out a validated adapter with a clean session.
    ///
    /// Idle adapters that sat unused longer than `max_idle`, fail the
    /// liveness probe or cannot be reset are replaced transparently.
    pub async fn checkout(&self) -> DbResult<DbAdapter> {
        let candidate = {
            let mut state = self.lock_state();
            if state.closed {
                return Err(DbError::pool_closed(&self.name));
            }
            state.idle.pop_front()
        };

        let Some(mut adapter) = candidate else {
            debug!(pool = %self.name, "Idle queue empty, creating adapter on demand");
            return self.create_adapter().await.map_err(|e| self.exhausted(e));
        };

        match self.revalidate(&mut adapter).await {
            Ok(()) => {
                debug!(pool = %self.name, adapter_id = adapter.id(), "Adapter checked out");
                Ok(adapter)
            }
            Err(reason) => {
                info!(
                    pool = %self.name,
                    adapter_id = adapter.id(),
                    reason = %reason,
                    "Replacing invalid adapter"
                );
                self.dispose(adapter).await;
                self.create_adapter().await.map_err(|e| self.exhausted(e))
            }
        }
    }

    /// Return an adapter to the pool.
    ///
    /// The adapter is disposed instead when the pool is closed or the idle
    /// queue is already full.
    pub async fn checkin(&self, adapter: DbAdapter) {
        if let Some(rejected) = self.try_enqueue(adapter) {
            self.dispose(rejected).await;
        }
    }

    /// Close the pool and dispose every idle adapter. Only the first call
    /// has any effect.
    ///
    /// Adapters still checked out are disposed when they are returned.
    pub async fn close(&self) {
        let drained: Vec<DbAdapter> = {
            let mut state = self.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
            state.idle.drain(..).collect()
        };

        let count = drained.len();
        for adapter in drained {
            self.dispose(adapter).await;
        }
        info!(pool = %self.name, disposed = count, "Connection pool closed");
    }

    /// Dispose idle adapters unused for longer than `max_idle`.
    ///
    /// Returns the number of adapters evicted.
    pub async fn evict_idle(&self) -> usize {
        let stale: Vec<DbAdapter> = {
            let mut state = self.lock_state();
            let (stale, fresh): (VecDeque<_>, VecDeque<_>) = state
                .idle
                .drain(..)
                .partition(|a| a.idle_for() > self.max_idle);
            state.idle = fresh;
            stale.into()
        };

        let count = stale.len();
        for adapter in stale {
            self.dispose(adapter).await;
        }
        if count > 0 {
            debug!(pool = %self.name, evicted = count, "Evicted idle adapters");
        }
        count
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.lock_state();
        PoolStatus {
            name: self.name.clone(),
            dialect: self.dialect,
            capacity: self.capacity,
            max_idle_secs: self.max_idle.as_secs(),
            idle: state.idle.len(),
            live: state.live_count,
            created: state.created,
            disposed: state.disposed,
            closed: state.closed,
        }
    }

    /// Check out an adapter wrapped in a guard that returns it on drop.
    pub async fn acquire(self: &Arc<Self>) -> DbResult<PooledAdapter> {
        let adapter = self.checkout().await?;
        Ok(PooledAdapter::new(adapter, Arc::clone(self)))
    }

    /// Create, connect and count a new adapter.
    async fn create_adapter(&self) -> DbResult<DbAdapter> {
        let id = self.next_adapter_id.fetch_add(1, Ordering::Relaxed);
        let mut adapter = DbAdapter::new(id, self.dialect, self.config.clone())?;
        adapter.connect().await?;

        let closed = {
            let mut state = self.lock_state();
            if !state.closed {
                state.live_count += 1;
                state.created += 1;
            }
            state.closed
        };

        if closed {
            if let Err(e) = adapter.disconnect().await {
                warn!(pool = %self.name, adapter_id = id, error = %e, "Disconnect failed");
            }
            return Err(DbError::pool_closed(&self.name));
        }

        debug!(pool = %self.name, adapter_id = id, "Adapter created");
        Ok(adapter)
    }

    /// Decide whether an idle adapter can be handed out, resetting its
    /// session on success.
    async fn revalidate(&self, adapter: &mut DbAdapter) -> Result<(), String> {
        let idle_for = adapter.idle_for();
        if idle_for > self.max_idle {
            return Err(format!("idle for {}s", idle_for.as_secs()));
        }
        adapter
            .ping()
            .await
            .map_err(|e| format!("liveness probe failed: {e}"))?;
        adapter
            .reset_session()
            .await
            .map_err(|e| format!("session reset failed: {e}"))
    }

    /// Push an adapter onto the idle queue, handing it back if the pool
    /// cannot take it.
    fn try_enqueue(&self, mut adapter: DbAdapter) -> Option<DbAdapter> {
        adapter.touch();
        let mut state = self.lock_state();
        if state.closed || state.idle.len() >= self.capacity {
            return Some(adapter);
        }
        state.idle.push_back(adapter);
        None
    }

    /// Disconnect an adapter and give back its slot. Never fails.
    async fn dispose(&self, mut adapter: DbAdapter) {
        let id = adapter.id();
        if let Err(e) = adapter.disconnect().await {
            warn!(pool = %self.name, adapter_id = id, error = %e, "Disconnect failed during disposal");
        }
        self.lock_state().release_slot(&self.name);
        debug!(pool = %self.name, adapter_id = id, "Adapter disposed");
    }

    /// Drop an adapter without disconnecting it. Used where no runtime is
    /// available to run the async disconnect.
    fn discard(&self, adapter: DbAdapter) {
        let id = adapter.id();
        drop(adapter);
        self.lock_state().release_slot(&self.name);
        debug!(pool = %self.name, adapter_id = id, "Adapter discarded");
    }

    fn exhausted(&self, err: DbError) -> DbError {
        match err {
            e @ DbError::PoolClosed { .. } => e,
            e => {
                warn!(pool = %self.name, error = %e, "Could not create adapter");
                DbError::pool_exhausted(&self.name, e)
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return;
        }
        state.closed = true;
        let count = state.idle.len();
        state.idle.clear();
        for _ in 0..count {
            state.release_slot(&self.name);
        }
        debug!(pool = %self.name, dropped = count, "Connection pool dropped without close()");
    }
}

/// RAII guard for a checked-out adapter.
///
/// Returns the adapter to its pool when dropped.
///
/// # Usage
///
/// ```ignore
/// let mut adapter = pool.acquire().await?;
/// adapter.execute("SELECT 1", &[]).await?;
///
/// // Explicit release (preferred) or rely on Drop
/// adapter.release().await;
/// ```
///
/// # Runtime Shutdown Behavior
///
/// Returning an adapter to the idle queue needs no I/O, so `Drop` does it
/// inline. Disposing a surplus adapter does need I/O: `Drop` spawns a tokio
/// task for it when a runtime is available, otherwise the connection is
/// dropped without a graceful disconnect.
pub struct PooledAdapter {
    adapter: Option<DbAdapter>,
    pool: Arc<ConnectionPool>,
}

impl std::fmt::Debug for PooledAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledAdapter")
            .field("adapter", &self.adapter)
            .field("pool", &self.pool.name())
            .finish()
    }
}

impl PooledAdapter {
    fn new(adapter: DbAdapter, pool: Arc<ConnectionPool>) -> Self {
        Self {
            adapter: Some(adapter),
            pool,
        }
    }

    /// Name of the pool the adapter came from.
    pub fn pool_name(&self) -> &str {
        self.pool.name()
    }

    /// Explicitly return the adapter (preferred over relying on Drop).
    pub async fn release(mut self) {
        if let Some(adapter) = self.adapter.take() {
            self.pool.checkin(adapter).await;
        }
    }

    /// Take the adapter out of the guard. The caller becomes responsible
    /// for returning it with `checkin`.
    pub fn into_inner(mut self) -> DbAdapter {
        self.adapter
            .take()
            .unwrap_or_else(|| unreachable!("adapter is only taken when the guard is consumed"))
    }
}

impl Deref for PooledAdapter {
    type Target = DbAdapter;

    fn deref(&self) -> &DbAdapter {
        self.adapter
            .as_ref()
            .unwrap_or_else(|| unreachable!("adapter is only taken when the guard is consumed"))
    }
}

impl DerefMut for PooledAdapter {
    fn deref_mut(&mut self) -> &mut DbAdapter {
        self.adapter
            .as_mut()
            .unwrap_or_else(|| unreachable!("adapter is only taken when the guard is consumed"))
    }
}

impl Drop for PooledAdapter {
    fn drop(&mut self) {
        let Some(adapter) = self.adapter.take() else {
            return;
        };

        let adapter_id = adapter.id();
        warn!(
            pool = %self.pool.name(),
            adapter_id,
            "Adapter returned via Drop - consider using explicit release()"
        );

        let Some(rejected) = self.pool.try_enqueue(adapter) else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pool = Arc::clone(&self.pool);
                handle.spawn(async move {
                    pool.dispose(rejected).await;
                });
            }
            Err(_) => self.pool.discard(rejected),
        }
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::TempDir;

    async fn sqlite_pool(dir: &TempDir, pool_size: usize, max_idle_secs: u64) -> ConnectionPool {
        let options = PoolOptions {
            pool_size: Some(pool_size),
            max_idle_secs: Some(max_idle_secs),
        };
        ConnectionPool::new(
            "test",
            Dialect::Sqlite,
            AdapterConfig::sqlite(dir.path().join("pool.db")),
            &options,
        )
        .await
        .unwrap()
    }

    /// Push the idle adapter at `index` past a one second `max_idle`.
    fn age_idle_adapter(pool: &ConnectionPool, index: usize) {
        let mut state = pool.lock_state();
        let adapter = state.idle.get_mut(index).unwrap();
        adapter.meta_mut().last_active_at = Instant::now()
            .checked_sub(Duration::from_secs(5))
            .unwrap();
    }

    #[tokio::test]
    async fn test_prewarm_enqueues_adapters() {
        let dir = TempDir::new().unwrap();
        let pool = sqlite_pool(&dir, 3, 300).await;

        let status = pool.status();
        assert_eq!(status.idle, 3);
        assert_eq!(status.live, 3);
        assert_eq!(status.created, 3);
        assert_eq!(status.disposed, 0);
    }

    #[tokio::test]
    async fn test_stale_idle_adapter_is_replaced() {
        let dir = TempDir::new().unwrap();
        let pool = sqlite_pool(&dir, 1, 1).await;
        age_idle_adapter(&pool, 0);

        let adapter = pool.checkout().await.unwrap();
        assert_eq!(adapter.id(), 2);
        assert!(adapter.is_connected());

        let status = pool.status();
        assert_eq!(status.live, 1);
        assert_eq!(status.created, 2);
        assert_eq!(status.disposed, 1);
        pool.checkin(adapter).await;
    }

    #[tokio::test]
    async fn test_evict_idle_only_removes_stale() {
        let dir = TempDir::new().unwrap();
        let pool = sqlite_pool(&dir, 2, 1).await;
        age_idle_adapter(&pool, 1);

        assert_eq!(pool.evict_idle().await, 1);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.live_count(), 1);
        assert_eq!(pool.evict_idle().await, 0);
    }

    #[test]
    fn test_release_slot_saturates() {
        let mut state = PoolState::default();
        state.release_slot("test");
        assert_eq!(state.live_count, 0);
        assert_eq!(state.disposed, 0);
    }

    #[tokio::test]
    async fn test_checkin_beyond_capacity_disposes() {
        let dir = TempDir::new().unwrap();
        let pool = sqlite_pool(&dir, 1, 300).await;

        let first = pool.checkout().await.unwrap();
        let second = pool.checkout().await.unwrap();
        assert_eq!(pool.live_count(), 2);

        pool.checkin(first).await;
        pool.checkin(second).await;

        let status = pool.status();
        assert_eq!(status.idle, 1);
        assert_eq!(status.live, 1);
        assert_eq!(status.disposed, 1);
    }

    #[tokio::test]
    async fn test_guard_drop_returns_adapter() {
        let dir = TempDir::new().unwrap();
        let pool = Arc::new(sqlite_pool(&dir, 1, 300).await);

        {
            let mut guard = pool.acquire().await.unwrap();
            guard.execute("SELECT 1", &[]).await.unwrap();
            assert_eq!(pool.idle_count(), 0);
        }

        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.live_count(), 1);
    }
}
