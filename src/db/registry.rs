//! Named collection of connection pools.
//!
//! A [`Registry`] maps database names to [`ConnectionPool`]s and remembers a
//! default name, set by the first registration. It is constructed
//! explicitly and passed around (usually as `Arc<Registry>`); tear it down
//! with [`Registry::close_all`].

use crate::config::PoolOptions;
use crate::db::adapter::DbAdapter;
use crate::db::pool::{ConnectionPool, PooledAdapter};
use crate::error::{DbError, DbResult};
use crate::models::{AdapterConfig, Dialect, PoolStatus};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct RegistryState {
    pools: HashMap<String, Arc<ConnectionPool>>,
    default_name: Option<String>,
}

#[derive(Debug, Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
    /// Handle for the idle reaper task.
    /// Uses std::sync::Mutex since it's only accessed briefly for
    /// storing/taking the handle.
    reaper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and store a pool under `name`.
    ///
    /// The first registered pool becomes the default. A name that is
    /// already registered must be closed before it can be reused.
    pub async fn register(
        &self,
        name: &str,
        dialect: Dialect,
        config: AdapterConfig,
        options: &PoolOptions,
    ) -> DbResult<()> {
        // Early check for existing pool
        if self.state.read().await.pools.contains_key(name) {
            warn!(database = %name, "Database is already registered");
            return Err(DbError::already_registered(name));
        }

        info!(database = %name, dialect = %dialect, "Registering database");
        let pool = ConnectionPool::new(name, dialect, config, options).await?;

        // Re-check after async work to prevent TOCTOU race
        let duplicate = {
            let mut state = self.state.write().await;
            if state.pools.contains_key(name) {
                Some(pool)
            } else {
                state.pools.insert(name.to_string(), Arc::new(pool));
                if state.default_name.is_none() {
                    state.default_name = Some(name.to_string());
                }
                None
            }
        }; // Lock released here

        if let Some(pool) = duplicate {
            // Close the pool we just created outside of lock
            pool.close().await;
            warn!(database = %name, "Concurrent registration detected");
            return Err(DbError::already_registered(name));
        }

        Ok(())
    }

    /// Check out an adapter from the named pool, or the default one.
    pub async fn get(&self, name: Option<&str>) -> DbResult<DbAdapter> {
        let pool = self.pool(name).await?;
        pool.checkout().await
    }

    /// Return an adapter to the named pool, or the default one.
    ///
    /// An adapter for an unknown pool is dropped with a warning.
    pub async fn put(&self, adapter: DbAdapter, name: Option<&str>) {
        match self.pool(name).await {
            Ok(pool) => pool.checkin(adapter).await,
            Err(e) => {
                warn!(
                    database = ?name,
                    error = %e,
                    "Dropping adapter returned to an unknown database"
                );
            }
        }
    }

    /// Check out an adapter wrapped in a guard that returns it on drop.
    pub async fn acquire(&self, name: Option<&str>) -> DbResult<PooledAdapter> {
        let pool = self.pool(name).await?;
        pool.acquire().await
    }

    /// Look up a pool by name, falling back to the default.
    pub async fn pool(&self, name: Option<&str>) -> DbResult<Arc<ConnectionPool>> {
        let state = self.state.read().await;
        let name = match name {
            Some(name) => name,
            None => state
                .default_name
                .as_deref()
                .ok_or_else(|| DbError::unknown_database("<default>"))?,
        };
        state
            .pools
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::unknown_database(name))
    }

    pub async fn set_default(&self, name: &str) -> DbResult<()> {
        let mut state = self.state.write().await;
        if !state.pools.contains_key(name) {
            return Err(DbError::unknown_database(name));
        }
        state.default_name = Some(name.to_string());
        debug!(database = %name, "Default database changed");
        Ok(())
    }

    pub async fn default_name(&self) -> Option<String> {
        self.state.read().await.default_name.clone()
    }

    /// Registered names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut names: Vec<String> = state.pools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove and close one pool. Clears the default if it pointed there.
    pub async fn close(&self, name: &str) -> DbResult<()> {
        let pool = {
            let mut state = self.state.write().await;
            let pool = state
                .pools
                .remove(name)
                .ok_or_else(|| DbError::unknown_database(name))?;
            if state.default_name.as_deref() == Some(name) {
                state.default_name = None;
            }
            pool
        }; // Lock released here

        pool.close().await;
        Ok(())
    }

    /// Close every pool and stop the reaper.
    pub async fn close_all(&self) {
        if let Some(handle) = self
            .reaper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }

        let pools: Vec<(String, Arc<ConnectionPool>)> = {
            let mut state = self.state.write().await;
            state.default_name = None;
            state.pools.drain().collect()
        };

        for (name, pool) in pools {
            info!(database = %name, "Closing pool");
            pool.close().await;
        }
        info!("All pools closed");
    }

    /// Status of every registered pool, sorted by name.
    pub async fn status(&self) -> Vec<PoolStatus> {
        let pools: Vec<Arc<ConnectionPool>> =
            self.state.read().await.pools.values().cloned().collect();
        let mut status: Vec<PoolStatus> = pools.iter().map(|p| p.status()).collect();
        status.sort_by(|a, b| a.name.cmp(&b.name));
        status
    }

    /// Evict stale idle adapters from every pool once.
    ///
    /// Returns the total number of adapters evicted.
    pub async fn evict_idle(&self) -> usize {
        let pools: Vec<Arc<ConnectionPool>> =
            self.state.read().await.pools.values().cloned().collect();
        let mut evicted = 0;
        for pool in pools {
            evicted += pool.evict_idle().await;
        }
        evicted
    }

    /// Spawn a background task that evicts stale idle adapters every
    /// `interval`. Replaces a previously started reaper.
    ///
    /// The task holds a Weak reference and exits once the registry is
    /// dropped.
    pub fn start_reaper(self: &Arc<Self>, interval: Duration) {
        let weak_registry = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            Self::reaper_task(weak_registry, interval).await;
        });

        let previous = self
            .reaper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        debug!(interval_secs = interval.as_secs(), "Idle reaper started");
    }

    async fn reaper_task(weak_registry: Weak<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            // Try to upgrade weak reference - exit if registry was dropped
            let Some(registry) = weak_registry.upgrade() else {
                info!("Registry dropped, idle reaper exiting");
                return;
            };

            let evicted = registry.evict_idle().await;
            if evicted > 0 {
                info!(evicted, "Idle reaper disposed stale adapters");
            }
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        if let Some(handle) = self
            .reaper
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
