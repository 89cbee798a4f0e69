//! Locking for storage round trips.
//!
//! A limiter wraps each fetch/store cycle in a lock acquired from its
//! factory's [`LockProvider`]. Factories without a provider hand out
//! [`NoLock`], which admits immediately and leaves consistency to the
//! storage layer's versioned writes.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::trace;

/// Held for the duration of one storage round trip. Dropping it releases
/// whatever the lock implementation put inside.
pub struct LockGuard {
    _token: Option<Box<dyn Any + Send>>,
}

impl LockGuard {
    /// Guard that releases `token` when dropped.
    pub fn holding<T: Send + 'static>(token: T) -> Self {
        Self {
            _token: Some(Box::new(token)),
        }
    }

    /// Guard with nothing to release.
    pub fn empty() -> Self {
        Self { _token: None }
    }
}

/// A lock scoped to a single limiter identity.
#[async_trait]
pub trait Lock: Send + Sync {
    /// Wait until the lock is held and return a guard for it.
    async fn acquire(&self) -> LockGuard;
}

/// Hands out locks by name. One name maps to one lock, so limiters that
/// share an identity contend on the same lock.
pub trait LockProvider: Send + Sync {
    fn create_lock(&self, name: &str) -> Arc<dyn Lock>;
}

/// A lock that never blocks. Used when a factory has no lock provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLock;

#[async_trait]
impl Lock for NoLock {
    async fn acquire(&self) -> LockGuard {
        LockGuard::empty()
    }
}

/// In-process [`LockProvider`] backed by a map of named async mutexes.
#[derive(Default)]
pub struct LocalLockProvider {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LocalLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct lock names handed out so far.
    pub fn lock_count(&self) -> usize {
        self.locks.lock().len()
    }
}

impl LockProvider for LocalLockProvider {
    fn create_lock(&self, name: &str) -> Arc<dyn Lock> {
        let inner = self
            .locks
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone();
        trace!(name = %name, "Created lock");
        Arc::new(LocalLock { inner })
    }
}

struct LocalLock {
    inner: Arc<AsyncMutex<()>>,
}

#[async_trait]
impl Lock for LocalLock {
    async fn acquire(&self) -> LockGuard {
        LockGuard::holding(self.inner.clone().lock_owned().await)
    }
}
