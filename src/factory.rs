//! Limiter factory.
//!
//! A factory binds one resolved [`LimiterConfig`] to a storage backend
//! and an optional lock provider, then stamps out one [`Limiter`] per
//! key. The limiter's identity is the config id with the key appended,
//! so distinct keys never share state while repeated keys always do.

use std::sync::Arc;

use tracing::trace;

use crate::config::{LimiterConfig, Strategy};
use crate::error::{Result, TollgateError};
use crate::limiter::{FixedWindowLimiter, Limiter, TokenBucketLimiter};
use crate::lock::{Lock, LockProvider, NoLock};
use crate::storage::Storage;

/// Creates per-key limiters from a single configuration.
pub struct RateLimiterFactory {
    config: LimiterConfig,
    storage: Arc<dyn Storage>,
    lock_provider: Option<Arc<dyn LockProvider>>,
}

impl RateLimiterFactory {
    /// Factory without locking. Limiters rely on versioned storage
    /// writes alone.
    pub fn new(config: LimiterConfig, storage: Arc<dyn Storage>) -> Self {
        Self {
            config,
            storage,
            lock_provider: None,
        }
    }

    /// Factory whose limiters serialize storage round trips through
    /// locks named after their identity.
    pub fn with_lock_provider(
        config: LimiterConfig,
        storage: Arc<dyn Storage>,
        lock_provider: Arc<dyn LockProvider>,
    ) -> Self {
        Self {
            config,
            storage,
            lock_provider: Some(lock_provider),
        }
    }

    /// The configuration this factory stamps limiters from.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Create a limiter for `key`.
    ///
    /// The key is appended verbatim to the config id to form the
    /// identity; `None` leaves the identity equal to the id. Creation
    /// touches no storage, so it is cheap and never contends.
    pub fn create(&self, key: Option<&str>) -> Result<Limiter> {
        let identity = format!("{}{}", self.config.id, key.unwrap_or_default());
        let lock: Arc<dyn Lock> = match &self.lock_provider {
            Some(provider) => provider.create_lock(&identity),
            None => Arc::new(NoLock),
        };
        trace!(
            identity = %identity,
            strategy = %self.config.strategy,
            "Creating limiter"
        );

        match self.config.strategy {
            Strategy::TokenBucket => Ok(Limiter::TokenBucket(TokenBucketLimiter::new(
                identity,
                self.config.limit,
                self.config.rate.clone(),
                Arc::clone(&self.storage),
                lock,
            ))),
            Strategy::FixedWindow => {
                // Resolved configs always carry the interval. Hitting None
                // means the config was built around the resolver.
                let Some(interval) = self.config.interval else {
                    return Err(TollgateError::UnconfiguredStrategy {
                        strategy: Strategy::FixedWindow,
                        missing: "interval",
                    });
                };
                Ok(Limiter::FixedWindow(FixedWindowLimiter::new(
                    identity,
                    self.config.limit,
                    interval,
                    Arc::clone(&self.storage),
                    lock,
                )))
            }
        }
    }
}
