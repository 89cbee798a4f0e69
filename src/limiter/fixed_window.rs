//! Fixed window limiter.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::limiter::{now_ms, Decision, RateLimiter};
use crate::lock::Lock;
use crate::storage::{FixedWindowState, LimiterState, Storage};

/// At most `limit` tokens per window of `interval` length.
///
/// Windows are aligned to the epoch, not to the first request: the
/// window containing `now` starts at `now - now % interval`. Crossing a
/// boundary discards the old count entirely, so every identity observes
/// the same boundaries.
pub struct FixedWindowLimiter {
    id: String,
    limit: u64,
    interval: Duration,
    storage: Arc<dyn Storage>,
    lock: Arc<dyn Lock>,
}

impl FixedWindowLimiter {
    /// `interval` must be non-zero; resolved configurations guarantee it.
    pub fn new(
        id: String,
        limit: u64,
        interval: Duration,
        storage: Arc<dyn Storage>,
        lock: Arc<dyn Lock>,
    ) -> Self {
        Self {
            id,
            limit,
            interval,
            storage,
            lock,
        }
    }

    /// Identity this limiter tracks.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Per-window admission cap.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Window length.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start of the epoch-aligned window containing `now`.
    fn window_start(&self, now: u64) -> u64 {
        let interval_ms = self.interval.as_millis() as u64;
        (now / interval_ms) * interval_ms
    }
}

#[async_trait]
impl RateLimiter for FixedWindowLimiter {
    async fn consume(&self, tokens: u64) -> Result<Decision> {
        let _guard = self.lock.acquire().await;

        loop {
            let now = now_ms();
            let window_start_ms = self.window_start(now);
            let entry = self.storage.fetch(&self.id).await?;
            let (version, stored) = match entry {
                Some(entry) => (entry.version, Some(entry.state)),
                None => (0, None),
            };
            // Counts from an earlier window, or from another strategy,
            // do not carry over.
            let hit_count = match stored {
                Some(LimiterState::FixedWindow(state))
                    if state.window_start_ms == window_start_ms =>
                {
                    state.hit_count
                }
                _ => 0,
            };

            if hit_count.saturating_add(tokens) > self.limit {
                let interval_ms = self.interval.as_millis() as u64;
                let window_ends_in = window_start_ms + interval_ms - now;
                debug!(
                    id = %self.id,
                    requested = tokens,
                    hit_count,
                    "Window limit reached"
                );
                return Ok(Decision {
                    accepted: false,
                    remaining: self.limit.saturating_sub(hit_count),
                    retry_after: Some(Duration::from_millis(window_ends_in)),
                });
            }

            if tokens == 0 {
                return Ok(Decision {
                    accepted: true,
                    remaining: self.limit - hit_count,
                    retry_after: None,
                });
            }

            let next = FixedWindowState {
                hit_count: hit_count + tokens,
                window_start_ms,
            };
            let applied = self
                .storage
                .store(&self.id, version, LimiterState::FixedWindow(next))
                .await?;
            if applied {
                return Ok(Decision {
                    accepted: true,
                    remaining: self.limit - next.hit_count,
                    retry_after: None,
                });
            }

            // Another writer got there first. Re-read and try again.
            tokio::task::yield_now().await;
        }
    }

    async fn reset(&self) -> Result<()> {
        self.storage.delete(&self.id).await
    }
}

impl fmt::Debug for FixedWindowLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedWindowLimiter")
            .field("id", &self.id)
            .field("limit", &self.limit)
            .field("interval", &self.interval)
            .finish()
    }
}
