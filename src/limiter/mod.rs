//! Rate limiter strategies.
//!
//! Every limiter answers one question: may this identity spend `n`
//! tokens right now? The answer is a [`Decision`]. Limiters hold no
//! admission state of their own; everything lives in [`Storage`](crate::storage::Storage),
//! so limiters for the same identity agree no matter which factory or
//! task created them.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::error::Result;

mod fixed_window;
mod token_bucket;

pub use fixed_window::FixedWindowLimiter;
pub use token_bucket::TokenBucketLimiter;

/// Outcome of a consume call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the requested tokens were granted.
    pub accepted: bool,
    /// Tokens still available after this call.
    pub remaining: u64,
    /// How long until a rejected request could succeed. `None` when
    /// acceptance is not foreseeable, such as a bucket with no refill
    /// rate or a request larger than the limit itself.
    pub retry_after: Option<Duration>,
}

/// Admission control for a single identity.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Try to spend `tokens`. A count of zero probes the limiter without
    /// consuming anything.
    async fn consume(&self, tokens: u64) -> Result<Decision>;

    /// Discard all stored state for this identity.
    async fn reset(&self) -> Result<()>;
}

/// A limiter produced by a factory, tagged by strategy.
#[derive(Debug)]
pub enum Limiter {
    TokenBucket(TokenBucketLimiter),
    FixedWindow(FixedWindowLimiter),
}

impl Limiter {
    /// Identity this limiter tracks.
    pub fn id(&self) -> &str {
        match self {
            Limiter::TokenBucket(limiter) => limiter.id(),
            Limiter::FixedWindow(limiter) => limiter.id(),
        }
    }

    /// Configured capacity or per-window cap.
    pub fn limit(&self) -> u64 {
        match self {
            Limiter::TokenBucket(limiter) => limiter.limit(),
            Limiter::FixedWindow(limiter) => limiter.limit(),
        }
    }
}

#[async_trait]
impl RateLimiter for Limiter {
    async fn consume(&self, tokens: u64) -> Result<Decision> {
        match self {
            Limiter::TokenBucket(limiter) => limiter.consume(tokens).await,
            Limiter::FixedWindow(limiter) => limiter.consume(tokens).await,
        }
    }

    async fn reset(&self) -> Result<()> {
        match self {
            Limiter::TokenBucket(limiter) => limiter.reset().await,
            Limiter::FixedWindow(limiter) => limiter.reset().await,
        }
    }
}

/// Current wall-clock time in milliseconds since the epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}
