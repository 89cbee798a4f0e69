//! Persistence for limiter state.
//!
//! Storage keys are limiter identities. Writes are versioned: a store
//! only succeeds when the caller's expected version matches what the
//! backend holds, so concurrent limiters sharing an identity cannot
//! overwrite each other's updates unnoticed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

mod memory;

pub use memory::InMemoryStorage;

/// Persisted state of one token bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBucketState {
    /// Tokens currently available.
    pub tokens: u64,
    /// When the bucket was last refilled, in milliseconds since the epoch.
    pub refreshed_at_ms: u64,
}

/// Persisted state of one fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedWindowState {
    /// Admissions recorded in the current window.
    pub hit_count: u64,
    /// Start of the current window, in milliseconds since the epoch.
    pub window_start_ms: u64,
}

/// State persisted for a limiter identity, tagged by strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum LimiterState {
    TokenBucket(TokenBucketState),
    FixedWindow(FixedWindowState),
}

/// A stored state together with its write version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    /// Monotonic per-identity version, starting at 1 for the first write.
    pub version: u64,
    pub state: LimiterState,
}

/// A backend that persists limiter state by identity.
///
/// Version 0 stands for "no record": storing with `expected_version: 0`
/// succeeds only when the identity has no entry yet.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetch the entry for an identity, if one exists.
    async fn fetch(&self, identity: &str) -> Result<Option<StateEntry>>;

    /// Store `state` for an identity if its current version matches
    /// `expected_version`. Returns whether the write was applied.
    async fn store(&self, identity: &str, expected_version: u64, state: LimiterState)
        -> Result<bool>;

    /// Remove the entry for an identity. Removing a missing entry is not
    /// an error.
    async fn delete(&self, identity: &str) -> Result<()>;
}
