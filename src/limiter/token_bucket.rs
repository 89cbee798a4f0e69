//! Token bucket limiter.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::Rate;
use crate::error::Result;
use crate::limiter::{now_ms, Decision, RateLimiter};
use crate::lock::Lock;
use crate::storage::{LimiterState, Storage, TokenBucketState};

/// Bucket of `limit` tokens, refilled `rate.amount` tokens per
/// `rate.interval`.
///
/// The bucket starts full. Without a rate it never refills, so the
/// initial tokens are all the identity will ever get until a reset.
pub struct TokenBucketLimiter {
    id: String,
    limit: u64,
    rate: Option<Rate>,
    storage: Arc<dyn Storage>,
    lock: Arc<dyn Lock>,
}

impl TokenBucketLimiter {
    pub fn new(
        id: String,
        limit: u64,
        rate: Option<Rate>,
        storage: Arc<dyn Storage>,
        lock: Arc<dyn Lock>,
    ) -> Self {
        Self {
            id,
            limit,
            rate,
            storage,
            lock,
        }
    }

    /// Identity this limiter tracks.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Bucket capacity.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Refill rate, if the configuration carried one.
    pub fn rate(&self) -> Option<&Rate> {
        self.rate.as_ref()
    }

    /// Credit tokens for the whole refill periods elapsed since the last
    /// refresh. Partial periods carry over through `refreshed_at_ms`.
    fn refill(&self, state: TokenBucketState, now: u64) -> TokenBucketState {
        let Some(rate) = &self.rate else { return state };
        let interval_ms = rate.interval.as_millis() as u64;
        if interval_ms == 0 {
            return state;
        }

        let periods = now.saturating_sub(state.refreshed_at_ms) / interval_ms;
        if periods == 0 {
            return state;
        }

        let credited = periods
            .checked_mul(rate.amount)
            .and_then(|tokens| tokens.checked_add(state.tokens))
            .unwrap_or(u64::MAX);
        TokenBucketState {
            tokens: credited.min(self.limit),
            refreshed_at_ms: state.refreshed_at_ms + periods * interval_ms,
        }
    }

    /// Time until the bucket holds at least `tokens`, measured from
    /// `now`. `None` when that will never happen.
    fn time_to_afford(&self, state: TokenBucketState, tokens: u64, now: u64) -> Option<Duration> {
        let rate = self.rate.as_ref()?;
        if rate.amount == 0 || tokens > self.limit {
            return None;
        }

        let missing = tokens - state.tokens;
        let periods = missing.div_ceil(rate.amount);
        let interval_ms = rate.interval.as_millis() as u64;
        let ready_at = periods
            .checked_mul(interval_ms)
            .and_then(|wait| state.refreshed_at_ms.checked_add(wait))?;
        Some(Duration::from_millis(ready_at.saturating_sub(now)))
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn consume(&self, tokens: u64) -> Result<Decision> {
        let _guard = self.lock.acquire().await;

        loop {
            let now = now_ms();
            let entry = self.storage.fetch(&self.id).await?;
            let (version, stored) = match entry {
                Some(entry) => (entry.version, Some(entry.state)),
                None => (0, None),
            };
            let bucket = match stored {
                Some(LimiterState::TokenBucket(state)) => self.refill(state, now),
                // First sighting of this identity, or state left behind by
                // another strategy. Either way the bucket starts full.
                _ => TokenBucketState {
                    tokens: self.limit,
                    refreshed_at_ms: now,
                },
            };

            if bucket.tokens < tokens {
                let retry_after = self.time_to_afford(bucket, tokens, now);
                debug!(
                    id = %self.id,
                    requested = tokens,
                    remaining = bucket.tokens,
                    "Token bucket exhausted"
                );
                return Ok(Decision {
                    accepted: false,
                    remaining: bucket.tokens,
                    retry_after,
                });
            }

            if tokens == 0 {
                return Ok(Decision {
                    accepted: true,
                    remaining: bucket.tokens,
                    retry_after: None,
                });
            }

            let next = TokenBucketState {
                tokens: bucket.tokens - tokens,
                refreshed_at_ms: bucket.refreshed_at_ms,
            };
            let applied = self
                .storage
                .store(&self.id, version, LimiterState::TokenBucket(next))
                .await?;
            if applied {
                return Ok(Decision {
                    accepted: true,
                    remaining: next.tokens,
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

impl fmt::Debug for TokenBucketLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucketLimiter")
            .field("id", &self.id)
            .field("limit", &self.limit)
            .field("rate", &self.rate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::NoLock;
    use crate::storage::InMemoryStorage;

    fn limiter(
        limit: u64,
        rate: Option<Rate>,
        storage: Arc<InMemoryStorage>,
    ) -> TokenBucketLimiter {
        TokenBucketLimiter::new(
            "api.user1".to_string(),
            limit,
            rate,
            storage,
            Arc::new(NoLock),
        )
    }

    fn hourly_rate(amount: u64) -> Option<Rate> {
        Some(Rate {
            amount,
            interval: Duration::from_secs(3600),
        })
    }

    #[tokio::test]
    async fn test_bucket_starts_full() {
        let storage = Arc::new(InMemoryStorage::new());
        let limiter = limiter(10, hourly_rate(1), storage);

        let decision = limiter.consume(1).await.unwrap();
        assert!(decision.accepted);
        assert_eq!(decision.remaining, 9);
        assert_eq!(decision.retry_after, None);
    }

    #[tokio::test]
    async fn test_remaining_counts_down_to_rejection() {
        let storage = Arc::new(InMemoryStorage::new());
        let limiter = limiter(3, hourly_rate(1), storage);

        for expected in [2, 1, 0] {
            let decision = limiter.consume(1).await.unwrap();
            assert!(decision.accepted);
            assert_eq!(decision.remaining, expected);
        }

        let decision = limiter.consume(1).await.unwrap();
        assert!(!decision.accepted);
        assert_eq!(decision.remaining, 0);
        let retry_after = decision.retry_after.unwrap();
        assert!(retry_after > Duration::ZERO);
        assert!(retry_after <= Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_rejection_consumes_nothing() {
        let storage = Arc::new(InMemoryStorage::new());
        let limiter = limiter(5, hourly_rate(1), Arc::clone(&storage));

        let decision = limiter.consume(10).await.unwrap();
        assert!(!decision.accepted);
        assert_eq!(decision.remaining, 5);

        // An affordable request still sees the full bucket.
        let decision = limiter.consume(5).await.unwrap();
        assert!(decision.accepted);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn test_no_rate_means_no_refill_and_no_retry_hint() {
        let storage = Arc::new(InMemoryStorage::new());
        let limiter = limiter(2, None, storage);

        limiter.consume(2).await.unwrap();
        let decision = limiter.consume(1).await.unwrap();
        assert!(!decision.accepted);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after, None);
    }

    #[tokio::test]
    async fn test_oversized_request_has_no_retry_hint() {
        let storage = Arc::new(InMemoryStorage::new());
        let limiter = limiter(5, hourly_rate(1), storage);

        let decision = limiter.consume(6).await.unwrap();
        assert!(!decision.accepted);
        assert_eq!(decision.retry_after, None);
    }

    #[tokio::test]
    async fn test_refill_credits_whole_elapsed_periods() {
        let storage = Arc::new(InMemoryStorage::new());
        let limiter = limiter(
            10,
            Some(Rate {
                amount: 2,
                interval: Duration::from_secs(60),
            }),
            Arc::clone(&storage),
        );

        // Empty bucket last refreshed three and a half minutes ago.
        let refreshed_at_ms = now_ms() - 210_000;
        storage
            .store(
                "api.user1",
                0,
                LimiterState::TokenBucket(TokenBucketState {
                    tokens: 0,
                    refreshed_at_ms,
                }),
            )
            .await
            .unwrap();

        // Three whole periods elapsed, so six tokens came back.
        let decision = limiter.consume(0).await.unwrap();
        assert_eq!(decision.remaining, 6);
    }

    #[tokio::test]
    async fn test_refill_never_exceeds_limit() {
        let storage = Arc::new(InMemoryStorage::new());
        let limiter = limiter(
            5,
            Some(Rate {
                amount: 100,
                interval: Duration::from_secs(1),
            }),
            Arc::clone(&storage),
        );

        let refreshed_at_ms = now_ms() - 60_000;
        storage
            .store(
                "api.user1",
                0,
                LimiterState::TokenBucket(TokenBucketState {
                    tokens: 0,
                    refreshed_at_ms,
                }),
            )
            .await
            .unwrap();

        let decision = limiter.consume(0).await.unwrap();
        assert_eq!(decision.remaining, 5);
    }

    #[tokio::test]
    async fn test_zero_tokens_probes_without_spending() {
        let storage = Arc::new(InMemoryStorage::new());
        let limiter = limiter(4, hourly_rate(1), Arc::clone(&storage));

        let decision = limiter.consume(0).await.unwrap();
        assert!(decision.accepted);
        assert_eq!(decision.remaining, 4);

        // The probe wrote nothing.
        assert_eq!(storage.fetch("api.user1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_limiters_sharing_an_identity_share_the_bucket() {
        let storage = Arc::new(InMemoryStorage::new());
        let first = limiter(4, hourly_rate(1), Arc::clone(&storage));
        let second = limiter(4, hourly_rate(1), Arc::clone(&storage));

        first.consume(3).await.unwrap();
        let decision = second.consume(1).await.unwrap();
        assert!(decision.accepted);
        assert_eq!(decision.remaining, 0);

        let decision = first.consume(1).await.unwrap();
        assert!(!decision.accepted);
    }

    #[tokio::test]
    async fn test_reset_restores_a_full_bucket() {
        let storage = Arc::new(InMemoryStorage::new());
        let limiter = limiter(2, None, storage);

        limiter.consume(2).await.unwrap();
        limiter.reset().await.unwrap();

        let decision = limiter.consume(1).await.unwrap();
        assert!(decision.accepted);
        assert_eq!(decision.remaining, 1);
    }

    #[tokio::test]
    async fn test_foreign_state_resets_to_full_bucket() {
        use crate::storage::FixedWindowState;

        let storage = Arc::new(InMemoryStorage::new());
        storage
            .store(
                "api.user1",
                0,
                LimiterState::FixedWindow(FixedWindowState {
                    hit_count: 99,
                    window_start_ms: 0,
                }),
            )
            .await
            .unwrap();

        let limiter = limiter(3, None, Arc::clone(&storage));
        let decision = limiter.consume(1).await.unwrap();
        assert!(decision.accepted);
        assert_eq!(decision.remaining, 2);

        let entry = storage.fetch("api.user1").await.unwrap().unwrap();
        assert!(matches!(entry.state, LimiterState::TokenBucket(_)));
    }

    #[tokio::test]
    async fn test_concurrent_consumers_never_overdraw() {
        let storage = Arc::new(InMemoryStorage::new());
        let limiter = Arc::new(limiter(50, None, storage));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                let mut accepted = 0u64;
                for _ in 0..10 {
                    if limiter.consume(1).await.unwrap().accepted {
                        accepted += 1;
                    }
                }
                accepted
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert_eq!(total, 50);
    }

    #[tokio::test]
    async fn test_consume_after_reset_starts_a_fresh_record() {
        let storage = Arc::new(InMemoryStorage::new());
        let limiter = limiter(2, None, Arc::clone(&storage));

        limiter.consume(1).await.unwrap();
        limiter.reset().await.unwrap();
        limiter.consume(1).await.unwrap();

        let entry = storage.fetch("api.user1").await.unwrap().unwrap();
        assert_eq!(entry.version, 1);
        match entry.state {
            LimiterState::TokenBucket(state) => assert_eq!(state.tokens, 1),
            other => panic!("unexpected state {other:?}"),
        }
    }
}
