//! Token-bucket arithmetic.
//!
//! All time units are whole seconds; fractional-second refill is not
//! credited until a full second has elapsed (floor truncation). A denied
//! request neither consumes a token nor persists the refill it observed, so
//! repeated denials within the same second leave identical state.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// One client's rate-limit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBucket {
    /// Remaining tokens, never above `capacity`.
    pub tokens: i64,
    /// Unix seconds of the last persisted refill/consume.
    pub last_update: i64,
    /// Burst ceiling, > 0.
    pub capacity: i64,
    /// Refill rate in tokens per second, > 0.
    pub rate: i64,
}

impl TokenBucket {
    /// Bucket for a first-seen client, pre-charged one token for the
    /// request that created it.
    pub fn fresh(capacity: i64, rate: i64, now: i64) -> Self {
        Self {
            tokens: capacity - 1,
            last_update: now,
            capacity,
            rate,
        }
    }

    /// Tokens available at `now` after the time-proportional refill,
    /// capped at capacity. Does not mutate the bucket.
    pub fn refilled_tokens(&self, now: i64) -> i64 {
        let elapsed = (now - self.last_update).max(0);
        (self.tokens + elapsed * self.rate).min(self.capacity)
    }

    /// Attempt to admit one request at `now`. On admission the refilled
    /// count minus one is stored and `last_update` advances; on denial the
    /// bucket is left untouched.
    pub fn try_consume(&mut self, now: i64) -> bool {
        let tokens = self.refilled_tokens(now);
        if tokens < 1 {
            return false;
        }
        self.tokens = tokens - 1;
        self.last_update = now;
        true
    }
}

/// Current unix time in whole seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_bucket_pre_charges_one_token() {
        let bucket = TokenBucket::fresh(20, 2, 1_000);
        assert_eq!(bucket.tokens, 19);
        assert_eq!(bucket.last_update, 1_000);
    }

    #[test]
    fn test_refill_saturates_at_capacity() {
        let mut bucket = TokenBucket::fresh(5, 1, 1_000);
        assert!(bucket.try_consume(1_000));
        assert!(bucket.try_consume(1_000));
        assert!(bucket.try_consume(1_000));
        assert_eq!(bucket.tokens, 1);

        // Far more elapsed time than needed: capped, never above capacity.
        assert_eq!(bucket.refilled_tokens(1_000 + 100), 5);
    }

    #[test]
    fn test_sub_second_elapsed_credits_nothing() {
        let mut bucket = TokenBucket::fresh(2, 10, 1_000);
        assert!(bucket.try_consume(1_000)); // 0 tokens left
        assert!(!bucket.try_consume(1_000)); // same second, no refill
        assert!(bucket.try_consume(1_001)); // one second later, 10 capped at 2
    }

    #[test]
    fn test_denial_leaves_bucket_untouched() {
        let mut bucket = TokenBucket {
            tokens: 0,
            last_update: 1_000,
            capacity: 3,
            rate: 1,
        };
        let before = bucket.clone();

        assert!(!bucket.try_consume(1_000));
        assert_eq!(bucket, before, "denied request must not advance state");
    }

    #[test]
    fn test_refill_proportional_to_elapsed_seconds() {
        let bucket = TokenBucket {
            tokens: 1,
            last_update: 1_000,
            capacity: 10,
            rate: 2,
        };
        assert_eq!(bucket.refilled_tokens(1_003), 7); // 1 + 3 * 2
    }

    #[test]
    fn test_clock_skew_backwards_is_no_refill() {
        let bucket = TokenBucket {
            tokens: 2,
            last_update: 1_000,
            capacity: 10,
            rate: 2,
        };
        assert_eq!(bucket.refilled_tokens(900), 2);
    }
}
