//! Token bucket rate limiter.

use super::Meter;

/// Accumulates `per_second` tokens up to `capacity`; each admitted request
/// spends its cost in tokens.
///
/// Elapsed time is measured in whole seconds but tokens are fractional, so a
/// slow rate such as 0.2/s still refills correctly when checked every second.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucket {
    capacity: u32,
    per_second: f64,
    tokens: f64,
    last_refill: u64,
}

impl TokenBucket {
    /// Creates a full bucket.
    #[must_use]
    pub fn new(capacity: u32, per_second: f64, now: u64) -> Self {
        Self {
            capacity,
            per_second: per_second.max(0.0),
            tokens: f64::from(capacity),
            last_refill: now,
        }
    }

    /// Refills, then spends `cost` tokens if enough are available.
    ///
    /// Returns `false` without spending anything when the bucket is short.
    /// The refill is kept either way.
    pub fn ok(&mut self, cost: u32, now: u64) -> bool {
        self.refill(now);
        let cost = f64::from(cost);
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Tokens currently available (as of the last check).
    #[must_use]
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Maximum number of tokens.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn refill(&mut self, now: u64) {
        let elapsed = now.saturating_sub(self.last_refill);
        #[allow(clippy::cast_precision_loss)]
        let gained = elapsed as f64 * self.per_second;
        self.tokens = (self.tokens + gained).min(f64::from(self.capacity));
        self.last_refill = now.max(self.last_refill);
    }
}

impl Meter for TokenBucket {
    fn try_admit(&mut self, cost: u32, now: u64) -> bool {
        self.ok(cost, now)
    }

    fn remaining(&self) -> f64 {
        self.tokens
    }
}
