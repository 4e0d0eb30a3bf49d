//! Abuse control: token buckets and flood windows at API, sender and room
//! scope.
//!
//! Both mechanisms implement [`Meter`], so any scope can run either policy
//! (or both) behind the same [`AdmissionControl`] interface.

/// Scoped admission checks with keyed, bounded state
pub mod admission;
/// Token bucket
pub mod bucket;
/// Time sources
pub mod clock;
/// Fixed window flood counter
pub mod flood;

use std::fmt;

pub use admission::{AdmissionControl, Eviction, Rejection, ScopeLimiter};
pub use bucket::TokenBucket;
pub use clock::{Clock, ManualClock, SystemClock};
pub use flood::FloodWindow;

/// Check-and-debit state for one scope key.
pub trait Meter: Send + fmt::Debug {
    /// Admits `cost` at time `now`, mutating state only as the policy allows.
    fn try_admit(&mut self, cost: u32, now: u64) -> bool;

    /// Budget left after the last check, for logging.
    fn remaining(&self) -> f64;
}

/// Where a limit applies. Scopes are checked in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    /// Shared by all requests to the remote API
    Api,
    /// Per message sender
    Sender,
    /// Per chat room
    Room,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Api => "API",
            Self::Sender => "User",
            Self::Room => "Room",
        };
        f.write_str(name)
    }
}

/// What a single inbound message asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Demand {
    /// Distinct galleries to resolve
    pub galleries: u32,
    /// Remote calls that will be issued
    pub api_calls: u32,
}

/// Limiting policy for one scope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeterPolicy {
    /// Token bucket refilled at `per_second`, holding at most `burst_count`
    TokenBucket {
        /// Tokens gained per second
        per_second: f64,
        /// Bucket capacity
        burst_count: u32,
    },
    /// At most `max` messages per window that lapses after `delay_secs` idle
    FloodWindow {
        /// Messages allowed per window
        max: u32,
        /// Idle seconds after which the window resets
        delay_secs: u64,
    },
}

impl MeterPolicy {
    /// Creates fresh state for this policy.
    #[must_use]
    pub fn build(&self, now: u64) -> Box<dyn Meter> {
        match *self {
            Self::TokenBucket {
                per_second,
                burst_count,
            } => Box::new(TokenBucket::new(burst_count, per_second, now)),
            Self::FloodWindow { max, delay_secs } => {
                Box::new(FloodWindow::new(max, delay_secs, now))
            }
        }
    }

    /// Cost of `demand` under this policy at `scope`.
    ///
    /// The API bucket pays per remote call, sender and room buckets pay per
    /// gallery, and flood windows count messages.
    #[must_use]
    pub fn cost(&self, scope: Scope, demand: Demand) -> u32 {
        match (self, scope) {
            (Self::FloodWindow { .. }, _) => 1,
            (Self::TokenBucket { .. }, Scope::Api) => demand.api_calls,
            (Self::TokenBucket { .. }, Scope::Sender | Scope::Room) => demand.galleries,
        }
    }

    /// Short policy name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TokenBucket { .. } => "token bucket",
            Self::FloodWindow { .. } => "flood window",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_units() {
        let demand = Demand {
            galleries: 4,
            api_calls: 2,
        };
        let bucket = MeterPolicy::TokenBucket {
            per_second: 1.0,
            burst_count: 5,
        };
        let flood = MeterPolicy::FloodWindow {
            max: 3,
            delay_secs: 30,
        };

        assert_eq!(bucket.cost(Scope::Api, demand), 2);
        assert_eq!(bucket.cost(Scope::Sender, demand), 4);
        assert_eq!(bucket.cost(Scope::Room, demand), 4);
        assert_eq!(flood.cost(Scope::Room, demand), 1);
    }
}
