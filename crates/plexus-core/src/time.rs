//! Time units used by the timeout operators.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
}

impl TimeUnit {
    /// Negative amounts clamp to zero.
    pub fn to_duration(self, amount: i64) -> Duration {
        let amount = amount.max(0) as u64;
        match self {
            TimeUnit::Nanoseconds => Duration::from_nanos(amount),
            TimeUnit::Microseconds => Duration::from_micros(amount),
            TimeUnit::Milliseconds => Duration::from_millis(amount),
            TimeUnit::Seconds => Duration::from_secs(amount),
            TimeUnit::Minutes => Duration::from_secs(amount.saturating_mul(60)),
        }
    }

    pub fn from_duration(self, d: Duration) -> i64 {
        let v = match self {
            TimeUnit::Nanoseconds => d.as_nanos(),
            TimeUnit::Microseconds => d.as_micros(),
            TimeUnit::Milliseconds => d.as_millis(),
            TimeUnit::Seconds => d.as_secs() as u128,
            TimeUnit::Minutes => (d.as_secs() / 60) as u128,
        };
        i64::try_from(v).unwrap_or(i64::MAX)
    }
}
