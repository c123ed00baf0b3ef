//! Time source for the SDK.
//!
//! Timestamps are wall-clock `DateTime<Utc>`, but they are derived from the
//! tokio monotonic clock so that timers and timestamps agree, including under
//! paused time in tests.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// A source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Thread-safe shared clock.
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock anchored to a `tokio::time::Instant`.
#[derive(Debug, Clone)]
pub struct TokioClock {
    anchor_utc: DateTime<Utc>,
    anchor: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            anchor_utc: Utc::now(),
            anchor: tokio::time::Instant::now(),
        }
    }

    /// Anchor the clock at a fixed wall-clock time.
    pub fn starting_at(anchor_utc: DateTime<Utc>) -> Self {
        Self {
            anchor_utc,
            anchor: tokio::time::Instant::now(),
        }
    }

    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.anchor.elapsed();
        self.anchor_utc + Duration::from_std(elapsed).unwrap_or_else(|_| Duration::zero())
    }
}

/// Milliseconds between two instants, clamped at zero.
pub fn millis_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> u64 {
    (later - earlier).num_milliseconds().max(0) as u64
}
