//! Counters for the capture pipeline and the decision path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running counters for one SDK lifecycle.
#[derive(Debug)]
pub struct PipelineStats {
    events_captured: AtomicU64,
    events_sampled_out: AtomicU64,
    events_sent: AtomicU64,
    events_failed: AtomicU64,
    batches_sent: AtomicU64,
    friction_signals: AtomicU64,
    decisions_requested: AtomicU64,
    decisions_suppressed: AtomicU64,
    decisions_delivered: AtomicU64,
    started_at: DateTime<Utc>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            events_captured: AtomicU64::new(0),
            events_sampled_out: AtomicU64::new(0),
            events_sent: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
            batches_sent: AtomicU64::new(0),
            friction_signals: AtomicU64::new(0),
            decisions_requested: AtomicU64::new(0),
            decisions_suppressed: AtomicU64::new(0),
            decisions_delivered: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_captured(&self) {
        self.events_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sampled_out(&self) {
        self.events_sampled_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_sent(&self, events: u64) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.events_sent.fetch_add(events, Ordering::Relaxed);
    }

    pub fn record_batch_failed(&self, events: u64) {
        self.events_failed.fetch_add(events, Ordering::Relaxed);
    }

    pub fn record_friction(&self) {
        self.friction_signals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decision_requested(&self) {
        self.decisions_requested.fetch_add(1, Ordering::Relaxed);
    }

    /// A friction signal arrived while the gate was closed.
    pub fn record_decision_suppressed(&self) {
        self.decisions_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decision_delivered(&self) {
        self.decisions_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_captured: self.events_captured.load(Ordering::Relaxed),
            events_sampled_out: self.events_sampled_out.load(Ordering::Relaxed),
            events_sent: self.events_sent.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            friction_signals: self.friction_signals.load(Ordering::Relaxed),
            decisions_requested: self.decisions_requested.load(Ordering::Relaxed),
            decisions_suppressed: self.decisions_suppressed.load(Ordering::Relaxed),
            decisions_delivered: self.decisions_delivered.load(Ordering::Relaxed),
            started_at: self.started_at,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Pipeline Statistics:\n\
             - Events captured: {}\n\
             - Events sampled out: {}\n\
             - Events sent: {} in {} batches\n\
             - Events failed to send: {}\n\
             \n\
             Decisions:\n\
             - Friction signals: {}\n\
             - Requested: {}\n\
             - Suppressed by gate: {}\n\
             - Delivered: {}",
            stats.events_captured,
            stats.events_sampled_out,
            stats.events_sent,
            stats.batches_sent,
            stats.events_failed,
            stats.friction_signals,
            stats.decisions_requested,
            stats.decisions_suppressed,
            stats.decisions_delivered,
        )
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub events_captured: u64,
    pub events_sampled_out: u64,
    pub events_sent: u64,
    pub events_failed: u64,
    pub batches_sent: u64,
    pub friction_signals: u64,
    pub decisions_requested: u64,
    pub decisions_suppressed: u64,
    pub decisions_delivered: u64,
    pub started_at: DateTime<Utc>,
}

/// Thread-safe shared stats.
pub type SharedStats = Arc<PipelineStats>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let stats = PipelineStats::new();
        stats.record_captured();
        stats.record_captured();
        stats.record_sampled_out();
        stats.record_batch_sent(2);
        stats.record_decision_suppressed();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.events_captured, 2);
        assert_eq!(snapshot.events_sampled_out, 1);
        assert_eq!(snapshot.events_sent, 2);
        assert_eq!(snapshot.batches_sent, 1);
        assert_eq!(snapshot.decisions_suppressed, 1);
    }

    #[test]
    fn test_summary_format() {
        let summary = PipelineStats::new().summary();
        assert!(summary.contains("Events captured"));
        assert!(summary.contains("Suppressed by gate"));
    }
}
