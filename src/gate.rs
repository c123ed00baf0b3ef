//! Nudge gate: decides when a friction signal may turn into a decision
//! request, and whether a decision reaches subscribers.
//!
//! ```text
//!   Idle ──decision──▶ NudgeActive ──dismiss/click──▶ Cooldown ──2s──▶ Idle
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Cooldown after a nudge is dismissed or clicked.
pub const NUDGE_COOLDOWN_MS: i64 = 2000;

/// Observable gate phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePhase {
    Idle,
    NudgeActive,
    Cooldown,
}

/// Outcome of offering a decision to the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// New decision; notify subscribers
    Deliver,
    /// Same nudge id as the last delivered decision
    Duplicate,
    /// A nudge became active or a cooldown began while the request was in flight
    Gated,
}

/// Orchestrator-internal gate state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NudgeGate {
    is_nudge_active: bool,
    cooldown_until: Option<DateTime<Utc>>,
    last_decision_id: Option<String>,
}

impl NudgeGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self, now: DateTime<Utc>) -> GatePhase {
        if self.is_nudge_active {
            GatePhase::NudgeActive
        } else if self.cooldown_until.is_some_and(|until| now < until) {
            GatePhase::Cooldown
        } else {
            GatePhase::Idle
        }
    }

    /// Whether a decision may be requested at `now`.
    pub fn allows_request(&self, now: DateTime<Utc>) -> bool {
        self.phase(now) == GatePhase::Idle
    }

    /// Record an arriving decision.
    ///
    /// A gated decision changes nothing; otherwise the nudge is active, even
    /// for a duplicate.
    pub fn accept_decision(&mut self, now: DateTime<Utc>, nudge_id: &str) -> Delivery {
        if !self.allows_request(now) {
            return Delivery::Gated;
        }
        self.is_nudge_active = true;
        if self.last_decision_id.as_deref() == Some(nudge_id) {
            return Delivery::Duplicate;
        }
        self.last_decision_id = Some(nudge_id.to_string());
        Delivery::Deliver
    }

    /// The visible nudge was dismissed or clicked.
    pub fn close_nudge(&mut self, now: DateTime<Utc>) {
        self.is_nudge_active = false;
        self.cooldown_until = Some(now + Duration::milliseconds(NUDGE_COOLDOWN_MS));
    }
}
