//! Event model for the Reveal SDK.
//!
//! Raw event intents come from the host application, detectors, and the
//! SDK's own modules. The capture pipeline turns them into
//! [`CapturedEvent`]s tagged with session context.

pub mod friction;
pub mod types;

pub use friction::{FrictionExtra, FrictionSignal, FrictionType};
pub use types::{
    CapturedEvent, EventId, EventKind, EventPayload, Extensions, FrictionPayload, NudgePayload,
    ProductPayload, RawEvent, SessionEventPayload,
};

/// Nudge event names that close the active nudge and start the cooldown.
pub const NUDGE_DISMISSED: &str = "nudge_dismissed";
pub const NUDGE_CLICKED: &str = "nudge_clicked";

pub const SESSION_STARTED: &str = "session_started";
pub const SESSION_ENDED: &str = "session_ended";
