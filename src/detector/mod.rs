//! Friction detectors.
//!
//! The progress-timeout detector is built into the SDK. Stall, rage-click and
//! backtrack detectors are external and plug in through [`FrictionDetector`].

pub mod manager;
pub mod progress;

use std::sync::Arc;

use crate::events::FrictionSignal;

pub use manager::{DetectorManager, FrictionDetector};
pub use progress::{EpisodePhase, ProgressTimeoutDetector, ProgressTimeoutSettings};

/// Callback through which detectors report friction.
pub type FrictionEmitter = Arc<dyn Fn(FrictionSignal) + Send + Sync>;
