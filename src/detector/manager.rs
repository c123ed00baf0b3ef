//! Registry for external friction detectors (stall, rage-click, backtrack).
//!
//! The detectors themselves live outside the SDK; only their output contract
//! matters here. A detector that fails to start, or panics while doing so, is
//! skipped without affecting the others.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::detector::FrictionEmitter;
use crate::error::DetectorError;

/// A source of friction signals.
pub trait FrictionDetector: Send {
    fn name(&self) -> &str;

    /// Begin observing. Signals are reported through `emitter`.
    fn start(&mut self, emitter: FrictionEmitter) -> Result<(), DetectorError>;

    fn stop(&mut self);
}

struct Registered {
    detector: Box<dyn FrictionDetector>,
    running: bool,
}

/// Starts, stops and isolates registered detectors.
#[derive(Default)]
pub struct DetectorManager {
    detectors: Vec<Registered>,
}

impl DetectorManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, detector: Box<dyn FrictionDetector>) {
        self.detectors.push(Registered {
            detector,
            running: false,
        });
    }

    /// Start every registered detector. Returns how many are running.
    pub fn start_all(&mut self, emitter: &FrictionEmitter) -> usize {
        for entry in self.detectors.iter_mut().filter(|d| !d.running) {
            let name = entry.detector.name().to_string();
            let emitter = emitter.clone();
            let outcome = catch_unwind(AssertUnwindSafe(|| entry.detector.start(emitter)));
            match outcome {
                Ok(Ok(())) => {
                    entry.running = true;
                    tracing::debug!(detector = %name, "Detector started");
                }
                Ok(Err(e)) => tracing::warn!(detector = %name, "Detector skipped: {}", e),
                Err(_) => tracing::error!(detector = %name, "Detector panicked on start; skipped"),
            }
        }
        self.running_count()
    }

    /// Stop every running detector. Idempotent.
    pub fn stop_all(&mut self) {
        for entry in self.detectors.iter_mut().filter(|d| d.running) {
            let name = entry.detector.name().to_string();
            if catch_unwind(AssertUnwindSafe(|| entry.detector.stop())).is_err() {
                tracing::error!(detector = %name, "Detector panicked on stop");
            }
            entry.running = false;
        }
    }

    pub fn running_count(&self) -> usize {
        self.detectors.iter().filter(|d| d.running).count()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}
