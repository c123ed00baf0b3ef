//! Initialization steps and their failure policies.
//!
//! Each step of `init` runs through [`StepRunner`], which applies the step's
//! policy to its result: fatal steps disable the SDK, degradable steps fall
//! back to a safe default, ignorable steps are only logged. Only credential
//! and endpoint validation are fatal.

use serde::Serialize;

use crate::config::ConfigOrigin;
use crate::error::SdkError;
use crate::session::Treatment;

/// Ordered initialization steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStep {
    ValidateCredential,
    ValidateEndpoints,
    FetchConfig,
    ValidateDecisionEndpoint,
    AnonymousId,
    Sampling,
    Treatment,
    Transport,
    ProgressDetector,
    DecisionRequester,
    ExternalDetectors,
}

/// What a failing step does to the rest of initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPolicy {
    /// Abort and disable the SDK
    Fatal,
    /// Continue with a fallback value
    Degrade,
    /// Continue; the step's absence is harmless
    Ignore,
}

impl InitStep {
    pub fn policy(&self) -> StepPolicy {
        match self {
            InitStep::ValidateCredential
            | InitStep::ValidateEndpoints
            | InitStep::ValidateDecisionEndpoint => StepPolicy::Fatal,
            InitStep::FetchConfig
            | InitStep::AnonymousId
            | InitStep::Sampling
            | InitStep::Treatment
            | InitStep::Transport
            | InitStep::ProgressDetector
            | InitStep::DecisionRequester => StepPolicy::Degrade,
            InitStep::ExternalDetectors => StepPolicy::Ignore,
        }
    }
}

/// Result of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    Ok,
    Degraded(String),
    Ignored(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub step: InitStep,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

/// Overall result of `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStatus {
    Ready,
    /// Running, but at least one step fell back
    Degraded,
    /// A security check failed; the SDK does nothing
    Disabled,
    /// `init` was already called; nothing changed
    AlreadyInitialized,
    /// `destroy` ran while `init` was in flight
    Aborted,
}

/// What `init` did, step by step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitReport {
    pub status: InitStatus,
    pub steps: Vec<StepRecord>,
    pub config_origin: Option<ConfigOrigin>,
    pub session_id: Option<String>,
    pub sampled: Option<bool>,
    pub treatment: Option<Treatment>,
}

impl InitReport {
    pub fn with_status(status: InitStatus) -> Self {
        Self {
            status,
            steps: Vec::new(),
            config_origin: None,
            session_id: None,
            sampled: None,
            treatment: None,
        }
    }

    pub fn outcome(&self, step: InitStep) -> Option<&StepOutcome> {
        self.steps.iter().find(|r| r.step == step).map(|r| &r.outcome)
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, InitStatus::Ready | InitStatus::Degraded)
    }
}

/// Applies step policies and records outcomes.
#[derive(Debug, Default)]
pub struct StepRunner {
    records: Vec<StepRecord>,
}

impl StepRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a step's result.
    ///
    /// `Ok(Some(value))` on success, `Ok(None)` when the step failed but its
    /// policy lets init continue, `Err` when the failure is fatal.
    pub fn record<T>(&mut self, step: InitStep, result: Result<T, SdkError>) -> Result<Option<T>, SdkError> {
        match result {
            Ok(value) => {
                self.push(step, StepOutcome::Ok);
                Ok(Some(value))
            }
            Err(e) => match step.policy() {
                StepPolicy::Fatal => {
                    tracing::error!(step = ?step, "Initialization failed: {}", e);
                    self.push(step, StepOutcome::Failed(e.to_string()));
                    Err(e)
                }
                StepPolicy::Degrade => {
                    tracing::warn!(step = ?step, "Continuing with fallback: {}", e);
                    self.push(step, StepOutcome::Degraded(e.to_string()));
                    Ok(None)
                }
                StepPolicy::Ignore => {
                    tracing::debug!(step = ?step, "Step skipped: {}", e);
                    self.push(step, StepOutcome::Ignored(e.to_string()));
                    Ok(None)
                }
            },
        }
    }

    /// Run a synchronous step.
    pub fn run<T>(
        &mut self,
        step: InitStep,
        f: impl FnOnce() -> Result<T, SdkError>,
    ) -> Result<Option<T>, SdkError> {
        self.record(step, f())
    }

    pub fn is_degraded(&self) -> bool {
        self.records
            .iter()
            .any(|r| matches!(r.outcome, StepOutcome::Degraded(_)))
    }

    pub fn into_records(self) -> Vec<StepRecord> {
        self.records
    }

    fn push(&mut self, step: InitStep, outcome: StepOutcome) {
        // A later record for the same step replaces the earlier one.
        self.records.retain(|r| r.step != step);
        self.records.push(StepRecord { step, outcome });
    }
}
