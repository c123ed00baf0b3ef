//! In-memory collaborators for tests and host-side harnesses.
//!
//! Everything here is deterministic: no network, no wall clock. Pair them
//! with [`Backends`](crate::orchestrator::Backends) and paused tokio time to
//! drive the orchestrator end to end.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{
    ConfigSource, DecisionSettings, Environment, FeatureFlags, RemoteConfig, SdkSettings,
};
use crate::decision::{DecisionContext, DecisionService, NudgeDecision};
use crate::error::{ConfigError, DecisionError, TransportError};
use crate::events::{CapturedEvent, FrictionSignal};
use crate::pipeline::Transport;

/// A remote config pointing at a loopback decision endpoint.
pub fn remote_config(project_id: &str, sampling_rate: f64) -> RemoteConfig {
    RemoteConfig {
        project_id: project_id.to_string(),
        environment: Environment::Development,
        sdk: SdkSettings { sampling_rate },
        decision: DecisionSettings {
            endpoint: "http://localhost:8787/v1/decide".to_string(),
            timeout_ms: 400,
        },
        features: FeatureFlags::default(),
        treatment_rules: None,
        progress_timeout_rules: None,
        templates: Vec::new(),
        ttl_seconds: 60,
    }
}

/// Transport that records every batch it is given.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    batches: Mutex<Vec<Vec<CapturedEvent>>>,
    fail: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose every send fails. Attempts are still recorded.
    pub fn failing() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn batches(&self) -> Vec<Vec<CapturedEvent>> {
        lock(&self.batches).clone()
    }

    /// Every event handed to the transport, in send order.
    pub fn events(&self) -> Vec<CapturedEvent> {
        lock(&self.batches).iter().flatten().cloned().collect()
    }

    pub fn event_names(&self) -> Vec<String> {
        lock(&self.batches)
            .iter()
            .flatten()
            .map(|e| e.name.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_batch(&self, events: &[CapturedEvent]) -> Result<(), TransportError> {
        lock(&self.batches).push(events.to_vec());
        if self.fail {
            return Err(TransportError::Server {
                status: 503,
                message: "recording transport set to fail".to_string(),
            });
        }
        Ok(())
    }
}

/// Config source that always returns the same config.
#[derive(Debug)]
pub struct StaticConfigSource {
    config: RemoteConfig,
    fetches: AtomicUsize,
}

impl StaticConfigSource {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            config,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn fetch(&self, _environment: Environment) -> Result<RemoteConfig, ConfigError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.config.clone())
    }
}

/// Config source that always fails, optionally after a delay.
#[derive(Debug)]
pub struct FailingConfigSource {
    reason: String,
    delay: Option<Duration>,
}

impl FailingConfigSource {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl ConfigSource for FailingConfigSource {
    async fn fetch(&self, _environment: Environment) -> Result<RemoteConfig, ConfigError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Err(ConfigError::Fetch(self.reason.clone()))
    }
}

type RequestHook = Arc<dyn Fn(&FrictionSignal, &DecisionContext) + Send + Sync>;

/// Decision service that answers from a queue of scripted responses.
///
/// An empty queue answers "no nudge".
#[derive(Default)]
pub struct ScriptedDecisionService {
    responses: Mutex<VecDeque<Result<Option<NudgeDecision>, DecisionError>>>,
    requests: Mutex<Vec<(FrictionSignal, DecisionContext)>>,
    delay: Option<Duration>,
    on_request: Option<RequestHook>,
}

impl ScriptedDecisionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every answer, to exercise request timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Run `hook` at the moment each request arrives.
    pub fn with_request_hook(
        mut self,
        hook: impl Fn(&FrictionSignal, &DecisionContext) + Send + Sync + 'static,
    ) -> Self {
        self.on_request = Some(Arc::new(hook));
        self
    }

    pub fn push_decision(&self, decision: NudgeDecision) {
        lock(&self.responses).push_back(Ok(Some(decision)));
    }

    pub fn push_empty(&self) {
        lock(&self.responses).push_back(Ok(None));
    }

    pub fn push_error(&self, error: DecisionError) {
        lock(&self.responses).push_back(Err(error));
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<(FrictionSignal, DecisionContext)> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl DecisionService for ScriptedDecisionService {
    async fn decide(
        &self,
        signal: &FrictionSignal,
        context: &DecisionContext,
    ) -> Result<Option<NudgeDecision>, DecisionError> {
        lock(&self.requests).push((signal.clone(), context.clone()));
        if let Some(hook) = self.on_request.as_ref() {
            hook(signal, context);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        lock(&self.responses).pop_front().unwrap_or(Ok(None))
    }
}

/// A decision with just the identifying fields set.
pub fn decision(nudge_id: &str, template_id: &str) -> NudgeDecision {
    NudgeDecision {
        nudge_id: nudge_id.to_string(),
        template_id: template_id.to_string(),
        title: None,
        body: None,
        cta: None,
        treatment_override: None,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
