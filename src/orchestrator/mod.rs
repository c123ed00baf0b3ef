//! The SDK entry point.
//!
//! [`Reveal`] is an explicit context object owned by the host. It wires the
//! session, capture pipeline, detectors and decision requester together,
//! owns the nudge gate, and exposes the host surface: `init`, `track`,
//! `on_nudge_decision` and `destroy`. No public method returns an error or
//! panics into the host.
//!
//! ```text
//!   Uninitialized ──init──▶ Initializing ──ok──▶ Ready ──destroy──▶ Uninitialized
//!                               │
//!                               └──security check failed──▶ Disabled ──destroy──▶ Uninitialized
//! ```

pub mod init;

pub use init::{InitReport, InitStatus, InitStep, StepOutcome, StepPolicy, StepRecord, StepRunner};

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bucket::bucket;
use crate::clock::{SharedClock, TokioClock};
use crate::config::{
    validate_backend_url, validate_client_key, ConfigOrigin, ConfigSource, DecisionSettings,
    Endpoints, HttpConfigSource, RemoteConfig, SdkOptions, TreatmentRules,
};
use crate::decision::{
    DecisionContext, DecisionRequester, DecisionService, HttpDecisionService, NudgeDecision,
};
use crate::detector::{
    DetectorManager, FrictionDetector, FrictionEmitter, ProgressTimeoutDetector,
    ProgressTimeoutSettings,
};
use crate::error::{ConfigError, SdkError};
use crate::events::{
    EventId, EventKind, EventPayload, Extensions, FrictionSignal, SessionEventPayload,
    NUDGE_CLICKED, NUDGE_DISMISSED, SESSION_ENDED, SESSION_STARTED,
};
use crate::gate::{Delivery, GatePhase, NudgeGate};
use crate::pipeline::{
    EventPipeline, HttpTransport, NullTransport, PipelineSettings, PipelineStats, SharedStats,
    StatsSnapshot, Transport,
};
use crate::session::{assign_treatment, SessionContext, Treatment};
use crate::storage::{
    load_or_create_anonymous_id, new_anonymous_id, FileStore, IdPersistence, KeyValueStore,
};

/// Subscriber callback for delivered nudge decisions.
pub type DecisionHandler = Arc<dyn Fn(&NudgeDecision) + Send + Sync>;

/// Collaborator overrides. Anything left `None` gets the HTTP or on-disk default.
#[derive(Clone, Default)]
pub struct Backends {
    pub config_source: Option<Arc<dyn ConfigSource>>,
    pub transport: Option<Arc<dyn Transport>>,
    pub decision_service: Option<Arc<dyn DecisionService>>,
    pub store: Option<Arc<dyn KeyValueStore>>,
    pub clock: Option<SharedClock>,
}

/// Handle returned by [`Reveal::on_nudge_decision`].
pub struct Subscription {
    id: u64,
    subscribers: Weak<Subscribers>,
}

impl Subscription {
    /// Stop receiving decisions. Dropping the handle keeps the subscription.
    pub fn unsubscribe(self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.remove(self.id);
        }
    }
}

#[derive(Default)]
struct Subscribers {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(u64, DecisionHandler)>>,
}

impl Subscribers {
    fn add(&self, handler: DecisionHandler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.handlers).push((id, handler));
        id
    }

    fn remove(&self, id: u64) {
        lock(&self.handlers).retain(|(existing, _)| *existing != id);
    }

    fn notify(&self, decision: &NudgeDecision) {
        let handlers: Vec<DecisionHandler> =
            lock(&self.handlers).iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(decision))).is_err() {
                tracing::error!(nudge_id = %decision.nudge_id, "Decision subscriber panicked");
            }
        }
    }
}

enum Phase {
    Uninitialized,
    Initializing,
    Ready(Arc<Modules>),
    Disabled,
}

struct Lifecycle {
    phase: Phase,
    /// Bumped by every `init` and `destroy`; an init whose epoch is stale was aborted
    epoch: u64,
}

struct RevealInner {
    backends: Backends,
    lifecycle: Mutex<Lifecycle>,
    subscribers: Arc<Subscribers>,
    /// Registered external detectors; started on every init, stopped on teardown
    detectors: Arc<Mutex<DetectorManager>>,
}

/// The SDK context object.
///
/// Cloning yields another handle to the same context.
#[derive(Clone)]
pub struct Reveal {
    inner: Arc<RevealInner>,
}

impl Default for Reveal {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything built by one successful `init`.
struct Modules {
    config: RemoteConfig,
    origin: ConfigOrigin,
    clock: SharedClock,
    session: Arc<SessionContext>,
    pipeline: EventPipeline,
    detector: Arc<ProgressTimeoutDetector>,
    requester: Option<DecisionRequester>,
    detectors: Arc<Mutex<DetectorManager>>,
    gate: Mutex<NudgeGate>,
    emitter: FrictionEmitter,
    friction_task: Mutex<Option<JoinHandle<()>>>,
    stats: SharedStats,
    torn_down: AtomicBool,
}

/// Why `init` stopped before committing.
enum InitHalt {
    Fatal,
    Aborted,
}

struct Built {
    modules: Arc<Modules>,
    friction_rx: mpsc::UnboundedReceiver<FrictionSignal>,
}

impl Reveal {
    pub fn new() -> Self {
        Self::with_backends(Backends::default())
    }

    pub fn with_backends(backends: Backends) -> Self {
        Self {
            inner: Arc::new(RevealInner {
                backends,
                lifecycle: Mutex::new(Lifecycle {
                    phase: Phase::Uninitialized,
                    epoch: 0,
                }),
                subscribers: Arc::new(Subscribers::default()),
                detectors: Arc::new(Mutex::new(DetectorManager::new())),
            }),
        }
    }

    /// Initialize the SDK.
    ///
    /// Calling `init` while initialized, initializing or disabled changes
    /// nothing. A `destroy` during the config fetch aborts this init.
    pub async fn init(&self, client_key: &str, options: SdkOptions) -> InitReport {
        let epoch = {
            let mut lifecycle = lock(&self.inner.lifecycle);
            match lifecycle.phase {
                Phase::Uninitialized => {}
                Phase::Disabled => {
                    tracing::debug!("init ignored: SDK is disabled until destroy");
                    return InitReport::with_status(InitStatus::Disabled);
                }
                Phase::Initializing | Phase::Ready(_) => {
                    tracing::debug!("init ignored: already initialized");
                    return InitReport::with_status(InitStatus::AlreadyInitialized);
                }
            }
            lifecycle.phase = Phase::Initializing;
            lifecycle.epoch += 1;
            lifecycle.epoch
        };

        let mut runner = StepRunner::new();
        let built = self.build(epoch, client_key, &options, &mut runner).await;
        let degraded = runner.is_degraded();
        let mut report = InitReport::with_status(InitStatus::Ready);
        report.steps = runner.into_records();

        let Built {
            modules,
            friction_rx,
        } = match built {
            Ok(built) => built,
            Err(InitHalt::Fatal) => {
                let mut lifecycle = lock(&self.inner.lifecycle);
                if lifecycle.epoch == epoch {
                    lifecycle.phase = Phase::Disabled;
                    tracing::error!("Reveal SDK disabled");
                    report.status = InitStatus::Disabled;
                } else {
                    report.status = InitStatus::Aborted;
                }
                return report;
            }
            Err(InitHalt::Aborted) => {
                tracing::info!("init aborted by destroy");
                report.status = InitStatus::Aborted;
                return report;
            }
        };

        {
            let mut lifecycle = lock(&self.inner.lifecycle);
            if lifecycle.epoch != epoch || !matches!(lifecycle.phase, Phase::Initializing) {
                drop(lifecycle);
                tracing::info!("init aborted by destroy; tearing down");
                modules.teardown();
                modules.pipeline.shutdown();
                report.status = InitStatus::Aborted;
                return report;
            }
            lifecycle.phase = Phase::Ready(modules.clone());
        }

        let task = tokio::spawn(run_friction_loop(
            Arc::downgrade(&modules),
            friction_rx,
            self.inner.subscribers.clone(),
        ));
        *lock(&modules.friction_task) = Some(task);
        modules.pipeline.start();
        modules.pipeline.capture_event(
            SESSION_STARTED,
            EventPayload::Session(SessionEventPayload {
                treatment: Some(modules.session.treatment()),
                extensions: Extensions::new(),
            }),
            false,
        );

        report.status = if degraded {
            InitStatus::Degraded
        } else {
            InitStatus::Ready
        };
        report.config_origin = Some(modules.origin);
        report.session_id = Some(modules.session.id().to_string());
        report.sampled = Some(modules.pipeline.is_sampled());
        report.treatment = Some(modules.session.treatment());
        tracing::info!(
            session = %modules.session.id(),
            project = %modules.config.project_id,
            sampled = modules.pipeline.is_sampled(),
            status = ?report.status,
            "Reveal SDK initialized"
        );
        report
    }

    async fn build(
        &self,
        epoch: u64,
        client_key: &str,
        options: &SdkOptions,
        runner: &mut StepRunner,
    ) -> Result<Built, InitHalt> {
        let backends = &self.inner.backends;

        runner
            .run(InitStep::ValidateCredential, || {
                validate_client_key(client_key).map_err(SdkError::from)
            })
            .map_err(|_| InitHalt::Fatal)?;

        let endpoints = options.endpoints();
        runner
            .run(InitStep::ValidateEndpoints, || {
                endpoints.validate().map_err(SdkError::from)
            })
            .map_err(|_| InitHalt::Fatal)?;

        let environment = options.environment;
        let fetched = match config_source(backends, &endpoints, client_key, options) {
            Ok(source) => source.fetch(environment).await.map_err(SdkError::from),
            Err(e) => Err(e.into()),
        };
        if !self.is_current(epoch) {
            return Err(InitHalt::Aborted);
        }
        let (config, origin) = match runner
            .record(InitStep::FetchConfig, fetched)
            .map_err(|_| InitHalt::Fatal)?
        {
            Some(config) => (config, ConfigOrigin::Remote),
            None => (
                RemoteConfig::fallback(environment, &endpoints),
                ConfigOrigin::Fallback,
            ),
        };

        runner
            .run(InitStep::ValidateDecisionEndpoint, || {
                validate_backend_url("decision", &config.decision.endpoint).map_err(SdkError::from)
            })
            .map_err(|_| InitHalt::Fatal)?;

        let clock = backends.clock.clone().unwrap_or_else(TokioClock::shared);
        let store: Arc<dyn KeyValueStore> = match backends.store.clone() {
            Some(store) => store,
            None => Arc::new(FileStore::in_dir(options.storage_dir())),
        };
        let anonymous_id = match runner
            .run(InitStep::AnonymousId, || {
                load_or_create_anonymous_id(store.as_ref()).map_err(SdkError::from)
            })
            .map_err(|_| InitHalt::Fatal)?
        {
            Some((id, persistence)) => {
                tracing::debug!(persistence = ?persistence, "Anonymous id ready");
                id
            }
            None => {
                tracing::debug!(persistence = ?IdPersistence::Ephemeral, "Anonymous id ready");
                new_anonymous_id()
            }
        };

        let session = Arc::new(SessionContext::new(anonymous_id.as_str(), clock.now()));

        let sampled = runner
            .run(InitStep::Sampling, || {
                sampling_decision(&anonymous_id, config.sdk.sampling_rate)
            })
            .map_err(|_| InitHalt::Fatal)?
            .unwrap_or(true);

        let treatment = runner
            .run(InitStep::Treatment, || {
                treatment_decision(config.treatment_rules.as_ref(), &anonymous_id, session.id())
            })
            .map_err(|_| InitHalt::Fatal)?
            .unwrap_or_default();
        session.assign_treatment(treatment);

        let transport: Arc<dyn Transport> = match runner
            .run(InitStep::Transport, || {
                ingest_transport(backends, &endpoints, client_key, options)
            })
            .map_err(|_| InitHalt::Fatal)?
        {
            Some(transport) => transport,
            None => Arc::new(NullTransport),
        };

        let stats: SharedStats = Arc::new(PipelineStats::new());
        let pipeline = EventPipeline::new(
            session.clone(),
            sampled,
            clock.clone(),
            transport,
            stats.clone(),
            PipelineSettings {
                batch_size: options.batch_size.max(1),
                flush_interval: options.flush_interval,
            },
        );

        let (friction_tx, friction_rx) = mpsc::unbounded_channel::<FrictionSignal>();
        let emitter: FrictionEmitter = Arc::new(move |signal: FrictionSignal| {
            if friction_tx.send(signal).is_err() {
                tracing::debug!("Friction signal after teardown; dropped");
            }
        });

        let detector = match runner
            .run(InitStep::ProgressDetector, || {
                progress_detector(&config, clock.clone(), emitter.clone())
            })
            .map_err(|_| InitHalt::Fatal)?
        {
            Some(detector) => detector,
            None => ProgressTimeoutDetector::disabled(),
        };
        let detector = Arc::new(detector);
        let hook_detector = detector.clone();
        pipeline.set_on_captured(Arc::new(move |event| hook_detector.on_event(event)));

        let requester = runner
            .run(InitStep::DecisionRequester, || {
                decision_requester(backends, &config, client_key)
            })
            .map_err(|_| InitHalt::Fatal)?;

        let (registered, running) = {
            let mut manager = lock(&self.inner.detectors);
            (manager.len(), manager.start_all(&emitter))
        };
        runner
            .record(
                InitStep::ExternalDetectors,
                if running == registered {
                    Ok(())
                } else {
                    Err(SdkError::Disabled(format!(
                        "{} of {} detectors failed to start",
                        registered - running,
                        registered
                    )))
                },
            )
            .map_err(|_| InitHalt::Fatal)?;

        let modules = Arc::new(Modules {
            config,
            origin,
            clock,
            session,
            pipeline,
            detector,
            requester,
            detectors: self.inner.detectors.clone(),
            gate: Mutex::new(NudgeGate::new()),
            emitter,
            friction_task: Mutex::new(None),
            stats,
            torn_down: AtomicBool::new(false),
        });
        Ok(Built {
            modules,
            friction_rx,
        })
    }

    /// Record a host event. Returns the event id, or `None` when the SDK is
    /// not running or the event is invalid.
    ///
    /// `nudge_dismissed` and `nudge_clicked` nudge events close the active
    /// nudge and start the cooldown.
    pub fn track(&self, kind: &str, name: &str, payload: Extensions) -> Option<EventId> {
        let Some(modules) = self.modules() else {
            tracing::debug!(kind = %kind, event = %name, "track ignored: SDK not initialized");
            return None;
        };
        let kind = match kind.parse::<EventKind>() {
            Ok(kind) => kind,
            Err(e) => {
                tracing::warn!("track ignored: {}", e);
                return None;
            }
        };
        let payload = match EventPayload::from_map(kind, payload) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(event = %name, "track ignored: {}", e);
                return None;
            }
        };

        if kind == EventKind::Nudge && (name == NUDGE_DISMISSED || name == NUDGE_CLICKED) {
            lock(&modules.gate).close_nudge(modules.clock.now());
            tracing::debug!(event = %name, "Nudge closed; cooldown started");
        }
        modules.pipeline.capture_event(name, payload, false)
    }

    /// Subscribe to delivered nudge decisions.
    ///
    /// Subscriptions survive `destroy`/`init` cycles.
    pub fn on_nudge_decision(
        &self,
        handler: impl Fn(&NudgeDecision) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.subscribers.add(Arc::new(handler));
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.inner.subscribers),
        }
    }

    /// Tell the progress detector the host navigated.
    pub fn notify_route_change(&self, route: &str) {
        if let Some(modules) = self.modules() {
            modules.detector.on_route_change(route);
        }
    }

    /// Feed a host-detected friction signal into the gating path.
    pub fn report_friction(&self, signal: FrictionSignal) -> bool {
        match self.modules() {
            Some(modules) => {
                (modules.emitter)(signal);
                true
            }
            None => {
                tracing::debug!("report_friction ignored: SDK not initialized");
                false
            }
        }
    }

    /// Add an external detector. It starts now on a running SDK and again
    /// on every later `init`.
    pub fn register_detector(&self, detector: Box<dyn FrictionDetector>) {
        let modules = self.modules();
        let mut manager = lock(&self.inner.detectors);
        manager.register(detector);
        if let Some(modules) = modules {
            manager.start_all(&modules.emitter);
        }
    }

    /// Send everything buffered now. Returns the number of events drained.
    pub async fn flush(&self) -> usize {
        match self.modules() {
            Some(modules) => modules.pipeline.flush().await,
            None => 0,
        }
    }

    /// Tear everything down and re-arm for a future `init`. Idempotent.
    ///
    /// Buffered events get a best-effort final send that is not awaited.
    pub fn destroy(&self) {
        if let Some(modules) = self.take_modules() {
            modules.teardown();
            modules.pipeline.shutdown();
            tracing::info!(session = %modules.session.id(), "Reveal SDK destroyed");
        }
    }

    /// Like [`destroy`](Self::destroy), but waits for the final send.
    pub async fn shutdown(&self) {
        if let Some(modules) = self.take_modules() {
            modules.teardown();
            modules.pipeline.close().await;
            tracing::info!(session = %modules.session.id(), "Reveal SDK shut down");
        }
    }

    /// Counters for the current lifecycle.
    pub fn stats(&self) -> Option<StatsSnapshot> {
        self.modules().map(|m| m.stats.snapshot())
    }

    pub fn session_id(&self) -> Option<String> {
        self.modules().map(|m| m.session.id().to_string())
    }

    pub fn treatment(&self) -> Option<Treatment> {
        self.modules().map(|m| m.session.treatment())
    }

    pub fn gate_phase(&self) -> Option<GatePhase> {
        self.modules()
            .map(|m| lock(&m.gate).phase(m.clock.now()))
    }

    pub fn is_initialized(&self) -> bool {
        matches!(lock(&self.inner.lifecycle).phase, Phase::Ready(_))
    }

    pub fn is_disabled(&self) -> bool {
        matches!(lock(&self.inner.lifecycle).phase, Phase::Disabled)
    }

    fn modules(&self) -> Option<Arc<Modules>> {
        match &lock(&self.inner.lifecycle).phase {
            Phase::Ready(modules) => Some(modules.clone()),
            _ => None,
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        lock(&self.inner.lifecycle).epoch == epoch
    }

    /// Reset to `Uninitialized`, returning the running modules if any.
    fn take_modules(&self) -> Option<Arc<Modules>> {
        let mut lifecycle = lock(&self.inner.lifecycle);
        lifecycle.epoch += 1;
        match std::mem::replace(&mut lifecycle.phase, Phase::Uninitialized) {
            Phase::Ready(modules) => Some(modules),
            Phase::Initializing => {
                tracing::debug!("destroy during init; init will abort");
                None
            }
            Phase::Disabled => {
                tracing::debug!("destroy re-arms a disabled SDK");
                None
            }
            Phase::Uninitialized => None,
        }
    }
}

impl Modules {
    /// Stop everything except the pipeline. Idempotent.
    fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = lock(&self.friction_task).take() {
            task.abort();
        }
        lock(&self.detectors).stop_all();
        self.detector.destroy();

        let now = self.clock.now();
        self.pipeline.capture_event(
            SESSION_ENDED,
            EventPayload::Session(SessionEventPayload {
                treatment: Some(self.session.treatment()),
                extensions: Extensions::new(),
            }),
            false,
        );
        self.session.end(now);
    }

    /// Gate, request and deliver for one friction signal.
    async fn handle_friction(&self, signal: FrictionSignal, subscribers: &Subscribers) {
        self.stats.record_friction();

        // The friction event must reach the transport before the decision
        // request that references it.
        let friction_event_id = self.pipeline.capture_event(
            signal.signal_type.as_str(),
            EventPayload::from_signal(&signal),
            true,
        );
        self.pipeline.flush().await;

        {
            let gate = lock(&self.gate);
            let now = self.clock.now();
            if !gate.allows_request(now) {
                self.stats.record_decision_suppressed();
                tracing::debug!(
                    friction = %signal.signal_type,
                    phase = ?gate.phase(now),
                    "Friction captured; decision request gated"
                );
                return;
            }
        }

        let Some(requester) = self.requester.as_ref() else {
            return;
        };
        let context = DecisionContext {
            project_id: self.config.project_id.clone(),
            session_id: self.session.id().to_string(),
            anonymous_id: self.session.anonymous_id().to_string(),
            // Requests are only sent from an idle gate.
            is_nudge_active: false,
            friction_event_id,
        };
        self.stats.record_decision_requested();
        let Some(decision) = requester.request_decision(&signal, &context).await else {
            return;
        };

        if let Some(treatment) = decision.treatment_override {
            self.session.assign_treatment(treatment);
        }
        if !self.config.features.template_enabled(&decision.template_id) {
            self.stats.record_decision_suppressed();
            tracing::debug!(template_id = %decision.template_id, "Template disabled; decision dropped");
            return;
        }

        let delivery = lock(&self.gate).accept_decision(self.clock.now(), &decision.nudge_id);
        match delivery {
            Delivery::Deliver => {
                self.stats.record_decision_delivered();
                tracing::info!(
                    nudge_id = %decision.nudge_id,
                    template_id = %decision.template_id,
                    "Nudge decision delivered"
                );
                subscribers.notify(&decision);
            }
            Delivery::Duplicate => {
                tracing::debug!(nudge_id = %decision.nudge_id, "Duplicate decision ignored");
            }
            Delivery::Gated => {
                self.stats.record_decision_suppressed();
                tracing::debug!(
                    nudge_id = %decision.nudge_id,
                    "Gate closed while the request was in flight; decision dropped"
                );
            }
        }
    }
}

/// Handles friction signals one at a time, in arrival order.
async fn run_friction_loop(
    modules: Weak<Modules>,
    mut rx: mpsc::UnboundedReceiver<FrictionSignal>,
    subscribers: Arc<Subscribers>,
) {
    while let Some(signal) = rx.recv().await {
        let Some(modules) = modules.upgrade() else {
            break;
        };
        modules.handle_friction(signal, &subscribers).await;
    }
}

fn config_source(
    backends: &Backends,
    endpoints: &Endpoints,
    client_key: &str,
    options: &SdkOptions,
) -> Result<Arc<dyn ConfigSource>, ConfigError> {
    if let Some(source) = backends.config_source.clone() {
        return Ok(source);
    }
    let source = HttpConfigSource::new(endpoints.config.as_str(), client_key, options.http_timeout)?;
    Ok(Arc::new(source))
}

fn ingest_transport(
    backends: &Backends,
    endpoints: &Endpoints,
    client_key: &str,
    options: &SdkOptions,
) -> Result<Arc<dyn Transport>, SdkError> {
    if let Some(transport) = backends.transport.clone() {
        return Ok(transport);
    }
    let transport = HttpTransport::new(endpoints.ingest.as_str(), client_key, options.http_timeout)?;
    Ok(Arc::new(transport))
}

fn decision_requester(
    backends: &Backends,
    config: &RemoteConfig,
    client_key: &str,
) -> Result<DecisionRequester, SdkError> {
    let timeout_ms = match config.decision.timeout_ms {
        0 => config.environment.default_decision_timeout_ms(),
        ms => ms,
    };
    let settings = DecisionSettings {
        endpoint: config.decision.endpoint.clone(),
        timeout_ms,
    };
    let service: Arc<dyn DecisionService> = match backends.decision_service.clone() {
        Some(service) => service,
        None => Arc::new(HttpDecisionService::new(&settings, client_key)?),
    };
    Ok(DecisionRequester::new(service, settings.timeout()))
}

fn progress_detector(
    config: &RemoteConfig,
    clock: SharedClock,
    emitter: FrictionEmitter,
) -> Result<ProgressTimeoutDetector, SdkError> {
    let settings = ProgressTimeoutSettings::from_rules(
        config.progress_timeout_rules.as_ref(),
        config.features.progress_timeout,
    );
    if settings.is_some() {
        tokio::runtime::Handle::try_current().map_err(|e| SdkError::Runtime(e.to_string()))?;
    }
    Ok(ProgressTimeoutDetector::new(settings, clock, emitter))
}

fn sampling_decision(anonymous_id: &str, sampling_rate: f64) -> Result<bool, SdkError> {
    if sampling_rate.is_nan() {
        return Err(ConfigError::Parse("samplingRate is not a number".to_string()).into());
    }
    Ok(bucket(anonymous_id, sampling_rate))
}

fn treatment_decision(
    rules: Option<&TreatmentRules>,
    anonymous_id: &str,
    session_id: &str,
) -> Result<Treatment, SdkError> {
    if rules.is_some_and(|r| r.treatment_percentage.is_nan()) {
        return Err(ConfigError::Parse("treatment_percentage is not a number".to_string()).into());
    }
    Ok(assign_treatment(rules, anonymous_id, session_id))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::testing::{remote_config, RecordingTransport, StaticConfigSource};

    fn reveal(config: RemoteConfig) -> (Reveal, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::new());
        let reveal = Reveal::with_backends(Backends {
            config_source: Some(Arc::new(StaticConfigSource::new(config))),
            transport: Some(transport.clone()),
            store: Some(Arc::new(MemoryStore::new())),
            ..Backends::default()
        });
        (reveal, transport)
    }

    #[test]
    fn test_sampling_rejects_nan() {
        assert!(sampling_decision("anon", f64::NAN).is_err());
        assert!(sampling_decision("anon", 1.0).unwrap());
        assert!(!sampling_decision("anon", 0.0).unwrap());
    }

    #[test]
    fn test_track_before_init_is_ignored() {
        let reveal = Reveal::new();
        assert!(reveal.track("product", "page_viewed", Extensions::new()).is_none());
        assert!(!reveal.report_friction(FrictionSignal::new(
            crate::events::FrictionType::Stall,
            "/",
            chrono::Utc::now()
        )));
        reveal.destroy();
    }

    #[tokio::test]
    async fn test_unknown_kind_is_ignored() {
        let (reveal, _) = reveal(remote_config("proj", 1.0));
        assert!(reveal.init("key", SdkOptions::default()).await.is_running());
        assert!(reveal.track("purchase", "bought", Extensions::new()).is_none());
        assert!(reveal.track("friction", "no_type", Extensions::new()).is_none());
        assert!(reveal.track("product", "page_viewed", Extensions::new()).is_some());
        reveal.destroy();
    }

    struct UnavailableStore;

    impl KeyValueStore for UnavailableStore {
        fn get(&self, _key: &str) -> Result<Option<String>, crate::error::StorageError> {
            Err(crate::error::StorageError::Unavailable("private mode".to_string()))
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), crate::error::StorageError> {
            Err(crate::error::StorageError::Unavailable("private mode".to_string()))
        }
    }

    #[tokio::test]
    async fn test_storage_failure_uses_in_memory_id() {
        let reveal = Reveal::with_backends(Backends {
            config_source: Some(Arc::new(StaticConfigSource::new(remote_config("proj", 1.0)))),
            transport: Some(Arc::new(RecordingTransport::new())),
            store: Some(Arc::new(UnavailableStore)),
            ..Backends::default()
        });
        let report = reveal.init("key", SdkOptions::default()).await;
        assert_eq!(report.status, InitStatus::Degraded);
        assert!(matches!(
            report.outcome(InitStep::AnonymousId),
            Some(StepOutcome::Degraded(_))
        ));
        assert!(reveal.track("product", "page_viewed", Extensions::new()).is_some());
        reveal.destroy();
    }

    #[tokio::test]
    async fn test_destroy_captures_session_end() {
        let (reveal, transport) = reveal(remote_config("proj", 1.0));
        reveal.init("key", SdkOptions::default()).await;
        reveal.shutdown().await;
        assert_eq!(transport.event_names(), vec![SESSION_STARTED, SESSION_ENDED]);
        assert!(!reveal.is_initialized());
    }
}
