//! End-to-end tests for the Reveal orchestrator, driven by paused tokio time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use pretty_assertions::assert_eq;

use reveal_sdk::config::{ProgressTimeoutRules, RemoteConfig, TreatmentRules};
use reveal_sdk::detector::FrictionEmitter;
use reveal_sdk::error::DetectorError;
use reveal_sdk::gate::GatePhase;
use reveal_sdk::orchestrator::{InitStep, StepOutcome};
use reveal_sdk::storage::MemoryStore;
use reveal_sdk::testing::{
    decision, remote_config, FailingConfigSource, RecordingTransport, ScriptedDecisionService,
    StaticConfigSource,
};
use reveal_sdk::{
    Backends, EventKind, Extensions, FrictionDetector, FrictionSignal, FrictionType, InitStatus,
    NudgeDecision, Reveal, SdkOptions, Subscription, Treatment,
};

struct Harness {
    reveal: Reveal,
    transport: Arc<RecordingTransport>,
    decisions: Arc<ScriptedDecisionService>,
    config_source: Arc<StaticConfigSource>,
}

fn harness(config: RemoteConfig) -> Harness {
    harness_with(config, ScriptedDecisionService::new())
}

fn harness_with(config: RemoteConfig, service: ScriptedDecisionService) -> Harness {
    harness_with_transport(config, service, Arc::new(RecordingTransport::new()))
}

fn harness_with_transport(
    config: RemoteConfig,
    service: ScriptedDecisionService,
    transport: Arc<RecordingTransport>,
) -> Harness {
    let decisions = Arc::new(service);
    let config_source = Arc::new(StaticConfigSource::new(config));
    let reveal = Reveal::with_backends(Backends {
        config_source: Some(config_source.clone()),
        transport: Some(transport.clone()),
        decision_service: Some(decisions.clone()),
        store: Some(Arc::new(MemoryStore::new())),
        clock: None,
    });
    Harness {
        reveal,
        transport,
        decisions,
        config_source,
    }
}

fn options() -> SdkOptions {
    SdkOptions {
        api_base: "https://api.example.com".to_string(),
        ..SdkOptions::default()
    }
}

fn rageclick() -> FrictionSignal {
    FrictionSignal::new(FrictionType::Rageclick, "/cart", Utc::now()).with_selector("#buy")
}

fn collect(reveal: &Reveal) -> (Subscription, Arc<Mutex<Vec<NudgeDecision>>>) {
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = delivered.clone();
    let subscription = reveal.on_nudge_decision(move |d| sink.lock().unwrap().push(d.clone()));
    (subscription, delivered)
}

async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

async fn advance(ms: u64) {
    tokio::time::advance(Duration::from_millis(ms)).await;
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn test_sampled_event_reaches_transport() {
    let h = harness(remote_config("proj", 1.0));
    let report = h.reveal.init("client-key", options()).await;
    assert_eq!(report.status, InitStatus::Ready);
    assert_eq!(report.sampled, Some(true));

    let id = h
        .reveal
        .track("product", "page_viewed", Extensions::new())
        .expect("event captured");
    h.reveal.flush().await;

    let sent = h.transport.events();
    let event = sent.iter().find(|e| e.event_id == id).expect("event sent");
    assert_eq!(event.kind, EventKind::Product);
    assert!(event.sampled);
    assert_eq!(Some(event.session_id.clone()), h.reveal.session_id());
    h.reveal.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_unsampled_events_are_captured_but_not_sent() {
    let h = harness(remote_config("proj", 0.0));
    let report = h.reveal.init("client-key", options()).await;
    assert_eq!(report.sampled, Some(false));

    assert!(h
        .reveal
        .track("product", "page_viewed", Extensions::new())
        .is_some());
    h.reveal.flush().await;

    assert!(h.transport.events().is_empty());
    let stats = h.reveal.stats().unwrap();
    assert_eq!(stats.events_captured, stats.events_sampled_out);
    assert!(stats.events_sampled_out >= 2);
    h.reveal.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_friction_event_is_sent_before_decision_request() {
    let transport = Arc::new(RecordingTransport::new());
    let observed = Arc::new(Mutex::new(Vec::new()));
    let seen_transport = transport.clone();
    let seen_observed = observed.clone();
    let service = ScriptedDecisionService::new().with_request_hook(move |_signal, context| {
        let sent = seen_transport
            .events()
            .iter()
            .any(|e| Some(&e.event_id) == context.friction_event_id.as_ref());
        seen_observed.lock().unwrap().push(sent);
    });
    let h = harness_with_transport(remote_config("proj", 1.0), service, transport);
    h.reveal.init("client-key", options()).await;

    assert!(h.reveal.report_friction(rageclick()));
    settle().await;

    assert_eq!(*observed.lock().unwrap(), vec![true]);
    let (signal, context) = h.decisions.requests().remove(0);
    assert_eq!(signal.signal_type, FrictionType::Rageclick);
    assert_eq!(context.project_id, "proj");
    assert!(!context.is_nudge_active);
    let friction = h
        .transport
        .events()
        .into_iter()
        .find(|e| e.kind == EventKind::Friction)
        .unwrap();
    assert_eq!(friction.name, "rageclick");
    assert_eq!(context.friction_event_id, Some(friction.event_id));
    h.reveal.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_active_nudge_blocks_decision_requests() {
    let h = harness(remote_config("proj", 1.0));
    let (_subscription, delivered) = collect(&h.reveal);
    h.decisions.push_decision(decision("n1", "tooltip"));
    h.reveal.init("client-key", options()).await;

    h.reveal.report_friction(rageclick());
    settle().await;
    assert_eq!(delivered.lock().unwrap().len(), 1);
    assert_eq!(h.reveal.gate_phase(), Some(GatePhase::NudgeActive));

    h.reveal.report_friction(rageclick());
    settle().await;
    assert_eq!(h.decisions.request_count(), 1);
    let stats = h.reveal.stats().unwrap();
    assert_eq!(stats.friction_signals, 2);
    assert_eq!(stats.decisions_suppressed, 1);

    // Both signals were still captured as telemetry.
    h.reveal.flush().await;
    let frictions = h
        .transport
        .events()
        .iter()
        .filter(|e| e.kind == EventKind::Friction)
        .count();
    assert_eq!(frictions, 2);
    h.reveal.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_dismissal_starts_two_second_cooldown() {
    let h = harness(remote_config("proj", 1.0));
    let (_subscription, delivered) = collect(&h.reveal);
    h.decisions.push_decision(decision("n1", "tooltip"));
    h.reveal.init("client-key", options()).await;

    h.reveal.report_friction(rageclick());
    settle().await;
    assert_eq!(delivered.lock().unwrap().len(), 1);

    h.reveal
        .track("nudge", "nudge_dismissed", Extensions::new())
        .unwrap();
    assert_eq!(h.reveal.gate_phase(), Some(GatePhase::Cooldown));

    h.reveal.report_friction(rageclick());
    settle().await;
    assert_eq!(h.decisions.request_count(), 1);

    advance(1_999).await;
    h.reveal.report_friction(rageclick());
    settle().await;
    assert_eq!(h.decisions.request_count(), 1);

    advance(1).await;
    assert_eq!(h.reveal.gate_phase(), Some(GatePhase::Idle));
    h.reveal.report_friction(rageclick());
    settle().await;
    assert_eq!(h.decisions.request_count(), 2);
    h.reveal.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_dismissal_during_pending_request_drops_decision() {
    let service = ScriptedDecisionService::new().with_delay(Duration::from_millis(300));
    let h = harness_with(remote_config("proj", 1.0), service);
    let (_subscription, delivered) = collect(&h.reveal);
    h.decisions.push_decision(decision("n1", "tooltip"));
    h.reveal.init("client-key", options()).await;

    h.reveal.report_friction(rageclick());
    settle().await;
    assert_eq!(h.decisions.request_count(), 1);

    h.reveal
        .track("nudge", "nudge_dismissed", Extensions::new())
        .unwrap();
    assert_eq!(h.reveal.gate_phase(), Some(GatePhase::Cooldown));

    advance(300).await;
    assert!(delivered.lock().unwrap().is_empty());
    assert_eq!(h.reveal.gate_phase(), Some(GatePhase::Cooldown));
    let stats = h.reveal.stats().unwrap();
    assert_eq!(stats.decisions_delivered, 0);
    assert_eq!(stats.decisions_suppressed, 1);

    // The dropped nudge id is not remembered, so it can still be delivered later.
    advance(1_700).await;
    h.decisions.push_decision(decision("n1", "tooltip"));
    h.reveal.report_friction(rageclick());
    settle().await;
    advance(300).await;
    assert_eq!(delivered.lock().unwrap().len(), 1);
    h.reveal.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_decision_is_delivered_once() {
    let h = harness(remote_config("proj", 1.0));
    let (_subscription, delivered) = collect(&h.reveal);
    h.decisions.push_decision(decision("n1", "tooltip"));
    h.decisions.push_decision(decision("n1", "tooltip"));
    h.reveal.init("client-key", options()).await;

    h.reveal.report_friction(rageclick());
    settle().await;
    h.reveal.track("nudge", "nudge_clicked", Extensions::new());
    advance(2_000).await;
    h.reveal.report_friction(rageclick());
    settle().await;

    assert_eq!(h.decisions.request_count(), 2);
    assert_eq!(delivered.lock().unwrap().len(), 1);
    assert_eq!(h.reveal.stats().unwrap().decisions_delivered, 1);
    h.reveal.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_disabled_template_is_not_delivered() {
    let mut config = remote_config("proj", 1.0);
    config.features.templates.insert("spotlight".to_string(), false);
    let h = harness(config);
    let (_subscription, delivered) = collect(&h.reveal);
    h.decisions.push_decision(decision("n1", "spotlight"));
    h.reveal.init("client-key", options()).await;

    h.reveal.report_friction(rageclick());
    settle().await;

    assert!(delivered.lock().unwrap().is_empty());
    assert_eq!(h.reveal.gate_phase(), Some(GatePhase::Idle));
    h.reveal.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_treatment_override_downgrades_session() {
    let mut config = remote_config("proj", 1.0);
    config.treatment_rules = Some(TreatmentRules {
        treatment_percentage: 100.0,
        sticky: true,
    });
    let h = harness(config);
    let mut downgrade = decision("n1", "tooltip");
    downgrade.treatment_override = Some(Treatment::Control);
    h.decisions.push_decision(downgrade);

    let report = h.reveal.init("client-key", options()).await;
    assert_eq!(report.treatment, Some(Treatment::Treatment));

    h.reveal.report_friction(rageclick());
    settle().await;
    assert_eq!(h.reveal.treatment(), Some(Treatment::Control));
    h.reveal.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_insecure_endpoint_disables_sdk() {
    let h = harness(remote_config("proj", 1.0));
    let insecure = SdkOptions {
        api_base: "http://api.example.com".to_string(),
        ..SdkOptions::default()
    };

    let report = h.reveal.init("client-key", insecure.clone()).await;
    assert_eq!(report.status, InitStatus::Disabled);
    assert!(matches!(
        report.outcome(InitStep::ValidateEndpoints),
        Some(StepOutcome::Failed(_))
    ));
    assert!(h.reveal.is_disabled());
    assert_eq!(h.config_source.fetch_count(), 0);
    assert!(h
        .reveal
        .track("product", "page_viewed", Extensions::new())
        .is_none());

    // Disabled sticks until destroy.
    assert_eq!(
        h.reveal.init("client-key", options()).await.status,
        InitStatus::Disabled
    );
    h.reveal.destroy();
    assert!(h.reveal.init("client-key", options()).await.is_running());
    h.reveal.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_loopback_http_is_allowed() {
    let h = harness(remote_config("proj", 1.0));
    let local = SdkOptions {
        api_base: "http://127.0.0.1:8787".to_string(),
        ..SdkOptions::default()
    };
    assert!(h.reveal.init("client-key", local).await.is_running());
    h.reveal.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_missing_client_key_disables_sdk() {
    let h = harness(remote_config("proj", 1.0));
    let report = h.reveal.init("", options()).await;
    assert_eq!(report.status, InitStatus::Disabled);
    assert!(matches!(
        report.outcome(InitStep::ValidateCredential),
        Some(StepOutcome::Failed(_))
    ));
    assert_eq!(report.steps.len(), 1);
    assert!(!h.reveal.report_friction(rageclick()));
}

#[tokio::test(start_paused = true)]
async fn test_insecure_remote_decision_endpoint_disables_sdk() {
    let mut config = remote_config("proj", 1.0);
    config.decision.endpoint = "http://decide.example.com/v1/decide".to_string();
    let h = harness(config);
    let report = h.reveal.init("client-key", options()).await;
    assert_eq!(report.status, InitStatus::Disabled);
    assert!(matches!(
        report.outcome(InitStep::ValidateDecisionEndpoint),
        Some(StepOutcome::Failed(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_config_failure_falls_back_and_keeps_running() {
    let transport = Arc::new(RecordingTransport::new());
    let reveal = Reveal::with_backends(Backends {
        config_source: Some(Arc::new(FailingConfigSource::new("HTTP 503"))),
        transport: Some(transport.clone()),
        decision_service: Some(Arc::new(ScriptedDecisionService::new())),
        store: Some(Arc::new(MemoryStore::new())),
        clock: None,
    });

    let report = reveal.init("client-key", options()).await;
    assert_eq!(report.status, InitStatus::Degraded);
    assert_eq!(report.config_origin, Some(reveal_sdk::config::ConfigOrigin::Fallback));
    assert!(matches!(
        report.outcome(InitStep::FetchConfig),
        Some(StepOutcome::Degraded(_))
    ));
    assert_eq!(report.sampled, Some(true));
    assert_eq!(report.treatment, Some(Treatment::Unknown));

    reveal.track("product", "page_viewed", Extensions::new());
    reveal.flush().await;
    assert!(transport
        .event_names()
        .contains(&"page_viewed".to_string()));
    reveal.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_double_init_is_a_no_op() {
    let h = harness(remote_config("proj", 1.0));
    let first = h.reveal.init("client-key", options()).await;
    let second = h.reveal.init("client-key", options()).await;

    assert!(first.is_running());
    assert_eq!(second.status, InitStatus::AlreadyInitialized);
    assert_eq!(h.config_source.fetch_count(), 1);
    assert_eq!(h.reveal.session_id(), first.session_id);
    h.reveal.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_init_destroy_cycles() {
    let h = harness(remote_config("proj", 1.0));
    let (subscription, delivered) = collect(&h.reveal);

    let first = h.reveal.init("client-key", options()).await;
    h.reveal.destroy();
    h.reveal.destroy();
    assert!(!h.reveal.is_initialized());
    assert!(h
        .reveal
        .track("product", "page_viewed", Extensions::new())
        .is_none());

    let second = h.reveal.init("client-key", options()).await;
    assert!(second.is_running());
    assert_ne!(first.session_id, second.session_id);

    // The subscription survived the cycle.
    h.decisions.push_decision(decision("n1", "tooltip"));
    h.reveal.report_friction(rageclick());
    settle().await;
    assert_eq!(delivered.lock().unwrap().len(), 1);

    subscription.unsubscribe();
    h.reveal.track("nudge", "nudge_dismissed", Extensions::new());
    advance(2_000).await;
    h.decisions.push_decision(decision("n2", "tooltip"));
    h.reveal.report_friction(rageclick());
    settle().await;
    assert_eq!(delivered.lock().unwrap().len(), 1);

    h.reveal.shutdown().await;
    let names = h.transport.event_names();
    assert_eq!(
        names.iter().filter(|n| n.as_str() == "session_started").count(),
        2
    );
    assert_eq!(
        names.iter().filter(|n| n.as_str() == "session_ended").count(),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn test_destroy_during_init_aborts() {
    let reveal = Reveal::with_backends(Backends {
        config_source: Some(Arc::new(
            FailingConfigSource::new("slow").with_delay(Duration::from_secs(1)),
        )),
        transport: Some(Arc::new(RecordingTransport::new())),
        decision_service: Some(Arc::new(ScriptedDecisionService::new())),
        store: Some(Arc::new(MemoryStore::new())),
        clock: None,
    });

    let pending = tokio::spawn({
        let reveal = reveal.clone();
        async move { reveal.init("client-key", options()).await }
    });
    settle().await;
    assert_eq!(
        reveal.init("client-key", options()).await.status,
        InitStatus::AlreadyInitialized
    );
    reveal.destroy();

    let report = pending.await.unwrap();
    assert_eq!(report.status, InitStatus::Aborted);
    assert!(!reveal.is_initialized());
    assert!(!reveal.is_disabled());
}

#[tokio::test(start_paused = true)]
async fn test_progress_timeout_requests_decision() {
    let mut config = remote_config("proj", 1.0);
    config.progress_timeout_rules = Some(ProgressTimeoutRules {
        enabled: true,
        timeout_seconds: 15,
        hard_timeout_seconds: None,
        progress_event_names: Some(vec!["step_completed".to_string()]),
        monitored_kind: EventKind::Product,
    });
    let h = harness(config);
    let (_subscription, delivered) = collect(&h.reveal);
    h.decisions.push_decision(decision("n1", "inline_hint"));
    h.reveal.init("client-key", options()).await;

    advance(10_000).await;
    h.reveal.track("product", "step_completed", Extensions::new());
    advance(14_999).await;
    assert_eq!(h.decisions.request_count(), 0);

    advance(1).await;
    assert_eq!(h.decisions.request_count(), 1);
    let (signal, _) = h.decisions.requests().remove(0);
    assert_eq!(signal.signal_type, FrictionType::NoProgress);
    assert_eq!(signal.extra.time_since_progress_ms, Some(15_000));
    assert_eq!(delivered.lock().unwrap().len(), 1);
    h.reveal.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_route_change_resets_progress_timer() {
    let mut config = remote_config("proj", 1.0);
    config.progress_timeout_rules = Some(ProgressTimeoutRules {
        enabled: true,
        timeout_seconds: 15,
        hard_timeout_seconds: None,
        progress_event_names: Some(vec!["step_completed".to_string()]),
        monitored_kind: EventKind::Product,
    });
    let h = harness(config);
    h.reveal.init("client-key", options()).await;

    advance(10_000).await;
    h.reveal.notify_route_change("/checkout");
    advance(10_000).await;
    h.reveal.notify_route_change("/checkout");
    advance(4_999).await;
    assert_eq!(h.decisions.request_count(), 0);
    advance(1).await;
    assert_eq!(h.decisions.request_count(), 1);
    assert_eq!(h.decisions.requests()[0].0.page_url, "/checkout");
    h.reveal.destroy();
}

struct ManualDetector {
    slot: Arc<Mutex<Option<FrictionEmitter>>>,
}

impl FrictionDetector for ManualDetector {
    fn name(&self) -> &str {
        "manual"
    }

    fn start(&mut self, emitter: FrictionEmitter) -> Result<(), DetectorError> {
        *self.slot.lock().unwrap() = Some(emitter);
        Ok(())
    }

    fn stop(&mut self) {
        self.slot.lock().unwrap().take();
    }
}

#[tokio::test(start_paused = true)]
async fn test_external_detector_feeds_gating_path() {
    let h = harness(remote_config("proj", 1.0));
    let slot = Arc::new(Mutex::new(None));
    h.reveal.register_detector(Box::new(ManualDetector { slot: slot.clone() }));

    let report = h.reveal.init("client-key", options()).await;
    assert_eq!(report.outcome(InitStep::ExternalDetectors), Some(&StepOutcome::Ok));

    let emitter = slot.lock().unwrap().clone().expect("detector started");
    emitter(FrictionSignal::new(FrictionType::Backtrack, "/plans", Utc::now()));
    settle().await;
    assert_eq!(h.decisions.requests()[0].0.signal_type, FrictionType::Backtrack);

    h.reveal.destroy();
    assert!(slot.lock().unwrap().is_none());
}

struct CountingDetector {
    starts: Arc<Mutex<usize>>,
    slot: Arc<Mutex<Option<FrictionEmitter>>>,
}

impl FrictionDetector for CountingDetector {
    fn name(&self) -> &str {
        "counting"
    }

    fn start(&mut self, emitter: FrictionEmitter) -> Result<(), DetectorError> {
        *self.starts.lock().unwrap() += 1;
        *self.slot.lock().unwrap() = Some(emitter);
        Ok(())
    }

    fn stop(&mut self) {
        self.slot.lock().unwrap().take();
    }
}

#[tokio::test(start_paused = true)]
async fn test_registered_detector_survives_destroy_init_cycle() {
    let h = harness(remote_config("proj", 1.0));
    let starts = Arc::new(Mutex::new(0));
    let slot = Arc::new(Mutex::new(None));
    h.reveal.register_detector(Box::new(CountingDetector {
        starts: starts.clone(),
        slot: slot.clone(),
    }));

    h.reveal.init("client-key", options()).await;
    assert_eq!(*starts.lock().unwrap(), 1);
    h.reveal.destroy();
    assert!(slot.lock().unwrap().is_none());

    let report = h.reveal.init("client-key", options()).await;
    assert_eq!(report.outcome(InitStep::ExternalDetectors), Some(&StepOutcome::Ok));
    assert_eq!(*starts.lock().unwrap(), 2);

    let emitter = slot.lock().unwrap().clone().expect("detector restarted");
    emitter(FrictionSignal::new(FrictionType::Stall, "/plans", Utc::now()));
    settle().await;
    assert_eq!(h.decisions.request_count(), 1);
    assert_eq!(h.decisions.requests()[0].0.signal_type, FrictionType::Stall);
    h.reveal.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_detector_registered_while_running_starts_now() {
    let h = harness(remote_config("proj", 1.0));
    h.reveal.init("client-key", options()).await;

    let starts = Arc::new(Mutex::new(0));
    let slot = Arc::new(Mutex::new(None));
    h.reveal.register_detector(Box::new(CountingDetector {
        starts: starts.clone(),
        slot: slot.clone(),
    }));
    assert_eq!(*starts.lock().unwrap(), 1);
    assert!(slot.lock().unwrap().is_some());

    h.reveal.destroy();
    h.reveal.init("client-key", options()).await;
    assert_eq!(*starts.lock().unwrap(), 2);
    h.reveal.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_oversized_progress_timeout_disables_detector_only() {
    let mut config = remote_config("proj", 1.0);
    config.progress_timeout_rules = Some(ProgressTimeoutRules {
        enabled: true,
        timeout_seconds: u64::MAX / 10,
        hard_timeout_seconds: None,
        progress_event_names: Some(vec!["step_completed".to_string()]),
        monitored_kind: EventKind::Product,
    });
    let h = harness(config);

    let report = h.reveal.init("client-key", options()).await;
    assert_eq!(report.status, InitStatus::Ready);
    advance(3_600_000).await;
    assert_eq!(h.decisions.request_count(), 0);
    h.reveal.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_panicking_subscriber_does_not_block_others() {
    let h = harness(remote_config("proj", 1.0));
    let _bad = h.reveal.on_nudge_decision(|_| panic!("subscriber bug"));
    let (_subscription, delivered) = collect(&h.reveal);
    h.decisions.push_decision(decision("n1", "tooltip"));
    h.reveal.init("client-key", options()).await;

    h.reveal.report_friction(rageclick());
    settle().await;
    assert_eq!(delivered.lock().unwrap().len(), 1);
    h.reveal.destroy();
}
