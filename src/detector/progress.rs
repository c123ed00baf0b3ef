//! Progress-timeout detector.
//!
//! Watches captured events for "progress" and emits a `no_progress` friction
//! signal when none arrives within the soft threshold, and optionally a
//! second one at the hard threshold. Each quiet period is an episode; a
//! progress event or a route change starts a new one.
//!
//! ```text
//!             progress / route change (any state)
//!      ┌────────────────────────────────────────────┐
//!      ▼                                            │
//!  WaitingSoft ──soft fired──▶ WaitingHard ──hard fired──▶ Settled
//!      │                                                   ▲
//!      └────────────soft fired, no hard threshold──────────┘
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::clock::{millis_between, SharedClock};
use crate::config::ProgressTimeoutRules;
use crate::detector::FrictionEmitter;
use crate::events::{CapturedEvent, EventKind, FrictionExtra, FrictionSignal, FrictionType};

/// Shortest delay between the soft and hard wakes.
const MIN_REARM_MS: u64 = 100;

/// Longest accepted threshold (one year).
const MAX_TIMEOUT_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// Validated detector settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressTimeoutSettings {
    pub soft_timeout_ms: u64,
    pub hard_timeout_ms: Option<u64>,
    pub progress_event_names: HashSet<String>,
    pub monitored_kind: EventKind,
}

impl ProgressTimeoutSettings {
    /// Build settings from remote rules, or `None` when the detector must stay off.
    pub fn from_rules(rules: Option<&ProgressTimeoutRules>, feature_enabled: bool) -> Option<Self> {
        if !feature_enabled {
            tracing::debug!("Progress timeout disabled by feature flag");
            return None;
        }
        let rules = rules?;
        if !rules.enabled || rules.timeout_seconds == 0 {
            tracing::debug!("Progress timeout disabled by rules");
            return None;
        }
        let Some(names) = rules.progress_event_names.as_ref() else {
            tracing::warn!("Progress timeout rules have no progress_event_names; detector disabled");
            return None;
        };

        let Some(soft_timeout_ms) = seconds_to_ms(rules.timeout_seconds) else {
            tracing::warn!(
                "timeout_seconds ({}) out of range; detector disabled",
                rules.timeout_seconds
            );
            return None;
        };
        let hard_timeout_ms = match rules.hard_timeout_seconds {
            Some(hard) => match seconds_to_ms(hard) {
                Some(hard_ms) if hard_ms > soft_timeout_ms => Some(hard_ms),
                Some(_) => {
                    tracing::warn!(
                        "hard_timeout_seconds ({}) not above timeout_seconds ({}); ignored",
                        hard,
                        rules.timeout_seconds
                    );
                    None
                }
                None => {
                    tracing::warn!("hard_timeout_seconds ({}) out of range; detector disabled", hard);
                    return None;
                }
            },
            None => None,
        };

        Some(Self {
            soft_timeout_ms,
            hard_timeout_ms,
            progress_event_names: names.iter().cloned().collect(),
            monitored_kind: rules.monitored_kind,
        })
    }

    fn is_progress(&self, event: &CapturedEvent) -> bool {
        event.kind == self.monitored_kind && self.progress_event_names.contains(&event.name)
    }
}

/// Seconds to milliseconds, or `None` when the result would not fit a deadline.
fn seconds_to_ms(seconds: u64) -> Option<u64> {
    seconds
        .checked_mul(1000)
        .filter(|ms| *ms <= MAX_TIMEOUT_MS)
}

/// Where the current episode stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodePhase {
    Idle,
    WaitingSoft,
    WaitingHard,
    Settled,
}

#[derive(Debug)]
struct Episode {
    phase: EpisodePhase,
    last_progress_at: DateTime<Utc>,
    soft_emitted: bool,
    hard_emitted: bool,
    route_key: Option<String>,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every arm/disarm; a wake with an older value is stale
    generation: u64,
    destroyed: bool,
}

struct DetectorInner {
    settings: ProgressTimeoutSettings,
    clock: SharedClock,
    emit: FrictionEmitter,
    runtime: Handle,
    episode: Mutex<Episode>,
}

/// Handle to a progress-timeout detector. A disabled detector ignores all input.
pub struct ProgressTimeoutDetector {
    inner: Option<Arc<DetectorInner>>,
}

impl ProgressTimeoutDetector {
    /// Create a detector and arm the first soft wake.
    ///
    /// `settings == None` or a missing tokio runtime yields a disabled detector.
    pub fn new(
        settings: Option<ProgressTimeoutSettings>,
        clock: SharedClock,
        emit: FrictionEmitter,
    ) -> Self {
        let Some(settings) = settings else {
            return Self::disabled();
        };
        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!("Progress timeout detector needs a tokio runtime: {}", e);
                return Self::disabled();
            }
        };

        let now = clock.now();
        let inner = Arc::new(DetectorInner {
            settings,
            clock,
            emit,
            runtime,
            episode: Mutex::new(Episode {
                phase: EpisodePhase::Idle,
                last_progress_at: now,
                soft_emitted: false,
                hard_emitted: false,
                route_key: None,
                timer: None,
                generation: 0,
                destroyed: false,
            }),
        });
        {
            let mut episode = inner.lock();
            inner.reset(&mut episode, now);
        }
        tracing::debug!(
            soft_ms = inner.settings.soft_timeout_ms,
            hard_ms = ?inner.settings.hard_timeout_ms,
            "Progress timeout detector armed"
        );
        Self { inner: Some(inner) }
    }

    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Feed a captured event. Qualifying progress events start a new episode
    /// anchored at the event's own timestamp.
    pub fn on_event(&self, event: &CapturedEvent) {
        let Some(inner) = self.inner.as_ref() else {
            return;
        };
        if !inner.settings.is_progress(event) {
            return;
        }
        let mut episode = inner.lock();
        if episode.destroyed {
            return;
        }
        tracing::trace!(name = %event.name, "Progress event; episode reset");
        inner.reset(&mut episode, event.timestamp);
    }

    /// Route change. A new route starts a new episode; the same route is ignored.
    pub fn on_route_change(&self, route: &str) {
        let Some(inner) = self.inner.as_ref() else {
            return;
        };
        let mut episode = inner.lock();
        if episode.destroyed || episode.route_key.as_deref() == Some(route) {
            return;
        }
        episode.route_key = Some(route.to_string());
        let now = inner.clock.now();
        inner.reset(&mut episode, now);
    }

    pub fn phase(&self) -> EpisodePhase {
        match self.inner.as_ref() {
            Some(inner) => inner.lock().phase,
            None => EpisodePhase::Idle,
        }
    }

    /// Cancel the pending wake and clear the episode. Emits nothing. Idempotent.
    pub fn destroy(&self) {
        let Some(inner) = self.inner.as_ref() else {
            return;
        };
        let mut episode = inner.lock();
        DetectorInner::disarm(&mut episode);
        episode.soft_emitted = false;
        episode.hard_emitted = false;
        episode.phase = EpisodePhase::Idle;
        episode.destroyed = true;
    }
}

impl Drop for ProgressTimeoutDetector {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl DetectorInner {
    fn lock(&self) -> MutexGuard<'_, Episode> {
        self.episode.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reset(self: &Arc<Self>, episode: &mut Episode, progress_at: DateTime<Utc>) {
        episode.last_progress_at = progress_at;
        episode.soft_emitted = false;
        episode.hard_emitted = false;
        episode.phase = EpisodePhase::WaitingSoft;

        let elapsed = millis_between(progress_at, self.clock.now());
        let delay = self.settings.soft_timeout_ms.saturating_sub(elapsed);
        self.arm(episode, delay);
    }

    /// Schedule the next wake, replacing any pending one.
    fn arm(self: &Arc<Self>, episode: &mut Episode, delay_ms: u64) {
        Self::disarm(episode);
        let generation = episode.generation;
        let deadline = tokio::time::Instant::now() + Duration::from_millis(delay_ms);
        let weak = Arc::downgrade(self);

        episode.timer = Some(self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_wake(generation);
            }
        }));
    }

    fn disarm(episode: &mut Episode) {
        if let Some(timer) = episode.timer.take() {
            timer.abort();
        }
        episode.generation = episode.generation.wrapping_add(1);
    }

    fn on_wake(self: &Arc<Self>, generation: u64) {
        let signals = {
            let mut episode = self.lock();
            if episode.destroyed || episode.generation != generation {
                return;
            }
            episode.timer = None;
            self.advance(&mut episode)
        };

        for signal in signals {
            (self.emit)(signal);
        }
    }

    /// Run the transition for a wake and return the signals to emit.
    fn advance(self: &Arc<Self>, episode: &mut Episode) -> Vec<FrictionSignal> {
        let elapsed = millis_between(episode.last_progress_at, self.clock.now());
        let soft = self.settings.soft_timeout_ms;
        let mut signals = Vec::new();

        match episode.phase {
            EpisodePhase::WaitingSoft => {
                if elapsed < soft {
                    self.arm(episode, soft - elapsed);
                    return signals;
                }
                if !episode.soft_emitted {
                    episode.soft_emitted = true;
                    signals.push(self.signal(episode, elapsed, false));
                }
                match self.settings.hard_timeout_ms {
                    Some(hard) if elapsed < hard => {
                        episode.phase = EpisodePhase::WaitingHard;
                        self.arm(episode, (hard - elapsed).max(MIN_REARM_MS));
                    }
                    Some(_) => {
                        if !episode.hard_emitted {
                            episode.hard_emitted = true;
                            signals.push(self.signal(episode, elapsed, true));
                        }
                        episode.phase = EpisodePhase::Settled;
                    }
                    None => episode.phase = EpisodePhase::Settled,
                }
            }
            EpisodePhase::WaitingHard => {
                let Some(hard) = self.settings.hard_timeout_ms else {
                    episode.phase = EpisodePhase::Settled;
                    return signals;
                };
                if elapsed < hard {
                    self.arm(episode, (hard - elapsed).max(MIN_REARM_MS));
                    return signals;
                }
                if !episode.hard_emitted {
                    episode.hard_emitted = true;
                    signals.push(self.signal(episode, elapsed, true));
                }
                episode.phase = EpisodePhase::Settled;
            }
            EpisodePhase::Idle | EpisodePhase::Settled => {}
        }
        signals
    }

    fn signal(&self, episode: &Episode, elapsed_ms: u64, hard: bool) -> FrictionSignal {
        let extra = FrictionExtra {
            time_since_progress_ms: Some(elapsed_ms),
            timeout_seconds: Some(self.settings.soft_timeout_ms / 1000),
            hard_timeout_seconds: if hard {
                self.settings.hard_timeout_ms.map(|ms| ms / 1000)
            } else {
                None
            },
            extensions: Default::default(),
        };
        FrictionSignal::new(
            FrictionType::NoProgress,
            episode.route_key.clone().unwrap_or_default(),
            self.clock.now(),
        )
        .with_extra(extra)
    }
}
