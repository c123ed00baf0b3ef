//! Session context and treatment assignment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

use crate::bucket::bucket_percent;
use crate::config::remote::TreatmentRules;

/// A/B cohort of the current session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Treatment {
    #[default]
    Unknown,
    Control,
    Treatment,
}

impl std::str::FromStr for Treatment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Treatment::Unknown),
            "control" => Ok(Treatment::Control),
            "treatment" => Ok(Treatment::Treatment),
            other => Err(format!("unknown treatment '{other}'")),
        }
    }
}

/// Assign a cohort from the configured rules.
///
/// Sticky rules key on the anonymous id so the same visitor keeps its cohort
/// across sessions; otherwise the session id is the key. No rules means the
/// cohort stays unknown.
pub fn assign_treatment(
    rules: Option<&TreatmentRules>,
    anonymous_id: &str,
    session_id: &str,
) -> Treatment {
    let Some(rules) = rules else {
        return Treatment::Unknown;
    };
    let key = if rules.sticky { anonymous_id } else { session_id };
    if bucket_percent(key, rules.treatment_percentage) {
        Treatment::Treatment
    } else {
        Treatment::Control
    }
}

#[derive(Debug)]
struct SessionState {
    treatment: Treatment,
    last_activity_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

/// The current session. Created once per lifecycle.
#[derive(Debug)]
pub struct SessionContext {
    id: String,
    anonymous_id: String,
    started_at: DateTime<Utc>,
    state: Mutex<SessionState>,
}

impl SessionContext {
    pub fn new(anonymous_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), anonymous_id, started_at)
    }

    pub fn with_id(
        id: impl Into<String>,
        anonymous_id: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            anonymous_id: anonymous_id.into(),
            started_at,
            state: Mutex::new(SessionState {
                treatment: Treatment::Unknown,
                last_activity_at: started_at,
                ended_at: None,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn anonymous_id(&self) -> &str {
        &self.anonymous_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn treatment(&self) -> Treatment {
        self.lock().treatment
    }

    pub fn assign_treatment(&self, treatment: Treatment) {
        let mut state = self.lock();
        if state.treatment != treatment {
            tracing::debug!(session = %self.id, from = ?state.treatment, to = ?treatment, "Treatment changed");
        }
        state.treatment = treatment;
    }

    pub fn mark_activity(&self, at: DateTime<Utc>) {
        let mut state = self.lock();
        if at > state.last_activity_at {
            state.last_activity_at = at;
        }
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.lock().last_activity_at
    }

    /// Mark the session as ended. Later calls keep the first end time.
    pub fn end(&self, at: DateTime<Utc>) {
        let mut state = self.lock();
        if state.ended_at.is_none() {
            state.ended_at = Some(at);
        }
    }

    pub fn is_ended(&self) -> bool {
        self.lock().ended_at.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
