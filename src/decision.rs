//! Nudge decision requests.
//!
//! The requester never fails from the caller's point of view: any network,
//! timeout or payload problem is logged and reported as "no decision".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{DecisionSettings, CLIENT_KEY_HEADER};
use crate::error::DecisionError;
use crate::events::{EventId, FrictionSignal};
use crate::session::Treatment;

/// A nudge the backend wants shown. Identity is `nudge_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NudgeDecision {
    pub nudge_id: String,
    pub template_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cta: Option<String>,
    /// `Some(Control)` downgrades the session; `None` leaves it alone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub treatment_override: Option<Treatment>,
}

/// Context sent alongside a friction signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionContext {
    pub project_id: String,
    pub session_id: String,
    pub anonymous_id: String,
    pub is_nudge_active: bool,
    pub friction_event_id: Option<EventId>,
}

/// Body of `POST <decisionEndpoint>`.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRequest<'a> {
    #[serde(flatten)]
    pub context: &'a DecisionContext,
    pub friction: &'a FrictionSignal,
}

/// Wire shape of a decision response. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DecisionResponse {
    #[serde(default)]
    pub nudge_id: Option<String>,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub cta: Option<String>,
    #[serde(default)]
    pub treatment_override: Option<String>,
}

impl DecisionResponse {
    /// Turn a response into a decision; an empty response means "no nudge".
    pub fn into_decision(self) -> Result<Option<NudgeDecision>, DecisionError> {
        let treatment_override = match self.treatment_override.as_deref() {
            None => None,
            Some("control") => Some(Treatment::Control),
            Some("treatment") => Some(Treatment::Treatment),
            Some(other) => {
                tracing::warn!("Ignoring unknown treatment override '{}'", other);
                None
            }
        };

        match (self.nudge_id, self.template_id) {
            (Some(nudge_id), Some(template_id)) => Ok(Some(NudgeDecision {
                nudge_id,
                template_id,
                title: self.title,
                body: self.body,
                cta: self.cta,
                treatment_override,
            })),
            (None, None) => Ok(None),
            (Some(_), None) => Err(DecisionError::InvalidPayload(
                "nudge_id without template_id".to_string(),
            )),
            (None, Some(_)) => Err(DecisionError::InvalidPayload(
                "template_id without nudge_id".to_string(),
            )),
        }
    }
}

/// Backend decision service.
#[async_trait]
pub trait DecisionService: Send + Sync {
    async fn decide(
        &self,
        signal: &FrictionSignal,
        context: &DecisionContext,
    ) -> Result<Option<NudgeDecision>, DecisionError>;
}

/// Decision service backed by `POST <decisionEndpoint>`.
pub struct HttpDecisionService {
    client: reqwest::Client,
    endpoint: String,
    client_key: String,
    timeout: Duration,
}

impl HttpDecisionService {
    pub fn new(settings: &DecisionSettings, client_key: impl Into<String>) -> Result<Self, DecisionError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| DecisionError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            client_key: client_key.into(),
            timeout: settings.timeout(),
        })
    }
}

#[async_trait]
impl DecisionService for HttpDecisionService {
    async fn decide(
        &self,
        signal: &FrictionSignal,
        context: &DecisionContext,
    ) -> Result<Option<NudgeDecision>, DecisionError> {
        let request = DecisionRequest {
            context,
            friction: signal,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header(CLIENT_KEY_HEADER, &self.client_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DecisionError::Timeout(self.timeout.as_millis() as u64)
                } else {
                    DecisionError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DecisionError::Server {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| DecisionError::Network(e.to_string()))?;
        parse_decision_body(&body)
    }
}

/// Parse a decision response body. Blank bodies and `null` mean no decision.
pub fn parse_decision_body(body: &str) -> Result<Option<NudgeDecision>, DecisionError> {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(None);
    }
    let response: DecisionResponse = serde_json::from_str(trimmed)
        .map_err(|e| DecisionError::InvalidPayload(e.to_string()))?;
    response.into_decision()
}

/// Requests decisions and swallows every failure.
pub struct DecisionRequester {
    service: std::sync::Arc<dyn DecisionService>,
    timeout: Duration,
}

impl DecisionRequester {
    /// `timeout` bounds the whole request, in addition to any transport timeout.
    pub fn new(service: std::sync::Arc<dyn DecisionService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    pub async fn request_decision(
        &self,
        signal: &FrictionSignal,
        context: &DecisionContext,
    ) -> Option<NudgeDecision> {
        let outcome = tokio::time::timeout(self.timeout, self.service.decide(signal, context))
            .await
            .unwrap_or_else(|_| Err(DecisionError::Timeout(self.timeout.as_millis() as u64)));

        match outcome {
            Ok(Some(decision)) => {
                tracing::debug!(
                    nudge_id = %decision.nudge_id,
                    template_id = %decision.template_id,
                    "Decision received"
                );
                Some(decision)
            }
            Ok(None) => {
                tracing::debug!(friction = %signal.signal_type, "No nudge for friction signal");
                None
            }
            Err(DecisionError::Timeout(ms)) => {
                tracing::warn!("Decision request timed out after {}ms", ms);
                None
            }
            Err(e) => {
                tracing::error!("Decision request failed: {}", e);
                None
            }
        }
    }
}
