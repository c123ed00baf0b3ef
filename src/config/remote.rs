//! Remote configuration fetched from the backend during init.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::{Endpoints, Environment, CLIENT_KEY_HEADER};
use crate::error::ConfigError;
use crate::events::EventKind;

/// Backend-provided configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    pub project_id: String,
    pub environment: Environment,
    #[serde(default)]
    pub sdk: SdkSettings,
    pub decision: DecisionSettings,
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default, rename = "treatment_rules")]
    pub treatment_rules: Option<TreatmentRules>,
    #[serde(default, rename = "progress_timeout_rules")]
    pub progress_timeout_rules: Option<ProgressTimeoutRules>,
    #[serde(default)]
    pub templates: Vec<serde_json::Value>,
    #[serde(default)]
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkSettings {
    /// Fraction of anonymous visitors whose events are sent, 0.0..=1.0
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: f64,
}

impl Default for SdkSettings {
    fn default() -> Self {
        Self {
            sampling_rate: default_sampling_rate(),
        }
    }
}

fn default_sampling_rate() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionSettings {
    pub endpoint: String,
    pub timeout_ms: u64,
}

impl DecisionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Feature switches. Unknown templates are enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default = "enabled")]
    pub progress_timeout: bool,
    #[serde(default)]
    pub templates: HashMap<String, bool>,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            progress_timeout: true,
            templates: HashMap::new(),
        }
    }
}

impl FeatureFlags {
    pub fn template_enabled(&self, template_id: &str) -> bool {
        self.templates.get(template_id).copied().unwrap_or(true)
    }
}

fn enabled() -> bool {
    true
}

/// A/B treatment rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentRules {
    /// Share of keys assigned to treatment, 0.0..=100.0
    pub treatment_percentage: f64,
    /// Key on the anonymous id (true) or the session id (false)
    #[serde(default = "enabled")]
    pub sticky: bool,
}

/// Rules for the progress-timeout detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressTimeoutRules {
    #[serde(default = "enabled")]
    pub enabled: bool,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub hard_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub progress_event_names: Option<Vec<String>>,
    #[serde(default = "default_monitored_kind")]
    pub monitored_kind: EventKind,
}

fn default_monitored_kind() -> EventKind {
    EventKind::Product
}

impl RemoteConfig {
    /// Minimal configuration used whenever the fetch fails.
    pub fn fallback(environment: Environment, endpoints: &Endpoints) -> Self {
        Self {
            project_id: String::new(),
            environment,
            sdk: SdkSettings::default(),
            decision: DecisionSettings {
                endpoint: endpoints.decision.clone(),
                timeout_ms: environment.default_decision_timeout_ms(),
            },
            features: FeatureFlags {
                progress_timeout: false,
                templates: HashMap::new(),
            },
            treatment_rules: None,
            progress_timeout_rules: None,
            templates: Vec::new(),
            ttl_seconds: 0,
        }
    }
}

/// Where the active config came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Remote,
    Fallback,
}

/// Source of remote configuration.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn fetch(&self, environment: Environment) -> Result<RemoteConfig, ConfigError>;
}

/// Fetch the remote config, substituting the minimal fallback on any failure.
pub async fn fetch_or_fallback(
    source: &dyn ConfigSource,
    environment: Environment,
    endpoints: &Endpoints,
) -> (RemoteConfig, ConfigOrigin) {
    match source.fetch(environment).await {
        Ok(config) => {
            tracing::info!(
                project = %config.project_id,
                sampling_rate = config.sdk.sampling_rate,
                "Remote config loaded"
            );
            (config, ConfigOrigin::Remote)
        }
        Err(e) => {
            tracing::warn!("Config fetch failed, using fallback: {}", e);
            (RemoteConfig::fallback(environment, endpoints), ConfigOrigin::Fallback)
        }
    }
}

/// Config source backed by `GET <configEndpoint>?environment=<env>`.
pub struct HttpConfigSource {
    client: reqwest::Client,
    endpoint: String,
    client_key: String,
}

impl HttpConfigSource {
    pub fn new(
        endpoint: impl Into<String>,
        client_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Fetch(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            client_key: client_key.into(),
        })
    }
}

#[async_trait]
impl ConfigSource for HttpConfigSource {
    async fn fetch(&self, environment: Environment) -> Result<RemoteConfig, ConfigError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("environment", environment.as_str())])
            .header(CLIENT_KEY_HEADER, &self.client_key)
            .send()
            .await
            .map_err(|e| ConfigError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConfigError::Fetch(format!("HTTP {}", status.as_u16())));
        }

        response
            .json::<RemoteConfig>()
            .await
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }
}
