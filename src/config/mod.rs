//! Configuration for the Reveal SDK.
//!
//! Two layers: [`SdkOptions`] are host-side settings (endpoints, batching,
//! storage), loaded from a JSON file or built in code. [`RemoteConfig`] is
//! fetched from the backend during init and drives sampling, treatment and
//! the progress-timeout detector.

pub mod remote;

pub use remote::{
    fetch_or_fallback, ConfigOrigin, ConfigSource, DecisionSettings, FeatureFlags,
    HttpConfigSource, ProgressTimeoutRules, RemoteConfig, SdkSettings, TreatmentRules,
};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Header carrying the client key on every backend request.
pub const CLIENT_KEY_HEADER: &str = "X-Reveal-Client-Key";

/// Deployment environment of the host application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    #[default]
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    /// Decision timeout used when the remote config is unavailable.
    pub fn default_decision_timeout_ms(&self) -> u64 {
        match self {
            Environment::Development => 2000,
            Environment::Staging => 1000,
            Environment::Production => 400,
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

/// Host-side options for the SDK.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkOptions {
    pub environment: Environment,

    /// Base URL used to derive endpoints that are not set explicitly
    pub api_base: String,

    pub config_endpoint: Option<String>,
    pub decision_endpoint: Option<String>,
    pub ingest_endpoint: Option<String>,

    /// How often buffered events are flushed
    #[serde(with = "duration_millis")]
    pub flush_interval: Duration,

    /// Buffer size that triggers an early flush
    pub batch_size: usize,

    /// Timeout for config fetch and ingest requests
    #[serde(with = "duration_millis")]
    pub http_timeout: Duration,

    /// Directory for durable client storage (anonymous id)
    pub storage_dir: Option<PathBuf>,
}

impl Default for SdkOptions {
    fn default() -> Self {
        Self {
            environment: Environment::Production,
            api_base: "https://api.reveal.dev".to_string(),
            config_endpoint: None,
            decision_endpoint: None,
            ingest_endpoint: None,
            flush_interval: Duration::from_secs(5),
            batch_size: 20,
            http_timeout: Duration::from_secs(10),
            storage_dir: None,
        }
    }
}

/// Resolved backend endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoints {
    pub config: String,
    pub decision: String,
    pub ingest: String,
}

impl SdkOptions {
    /// Load options from the default location, or defaults if absent.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Ok(Self::default())
        }
    }

    /// Save options to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))
    }

    /// Get the path to the options file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("reveal-sdk")
            .join("config.json")
    }

    /// Directory for durable storage, defaulting to the platform data dir.
    pub fn storage_dir(&self) -> PathBuf {
        self.storage_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("reveal-sdk")
        })
    }

    pub fn endpoints(&self) -> Endpoints {
        let base = self.api_base.trim_end_matches('/');
        Endpoints {
            config: self
                .config_endpoint
                .clone()
                .unwrap_or_else(|| format!("{base}/v1/config")),
            decision: self
                .decision_endpoint
                .clone()
                .unwrap_or_else(|| format!("{base}/v1/decide")),
            ingest: self
                .ingest_endpoint
                .clone()
                .unwrap_or_else(|| format!("{base}/v1/ingest")),
        }
    }
}

impl Endpoints {
    /// Every endpoint must be HTTPS unless it points at the local machine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_backend_url("config", &self.config)?;
        validate_backend_url("decision", &self.decision)?;
        validate_backend_url("ingest", &self.ingest)?;
        Ok(())
    }
}

/// Check that a client key is present and safe to send as a header.
pub fn validate_client_key(client_key: &str) -> Result<(), ConfigError> {
    let key = client_key.trim();
    if key.is_empty() || key.len() != client_key.len() {
        return Err(ConfigError::MissingClientKey);
    }
    if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ConfigError::MissingClientKey);
    }
    Ok(())
}

/// Check a backend URL: HTTPS anywhere, plain HTTP only for loopback hosts.
pub fn validate_backend_url(field: &'static str, raw: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        field,
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "https" => Ok(()),
        "http" if is_loopback_host(&parsed) => Ok(()),
        _ => Err(ConfigError::InsecureUrl {
            field,
            url: raw.to_string(),
        }),
    }
}

fn is_loopback_host(url: &url::Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => ip == std::net::Ipv4Addr::LOCALHOST,
        Some(url::Host::Ipv6(ip)) => ip == std::net::Ipv6Addr::LOCALHOST,
        None => false,
    }
}

/// Serde support for Duration as milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = SdkOptions::default();
        assert_eq!(options.environment, Environment::Production);
        assert_eq!(options.flush_interval, Duration::from_secs(5));
        assert!(options.endpoints().validate().is_ok());
    }

    #[test]
    fn test_endpoints_derived_from_base() {
        let options = SdkOptions {
            api_base: "https://edge.example.com/".to_string(),
            decision_endpoint: Some("https://decide.example.com/d".to_string()),
            ..Default::default()
        };
        let endpoints = options.endpoints();
        assert_eq!(endpoints.config, "https://edge.example.com/v1/config");
        assert_eq!(endpoints.decision, "https://decide.example.com/d");
        assert_eq!(endpoints.ingest, "https://edge.example.com/v1/ingest");
    }

    #[test]
    fn test_backend_url_validation() {
        assert!(validate_backend_url("config", "https://api.example.com/v1").is_ok());
        assert!(validate_backend_url("config", "http://localhost:8080/v1").is_ok());
        assert!(validate_backend_url("config", "http://127.0.0.1/v1").is_ok());
        assert!(validate_backend_url("config", "http://[::1]:3000/").is_ok());

        assert!(matches!(
            validate_backend_url("ingest", "http://api.example.com/v1"),
            Err(ConfigError::InsecureUrl { field: "ingest", .. })
        ));
        assert!(matches!(
            validate_backend_url("ingest", "http://localhost.evil.com/"),
            Err(ConfigError::InsecureUrl { .. })
        ));
        assert!(matches!(
            validate_backend_url("ingest", "ftp://localhost/"),
            Err(ConfigError::InsecureUrl { .. })
        ));
        assert!(matches!(
            validate_backend_url("decision", "not a url"),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_client_key_validation() {
        assert!(validate_client_key("pk_live_123").is_ok());
        assert!(validate_client_key("").is_err());
        assert!(validate_client_key("   ").is_err());
        assert!(validate_client_key(" pk_live_123").is_err());
        assert!(validate_client_key("pk live").is_err());
    }

    #[test]
    fn test_environment_timeouts() {
        assert_eq!(Environment::Development.default_decision_timeout_ms(), 2000);
        assert_eq!(Environment::Staging.default_decision_timeout_ms(), 1000);
        assert_eq!(Environment::Production.default_decision_timeout_ms(), 400);
        assert_eq!("prod".parse::<Environment>(), Ok(Environment::Production));
    }

    #[test]
    fn test_options_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        assert_eq!(SdkOptions::load_from(&path).unwrap().batch_size, 20);

        let options = SdkOptions {
            environment: Environment::Staging,
            batch_size: 5,
            flush_interval: Duration::from_millis(750),
            ..Default::default()
        };
        options.save_to(&path).unwrap();

        let loaded = SdkOptions::load_from(&path).unwrap();
        assert_eq!(loaded.environment, Environment::Staging);
        assert_eq!(loaded.batch_size, 5);
        assert_eq!(loaded.flush_interval, Duration::from_millis(750));
    }
}
