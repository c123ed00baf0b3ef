//! Error types for the Reveal SDK.
//!
//! None of these ever reach the host application through the orchestrator's
//! public surface; they flow between modules and end up in log lines or in
//! the [`InitReport`](crate::orchestrator::InitReport).

use thiserror::Error;

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("Missing or invalid client key")]
    MissingClientKey,

    #[error("Invalid URL for {field}: {reason}")]
    InvalidUrl { field: &'static str, reason: String },

    #[error("Insecure URL for {field}: {url} (HTTPS required outside localhost)")]
    InsecureUrl { field: &'static str, url: String },

    #[error("Config fetch failed: {0}")]
    Fetch(String),
}

/// Durable storage failures. Always recoverable by falling back to memory.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage data corrupt: {0}")]
    Corrupt(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Ingest transport failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport network error: {0}")]
    Network(String),

    #[error("Transport server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Transport serialization error: {0}")]
    Serialization(String),
}

/// Decision service failures.
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("Decision request timed out after {0}ms")]
    Timeout(u64),

    #[error("Decision network error: {0}")]
    Network(String),

    #[error("Decision server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Invalid decision payload: {0}")]
    InvalidPayload(String),
}

/// Top-level error for the initialization step wrapper.
#[derive(Debug, Error)]
pub enum SdkError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decision(#[from] DecisionError),

    #[error("No tokio runtime available: {0}")]
    Runtime(String),

    #[error("Module disabled: {0}")]
    Disabled(String),
}

/// Failures starting an external friction detector.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Detector {0} is already running")]
    AlreadyRunning(String),

    #[error("Detector {name} failed to start: {reason}")]
    StartFailed { name: String, reason: String },
}
