//! Ingest transport for captured events.
//!
//! Retry and backoff belong to the transport implementation; the pipeline
//! only needs batches to be sent in the order they are handed over.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::config::CLIENT_KEY_HEADER;
use crate::error::TransportError;
use crate::events::CapturedEvent;

/// Sends batches of enriched events to the ingest service.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_batch(&self, events: &[CapturedEvent]) -> Result<(), TransportError>;
}

/// Transport that discards everything. Used when no transport could be built.
#[derive(Debug, Default)]
pub struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn send_batch(&self, events: &[CapturedEvent]) -> Result<(), TransportError> {
        tracing::debug!(count = events.len(), "Discarding batch (no transport)");
        Ok(())
    }
}

/// Batch envelope posted to the ingest endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct IngestBatch<'a> {
    pub events: &'a [CapturedEvent],
    pub meta: BatchMeta,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchMeta {
    pub source: String,
    pub version: String,
    pub event_count: usize,
}

/// Transport posting JSON batches to `<ingestEndpoint>`.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    client_key: String,
}

impl HttpTransport {
    pub fn new(
        endpoint: impl Into<String>,
        client_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            client_key: client_key.into(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_batch(&self, events: &[CapturedEvent]) -> Result<(), TransportError> {
        let batch = IngestBatch {
            events,
            meta: BatchMeta {
                source: "reveal-sdk".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                event_count: events.len(),
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header(CLIENT_KEY_HEADER, &self.client_key)
            .json(&batch)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TransportError::Server {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}
