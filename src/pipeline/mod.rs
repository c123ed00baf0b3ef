//! Event capture pipeline.
//!
//! Raw events are enriched with session context, filtered by the sampling
//! decision, buffered, and flushed to the ingest [`Transport`] in capture
//! order.

pub mod capture;
pub mod stats;
pub mod transport;

pub use capture::{CapturedHook, EventPipeline, PipelineSettings};
pub use stats::{PipelineStats, SharedStats, StatsSnapshot};
pub use transport::{HttpTransport, NullTransport, Transport};
