//! Reveal SDK - friction detection and nudge decisions for client apps.
//!
//! The SDK watches what the user does, notices friction (stalls, rage
//! clicks, backtracking, lack of progress), asks a backend whether to show
//! a corrective nudge, and limits how often nudges appear.
//!
//! # Guarantees
//!
//! - **Fail-open**: backend, storage and detector failures degrade the SDK,
//!   they never break the host
//! - **Fail-closed on security**: a missing client key or a non-HTTPS backend
//!   URL disables the SDK entirely
//! - **Ordered**: a friction event reaches the ingest transport before the
//!   decision request that references it
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                             Reveal                               │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  track() ──▶ ┌────────────┐ ──flush──▶ ┌───────────┐             │
//! │              │  Pipeline  │            │ Transport │──▶ ingest   │
//! │              └────────────┘            └───────────┘             │
//! │                    │ on_captured                                 │
//! │                    ▼                                             │
//! │  ┌──────────────────────┐   ┌──────────────────┐                 │
//! │  │ ProgressTimeout /    │──▶│  Nudge gate      │──▶ Decision ──▶ │
//! │  │ external detectors   │   │ (active/cooldown)│    Requester    │
//! │  └──────────────────────┘   └──────────────────┘        │        │
//! │                                        subscribers ◀────┘        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use reveal_sdk::{Reveal, SdkOptions};
//!
//! # async fn run() {
//! let reveal = Reveal::new();
//! let report = reveal.init("client-key", SdkOptions::default()).await;
//! println!("SDK status: {:?}", report.status);
//!
//! let _subscription = reveal.on_nudge_decision(|decision| {
//!     println!("show nudge {} ({})", decision.nudge_id, decision.template_id);
//! });
//! reveal.track("product", "checkout_started", Default::default());
//! reveal.destroy();
//! # }
//! ```

pub mod bucket;
pub mod clock;
pub mod config;
pub mod decision;
pub mod detector;
pub mod error;
pub mod events;
pub mod gate;
pub mod orchestrator;
pub mod pipeline;
pub mod session;
pub mod storage;
pub mod testing;

// Re-export key types at crate root for convenience
pub use bucket::{bucket, bucket_percent};
pub use config::{Environment, RemoteConfig, SdkOptions};
pub use decision::NudgeDecision;
pub use detector::{FrictionDetector, FrictionEmitter};
pub use error::SdkError;
pub use events::{CapturedEvent, EventId, EventKind, Extensions, FrictionSignal, FrictionType};
pub use orchestrator::{Backends, InitReport, InitStatus, Reveal, Subscription};
pub use pipeline::StatsSnapshot;
pub use session::Treatment;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
