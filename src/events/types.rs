//! Event types flowing through the capture pipeline.
//!
//! Payloads are a closed sum type per event kind. Fields the SDK understands
//! are typed; anything else a producer attaches is kept in an `extensions`
//! map and serialized inline, so the wire shape stays open.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::friction::{FrictionExtra, FrictionSignal, FrictionType};
use crate::session::Treatment;

/// Free-form fields attached by producers.
pub type Extensions = serde_json::Map<String, Value>;

/// Identifier assigned to every accepted event.
pub type EventId = String;

/// The four event families the SDK accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Product,
    Friction,
    Nudge,
    Session,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Product => "product",
            EventKind::Friction => "friction",
            EventKind::Nudge => "nudge",
            EventKind::Session => "session",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "product" => Ok(EventKind::Product),
            "friction" => Ok(EventKind::Friction),
            "nudge" => Ok(EventKind::Nudge),
            "session" => Ok(EventKind::Session),
            other => Err(format!("unknown event kind '{other}'")),
        }
    }
}

/// Payload of a product event emitted by the host application.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProductPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    #[serde(flatten)]
    pub extensions: Extensions,
}

/// Payload of a friction event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrictionPayload {
    #[serde(rename = "type")]
    pub friction_type: FrictionType,
    pub page_url: String,
    pub selector: Option<String>,
    #[serde(flatten)]
    pub extra: FrictionExtra,
}

/// Payload of a nudge lifecycle event (shown, clicked, dismissed).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NudgePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nudge_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(flatten)]
    pub extensions: Extensions,
}

/// Payload of a session lifecycle event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionEventPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub treatment: Option<Treatment>,
    #[serde(flatten)]
    pub extensions: Extensions,
}

/// Event payload, one variant per [`EventKind`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Product(ProductPayload),
    Friction(FrictionPayload),
    Nudge(NudgePayload),
    Session(SessionEventPayload),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Product(_) => EventKind::Product,
            EventPayload::Friction(_) => EventKind::Friction,
            EventPayload::Nudge(_) => EventKind::Nudge,
            EventPayload::Session(_) => EventKind::Session,
        }
    }

    /// Build a typed payload from an open map, lifting known fields.
    ///
    /// Friction payloads need a signal type; a map without a recognizable
    /// `type` is rejected.
    pub fn from_map(kind: EventKind, mut map: Extensions) -> Result<Self, String> {
        match kind {
            EventKind::Product => Ok(EventPayload::Product(ProductPayload {
                page_url: take_string(&mut map, "page_url"),
                extensions: map,
            })),
            EventKind::Nudge => Ok(EventPayload::Nudge(NudgePayload {
                nudge_id: take_string(&mut map, "nudge_id"),
                template_id: take_string(&mut map, "template_id"),
                extensions: map,
            })),
            EventKind::Session => Ok(EventPayload::Session(SessionEventPayload {
                treatment: take_string(&mut map, "treatment").and_then(|t| t.parse().ok()),
                extensions: map,
            })),
            EventKind::Friction => {
                let friction_type = take_string(&mut map, "type")
                    .ok_or_else(|| "friction payload without 'type'".to_string())?
                    .parse::<FrictionType>()?;
                let page_url = take_string(&mut map, "page_url").unwrap_or_default();
                let selector = take_string(&mut map, "selector");
                let extra = FrictionExtra::from_map(map);
                Ok(EventPayload::Friction(FrictionPayload {
                    friction_type,
                    page_url,
                    selector,
                    extra,
                }))
            }
        }
    }

    /// Friction event payload for a detected signal.
    pub fn from_signal(signal: &FrictionSignal) -> Self {
        EventPayload::Friction(FrictionPayload {
            friction_type: signal.signal_type,
            page_url: signal.page_url.clone(),
            selector: signal.selector.clone(),
            extra: signal.extra.clone(),
        })
    }
}

fn take_string(map: &mut Extensions, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) => Some(s),
        Some(other) => {
            // Not a string; leave it for the extension map untouched.
            map.insert(key.to_string(), other);
            None
        }
        None => None,
    }
}

/// An event intent before enrichment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawEvent {
    pub kind: EventKind,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl RawEvent {
    pub fn new(name: impl Into<String>, timestamp: DateTime<Utc>, payload: EventPayload) -> Self {
        Self {
            kind: payload.kind(),
            name: name.into(),
            timestamp,
            payload,
        }
    }
}

/// An accepted event, enriched with session context at capture time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapturedEvent {
    pub event_id: EventId,
    pub kind: EventKind,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub anonymous_id: String,
    pub sampled: bool,
    pub treatment: Treatment,
    pub payload: EventPayload,
}
