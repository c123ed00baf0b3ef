//! Friction signals produced by detectors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::types::Extensions;

/// Kind of user difficulty a detector observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrictionType {
    Stall,
    Rageclick,
    Backtrack,
    NoProgress,
}

impl FrictionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrictionType::Stall => "stall",
            FrictionType::Rageclick => "rageclick",
            FrictionType::Backtrack => "backtrack",
            FrictionType::NoProgress => "no_progress",
        }
    }
}

impl std::fmt::Display for FrictionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FrictionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stall" => Ok(FrictionType::Stall),
            "rageclick" => Ok(FrictionType::Rageclick),
            "backtrack" => Ok(FrictionType::Backtrack),
            "no_progress" => Ok(FrictionType::NoProgress),
            other => Err(format!("unknown friction type '{other}'")),
        }
    }
}

/// Semantic sub-fields of a friction signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrictionExtra {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_since_progress_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard_timeout_seconds: Option<u64>,
    #[serde(flatten)]
    pub extensions: Extensions,
}

impl FrictionExtra {
    /// Lift the known numeric fields out of an open map.
    pub fn from_map(mut map: Extensions) -> Self {
        let mut take_u64 = |key: &str| match map.get(key).and_then(Value::as_u64) {
            Some(v) => {
                map.remove(key);
                Some(v)
            }
            None => None,
        };
        let time_since_progress_ms = take_u64("time_since_progress_ms");
        let timeout_seconds = take_u64("timeout_seconds");
        let hard_timeout_seconds = take_u64("hard_timeout_seconds");
        Self {
            time_since_progress_ms,
            timeout_seconds,
            hard_timeout_seconds,
            extensions: map,
        }
    }
}

/// A detected friction signal. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrictionSignal {
    #[serde(rename = "type")]
    pub signal_type: FrictionType,
    pub page_url: String,
    #[serde(default)]
    pub selector: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub extra: FrictionExtra,
}

impl FrictionSignal {
    pub fn new(signal_type: FrictionType, page_url: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            signal_type,
            page_url: page_url.into(),
            selector: None,
            timestamp,
            extra: FrictionExtra::default(),
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_extra(mut self, extra: FrictionExtra) -> Self {
        self.extra = extra;
        self
    }
}
