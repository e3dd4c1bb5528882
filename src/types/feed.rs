//! Raw feed records as they arrive from TLE and OMNI sources.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Origin of a feed record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FeedSource {
    /// Two-line element set (per satellite orbital elements)
    #[serde(rename = "TLE")]
    Tle,
    /// OMNI solar wind / geomagnetic sample (broadcast to all satellites)
    #[serde(rename = "OMNI")]
    Omni,
}

impl std::fmt::Display for FeedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedSource::Tle => write!(f, "TLE"),
            FeedSource::Omni => write!(f, "OMNI"),
        }
    }
}

/// A raw field value: feeds deliver both numbers and text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::Number(v)
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        RawValue::Text(v.to_string())
    }
}

impl From<String> for RawValue {
    fn from(v: String) -> Self {
        RawValue::Text(v)
    }
}

/// One immutable observation from a feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedRecord {
    pub source: FeedSource,
    /// Required for TLE, ignored for OMNI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satellite_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub raw_fields: BTreeMap<String, RawValue>,
}

impl FeedRecord {
    pub fn tle(satellite_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            source: FeedSource::Tle,
            satellite_id: Some(satellite_id.into()),
            timestamp,
            raw_fields: BTreeMap::new(),
        }
    }

    pub fn omni(timestamp: DateTime<Utc>) -> Self {
        Self {
            source: FeedSource::Omni,
            satellite_id: None,
            timestamp,
            raw_fields: BTreeMap::new(),
        }
    }

    /// Builder-style field insert.
    #[must_use]
    pub fn with_field(mut self, name: &str, value: impl Into<RawValue>) -> Self {
        self.raw_fields.insert(name.to_string(), value.into());
        self
    }
}

/// Why the normalizer refused a record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MissingField,
    OutOfRange,
    ParseError,
    DuplicateTimestamp,
    OutOfOrder,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::MissingField => write!(f, "missing field"),
            RejectReason::OutOfRange => write!(f, "out of range"),
            RejectReason::ParseError => write!(f, "parse error"),
            RejectReason::DuplicateTimestamp => write!(f, "duplicate timestamp"),
            RejectReason::OutOfOrder => write!(f, "out of order"),
        }
    }
}
