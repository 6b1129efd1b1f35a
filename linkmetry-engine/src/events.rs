//! Shared event schema consumed by both the attribution and experiment engines.
//!
//! Click and conversion events arrive from the ingestion path already carrying an
//! opaque session identifier. Campaign parameters are parsed here, once, so both
//! engines see identical channel data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Version of the event schema below. Bump on any field change.
pub const EVENT_SCHEMA_VERSION: u32 = 1;

/// Label used for touchpoints without a campaign source.
pub const DIRECT_SOURCE: &str = "(direct)";
/// Label used for touchpoints without a campaign medium.
pub const NO_MEDIUM: &str = "(none)";

/// Opaque session identifier injected by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Create a new session ID from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// UTM campaign attributes of a click.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignFields {
    pub source: Option<String>,
    pub medium: Option<String>,
    pub name: Option<String>,
    pub term: Option<String>,
    pub content: Option<String>,
}

impl CampaignFields {
    /// Parse `utm_*` query parameters from a landing URL.
    ///
    /// Unparseable URLs and empty parameters produce empty fields.
    pub fn from_url(raw: &str) -> Self {
        let Ok(url) = Url::parse(raw) else {
            return Self::default();
        };

        let mut fields = Self::default();
        for (key, value) in url.query_pairs() {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let slot = match key.as_ref() {
                "utm_source" => &mut fields.source,
                "utm_medium" => &mut fields.medium,
                "utm_campaign" => &mut fields.name,
                "utm_term" => &mut fields.term,
                "utm_content" => &mut fields.content,
                _ => continue,
            };
            // First occurrence wins
            if slot.is_none() {
                *slot = Some(value.to_string());
            }
        }
        fields
    }

    /// Channel key `(source, medium)` used for aggregation.
    pub fn channel(&self) -> (String, String) {
        (
            self.source.clone().unwrap_or_else(|| DIRECT_SOURCE.to_string()),
            self.medium.clone().unwrap_or_else(|| NO_MEDIUM.to_string()),
        )
    }
}

/// A click or redirect observed by the ingestion path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickEvent {
    /// Ingestion-assigned identifier, used to drop duplicate beacons.
    pub event_id: Uuid,
    pub session_id: SessionId,
    pub short_code: String,
    pub timestamp: DateTime<Utc>,
    pub referrer: Option<String>,
    pub campaign: CampaignFields,
}

impl ClickEvent {
    /// Build a click event from a landing URL, parsing its campaign parameters.
    pub fn from_landing_url(
        session_id: SessionId,
        short_code: impl Into<String>,
        landing_url: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            session_id,
            short_code: short_code.into(),
            timestamp,
            referrer: None,
            campaign: CampaignFields::from_url(landing_url),
        }
    }

    #[must_use]
    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }
}

/// A conversion reported by the ingestion path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionEvent {
    /// External, globally unique conversion identifier.
    pub conversion_id: String,
    pub short_code: String,
    pub goal_id: Uuid,
    pub session_id: SessionId,
    /// Monetary value; the goal's value is used when absent.
    pub value: Option<f64>,
    pub timestamp: DateTime<Utc>,
    /// Model used for the canonical attribution record.
    pub attribution_model: crate::attribution::AttributionModel,
}
