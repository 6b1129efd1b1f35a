//! Attribution types: goals, journeys, conversions and weighted credit
//!
//! A conversion's journey is the ordered list of touchpoints its session
//! accumulated inside the goal's attribution window. Each model turns that
//! journey into weights summing to one, scaled by the conversion value.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AnalyticsError, Result};
use crate::events::{CampaignFields, SessionId};

/// Unique identifier for a conversion goal
pub type GoalId = Uuid;

/// Unique identifier for a stored touchpoint
pub type TouchpointId = Uuid;

/// Longest accepted look-back, in days.
pub const MAX_LOOKBACK_DAYS: u32 = 365;

/// What counts as reaching a goal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    UrlVisit,
    CustomEvent,
    FormSubmit,
    Purchase,
}

impl GoalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UrlVisit => "url_visit",
            Self::CustomEvent => "custom_event",
            Self::FormSubmit => "form_submit",
            Self::Purchase => "purchase",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "url_visit" => Ok(Self::UrlVisit),
            "custom_event" => Ok(Self::CustomEvent),
            "form_submit" => Ok(Self::FormSubmit),
            "purchase" => Ok(Self::Purchase),
            other => Err(AnalyticsError::Database(format!("Unknown goal type: {other}"))),
        }
    }
}

/// A conversion goal; immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionGoal {
    pub id: GoalId,
    pub owner: String,
    pub name: String,
    pub goal_type: GoalType,
    /// URL, event name or form id, depending on `goal_type`
    pub target: String,
    /// Monetary value credited when a conversion carries none
    pub value: f64,
    pub attribution_window_days: u32,
    pub created_at: DateTime<Utc>,
}

/// Goal definition supplied at creation time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewConversionGoal {
    pub owner: String,
    pub name: String,
    pub goal_type: GoalType,
    pub target: String,
    pub value: f64,
    /// Defaults to the configured window (30 days) when absent
    pub attribution_window_days: Option<u32>,
}

/// One recorded channel interaction within a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Touchpoint {
    pub id: TouchpointId,
    /// Ingestion event the touchpoint was created from
    pub event_id: Uuid,
    pub session_id: SessionId,
    pub short_code: String,
    pub campaign: CampaignFields,
    pub referrer: Option<String>,
    /// Server-assigned, strictly increasing per session, starting at 1
    pub touchpoint_order: u64,
    pub touchpoint_time: DateTime<Utc>,
    /// First conversion this touchpoint was credited to
    pub conversion_id: Option<String>,
}

impl Touchpoint {
    /// `(source, medium)` with direct-traffic placeholders.
    pub fn channel(&self) -> (String, String) {
        self.campaign.channel()
    }
}

/// A recorded conversion; immutable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversion {
    pub id: Uuid,
    /// External identifier, unique across all conversions
    pub conversion_id: String,
    pub short_code: String,
    pub goal_id: GoalId,
    pub value: f64,
    pub session_id: SessionId,
    pub conversion_time: DateTime<Utc>,
    /// Model used for the canonical attribution record
    pub attribution_model: AttributionModel,
}

/// Rule for distributing conversion credit over a journey
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionModel {
    FirstTouch,
    LastTouch,
    #[default]
    Linear,
    TimeDecay,
    PositionBased,
    DataDriven,
}

impl AttributionModel {
    pub const ALL: [AttributionModel; 6] = [
        Self::FirstTouch,
        Self::LastTouch,
        Self::Linear,
        Self::TimeDecay,
        Self::PositionBased,
        Self::DataDriven,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstTouch => "first_touch",
            Self::LastTouch => "last_touch",
            Self::Linear => "linear",
            Self::TimeDecay => "time_decay",
            Self::PositionBased => "position_based",
            Self::DataDriven => "data_driven",
        }
    }
}

impl FromStr for AttributionModel {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|model| model.as_str() == s)
            .ok_or_else(|| AnalyticsError::UnknownModel(s.to_string()))
    }
}

impl fmt::Display for AttributionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Look-back range in days, always within `1..=365`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct LookbackDays(u32);

impl LookbackDays {
    pub fn new(days: u32) -> Result<Self> {
        if !(1..=MAX_LOOKBACK_DAYS).contains(&days) {
            return Err(AnalyticsError::Validation(format!(
                "day range must be within 1..={MAX_LOOKBACK_DAYS}, got {days}"
            )));
        }
        Ok(Self(days))
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl Default for LookbackDays {
    fn default() -> Self {
        Self(30)
    }
}

impl TryFrom<u32> for LookbackDays {
    type Error = AnalyticsError;

    fn try_from(days: u32) -> Result<Self> {
        Self::new(days)
    }
}

impl From<LookbackDays> for u32 {
    fn from(days: LookbackDays) -> u32 {
        days.0
    }
}

/// Persisted credit of one touchpoint for one conversion under one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TouchpointAttribution {
    pub conversion_id: String,
    pub touchpoint_id: TouchpointId,
    pub attribution_model: AttributionModel,
    pub attribution_value: f64,
    pub weight: f64,
    pub computed_at: DateTime<Utc>,
}

/// A journey touchpoint with its credit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributedTouchpoint {
    pub touchpoint: Touchpoint,
    pub weight: f64,
    pub attribution_value: f64,
}

/// Credit distribution of one conversion under one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionResult {
    pub conversion_id: String,
    pub model: AttributionModel,
    pub conversion_value: f64,
    pub touchpoints: Vec<AttributedTouchpoint>,
    /// The data-driven model had no answer and linear weights were used
    pub fallback: bool,
}

impl AttributionResult {
    pub fn total_attributed(&self) -> f64 {
        self.touchpoints.iter().map(|t| t.attribution_value).sum()
    }
}

/// Credit aggregated for one `(source, medium)` channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelAttribution {
    pub source: String,
    pub medium: String,
    pub attributed_value: f64,
    /// Conversions with at least one touchpoint on this channel
    pub conversions: u64,
    pub touchpoints: u64,
}

/// Marker for a conversion left out of a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportWarning {
    pub conversion_id: String,
    pub message: String,
}

/// Channel breakdown for a short code over a look-back range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelAttributionReport {
    pub short_code: String,
    pub days: LookbackDays,
    pub model: AttributionModel,
    /// Sorted by attributed value, highest first
    pub channels: Vec<ChannelAttribution>,
    pub warnings: Vec<ReportWarning>,
    pub conversions_considered: u64,
    /// Value of conversions whose journey was empty
    pub unattributed_value: f64,
}

/// Journey of one conversion with the credit under every model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionReport {
    pub conversion: Conversion,
    pub journey: Vec<Touchpoint>,
    pub models: Vec<AttributionResult>,
}

impl AttributionReport {
    pub fn model(&self, model: AttributionModel) -> Option<&AttributionResult> {
        self.models.iter().find(|r| r.model == model)
    }
}
