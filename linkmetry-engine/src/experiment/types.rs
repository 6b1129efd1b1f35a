//! Experiment types: lifecycle, variants, events and result shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AnalyticsError, Result};
use crate::events::SessionId;
use crate::stats::{SequentialResult, SignificanceResult};

/// Unique identifier for an experiment
pub type ExperimentId = Uuid;

/// Unique identifier for a variant
pub type VariantId = Uuid;

/// Kind of experiment being run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentType {
    /// Classic A/B (or A/B/n) test of destinations behind one link
    AbTest,
    /// Traffic split across different landing URLs
    SplitUrl,
    /// Combinations of several changes tested together
    Multivariate,
}

impl ExperimentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AbTest => "ab_test",
            Self::SplitUrl => "split_url",
            Self::Multivariate => "multivariate",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ab_test" => Ok(Self::AbTest),
            "split_url" => Ok(Self::SplitUrl),
            "multivariate" => Ok(Self::Multivariate),
            other => Err(AnalyticsError::Database(format!(
                "Unknown experiment type: {other}"
            ))),
        }
    }
}

/// Lifecycle state of an experiment
///
/// `draft -> running <-> paused`, and `running | paused -> completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Draft,
    Running,
    Paused,
    Completed,
}

impl ExperimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(Self::Draft),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            other => Err(AnalyticsError::Database(format!(
                "Unknown experiment status: {other}"
            ))),
        }
    }

    /// Whether the state machine allows moving from `self` to `to`.
    pub fn can_transition_to(&self, to: ExperimentStatus) -> bool {
        use ExperimentStatus::*;
        matches!(
            (self, to),
            (Draft, Running) | (Running, Paused) | (Paused, Running) | (Running, Completed)
                | (Paused, Completed)
        )
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Conversions are still accepted from already-assigned sessions.
    pub fn accepts_conversions(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl std::fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: ExperimentId,
    pub owner: String,
    pub name: String,
    pub experiment_type: ExperimentType,
    pub status: ExperimentStatus,
    /// Target sessions per variant, if the owner fixed one
    pub sample_size: Option<u64>,
    /// Confidence level in percent
    pub confidence: f64,
    pub conversion_goal_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored variant of an experiment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub experiment_id: ExperimentId,
    pub name: String,
    pub short_code: String,
    /// Integer percentage of traffic
    pub traffic_allocation: u32,
    pub is_control: bool,
    /// Creation order; assignment walks variants in this order
    pub position: u32,
}

/// Variant definition supplied at creation time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVariant {
    pub name: String,
    pub short_code: String,
    pub traffic_allocation: u32,
    pub is_control: bool,
}

impl NewVariant {
    pub fn new(name: impl Into<String>, short_code: impl Into<String>, allocation: u32) -> Self {
        Self {
            name: name.into(),
            short_code: short_code.into(),
            traffic_allocation: allocation,
            is_control: false,
        }
    }

    pub fn control(name: impl Into<String>, short_code: impl Into<String>, allocation: u32) -> Self {
        Self {
            is_control: true,
            ..Self::new(name, short_code, allocation)
        }
    }
}

/// Experiment definition supplied at creation time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewExperiment {
    pub owner: String,
    pub name: String,
    pub experiment_type: ExperimentType,
    pub variants: Vec<NewVariant>,
    pub conversion_goal_id: Uuid,
    pub sample_size: Option<u64>,
    /// Confidence level in percent; the engine default applies when absent
    pub confidence: Option<f64>,
}

/// Kind of experiment event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Assignment,
    Conversion,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assignment => "assignment",
            Self::Conversion => "conversion",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "assignment" => Ok(Self::Assignment),
            "conversion" => Ok(Self::Conversion),
            other => Err(AnalyticsError::Database(format!("Unknown event type: {other}"))),
        }
    }
}

/// Append-only record of an assignment or conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentEvent {
    pub experiment_id: ExperimentId,
    pub session_id: SessionId,
    pub event_type: EventType,
    pub variant_id: VariantId,
    pub conversion_value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Per-variant event counts straight from the store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantTally {
    pub sessions: u64,
    pub conversions: u64,
    pub revenue: f64,
}

/// Scored statistics for one variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantResult {
    pub variant_id: VariantId,
    pub name: String,
    pub is_control: bool,
    pub traffic_allocation: u32,
    pub sessions: u64,
    pub conversions: u64,
    pub conversion_rate: f64,
    pub revenue: f64,
    /// Comparison against the control; absent for the control itself
    pub significance: Option<SignificanceResult>,
}

/// Aggregated results of an experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResults {
    pub experiment_id: ExperimentId,
    pub status: ExperimentStatus,
    pub confidence: f64,
    pub variants: Vec<VariantResult>,
    /// At least one variant differs significantly from the control
    pub significant: bool,
    pub winner: Option<VariantId>,
}

impl ExperimentResults {
    pub fn control(&self) -> Option<&VariantResult> {
        self.variants.iter().find(|v| v.is_control)
    }

    pub fn total_sessions(&self) -> u64 {
        self.variants.iter().map(|v| v.sessions).sum()
    }
}

/// Observed power of one variant against the control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantPower {
    pub variant_id: VariantId,
    pub name: String,
    pub control_rate: f64,
    pub variant_rate: f64,
    pub control_sessions: u64,
    pub variant_sessions: u64,
    pub power: f64,
}

/// Sequential analysis of one variant against the control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSequential {
    pub variant_id: VariantId,
    pub name: String,
    pub planned_per_arm: u64,
    pub result: SequentialResult,
}
