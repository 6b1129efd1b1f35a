//! Report composition over both engines
//!
//! Reports are plain serializable structs for dashboards and APIs. Parts that
//! cannot be computed yet (no baseline rate, say) are left empty with a note
//! rather than failing the whole report.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attribution::{
    AttributionEngine, AttributionModel, AttributionReport, ChannelAttributionReport,
    LookbackDays,
};
use crate::config::AnalyticsConfig;
use crate::error::{AnalyticsError, Result};
use crate::experiment::{
    ExperimentEngine, ExperimentId, ExperimentResults, VariantPower, VariantSequential,
};
use crate::stats::SampleSizeRecommendation;
use crate::store::AnalyticsDb;

/// Everything known about one experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub results: ExperimentResults,
    pub power: Vec<VariantPower>,
    pub sample_size: Option<SampleSizeRecommendation>,
    pub sequential: Vec<VariantSequential>,
    /// Why an optional section is missing
    pub notes: Vec<String>,
}

/// Entry point for external consumers
#[derive(Clone)]
pub struct Reporter {
    experiments: ExperimentEngine,
    attribution: AttributionEngine,
}

impl Reporter {
    pub fn new(experiments: ExperimentEngine, attribution: AttributionEngine) -> Self {
        Self {
            experiments,
            attribution,
        }
    }

    /// Open the configured database and build both engines over it.
    pub fn open(config: &AnalyticsConfig) -> Result<Self> {
        let db = AnalyticsDb::open(&config.storage)?;
        Ok(Self::from_db(db, config))
    }

    pub fn from_db(db: AnalyticsDb, config: &AnalyticsConfig) -> Self {
        Self::new(
            ExperimentEngine::with_cozo(db.clone(), config),
            AttributionEngine::with_cozo(db, config),
        )
    }

    pub fn experiments(&self) -> &ExperimentEngine {
        &self.experiments
    }

    pub fn attribution(&self) -> &AttributionEngine {
        &self.attribution
    }

    pub async fn channel_report(
        &self,
        short_code: &str,
        days: LookbackDays,
        model: AttributionModel,
    ) -> Result<ChannelAttributionReport> {
        let report = self
            .attribution
            .get_channel_attribution(short_code, days, model)
            .await?;
        debug!(
            short_code,
            channels = report.channels.len(),
            warnings = report.warnings.len(),
            "Channel report built"
        );
        Ok(report)
    }

    pub async fn attribution_report(&self, conversion_id: &str) -> Result<AttributionReport> {
        self.attribution.get_attribution_report(conversion_id).await
    }

    pub async fn experiment_report(&self, id: ExperimentId) -> Result<ExperimentReport> {
        let results = self.experiments.get_results(id).await?;
        let power = self.experiments.power_analysis(id).await?;
        let mut notes = Vec::new();

        let sample_size = optional(
            self.experiments.recommend_sample_size(id, None).await,
            "sample size",
            &mut notes,
        )?;
        let sequential = optional(
            self.experiments.sequential_analysis(id, None).await,
            "sequential analysis",
            &mut notes,
        )?
        .unwrap_or_default();

        Ok(ExperimentReport {
            results,
            power,
            sample_size,
            sequential,
            notes,
        })
    }
}

/// Keep a section when it computes; statistical preconditions that don't
/// hold yet become a note.
fn optional<T>(outcome: Result<T>, section: &str, notes: &mut Vec<String>) -> Result<Option<T>> {
    match outcome {
        Ok(value) => Ok(Some(value)),
        Err(AnalyticsError::InvalidParameter(reason)) => {
            notes.push(format!("{section} unavailable: {reason}"));
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
