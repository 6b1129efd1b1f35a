//! Experiment lifecycle, assignment and scoring

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::config::{AnalyticsConfig, ExperimentConfig, SequentialConfig};
use crate::error::{AnalyticsError, Result};
use crate::events::{ClickEvent, SessionId};
use crate::stats::{
    ArmCounts, Checkpoint, SampleSizeRecommendation, SequentialPlan, Winner, calculate_power,
    evaluate_significance, sample_size_recommendation, sequential_test,
};
use crate::store::AnalyticsDb;

use super::assignment::{bucket_for, select_variant, validate_stored_variants, validate_variants};
use super::store::{CozoExperimentStore, ExperimentStore};
use super::types::{
    EventType, Experiment, ExperimentEvent, ExperimentId, ExperimentResults, ExperimentStatus,
    NewExperiment, NewVariant, Variant, VariantId, VariantPower, VariantResult,
    VariantSequential, VariantTally,
};

/// Runs experiments against an [`ExperimentStore`]
#[derive(Clone)]
pub struct ExperimentEngine {
    store: Arc<dyn ExperimentStore>,
    config: ExperimentConfig,
    sequential: SequentialConfig,
}

impl ExperimentEngine {
    pub fn new(
        store: Arc<dyn ExperimentStore>,
        config: ExperimentConfig,
        sequential: SequentialConfig,
    ) -> Self {
        Self {
            store,
            config,
            sequential,
        }
    }

    /// Engine over the Cozo-backed store with settings from `config`
    pub fn with_cozo(db: AnalyticsDb, config: &AnalyticsConfig) -> Self {
        Self::new(
            Arc::new(CozoExperimentStore::new(db)),
            config.experiment.clone(),
            config.sequential.clone(),
        )
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    // --- Definition -------------------------------------------------------

    /// Validate and persist a new experiment in `draft`.
    #[instrument(skip(self, new), fields(name = %new.name))]
    pub async fn create_experiment(&self, new: NewExperiment) -> Result<Experiment> {
        if new.name.trim().is_empty() {
            return Err(AnalyticsError::Validation("experiment name is empty".into()));
        }
        let confidence = new.confidence.unwrap_or(self.config.default_confidence);
        if !(confidence > 0.0 && confidence < 100.0) {
            return Err(AnalyticsError::Validation(format!(
                "confidence must be in (0, 100), got {confidence}"
            )));
        }
        if new.sample_size == Some(0) {
            return Err(AnalyticsError::Validation(
                "sample size target must be positive".into(),
            ));
        }
        validate_variants(&new.variants)?;

        let now = Utc::now();
        let experiment = Experiment {
            id: Uuid::now_v7(),
            owner: new.owner,
            name: new.name,
            experiment_type: new.experiment_type,
            status: ExperimentStatus::Draft,
            sample_size: new.sample_size,
            confidence,
            conversion_goal_id: new.conversion_goal_id,
            created_at: now,
            updated_at: now,
        };
        let variants = build_variants(experiment.id, &new.variants);
        self.store.create_experiment(&experiment, &variants).await?;

        info!(
            experiment_id = %experiment.id,
            variants = variants.len(),
            "Experiment created"
        );
        Ok(experiment)
    }

    pub async fn get_experiment(&self, id: ExperimentId) -> Result<Experiment> {
        self.store
            .get_experiment(id)
            .await?
            .ok_or_else(|| AnalyticsError::not_found("Experiment", id))
    }

    pub async fn list_experiments(&self, owner: Option<&str>) -> Result<Vec<Experiment>> {
        self.store.list_experiments(owner).await
    }

    /// Variants of an experiment in assignment order.
    pub async fn variants(&self, id: ExperimentId) -> Result<Vec<Variant>> {
        self.get_experiment(id).await?;
        self.store.get_variants(id).await
    }

    /// Replace the variant set of a draft experiment.
    ///
    /// Once traffic has been bucketed the split is frozen, so any other state
    /// fails with `InvalidState`.
    #[instrument(skip(self, variants))]
    pub async fn update_variants(
        &self,
        id: ExperimentId,
        variants: Vec<NewVariant>,
    ) -> Result<Vec<Variant>> {
        let experiment = self.get_experiment(id).await?;
        if experiment.status != ExperimentStatus::Draft {
            return Err(AnalyticsError::InvalidState(format!(
                "variants of experiment {id} can only change in draft (status: {})",
                experiment.status
            )));
        }
        validate_variants(&variants)?;

        let variants = build_variants(id, &variants);
        self.store.replace_variants(id, &variants).await?;
        debug!(experiment_id = %id, variants = variants.len(), "Variants replaced");
        Ok(variants)
    }

    // --- Lifecycle --------------------------------------------------------

    /// `draft | paused -> running`. A draft is re-validated before it starts.
    #[instrument(skip(self))]
    pub async fn start_experiment(&self, id: ExperimentId) -> Result<Experiment> {
        let experiment = self.get_experiment(id).await?;
        if experiment.status == ExperimentStatus::Draft {
            let variants = self.store.get_variants(id).await?;
            validate_stored_variants(&variants).map_err(|e| {
                AnalyticsError::InvalidState(format!("experiment {id} cannot start: {e}"))
            })?;
        }
        self.transition(experiment, ExperimentStatus::Running).await
    }

    /// `running -> paused`
    #[instrument(skip(self))]
    pub async fn pause_experiment(&self, id: ExperimentId) -> Result<Experiment> {
        let experiment = self.get_experiment(id).await?;
        self.transition(experiment, ExperimentStatus::Paused).await
    }

    /// `paused -> running`
    #[instrument(skip(self))]
    pub async fn resume_experiment(&self, id: ExperimentId) -> Result<Experiment> {
        let experiment = self.get_experiment(id).await?;
        if experiment.status != ExperimentStatus::Paused {
            return Err(AnalyticsError::InvalidState(format!(
                "only a paused experiment can resume (status: {})",
                experiment.status
            )));
        }
        self.transition(experiment, ExperimentStatus::Running).await
    }

    /// `running | paused -> completed`. Recorded events stay untouched.
    #[instrument(skip(self))]
    pub async fn stop_experiment(&self, id: ExperimentId) -> Result<Experiment> {
        let experiment = self.get_experiment(id).await?;
        self.transition(experiment, ExperimentStatus::Completed).await
    }

    async fn transition(&self, current: Experiment, to: ExperimentStatus) -> Result<Experiment> {
        if !current.status.can_transition_to(to) {
            return Err(AnalyticsError::InvalidState(format!(
                "cannot move experiment {} from {} to {to}",
                current.id, current.status
            )));
        }

        let updated = self
            .store
            .transition_status(current.id, current.status, to, Utc::now())
            .await?;
        if updated.status != to {
            return Err(AnalyticsError::InvalidState(format!(
                "experiment {} changed concurrently (status: {})",
                current.id, updated.status
            )));
        }

        info!(
            experiment_id = %current.id,
            from = %current.status,
            to = %to,
            "Experiment status changed"
        );
        Ok(updated)
    }

    // --- Traffic ----------------------------------------------------------

    /// Bucket a session into a variant of a running experiment.
    ///
    /// The first stored assignment wins: a session keeps its variant for the
    /// lifetime of the experiment.
    #[instrument(skip(self, session_id), fields(session_id = %session_id))]
    pub async fn assign_variant(&self, id: ExperimentId, session_id: &SessionId) -> Result<Variant> {
        let experiment = self.get_experiment(id).await?;
        if experiment.status != ExperimentStatus::Running {
            return Err(AnalyticsError::NotRunning {
                experiment_id: id,
                status: experiment.status,
            });
        }
        let variants = self.store.get_variants(id).await?;

        if let Some(existing) = self
            .store
            .get_event(id, session_id, EventType::Assignment)
            .await?
        {
            return find_variant(&variants, existing.variant_id);
        }

        let bucket = bucket_for(id, session_id);
        let chosen = select_variant(&variants, bucket).ok_or_else(|| {
            AnalyticsError::InvalidState(format!("bucket {bucket} is outside every variant range"))
        })?;

        let stored = self
            .store
            .insert_event_if_absent(&ExperimentEvent {
                experiment_id: id,
                session_id: session_id.clone(),
                event_type: EventType::Assignment,
                variant_id: chosen.id,
                conversion_value: 0.0,
                timestamp: Utc::now(),
            })
            .await?;

        debug!(experiment_id = %id, bucket, variant = %chosen.name, "Variant assigned");
        find_variant(&variants, stored.variant_id)
    }

    /// Assign the session behind a click.
    pub async fn assign_for_click(&self, id: ExperimentId, click: &ClickEvent) -> Result<Variant> {
        self.assign_variant(id, &click.session_id).await
    }

    /// Record a conversion for an assigned session; repeated calls keep the first.
    #[instrument(skip(self, session_id), fields(session_id = %session_id))]
    pub async fn record_conversion(
        &self,
        id: ExperimentId,
        variant_id: VariantId,
        session_id: &SessionId,
        value: f64,
    ) -> Result<ExperimentEvent> {
        let experiment = self.get_experiment(id).await?;
        let variants = self.store.get_variants(id).await?;
        find_variant(&variants, variant_id)?;

        if !experiment.status.accepts_conversions() {
            return Err(AnalyticsError::NotRunning {
                experiment_id: id,
                status: experiment.status,
            });
        }
        if !value.is_finite() || value < 0.0 {
            return Err(AnalyticsError::Validation(format!(
                "conversion value must be a non-negative number, got {value}"
            )));
        }

        let assignment = self
            .store
            .get_event(id, session_id, EventType::Assignment)
            .await?
            .ok_or_else(|| AnalyticsError::MissingAssignment {
                experiment_id: id,
                session_id: session_id.to_string(),
            })?;
        if assignment.variant_id != variant_id {
            return Err(AnalyticsError::Validation(format!(
                "session {session_id} is assigned to variant {}, not {variant_id}",
                assignment.variant_id
            )));
        }

        let stored = self
            .store
            .insert_event_if_absent(&ExperimentEvent {
                experiment_id: id,
                session_id: session_id.clone(),
                event_type: EventType::Conversion,
                variant_id,
                conversion_value: value,
                timestamp: Utc::now(),
            })
            .await?;

        debug!(experiment_id = %id, variant_id = %variant_id, "Conversion recorded");
        Ok(stored)
    }

    // --- Analysis ---------------------------------------------------------

    /// Per-variant counts and significance of each variant against the control.
    #[instrument(skip(self))]
    pub async fn get_results(&self, id: ExperimentId) -> Result<ExperimentResults> {
        let experiment = self.get_experiment(id).await?;
        let variants = self.store.get_variants(id).await?;
        let tallies = self.store.variant_tallies(id).await?;
        Ok(score_results(&experiment, &variants, &tallies))
    }

    /// Sessions per variant needed to detect `min_effect` (or the configured
    /// default) over the control's observed conversion rate.
    pub async fn recommend_sample_size(
        &self,
        id: ExperimentId,
        min_effect: Option<f64>,
    ) -> Result<SampleSizeRecommendation> {
        let results = self.get_results(id).await?;
        let baseline = results
            .control()
            .map(|c| c.conversion_rate)
            .ok_or_else(|| AnalyticsError::InvalidState(format!("experiment {id} has no control")))?;

        sample_size_recommendation(
            baseline,
            min_effect.unwrap_or(self.config.minimum_detectable_effect),
            results.confidence,
            self.config.default_power,
            results.variants.len(),
        )
    }

    /// Observed power of each non-control variant against the control.
    pub async fn power_analysis(&self, id: ExperimentId) -> Result<Vec<VariantPower>> {
        let results = self.get_results(id).await?;
        let Some(control) = results.control() else {
            return Ok(Vec::new());
        };

        Ok(results
            .variants
            .iter()
            .filter(|v| !v.is_control)
            .map(|v| VariantPower {
                variant_id: v.variant_id,
                name: v.name.clone(),
                control_rate: control.conversion_rate,
                variant_rate: v.conversion_rate,
                control_sessions: control.sessions,
                variant_sessions: v.sessions,
                power: calculate_power(
                    control.conversion_rate,
                    v.conversion_rate,
                    control.sessions,
                    v.sessions,
                    results.confidence,
                ),
            })
            .collect())
    }

    /// Replay the event log as equal-width time slices and run a sequential
    /// test for each non-control variant.
    ///
    /// The planned sample is the experiment's target, or the recommendation
    /// for the control's current rate when no target was set.
    #[instrument(skip(self))]
    pub async fn sequential_analysis(
        &self,
        id: ExperimentId,
        looks: Option<usize>,
    ) -> Result<Vec<VariantSequential>> {
        let experiment = self.get_experiment(id).await?;
        let variants = self.store.get_variants(id).await?;
        let events = self.store.list_events(id).await?;

        let planned_per_arm = match experiment.sample_size {
            Some(n) => n,
            None => self.recommend_sample_size(id, None).await?.per_variant_n,
        };
        let looks = looks
            .unwrap_or(self.sequential.max_looks)
            .clamp(1, self.sequential.max_looks.max(1));
        let plan = SequentialPlan {
            planned_per_arm,
            confidence: experiment.confidence,
            spending: self.sequential.spending,
        };

        let Some(control) = variants.iter().find(|v| v.is_control) else {
            return Ok(Vec::new());
        };
        let snapshots = cumulative_snapshots(&events, looks);

        variants
            .iter()
            .filter(|v| !v.is_control)
            .map(|variant| {
                let history: Vec<Checkpoint> = snapshots
                    .iter()
                    .map(|counts| Checkpoint {
                        control: counts.get(&control.id).copied().unwrap_or_default(),
                        variant: counts.get(&variant.id).copied().unwrap_or_default(),
                    })
                    .collect();
                Ok(VariantSequential {
                    variant_id: variant.id,
                    name: variant.name.clone(),
                    planned_per_arm,
                    result: sequential_test(&history, &plan)?,
                })
            })
            .collect()
    }
}

fn build_variants(experiment_id: ExperimentId, variants: &[NewVariant]) -> Vec<Variant> {
    variants
        .iter()
        .enumerate()
        .map(|(position, v)| Variant {
            id: Uuid::now_v7(),
            experiment_id,
            name: v.name.clone(),
            short_code: v.short_code.clone(),
            traffic_allocation: v.traffic_allocation,
            is_control: v.is_control,
            position: position as u32,
        })
        .collect()
}

fn find_variant(variants: &[Variant], id: VariantId) -> Result<Variant> {
    variants
        .iter()
        .find(|v| v.id == id)
        .cloned()
        .ok_or_else(|| AnalyticsError::not_found("Variant", id))
}

/// Score raw tallies into per-variant results.
///
/// The winner is the best significantly-better variant; when every significant
/// comparison favours the control, the control wins.
fn score_results(
    experiment: &Experiment,
    variants: &[Variant],
    tallies: &HashMap<VariantId, VariantTally>,
) -> ExperimentResults {
    let counts = |id: &VariantId| {
        let tally = tallies.get(id).cloned().unwrap_or_default();
        (ArmCounts::new(tally.sessions, tally.conversions), tally.revenue)
    };
    let control = variants.iter().find(|v| v.is_control);
    let control_counts = control.map(|c| counts(&c.id).0);

    let results: Vec<VariantResult> = variants
        .iter()
        .map(|variant| {
            let (arm, revenue) = counts(&variant.id);
            let significance = match control_counts {
                Some(control) if !variant.is_control => {
                    Some(evaluate_significance(control, arm, experiment.confidence))
                }
                _ => None,
            };
            VariantResult {
                variant_id: variant.id,
                name: variant.name.clone(),
                is_control: variant.is_control,
                traffic_allocation: variant.traffic_allocation,
                sessions: arm.sessions,
                conversions: arm.conversions,
                conversion_rate: arm.rate(),
                revenue,
                significance,
            }
        })
        .collect();

    let significant = results
        .iter()
        .any(|r| r.significance.as_ref().is_some_and(|s| s.significant));
    let best_variant = results
        .iter()
        .filter(|r| {
            r.significance
                .as_ref()
                .is_some_and(|s| s.winner == Some(Winner::Variant))
        })
        .max_by(|a, b| a.conversion_rate.total_cmp(&b.conversion_rate))
        .map(|r| r.variant_id);
    let winner = match best_variant {
        Some(id) => Some(id),
        None if significant => control.map(|c| c.id),
        None => None,
    };

    ExperimentResults {
        experiment_id: experiment.id,
        status: experiment.status,
        confidence: experiment.confidence,
        variants: results,
        significant,
        winner,
    }
}

/// Cumulative per-variant counts at `looks` equally spaced cut-offs between
/// the first and last event.
fn cumulative_snapshots(
    events: &[ExperimentEvent],
    looks: usize,
) -> Vec<HashMap<VariantId, ArmCounts>> {
    let (Some(first), Some(last)) = (
        events.iter().map(|e| e.timestamp).min(),
        events.iter().map(|e| e.timestamp).max(),
    ) else {
        return Vec::new();
    };

    let start = first.timestamp_millis();
    let span = last.timestamp_millis() - start;
    let looks = if span == 0 { 1 } else { looks };

    (1..=looks)
        .map(|k| {
            let cutoff = start + span * k as i64 / looks as i64;
            let mut counts: HashMap<VariantId, ArmCounts> = HashMap::new();
            for event in events
                .iter()
                .filter(|e| e.timestamp.timestamp_millis() <= cutoff)
            {
                let arm = counts.entry(event.variant_id).or_default();
                match event.event_type {
                    EventType::Assignment => arm.sessions += 1,
                    EventType::Conversion => arm.conversions += 1,
                }
            }
            counts
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::ExperimentType;
    use crate::stats::Recommendation;
    use chrono::Duration;

    fn engine() -> ExperimentEngine {
        let db = AnalyticsDb::in_memory().unwrap();
        ExperimentEngine::with_cozo(db, &AnalyticsConfig::default())
    }

    fn new_experiment(variants: Vec<NewVariant>) -> NewExperiment {
        NewExperiment {
            owner: "team-growth".into(),
            name: "Pricing page".into(),
            experiment_type: ExperimentType::AbTest,
            variants,
            conversion_goal_id: Uuid::now_v7(),
            sample_size: None,
            confidence: None,
        }
    }

    fn two_arms() -> Vec<NewVariant> {
        vec![
            NewVariant::control("control", "price-a", 50),
            NewVariant::new("annual-first", "price-b", 50),
        ]
    }

    async fn running(engine: &ExperimentEngine) -> Experiment {
        let experiment = engine
            .create_experiment(new_experiment(two_arms()))
            .await
            .unwrap();
        engine.start_experiment(experiment.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_starts_in_draft_with_default_confidence() {
        let engine = engine();
        let experiment = engine
            .create_experiment(new_experiment(two_arms()))
            .await
            .unwrap();
        assert_eq!(experiment.status, ExperimentStatus::Draft);
        assert_eq!(experiment.confidence, 95.0);

        let variants = engine.variants(experiment.id).await.unwrap();
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0].position, 0);
        assert!(variants[0].is_control);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_split() {
        let engine = engine();
        let err = engine
            .create_experiment(new_experiment(vec![
                NewVariant::control("control", "a", 60),
                NewVariant::new("b", "b", 30),
            ]))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::Validation(_)));
        assert!(engine.list_experiments(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let engine = engine();
        let experiment = running(&engine).await;
        assert_eq!(experiment.status, ExperimentStatus::Running);

        let paused = engine.pause_experiment(experiment.id).await.unwrap();
        assert_eq!(paused.status, ExperimentStatus::Paused);

        let resumed = engine.resume_experiment(experiment.id).await.unwrap();
        assert_eq!(resumed.status, ExperimentStatus::Running);

        let stopped = engine.stop_experiment(experiment.id).await.unwrap();
        assert_eq!(stopped.status, ExperimentStatus::Completed);

        for result in [
            engine.start_experiment(experiment.id).await,
            engine.pause_experiment(experiment.id).await,
            engine.resume_experiment(experiment.id).await,
        ] {
            assert!(matches!(result, Err(AnalyticsError::InvalidState(_))));
        }
    }

    #[tokio::test]
    async fn test_draft_cannot_pause_or_stop() {
        let engine = engine();
        let experiment = engine
            .create_experiment(new_experiment(two_arms()))
            .await
            .unwrap();
        assert!(matches!(
            engine.pause_experiment(experiment.id).await,
            Err(AnalyticsError::InvalidState(_))
        ));
        assert!(matches!(
            engine.stop_experiment(experiment.id).await,
            Err(AnalyticsError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_experiment_is_not_found() {
        let engine = engine();
        let err = engine.start_experiment(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, AnalyticsError::NotFound { kind: "Experiment", .. }));
    }

    #[tokio::test]
    async fn test_update_variants_only_in_draft() {
        let engine = engine();
        let experiment = engine
            .create_experiment(new_experiment(two_arms()))
            .await
            .unwrap();

        let updated = engine
            .update_variants(
                experiment.id,
                vec![
                    NewVariant::control("control", "a", 34),
                    NewVariant::new("b", "b", 33),
                    NewVariant::new("c", "c", 33),
                ],
            )
            .await
            .unwrap();
        assert_eq!(updated.len(), 3);
        assert_eq!(engine.variants(experiment.id).await.unwrap().len(), 3);

        engine.start_experiment(experiment.id).await.unwrap();
        let err = engine
            .update_variants(experiment.id, two_arms())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_assignment_is_sticky() {
        let engine = engine();
        let experiment = running(&engine).await;
        let session = SessionId::from("visitor-1");

        let first = engine.assign_variant(experiment.id, &session).await.unwrap();
        for _ in 0..5 {
            let again = engine.assign_variant(experiment.id, &session).await.unwrap();
            assert_eq!(again.id, first.id);
        }
        assert_eq!(engine.get_results(experiment.id).await.unwrap().total_sessions(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_assignment_converges() {
        let engine = engine();
        let experiment = running(&engine).await;
        let session = SessionId::from("visitor-racy");
        let id = experiment.id;

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let engine = engine.clone();
            let session = session.clone();
            tasks.spawn(async move { engine.assign_variant(id, &session).await });
        }
        let mut seen = std::collections::HashSet::new();
        while let Some(joined) = tasks.join_next().await {
            seen.insert(joined.unwrap().unwrap().id);
        }
        assert_eq!(seen.len(), 1);
    }

    #[tokio::test]
    async fn test_assignment_requires_running() {
        let engine = engine();
        let experiment = engine
            .create_experiment(new_experiment(two_arms()))
            .await
            .unwrap();
        let err = engine
            .assign_variant(experiment.id, &SessionId::from("s"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AnalyticsError::NotRunning {
                status: ExperimentStatus::Draft,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_conversion_is_recorded_once() {
        let engine = engine();
        let experiment = running(&engine).await;
        let session = SessionId::from("buyer");
        let variant = engine.assign_variant(experiment.id, &session).await.unwrap();

        engine
            .record_conversion(experiment.id, variant.id, &session, 49.0)
            .await
            .unwrap();
        let second = engine
            .record_conversion(experiment.id, variant.id, &session, 99.0)
            .await
            .unwrap();
        assert_eq!(second.conversion_value, 49.0);

        let results = engine.get_results(experiment.id).await.unwrap();
        let total: u64 = results.variants.iter().map(|v| v.conversions).sum();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_conversion_checks() {
        let engine = engine();
        let experiment = running(&engine).await;
        let variants = engine.variants(experiment.id).await.unwrap();
        let session = SessionId::from("buyer");

        let err = engine
            .record_conversion(experiment.id, variants[0].id, &session, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::MissingAssignment { .. }));

        let assigned = engine.assign_variant(experiment.id, &session).await.unwrap();
        let other = variants.iter().find(|v| v.id != assigned.id).unwrap();
        let err = engine
            .record_conversion(experiment.id, other.id, &session, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::Validation(_)));

        let err = engine
            .record_conversion(experiment.id, Uuid::now_v7(), &session, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::NotFound { kind: "Variant", .. }));
    }

    #[tokio::test]
    async fn test_completed_rejects_traffic_but_keeps_events() {
        let engine = engine();
        let experiment = running(&engine).await;
        let session = SessionId::from("early");
        let variant = engine.assign_variant(experiment.id, &session).await.unwrap();

        engine.pause_experiment(experiment.id).await.unwrap();
        // Paused experiments still take conversions from assigned sessions
        engine
            .record_conversion(experiment.id, variant.id, &session, 5.0)
            .await
            .unwrap();

        engine.stop_experiment(experiment.id).await.unwrap();
        let err = engine
            .assign_variant(experiment.id, &SessionId::from("late"))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::NotRunning { .. }));
        let err = engine
            .record_conversion(experiment.id, variant.id, &session, 5.0)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::NotRunning { .. }));

        let results = engine.get_results(experiment.id).await.unwrap();
        assert_eq!(results.total_sessions(), 1);
        assert_eq!(results.status, ExperimentStatus::Completed);
    }

    fn variant(id: VariantId, name: &str, is_control: bool, position: u32) -> Variant {
        Variant {
            id,
            experiment_id: Uuid::nil(),
            name: name.into(),
            short_code: name.into(),
            traffic_allocation: 50,
            is_control,
            position,
        }
    }

    fn tally(sessions: u64, conversions: u64) -> VariantTally {
        VariantTally {
            sessions,
            conversions,
            revenue: conversions as f64 * 10.0,
        }
    }

    fn draft_experiment() -> Experiment {
        let now = Utc::now();
        Experiment {
            id: Uuid::nil(),
            owner: "o".into(),
            name: "n".into(),
            experiment_type: ExperimentType::AbTest,
            status: ExperimentStatus::Running,
            sample_size: None,
            confidence: 95.0,
            conversion_goal_id: Uuid::nil(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_score_results_picks_significant_variant() {
        let (c, v) = (Uuid::now_v7(), Uuid::now_v7());
        let variants = vec![variant(c, "control", true, 0), variant(v, "b", false, 1)];
        let tallies = HashMap::from([(c, tally(10_000, 1_000)), (v, tally(10_000, 1_200))]);

        let results = score_results(&draft_experiment(), &variants, &tallies);
        assert!(results.significant);
        assert_eq!(results.winner, Some(v));
        assert!(results.control().unwrap().significance.is_none());
        assert_eq!(results.variants[1].revenue, 12_000.0);
    }

    #[test]
    fn test_score_results_control_wins_when_variant_is_worse() {
        let (c, v) = (Uuid::now_v7(), Uuid::now_v7());
        let variants = vec![variant(c, "control", true, 0), variant(v, "b", false, 1)];
        let tallies = HashMap::from([(c, tally(10_000, 1_200)), (v, tally(10_000, 1_000))]);

        let results = score_results(&draft_experiment(), &variants, &tallies);
        assert_eq!(results.winner, Some(c));
    }

    #[test]
    fn test_score_results_without_data() {
        let (c, v) = (Uuid::now_v7(), Uuid::now_v7());
        let variants = vec![variant(c, "control", true, 0), variant(v, "b", false, 1)];
        let results = score_results(&draft_experiment(), &variants, &HashMap::new());
        assert!(!results.significant);
        assert_eq!(results.winner, None);
        assert_eq!(results.variants[1].conversion_rate, 0.0);
    }

    #[test]
    fn test_cumulative_snapshots() {
        let v = Uuid::now_v7();
        let start = Utc::now();
        let events: Vec<ExperimentEvent> = (0..4)
            .map(|i| ExperimentEvent {
                experiment_id: Uuid::nil(),
                session_id: SessionId::new(format!("s{i}")),
                event_type: EventType::Assignment,
                variant_id: v,
                conversion_value: 0.0,
                timestamp: start + Duration::hours(i),
            })
            .collect();

        let snapshots = cumulative_snapshots(&events, 3);
        let sessions: Vec<u64> = snapshots.iter().map(|s| s[&v].sessions).collect();
        assert_eq!(sessions, vec![2, 3, 4]);
        assert!(cumulative_snapshots(&[], 3).is_empty());
    }

    #[tokio::test]
    async fn test_sequential_analysis_with_target() {
        let engine = engine();
        let mut new = new_experiment(two_arms());
        new.sample_size = Some(1_000);
        let experiment = engine.create_experiment(new).await.unwrap();
        engine.start_experiment(experiment.id).await.unwrap();

        for i in 0..40 {
            let session = SessionId::new(format!("s{i}"));
            engine.assign_variant(experiment.id, &session).await.unwrap();
        }

        let analysis = engine
            .sequential_analysis(experiment.id, Some(4))
            .await
            .unwrap();
        assert_eq!(analysis.len(), 1);
        assert_eq!(analysis[0].planned_per_arm, 1_000);
        assert!(!analysis[0].result.looks.is_empty());
        assert_eq!(analysis[0].result.recommendation, Recommendation::Continue);
    }

    #[tokio::test]
    async fn test_recommend_sample_size_needs_baseline() {
        let engine = engine();
        let experiment = running(&engine).await;
        let err = engine
            .recommend_sample_size(experiment.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::InvalidParameter(_)));
    }
}
