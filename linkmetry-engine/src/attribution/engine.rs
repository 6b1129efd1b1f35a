//! Journey reconstruction and multi-model attribution

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{AnalyticsConfig, AttributionConfig};
use crate::error::{AnalyticsError, Result};
use crate::events::{ClickEvent, ConversionEvent};
use crate::store::AnalyticsDb;

use super::models::{DataDrivenModel, LinearFallback, compute_weights};
use super::store::{AttributionStore, CozoAttributionStore, TouchpointInsert};
use super::types::{
    AttributedTouchpoint, AttributionModel, AttributionReport, AttributionResult,
    ChannelAttribution, ChannelAttributionReport, Conversion, ConversionGoal, GoalId,
    LookbackDays, MAX_LOOKBACK_DAYS, NewConversionGoal, ReportWarning, Touchpoint,
    TouchpointAttribution,
};

/// Records journeys and distributes conversion credit over them
#[derive(Clone)]
pub struct AttributionEngine {
    store: Arc<dyn AttributionStore>,
    config: AttributionConfig,
    data_driven: Arc<dyn DataDrivenModel>,
}

impl AttributionEngine {
    pub fn new(store: Arc<dyn AttributionStore>, config: AttributionConfig) -> Self {
        Self {
            store,
            config,
            data_driven: Arc::new(LinearFallback),
        }
    }

    /// Engine over the Cozo-backed store with settings from `config`
    pub fn with_cozo(db: AnalyticsDb, config: &AnalyticsConfig) -> Self {
        Self::new(
            Arc::new(CozoAttributionStore::new(db)),
            config.attribution.clone(),
        )
    }

    /// Install the model used for `data_driven` attribution.
    #[must_use]
    pub fn with_data_driven_model(mut self, model: Arc<dyn DataDrivenModel>) -> Self {
        self.data_driven = model;
        self
    }

    pub fn config(&self) -> &AttributionConfig {
        &self.config
    }

    // --- Goals ------------------------------------------------------------

    pub async fn create_goal(&self, new: NewConversionGoal) -> Result<ConversionGoal> {
        if new.name.trim().is_empty() {
            return Err(AnalyticsError::Validation("goal name is empty".into()));
        }
        if new.target.trim().is_empty() {
            return Err(AnalyticsError::Validation("goal target is empty".into()));
        }
        if !new.value.is_finite() || new.value < 0.0 {
            return Err(AnalyticsError::Validation(format!(
                "goal value must be a non-negative number, got {}",
                new.value
            )));
        }
        let window = new
            .attribution_window_days
            .unwrap_or(self.config.default_window_days);
        if !(1..=MAX_LOOKBACK_DAYS).contains(&window) {
            return Err(AnalyticsError::Validation(format!(
                "attribution window must be within 1..={MAX_LOOKBACK_DAYS} days, got {window}"
            )));
        }

        let goal = ConversionGoal {
            id: Uuid::now_v7(),
            owner: new.owner,
            name: new.name,
            goal_type: new.goal_type,
            target: new.target,
            value: new.value,
            attribution_window_days: window,
            created_at: Utc::now(),
        };
        self.store.create_goal(&goal).await?;
        info!(goal_id = %goal.id, window_days = window, "Conversion goal created");
        Ok(goal)
    }

    pub async fn get_goal(&self, id: GoalId) -> Result<ConversionGoal> {
        self.store
            .get_goal(id)
            .await?
            .ok_or_else(|| AnalyticsError::not_found("ConversionGoal", id))
    }

    pub async fn list_goals(&self, owner: Option<&str>) -> Result<Vec<ConversionGoal>> {
        self.store.list_goals(owner).await
    }

    // --- Ingestion --------------------------------------------------------

    /// Append a click to its session's journey.
    ///
    /// The order is assigned here as the next integer for the session; a
    /// replayed event returns the touchpoint stored the first time.
    #[instrument(skip(self, click), fields(session_id = %click.session_id, event_id = %click.event_id))]
    pub async fn record_touchpoint(&self, click: &ClickEvent) -> Result<Touchpoint> {
        if let Some(existing) = self
            .store
            .find_touchpoint_by_event(&click.session_id, click.event_id)
            .await?
        {
            return Ok(existing);
        }

        let id = Uuid::now_v7();
        for attempt in 1..=self.config.order_retry_limit.max(1) {
            let next = self
                .store
                .max_touchpoint_order(&click.session_id)
                .await?
                .map_or(1, |max| max + 1);
            let touchpoint = Touchpoint {
                id,
                event_id: click.event_id,
                session_id: click.session_id.clone(),
                short_code: click.short_code.clone(),
                campaign: click.campaign.clone(),
                referrer: click.referrer.clone(),
                touchpoint_order: next,
                touchpoint_time: click.timestamp,
                conversion_id: None,
            };

            match self.store.insert_touchpoint_at(&touchpoint).await? {
                TouchpointInsert::Inserted(stored) => {
                    debug!(order = stored.touchpoint_order, "Touchpoint recorded");
                    return Ok(stored);
                }
                TouchpointInsert::Duplicate(stored) => return Ok(stored),
                TouchpointInsert::Conflict => {
                    warn!(attempt, order = next, "Touchpoint order taken, retrying");
                }
            }
        }

        Err(AnalyticsError::Database(format!(
            "touchpoint order contention for session {}",
            click.session_id
        )))
    }

    /// Store a conversion once per external id and compute its canonical
    /// attribution.
    #[instrument(skip(self, event), fields(conversion_id = %event.conversion_id))]
    pub async fn record_conversion(&self, event: ConversionEvent) -> Result<Conversion> {
        if event.conversion_id.trim().is_empty() {
            return Err(AnalyticsError::Validation("conversion id is empty".into()));
        }
        if let Some(existing) = self.store.get_conversion(&event.conversion_id).await? {
            // A retry after a failed attribution still completes it
            let goal = self.get_goal(existing.goal_id).await?;
            self.attribute(&existing, &goal, existing.attribution_model)
                .await?;
            debug!("Conversion already recorded");
            return Ok(existing);
        }

        let goal = self.get_goal(event.goal_id).await?;
        let value = event.value.unwrap_or(goal.value);
        if !value.is_finite() || value < 0.0 {
            return Err(AnalyticsError::Validation(format!(
                "conversion value must be a non-negative number, got {value}"
            )));
        }

        let conversion = Conversion {
            id: Uuid::now_v7(),
            conversion_id: event.conversion_id,
            short_code: event.short_code,
            goal_id: goal.id,
            value,
            session_id: event.session_id,
            conversion_time: event.timestamp,
            attribution_model: event.attribution_model,
        };
        let stored = self.store.insert_conversion_if_absent(&conversion).await?;
        let goal = if stored.goal_id == goal.id {
            goal
        } else {
            // Lost the race to a concurrent writer with another goal
            self.get_goal(stored.goal_id).await?
        };

        let result = self
            .attribute(&stored, &goal, stored.attribution_model)
            .await?;
        info!(
            model = %stored.attribution_model,
            touchpoints = result.touchpoints.len(),
            value = stored.value,
            "Conversion recorded"
        );
        Ok(stored)
    }

    pub async fn get_conversion(&self, conversion_id: &str) -> Result<Conversion> {
        self.store
            .get_conversion(conversion_id)
            .await?
            .ok_or_else(|| AnalyticsError::not_found("Conversion", conversion_id))
    }

    // --- Attribution ------------------------------------------------------

    /// Touchpoints of the converting session inside the goal's window, oldest first.
    pub async fn get_conversion_journey(&self, conversion_id: &str) -> Result<Vec<Touchpoint>> {
        let conversion = self.get_conversion(conversion_id).await?;
        let goal = self.get_goal(conversion.goal_id).await?;
        self.journey_for(&conversion, &goal).await
    }

    async fn journey_for(
        &self,
        conversion: &Conversion,
        goal: &ConversionGoal,
    ) -> Result<Vec<Touchpoint>> {
        let from =
            conversion.conversion_time - Duration::days(i64::from(goal.attribution_window_days));
        self.store
            .journey(
                &conversion.session_id,
                from,
                conversion.conversion_time,
                self.config.max_journey_touchpoints.max(1),
            )
            .await
    }

    /// Distribute a conversion's value over its journey under `model` and
    /// persist the credit.
    #[instrument(skip(self))]
    pub async fn calculate_attribution(
        &self,
        conversion_id: &str,
        model: AttributionModel,
    ) -> Result<AttributionResult> {
        let conversion = self.get_conversion(conversion_id).await?;
        let goal = self.get_goal(conversion.goal_id).await?;
        self.attribute(&conversion, &goal, model).await
    }

    async fn attribute(
        &self,
        conversion: &Conversion,
        goal: &ConversionGoal,
        model: AttributionModel,
    ) -> Result<AttributionResult> {
        let journey = self.journey_for(conversion, goal).await?;
        self.credit(conversion, journey, model).await
    }

    /// Score `journey` under `model`, upsert the credit rows and mark the
    /// touchpoints that have no conversion yet.
    async fn credit(
        &self,
        conversion: &Conversion,
        journey: Vec<Touchpoint>,
        model: AttributionModel,
    ) -> Result<AttributionResult> {
        let result = self.score(conversion, journey, model);

        let computed_at = Utc::now();
        let rows: Vec<TouchpointAttribution> = result
            .touchpoints
            .iter()
            .map(|t| TouchpointAttribution {
                conversion_id: conversion.conversion_id.clone(),
                touchpoint_id: t.touchpoint.id,
                attribution_model: model,
                attribution_value: t.attribution_value,
                weight: t.weight,
                computed_at,
            })
            .collect();
        self.store.save_attributions(&rows).await?;

        let unmarked: Vec<u64> = result
            .touchpoints
            .iter()
            .filter(|t| t.touchpoint.conversion_id.is_none())
            .map(|t| t.touchpoint.touchpoint_order)
            .collect();
        self.store
            .mark_touchpoints(&conversion.session_id, &unmarked, &conversion.conversion_id)
            .await?;

        Ok(result)
    }

    fn score(
        &self,
        conversion: &Conversion,
        journey: Vec<Touchpoint>,
        model: AttributionModel,
    ) -> AttributionResult {
        let (weights, fallback) = compute_weights(
            model,
            &journey,
            conversion.conversion_time,
            self.config.half_life_days,
            self.data_driven.as_ref(),
        );
        let touchpoints = journey
            .into_iter()
            .zip(weights)
            .map(|(touchpoint, weight)| AttributedTouchpoint {
                touchpoint,
                weight,
                attribution_value: weight * conversion.value,
            })
            .collect();

        AttributionResult {
            conversion_id: conversion.conversion_id.clone(),
            model,
            conversion_value: conversion.value,
            touchpoints,
            fallback,
        }
    }

    /// Journey of a conversion with its credit under every model.
    #[instrument(skip(self))]
    pub async fn get_attribution_report(&self, conversion_id: &str) -> Result<AttributionReport> {
        let conversion = self.get_conversion(conversion_id).await?;
        let goal = self.get_goal(conversion.goal_id).await?;

        // One read, so every model scores the same touchpoints
        let mut journey = self.journey_for(&conversion, &goal).await?;
        let mut models = Vec::with_capacity(AttributionModel::ALL.len());
        for model in AttributionModel::ALL {
            models.push(self.credit(&conversion, journey.clone(), model).await?);
        }
        for touchpoint in journey.iter_mut().filter(|t| t.conversion_id.is_none()) {
            touchpoint.conversion_id = Some(conversion.conversion_id.clone());
        }

        Ok(AttributionReport {
            conversion,
            journey,
            models,
        })
    }

    /// Credit per `(source, medium)` channel over the conversions of a short
    /// code in the last `days`.
    pub async fn get_channel_attribution(
        &self,
        short_code: &str,
        days: LookbackDays,
        model: AttributionModel,
    ) -> Result<ChannelAttributionReport> {
        self.get_channel_attribution_as_of(short_code, days, model, Utc::now())
            .await
    }

    /// Same as [`Self::get_channel_attribution`] with an explicit end of range.
    ///
    /// Conversions are attributed concurrently; one that fails is left out
    /// with a warning instead of failing the report.
    #[instrument(skip(self, now))]
    pub async fn get_channel_attribution_as_of(
        &self,
        short_code: &str,
        days: LookbackDays,
        model: AttributionModel,
        now: DateTime<Utc>,
    ) -> Result<ChannelAttributionReport> {
        let since = now - Duration::days(i64::from(days.get()));
        let conversions = self
            .store
            .conversions_for_short_code(short_code, since, now)
            .await?;

        let permits = Arc::new(Semaphore::new(self.config.report_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for conversion in conversions.iter().cloned() {
            let engine = self.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let outcome = engine
                    .calculate_attribution(&conversion.conversion_id, model)
                    .await;
                (conversion.conversion_id, outcome)
            });
        }

        let mut results = Vec::with_capacity(conversions.len());
        let mut warnings = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(result))) => results.push(result),
                Ok((conversion_id, Err(e))) => {
                    warn!(conversion_id = %conversion_id, error = %e, "Attribution failed, omitting conversion");
                    warnings.push(ReportWarning {
                        conversion_id,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Attribution task aborted");
                    warnings.push(ReportWarning {
                        conversion_id: String::new(),
                        message: format!("attribution task failed: {e}"),
                    });
                }
            }
        }
        warnings.sort_by(|a, b| a.conversion_id.cmp(&b.conversion_id));

        let (channels, unattributed_value) = aggregate_channels(&results);
        Ok(ChannelAttributionReport {
            short_code: short_code.to_string(),
            days,
            model,
            channels,
            warnings,
            conversions_considered: results.len() as u64,
            unattributed_value,
        })
    }
}

/// Sum credit per channel, highest value first; also returns the value of
/// conversions with an empty journey.
fn aggregate_channels(results: &[AttributionResult]) -> (Vec<ChannelAttribution>, f64) {
    let mut by_channel: BTreeMap<(String, String), (f64, HashSet<&str>, u64)> = BTreeMap::new();
    let mut unattributed = 0.0;

    for result in results {
        if result.touchpoints.is_empty() {
            unattributed += result.conversion_value;
            continue;
        }
        for credited in &result.touchpoints {
            let entry = by_channel
                .entry(credited.touchpoint.channel())
                .or_insert_with(|| (0.0, HashSet::new(), 0));
            entry.0 += credited.attribution_value;
            entry.1.insert(result.conversion_id.as_str());
            entry.2 += 1;
        }
    }

    let mut channels: Vec<ChannelAttribution> = by_channel
        .into_iter()
        .map(|((source, medium), (value, conversions, touchpoints))| ChannelAttribution {
            source,
            medium,
            attributed_value: value,
            conversions: conversions.len() as u64,
            touchpoints,
        })
        .collect();
    channels.sort_by(|a, b| b.attributed_value.total_cmp(&a.attributed_value));
    (channels, unattributed)
}
