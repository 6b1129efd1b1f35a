//! Experiment storage trait and CozoDB implementation

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cozo::DataValue;

use crate::error::{AnalyticsError, Result};
use crate::events::SessionId;
use crate::store::{
    AnalyticsDb, Params, col_bool, col_float, col_int, col_str, col_time, col_uuid, millis,
};

use super::types::{
    EventType, Experiment, ExperimentEvent, ExperimentId, ExperimentStatus, ExperimentType,
    Variant, VariantId, VariantTally,
};

const EXPERIMENT_COLUMNS: &str = "id, owner, name, experiment_type, status, sample_size, \
    confidence, conversion_goal_id, created_at, updated_at";

const VARIANT_COLUMNS: &str =
    "experiment_id, position, id, name, short_code, traffic_allocation, is_control";

const EVENT_COLUMNS: &str =
    "experiment_id, session_id, event_type, variant_id, conversion_value, timestamp";

/// Storage interface for experiment data
#[async_trait]
pub trait ExperimentStore: Send + Sync {
    // Experiments and variants
    async fn create_experiment(&self, experiment: &Experiment, variants: &[Variant]) -> Result<()>;
    async fn get_experiment(&self, id: ExperimentId) -> Result<Option<Experiment>>;
    async fn list_experiments(&self, owner: Option<&str>) -> Result<Vec<Experiment>>;
    async fn get_variants(&self, id: ExperimentId) -> Result<Vec<Variant>>;
    async fn replace_variants(&self, id: ExperimentId, variants: &[Variant]) -> Result<()>;

    /// Move `id` from `from` to `to` atomically; returns the stored row afterwards.
    async fn transition_status(
        &self,
        id: ExperimentId,
        from: ExperimentStatus,
        to: ExperimentStatus,
        at: DateTime<Utc>,
    ) -> Result<Experiment>;

    // Events
    /// Insert unless an event with the same key exists; returns the stored event.
    async fn insert_event_if_absent(&self, event: &ExperimentEvent) -> Result<ExperimentEvent>;
    async fn get_event(
        &self,
        experiment_id: ExperimentId,
        session_id: &SessionId,
        event_type: EventType,
    ) -> Result<Option<ExperimentEvent>>;
    async fn list_events(&self, experiment_id: ExperimentId) -> Result<Vec<ExperimentEvent>>;
    async fn variant_tallies(
        &self,
        experiment_id: ExperimentId,
    ) -> Result<HashMap<VariantId, VariantTally>>;
}

/// CozoDB-backed experiment store
pub struct CozoExperimentStore {
    db: AnalyticsDb,
}

impl CozoExperimentStore {
    pub fn new(db: AnalyticsDb) -> Self {
        Self { db }
    }

    fn variant_rows(variants: &[Variant]) -> DataValue {
        DataValue::List(
            variants
                .iter()
                .map(|v| {
                    DataValue::List(vec![
                        DataValue::from(v.experiment_id.to_string()),
                        DataValue::from(i64::from(v.position)),
                        DataValue::from(v.id.to_string()),
                        DataValue::from(v.name.as_str()),
                        DataValue::from(v.short_code.as_str()),
                        DataValue::from(i64::from(v.traffic_allocation)),
                        DataValue::from(v.is_control),
                    ])
                })
                .collect(),
        )
    }

    fn event_params(event: &ExperimentEvent) -> Params {
        let mut params = Params::new();
        params.insert(
            "experiment_id".into(),
            DataValue::from(event.experiment_id.to_string()),
        );
        params.insert(
            "session_id".into(),
            DataValue::from(event.session_id.as_str()),
        );
        params.insert(
            "event_type".into(),
            DataValue::from(event.event_type.as_str()),
        );
        params.insert(
            "variant_id".into(),
            DataValue::from(event.variant_id.to_string()),
        );
        params.insert(
            "conversion_value".into(),
            DataValue::from(event.conversion_value),
        );
        params.insert("timestamp".into(), millis(event.timestamp));
        params
    }
}

#[async_trait]
impl ExperimentStore for CozoExperimentStore {
    async fn create_experiment(&self, experiment: &Experiment, variants: &[Variant]) -> Result<()> {
        let mut params = Params::new();
        params.insert("id".into(), DataValue::from(experiment.id.to_string()));
        params.insert("owner".into(), DataValue::from(experiment.owner.as_str()));
        params.insert("name".into(), DataValue::from(experiment.name.as_str()));
        params.insert(
            "experiment_type".into(),
            DataValue::from(experiment.experiment_type.as_str()),
        );
        params.insert(
            "status".into(),
            DataValue::from(experiment.status.as_str()),
        );
        params.insert(
            "sample_size".into(),
            experiment
                .sample_size
                .map(|n| DataValue::from(n as i64))
                .unwrap_or(DataValue::Null),
        );
        params.insert("confidence".into(), DataValue::from(experiment.confidence));
        params.insert(
            "conversion_goal_id".into(),
            DataValue::from(experiment.conversion_goal_id.to_string()),
        );
        params.insert("created_at".into(), millis(experiment.created_at));
        params.insert("updated_at".into(), millis(experiment.updated_at));
        params.insert("variants".into(), Self::variant_rows(variants));

        // Both relations are written in one transaction
        let script = format!(
            r#"{{
                ?[{EXPERIMENT_COLUMNS}] <- [[$id, $owner, $name, $experiment_type, $status,
                    $sample_size, $confidence, $conversion_goal_id, $created_at, $updated_at]]
                :put experiment {{
                    id => owner, name, experiment_type, status, sample_size, confidence,
                    conversion_goal_id, created_at, updated_at
                }}
            }}
            {{
                ?[{VARIANT_COLUMNS}] <- $variants
                :put variant {{
                    experiment_id, position => id, name, short_code, traffic_allocation, is_control
                }}
            }}"#
        );
        self.db.mutate(&script, params)?;
        Ok(())
    }

    async fn get_experiment(&self, id: ExperimentId) -> Result<Option<Experiment>> {
        let mut params = Params::new();
        params.insert("id".into(), DataValue::from(id.to_string()));
        let script = format!(
            "?[{EXPERIMENT_COLUMNS}] := *experiment{{{EXPERIMENT_COLUMNS}}}, id = $id"
        );
        let rows = self.db.query(&script, params)?;
        rows.rows.first().map(|row| parse_experiment_row(row)).transpose()
    }

    async fn list_experiments(&self, owner: Option<&str>) -> Result<Vec<Experiment>> {
        let mut params = Params::new();
        let script = match owner {
            Some(owner) => {
                params.insert("owner".into(), DataValue::from(owner));
                format!(
                    "?[{EXPERIMENT_COLUMNS}] := *experiment{{{EXPERIMENT_COLUMNS}}}, owner = $owner
                    :order -created_at"
                )
            }
            None => format!(
                "?[{EXPERIMENT_COLUMNS}] := *experiment{{{EXPERIMENT_COLUMNS}}}
                :order -created_at"
            ),
        };
        let rows = self.db.query(&script, params)?;
        rows.rows.iter().map(|row| parse_experiment_row(row)).collect()
    }

    async fn get_variants(&self, id: ExperimentId) -> Result<Vec<Variant>> {
        let mut params = Params::new();
        params.insert("experiment_id".into(), DataValue::from(id.to_string()));
        let script = format!(
            "?[{VARIANT_COLUMNS}] := *variant{{{VARIANT_COLUMNS}}}, experiment_id = $experiment_id"
        );
        let rows = self.db.query(&script, params)?;
        let mut variants = rows
            .rows
            .iter()
            .map(|row| parse_variant_row(row))
            .collect::<Result<Vec<_>>>()?;
        variants.sort_by_key(|v| v.position);
        Ok(variants)
    }

    async fn replace_variants(&self, id: ExperimentId, variants: &[Variant]) -> Result<()> {
        let mut params = Params::new();
        params.insert("experiment_id".into(), DataValue::from(id.to_string()));
        params.insert("variants".into(), Self::variant_rows(variants));

        let script = format!(
            r#"{{
                ?[experiment_id, position] := *variant{{experiment_id, position}},
                    experiment_id = $experiment_id
                :rm variant {{experiment_id, position}}
            }}
            {{
                ?[{VARIANT_COLUMNS}] <- $variants
                :put variant {{
                    experiment_id, position => id, name, short_code, traffic_allocation, is_control
                }}
            }}"#
        );
        self.db.mutate(&script, params)?;
        Ok(())
    }

    async fn transition_status(
        &self,
        id: ExperimentId,
        from: ExperimentStatus,
        to: ExperimentStatus,
        at: DateTime<Utc>,
    ) -> Result<Experiment> {
        let mut params = Params::new();
        params.insert("id".into(), DataValue::from(id.to_string()));
        params.insert("from".into(), DataValue::from(from.as_str()));
        params.insert("to".into(), DataValue::from(to.as_str()));
        params.insert("now".into(), millis(at));

        // Compare-and-set: only rows still in `from` are rewritten
        let script = format!(
            r#"?[{EXPERIMENT_COLUMNS}] :=
                *experiment{{id, owner, name, experiment_type, status: current, sample_size,
                    confidence, conversion_goal_id, created_at}},
                id = $id, current = $from, status = $to, updated_at = $now
            :put experiment {{
                id => owner, name, experiment_type, status, sample_size, confidence,
                conversion_goal_id, created_at, updated_at
            }}"#
        );
        self.db.mutate(&script, params)?;

        self.get_experiment(id)
            .await?
            .ok_or_else(|| AnalyticsError::not_found("Experiment", id))
    }

    async fn insert_event_if_absent(&self, event: &ExperimentEvent) -> Result<ExperimentEvent> {
        let script = format!(
            r#"input[{EVENT_COLUMNS}] <- [[$experiment_id, $session_id, $event_type,
                $variant_id, $conversion_value, $timestamp]]
            ?[{EVENT_COLUMNS}] := input[{EVENT_COLUMNS}],
                not *experiment_event{{experiment_id, session_id, event_type}}
            :put experiment_event {{
                experiment_id, session_id, event_type => variant_id, conversion_value, timestamp
            }}"#
        );
        self.db.mutate(&script, Self::event_params(event))?;

        self.get_event(event.experiment_id, &event.session_id, event.event_type)
            .await?
            .ok_or_else(|| AnalyticsError::Database("event missing after insert".into()))
    }

    async fn get_event(
        &self,
        experiment_id: ExperimentId,
        session_id: &SessionId,
        event_type: EventType,
    ) -> Result<Option<ExperimentEvent>> {
        let mut params = Params::new();
        params.insert(
            "experiment_id".into(),
            DataValue::from(experiment_id.to_string()),
        );
        params.insert("session_id".into(), DataValue::from(session_id.as_str()));
        params.insert("event_type".into(), DataValue::from(event_type.as_str()));
        let script = format!(
            "?[{EVENT_COLUMNS}] := *experiment_event{{{EVENT_COLUMNS}}},
                experiment_id = $experiment_id, session_id = $session_id,
                event_type = $event_type"
        );
        let rows = self.db.query(&script, params)?;
        rows.rows.first().map(|row| parse_event_row(row)).transpose()
    }

    async fn list_events(&self, experiment_id: ExperimentId) -> Result<Vec<ExperimentEvent>> {
        let mut params = Params::new();
        params.insert(
            "experiment_id".into(),
            DataValue::from(experiment_id.to_string()),
        );
        let script = format!(
            "?[{EVENT_COLUMNS}] := *experiment_event{{{EVENT_COLUMNS}}},
                experiment_id = $experiment_id
            :order timestamp"
        );
        let rows = self.db.query(&script, params)?;
        rows.rows.iter().map(|row| parse_event_row(row)).collect()
    }

    async fn variant_tallies(
        &self,
        experiment_id: ExperimentId,
    ) -> Result<HashMap<VariantId, VariantTally>> {
        let mut params = Params::new();
        params.insert(
            "experiment_id".into(),
            DataValue::from(experiment_id.to_string()),
        );
        let script = "?[variant_id, event_type, session_id, conversion_value] :=
                *experiment_event{experiment_id, session_id, event_type, variant_id, conversion_value},
                experiment_id = $experiment_id";
        let rows = self.db.query(script, params)?;

        let mut tallies: HashMap<VariantId, VariantTally> = HashMap::new();
        for row in &rows.rows {
            let variant_id = col_uuid(row, 0, "variant_id")?;
            let event_type = EventType::parse(&col_str(row, 1, "event_type")?)?;
            let value = col_float(row, 3, "conversion_value")?;

            let tally = tallies.entry(variant_id).or_default();
            match event_type {
                EventType::Assignment => tally.sessions += 1,
                EventType::Conversion => {
                    tally.conversions += 1;
                    tally.revenue += value;
                }
            }
        }
        Ok(tallies)
    }
}

// Helper functions for parsing CozoDB rows

fn parse_experiment_row(row: &[DataValue]) -> Result<Experiment> {
    Ok(Experiment {
        id: col_uuid(row, 0, "id")?,
        owner: col_str(row, 1, "owner")?,
        name: col_str(row, 2, "name")?,
        experiment_type: ExperimentType::parse(&col_str(row, 3, "experiment_type")?)?,
        status: ExperimentStatus::parse(&col_str(row, 4, "status")?)?,
        sample_size: row
            .get(5)
            .and_then(|v| v.get_int())
            .map(|n| n.max(0) as u64),
        confidence: col_float(row, 6, "confidence")?,
        conversion_goal_id: col_uuid(row, 7, "conversion_goal_id")?,
        created_at: col_time(row, 8, "created_at")?,
        updated_at: col_time(row, 9, "updated_at")?,
    })
}

fn parse_variant_row(row: &[DataValue]) -> Result<Variant> {
    Ok(Variant {
        experiment_id: col_uuid(row, 0, "experiment_id")?,
        position: col_int(row, 1, "position")? as u32,
        id: col_uuid(row, 2, "id")?,
        name: col_str(row, 3, "name")?,
        short_code: col_str(row, 4, "short_code")?,
        traffic_allocation: col_int(row, 5, "traffic_allocation")? as u32,
        is_control: col_bool(row, 6, "is_control")?,
    })
}

fn parse_event_row(row: &[DataValue]) -> Result<ExperimentEvent> {
    Ok(ExperimentEvent {
        experiment_id: col_uuid(row, 0, "experiment_id")?,
        session_id: SessionId::new(col_str(row, 1, "session_id")?),
        event_type: EventType::parse(&col_str(row, 2, "event_type")?)?,
        variant_id: col_uuid(row, 3, "variant_id")?,
        conversion_value: col_float(row, 4, "conversion_value")?,
        timestamp: col_time(row, 5, "timestamp")?,
    })
}
