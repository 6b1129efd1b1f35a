//! Attribution storage trait and CozoDB implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cozo::DataValue;

use crate::error::{AnalyticsError, Result};
use crate::events::{CampaignFields, SessionId};
use crate::store::{
    AnalyticsDb, Params, col_float, col_int, col_opt_str, col_str, col_time, col_uuid, millis,
    opt_str,
};

use super::types::{
    AttributionModel, Conversion, ConversionGoal, GoalId, GoalType, Touchpoint,
    TouchpointAttribution,
};

const GOAL_COLUMNS: &str =
    "id, owner, name, goal_type, target, value, attribution_window_days, created_at";

const TOUCHPOINT_COLUMNS: &str = "session_id, touchpoint_order, id, event_id, short_code, \
    campaign_source, campaign_medium, campaign_name, campaign_term, campaign_content, \
    referrer, touchpoint_time, conversion_id";

const CONVERSION_COLUMNS: &str =
    "conversion_id, id, short_code, goal_id, value, session_id, conversion_time, attribution_model";

const ATTRIBUTION_COLUMNS: &str =
    "conversion_id, touchpoint_id, attribution_model, attribution_value, weight, computed_at";

/// Outcome of claiming a touchpoint order slot
#[derive(Debug, Clone, PartialEq)]
pub enum TouchpointInsert {
    /// The touchpoint was stored at the requested order
    Inserted(Touchpoint),
    /// Its event was already stored; the existing touchpoint is returned
    Duplicate(Touchpoint),
    /// Another touchpoint took the order slot first
    Conflict,
}

/// Storage interface for attribution data
#[async_trait]
pub trait AttributionStore: Send + Sync {
    // Goals
    async fn create_goal(&self, goal: &ConversionGoal) -> Result<()>;
    async fn get_goal(&self, id: GoalId) -> Result<Option<ConversionGoal>>;
    async fn list_goals(&self, owner: Option<&str>) -> Result<Vec<ConversionGoal>>;

    // Touchpoints
    async fn find_touchpoint_by_event(
        &self,
        session_id: &SessionId,
        event_id: uuid::Uuid,
    ) -> Result<Option<Touchpoint>>;
    async fn max_touchpoint_order(&self, session_id: &SessionId) -> Result<Option<u64>>;
    /// Store `touchpoint` unless its order slot or its event is already taken.
    async fn insert_touchpoint_at(&self, touchpoint: &Touchpoint) -> Result<TouchpointInsert>;
    /// Touchpoints of a session within `[from, to]`, keeping the `limit` most
    /// recent, in ascending order.
    async fn journey(
        &self,
        session_id: &SessionId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Touchpoint>>;
    /// Set `conversion_id` on the given touchpoints where it is still empty.
    async fn mark_touchpoints(
        &self,
        session_id: &SessionId,
        orders: &[u64],
        conversion_id: &str,
    ) -> Result<()>;

    // Conversions
    /// Insert unless the external id exists; returns the stored conversion.
    async fn insert_conversion_if_absent(&self, conversion: &Conversion) -> Result<Conversion>;
    async fn get_conversion(&self, conversion_id: &str) -> Result<Option<Conversion>>;
    async fn conversions_for_short_code(
        &self,
        short_code: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Conversion>>;

    // Derived credit
    async fn save_attributions(&self, rows: &[TouchpointAttribution]) -> Result<()>;
    async fn get_attributions(
        &self,
        conversion_id: &str,
        model: AttributionModel,
    ) -> Result<Vec<TouchpointAttribution>>;
}

/// CozoDB-backed attribution store
pub struct CozoAttributionStore {
    db: AnalyticsDb,
}

impl CozoAttributionStore {
    pub fn new(db: AnalyticsDb) -> Self {
        Self { db }
    }

    fn session_params(session_id: &SessionId) -> Params {
        let mut params = Params::new();
        params.insert("session_id".into(), DataValue::from(session_id.as_str()));
        params
    }

    fn touchpoint_params(touchpoint: &Touchpoint) -> Params {
        let campaign = &touchpoint.campaign;
        let mut params = Self::session_params(&touchpoint.session_id);
        params.insert(
            "touchpoint_order".into(),
            DataValue::from(touchpoint.touchpoint_order as i64),
        );
        params.insert("id".into(), DataValue::from(touchpoint.id.to_string()));
        params.insert(
            "event_id".into(),
            DataValue::from(touchpoint.event_id.to_string()),
        );
        params.insert(
            "short_code".into(),
            DataValue::from(touchpoint.short_code.as_str()),
        );
        params.insert("campaign_source".into(), opt_str(campaign.source.as_deref()));
        params.insert("campaign_medium".into(), opt_str(campaign.medium.as_deref()));
        params.insert("campaign_name".into(), opt_str(campaign.name.as_deref()));
        params.insert("campaign_term".into(), opt_str(campaign.term.as_deref()));
        params.insert("campaign_content".into(), opt_str(campaign.content.as_deref()));
        params.insert("referrer".into(), opt_str(touchpoint.referrer.as_deref()));
        params.insert("touchpoint_time".into(), millis(touchpoint.touchpoint_time));
        params.insert(
            "conversion_id".into(),
            opt_str(touchpoint.conversion_id.as_deref()),
        );
        params
    }
}

#[async_trait]
impl AttributionStore for CozoAttributionStore {
    async fn create_goal(&self, goal: &ConversionGoal) -> Result<()> {
        let mut params = Params::new();
        params.insert("id".into(), DataValue::from(goal.id.to_string()));
        params.insert("owner".into(), DataValue::from(goal.owner.as_str()));
        params.insert("name".into(), DataValue::from(goal.name.as_str()));
        params.insert("goal_type".into(), DataValue::from(goal.goal_type.as_str()));
        params.insert("target".into(), DataValue::from(goal.target.as_str()));
        params.insert("value".into(), DataValue::from(goal.value));
        params.insert(
            "attribution_window_days".into(),
            DataValue::from(i64::from(goal.attribution_window_days)),
        );
        params.insert("created_at".into(), millis(goal.created_at));

        let script = format!(
            r#"?[{GOAL_COLUMNS}] <- [[$id, $owner, $name, $goal_type, $target, $value,
                $attribution_window_days, $created_at]]
            :put conversion_goal {{
                id => owner, name, goal_type, target, value, attribution_window_days, created_at
            }}"#
        );
        self.db.mutate(&script, params)?;
        Ok(())
    }

    async fn get_goal(&self, id: GoalId) -> Result<Option<ConversionGoal>> {
        let mut params = Params::new();
        params.insert("id".into(), DataValue::from(id.to_string()));
        let script = format!("?[{GOAL_COLUMNS}] := *conversion_goal{{{GOAL_COLUMNS}}}, id = $id");
        let rows = self.db.query(&script, params)?;
        rows.rows.first().map(|row| parse_goal_row(row)).transpose()
    }

    async fn list_goals(&self, owner: Option<&str>) -> Result<Vec<ConversionGoal>> {
        let mut params = Params::new();
        let filter = match owner {
            Some(owner) => {
                params.insert("owner".into(), DataValue::from(owner));
                ", owner = $owner"
            }
            None => "",
        };
        let script = format!(
            "?[{GOAL_COLUMNS}] := *conversion_goal{{{GOAL_COLUMNS}}}{filter}
            :order created_at"
        );
        let rows = self.db.query(&script, params)?;
        rows.rows.iter().map(|row| parse_goal_row(row)).collect()
    }

    async fn find_touchpoint_by_event(
        &self,
        session_id: &SessionId,
        event_id: uuid::Uuid,
    ) -> Result<Option<Touchpoint>> {
        let mut params = Self::session_params(session_id);
        params.insert("event_id".into(), DataValue::from(event_id.to_string()));
        let script = format!(
            "?[{TOUCHPOINT_COLUMNS}] := *touchpoint{{{TOUCHPOINT_COLUMNS}}},
                session_id = $session_id, event_id = $event_id"
        );
        let rows = self.db.query(&script, params)?;
        rows.rows.first().map(|row| parse_touchpoint_row(row)).transpose()
    }

    async fn max_touchpoint_order(&self, session_id: &SessionId) -> Result<Option<u64>> {
        let rows = self.db.query(
            "?[touchpoint_order] := *touchpoint{session_id, touchpoint_order},
                session_id = $session_id
            :order -touchpoint_order
            :limit 1",
            Self::session_params(session_id),
        )?;
        Ok(rows
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(|v| v.get_int())
            .map(|order| order.max(0) as u64))
    }

    async fn insert_touchpoint_at(&self, touchpoint: &Touchpoint) -> Result<TouchpointInsert> {
        // One transaction: claim the slot only if neither the order nor the event is taken
        let script = format!(
            r#"input[{TOUCHPOINT_COLUMNS}] <- [[$session_id, $touchpoint_order, $id, $event_id,
                $short_code, $campaign_source, $campaign_medium, $campaign_name, $campaign_term,
                $campaign_content, $referrer, $touchpoint_time, $conversion_id]]
            seen[event_id] := *touchpoint{{session_id, event_id}}, session_id = $session_id
            ?[{TOUCHPOINT_COLUMNS}] := input[{TOUCHPOINT_COLUMNS}],
                not *touchpoint{{session_id, touchpoint_order}},
                not seen[event_id]
            :put touchpoint {{
                session_id, touchpoint_order => id, event_id, short_code, campaign_source,
                campaign_medium, campaign_name, campaign_term, campaign_content, referrer,
                touchpoint_time, conversion_id
            }}"#
        );
        self.db.mutate(&script, Self::touchpoint_params(touchpoint))?;

        match self
            .find_touchpoint_by_event(&touchpoint.session_id, touchpoint.event_id)
            .await?
        {
            Some(stored) if stored.id == touchpoint.id => Ok(TouchpointInsert::Inserted(stored)),
            Some(stored) => Ok(TouchpointInsert::Duplicate(stored)),
            None => Ok(TouchpointInsert::Conflict),
        }
    }

    async fn journey(
        &self,
        session_id: &SessionId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Touchpoint>> {
        let mut params = Self::session_params(session_id);
        params.insert("from".into(), millis(from));
        params.insert("to".into(), millis(to));
        let script = format!(
            "?[{TOUCHPOINT_COLUMNS}] := *touchpoint{{{TOUCHPOINT_COLUMNS}}},
                session_id = $session_id,
                touchpoint_time >= $from, touchpoint_time <= $to
            :order -touchpoint_order
            :limit {limit}"
        );
        let rows = self.db.query(&script, params)?;
        let mut journey = rows
            .rows
            .iter()
            .map(|row| parse_touchpoint_row(row))
            .collect::<Result<Vec<_>>>()?;
        journey.sort_by_key(|t| t.touchpoint_order);
        Ok(journey)
    }

    async fn mark_touchpoints(
        &self,
        session_id: &SessionId,
        orders: &[u64],
        conversion_id: &str,
    ) -> Result<()> {
        if orders.is_empty() {
            return Ok(());
        }
        let mut params = Self::session_params(session_id);
        params.insert(
            "orders".into(),
            DataValue::List(orders.iter().map(|&o| DataValue::from(o as i64)).collect()),
        );
        params.insert("conversion_id".into(), DataValue::from(conversion_id));

        let script = format!(
            r#"?[{TOUCHPOINT_COLUMNS}] :=
                *touchpoint{{session_id, touchpoint_order, id, event_id, short_code,
                    campaign_source, campaign_medium, campaign_name, campaign_term,
                    campaign_content, referrer, touchpoint_time, conversion_id: existing}},
                session_id = $session_id,
                is_in(touchpoint_order, $orders),
                is_null(existing),
                conversion_id = $conversion_id
            :put touchpoint {{
                session_id, touchpoint_order => id, event_id, short_code, campaign_source,
                campaign_medium, campaign_name, campaign_term, campaign_content, referrer,
                touchpoint_time, conversion_id
            }}"#
        );
        self.db.mutate(&script, params)?;
        Ok(())
    }

    async fn insert_conversion_if_absent(&self, conversion: &Conversion) -> Result<Conversion> {
        let mut params = Params::new();
        params.insert(
            "conversion_id".into(),
            DataValue::from(conversion.conversion_id.as_str()),
        );
        params.insert("id".into(), DataValue::from(conversion.id.to_string()));
        params.insert(
            "short_code".into(),
            DataValue::from(conversion.short_code.as_str()),
        );
        params.insert(
            "goal_id".into(),
            DataValue::from(conversion.goal_id.to_string()),
        );
        params.insert("value".into(), DataValue::from(conversion.value));
        params.insert(
            "session_id".into(),
            DataValue::from(conversion.session_id.as_str()),
        );
        params.insert("conversion_time".into(), millis(conversion.conversion_time));
        params.insert(
            "attribution_model".into(),
            DataValue::from(conversion.attribution_model.as_str()),
        );

        let script = format!(
            r#"input[{CONVERSION_COLUMNS}] <- [[$conversion_id, $id, $short_code, $goal_id,
                $value, $session_id, $conversion_time, $attribution_model]]
            ?[{CONVERSION_COLUMNS}] := input[{CONVERSION_COLUMNS}],
                not *conversion{{conversion_id}}
            :put conversion {{
                conversion_id => id, short_code, goal_id, value, session_id, conversion_time,
                attribution_model
            }}"#
        );
        self.db.mutate(&script, params)?;

        self.get_conversion(&conversion.conversion_id)
            .await?
            .ok_or_else(|| AnalyticsError::Database("conversion missing after insert".into()))
    }

    async fn get_conversion(&self, conversion_id: &str) -> Result<Option<Conversion>> {
        let mut params = Params::new();
        params.insert("conversion_id".into(), DataValue::from(conversion_id));
        let script = format!(
            "?[{CONVERSION_COLUMNS}] := *conversion{{{CONVERSION_COLUMNS}}},
                conversion_id = $conversion_id"
        );
        let rows = self.db.query(&script, params)?;
        rows.rows.first().map(|row| parse_conversion_row(row)).transpose()
    }

    async fn conversions_for_short_code(
        &self,
        short_code: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Conversion>> {
        let mut params = Params::new();
        params.insert("short_code".into(), DataValue::from(short_code));
        params.insert("since".into(), millis(since));
        params.insert("until".into(), millis(until));
        let script = format!(
            "?[{CONVERSION_COLUMNS}] := *conversion{{{CONVERSION_COLUMNS}}},
                short_code = $short_code,
                conversion_time >= $since, conversion_time <= $until
            :order conversion_time"
        );
        let rows = self.db.query(&script, params)?;
        rows.rows.iter().map(|row| parse_conversion_row(row)).collect()
    }

    async fn save_attributions(&self, rows: &[TouchpointAttribution]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut params = Params::new();
        params.insert(
            "rows".into(),
            DataValue::List(
                rows.iter()
                    .map(|r| {
                        DataValue::List(vec![
                            DataValue::from(r.conversion_id.as_str()),
                            DataValue::from(r.touchpoint_id.to_string()),
                            DataValue::from(r.attribution_model.as_str()),
                            DataValue::from(r.attribution_value),
                            DataValue::from(r.weight),
                            millis(r.computed_at),
                        ])
                    })
                    .collect(),
            ),
        );
        let script = format!(
            r#"?[{ATTRIBUTION_COLUMNS}] <- $rows
            :put touchpoint_attribution {{
                conversion_id, touchpoint_id, attribution_model =>
                attribution_value, weight, computed_at
            }}"#
        );
        self.db.mutate(&script, params)?;
        Ok(())
    }

    async fn get_attributions(
        &self,
        conversion_id: &str,
        model: AttributionModel,
    ) -> Result<Vec<TouchpointAttribution>> {
        let mut params = Params::new();
        params.insert("conversion_id".into(), DataValue::from(conversion_id));
        params.insert("attribution_model".into(), DataValue::from(model.as_str()));
        let script = format!(
            "?[{ATTRIBUTION_COLUMNS}] := *touchpoint_attribution{{{ATTRIBUTION_COLUMNS}}},
                conversion_id = $conversion_id, attribution_model = $attribution_model"
        );
        let rows = self.db.query(&script, params)?;
        rows.rows.iter().map(|row| parse_attribution_row(row)).collect()
    }
}

// Helper functions for parsing CozoDB rows

fn parse_goal_row(row: &[DataValue]) -> Result<ConversionGoal> {
    Ok(ConversionGoal {
        id: col_uuid(row, 0, "id")?,
        owner: col_str(row, 1, "owner")?,
        name: col_str(row, 2, "name")?,
        goal_type: GoalType::parse(&col_str(row, 3, "goal_type")?)?,
        target: col_str(row, 4, "target")?,
        value: col_float(row, 5, "value")?,
        attribution_window_days: col_int(row, 6, "attribution_window_days")?.max(0) as u32,
        created_at: col_time(row, 7, "created_at")?,
    })
}

fn parse_touchpoint_row(row: &[DataValue]) -> Result<Touchpoint> {
    Ok(Touchpoint {
        session_id: SessionId::new(col_str(row, 0, "session_id")?),
        touchpoint_order: col_int(row, 1, "touchpoint_order")?.max(0) as u64,
        id: col_uuid(row, 2, "id")?,
        event_id: col_uuid(row, 3, "event_id")?,
        short_code: col_str(row, 4, "short_code")?,
        campaign: CampaignFields {
            source: col_opt_str(row, 5),
            medium: col_opt_str(row, 6),
            name: col_opt_str(row, 7),
            term: col_opt_str(row, 8),
            content: col_opt_str(row, 9),
        },
        referrer: col_opt_str(row, 10),
        touchpoint_time: col_time(row, 11, "touchpoint_time")?,
        conversion_id: col_opt_str(row, 12),
    })
}

fn parse_conversion_row(row: &[DataValue]) -> Result<Conversion> {
    Ok(Conversion {
        conversion_id: col_str(row, 0, "conversion_id")?,
        id: col_uuid(row, 1, "id")?,
        short_code: col_str(row, 2, "short_code")?,
        goal_id: col_uuid(row, 3, "goal_id")?,
        value: col_float(row, 4, "value")?,
        session_id: SessionId::new(col_str(row, 5, "session_id")?),
        conversion_time: col_time(row, 6, "conversion_time")?,
        attribution_model: col_str(row, 7, "attribution_model")?
            .parse()
            .map_err(|e| AnalyticsError::Database(format!("Invalid attribution_model: {e}")))?,
    })
}

fn parse_attribution_row(row: &[DataValue]) -> Result<TouchpointAttribution> {
    Ok(TouchpointAttribution {
        conversion_id: col_str(row, 0, "conversion_id")?,
        touchpoint_id: col_uuid(row, 1, "touchpoint_id")?,
        attribution_model: col_str(row, 2, "attribution_model")?
            .parse()
            .map_err(|e| AnalyticsError::Database(format!("Invalid attribution_model: {e}")))?,
        attribution_value: col_float(row, 3, "attribution_value")?,
        weight: col_float(row, 4, "weight")?,
        computed_at: col_time(row, 5, "computed_at")?,
    })
}
