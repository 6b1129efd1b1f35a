//! CozoDB schema definitions for the analytics store
//!
//! Relation keys encode the uniqueness constraints the engines rely on for
//! idempotent writes: one assignment/conversion per session and experiment,
//! one touchpoint per order slot, one conversion per external id.

/// Current schema version
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Schema bookkeeping relation, created before any migration runs.
pub const VERSION_SCHEMA: &str = r#"
{
    :create schema_version {
        version: Int =>
        applied_at: Int,
        description: String
    }
}
"#;

/// Attribution relations: goals, touchpoints, conversions, derived weights.
pub const ATTRIBUTION_SCHEMA: &str = r#"
{
    :create conversion_goal {
        id: String =>
        owner: String,
        name: String,
        goal_type: String,
        target: String,
        value: Float,
        attribution_window_days: Int,
        created_at: Int
    }
}
{
    :create touchpoint {
        session_id: String,
        touchpoint_order: Int =>
        id: String,
        event_id: String,
        short_code: String,
        campaign_source: String?,
        campaign_medium: String?,
        campaign_name: String?,
        campaign_term: String?,
        campaign_content: String?,
        referrer: String?,
        touchpoint_time: Int,
        conversion_id: String?
    }
}
{
    :create conversion {
        conversion_id: String =>
        id: String,
        short_code: String,
        goal_id: String,
        value: Float,
        session_id: String,
        conversion_time: Int,
        attribution_model: String
    }
}
{
    :create touchpoint_attribution {
        conversion_id: String,
        touchpoint_id: String,
        attribution_model: String =>
        attribution_value: Float,
        weight: Float,
        computed_at: Int
    }
}
{
    ::index create touchpoint:by_event { event_id }
}
{
    ::index create conversion:by_short_code { short_code }
}
{
    ::index create conversion_goal:by_owner { owner }
}
"#;

/// Experiment relations: experiments, variants, append-only events.
pub const EXPERIMENT_SCHEMA: &str = r#"
{
    :create experiment {
        id: String =>
        owner: String,
        name: String,
        experiment_type: String,
        status: String,
        sample_size: Int?,
        confidence: Float,
        conversion_goal_id: String,
        created_at: Int,
        updated_at: Int
    }
}
{
    :create variant {
        experiment_id: String,
        position: Int =>
        id: String,
        name: String,
        short_code: String,
        traffic_allocation: Int,
        is_control: Bool
    }
}
{
    :create experiment_event {
        experiment_id: String,
        session_id: String,
        event_type: String =>
        variant_id: String,
        conversion_value: Float,
        timestamp: Int
    }
}
{
    ::index create experiment:by_owner { owner }
}
"#;

/// A versioned schema migration
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub script: &'static str,
}

/// All migrations in application order
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Attribution relations",
        script: ATTRIBUTION_SCHEMA,
    },
    Migration {
        version: 2,
        description: "Experiment relations",
        script: EXPERIMENT_SCHEMA,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_sequential() {
        for (index, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version as usize, index + 1);
        }
        assert_eq!(
            MIGRATIONS.last().map(|m| m.version),
            Some(CURRENT_SCHEMA_VERSION)
        );
    }

    #[test]
    fn test_attribution_schema_relations() {
        assert!(ATTRIBUTION_SCHEMA.contains(":create conversion_goal {"));
        assert!(ATTRIBUTION_SCHEMA.contains(":create touchpoint {"));
        assert!(ATTRIBUTION_SCHEMA.contains(":create conversion {"));
        assert!(ATTRIBUTION_SCHEMA.contains(":create touchpoint_attribution {"));
    }

    #[test]
    fn test_experiment_schema_relations() {
        assert!(EXPERIMENT_SCHEMA.contains(":create experiment {"));
        assert!(EXPERIMENT_SCHEMA.contains(":create variant {"));
        assert!(EXPERIMENT_SCHEMA.contains(":create experiment_event {"));
    }

    #[test]
    fn test_version_table() {
        assert!(VERSION_SCHEMA.contains(":create schema_version {"));
    }
}
