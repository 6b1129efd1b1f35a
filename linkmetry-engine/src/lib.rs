//! linkmetry-engine - Experimentation and attribution analytics
//!
//! Deterministic A/B variant assignment with significance, power and
//! sequential analysis, plus multi-touch attribution over click journeys.
//! Both engines persist to CozoDB and share one event schema.

pub mod attribution;
pub mod config;
pub mod error;
pub mod events;
pub mod experiment;
pub mod reporting;
pub mod stats;
pub mod store;

pub use config::{
    AnalyticsConfig, AttributionConfig, ExperimentConfig, SequentialConfig, SpendingFunction,
    StorageConfig, StorageEngine,
};
pub use error::{AnalyticsError, Result};
pub use events::{CampaignFields, ClickEvent, ConversionEvent, EVENT_SCHEMA_VERSION, SessionId};
pub use store::{AnalyticsDb, CURRENT_SCHEMA_VERSION};

// Engine re-exports
pub use attribution::{
    AttributionEngine, AttributionModel, AttributionReport, ChannelAttribution,
    ChannelAttributionReport, DataDrivenModel, LookbackDays,
};
pub use experiment::{ExperimentEngine, ExperimentResults, ExperimentStatus};
pub use reporting::{ExperimentReport, Reporter};
