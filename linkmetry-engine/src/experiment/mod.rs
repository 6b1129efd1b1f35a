//! A/B experiments
//!
//! Sessions are bucketed into variants by a pure hash of the experiment and
//! session ids ([`assignment`]); the first assignment stored for a session is
//! canonical. Conversions are recorded against that assignment and scored on
//! demand with the statistics module.

pub mod assignment;
mod engine;
mod store;
mod types;

pub use assignment::{BUCKETS, bucket_for, select_variant, validate_variants};
pub use engine::ExperimentEngine;
pub use store::{CozoExperimentStore, ExperimentStore};
pub use types::*;
