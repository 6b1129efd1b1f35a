//! Multi-touch attribution
//!
//! Touchpoints are appended per session with a server-assigned order. When a
//! conversion arrives, its journey (the session's touchpoints inside the
//! goal's window) is weighted by one of six models and the credit is stored
//! per touchpoint.

mod engine;
pub mod models;
mod store;
mod types;

pub use engine::AttributionEngine;
pub use models::{DataDrivenModel, LinearFallback};
pub use store::{AttributionStore, CozoAttributionStore, TouchpointInsert};
pub use types::*;
