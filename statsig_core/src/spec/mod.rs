//! Parsed ruleset: gates, dynamic configs, experiments and layers.
mod models;
mod snapshot;

pub use models::*;
pub use snapshot::SpecSnapshot;
