//! `statsig_core` is the engine behind the Statsig server SDK for Rust. If you're a Statsig user,
//! you probably want the `statsig` crate, which wires these pieces together.
//!
//! # Overview
//!
//! [`SpecSnapshot`](spec::SpecSnapshot) is the heart of the SDK. It is an immutable structure
//! holding every gate, dynamic config, experiment and layer from one `download_config_specs`
//! response.
//!
//! [`SpecStore`](spec_store::SpecStore) owns the active snapshot and the synced [ID
//! lists](id_list::IdList). It loads the first ruleset (from a [data
//! store](data_store::DataStore), bootstrap values or the network) and keeps it fresh with two
//! background tasks. Whenever the ruleset changes, the snapshot is replaced completely; a reader
//! keeps using the snapshot it got for the whole evaluation.
//!
//! [`eval`] evaluates specs against a [`StatsigUser`]. Results carry the secondary exposures
//! collected along the way but do not log anything. [`Evaluator`](eval::Evaluator) combines the
//! spec store, local overrides and field resolvers so callers do not have to pass them around.
//!
//! [`events`] builds exposure events and delivers them through the batching, deduplicating
//! [`EventLogger`](events::EventLogger).
//!
//! All network traffic goes through the [`Network`](network::Network) trait, implemented over
//! `reqwest` by [`HttpNetwork`](network::HttpNetwork).
//!
//! # Versioning
//!
//! This library follows semver. However, it is considered an internal library, so expect frequent
//! breaking changes and major version bumps.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod data_store;
pub mod eval;
pub mod events;
pub mod id_list;
pub mod network;
pub mod sharder;
pub mod spec;
pub mod spec_store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

mod error;
mod sdk_metadata;
mod user;

pub use error::{Error, Result};
pub use sdk_metadata::StatsigMetadata;
pub use user::{DynamicValue, StatsigUser};
