//! The Rust server SDK for Statsig, a feature gating and experimentation platform.
//!
//! # Overview
//!
//! The SDK revolves around a [`Statsig`] instance that evaluates feature gates, dynamic configs,
//! experiments and layers for a [`StatsigUser`]. Rulesets are downloaded once at
//! [`Statsig::initialize`] and kept up to date in the background, so evaluations are local and
//! never wait for the network (except for the rare rules only the server can evaluate).
//!
//! ```no_run
//! # async fn test() -> statsig::Result<()> {
//! use statsig::{Statsig, StatsigOptions, StatsigUser};
//!
//! let statsig = Statsig::new("secret-key", StatsigOptions::new())?;
//! statsig.initialize().await?;
//!
//! let user = StatsigUser::with_user_id("a-user").email("someone@statsig.com");
//! let enabled = statsig.check_gate(&user, "new_checkout").await?;
//! let config = statsig.get_config(&user, "checkout_copy").await?;
//! let title: String = config.get_typed("title").unwrap_or_default();
//!
//! statsig.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Exposures
//!
//! Every evaluation logs an exposure event used for experiment analysis. Identical exposures for
//! the same user are deduplicated, and events are delivered in batches. Call
//! [`Statsig::shutdown`] before exiting so queued events are not lost.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. Only misuse is reported: using the SDK before
//! initialization, a user without any ID or an invalid secret key. Network failures are logged
//! and the SDK keeps serving the last ruleset it has.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages under
//! the `statsig` target. Consider integrating a `log`-compatible logger implementation for better
//! visibility into SDK operations.

#![warn(rustdoc::missing_crate_level_docs)]

mod client;
mod config;
mod dynamic_config;
mod layer;

#[doc(inline)]
pub use statsig_core::{
    data_store::{DataStore, InMemoryDataStore},
    eval::{EvaluationDetails, EvaluationReason, ParsedUserAgent},
    events::EventValue,
    DynamicValue, Error, Result, StatsigUser,
};

pub use client::Statsig;
pub use config::StatsigOptions;
pub use dynamic_config::DynamicConfig;
pub use layer::Layer;

pub(crate) const SDK_TYPE: &str = "rust-server";
pub(crate) const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
