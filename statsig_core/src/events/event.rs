use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::{eval::EvaluationResult, eval::SecondaryExposure, StatsigUser};

pub const GATE_EXPOSURE_EVENT: &str = "statsig::gate_exposure";
pub const CONFIG_EXPOSURE_EVENT: &str = "statsig::config_exposure";
pub const LAYER_EXPOSURE_EVENT: &str = "statsig::layer_exposure";

/// Optional value attached to a custom event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
#[serde(untagged)]
pub enum EventValue {
    String(String),
    Number(f64),
}

impl From<&str> for EventValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// One analytics record, as sent to `log_event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsigEvent {
    pub event_name: String,
    /// Private attributes are stripped when the event is built.
    pub user: StatsigUser,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<EventValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondary_exposures: Vec<SecondaryExposure>,
    /// Unix milliseconds.
    pub time: i64,
}

impl StatsigEvent {
    /// A custom event logged by the host application.
    pub fn custom(
        user: &StatsigUser,
        event_name: impl Into<String>,
        value: Option<EventValue>,
        metadata: Option<HashMap<String, String>>,
    ) -> StatsigEvent {
        StatsigEvent {
            event_name: event_name.into(),
            user: strip_private_attributes(user),
            value,
            metadata,
            secondary_exposures: Vec::new(),
            time: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn gate_exposure(
        user: &StatsigUser,
        gate_name: &str,
        result: &EvaluationResult,
    ) -> StatsigEvent {
        let mut metadata = details_metadata(result);
        metadata.insert("gate".to_owned(), gate_name.to_owned());
        metadata.insert("gateValue".to_owned(), result.bool_value.to_string());
        metadata.insert("ruleID".to_owned(), result.rule_id.clone());
        exposure(
            user,
            GATE_EXPOSURE_EVENT,
            metadata,
            result.secondary_exposures.clone(),
        )
    }

    /// Exposure of a dynamic config or experiment.
    pub fn config_exposure(
        user: &StatsigUser,
        config_name: &str,
        result: &EvaluationResult,
    ) -> StatsigEvent {
        let mut metadata = details_metadata(result);
        metadata.insert("config".to_owned(), config_name.to_owned());
        metadata.insert("ruleID".to_owned(), result.rule_id.clone());
        exposure(
            user,
            CONFIG_EXPOSURE_EVENT,
            metadata,
            result.secondary_exposures.clone(),
        )
    }

    /// Exposure of one layer parameter.
    ///
    /// Explicit parameters belong to the experiment the layer delegated to: the event names it as
    /// the allocated experiment and carries the delegate's exposures. Other parameters report the
    /// layer's own (undelegated) exposures and no allocated experiment.
    pub fn layer_exposure(
        user: &StatsigUser,
        layer_name: &str,
        parameter_name: &str,
        result: &EvaluationResult,
    ) -> StatsigEvent {
        let is_explicit = result
            .explicit_parameters
            .iter()
            .any(|p| p == parameter_name);
        let (allocated_experiment, secondary_exposures) = if is_explicit {
            (
                result.config_delegate.clone().unwrap_or_default(),
                result.secondary_exposures.clone(),
            )
        } else {
            (String::new(), result.undelegated_secondary_exposures.clone())
        };

        let mut metadata = details_metadata(result);
        metadata.insert("config".to_owned(), layer_name.to_owned());
        metadata.insert("ruleID".to_owned(), result.rule_id.clone());
        metadata.insert("allocatedExperiment".to_owned(), allocated_experiment);
        metadata.insert("parameterName".to_owned(), parameter_name.to_owned());
        metadata.insert("isExplicitParameter".to_owned(), is_explicit.to_string());
        exposure(user, LAYER_EXPOSURE_EVENT, metadata, secondary_exposures)
    }

    pub fn is_exposure(&self) -> bool {
        matches!(
            self.event_name.as_str(),
            GATE_EXPOSURE_EVENT | CONFIG_EXPOSURE_EVENT | LAYER_EXPOSURE_EVENT
        )
    }
}

fn exposure(
    user: &StatsigUser,
    event_name: &str,
    metadata: HashMap<String, String>,
    secondary_exposures: Vec<SecondaryExposure>,
) -> StatsigEvent {
    StatsigEvent {
        event_name: event_name.to_owned(),
        user: strip_private_attributes(user),
        value: None,
        metadata: Some(metadata),
        secondary_exposures,
        time: chrono::Utc::now().timestamp_millis(),
    }
}

fn details_metadata(result: &EvaluationResult) -> HashMap<String, String> {
    let details = &result.details;
    HashMap::from([
        ("reason".to_owned(), details.reason.to_string()),
        (
            "configSyncTime".to_owned(),
            details.config_sync_time.to_string(),
        ),
        ("initTime".to_owned(), details.init_time.to_string()),
        ("serverTime".to_owned(), details.server_time.to_string()),
    ])
}

fn strip_private_attributes(user: &StatsigUser) -> StatsigUser {
    StatsigUser {
        private_attributes: HashMap::new(),
        ..user.clone()
    }
}
