use std::sync::Arc;

use serde::de::DeserializeOwned;
use statsig_core::{
    eval::{EvaluationDetails, EvaluationResult},
    events::{EventLogger, StatsigEvent},
    StatsigUser,
};

/// Parameters of a layer for one user.
///
/// Unlike gates and configs, layers log an exposure per parameter when it is read with
/// [`Layer::get`] or [`Layer::get_typed`], so the exposure names the experiment owning it.
pub struct Layer {
    pub name: String,
    pub rule_id: String,
    pub group_name: Option<String>,
    /// Experiment the user was allocated to in this layer, or `None`.
    pub allocated_experiment: Option<String>,
    pub details: EvaluationDetails,
    value: serde_json::Map<String, serde_json::Value>,
    user: StatsigUser,
    result: EvaluationResult,
    logger: Arc<EventLogger>,
}

impl Layer {
    pub(crate) fn new(
        name: &str,
        user: StatsigUser,
        result: EvaluationResult,
        logger: Arc<EventLogger>,
    ) -> Layer {
        Layer {
            name: name.to_owned(),
            rule_id: result.rule_id.clone(),
            group_name: result.group_name.clone(),
            allocated_experiment: result.config_delegate.clone(),
            details: result.details,
            value: result.value_map(),
            user,
            result,
            logger,
        }
    }

    /// Read `parameter` and log its exposure. Missing parameters are not logged.
    pub fn get(&self, parameter: &str) -> Option<&serde_json::Value> {
        let value = self.value.get(parameter)?;
        self.logger.enqueue(StatsigEvent::layer_exposure(
            &self.user,
            &self.name,
            parameter,
            &self.result,
        ));
        Some(value)
    }

    pub fn get_typed<T: DeserializeOwned>(&self, parameter: &str) -> Option<T> {
        let value = self.get(parameter)?;
        serde_json::from_value(value.clone()).ok()
    }

    /// All parameters, without logging exposures.
    pub fn parameters(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.value
    }
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("name", &self.name)
            .field("rule_id", &self.rule_id)
            .field("allocated_experiment", &self.allocated_experiment)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}
