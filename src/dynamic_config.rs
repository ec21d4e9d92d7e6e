use serde::de::DeserializeOwned;
use statsig_core::eval::{EvaluationDetails, EvaluationResult};

/// Value of a dynamic config or experiment for one user.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicConfig {
    pub name: String,
    pub value: serde_json::Map<String, serde_json::Value>,
    pub rule_id: String,
    /// Experiment group the user was assigned to, if any.
    pub group_name: Option<String>,
    pub details: EvaluationDetails,
}

impl DynamicConfig {
    pub(crate) fn from_result(name: &str, result: &EvaluationResult) -> DynamicConfig {
        DynamicConfig {
            name: name.to_owned(),
            value: result.value_map(),
            rule_id: result.rule_id.clone(),
            group_name: result.group_name.clone(),
            details: result.details,
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.value.get(key)
    }

    /// Get `key` converted to `T`. Returns `None` if the key is missing or has a different type.
    ///
    /// ```
    /// # fn test(config: &statsig::DynamicConfig) {
    /// let size: i64 = config.get_typed("size").unwrap_or(10);
    /// # }
    /// ```
    pub fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.value.get(key)?;
        serde_json::from_value(value.clone()).ok()
    }
}
