use serde::{Deserialize, Serialize};

/// Where the data used for an evaluation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvaluationReason {
    /// Ruleset fetched from the Statsig API.
    Network,
    /// Ruleset loaded from a [`DataStore`](crate::data_store::DataStore).
    DataAdapter,
    /// Ruleset provided by the host application at startup.
    Bootstrap,
    /// Value set through local overrides.
    LocalOverride,
    /// Gate/config/layer is not present in the ruleset.
    Unrecognized,
    /// No ruleset has been loaded yet.
    Uninitialized,
}

impl EvaluationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationReason::Network => "Network",
            EvaluationReason::DataAdapter => "DataAdapter",
            EvaluationReason::Bootstrap => "Bootstrap",
            EvaluationReason::LocalOverride => "LocalOverride",
            EvaluationReason::Unrecognized => "Unrecognized",
            EvaluationReason::Uninitialized => "Uninitialized",
        }
    }
}

impl std::fmt::Display for EvaluationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating a spec for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvaluationOutcome {
    /// A rule matched and the user landed inside its pass percentage.
    Pass,
    /// No rule matched, the spec is disabled, or the user fell outside the pass percentage.
    Fail,
    /// The requested name is not in the ruleset.
    Unrecognized,
    /// The ruleset uses a condition or operator this SDK cannot evaluate. The caller should ask
    /// the server.
    FetchFromServer,
}

/// An exposure of a gate evaluated as a dependency of another gate/config/layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecondaryExposure {
    pub gate: String,
    /// `"true"` or `"false"`.
    pub gate_value: String,
    #[serde(rename = "ruleID")]
    pub rule_id: String,
}

/// Timing and provenance attached to every evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationDetails {
    pub reason: EvaluationReason,
    /// `time` of the ruleset used.
    pub config_sync_time: i64,
    /// When the ruleset was loaded by the SDK (unix ms).
    pub init_time: i64,
    /// When this evaluation happened (unix ms).
    pub server_time: i64,
}

impl EvaluationDetails {
    pub fn new(reason: EvaluationReason) -> EvaluationDetails {
        EvaluationDetails {
            reason,
            config_sync_time: 0,
            init_time: 0,
            server_time: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Result of a gate, config or layer evaluation.
#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub outcome: EvaluationOutcome,
    /// Gate value. For configs, `true` when a rule passed.
    pub bool_value: bool,
    /// Config/layer value. For gates, the raw rule return value.
    pub json_value: serde_json::Value,
    pub rule_id: String,
    pub group_name: Option<String>,
    pub is_experiment_group: bool,
    pub secondary_exposures: Vec<SecondaryExposure>,
    /// Layers only: exposures of the layer's own conditions, without the delegate's.
    pub undelegated_secondary_exposures: Vec<SecondaryExposure>,
    /// Layers only: experiment the winning rule delegated to.
    pub config_delegate: Option<String>,
    /// Layers only: parameters owned by the delegated experiment.
    pub explicit_parameters: Vec<String>,
    pub details: EvaluationDetails,
}

impl EvaluationResult {
    pub(crate) const DEFAULT_RULE_ID: &'static str = "default";

    /// Result for a name missing from the ruleset.
    pub fn unrecognized(reason: EvaluationReason) -> EvaluationResult {
        EvaluationResult {
            outcome: EvaluationOutcome::Unrecognized,
            bool_value: false,
            json_value: serde_json::Value::Object(Default::default()),
            rule_id: String::new(),
            group_name: None,
            is_experiment_group: false,
            secondary_exposures: Vec::new(),
            undelegated_secondary_exposures: Vec::new(),
            config_delegate: None,
            explicit_parameters: Vec::new(),
            details: EvaluationDetails::new(reason),
        }
    }

    pub(crate) fn fetch_from_server() -> EvaluationResult {
        EvaluationResult {
            outcome: EvaluationOutcome::FetchFromServer,
            ..EvaluationResult::unrecognized(EvaluationReason::Network)
        }
    }

    pub(crate) fn local_override(bool_value: bool, json_value: serde_json::Value) -> EvaluationResult {
        EvaluationResult {
            outcome: EvaluationOutcome::Pass,
            bool_value,
            json_value,
            rule_id: "override".to_owned(),
            ..EvaluationResult::unrecognized(EvaluationReason::LocalOverride)
        }
    }

    pub fn is_fetch_from_server(&self) -> bool {
        self.outcome == EvaluationOutcome::FetchFromServer
    }

    /// Config value as a JSON object. Non-object values produce an empty map.
    pub fn value_map(&self) -> serde_json::Map<String, serde_json::Value> {
        match &self.json_value {
            serde_json::Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        }
    }
}
