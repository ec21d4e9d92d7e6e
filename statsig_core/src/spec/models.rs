use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Response of the `download_config_specs` endpoint. Also the format stored in data stores and
/// accepted as bootstrap values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadConfigSpecsResponse {
    /// `false` means nothing changed since the requested `sinceTime`.
    #[serde(default)]
    pub has_updates: bool,
    /// Server time of this ruleset. Used as `sinceTime` cursor for the next request.
    #[serde(default)]
    pub time: i64,
    /// Values are wrapped in `TryParse` so that if we fail to parse one spec (e.g., new server
    /// format), we can still serve the others.
    #[serde(default)]
    pub feature_gates: Vec<TryParse<ConfigSpec>>,
    #[serde(default)]
    pub dynamic_configs: Vec<TryParse<ConfigSpec>>,
    #[serde(default)]
    pub layer_configs: Vec<TryParse<ConfigSpec>>,
    /// Layer name to experiment names allocated in it.
    #[serde(default)]
    pub layers: HashMap<String, Vec<String>>,
    /// Legacy field listing ID list names. Contents are synced through `get_id_lists`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_lists: Option<HashMap<String, bool>>,
}

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum TryParse<T> {
    /// Successfully parsed.
    Parsed(T),
    /// Parsing failed.
    ParseFailed(serde_json::Value),
}
impl<T> From<TryParse<T>> for Result<T, serde_json::Value> {
    fn from(value: TryParse<T>) -> Self {
        match value {
            TryParse::Parsed(v) => Ok(v),
            TryParse::ParseFailed(v) => Err(v),
        }
    }
}
impl<T> From<TryParse<T>> for Option<T> {
    fn from(value: TryParse<T>) -> Self {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

/// Definition of a single gate, dynamic config, experiment or layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub spec_type: SpecType,
    pub salt: String,
    pub enabled: bool,
    #[serde(default)]
    pub rules: Vec<ConfigRule>,
    /// Default config value, or `false` for gates.
    #[serde(default)]
    pub default_value: serde_json::Value,
    #[serde(default = "default_id_type")]
    pub id_type: String,
    /// `feature_gate`, `dynamic_config`, `experiment`, `autotune`, `layer`, ...
    #[serde(default)]
    pub entity: Option<String>,
    /// Layer parameters owned by this experiment.
    #[serde(default)]
    pub explicit_parameters: Option<Vec<String>>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub has_shared_params: Option<bool>,
    #[serde(default)]
    pub is_device_based: Option<bool>,
    /// Client apps this spec is served to. Not used by server-side evaluation.
    #[serde(default, rename = "targetAppIDs")]
    pub target_app_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecType {
    FeatureGate,
    DynamicConfig,
    #[serde(other)]
    Other,
}

/// One rule of a spec. Rules are evaluated in order and the first one whose conditions all pass
/// decides the outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRule {
    pub name: String,
    /// 0 to 100. Compared against a bucket in 0..10000, so precision is two decimal places.
    pub pass_percentage: f64,
    #[serde(default)]
    pub return_value: serde_json::Value,
    pub id: String,
    /// Overrides `id` in the bucketing hash input.
    #[serde(default)]
    pub salt: Option<String>,
    #[serde(default)]
    pub conditions: Vec<ConfigCondition>,
    #[serde(default = "default_id_type")]
    pub id_type: String,
    /// Layers only: name of the experiment this rule delegates to.
    #[serde(default)]
    pub config_delegate: Option<String>,
    #[serde(default)]
    pub is_experiment_group: Option<bool>,
    #[serde(default)]
    pub group_name: Option<String>,
}

/// `ConfigCondition` is an atomic predicate over a user field (or the environment, time, another
/// gate...) under the given `operator`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigCondition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    #[serde(default)]
    pub operator: Option<ConditionOperator>,
    #[serde(default)]
    pub target_value: serde_json::Value,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub additional_values: HashMap<String, serde_json::Value>,
    #[serde(default = "default_id_type")]
    pub id_type: String,
}

/// Possible condition types.
///
/// Types this SDK does not know deserialize as `Unsupported` and make evaluation escalate to the
/// server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    Public,
    FailGate,
    PassGate,
    IpBased,
    UaBased,
    UserField,
    EnvironmentField,
    CurrentTime,
    UserBucket,
    UnitId,
    #[serde(other)]
    Unsupported,
}

/// Possible condition operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Gt,
    Gte,
    Lt,
    Lte,
    VersionGt,
    VersionGte,
    VersionLt,
    VersionLte,
    VersionEq,
    VersionNeq,
    /// Value is one of the target values. Strings compare case-insensitively.
    Any,
    /// Value is none of the target values. Strings compare case-insensitively.
    #[serde(rename = "none")]
    NotAny,
    AnyCaseSensitive,
    NoneCaseSensitive,
    StrStartsWithAny,
    StrEndsWithAny,
    StrContainsAny,
    StrContainsNone,
    /// Case-insensitive regex match.
    StrMatches,
    Eq,
    Neq,
    Before,
    After,
    On,
    InSegmentList,
    NotInSegmentList,
    #[serde(other)]
    Unsupported,
}

/// Descriptor of one ID list as returned by `get_id_lists`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdListDescriptor {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub creation_time: i64,
    #[serde(default, rename = "fileID")]
    pub file_id: Option<String>,
}

fn default_id_type() -> String {
    "userID".to_owned()
}
