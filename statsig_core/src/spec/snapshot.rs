use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::eval::EvaluationReason;

use super::{ConfigSpec, DownloadConfigSpecsResponse, TryParse};

/// Immutable, compiled ruleset. A snapshot is never mutated after it is published to the spec
/// store; updates build a new one and swap it in.
#[derive(Debug)]
pub struct SpecSnapshot {
    pub gates: HashMap<String, ConfigSpec>,
    pub configs: HashMap<String, ConfigSpec>,
    pub layers: HashMap<String, ConfigSpec>,
    /// Experiment name to the layer it is allocated in.
    pub experiment_to_layer: HashMap<String, String>,
    /// `time` of the ruleset, used as `sinceTime` for the next sync.
    pub last_sync_time: i64,
    /// Where this ruleset came from.
    pub source: EvaluationReason,
    /// When the SDK built this snapshot.
    pub fetched_at: DateTime<Utc>,
}

impl SpecSnapshot {
    /// Snapshot served before any ruleset was loaded.
    pub fn uninitialized() -> SpecSnapshot {
        SpecSnapshot {
            gates: HashMap::new(),
            configs: HashMap::new(),
            layers: HashMap::new(),
            experiment_to_layer: HashMap::new(),
            last_sync_time: 0,
            source: EvaluationReason::Uninitialized,
            fetched_at: Utc::now(),
        }
    }

    /// Compile a server response. Entries that failed to parse are logged and dropped; the rest
    /// of the ruleset is still served.
    pub fn from_response(
        response: DownloadConfigSpecsResponse,
        source: EvaluationReason,
    ) -> SpecSnapshot {
        let experiment_to_layer = response
            .layers
            .iter()
            .flat_map(|(layer, experiments)| {
                experiments
                    .iter()
                    .map(move |experiment| (experiment.clone(), layer.clone()))
            })
            .collect();

        SpecSnapshot {
            gates: compile_specs("feature_gates", response.feature_gates),
            configs: compile_specs("dynamic_configs", response.dynamic_configs),
            layers: compile_specs("layer_configs", response.layer_configs),
            experiment_to_layer,
            last_sync_time: response.time,
            source,
            fetched_at: Utc::now(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.source != EvaluationReason::Uninitialized
    }
}

fn compile_specs(section: &str, specs: Vec<TryParse<ConfigSpec>>) -> HashMap<String, ConfigSpec> {
    specs
        .into_iter()
        .filter_map(|spec| match spec {
            TryParse::Parsed(spec) => Some((spec.name.clone(), spec)),
            TryParse::ParseFailed(json) => {
                let name = json.get("name").and_then(|n| n.as_str()).unwrap_or("<unknown>");
                log::warn!(target: "statsig", section, name; "failed to parse spec, dropping it");
                None
            }
        })
        .collect()
}
