use std::{collections::HashMap, sync::Arc};

use chrono::Utc;

use crate::{
    spec::{ConfigSpec, SpecSnapshot},
    spec_store::SpecStore,
    StatsigUser,
};

use super::{
    eval_spec, EvalInput, EvaluationDetails, EvaluationReason, EvaluationResult, FieldResolvers,
    LocalOverrides,
};

pub struct EvaluatorConfig {
    pub spec_store: Arc<SpecStore>,
    pub overrides: Arc<LocalOverrides>,
    pub resolvers: FieldResolvers,
}

/// Evaluator reads the current snapshot from the spec store and applies local overrides before
/// running the rule engine.
pub struct Evaluator {
    config: EvaluatorConfig,
}

#[derive(Debug, Clone, Copy)]
enum SpecKind {
    Gate,
    Config,
    Layer,
}

impl Evaluator {
    pub fn new(config: EvaluatorConfig) -> Evaluator {
        Evaluator { config }
    }

    pub fn check_gate(&self, user: &StatsigUser, gate_name: &str) -> EvaluationResult {
        if let Some(value) = self.config.overrides.gate(gate_name, user) {
            return EvaluationResult::local_override(value, serde_json::Value::Bool(value));
        }
        self.evaluate(user, gate_name, SpecKind::Gate)
    }

    /// Evaluate a dynamic config or experiment.
    pub fn get_config(&self, user: &StatsigUser, config_name: &str) -> EvaluationResult {
        if let Some(value) = self.config.overrides.config(config_name, user) {
            return EvaluationResult::local_override(true, value);
        }
        self.evaluate(user, config_name, SpecKind::Config)
    }

    pub fn get_layer(&self, user: &StatsigUser, layer_name: &str) -> EvaluationResult {
        if let Some(value) = self.config.overrides.layer(layer_name, user) {
            return EvaluationResult::local_override(true, value);
        }
        self.evaluate(user, layer_name, SpecKind::Layer)
    }

    /// Name of the layer an experiment is allocated in, if any.
    pub fn get_experiment_layer(&self, experiment_name: &str) -> Option<String> {
        self.config
            .spec_store
            .snapshot()
            .experiment_to_layer
            .get(experiment_name)
            .cloned()
    }

    fn evaluate(&self, user: &StatsigUser, name: &str, kind: SpecKind) -> EvaluationResult {
        let snapshot = self.config.spec_store.snapshot();
        let Some(spec) = lookup(&snapshot, name, kind) else {
            log::debug!(target: "statsig", name; "spec not found");
            return unrecognized(&snapshot);
        };

        let id_lists: Arc<HashMap<_, _>> = self.config.spec_store.id_lists();
        let input = EvalInput {
            snapshot: &snapshot,
            id_lists: &id_lists,
            resolvers: &self.config.resolvers,
            now: Utc::now(),
        };
        eval_spec(&input, user, spec)
    }
}

fn lookup<'a>(snapshot: &'a SpecSnapshot, name: &str, kind: SpecKind) -> Option<&'a ConfigSpec> {
    match kind {
        SpecKind::Gate => snapshot.gates.get(name),
        SpecKind::Config => snapshot.configs.get(name),
        SpecKind::Layer => snapshot.layers.get(name),
    }
}

fn unrecognized(snapshot: &SpecSnapshot) -> EvaluationResult {
    let reason = if snapshot.is_initialized() {
        EvaluationReason::Unrecognized
    } else {
        EvaluationReason::Uninitialized
    };
    let mut result = EvaluationResult::unrecognized(reason);
    result.details = EvaluationDetails {
        config_sync_time: snapshot.last_sync_time,
        init_time: snapshot.fetched_at.timestamp_millis(),
        ..result.details
    };
    result
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        eval::{EvaluationOutcome, EvaluationReason, FieldResolvers, LocalOverrides},
        network::Network,
        spec::{DownloadConfigSpecsResponse, SpecSnapshot},
        spec_store::{SpecStore, SpecStoreConfig},
        test_utils::{fixture, FakeNetwork},
        StatsigMetadata, StatsigUser,
    };

    use super::{Evaluator, EvaluatorConfig};

    fn evaluator(loaded: bool) -> (Evaluator, Arc<LocalOverrides>) {
        let network: Arc<dyn Network> = Arc::new(FakeNetwork::new());
        let spec_store = Arc::new(SpecStore::new(
            SpecStoreConfig::default(),
            network,
            None,
            StatsigMetadata::new("rust-server", "test"),
        ));
        if loaded {
            let response: DownloadConfigSpecsResponse =
                serde_json::from_value(fixture("download_config_specs.json")).unwrap();
            spec_store.set_snapshot(Arc::new(SpecSnapshot::from_response(
                response,
                EvaluationReason::Network,
            )));
        }
        let overrides = Arc::new(LocalOverrides::new());
        let evaluator = Evaluator::new(EvaluatorConfig {
            spec_store,
            overrides: overrides.clone(),
            resolvers: FieldResolvers::default(),
        });
        (evaluator, overrides)
    }

    #[test]
    fn always_on_gate_passes_for_any_user() {
        let (evaluator, _) = evaluator(true);

        for user_id in ["a", "b", "c", ""] {
            let user = StatsigUser::with_user_id(user_id);
            let result = evaluator.check_gate(&user, "always_on_gate");
            assert!(result.bool_value);
            assert_eq!(result.rule_id, "6N6Z8ODekNYZ7F8gFdoLP5");
            assert_eq!(result.details.reason, EvaluationReason::Network);
        }
    }

    #[test]
    fn nested_gate_records_secondary_exposure() {
        let (evaluator, _) = evaluator(true);
        let user = StatsigUser::with_user_id("u")
            .email("jane@statsig.com")
            .country("US");

        let result = evaluator.check_gate(&user, "nested_employee_gate");

        assert!(result.bool_value);
        assert_eq!(result.secondary_exposures.len(), 1);
        assert_eq!(result.secondary_exposures[0].gate, "employee_email_gate");
        assert_eq!(result.secondary_exposures[0].gate_value, "true");
    }

    #[test]
    fn missing_specs_are_unrecognized() {
        let (loaded, _) = evaluator(true);
        let user = StatsigUser::with_user_id("u");

        let result = loaded.check_gate(&user, "no_such_gate");

        assert!(!result.bool_value);
        assert_eq!(result.outcome, EvaluationOutcome::Unrecognized);
        assert_eq!(result.details.reason, EvaluationReason::Unrecognized);

        let (empty, _) = evaluator(false);
        assert_eq!(
            empty.check_gate(&user, "always_on_gate").details.reason,
            EvaluationReason::Uninitialized
        );
    }

    #[test]
    fn overrides_take_precedence() {
        let (evaluator, overrides) = evaluator(true);
        let user = StatsigUser::with_user_id("u");

        overrides.override_gate("always_on_gate", false, Some("u"));
        overrides.override_config("test_config", serde_json::json!({"number": 1}), None);

        let gate = evaluator.check_gate(&user, "always_on_gate");
        assert!(!gate.bool_value);
        assert_eq!(gate.details.reason, EvaluationReason::LocalOverride);
        assert!(evaluator
            .check_gate(&StatsigUser::with_user_id("other"), "always_on_gate")
            .bool_value);
        assert_eq!(
            evaluator.get_config(&user, "test_config").json_value["number"],
            1
        );
    }

    #[test]
    fn layer_delegates_to_allocated_experiment() {
        let (evaluator, _) = evaluator(true);
        let user = StatsigUser::with_user_id("u");

        let result = evaluator.get_layer(&user, "sample_layer");

        assert_eq!(result.config_delegate.as_deref(), Some("sample_experiment"));
        assert_eq!(result.explicit_parameters, vec!["button_color".to_owned()]);
        assert_eq!(
            evaluator.get_experiment_layer("sample_experiment").as_deref(),
            Some("sample_layer")
        );
    }
}
