use std::{cell::OnceCell, collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};

use crate::{
    id_list::IdList,
    sharder::{Sha256Sharder, Sharder},
    spec::{ConditionType, ConfigCondition, ConfigRule, ConfigSpec, SpecSnapshot},
    DynamicValue, StatsigUser,
};

use super::{
    conditions::FetchFromServer,
    resolvers::{FieldResolvers, ParsedUserAgent},
    EvaluationDetails, EvaluationOutcome, EvaluationReason, EvaluationResult, SecondaryExposure,
};

/// Nested gate evaluation deeper than this is treated as a cycle.
const MAX_GATE_DEPTH: usize = 64;

const RULE_BUCKETS: u64 = 10_000;
const USER_BUCKETS: u64 = 1_000;

/// Inputs shared by one evaluation call.
pub struct EvalInput<'a> {
    pub snapshot: &'a SpecSnapshot,
    pub id_lists: &'a HashMap<String, Arc<IdList>>,
    pub resolvers: &'a FieldResolvers,
    pub now: DateTime<Utc>,
}

/// Evaluate `spec` for `user`. Never fails: unsupported conditions produce a
/// [`EvaluationOutcome::FetchFromServer`] result.
pub fn eval_spec(input: &EvalInput<'_>, user: &StatsigUser, spec: &ConfigSpec) -> EvaluationResult {
    let mut ctx = EvalContext {
        input,
        user,
        gate_stack: vec![spec],
        user_agent: OnceCell::new(),
    };

    let mut result = ctx
        .eval(spec)
        .unwrap_or_else(|FetchFromServer| EvaluationResult::fetch_from_server());
    result.details = EvaluationDetails {
        reason: input.snapshot.source,
        config_sync_time: input.snapshot.last_sync_time,
        init_time: input.snapshot.fetched_at.timestamp_millis(),
        server_time: input.now.timestamp_millis(),
    };

    log::trace!(target: "statsig",
        name = spec.name.as_str(),
        rule_id = result.rule_id.as_str(),
        value = result.bool_value;
        "evaluated spec");

    result
}

struct EvalContext<'a, 'i> {
    input: &'i EvalInput<'a>,
    user: &'a StatsigUser,
    /// Gates currently being evaluated, outermost first.
    gate_stack: Vec<&'a ConfigSpec>,
    /// User agent is parsed at most once per evaluation call.
    user_agent: OnceCell<Option<ParsedUserAgent>>,
}

impl<'a, 'i> EvalContext<'a, 'i> {
    fn eval(&mut self, spec: &'a ConfigSpec) -> Result<EvaluationResult, FetchFromServer> {
        if !spec.enabled {
            return Ok(default_result(
                spec,
                EvaluationResult::DEFAULT_RULE_ID,
                Vec::new(),
            ));
        }

        let mut exposures = Vec::new();
        for rule in &spec.rules {
            if !self.eval_conditions(rule, &mut exposures)? {
                continue;
            }

            if let Some(result) = self.eval_delegate(rule, &exposures)? {
                return Ok(result);
            }

            if !self.eval_pass_percentage(spec, rule) {
                // Conditions matched but the unit fell outside the rollout: keep the rule ID so
                // exposures show which rule was hit.
                return Ok(default_result(spec, &rule.id, exposures));
            }

            return Ok(EvaluationResult {
                outcome: EvaluationOutcome::Pass,
                bool_value: true,
                json_value: rule.return_value.clone(),
                rule_id: rule.id.clone(),
                group_name: rule.group_name.clone(),
                is_experiment_group: rule.is_experiment_group.unwrap_or(false),
                undelegated_secondary_exposures: exposures.clone(),
                secondary_exposures: exposures,
                config_delegate: None,
                explicit_parameters: Vec::new(),
                details: EvaluationDetails::new(self.input.snapshot.source),
            });
        }

        Ok(default_result(
            spec,
            EvaluationResult::DEFAULT_RULE_ID,
            exposures,
        ))
    }

    /// All conditions are evaluated, even after one fails, so that secondary exposures of every
    /// referenced gate are collected.
    fn eval_conditions(
        &mut self,
        rule: &'a ConfigRule,
        exposures: &mut Vec<SecondaryExposure>,
    ) -> Result<bool, FetchFromServer> {
        let mut pass = true;
        for condition in &rule.conditions {
            if !self.eval_condition(condition, exposures)? {
                pass = false;
            }
        }
        Ok(pass)
    }

    fn eval_condition(
        &mut self,
        condition: &'a ConfigCondition,
        exposures: &mut Vec<SecondaryExposure>,
    ) -> Result<bool, FetchFromServer> {
        let field = condition.field.as_deref().unwrap_or_default();
        let value = match condition.condition_type {
            ConditionType::Public => return Ok(true),
            ConditionType::PassGate | ConditionType::FailGate => {
                // A cyclic reference fails the condition for both types.
                let Some(pass) = self.eval_nested_gate(condition, exposures)? else {
                    return Ok(false);
                };
                return Ok(pass == (condition.condition_type == ConditionType::PassGate));
            }
            ConditionType::IpBased => self.ip_based_value(field),
            ConditionType::UaBased => self.ua_based_value(field),
            ConditionType::UserField => user_field(self.user, field),
            ConditionType::EnvironmentField => {
                lookup_ignore_case(&self.user.statsig_environment, field)
                    .map(|value| DynamicValue::String(value.clone()))
            }
            ConditionType::CurrentTime => Some(self.input.now.timestamp_millis().into()),
            ConditionType::UserBucket => {
                let salt = condition
                    .additional_values
                    .get("salt")
                    .and_then(|salt| salt.as_str())
                    .unwrap_or_default();
                let unit_id = self.user.unit_id(&condition.id_type).unwrap_or_default();
                let bucket = Sha256Sharder.get_shard(format!("{salt}.{unit_id}"), USER_BUCKETS);
                Some((bucket as i64).into())
            }
            ConditionType::UnitId => self.user.unit_id(&condition.id_type).map(Into::into),
            ConditionType::Unsupported => return Err(FetchFromServer),
        };

        let Some(operator) = condition.operator else {
            return Err(FetchFromServer);
        };
        operator.eval(value.as_ref(), &condition.target_value, self.input.id_lists)
    }

    /// Returns `None` if the referenced gate is already being evaluated.
    fn eval_nested_gate(
        &mut self,
        condition: &'a ConfigCondition,
        exposures: &mut Vec<SecondaryExposure>,
    ) -> Result<Option<bool>, FetchFromServer> {
        let Some(name) = condition.target_value.as_str() else {
            return Ok(Some(false));
        };
        let snapshot = self.input.snapshot;
        let Some(gate) = snapshot.gates.get(name) else {
            exposures.push(SecondaryExposure {
                gate: name.to_owned(),
                gate_value: false.to_string(),
                rule_id: String::new(),
            });
            return Ok(Some(false));
        };

        if self.gate_stack.len() >= MAX_GATE_DEPTH
            || self.gate_stack.iter().any(|s| std::ptr::eq(*s, gate))
        {
            log::warn!(target: "statsig", gate = name; "cyclic gate dependency, evaluating as failed");
            return Ok(None);
        }

        self.gate_stack.push(gate);
        let result = self.eval(gate);
        self.gate_stack.pop();
        let result = result?;

        exposures.extend(result.secondary_exposures);
        exposures.push(SecondaryExposure {
            gate: name.to_owned(),
            gate_value: result.bool_value.to_string(),
            rule_id: result.rule_id,
        });
        Ok(Some(result.bool_value))
    }

    /// Layers: evaluate the experiment a matched rule delegates to. Returns `None` if the rule
    /// has no delegate or the delegate is not in the ruleset.
    fn eval_delegate(
        &mut self,
        rule: &'a ConfigRule,
        exposures: &[SecondaryExposure],
    ) -> Result<Option<EvaluationResult>, FetchFromServer> {
        let snapshot = self.input.snapshot;
        let Some(delegate) = rule
            .config_delegate
            .as_deref()
            .and_then(|name| snapshot.configs.get(name))
        else {
            return Ok(None);
        };

        let mut result = self.eval(delegate)?;

        let mut secondary_exposures = exposures.to_vec();
        secondary_exposures.append(&mut result.secondary_exposures);
        result.secondary_exposures = secondary_exposures;
        result.undelegated_secondary_exposures = exposures.to_vec();
        result.config_delegate = Some(delegate.name.clone());
        result.explicit_parameters = delegate.explicit_parameters.clone().unwrap_or_default();
        Ok(Some(result))
    }

    fn eval_pass_percentage(&self, spec: &ConfigSpec, rule: &ConfigRule) -> bool {
        let unit_id = self.user.unit_id(&rule.id_type).unwrap_or_default();
        let rule_salt = rule
            .salt
            .as_deref()
            .filter(|salt| !salt.is_empty())
            .unwrap_or(&rule.id);
        let bucket =
            Sha256Sharder.get_shard(format!("{}.{}.{}", spec.salt, rule_salt, unit_id), RULE_BUCKETS);
        (bucket as f64) < rule.pass_percentage * 100.0
    }

    fn ip_based_value(&self, field: &str) -> Option<DynamicValue> {
        user_field(self.user, field).or_else(|| {
            if !field.eq_ignore_ascii_case("country") {
                return None;
            }
            let ip = self.user.ip.as_deref()?;
            let lookup = self.input.resolvers.ip_country.as_ref()?;
            lookup.lookup_country(ip).map(DynamicValue::String)
        })
    }

    fn ua_based_value(&self, field: &str) -> Option<DynamicValue> {
        user_field(self.user, field).or_else(|| {
            let parsed = self.user_agent.get_or_init(|| {
                let user_agent = self.user.user_agent.as_deref()?;
                self.input.resolvers.user_agent.as_ref()?.parse(user_agent)
            });
            parsed.as_ref()?.field(field).map(DynamicValue::from)
        })
    }
}

fn default_result(
    spec: &ConfigSpec,
    rule_id: &str,
    exposures: Vec<SecondaryExposure>,
) -> EvaluationResult {
    EvaluationResult {
        outcome: EvaluationOutcome::Fail,
        bool_value: false,
        json_value: spec.default_value.clone(),
        rule_id: rule_id.to_owned(),
        group_name: None,
        is_experiment_group: false,
        undelegated_secondary_exposures: exposures.clone(),
        secondary_exposures: exposures,
        config_delegate: None,
        explicit_parameters: Vec::new(),
        details: EvaluationDetails::new(EvaluationReason::Network),
    }
}

/// Look up a user field: top-level fields first (with their common aliases), then custom, then
/// private attributes. Keys match case-insensitively.
pub(crate) fn user_field(user: &StatsigUser, field: &str) -> Option<DynamicValue> {
    let top_level = match field.to_lowercase().as_str() {
        "userid" | "user_id" => (!user.user_id.is_empty()).then(|| user.user_id.clone()),
        "email" => user.email.clone(),
        "ip" | "ipaddress" | "ip_address" => user.ip.clone(),
        "useragent" | "user_agent" => user.user_agent.clone(),
        "country" => user.country.clone(),
        "locale" => user.locale.clone(),
        "appversion" | "app_version" => user.app_version.clone(),
        _ => None,
    };
    top_level
        .map(DynamicValue::String)
        .or_else(|| lookup_ignore_case(&user.custom, field).cloned())
        .or_else(|| lookup_ignore_case(&user.private_attributes, field).cloned())
}

fn lookup_ignore_case<'m, V>(map: &'m HashMap<String, V>, key: &str) -> Option<&'m V> {
    map.get(key).or_else(|| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use chrono::Utc;
    use serde_json::json;

    use crate::{
        eval::{
            resolvers::{FieldResolvers, ParsedUserAgent},
            EvaluationOutcome, EvaluationReason,
        },
        spec::{DownloadConfigSpecsResponse, SpecSnapshot},
        StatsigUser,
    };

    use super::{eval_spec, EvalInput};

    fn snapshot(json: serde_json::Value) -> SpecSnapshot {
        let response: DownloadConfigSpecsResponse = serde_json::from_value(json).unwrap();
        SpecSnapshot::from_response(response, EvaluationReason::Network)
    }

    fn gate(name: &str, rules: serde_json::Value) -> serde_json::Value {
        json!({
            "name": name,
            "type": "feature_gate",
            "salt": format!("{name}_salt"),
            "enabled": true,
            "defaultValue": false,
            "rules": rules,
        })
    }

    fn rule(id: &str, pass_percentage: f64, conditions: serde_json::Value) -> serde_json::Value {
        json!({
            "name": id,
            "id": id,
            "passPercentage": pass_percentage,
            "returnValue": true,
            "conditions": conditions,
        })
    }

    fn check_gate(
        snapshot: &SpecSnapshot,
        resolvers: &FieldResolvers,
        user: &StatsigUser,
        name: &str,
    ) -> crate::eval::EvaluationResult {
        let id_lists = HashMap::new();
        let input = EvalInput {
            snapshot,
            id_lists: &id_lists,
            resolvers,
            now: Utc::now(),
        };
        eval_spec(&input, user, &snapshot.gates[name])
    }

    #[test]
    fn hundred_percent_always_passes_and_zero_never_does() {
        let snapshot = snapshot(json!({
            "feature_gates": [
                gate("all", json!([rule("all_rule", 100.0, json!([{"type": "public"}]))])),
                gate("none", json!([rule("none_rule", 0.0, json!([{"type": "public"}]))])),
            ]
        }));
        let resolvers = FieldResolvers::default();

        for i in 0..1000 {
            let user = StatsigUser::with_user_id(format!("user-{i}"));

            let all = check_gate(&snapshot, &resolvers, &user, "all");
            assert_eq!(all.outcome, EvaluationOutcome::Pass);
            assert_eq!(all.rule_id, "all_rule");

            let none = check_gate(&snapshot, &resolvers, &user, "none");
            assert_eq!(none.outcome, EvaluationOutcome::Fail);
            assert!(!none.bool_value);
            assert_eq!(none.rule_id, "none_rule");
        }
    }

    #[test]
    fn partial_rollout_is_deterministic() {
        let snapshot = snapshot(json!({
            "feature_gates": [gate("half", json!([rule("half_rule", 50.0, json!([{"type": "public"}]))]))]
        }));
        let resolvers = FieldResolvers::default();

        let mut passed = 0;
        for i in 0..1000 {
            let user = StatsigUser::with_user_id(format!("user-{i}"));
            let first = check_gate(&snapshot, &resolvers, &user, "half").bool_value;
            let second = check_gate(&snapshot, &resolvers, &user, "half").bool_value;
            assert_eq!(first, second);
            passed += first as usize;
        }
        assert!((400..600).contains(&passed), "passed = {passed}");
    }

    #[test]
    fn first_matching_rule_wins() {
        let snapshot = snapshot(json!({
            "feature_gates": [gate("email_gate", json!([
                rule("r1", 100.0, json!([{
                    "type": "user_field", "field": "email", "operator": "str_ends_with_any",
                    "targetValue": ["@example.com"]
                }])),
                rule("r2", 100.0, json!([{
                    "type": "user_field", "field": "email", "operator": "str_ends_with_any",
                    "targetValue": ["@statsig.com"]
                }])),
                rule("r3", 100.0, json!([{"type": "public"}])),
            ]))]
        }));
        let user = StatsigUser::with_user_id("u").email("someone@statsig.com");

        let result = check_gate(&snapshot, &FieldResolvers::default(), &user, "email_gate");

        assert_eq!(result.outcome, EvaluationOutcome::Pass);
        assert_eq!(result.rule_id, "r2");
    }

    #[test]
    fn disabled_spec_returns_default() {
        let mut disabled = gate("off", json!([rule("r", 100.0, json!([{"type": "public"}]))]));
        disabled["enabled"] = json!(false);
        let snapshot = snapshot(json!({"feature_gates": [disabled]}));

        let result = check_gate(
            &snapshot,
            &FieldResolvers::default(),
            &StatsigUser::with_user_id("u"),
            "off",
        );

        assert_eq!(result.outcome, EvaluationOutcome::Fail);
        assert_eq!(result.rule_id, "default");
        assert_eq!(result.details.reason, EvaluationReason::Network);
    }

    #[test]
    fn nested_gates_record_secondary_exposures() {
        let snapshot = snapshot(json!({
            "feature_gates": [
                gate("inner", json!([rule("inner_rule", 100.0, json!([{"type": "public"}]))])),
                gate("outer", json!([rule("outer_rule", 100.0, json!([
                    {"type": "pass_gate", "targetValue": "inner"},
                    {"type": "fail_gate", "targetValue": "missing"},
                ]))])),
            ]
        }));

        let result = check_gate(
            &snapshot,
            &FieldResolvers::default(),
            &StatsigUser::with_user_id("u"),
            "outer",
        );

        assert!(result.bool_value);
        let exposures = result
            .secondary_exposures
            .iter()
            .map(|e| (e.gate.as_str(), e.gate_value.as_str(), e.rule_id.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            exposures,
            vec![("inner", "true", "inner_rule"), ("missing", "false", "")]
        );
    }

    #[test]
    fn gate_cycles_evaluate_as_failed() {
        let snapshot = snapshot(json!({
            "feature_gates": [
                gate("a", json!([rule("a_rule", 100.0, json!([{"type": "pass_gate", "targetValue": "b"}]))])),
                gate("b", json!([rule("b_rule", 100.0, json!([{"type": "pass_gate", "targetValue": "a"}]))])),
            ]
        }));

        let result = check_gate(
            &snapshot,
            &FieldResolvers::default(),
            &StatsigUser::with_user_id("u"),
            "a",
        );

        assert_eq!(result.outcome, EvaluationOutcome::Fail);
    }

    #[test]
    fn fail_gate_into_a_cycle_fails() {
        let snapshot = snapshot(json!({
            "feature_gates": [
                gate("loop", json!([rule("loop_rule", 100.0, json!([{"type": "fail_gate", "targetValue": "loop"}]))])),
                gate("outer", json!([rule("outer_rule", 100.0, json!([{"type": "fail_gate", "targetValue": "inner"}]))])),
                gate("inner", json!([rule("inner_rule", 100.0, json!([{"type": "pass_gate", "targetValue": "outer"}]))])),
            ]
        }));
        let user = StatsigUser::with_user_id("u");

        let looped = check_gate(&snapshot, &FieldResolvers::default(), &user, "loop");
        assert_eq!(looped.outcome, EvaluationOutcome::Fail);
        assert!(!looped.bool_value);

        // `inner` fails on the cycle, which `outer` sees as an ordinary failed gate.
        let inner = check_gate(&snapshot, &FieldResolvers::default(), &user, "inner");
        assert!(!inner.bool_value);
    }

    #[test]
    fn unsupported_condition_escalates() {
        let snapshot = snapshot(json!({
            "feature_gates": [gate("new", json!([
                rule("r", 100.0, json!([{"type": "quantum_field", "operator": "eq", "targetValue": 1}]))
            ]))]
        }));

        let result = check_gate(
            &snapshot,
            &FieldResolvers::default(),
            &StatsigUser::with_user_id("u"),
            "new",
        );

        assert_eq!(result.outcome, EvaluationOutcome::FetchFromServer);
    }

    #[test]
    fn custom_and_private_attributes_are_looked_up_case_insensitively() {
        let snapshot = snapshot(json!({
            "feature_gates": [gate("plan", json!([
                rule("r", 100.0, json!([
                    {"type": "user_field", "field": "plan", "operator": "any", "targetValue": ["enterprise"]},
                    {"type": "user_field", "field": "Seats", "operator": "gte", "targetValue": 10},
                ]))
            ]))]
        }));
        let user = StatsigUser::with_user_id("u")
            .custom("Plan", "Enterprise")
            .private_attribute("seats", 12.0);

        let result = check_gate(&snapshot, &FieldResolvers::default(), &user, "plan");

        assert!(result.bool_value);
    }

    #[test]
    fn resolvers_fill_in_derived_fields() {
        let snapshot = snapshot(json!({
            "feature_gates": [gate("derived", json!([
                rule("r", 100.0, json!([
                    {"type": "ip_based", "field": "country", "operator": "any", "targetValue": ["NZ"]},
                    {"type": "ua_based", "field": "os_name", "operator": "any", "targetValue": ["iOS"]},
                    {"type": "ua_based", "field": "browser_name", "operator": "any", "targetValue": ["Safari"]},
                ]))
            ]))]
        }));
        let parses = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = parses.clone();
        let resolvers = FieldResolvers {
            ip_country: Some(Arc::new(|ip: &str| (ip == "1.2.3.4").then(|| "NZ".to_owned()))),
            user_agent: Some(Arc::new(move |_: &str| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Some(ParsedUserAgent {
                    os_name: Some("iOS".to_owned()),
                    browser_name: Some("Safari".to_owned()),
                    ..ParsedUserAgent::default()
                })
            })),
        };
        let user = StatsigUser::with_user_id("u").ip("1.2.3.4").user_agent("Mozilla/5.0");

        let result = check_gate(&snapshot, &resolvers, &user, "derived");

        assert!(result.bool_value);
        assert_eq!(parses.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn layer_delegation_splits_exposures() {
        let snapshot = snapshot(json!({
            "feature_gates": [
                gate("layer_holdout", json!([rule("holdout_rule", 100.0, json!([{"type": "public"}]))])),
                gate("exp_targeting", json!([rule("targeting_rule", 100.0, json!([{"type": "public"}]))])),
            ],
            "dynamic_configs": [{
                "name": "exp",
                "type": "dynamic_config",
                "salt": "exp_salt",
                "enabled": true,
                "defaultValue": {"color": "red", "size": 1},
                "explicitParameters": ["color"],
                "rules": [{
                    "name": "group", "id": "exp_group", "passPercentage": 100,
                    "returnValue": {"color": "blue", "size": 1},
                    "isExperimentGroup": true,
                    "conditions": [{"type": "pass_gate", "targetValue": "exp_targeting"}]
                }]
            }],
            "layer_configs": [{
                "name": "layer",
                "type": "dynamic_config",
                "salt": "layer_salt",
                "enabled": true,
                "defaultValue": {"color": "red", "size": 1},
                "rules": [{
                    "name": "alloc", "id": "alloc_rule", "passPercentage": 100,
                    "returnValue": {"color": "red", "size": 1},
                    "configDelegate": "exp",
                    "conditions": [{"type": "pass_gate", "targetValue": "layer_holdout"}]
                }]
            }]
        }));
        let id_lists = HashMap::new();
        let resolvers = FieldResolvers::default();
        let input = EvalInput {
            snapshot: &snapshot,
            id_lists: &id_lists,
            resolvers: &resolvers,
            now: Utc::now(),
        };

        let result = eval_spec(&input, &StatsigUser::with_user_id("u"), &snapshot.layers["layer"]);

        assert_eq!(result.rule_id, "exp_group");
        assert_eq!(result.json_value["color"], "blue");
        assert_eq!(result.config_delegate.as_deref(), Some("exp"));
        assert_eq!(result.explicit_parameters, vec!["color".to_owned()]);
        assert!(result.is_experiment_group);
        let gates = |exposures: &[crate::eval::SecondaryExposure]| {
            exposures.iter().map(|e| e.gate.clone()).collect::<Vec<_>>()
        };
        assert_eq!(
            gates(&result.secondary_exposures),
            vec!["layer_holdout", "exp_targeting"]
        );
        assert_eq!(gates(&result.undelegated_secondary_exposures), vec!["layer_holdout"]);
    }
}
