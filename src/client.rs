use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};

use serde_json::json;
use statsig_core::{
    eval::{EvaluationResult, Evaluator, EvaluatorConfig, LocalOverrides},
    events::{EventLogger, EventValue, StatsigEvent},
    network::{HttpNetwork, HttpNetworkConfig, Network, RequestOptions},
    spec_store::SpecStore,
    Error, Result, StatsigMetadata, StatsigUser,
};

use crate::{DynamicConfig, Layer, StatsigOptions, SDK_TYPE, SDK_VERSION};

const CREATED: u8 = 0;
const INITIALIZED: u8 = 1;
const SHUT_DOWN: u8 = 2;

/// A Statsig server SDK instance.
///
/// Create it with [`Statsig::new`], then call [`Statsig::initialize`] once before evaluating
/// anything. Evaluation calls made before initialization (or after [`Statsig::shutdown`]) return
/// [`Error::Uninitialized`].
///
/// Evaluations log exposure events automatically. Events are delivered in the background and on
/// shutdown.
///
/// # Examples
/// ```no_run
/// # async fn test() -> statsig::Result<()> {
/// use statsig::{Statsig, StatsigOptions, StatsigUser};
///
/// let statsig = Statsig::new("secret-key", StatsigOptions::new())?;
/// statsig.initialize().await?;
///
/// let user = StatsigUser::with_user_id("a-user");
/// if statsig.check_gate(&user, "new_checkout").await? {
///     // ...
/// }
/// statsig.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Statsig {
    options: StatsigOptions,
    metadata: StatsigMetadata,
    network: Arc<dyn Network>,
    spec_store: Arc<SpecStore>,
    overrides: Arc<LocalOverrides>,
    evaluator: Evaluator,
    logger: Arc<EventLogger>,
    state: AtomicU8,
}

impl Statsig {
    /// # Errors
    ///
    /// - [`Error::InvalidSecretKey`] if `secret_key` is not a server secret (skipped in local mode).
    /// - [`Error::InvalidBaseUrl`] if the API URL option is not a valid URL.
    pub fn new(secret_key: impl Into<String>, options: StatsigOptions) -> Result<Statsig> {
        let secret_key = secret_key.into();
        if !options.local_mode && !secret_key.starts_with("secret-") {
            return Err(Error::InvalidSecretKey);
        }

        let metadata = StatsigMetadata::new(SDK_TYPE, SDK_VERSION);
        let network: Arc<dyn Network> = match &options.network {
            Some(network) => network.clone(),
            None => Arc::new(HttpNetwork::new(HttpNetworkConfig {
                api_url: options.api_url.clone(),
                secret_key,
                metadata: metadata.clone(),
            })?),
        };

        let spec_store = Arc::new(SpecStore::new(
            options.spec_store_config(),
            network.clone(),
            options.data_store.clone(),
            metadata.clone(),
        ));
        let overrides = Arc::new(LocalOverrides::new());
        let evaluator = Evaluator::new(EvaluatorConfig {
            spec_store: spec_store.clone(),
            overrides: overrides.clone(),
            resolvers: options.resolvers.clone(),
        });
        let logger = Arc::new(EventLogger::new(
            options.event_logger_config(),
            network.clone(),
            metadata.clone(),
        ));

        Ok(Statsig {
            options,
            metadata,
            network,
            spec_store,
            overrides,
            evaluator,
            logger,
            state: AtomicU8::new(CREATED),
        })
    }

    /// Load the first ruleset and start background sync and event delivery. Must be called
    /// within a tokio runtime.
    ///
    /// Transient network failures do not fail initialization: the SDK serves defaults until a
    /// later sync succeeds.
    ///
    /// # Errors
    ///
    /// - [`Error::Unauthorized`] if the server rejected the secret key.
    /// - [`Error::Uninitialized`] if the SDK was shut down already.
    pub async fn initialize(&self) -> Result<()> {
        if self.state.load(Ordering::Acquire) == SHUT_DOWN {
            return Err(Error::Uninitialized);
        }
        self.spec_store.initialize().await?;
        self.logger.start();
        self.state.store(INITIALIZED, Ordering::Release);
        log::debug!(target: "statsig",
            sdk_type = self.metadata.sdk_type.as_str(),
            sdk_version = self.metadata.sdk_version.as_str(),
            source = self.spec_store.snapshot().source.as_str();
            "statsig initialized");
        Ok(())
    }

    /// Evaluate a feature gate and log its exposure.
    ///
    /// Rules this SDK cannot evaluate locally are sent to the server.
    pub async fn check_gate(&self, user: &StatsigUser, gate_name: &str) -> Result<bool> {
        let user = self.prepare_user(user)?;
        let result = self.evaluator.check_gate(&user, gate_name);
        if result.is_fetch_from_server() {
            return Ok(self.check_gate_on_server(&user, gate_name).await);
        }
        self.logger
            .enqueue(StatsigEvent::gate_exposure(&user, gate_name, &result));
        Ok(result.bool_value)
    }

    /// Like [`Statsig::check_gate`], but never waits for the network. Rules that need the server
    /// evaluate as `false`.
    pub fn check_gate_sync(&self, user: &StatsigUser, gate_name: &str) -> Result<bool> {
        let user = self.prepare_user(user)?;
        let result = self.evaluator.check_gate(&user, gate_name);
        if result.is_fetch_from_server() {
            log::debug!(target: "statsig", gate = gate_name; "gate needs server evaluation, returning default");
            return Ok(false);
        }
        self.logger
            .enqueue(StatsigEvent::gate_exposure(&user, gate_name, &result));
        Ok(result.bool_value)
    }

    /// Evaluate a dynamic config and log its exposure.
    pub async fn get_config(&self, user: &StatsigUser, config_name: &str) -> Result<DynamicConfig> {
        let user = self.prepare_user(user)?;
        let result = self.evaluator.get_config(&user, config_name);
        if result.is_fetch_from_server() {
            return Ok(self.get_config_on_server(&user, config_name).await);
        }
        self.logger
            .enqueue(StatsigEvent::config_exposure(&user, config_name, &result));
        Ok(DynamicConfig::from_result(config_name, &result))
    }

    /// Like [`Statsig::get_config`], but never waits for the network. Rules that need the server
    /// produce an empty config.
    pub fn get_config_sync(&self, user: &StatsigUser, config_name: &str) -> Result<DynamicConfig> {
        let user = self.prepare_user(user)?;
        let result = self.evaluator.get_config(&user, config_name);
        if result.is_fetch_from_server() {
            return Ok(DynamicConfig::from_result(config_name, &result));
        }
        self.logger
            .enqueue(StatsigEvent::config_exposure(&user, config_name, &result));
        Ok(DynamicConfig::from_result(config_name, &result))
    }

    /// Experiments are dynamic configs with experiment groups.
    pub async fn get_experiment(
        &self,
        user: &StatsigUser,
        experiment_name: &str,
    ) -> Result<DynamicConfig> {
        self.get_config(user, experiment_name).await
    }

    pub fn get_experiment_sync(
        &self,
        user: &StatsigUser,
        experiment_name: &str,
    ) -> Result<DynamicConfig> {
        self.get_config_sync(user, experiment_name)
    }

    /// Evaluate a layer. Exposures are logged when parameters are read from the returned
    /// [`Layer`].
    pub fn get_layer(&self, user: &StatsigUser, layer_name: &str) -> Result<Layer> {
        let user = self.prepare_user(user)?;
        let result = self.evaluator.get_layer(&user, layer_name);
        Ok(Layer::new(layer_name, user, result, self.logger.clone()))
    }

    /// Log a custom event.
    pub fn log_event(
        &self,
        user: &StatsigUser,
        event_name: &str,
        value: Option<EventValue>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<()> {
        let user = self.prepare_user(user)?;
        if event_name.is_empty() {
            log::warn!(target: "statsig", "event name is empty, dropping event");
            return Ok(());
        }
        self.logger
            .enqueue(StatsigEvent::custom(&user, event_name, value, metadata));
        Ok(())
    }

    /// Force `gate_name` to `value`, for every user or only for `user_id`.
    pub fn override_gate(&self, gate_name: &str, value: bool, user_id: Option<&str>) {
        self.overrides.override_gate(gate_name, value, user_id);
    }

    /// Force the value of a dynamic config or experiment.
    pub fn override_config(&self, config_name: &str, value: serde_json::Value, user_id: Option<&str>) {
        self.overrides.override_config(config_name, value, user_id);
    }

    pub fn override_layer(&self, layer_name: &str, value: serde_json::Value, user_id: Option<&str>) {
        self.overrides.override_layer(layer_name, value, user_id);
    }

    /// Remove every override.
    pub fn remove_overrides(&self) {
        self.overrides.remove_all();
    }

    /// Direct access to local overrides, e.g. to remove a single one.
    pub fn overrides(&self) -> &LocalOverrides {
        &self.overrides
    }

    /// Send queued events now.
    pub async fn flush(&self) {
        self.logger.flush().await;
    }

    /// Stop background work and deliver queued events. The instance cannot be used afterwards.
    pub async fn shutdown(&self) {
        if self.state.swap(SHUT_DOWN, Ordering::AcqRel) == SHUT_DOWN {
            return;
        }
        self.logger.shutdown().await;
        self.spec_store.shutdown().await;
        log::debug!(target: "statsig", "statsig shut down");
    }

    /// Validate `user` and apply the environment tier.
    fn prepare_user(&self, user: &StatsigUser) -> Result<StatsigUser> {
        if self.state.load(Ordering::Acquire) != INITIALIZED {
            return Err(Error::Uninitialized);
        }
        if user.user_id.is_empty() && user.custom_ids.is_empty() {
            return Err(Error::InvalidUser("a user ID or at least one custom ID is required"));
        }

        let mut user = user.clone();
        if let Some(tier) = &self.options.environment_tier {
            if user.statsig_environment.is_empty() {
                user.statsig_environment
                    .insert("tier".to_owned(), tier.clone());
            }
        }
        Ok(user)
    }

    async fn check_gate_on_server(&self, user: &StatsigUser, gate_name: &str) -> bool {
        let body = json!({
            "user": user.to_evaluation_json(),
            "gateName": gate_name,
            "statsigMetadata": self.metadata,
        });
        match self.post_fallback("check_gate", body).await {
            Some(response) => response
                .get("value")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false),
            None => false,
        }
    }

    async fn get_config_on_server(&self, user: &StatsigUser, config_name: &str) -> DynamicConfig {
        let mut result = EvaluationResult::unrecognized(self.spec_store.snapshot().source);
        let body = json!({
            "user": user.to_evaluation_json(),
            "configName": config_name,
            "statsigMetadata": self.metadata,
        });
        if let Some(response) = self.post_fallback("get_config", body).await {
            if let Some(value) = response.get("value").filter(|v| v.is_object()) {
                result.json_value = value.clone();
            }
            if let Some(rule_id) = response.get("rule_id").and_then(serde_json::Value::as_str) {
                result.rule_id = rule_id.to_owned();
            }
            result.group_name = response
                .get("group_name")
                .and_then(serde_json::Value::as_str)
                .map(str::to_owned);
        }
        DynamicConfig::from_result(config_name, &result)
    }

    /// Evaluate on the server. The server logs exposures for these requests itself.
    async fn post_fallback(&self, endpoint: &str, body: serde_json::Value) -> Option<serde_json::Value> {
        if self.options.local_mode {
            return None;
        }
        match self
            .network
            .post(endpoint, body, RequestOptions::default())
            .await
        {
            Ok(response) => Some(response),
            Err(err) => {
                log::warn!(target: "statsig", endpoint; "server evaluation failed, returning default: {err}");
                None
            }
        }
    }
}
