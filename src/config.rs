use std::{sync::Arc, time::Duration};

use statsig_core::{
    data_store::DataStore,
    eval::{FieldResolvers, IpCountryLookup, UserAgentParser},
    events::EventLoggerConfig,
    network::{Network, DEFAULT_API_URL},
    spec_store::SpecStoreConfig,
};

/// Options for [`Statsig`](crate::Statsig).
///
/// # Examples
/// ```
/// # use std::time::Duration;
/// # use statsig::StatsigOptions;
/// let options = StatsigOptions::new()
///     .environment_tier("staging")
///     .init_timeout(Duration::from_secs(3));
/// ```
#[derive(Clone)]
pub struct StatsigOptions {
    pub(crate) api_url: String,
    pub(crate) local_mode: bool,
    pub(crate) rulesets_sync_interval: Duration,
    pub(crate) id_lists_sync_interval: Duration,
    pub(crate) logger_max_queue_length: usize,
    pub(crate) logger_flush_interval: Duration,
    pub(crate) init_timeout: Option<Duration>,
    pub(crate) environment_tier: Option<String>,
    pub(crate) bootstrap_values: Option<String>,
    pub(crate) data_store: Option<Arc<dyn DataStore>>,
    pub(crate) network: Option<Arc<dyn Network>>,
    pub(crate) resolvers: FieldResolvers,
}

impl StatsigOptions {
    /// Default base URL for API calls.
    pub const DEFAULT_API_URL: &'static str = DEFAULT_API_URL;

    /// Create options with default settings.
    pub fn new() -> StatsigOptions {
        StatsigOptions::default()
    }

    /// Override base URL for API calls. Clients should use the default setting in most cases.
    pub fn api_url(mut self, api_url: impl Into<String>) -> StatsigOptions {
        self.api_url = api_url.into();
        self
    }

    /// Never talk to the network. Gates evaluate against bootstrap values and overrides only, and
    /// events are discarded.
    pub fn local_mode(mut self, local_mode: bool) -> StatsigOptions {
        self.local_mode = local_mode;
        self
    }

    /// Interval of ruleset polling. Zero disables it.
    pub fn rulesets_sync_interval(mut self, interval: Duration) -> StatsigOptions {
        self.rulesets_sync_interval = interval;
        self
    }

    /// Interval of ID-list polling. Zero disables it.
    pub fn id_lists_sync_interval(mut self, interval: Duration) -> StatsigOptions {
        self.id_lists_sync_interval = interval;
        self
    }

    pub fn logger_max_queue_length(mut self, max_queue_length: usize) -> StatsigOptions {
        self.logger_max_queue_length = max_queue_length;
        self
    }

    pub fn logger_flush_interval(mut self, interval: Duration) -> StatsigOptions {
        self.logger_flush_interval = interval;
        self
    }

    /// Bound the wait for the first ruleset during [`Statsig::initialize`](crate::Statsig::initialize).
    pub fn init_timeout(mut self, timeout: Duration) -> StatsigOptions {
        self.init_timeout = Some(timeout);
        self
    }

    /// Environment tier (`production`, `staging`, `development`...) applied to users that do not
    /// set an environment themselves.
    pub fn environment_tier(mut self, tier: impl Into<String>) -> StatsigOptions {
        self.environment_tier = Some(tier.into());
        self
    }

    /// A `download_config_specs` response to serve until the first network sync.
    pub fn bootstrap_values(mut self, json: impl Into<String>) -> StatsigOptions {
        self.bootstrap_values = Some(json.into());
        self
    }

    pub fn data_store(mut self, data_store: Arc<dyn DataStore>) -> StatsigOptions {
        self.data_store = Some(data_store);
        self
    }

    /// Replace the HTTP transport.
    pub fn network(mut self, network: Arc<dyn Network>) -> StatsigOptions {
        self.network = Some(network);
        self
    }

    pub fn ip_country_lookup(mut self, lookup: impl IpCountryLookup + 'static) -> StatsigOptions {
        self.resolvers.ip_country = Some(Arc::new(lookup));
        self
    }

    pub fn user_agent_parser(mut self, parser: impl UserAgentParser + 'static) -> StatsigOptions {
        self.resolvers.user_agent = Some(Arc::new(parser));
        self
    }

    pub(crate) fn spec_store_config(&self) -> SpecStoreConfig {
        let defaults = SpecStoreConfig::default();
        SpecStoreConfig {
            rulesets_sync: defaults
                .rulesets_sync
                .with_interval(self.rulesets_sync_interval),
            id_lists_sync: defaults
                .id_lists_sync
                .with_interval(self.id_lists_sync_interval),
            init_timeout: self.init_timeout,
            local_mode: self.local_mode,
            bootstrap_values: self.bootstrap_values.clone(),
            ..defaults
        }
    }

    pub(crate) fn event_logger_config(&self) -> EventLoggerConfig {
        EventLoggerConfig {
            max_queue_length: self.logger_max_queue_length,
            flush_interval: self.logger_flush_interval,
            local_mode: self.local_mode,
            ..EventLoggerConfig::default()
        }
    }
}

impl Default for StatsigOptions {
    fn default() -> StatsigOptions {
        StatsigOptions {
            api_url: StatsigOptions::DEFAULT_API_URL.to_owned(),
            local_mode: false,
            rulesets_sync_interval: SpecStoreConfig::DEFAULT_RULESETS_SYNC_INTERVAL,
            id_lists_sync_interval: SpecStoreConfig::DEFAULT_ID_LISTS_SYNC_INTERVAL,
            logger_max_queue_length: EventLoggerConfig::DEFAULT_MAX_QUEUE_LENGTH,
            logger_flush_interval: EventLoggerConfig::DEFAULT_FLUSH_INTERVAL,
            init_timeout: None,
            environment_tier: None,
            bootstrap_values: None,
            data_store: None,
            network: None,
            resolvers: FieldResolvers::default(),
        }
    }
}
