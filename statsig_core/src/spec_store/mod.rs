//! A thread-safe in-memory owner of the active ruleset and ID lists. [`SpecStore`] loads the
//! ruleset at startup (data store, bootstrap values or network) and keeps it fresh with background
//! sync tasks.
//!
//! Readers always receive a *snapshot*: an `Arc` to an immutable structure that is not affected by
//! further writes. Updates build new structures and swap them in.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock, Weak},
    time::Duration,
};

use serde_json::json;

use crate::{
    data_store::{DataStore, RULESETS_KEY},
    eval::EvaluationReason,
    id_list::IdList,
    network::{Network, RequestOptions},
    spec::{DownloadConfigSpecsResponse, SpecSnapshot},
    Error, Result, StatsigMetadata,
};

mod id_lists;
mod poller;

pub use poller::PollerConfig;

use poller::BackgroundSync;

/// Configuration for [`SpecStore`].
// Not implementing `Copy` as bootstrap values are not copyable.
#[derive(Debug, Clone)]
pub struct SpecStoreConfig {
    /// Ruleset polling. A zero interval disables it.
    pub rulesets_sync: PollerConfig,
    /// ID-list polling. A zero interval disables it.
    pub id_lists_sync: PollerConfig,
    /// Upper bound on the initial network fetch. `None` waits for the network.
    ///
    /// On timeout the store keeps whatever it has (possibly nothing) instead of failing.
    pub init_timeout: Option<Duration>,
    /// Never talk to the network. The store serves bootstrap values (if any).
    pub local_mode: bool,
    /// A `download_config_specs` response to start with.
    pub bootstrap_values: Option<String>,
    pub request_options: RequestOptions,
}

impl SpecStoreConfig {
    /// Default value for [`SpecStoreConfig::rulesets_sync`] interval.
    pub const DEFAULT_RULESETS_SYNC_INTERVAL: Duration = Duration::from_secs(10);
    /// Default value for [`SpecStoreConfig::id_lists_sync`] interval.
    pub const DEFAULT_ID_LISTS_SYNC_INTERVAL: Duration = Duration::from_secs(60);

    pub fn new() -> SpecStoreConfig {
        SpecStoreConfig::default()
    }
}

impl Default for SpecStoreConfig {
    fn default() -> SpecStoreConfig {
        SpecStoreConfig {
            rulesets_sync: PollerConfig::new()
                .with_interval(SpecStoreConfig::DEFAULT_RULESETS_SYNC_INTERVAL),
            id_lists_sync: PollerConfig::new()
                .with_interval(SpecStoreConfig::DEFAULT_ID_LISTS_SYNC_INTERVAL),
            init_timeout: None,
            local_mode: false,
            bootstrap_values: None,
            request_options: RequestOptions::default().with_retries(1),
        }
    }
}

pub struct SpecStore {
    config: SpecStoreConfig,
    network: Arc<dyn Network>,
    data_store: Option<Arc<dyn DataStore>>,
    metadata: StatsigMetadata,

    snapshot: RwLock<Arc<SpecSnapshot>>,
    id_lists: RwLock<Arc<HashMap<String, Arc<IdList>>>>,
    /// Serializes ID-list sync cycles, so only one cycle mutates lists at a time.
    id_lists_sync: tokio::sync::Mutex<()>,

    background: Mutex<Option<BackgroundSync>>,
}

impl SpecStore {
    pub fn new(
        config: SpecStoreConfig,
        network: Arc<dyn Network>,
        data_store: Option<Arc<dyn DataStore>>,
        metadata: StatsigMetadata,
    ) -> SpecStore {
        SpecStore {
            config,
            network,
            data_store,
            metadata,
            snapshot: RwLock::new(Arc::new(SpecSnapshot::uninitialized())),
            id_lists: RwLock::new(Arc::new(HashMap::new())),
            id_lists_sync: tokio::sync::Mutex::new(()),
            background: Mutex::new(None),
        }
    }

    /// Get the currently active ruleset.
    pub fn snapshot(&self) -> Arc<SpecSnapshot> {
        // read() only fails if the lock is poisoned (writer panicked while holding the lock),
        // which should never happen.
        self.snapshot
            .read()
            .expect("thread holding snapshot lock should not panic")
            .clone()
    }

    /// Get the currently active ID lists.
    pub fn id_lists(&self) -> Arc<HashMap<String, Arc<IdList>>> {
        self.id_lists
            .read()
            .expect("thread holding id lists lock should not panic")
            .clone()
    }

    /// Replace the active ruleset.
    pub fn set_snapshot(&self, snapshot: Arc<SpecSnapshot>) {
        let mut slot = self
            .snapshot
            .write()
            .expect("thread holding snapshot lock should not panic");
        *slot = snapshot;
    }

    fn set_id_lists(&self, id_lists: HashMap<String, Arc<IdList>>) {
        let mut slot = self
            .id_lists
            .write()
            .expect("thread holding id lists lock should not panic");
        *slot = Arc::new(id_lists);
    }

    /// Load the first ruleset and start background sync.
    ///
    /// Sources are tried in order: data store, bootstrap values, network. Transient failures
    /// leave the store uninitialized but are not returned.
    ///
    /// # Errors
    ///
    /// - [`Error::Unauthorized`] if the server rejected the secret key.
    /// - [`Error::InvalidBaseUrl`] if the API URL is not valid.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        let mut loaded = false;

        if let Some(data_store) = &self.data_store {
            if let Err(err) = data_store.init().await {
                log::warn!(target: "statsig", "failed to initialize data store: {err}");
            }
            match self.sync_from_data_store().await {
                Ok(updated) => loaded = updated,
                Err(err) => log::warn!(target: "statsig", "failed to load ruleset from data store: {err}"),
            }
        }

        if !loaded {
            if let Some(bootstrap) = &self.config.bootstrap_values {
                match self.apply_json(bootstrap, EvaluationReason::Bootstrap) {
                    Ok(updated) => loaded = updated,
                    Err(err) => log::warn!(target: "statsig", "failed to parse bootstrap values: {err}"),
                }
            }
        }

        if self.config.local_mode {
            log::debug!(target: "statsig", loaded; "local mode, skipping network");
            return Ok(());
        }

        let initial_load = async {
            if !loaded {
                match self.sync_from_network().await {
                    Ok(_) => {}
                    Err(err @ (Error::Unauthorized | Error::InvalidBaseUrl(_))) => return Err(err),
                    Err(err) => {
                        log::warn!(target: "statsig", "initial ruleset fetch failed, serving defaults: {err}")
                    }
                }
            }
            if let Err(err) = self.sync_id_lists().await {
                log::warn!(target: "statsig", "initial id list sync failed: {err}");
            }
            Ok(())
        };
        match self.config.init_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, initial_load).await {
                Ok(result) => result?,
                Err(elapsed) => {
                    let err = Error::from(elapsed);
                    log::warn!(target: "statsig", "initial load after {timeout:?} failed, serving what is loaded: {err}")
                }
            },
            None => initial_load.await?,
        }

        self.start_background_sync();
        Ok(())
    }

    /// One ruleset sync cycle: from the data store if it publishes updates, otherwise from the
    /// network. Returns `true` if a new ruleset was published.
    pub async fn sync_rulesets(&self) -> Result<bool> {
        match &self.data_store {
            Some(data_store) if data_store.supports_polling_updates(RULESETS_KEY) => {
                self.sync_from_data_store().await
            }
            _ => self.sync_from_network().await,
        }
    }

    async fn sync_from_network(&self) -> Result<bool> {
        let since_time = self.snapshot().last_sync_time;
        log::debug!(target: "statsig", since_time; "fetching rulesets");

        let body = json!({
            "sinceTime": since_time,
            "statsigMetadata": self.metadata,
        });
        let response = self
            .network
            .post("download_config_specs", body, self.config.request_options)
            .await?;
        if response.is_null() {
            return Ok(false);
        }

        let raw = response.to_string();
        let updated = self.apply_response(
            serde_json::from_value(response)?,
            EvaluationReason::Network,
        );

        if updated {
            if let Some(data_store) = &self.data_store {
                if let Err(err) = data_store.set(RULESETS_KEY, &raw).await {
                    log::warn!(target: "statsig", "failed to write ruleset to data store: {err}");
                }
            }
        }
        Ok(updated)
    }

    async fn sync_from_data_store(&self) -> Result<bool> {
        let Some(data_store) = &self.data_store else {
            return Ok(false);
        };
        match data_store.get(RULESETS_KEY).await? {
            Some(raw) => self.apply_json(&raw, EvaluationReason::DataAdapter),
            None => Ok(false),
        }
    }

    fn apply_json(&self, raw: &str, source: EvaluationReason) -> Result<bool> {
        let response = serde_json::from_str(raw)?;
        Ok(self.apply_response(response, source))
    }

    /// Publish `response` unless it carries no updates or is older than the active ruleset.
    fn apply_response(&self, response: DownloadConfigSpecsResponse, source: EvaluationReason) -> bool {
        if !response.has_updates {
            log::debug!(target: "statsig", "no ruleset updates");
            return false;
        }

        let current = self.snapshot();
        if current.is_initialized() && response.time < current.last_sync_time {
            log::debug!(target: "statsig",
                time = response.time,
                current = current.last_sync_time;
                "ignoring ruleset older than the active one");
            return false;
        }

        let snapshot = SpecSnapshot::from_response(response, source);
        log::debug!(target: "statsig",
            source = source.as_str(),
            time = snapshot.last_sync_time,
            gates = snapshot.gates.len(),
            configs = snapshot.configs.len();
            "publishing ruleset");
        self.set_snapshot(Arc::new(snapshot));
        true
    }

    fn start_background_sync(self: &Arc<Self>) {
        let mut background = self
            .background
            .lock()
            .expect("thread holding background lock should not panic");
        if background.is_some() {
            return;
        }

        let mut sync = BackgroundSync::new();

        let store = Arc::downgrade(self);
        sync.spawn("rulesets", self.config.rulesets_sync.clone(), move || {
            let store: Weak<SpecStore> = store.clone();
            async move {
                let Some(store) = store.upgrade() else {
                    return false;
                };
                if let Err(err) = store.sync_rulesets().await {
                    log::warn!(target: "statsig", "ruleset sync failed: {err}");
                }
                true
            }
        });

        let store = Arc::downgrade(self);
        sync.spawn("id_lists", self.config.id_lists_sync.clone(), move || {
            let store: Weak<SpecStore> = store.clone();
            async move {
                let Some(store) = store.upgrade() else {
                    return false;
                };
                if let Err(err) = store.sync_id_lists().await {
                    log::warn!(target: "statsig", "id list sync failed: {err}");
                }
                true
            }
        });

        *background = Some(sync);
    }

    /// Stop background sync and wait for the tasks to exit.
    pub async fn shutdown(&self) {
        let background = self
            .background
            .lock()
            .expect("thread holding background lock should not panic")
            .take();
        if let Some(background) = background {
            background.shutdown().await;
        }
        if let Some(data_store) = &self.data_store {
            if let Err(err) = data_store.shutdown().await {
                log::warn!(target: "statsig", "failed to shut down data store: {err}");
            }
        }
    }
}
