//! External storage for rulesets, e.g. a shared cache in front of many SDK instances.
use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;

use crate::Result;

/// Key under which the raw `download_config_specs` response is stored.
pub const RULESETS_KEY: &str = "statsig.cache";

/// Adapter for an external key/value store.
///
/// On startup the spec store reads [`RULESETS_KEY`] before going to the network. After every
/// network update it writes the new ruleset back. When
/// [`supports_polling_updates`](DataStore::supports_polling_updates) returns `true`, background
/// sync reads from the store instead of the network.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    fn supports_polling_updates(&self, _key: &str) -> bool {
        false
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Process-local [`DataStore`]. Lets several SDK instances share one ruleset and backs tests.
#[derive(Debug, Default)]
pub struct InMemoryDataStore {
    values: RwLock<HashMap<String, String>>,
    polling: bool,
}

impl InMemoryDataStore {
    pub fn new() -> InMemoryDataStore {
        InMemoryDataStore::default()
    }

    /// Make background sync read updates from this store.
    pub fn with_polling_updates(mut self, polling: bool) -> InMemoryDataStore {
        self.polling = polling;
        self
    }
}

#[async_trait]
impl DataStore for InMemoryDataStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .values
            .read()
            .expect("thread holding data store lock should not panic")
            .get(key)
            .cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .expect("thread holding data store lock should not panic")
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn supports_polling_updates(&self, key: &str) -> bool {
        self.polling && key == RULESETS_KEY
    }
}
