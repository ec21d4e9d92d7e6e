//! Incremental ID-list sync.
//!
//! Each cycle asks `get_id_lists` for the current descriptors, then fetches only the bytes of each
//! list file not consumed yet. A list whose file was recreated upstream (new file ID or a size
//! smaller than what we consumed) is replaced by a fresh, empty list and refetched from offset 0.
//! Published lists are never modified: each applied delta yields a new list and the whole map is
//! swapped in at the end of the cycle.
use std::{collections::HashMap, sync::Arc};

use serde_json::json;
use tokio::task::JoinSet;

use crate::{id_list::IdList, spec::IdListDescriptor, Result};

use super::SpecStore;

/// What to do with one list in this cycle.
enum Plan {
    /// Local copy is current or newer than the remote one.
    Keep(Arc<IdList>),
    /// Fetch bytes `[list.size(), remote_size)`.
    Fetch(Arc<IdList>, u64),
}

impl SpecStore {
    /// Run one ID-list sync cycle. Cycles never overlap.
    pub async fn sync_id_lists(&self) -> Result<()> {
        let _guard = self.id_lists_sync.lock().await;

        let body = json!({ "statsigMetadata": self.metadata });
        let response = self
            .network
            .post("get_id_lists", body, self.config.request_options)
            .await?;
        let descriptors: HashMap<String, IdListDescriptor> = if response.is_null() {
            HashMap::new()
        } else {
            serde_json::from_value(response)?
        };

        let current = self.id_lists();
        for name in current.keys().filter(|name| !descriptors.contains_key(*name)) {
            log::debug!(target: "statsig", list = name.as_str(); "id list removed upstream, dropping it");
        }

        let mut next = HashMap::with_capacity(descriptors.len());
        let mut fetches = JoinSet::new();
        for (name, descriptor) in descriptors {
            let Some(plan) = plan(current.get(&name), &descriptor) else {
                log::warn!(target: "statsig", list = name.as_str(); "id list descriptor has no url or file id, skipping it");
                continue;
            };
            match plan {
                Plan::Keep(list) => {
                    next.insert(name, list);
                }
                Plan::Fetch(list, remote_size) => {
                    next.insert(name, list.clone());
                    let network = self.network.clone();
                    fetches.spawn(async move {
                        let result = network.fetch_id_list(&list.url, list.size()).await;
                        (list, remote_size, result)
                    });
                }
            }
        }

        // Fetches run in parallel; results are applied one at a time to fresh copies.
        while let Some(joined) = fetches.join_next().await {
            let (list, remote_size, result) = match joined {
                Ok(fetched) => fetched,
                Err(err) => {
                    log::warn!(target: "statsig", "id list fetch task failed: {err}");
                    continue;
                }
            };
            match result {
                Ok(delta) if delta.starts_with(['+', '-']) => {
                    let updated = list.with_delta(&delta, remote_size);
                    log::debug!(target: "statsig",
                        list = updated.name.as_str(),
                        size = remote_size,
                        ids = updated.len();
                        "applied id list delta");
                    next.insert(updated.name.clone(), Arc::new(updated));
                }
                Ok(_) => {
                    // Drop it so the next cycle starts over from offset 0.
                    log::warn!(target: "statsig", list = list.name.as_str(); "corrupt id list delta, dropping list");
                    next.remove(&list.name);
                }
                Err(err) => {
                    log::warn!(target: "statsig", list = list.name.as_str(); "failed to fetch id list: {err}");
                }
            }
        }

        self.set_id_lists(next);
        Ok(())
    }
}

fn plan(local: Option<&Arc<IdList>>, remote: &IdListDescriptor) -> Option<Plan> {
    let list = match local {
        Some(local) if remote.creation_time < local.creation_time => {
            return Some(Plan::Keep(local.clone()));
        }
        Some(local)
            if remote.file_id.as_deref() == Some(local.file_id.as_str())
                && remote.size >= local.size() =>
        {
            local.clone()
        }
        _ => Arc::new(IdList::from_descriptor(remote)?),
    };

    Some(if remote.size > list.size() {
        Plan::Fetch(list, remote.size)
    } else {
        Plan::Keep(list)
    })
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use serde_json::json;

    use crate::{
        network::Network,
        sharder::hash_id_for_list,
        spec_store::{PollerConfig, SpecStore, SpecStoreConfig},
        test_utils::FakeNetwork,
        Error, StatsigMetadata,
    };

    const URL: &str = "https://idlists.example.com/employees";

    fn store(network: Arc<FakeNetwork>) -> SpecStore {
        let config = SpecStoreConfig {
            rulesets_sync: PollerConfig::new().with_interval(Duration::ZERO),
            id_lists_sync: PollerConfig::new().with_interval(Duration::ZERO),
            ..SpecStoreConfig::default()
        };
        let network: Arc<dyn Network> = network;
        SpecStore::new(config, network, None, StatsigMetadata::new("rust-server", "test"))
    }

    fn descriptor(file_id: &str, size: usize, creation_time: i64) -> serde_json::Value {
        json!({
            "employees": {
                "name": "employees",
                "size": size,
                "url": URL,
                "fileID": file_id,
                "creationTime": creation_time,
            }
        })
    }

    fn contains(store: &SpecStore, id: &str) -> bool {
        store.id_lists()["employees"].contains(&hash_id_for_list(id))
    }

    fn line(op: char, id: &str) -> String {
        format!("{op}{}\n", hash_id_for_list(id))
    }

    #[tokio::test]
    async fn fetches_only_new_bytes() {
        let network = Arc::new(FakeNetwork::new());
        let store = store(network.clone());

        let mut file = line('+', "alice") + &line('+', "bob");
        network.set_id_list_file(URL, &file);
        network.set_response("get_id_lists", Ok(descriptor("file-1", file.len(), 1)));
        store.sync_id_lists().await.unwrap();

        assert!(contains(&store, "alice"));
        assert!(contains(&store, "bob"));
        assert_eq!(store.id_lists()["employees"].size(), file.len() as u64);

        let consumed = file.len() as u64;
        file += &line('-', "alice");
        file += &line('+', "carol");
        network.set_id_list_file(URL, &file);
        network.set_response("get_id_lists", Ok(descriptor("file-1", file.len(), 1)));
        store.sync_id_lists().await.unwrap();

        assert!(!contains(&store, "alice"));
        assert!(contains(&store, "bob"));
        assert!(contains(&store, "carol"));
        assert_eq!(network.id_list_fetches(), vec![(URL.to_owned(), 0), (URL.to_owned(), consumed)]);

        // Nothing new: no fetch.
        store.sync_id_lists().await.unwrap();
        assert_eq!(network.id_list_fetches().len(), 2);
    }

    #[tokio::test]
    async fn published_lists_are_not_modified_by_later_syncs() {
        let network = Arc::new(FakeNetwork::new());
        let store = store(network.clone());

        let mut file = line('+', "alice");
        network.set_id_list_file(URL, &file);
        network.set_response("get_id_lists", Ok(descriptor("file-1", file.len(), 1)));
        store.sync_id_lists().await.unwrap();
        let before = store.id_lists();

        file += &line('+', "bob");
        network.set_id_list_file(URL, &file);
        network.set_response("get_id_lists", Ok(descriptor("file-1", file.len(), 1)));
        store.sync_id_lists().await.unwrap();

        let bob = hash_id_for_list("bob");
        assert!(!before["employees"].contains(&bob));
        assert!(before["employees"].size() < file.len() as u64);
        assert!(contains(&store, "bob"));
        assert!(!Arc::ptr_eq(&before["employees"], &store.id_lists()["employees"]));
    }

    #[tokio::test]
    async fn new_file_id_resets_the_list() {
        let network = Arc::new(FakeNetwork::new());
        let store = store(network.clone());

        let file = line('+', "alice") + &line('+', "bob");
        network.set_id_list_file(URL, &file);
        network.set_response("get_id_lists", Ok(descriptor("file-1", file.len(), 1)));
        store.sync_id_lists().await.unwrap();

        let file = line('+', "carol");
        network.set_id_list_file(URL, &file);
        network.set_response("get_id_lists", Ok(descriptor("file-2", file.len(), 2)));
        store.sync_id_lists().await.unwrap();

        assert!(!contains(&store, "alice"));
        assert!(!contains(&store, "bob"));
        assert!(contains(&store, "carol"));
        assert_eq!(network.id_list_fetches().last(), Some(&(URL.to_owned(), 0)));
    }

    #[tokio::test]
    async fn shrunk_file_resets_the_list() {
        let network = Arc::new(FakeNetwork::new());
        let store = store(network.clone());

        let file = line('+', "alice") + &line('+', "bob");
        network.set_id_list_file(URL, &file);
        network.set_response("get_id_lists", Ok(descriptor("file-1", file.len(), 1)));
        store.sync_id_lists().await.unwrap();

        let file = line('+', "bob");
        network.set_id_list_file(URL, &file);
        network.set_response("get_id_lists", Ok(descriptor("file-1", file.len(), 1)));
        store.sync_id_lists().await.unwrap();

        assert!(!contains(&store, "alice"));
        assert!(contains(&store, "bob"));
    }

    #[tokio::test]
    async fn older_creation_time_is_ignored() {
        let network = Arc::new(FakeNetwork::new());
        let store = store(network.clone());

        let file = line('+', "alice");
        network.set_id_list_file(URL, &file);
        network.set_response("get_id_lists", Ok(descriptor("file-2", file.len(), 10)));
        store.sync_id_lists().await.unwrap();

        network.set_response("get_id_lists", Ok(descriptor("file-1", 100, 5)));
        store.sync_id_lists().await.unwrap();

        assert!(contains(&store, "alice"));
        assert_eq!(store.id_lists()["employees"].file_id, "file-2");
        assert_eq!(network.id_list_fetches().len(), 1);
    }

    #[tokio::test]
    async fn lists_missing_upstream_are_dropped() {
        let network = Arc::new(FakeNetwork::new());
        let store = store(network.clone());

        let file = line('+', "alice");
        network.set_id_list_file(URL, &file);
        network.set_response("get_id_lists", Ok(descriptor("file-1", file.len(), 1)));
        store.sync_id_lists().await.unwrap();
        assert!(store.id_lists().contains_key("employees"));

        network.set_response("get_id_lists", Ok(json!({})));
        store.sync_id_lists().await.unwrap();

        assert!(store.id_lists().is_empty());
    }

    #[tokio::test]
    async fn corrupt_delta_drops_the_list() {
        let network = Arc::new(FakeNetwork::new());
        let store = store(network.clone());

        network.set_id_list_file(URL, "<html>oops</html>");
        network.set_response("get_id_lists", Ok(descriptor("file-1", 17, 1)));
        store.sync_id_lists().await.unwrap();

        assert!(!store.id_lists().contains_key("employees"));
    }

    #[tokio::test]
    async fn failed_fetch_keeps_the_list_for_retry() {
        let network = Arc::new(FakeNetwork::new());
        let store = store(network.clone());

        let file = line('+', "alice");
        network.set_id_list_file(URL, &file);
        network.set_response("get_id_lists", Ok(descriptor("file-1", file.len(), 1)));
        store.sync_id_lists().await.unwrap();

        let consumed = file.len();
        let file = file + &line('+', "bob");
        network.set_id_list_file(URL, &file);
        network.fail_id_list_fetches(Some(Error::HttpStatus(503)));
        network.set_response("get_id_lists", Ok(descriptor("file-1", file.len(), 1)));
        store.sync_id_lists().await.unwrap();

        assert!(contains(&store, "alice"));
        assert!(!contains(&store, "bob"));
        assert_eq!(store.id_lists()["employees"].size(), consumed as u64);

        network.fail_id_list_fetches(None);
        store.sync_id_lists().await.unwrap();
        assert!(contains(&store, "bob"));
    }

    #[tokio::test]
    async fn get_id_lists_failure_is_returned_and_state_kept() {
        let network = Arc::new(FakeNetwork::new());
        let store = store(network.clone());

        let file = line('+', "alice");
        network.set_id_list_file(URL, &file);
        network.set_response("get_id_lists", Ok(descriptor("file-1", file.len(), 1)));
        store.sync_id_lists().await.unwrap();

        network.set_response("get_id_lists", Err(Error::HttpStatus(500)));
        assert!(store.sync_id_lists().await.is_err());
        assert!(contains(&store, "alice"));
    }
}
