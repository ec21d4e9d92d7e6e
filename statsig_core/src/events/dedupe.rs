use std::{
    collections::HashSet,
    sync::Mutex,
    time::{Duration, Instant},
};

use super::StatsigEvent;

/// Metadata keys that change between otherwise identical exposures.
const VOLATILE_METADATA: [&str; 5] = ["reason", "time", "configSyncTime", "initTime", "serverTime"];

/// Bounded window of recently logged exposure keys.
///
/// The window is cleared every `interval` and whenever it reaches `capacity` keys.
#[derive(Debug)]
pub(crate) struct ExposureDedupe {
    interval: Duration,
    capacity: usize,
    state: Mutex<DedupeState>,
}

#[derive(Debug)]
struct DedupeState {
    keys: HashSet<String>,
    window_start: Instant,
}

impl ExposureDedupe {
    pub(crate) fn new(interval: Duration, capacity: usize) -> ExposureDedupe {
        ExposureDedupe {
            interval,
            capacity: capacity.max(1),
            state: Mutex::new(DedupeState {
                keys: HashSet::new(),
                window_start: Instant::now(),
            }),
        }
    }

    /// Return `true` if `event` should be logged. Non-exposure events always are.
    pub(crate) fn should_log(&self, event: &StatsigEvent) -> bool {
        let Some(key) = dedupe_key(event) else {
            return true;
        };

        let mut state = self
            .state
            .lock()
            .expect("thread holding dedupe lock should not panic");
        if state.window_start.elapsed() >= self.interval || state.keys.len() >= self.capacity {
            state.keys.clear();
            state.window_start = Instant::now();
        }
        state.keys.insert(key)
    }
}

fn dedupe_key(event: &StatsigEvent) -> Option<String> {
    if !event.is_exposure() {
        return None;
    }
    let mut metadata = event
        .metadata
        .iter()
        .flatten()
        .filter(|(k, _)| !VOLATILE_METADATA.contains(&k.as_str()))
        .collect::<Vec<_>>();
    metadata.sort();
    serde_json::to_string(&(event.user.dedupe_key(), &event.event_name, metadata)).ok()
}
