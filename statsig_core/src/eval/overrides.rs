use std::{collections::HashMap, sync::RwLock};

use crate::StatsigUser;

/// Key used for overrides that apply to every user.
const ALL_USERS: &str = "";

/// Local gate/config/layer overrides, mostly for tests and local development. An override scoped
/// to a user ID wins over an override for all users.
#[derive(Debug, Default)]
pub struct LocalOverrides {
    gates: RwLock<HashMap<String, HashMap<String, bool>>>,
    configs: RwLock<HashMap<String, HashMap<String, serde_json::Value>>>,
    layers: RwLock<HashMap<String, HashMap<String, serde_json::Value>>>,
}

impl LocalOverrides {
    pub fn new() -> LocalOverrides {
        LocalOverrides::default()
    }

    pub fn override_gate(&self, gate_name: &str, value: bool, user_id: Option<&str>) {
        insert(&self.gates, gate_name, user_id, value);
    }

    pub fn override_config(&self, config_name: &str, value: serde_json::Value, user_id: Option<&str>) {
        insert(&self.configs, config_name, user_id, value);
    }

    pub fn override_layer(&self, layer_name: &str, value: serde_json::Value, user_id: Option<&str>) {
        insert(&self.layers, layer_name, user_id, value);
    }

    pub fn remove_gate_override(&self, gate_name: &str, user_id: Option<&str>) {
        remove(&self.gates, gate_name, user_id);
    }

    pub fn remove_config_override(&self, config_name: &str, user_id: Option<&str>) {
        remove(&self.configs, config_name, user_id);
    }

    pub fn remove_layer_override(&self, layer_name: &str, user_id: Option<&str>) {
        remove(&self.layers, layer_name, user_id);
    }

    pub fn remove_all(&self) {
        for overrides in [&self.configs, &self.layers] {
            overrides
                .write()
                .expect("thread holding overrides lock should not panic")
                .clear();
        }
        self.gates
            .write()
            .expect("thread holding overrides lock should not panic")
            .clear();
    }

    pub(crate) fn gate(&self, gate_name: &str, user: &StatsigUser) -> Option<bool> {
        lookup(&self.gates, gate_name, user)
    }

    pub(crate) fn config(&self, config_name: &str, user: &StatsigUser) -> Option<serde_json::Value> {
        lookup(&self.configs, config_name, user)
    }

    pub(crate) fn layer(&self, layer_name: &str, user: &StatsigUser) -> Option<serde_json::Value> {
        lookup(&self.layers, layer_name, user)
    }
}

fn insert<T>(
    overrides: &RwLock<HashMap<String, HashMap<String, T>>>,
    name: &str,
    user_id: Option<&str>,
    value: T,
) {
    overrides
        .write()
        .expect("thread holding overrides lock should not panic")
        .entry(name.to_owned())
        .or_default()
        .insert(user_id.unwrap_or(ALL_USERS).to_owned(), value);
}

fn remove<T>(
    overrides: &RwLock<HashMap<String, HashMap<String, T>>>,
    name: &str,
    user_id: Option<&str>,
) {
    let mut overrides = overrides
        .write()
        .expect("thread holding overrides lock should not panic");
    if let Some(by_user) = overrides.get_mut(name) {
        by_user.remove(user_id.unwrap_or(ALL_USERS));
        if by_user.is_empty() {
            overrides.remove(name);
        }
    }
}

fn lookup<T: Clone>(
    overrides: &RwLock<HashMap<String, HashMap<String, T>>>,
    name: &str,
    user: &StatsigUser,
) -> Option<T> {
    let overrides = overrides
        .read()
        .expect("thread holding overrides lock should not panic");
    let by_user = overrides.get(name)?;
    by_user
        .get(&user.user_id)
        .or_else(|| by_user.get(ALL_USERS))
        .cloned()
}
