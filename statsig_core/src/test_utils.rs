//! Helpers for testing code built on `statsig_core`.
use std::{collections::HashMap, sync::Mutex, time::Duration};

use async_trait::async_trait;

use crate::{
    network::{Network, RequestOptions},
    Error, Result,
};

/// Read a JSON fixture from `sdk-test-data/`.
pub fn fixture(name: &str) -> serde_json::Value {
    let path = format!("{}/../sdk-test-data/{name}", env!("CARGO_MANIFEST_DIR"));
    let file = std::fs::File::open(&path).unwrap_or_else(|err| panic!("failed to open {path}: {err}"));
    serde_json::from_reader(std::io::BufReader::new(file))
        .unwrap_or_else(|err| panic!("failed to parse {path}: {err}"))
}

/// In-memory [`Network`] with canned responses that records every request.
#[derive(Default)]
pub struct FakeNetwork {
    responses: Mutex<HashMap<String, Result<serde_json::Value>>>,
    requests: Mutex<Vec<(String, serde_json::Value)>>,
    id_list_files: Mutex<HashMap<String, String>>,
    id_list_fetches: Mutex<Vec<(String, u64)>>,
    id_list_error: Mutex<Option<Error>>,
    delay: Mutex<Option<Duration>>,
}

impl FakeNetwork {
    pub fn new() -> FakeNetwork {
        FakeNetwork::default()
    }

    /// Respond to every later request to `endpoint` with `response`. Endpoints without a
    /// response reply with `null`.
    pub fn set_response(&self, endpoint: &str, response: Result<serde_json::Value>) {
        self.responses
            .lock()
            .expect("fake network lock")
            .insert(endpoint.to_owned(), response);
    }

    /// Serve `contents` at `url`. Fetches return the bytes from the requested offset.
    pub fn set_id_list_file(&self, url: &str, contents: &str) {
        self.id_list_files
            .lock()
            .expect("fake network lock")
            .insert(url.to_owned(), contents.to_owned());
    }

    /// Make every ID-list fetch fail with `error` until called with `None`.
    pub fn fail_id_list_fetches(&self, error: Option<Error>) {
        *self.id_list_error.lock().expect("fake network lock") = error;
    }

    /// Delay every `post` by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("fake network lock") = Some(delay);
    }

    /// Bodies posted to `endpoint`, oldest first.
    pub fn requests(&self, endpoint: &str) -> Vec<serde_json::Value> {
        self.requests
            .lock()
            .expect("fake network lock")
            .iter()
            .filter(|(e, _)| e == endpoint)
            .map(|(_, body)| body.clone())
            .collect()
    }

    pub fn all_requests(&self) -> Vec<(String, serde_json::Value)> {
        self.requests.lock().expect("fake network lock").clone()
    }

    /// Every `(url, offset)` ID-list fetch, oldest first.
    pub fn id_list_fetches(&self) -> Vec<(String, u64)> {
        self.id_list_fetches.lock().expect("fake network lock").clone()
    }

    /// Events of every `log_event` batch, flattened.
    pub fn logged_events(&self) -> Vec<serde_json::Value> {
        self.requests("log_event")
            .into_iter()
            .flat_map(|body| match body.get("events") {
                Some(serde_json::Value::Array(events)) => events.clone(),
                _ => Vec::new(),
            })
            .collect()
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn post(
        &self,
        endpoint: &str,
        body: serde_json::Value,
        _options: RequestOptions,
    ) -> Result<serde_json::Value> {
        self.requests
            .lock()
            .expect("fake network lock")
            .push((endpoint.to_owned(), body));

        let delay = *self.delay.lock().expect("fake network lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.responses
            .lock()
            .expect("fake network lock")
            .get(endpoint)
            .cloned()
            .unwrap_or(Ok(serde_json::Value::Null))
    }

    async fn fetch_id_list(&self, url: &str, offset: u64) -> Result<String> {
        self.id_list_fetches
            .lock()
            .expect("fake network lock")
            .push((url.to_owned(), offset));

        if let Some(err) = self.id_list_error.lock().expect("fake network lock").clone() {
            return Err(err);
        }

        let files = self.id_list_files.lock().expect("fake network lock");
        let file = files.get(url).ok_or(Error::HttpStatus(404))?;
        Ok(file.get(offset as usize..).unwrap_or_default().to_owned())
    }
}
