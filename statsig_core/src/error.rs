use std::sync::Arc;

/// Represents a result type for operations in the Statsig SDK.
///
/// This `Result` type is a standard Rust `Result` type where the error variant is defined by the
/// statsig-specific [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the Statsig SDK.
///
/// Only caller misuse (uninitialized SDK, bad secret key, invalid user) is ever returned from
/// evaluation calls. Network and parse failures in background work are logged and swallowed.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The SDK was used before `initialize()` completed or after `shutdown()`.
    #[error("statsig is not initialized")]
    Uninitialized,

    /// Server secret key is missing or does not look like a server secret.
    #[error("invalid secret key, server secret keys start with \"secret-\"")]
    InvalidSecretKey,

    /// User is missing both a user ID and custom IDs.
    #[error("invalid user: {0}")]
    InvalidUser(&'static str),

    /// Invalid base URL configuration.
    #[error("invalid api url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The request was unauthorized, possibly due to an invalid secret key.
    #[error("unauthorized, secret key is likely invalid")]
    Unauthorized,

    /// Server responded with a non-success status code.
    #[error("received non-success status code: {0}")]
    HttpStatus(u16),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// Response or cached payload could not be parsed.
    #[error("error parsing response: {0}")]
    Parse(Arc<serde_json::Error>),

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Error reported by a [`DataStore`](crate::data_store::DataStore) adapter.
    #[error("data store error: {0}")]
    DataStore(String),

    /// Operation did not complete in time.
    #[error("operation timed out")]
    Timeout,
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Parse(Arc::new(value))
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}
