//! Firebase Realtime Database REST client.
//!
//! Provides `DatabaseReference` handles for reading, writing and removing
//! values, and for opening a streaming connection that reports every change
//! under a location as server-sent events.
//!
//! Redirects are followed by hand so that the authorization header is
//! attached again when the database hands the client over to another host.

pub mod listen;
pub mod reference;


use self::reference::DatabaseReference;
use crate::core::build_client_with;
use crate::core::middleware::AuthMiddleware;
use reqwest::{redirect, Client};
use reqwest_middleware::ClientWithMiddleware;
use thiserror::Error;
use url::Url;

/// Characters the database refuses in a key.
const FORBIDDEN_KEY_CHARS: &[char] = &['.', '$', '#', '[', ']', '/'];

/// Errors that can occur during Realtime Database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Wrapper for `reqwest::Error`.
    #[error("HTTP Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    /// Wrapper for `reqwest_middleware::Error`.
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),
    /// Errors returned by the database.
    #[error("API error: {0}")]
    ApiError(String),
    /// Wrapper for `serde_json::Error`.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    /// The path contains a key the database would reject.
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    /// The event stream could not be decoded.
    #[error("Stream error: {0}")]
    StreamError(String),
}

/// Client for interacting with a Realtime Database instance.
#[derive(Clone)]
pub struct FirebaseDatabase {
    client: ClientWithMiddleware,
    base_url: Url,
}

impl FirebaseDatabase {
    /// Creates a client for the database at `database_url`, e.g.
    /// `https://my-project-default-rtdb.firebaseio.com`.
    pub fn new(middleware: AuthMiddleware, database_url: Url) -> Result<Self, DatabaseError> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self {
            client: build_client_with(client, middleware),
            base_url: database_url,
        })
    }

    #[cfg(test)]
    pub(crate) fn new_with_client(client: ClientWithMiddleware, base_url: Url) -> Self {
        Self { client, base_url }
    }

    /// The root URL of the database instance.
    pub fn url(&self) -> &Url {
        &self.base_url
    }

    /// Gets a `DatabaseReference` for the location at `path`.
    ///
    /// Leading and trailing slashes are ignored; an empty path refers to the
    /// root of the database.
    pub fn reference(&self, path: &str) -> Result<DatabaseReference, DatabaseError> {
        let segments = split_path(path)?;
        Ok(DatabaseReference::new(
            self.client.clone(),
            self.base_url.clone(),
            segments,
        ))
    }
}

/// Checks that `key` is usable as a single path segment.
pub fn validate_key(key: &str) -> Result<(), DatabaseError> {
    if key.is_empty() {
        return Err(DatabaseError::InvalidPath("empty key".to_string()));
    }
    if key.len() > 768 {
        return Err(DatabaseError::InvalidPath(format!("key longer than 768 bytes: {}", key)));
    }
    if let Some(c) = key
        .chars()
        .find(|c| FORBIDDEN_KEY_CHARS.contains(c) || c.is_ascii_control())
    {
        return Err(DatabaseError::InvalidPath(format!(
            "key {:?} contains forbidden character {:?}",
            key, c
        )));
    }
    Ok(())
}

pub(crate) fn split_path(path: &str) -> Result<Vec<String>, DatabaseError> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| validate_key(s).map(|_| s.to_string()))
        .collect()
}
