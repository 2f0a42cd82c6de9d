use super::listen::ListenStream;
use super::{split_path, DatabaseError};
use crate::core::parse_error_response;
use futures::stream;
use reqwest::{header, Method, Response};
use reqwest_middleware::ClientWithMiddleware;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

const MAX_REDIRECTS: usize = 5;

/// A `DatabaseReference` refers to a location in the database and can be
/// used to read, write or listen to that location.
#[derive(Clone)]
pub struct DatabaseReference {
    client: ClientWithMiddleware,
    base_url: Url,
    segments: Vec<String>,
}

impl std::fmt::Debug for DatabaseReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseReference")
            .field("url", &self.url().as_str())
            .finish()
    }
}

impl DatabaseReference {
    pub(crate) fn new(client: ClientWithMiddleware, base_url: Url, segments: Vec<String>) -> Self {
        Self {
            client,
            base_url,
            segments,
        }
    }

    /// The slash-separated path of this location, without a leading slash.
    pub fn path(&self) -> String {
        self.segments.join("/")
    }

    /// The last segment of the path, or `None` for the root.
    pub fn key(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Gets a reference to a location relative to this one.
    pub fn child(&self, path: &str) -> Result<DatabaseReference, DatabaseError> {
        let mut segments = self.segments.clone();
        segments.extend(split_path(path)?);
        Ok(Self::new(self.client.clone(), self.base_url.clone(), segments))
    }

    /// The REST endpoint for this location.
    pub fn url(&self) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            match self.segments.split_last() {
                Some((last, parents)) => {
                    path.extend(parents);
                    path.push(&format!("{}.json", last));
                }
                None => {
                    path.push(".json");
                }
            }
        }
        url
    }

    /// Reads the value at this location. Returns `Ok(None)` if nothing is stored there.
    pub async fn get<T: DeserializeOwned>(&self) -> Result<Option<T>, DatabaseError> {
        let response = self.execute(Method::GET, None, "application/json").await?;

        if !response.status().is_success() {
            return Err(DatabaseError::ApiError(
                parse_error_response(response, "Get failed").await,
            ));
        }

        let value: serde_json::Value = response.json().await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }

    /// Overwrites the value at this location.
    pub async fn set<T: Serialize>(&self, value: &T) -> Result<(), DatabaseError> {
        let body = serde_json::to_vec(value)?;
        let response = self
            .execute(Method::PUT, Some(&body), "application/json")
            .await?;

        if !response.status().is_success() {
            return Err(DatabaseError::ApiError(
                parse_error_response(response, "Set failed").await,
            ));
        }

        Ok(())
    }

    /// Removes the value at this location, including all children.
    ///
    /// Removing a location that holds no data succeeds.
    pub async fn remove(&self) -> Result<(), DatabaseError> {
        let response = self
            .execute(Method::DELETE, None, "application/json")
            .await?;

        if !response.status().is_success() {
            return Err(DatabaseError::ApiError(
                parse_error_response(response, "Remove failed").await,
            ));
        }

        Ok(())
    }

    /// Opens a streaming connection to this location.
    ///
    /// The first event is a `put` at `/` carrying the current value; every
    /// later change arrives as a `put` or `patch` relative to this location.
    pub async fn listen(&self) -> Result<ListenStream, DatabaseError> {
        let response = self
            .execute(Method::GET, None, "text/event-stream")
            .await?;

        if !response.status().is_success() {
            return Err(DatabaseError::ApiError(
                parse_error_response(response, "Listen failed").await,
            ));
        }

        let chunks = stream::unfold(response, |mut resp| async move {
            match resp.chunk().await {
                Ok(Some(bytes)) => Some((Ok(bytes), resp)),
                Ok(None) => None,
                Err(e) => Some((Err(e), resp)),
            }
        });

        Ok(ListenStream::new(Box::pin(chunks)))
    }

    async fn execute(
        &self,
        method: Method,
        body: Option<&[u8]>,
        accept: &'static str,
    ) -> Result<Response, DatabaseError> {
        let mut url = self.url();

        for _ in 0..=MAX_REDIRECTS {
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .header(header::ACCEPT, accept);
            if let Some(body) = body {
                request = request
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(body.to_vec());
            }

            let response = request.send().await?;
            if !response.status().is_redirection() {
                return Ok(response);
            }

            let location = response
                .headers()
                .get(header::LOCATION)
                .and_then(|value| value.to_str().ok())
                .ok_or_else(|| {
                    DatabaseError::ApiError(format!(
                        "Redirect {} without location",
                        response.status()
                    ))
                })?;
            url = url.join(location).map_err(|e| {
                DatabaseError::ApiError(format!("Invalid redirect location {}: {}", location, e))
            })?;
        }

        Err(DatabaseError::ApiError(format!(
            "Too many redirects for {}",
            self.path()
        )))
    }
}
