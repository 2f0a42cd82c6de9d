//! Firebase Authentication (Identity Toolkit) client.
//!
//! Only identity removal is needed by the queue handlers.

pub mod models;

use crate::auth::models::DeleteAccountRequest;
use crate::core::middleware::AuthMiddleware;
use crate::core::{build_client, parse_error_response};
use reqwest::header;
use reqwest_middleware::ClientWithMiddleware;
use thiserror::Error;

#[cfg(test)]
mod tests;

const IDENTITY_TOOLKIT_V1_API: &str =
    "https://identitytoolkit.googleapis.com/v1/projects/{project_id}";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("HTTP Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("User not found")]
    UserNotFound,
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct FirebaseAuth {
    client: ClientWithMiddleware,
    base_url: String,
}

impl FirebaseAuth {
    pub fn new(middleware: AuthMiddleware) -> Self {
        let project_id = middleware.project_id().unwrap_or_default().to_string();
        let base_url = IDENTITY_TOOLKIT_V1_API.replace("{project_id}", &project_id);

        Self {
            client: build_client(middleware),
            base_url,
        }
    }

    #[cfg(test)]
    pub(crate) fn new_with_client(client: ClientWithMiddleware, base_url: String) -> Self {
        Self { client, base_url }
    }

    /// Deletes the identity with the given uid.
    ///
    /// Returns `AuthError::UserNotFound` when the identity does not exist,
    /// which is what a redelivered delete request observes.
    pub async fn delete_user(&self, uid: &str) -> Result<(), AuthError> {
        let url = format!("{}/accounts:delete", self.base_url);
        let request = DeleteAccountRequest {
            local_id: uid.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&request)?)
            .send()
            .await?;

        if !response.status().is_success() {
            let message = parse_error_response(response, "Delete user failed").await;
            if message.contains("USER_NOT_FOUND") {
                return Err(AuthError::UserNotFound);
            }
            return Err(AuthError::ApiError(message));
        }

        Ok(())
    }
}
