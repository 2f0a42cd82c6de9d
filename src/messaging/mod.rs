use crate::core::middleware::AuthMiddleware;
use crate::core::{build_client, parse_error_response};
use crate::messaging::models::{Message, SendResponseInternal};
use reqwest::header;
use reqwest_middleware::ClientWithMiddleware;
use serde::Serialize;
use std::borrow::Cow;
use thiserror::Error;

pub mod models;

const FCM_V1_API: &str = "https://fcm.googleapis.com/v1/projects/{project_id}/messages:send";

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("HTTP Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct FirebaseMessaging {
    client: ClientWithMiddleware,
    send_url: String,
}

// Wrapper for the request body required by FCM v1 API
#[derive(Serialize)]
struct SendRequest<'a> {
    validate_only: bool,
    message: &'a Message,
}

impl FirebaseMessaging {
    pub fn new(middleware: AuthMiddleware) -> Self {
        let project_id = middleware.project_id().unwrap_or_default().to_string();
        let send_url = FCM_V1_API.replace("{project_id}", &project_id);

        Self {
            client: build_client(middleware),
            send_url,
        }
    }

    #[cfg(test)]
    pub(crate) fn new_with_client(client: ClientWithMiddleware, send_url: String) -> Self {
        Self { client, send_url }
    }

    /// Sends a message and returns the message name assigned by FCM.
    pub async fn send(&self, message: &Message) -> Result<String, MessagingError> {
        let message = normalize_message(message)?;
        self.send_request(&message, false).await
    }

    /// Validates a message with FCM without delivering it.
    pub async fn send_dry_run(&self, message: &Message) -> Result<String, MessagingError> {
        let message = normalize_message(message)?;
        self.send_request(&message, true).await
    }

    async fn send_request(&self, message: &Message, dry_run: bool) -> Result<String, MessagingError> {
        let request = SendRequest {
            validate_only: dry_run,
            message,
        };

        let response = self
            .client
            .post(&self.send_url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&request)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MessagingError::ApiError(
                parse_error_response(response, "FCM send failed").await,
            ));
        }

        let result: SendResponseInternal = response.json().await?;
        Ok(result.name)
    }
}

/// Checks the single-target rule and strips a leading `/topics/` from the topic.
fn normalize_message(message: &Message) -> Result<Cow<'_, Message>, MessagingError> {
    let num_targets = [
        message.token.is_some(),
        message.topic.is_some(),
        message.condition.is_some(),
    ]
    .iter()
    .filter(|&&t| t)
    .count();

    if num_targets != 1 {
        return Err(MessagingError::InvalidMessage(
            "Message must have exactly one of token, topic, or condition.".to_string(),
        ));
    }

    let Some(topic) = message.topic.as_deref() else {
        return Ok(Cow::Borrowed(message));
    };

    let name = topic.strip_prefix("/topics/").unwrap_or(topic);
    if !is_valid_topic(name) {
        return Err(MessagingError::InvalidMessage(format!(
            "Malformed topic name: {:?}",
            topic
        )));
    }

    if name.len() == topic.len() {
        return Ok(Cow::Borrowed(message));
    }

    let mut owned = message.clone();
    owned.topic = Some(name.to_string());
    Ok(Cow::Owned(owned))
}

fn is_valid_topic(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~' | '%'))
}
