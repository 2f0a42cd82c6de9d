pub mod middleware;

use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;

use self::middleware::AuthMiddleware;

/// Error envelope used by the Google REST APIs (FCM, Identity Toolkit).
#[derive(Debug, Deserialize)]
pub struct FirebaseErrorResponse {
    pub error: FirebaseErrorDetails,
}

#[derive(Debug, Deserialize)]
pub struct FirebaseErrorDetails {
    pub code: u16,
    pub message: String,
    pub status: Option<String>,
}

impl FirebaseErrorResponse {
    pub fn display_message(&self) -> String {
        format!("{} (code: {})", self.error.message, self.error.code)
    }
}

// The Realtime Database answers with a bare `{"error": "..."}` instead.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Google(FirebaseErrorResponse),
    Database { error: String },
}

pub async fn parse_error_response(response: reqwest::Response, default_msg: &str) -> String {
    let status = response.status();
    match response.json::<ErrorBody>().await {
        Ok(ErrorBody::Google(error_resp)) => error_resp.display_message(),
        Ok(ErrorBody::Database { error }) => format!("{} (code: {})", error, status.as_u16()),
        Err(_) => format!("{}: {}", default_msg, status),
    }
}

/// Builds the shared client stack: transient retries first, then auth.
pub fn build_client(middleware: AuthMiddleware) -> ClientWithMiddleware {
    build_client_with(Client::new(), middleware)
}

pub fn build_client_with(client: Client, middleware: AuthMiddleware) -> ClientWithMiddleware {
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

    ClientBuilder::new(client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .with(middleware)
        .build()
}
