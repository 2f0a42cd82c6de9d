//! Process configuration.
//!
//! Only the variables a functions host would provide are read:
//!
//! | Variable                         | Required | Default                                     |
//! |----------------------------------|----------|---------------------------------------------|
//! | `GOOGLE_APPLICATION_CREDENTIALS` | yes      | --                                          |
//! | `FIREBASE_CONFIG`                | no       | --                                          |
//! | `FIREBASE_DATABASE_URL`          | no       | `https://{projectId}-default-rtdb.firebaseio.com` |
//! | `FUNCTION_TIMEOUT_SECS`          | no       | `60`                                        |
//!
//! `FIREBASE_CONFIG` holds either a JSON object or the path of a JSON file
//! with `projectId` and `databaseURL`.

use crate::functions::runtime::DEFAULT_TIMEOUT;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use yup_oauth2::ServiceAccountKey;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("FIREBASE_CONFIG is not valid JSON: {0}")]
    FirebaseConfig(#[from] serde_json::Error),
    #[error("Invalid database URL {url:?}: {reason}")]
    DatabaseUrl { url: String, reason: String },
    #[error("FUNCTION_TIMEOUT_SECS must be a positive number of seconds, got {0:?}")]
    Timeout(String),
    #[error("No project id in the service account key or FIREBASE_CONFIG")]
    MissingProjectId,
}

/// The subset of the platform's `FIREBASE_CONFIG` that matters here.
#[derive(Debug, Default, Deserialize)]
pub struct FirebaseConfig {
    #[serde(rename = "projectId")]
    pub project_id: Option<String>,
    #[serde(rename = "databaseURL")]
    pub database_url: Option<String>,
}

#[derive(Clone)]
pub struct Config {
    /// Service account used for every API; its `project_id` is always set.
    pub service_account: ServiceAccountKey,
    pub database_url: Url,
    pub function_timeout: Duration,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("project_id", &self.project_id())
            .field("client_email", &self.service_account.client_email)
            .field("database_url", &self.database_url.as_str())
            .field("function_timeout", &self.function_timeout)
            .finish()
    }
}

impl Config {
    /// Loads configuration from the environment.
    pub async fn from_env() -> Result<Self, ConfigError> {
        let credentials = std::env::var("GOOGLE_APPLICATION_CREDENTIALS")
            .map_err(|_| ConfigError::Missing("GOOGLE_APPLICATION_CREDENTIALS"))?;
        let service_account = yup_oauth2::read_service_account_key(&credentials)
            .await
            .map_err(|source| ConfigError::Io {
                path: credentials.clone(),
                source,
            })?;

        let firebase_config = match std::env::var("FIREBASE_CONFIG") {
            Ok(raw) => Some(load_firebase_config(&raw).await?),
            Err(_) => None,
        };

        Self::resolve(
            service_account,
            firebase_config.unwrap_or_default(),
            std::env::var("FIREBASE_DATABASE_URL").ok(),
            std::env::var("FUNCTION_TIMEOUT_SECS").ok(),
        )
    }

    /// Combines the individual sources. Explicit variables win over
    /// `FIREBASE_CONFIG`, which wins over the service account key.
    pub fn resolve(
        mut service_account: ServiceAccountKey,
        firebase_config: FirebaseConfig,
        database_url: Option<String>,
        timeout_secs: Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(project_id) = firebase_config.project_id.filter(|p| !p.is_empty()) {
            service_account.project_id = Some(project_id);
        }
        let project_id = service_account
            .project_id
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or(ConfigError::MissingProjectId)?;

        let raw_url = database_url
            .or(firebase_config.database_url)
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| format!("https://{}-default-rtdb.firebaseio.com", project_id));
        let database_url = parse_database_url(&raw_url)?;

        let function_timeout = match timeout_secs {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => return Err(ConfigError::Timeout(raw)),
            },
            None => DEFAULT_TIMEOUT,
        };

        Ok(Self {
            service_account,
            database_url,
            function_timeout,
        })
    }

    pub fn project_id(&self) -> &str {
        self.service_account.project_id.as_deref().unwrap_or_default()
    }
}

async fn load_firebase_config(raw: &str) -> Result<FirebaseConfig, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    let contents = tokio::fs::read_to_string(trimmed)
        .await
        .map_err(|source| ConfigError::Io {
            path: trimmed.to_string(),
            source,
        })?;
    Ok(serde_json::from_str(&contents)?)
}

fn parse_database_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::DatabaseUrl {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https".to_string()));
    }
    if url.cannot_be_a_base() || url.host().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}
