use super::watcher::{ReconnectConfig, Watcher};
use super::{Function, FunctionsError};
use crate::database::FirebaseDatabase;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Default execution timeout of a single invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Hosts registered functions, one watcher per function.
pub struct Runtime {
    database: Arc<FirebaseDatabase>,
    functions: Vec<Arc<Function>>,
    timeout: Duration,
    reconnect: ReconnectConfig,
}

impl Runtime {
    pub fn new(database: Arc<FirebaseDatabase>) -> Self {
        Self {
            database,
            functions: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            reconnect: ReconnectConfig::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn register(&mut self, function: Function) -> Result<&mut Self, FunctionsError> {
        if self.functions.iter().any(|f| f.name == function.name) {
            return Err(FunctionsError::DuplicateFunction(function.name));
        }
        self.functions.push(Arc::new(function));
        Ok(self)
    }

    pub fn functions(&self) -> &[Arc<Function>] {
        &self.functions
    }

    /// Runs every watcher until `cancel` fires and all invocations have finished.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), FunctionsError> {
        let mut watchers = Vec::with_capacity(self.functions.len());
        for function in &self.functions {
            let reference = self.database.reference(&function.pattern.queue_path())?;
            watchers.push(Watcher::new(
                function.clone(),
                reference,
                self.timeout,
                self.reconnect.clone(),
            ));
        }

        tracing::info!(
            functions = watchers.len(),
            database = %self.database.url(),
            timeout_secs = self.timeout.as_secs(),
            "Starting functions runtime",
        );

        let mut tasks = JoinSet::new();
        for watcher in watchers {
            tasks.spawn(watcher.run(cancel.child_token()));
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Watcher task failed");
            }
        }

        tracing::info!("Functions runtime stopped");
        Ok(())
    }
}
