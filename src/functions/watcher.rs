//! Streaming connection for a single function.
//!
//! The watcher keeps a listen stream open on the function's queue location,
//! mirrors it in a `QueueSnapshot`, and spawns one invocation per qualifying
//! child change. When the stream ends it reconnects with exponential backoff
//! and starts from an empty snapshot, so records still waiting in the queue
//! are delivered again.

use super::snapshot::QueueSnapshot;
use super::{Change, EventContext, Function, QueueHandler};
use crate::database::listen::ServerEvent;
use crate::database::reference::DatabaseReference;
use crate::database::DatabaseError;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Longest silence tolerated on an open stream. The server sends a
    /// keep-alive about every 30 seconds.
    pub idle_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Calculate the next backoff delay, clamped to `max_delay`.
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Why a listen stream stopped delivering events.
#[derive(Debug, PartialEq)]
pub enum StreamEnd {
    /// Shutdown was requested.
    Shutdown,
    /// The server closed the connection.
    Closed,
    /// The connection failed, went silent, or sent something undecodable.
    Failed(String),
    /// The server cancelled the listen, usually a security rules change.
    Cancelled(String),
    /// The access token expired or was revoked.
    AuthRevoked,
}

pub struct Watcher {
    function: Arc<Function>,
    reference: DatabaseReference,
    timeout: Duration,
    reconnect: ReconnectConfig,
}

impl Watcher {
    pub fn new(
        function: Arc<Function>,
        reference: DatabaseReference,
        timeout: Duration,
        reconnect: ReconnectConfig,
    ) -> Self {
        Self {
            function,
            reference,
            timeout,
            reconnect,
        }
    }

    /// Listens until `cancel` fires, then waits for in-flight invocations.
    pub async fn run(self, cancel: CancellationToken) {
        let mut tasks = JoinSet::new();
        let mut delay = self.reconnect.initial_delay;

        tracing::info!(
            function = %self.function.name,
            path = %self.function.pattern,
            trigger = ?self.function.trigger,
            "Watching queue",
        );

        loop {
            let connected = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.reference.listen() => result,
            };

            match connected {
                Ok(stream) => {
                    delay = self.reconnect.initial_delay;
                    let end = self.consume(stream, &mut tasks, &cancel).await;
                    match &end {
                        StreamEnd::Shutdown => break,
                        StreamEnd::Closed | StreamEnd::AuthRevoked => {
                            tracing::info!(function = %self.function.name, reason = ?end, "Listen stream ended");
                        }
                        StreamEnd::Failed(_) | StreamEnd::Cancelled(_) => {
                            tracing::warn!(function = %self.function.name, reason = ?end, "Listen stream ended");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        function = %self.function.name,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Failed to open listen stream",
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = next_delay(delay, &self.reconnect);
        }

        let in_flight = tasks.len();
        if in_flight > 0 {
            tracing::info!(function = %self.function.name, in_flight, "Waiting for running invocations");
        }
        while let Some(joined) = tasks.join_next().await {
            log_join_error(&self.function.name, joined);
        }
        tracing::info!(function = %self.function.name, "Watcher stopped");
    }

    /// Feeds one stream into a fresh snapshot until the stream ends or stays
    /// silent for longer than the idle timeout.
    pub(crate) async fn consume<S>(
        &self,
        mut stream: S,
        tasks: &mut JoinSet<()>,
        cancel: &CancellationToken,
    ) -> StreamEnd
    where
        S: Stream<Item = Result<ServerEvent, DatabaseError>> + Unpin,
    {
        let mut snapshot = QueueSnapshot::new();
        let idle = self.reconnect.idle_timeout;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return StreamEnd::Shutdown,
                next = tokio::time::timeout(idle, stream.next()) => next,
            };

            while let Some(joined) = tasks.try_join_next() {
                log_join_error(&self.function.name, joined);
            }

            let event = match next {
                Err(_) => return StreamEnd::Failed(format!("no data for {:?}", idle)),
                Ok(None) => return StreamEnd::Closed,
                Ok(Some(Err(e))) => return StreamEnd::Failed(e.to_string()),
                Ok(Some(Ok(event))) => event,
            };

            match event {
                ServerEvent::KeepAlive => continue,
                ServerEvent::Cancel(reason) => return StreamEnd::Cancelled(reason),
                ServerEvent::AuthRevoked => return StreamEnd::AuthRevoked,
                ServerEvent::Put { .. } | ServerEvent::Patch { .. } => {
                    for (key, change) in snapshot.apply(&event) {
                        self.dispatch(&key, change, tasks);
                    }
                }
            }
        }
    }

    fn dispatch(&self, key: &str, change: Change, tasks: &mut JoinSet<()>) {
        let Some(kind) = change.kind() else {
            return;
        };
        if !self.function.trigger.fires_on(kind) {
            tracing::trace!(function = %self.function.name, key, ?kind, "Change ignored by trigger");
            return;
        }

        let ctx = EventContext::new(&self.function, key, &change);
        let span = tracing::info_span!(
            "invocation",
            function = %ctx.function,
            resource = %ctx.resource,
            event = %ctx.fingerprint,
        );
        let handler = self.function.handler.clone();
        let timeout = self.timeout;

        tasks.spawn(invoke(handler, ctx, change, timeout).instrument(span));
    }
}

async fn invoke(handler: Arc<dyn QueueHandler>, ctx: EventContext, change: Change, timeout: Duration) {
    tracing::debug!(kind = ?change.kind(), "Function execution started");

    match tokio::time::timeout(timeout, handler.handle(&ctx, &change)).await {
        Ok(report) if report.failures() > 0 => {
            tracing::warn!(steps = ?report.steps(), "Function execution finished with failures");
        }
        Ok(report) => {
            tracing::info!(steps = ?report.steps(), "Function execution finished");
        }
        Err(_) => {
            tracing::error!(timeout_secs = timeout.as_secs(), "Function execution timed out");
        }
    }
}

fn log_join_error(function: &str, joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(function, error = %e, "Function invocation panicked");
    }
}
