//! Database triggers.
//!
//! A `Function` binds a `QueueHandler` to a path template such as
//! `/admin_alerts_queue/{pushId}`. The `Runtime` keeps a streaming connection
//! open to the parent location of every registered template and invokes the
//! handler once per child write, each invocation in its own task.
//!
//! Handlers never fail from the runtime's point of view: every side effect is
//! recorded as a `StepOutcome` in the returned `Report`.

pub mod runtime;
pub mod snapshot;
pub mod watcher;

#[cfg(test)]
mod tests;

use crate::database::{validate_key, DatabaseError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use runtime::Runtime;

#[derive(Error, Debug)]
pub enum FunctionsError {
    #[error("Invalid path pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("Duplicate function name: {0}")]
    DuplicateFunction(String),
    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),
}

/// A trigger path of the form `/queue/{param}`.
///
/// The queue part may have several literal segments; the wildcard must be the
/// last segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    queue: Vec<String>,
    param: String,
}

impl PathPattern {
    pub fn parse(template: &str) -> Result<Self, FunctionsError> {
        let invalid = |reason: &str| FunctionsError::InvalidPattern {
            pattern: template.to_string(),
            reason: reason.to_string(),
        };

        let mut segments: Vec<&str> = template.split('/').filter(|s| !s.is_empty()).collect();
        let last = segments.pop().ok_or_else(|| invalid("empty pattern"))?;

        let param = last
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("last segment must be a {wildcard}"))?;

        if segments.is_empty() {
            return Err(invalid("wildcard needs a parent location"));
        }

        let mut queue = Vec::with_capacity(segments.len());
        for segment in segments {
            if segment.contains('{') || segment.contains('}') {
                return Err(invalid("only the last segment may be a wildcard"));
            }
            validate_key(segment).map_err(|e| invalid(&e.to_string()))?;
            queue.push(segment.to_string());
        }

        Ok(Self {
            queue,
            param: param.to_string(),
        })
    }

    /// The location whose children trigger the function, e.g. `admin_alerts_queue`.
    pub fn queue_path(&self) -> String {
        self.queue.join("/")
    }

    /// The wildcard name, e.g. `pushId`.
    pub fn param(&self) -> &str {
        &self.param
    }

    /// The full path of a child record.
    pub fn resource(&self, key: &str) -> String {
        format!("{}/{}", self.queue_path(), key)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{{{}}}", self.queue_path(), self.param)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

/// The value of a child before and after a write.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Change {
    pub before: Option<Value>,
    pub after: Option<Value>,
}

impl Change {
    pub fn new(before: Option<Value>, after: Option<Value>) -> Self {
        Self { before, after }
    }

    /// Classifies the write. `None` means nothing observable changed.
    pub fn kind(&self) -> Option<ChangeKind> {
        match (&self.before, &self.after) {
            (None, Some(_)) => Some(ChangeKind::Create),
            (Some(_), None) => Some(ChangeKind::Delete),
            (Some(before), Some(after)) if before != after => Some(ChangeKind::Update),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// Creation, update and deletion of a child.
    OnWrite,
    /// Creation of a child only.
    OnCreate,
}

impl TriggerKind {
    pub fn fires_on(&self, kind: ChangeKind) -> bool {
        match self {
            TriggerKind::OnWrite => true,
            TriggerKind::OnCreate => kind == ChangeKind::Create,
        }
    }
}

/// Metadata for one invocation.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub function: String,
    /// Path of the record that triggered the invocation, e.g. `delete_requests/-Nabc`.
    pub resource: String,
    pub params: HashMap<String, String>,
    /// Short content hash of the resource and its value; identical
    /// redeliveries share it.
    pub fingerprint: String,
    pub timestamp: DateTime<Utc>,
}

impl EventContext {
    pub fn new(function: &Function, key: &str, change: &Change) -> Self {
        let resource = function.pattern.resource(key);
        let fingerprint = fingerprint(&resource, change.after.as_ref().or(change.before.as_ref()));

        Self {
            function: function.name.clone(),
            params: HashMap::from([(function.pattern.param().to_string(), key.to_string())]),
            resource,
            fingerprint,
            timestamp: Utc::now(),
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

fn fingerprint(resource: &str, value: Option<&Value>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(resource.as_bytes());
    hasher.update(b"\0");
    if let Some(value) = value {
        hasher.update(value.to_string().as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

/// A side effect performed by a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Topic notification send.
    Dispatch,
    /// Removal of the authentication identity.
    DeleteIdentity,
    /// Removal of the user's profile subtree.
    DeleteProfile,
    /// Removal of the queue record itself.
    Drain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Ok,
    Failed(String),
    Skipped,
}

impl StepOutcome {
    pub fn from_result<T, E: fmt::Display>(result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => StepOutcome::Ok,
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, StepOutcome::Ok)
    }
}

/// Outcome of every step attempted by one invocation, in order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Report {
    steps: Vec<(Step, StepOutcome)>,
}

impl Report {
    pub fn record(&mut self, step: Step, outcome: StepOutcome) {
        self.steps.push((step, outcome));
    }

    pub fn outcome(&self, step: Step) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|(s, _)| *s == step)
            .map(|(_, outcome)| outcome)
    }

    pub fn steps(&self) -> &[(Step, StepOutcome)] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn failures(&self) -> usize {
        self.steps
            .iter()
            .filter(|(_, outcome)| matches!(outcome, StepOutcome::Failed(_)))
            .count()
    }
}

#[async_trait]
pub trait QueueHandler: Send + Sync {
    async fn handle(&self, ctx: &EventContext, change: &Change) -> Report;
}

/// A handler bound to a trigger.
pub struct Function {
    pub name: String,
    pub pattern: PathPattern,
    pub trigger: TriggerKind,
    pub handler: Arc<dyn QueueHandler>,
}

impl Function {
    pub fn on_write(
        name: &str,
        template: &str,
        handler: Arc<dyn QueueHandler>,
    ) -> Result<Self, FunctionsError> {
        Self::new(name, template, TriggerKind::OnWrite, handler)
    }

    pub fn on_create(
        name: &str,
        template: &str,
        handler: Arc<dyn QueueHandler>,
    ) -> Result<Self, FunctionsError> {
        Self::new(name, template, TriggerKind::OnCreate, handler)
    }

    fn new(
        name: &str,
        template: &str,
        trigger: TriggerKind,
        handler: Arc<dyn QueueHandler>,
    ) -> Result<Self, FunctionsError> {
        Ok(Self {
            name: name.to_string(),
            pattern: PathPattern::parse(template)?,
            trigger,
            handler,
        })
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("pattern", &self.pattern.to_string())
            .field("trigger", &self.trigger)
            .finish()
    }
}
