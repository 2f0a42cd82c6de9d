//! Cascading removal of a user requested by an admin.
//!
//! The identity is removed first and the `users/{uid}` subtree only after
//! that succeeded. The two removals are not atomic: a failure in between
//! leaves the profile behind with no identity, and nothing compensates for
//! it. Attendance history and other records keyed by the uid are left alone.

use super::records::{parse_record, DeleteUserRequest};
use super::{drain, IdentityStore, RecordStore};
use crate::auth::AuthError;
use crate::database::validate_key;
use crate::functions::{Change, EventContext, QueueHandler, Report, Step, StepOutcome};
use async_trait::async_trait;
use std::sync::Arc;

const USERS_PATH: &str = "users";

pub struct DeleteUserHandler {
    identities: Arc<dyn IdentityStore>,
    store: Arc<dyn RecordStore>,
}

impl DeleteUserHandler {
    pub fn new(identities: Arc<dyn IdentityStore>, store: Arc<dyn RecordStore>) -> Self {
        Self { identities, store }
    }

    async fn delete_identity(&self, uid: &str) -> StepOutcome {
        match self.identities.delete_identity(uid).await {
            Ok(()) => {
                tracing::info!(uid, "Identity deleted");
                StepOutcome::Ok
            }
            Err(AuthError::UserNotFound) => {
                tracing::warn!(uid, "Identity does not exist, request was probably delivered twice");
                StepOutcome::Failed(AuthError::UserNotFound.to_string())
            }
            Err(e) => {
                tracing::error!(uid, error = %e, "Failed to delete identity");
                StepOutcome::Failed(e.to_string())
            }
        }
    }

    async fn delete_profile(&self, uid: &str) -> StepOutcome {
        let path = format!("{}/{}", USERS_PATH, uid);
        let result = self.store.remove(&path).await;
        match &result {
            Ok(()) => tracing::info!(uid, "Profile data deleted"),
            Err(e) => tracing::error!(uid, error = %e, "Identity deleted but profile data was not"),
        }
        StepOutcome::from_result(&result)
    }
}

#[async_trait]
impl QueueHandler for DeleteUserHandler {
    async fn handle(&self, ctx: &EventContext, change: &Change) -> Report {
        let mut report = Report::default();

        let Some(value) = change.after.as_ref() else {
            tracing::info!("No delete request data");
            return report;
        };

        let request: DeleteUserRequest = parse_record(value);
        let validated = request
            .fields()
            .and_then(|(uid, admin)| validate_key(uid).map(|_| (uid, admin)).map_err(|e| e.to_string()));

        match validated {
            Ok((uid, admin)) => {
                tracing::info!(uid, requested_by = admin, "Deleting user");

                let identity = self.delete_identity(uid).await;
                let profile = if identity.is_ok() {
                    self.delete_profile(uid).await
                } else {
                    StepOutcome::Skipped
                };

                report.record(Step::DeleteIdentity, identity);
                report.record(Step::DeleteProfile, profile);
            }
            Err(reason) => {
                tracing::error!(%reason, "Malformed delete request, discarding it");
                report.record(Step::DeleteIdentity, StepOutcome::Skipped);
                report.record(Step::DeleteProfile, StepOutcome::Skipped);
            }
        }

        report.record(Step::Drain, drain(self.store.as_ref(), ctx).await);
        report
    }
}
