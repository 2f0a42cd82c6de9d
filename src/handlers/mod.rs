//! The queue handlers and their wiring.
//!
//! | Function                  | Trigger                                  | Side effect                       |
//! |---------------------------|------------------------------------------|-----------------------------------|
//! | `onAttendanceAlert`       | write `/admin_alerts_queue/{pushId}`     | notify topic `admin_alerts`       |
//! | `onBroadcastNotification` | write `/notifications_queue/{pushId}`    | notify topic `all_employees`      |
//! | `onDeleteUserRequest`     | create `/delete_requests/{pushId}`       | delete identity and `users/{uid}` |
//!
//! Every handler removes its queue record when done. External services are
//! reached through the `TopicPublisher`, `IdentityStore` and `RecordStore`
//! seams so the handlers can be exercised without a network.

pub mod delete_user;
pub mod notification;
pub mod records;


use crate::auth::{AuthError, FirebaseAuth};
use crate::database::{DatabaseError, FirebaseDatabase};
use crate::functions::{EventContext, Function, FunctionsError, Runtime, StepOutcome};
use crate::messaging::models::Message;
use crate::messaging::{FirebaseMessaging, MessagingError};
use crate::FunctionsApp;
use async_trait::async_trait;
use std::sync::Arc;

pub use delete_user::DeleteUserHandler;
pub use notification::{NotificationHandler, NotificationPayload};

pub const ATTENDANCE_ALERTS_PATH: &str = "/admin_alerts_queue/{pushId}";
pub const BROADCASTS_PATH: &str = "/notifications_queue/{pushId}";
pub const DELETE_REQUESTS_PATH: &str = "/delete_requests/{pushId}";

pub const ADMIN_ALERTS_TOPIC: &str = "admin_alerts";
pub const ALL_EMPLOYEES_TOPIC: &str = "all_employees";

/// Sends a notification to every subscriber of a topic.
#[async_trait]
pub trait TopicPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: NotificationPayload) -> Result<String, MessagingError>;
}

/// Removes authentication identities.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn delete_identity(&self, uid: &str) -> Result<(), AuthError>;
}

/// Removes database locations.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn remove(&self, path: &str) -> Result<(), DatabaseError>;
}

#[async_trait]
impl TopicPublisher for FirebaseMessaging {
    async fn publish(&self, topic: &str, payload: NotificationPayload) -> Result<String, MessagingError> {
        let message = Message {
            topic: Some(topic.to_string()),
            ..payload.into()
        };
        self.send(&message).await
    }
}

#[async_trait]
impl IdentityStore for FirebaseAuth {
    async fn delete_identity(&self, uid: &str) -> Result<(), AuthError> {
        self.delete_user(uid).await
    }
}

#[async_trait]
impl RecordStore for FirebaseDatabase {
    async fn remove(&self, path: &str) -> Result<(), DatabaseError> {
        self.reference(path)?.remove().await
    }
}

/// Removes the record that triggered the invocation.
pub(crate) async fn drain(store: &dyn RecordStore, ctx: &EventContext) -> StepOutcome {
    let result = store.remove(&ctx.resource).await;
    match &result {
        Ok(()) => tracing::debug!("Queue record removed"),
        Err(e) => tracing::error!(error = %e, "Failed to remove queue record, it may be processed again"),
    }
    StepOutcome::from_result(&result)
}

/// Registers the three queue functions on `runtime`, sharing the clients of `app`.
pub fn register(app: &FunctionsApp, runtime: &mut Runtime) -> Result<(), FunctionsError> {
    let publisher: Arc<dyn TopicPublisher> = app.messaging();
    let identities: Arc<dyn IdentityStore> = app.auth();
    let store: Arc<dyn RecordStore> = app.database();

    runtime
        .register(Function::on_write(
            "onAttendanceAlert",
            ATTENDANCE_ALERTS_PATH,
            Arc::new(NotificationHandler::attendance_alerts(
                publisher.clone(),
                store.clone(),
            )),
        )?)?
        .register(Function::on_write(
            "onBroadcastNotification",
            BROADCASTS_PATH,
            Arc::new(NotificationHandler::broadcasts(publisher, store.clone())),
        )?)?
        .register(Function::on_create(
            "onDeleteUserRequest",
            DELETE_REQUESTS_PATH,
            Arc::new(DeleteUserHandler::new(identities, store)),
        )?)?;

    Ok(())
}
