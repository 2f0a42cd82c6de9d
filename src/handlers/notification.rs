//! Topic notifications for attendance alerts and admin broadcasts.

use super::records::{parse_record, AttendanceAlertRecord, BroadcastRecord};
use super::{drain, RecordStore, TopicPublisher, ADMIN_ALERTS_TOPIC, ALL_EMPLOYEES_TOPIC};
use crate::functions::{Change, EventContext, QueueHandler, Report, Step, StepOutcome};
use crate::messaging::models::{Message, Notification};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_EMPLOYEE_NAME: &str = "موظف";
pub const DEFAULT_BROADCAST_TITLE: &str = "رسالة من الإدارة";
pub const DEFAULT_BROADCAST_BODY: &str = "رسالة جديدة";
pub const DEFAULT_SENDER_NAME: &str = "Admin";
pub const EMPLOYEE_STATUS_SCREEN: &str = "EmployeeStatusScreen";

/// The `{notification: {title, body}, data}` part of an outgoing message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub data: HashMap<String, String>,
}

impl From<NotificationPayload> for Message {
    fn from(payload: NotificationPayload) -> Self {
        Message {
            notification: Some(Notification {
                title: Some(payload.title),
                body: Some(payload.body),
                ..Default::default()
            }),
            data: Some(payload.data),
            ..Default::default()
        }
    }
}

pub fn attendance_payload(record: &AttendanceAlertRecord) -> NotificationPayload {
    let name = record
        .employee_name
        .as_deref()
        .unwrap_or(DEFAULT_EMPLOYEE_NAME);
    let action = if record.is_check_in() {
        "الحضور"
    } else {
        "الانصراف"
    };

    NotificationPayload {
        title: format!("تنبيه: {}", name),
        body: format!("قام {} بتسجيل {} الآن.", name, action),
        data: HashMap::from([
            ("screen".to_string(), EMPLOYEE_STATUS_SCREEN.to_string()),
            (
                "employeeId".to_string(),
                record.employee_id.clone().unwrap_or_default(),
            ),
        ]),
    }
}

pub fn broadcast_payload(record: &BroadcastRecord) -> NotificationPayload {
    NotificationPayload {
        title: record
            .title
            .clone()
            .unwrap_or_else(|| DEFAULT_BROADCAST_TITLE.to_string()),
        body: record
            .body
            .clone()
            .unwrap_or_else(|| DEFAULT_BROADCAST_BODY.to_string()),
        data: HashMap::from([(
            "senderName".to_string(),
            record
                .sender_name
                .clone()
                .unwrap_or_else(|| DEFAULT_SENDER_NAME.to_string()),
        )]),
    }
}

/// Sends one notification per queue record to a fixed topic, then removes
/// the record whether or not the send succeeded.
pub struct NotificationHandler {
    label: &'static str,
    topic: String,
    build: fn(&Value) -> NotificationPayload,
    publisher: Arc<dyn TopicPublisher>,
    store: Arc<dyn RecordStore>,
}

impl NotificationHandler {
    pub fn new(
        label: &'static str,
        topic: &str,
        build: fn(&Value) -> NotificationPayload,
        publisher: Arc<dyn TopicPublisher>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            label,
            topic: topic.to_string(),
            build,
            publisher,
            store,
        }
    }

    /// Check-in/check-out alerts for managers.
    pub fn attendance_alerts(publisher: Arc<dyn TopicPublisher>, store: Arc<dyn RecordStore>) -> Self {
        Self::new(
            "attendance alert",
            ADMIN_ALERTS_TOPIC,
            |value| attendance_payload(&parse_record(value)),
            publisher,
            store,
        )
    }

    /// Admin messages for all staff.
    pub fn broadcasts(publisher: Arc<dyn TopicPublisher>, store: Arc<dyn RecordStore>) -> Self {
        Self::new(
            "broadcast",
            ALL_EMPLOYEES_TOPIC,
            |value| broadcast_payload(&parse_record(value)),
            publisher,
            store,
        )
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl QueueHandler for NotificationHandler {
    async fn handle(&self, ctx: &EventContext, change: &Change) -> Report {
        let mut report = Report::default();

        let Some(value) = change.after.as_ref() else {
            tracing::info!(kind = self.label, "No {} data, nothing to send", self.label);
            return report;
        };

        let payload = (self.build)(value);
        let outcome = match self.publisher.publish(&self.topic, payload).await {
            Ok(message_id) => {
                tracing::info!(topic = %self.topic, %message_id, "Sent {} notification", self.label);
                StepOutcome::Ok
            }
            Err(e) => {
                tracing::error!(topic = %self.topic, error = %e, "Failed to send {} notification", self.label);
                StepOutcome::Failed(e.to_string())
            }
        };
        report.record(Step::Dispatch, outcome);

        report.record(Step::Drain, drain(self.store.as_ref(), ctx).await);
        report
    }
}
