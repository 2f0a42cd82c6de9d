//! Queue record schemas.
//!
//! Records are written by the mobile app and are not trusted to be complete
//! or well typed. Truthy scalars are accepted as strings. Empty strings,
//! `0`, `false` and non-scalars read as missing, and a record that is not an
//! object at all reads as a record with every field missing.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Written to `/admin_alerts_queue` when an employee checks in or out.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceAlertRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub employee_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub employee_id: Option<String>,
    #[serde(default, rename = "type", deserialize_with = "lenient_string")]
    pub kind: Option<String>,
}

impl AttendanceAlertRecord {
    pub fn is_check_in(&self) -> bool {
        self.kind.as_deref() == Some("check_in")
    }
}

/// Written to `/notifications_queue` by an admin.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub body: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sender_name: Option<String>,
}

/// Written to `/delete_requests` by an admin.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteUserRequest {
    #[serde(default, deserialize_with = "lenient_string")]
    pub uid_to_delete: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub requested_by_admin: Option<String>,
}

impl DeleteUserRequest {
    /// Returns `(uid, admin)` when both fields are present.
    pub fn fields(&self) -> Result<(&str, &str), String> {
        match (self.uid_to_delete.as_deref(), self.requested_by_admin.as_deref()) {
            (Some(uid), Some(admin)) => Ok((uid, admin)),
            (None, None) => Err("uidToDelete and requestedByAdmin are missing".to_string()),
            (None, _) => Err("uidToDelete is missing".to_string()),
            (_, None) => Err("requestedByAdmin is missing".to_string()),
        }
    }
}

/// Reads a record from a queue value, falling back to an empty record.
pub fn parse_record<T>(value: &Value) -> T
where
    T: for<'de> Deserialize<'de> + Default,
{
    match serde_json::from_value(value.clone()) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(error = %e, "Queue record is not an object, using defaults");
            T::default()
        }
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    })
}
