//! Channel message definitions
//!
//! Inbound messages carry a `type` discriminator. Decoding never fails on a
//! well-formed JSON payload: anything unrecognized becomes
//! [`InboundEvent::Unknown`] so the connection can keep running.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

// ─────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────

/// Messages sent from the client to the server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Liveness check; the server answers with `{"type":"pong"}`
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
}

impl OutboundMessage {
    /// Ping stamped with the current wall clock in milliseconds
    pub fn ping_now() -> Self {
        OutboundMessage::Ping {
            timestamp: Some(chrono::Utc::now().timestamp_millis()),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────

/// Decoded inbound channel message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Heartbeat answer; consumed by the connection
    Pong,
    /// Progress of one task
    TaskUpdate(TaskUpdate),
    /// Periodic system telemetry
    SystemUpdate(SystemUpdate),
    /// Valid JSON the client does not understand
    Unknown(Value),
}

impl InboundEvent {
    /// Decode a text frame. Only non-JSON input is an error.
    pub fn decode(text: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::from_value(value))
    }

    /// Decode a binary frame holding UTF-8 JSON
    pub fn decode_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        Ok(Self::from_value(value))
    }

    fn from_value(value: Value) -> Self {
        match value.get("type").and_then(Value::as_str) {
            Some("pong") => InboundEvent::Pong,
            Some("task_update") => match TaskUpdate::deserialize(&value) {
                Ok(update) => InboundEvent::TaskUpdate(update),
                Err(e) => {
                    warn!(error = %e, "Malformed task_update payload");
                    InboundEvent::Unknown(value)
                }
            },
            Some("system_update") => match SystemUpdate::deserialize(&value) {
                Ok(update) => InboundEvent::SystemUpdate(update),
                Err(e) => {
                    warn!(error = %e, "Malformed system_update payload");
                    InboundEvent::Unknown(value)
                }
            },
            _ => InboundEvent::Unknown(value),
        }
    }

    /// The `type` discriminator, for logging
    pub fn type_name(&self) -> &str {
        match self {
            InboundEvent::Pong => "pong",
            InboundEvent::TaskUpdate(_) => "task_update",
            InboundEvent::SystemUpdate(_) => "system_update",
            InboundEvent::Unknown(value) => value
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown"),
        }
    }
}

/// Task lifecycle as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Downloading,
    Transcribing,
    Processing,
    Completed,
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    /// No further updates are expected once a task reaches this status
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

/// `task_update` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    #[serde(deserialize_with = "string_or_number")]
    pub task_id: String,

    pub status: TaskStatus,

    /// Percentage in 0..=100
    #[serde(default)]
    pub progress: Option<f64>,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default, alias = "current_stage")]
    pub stage: Option<String>,

    #[serde(default)]
    pub error_message: Option<String>,

    #[serde(default)]
    pub timestamp: Option<String>,
}

/// `system_update` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemUpdate {
    pub data: SystemMetrics,

    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Server telemetry; every field is optional and extra fields are kept
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemMetrics {
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
    pub disk_usage: Option<f64>,
    pub gpu_available: Option<bool>,
    pub gpu_memory_usage: Option<f64>,
    pub active_tasks: Option<u64>,
    pub pending_tasks: Option<u64>,
    pub completed_tasks: Option<u64>,
    pub failed_tasks: Option<u64>,
    pub uptime: Option<f64>,
    pub version: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Task ids arrive as strings from some endpoints and integers from others
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number task_id, got {}",
            other
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_serialization() {
        let bare = OutboundMessage::Ping { timestamp: None };
        assert_eq!(bare.to_json().unwrap(), r#"{"type":"ping"}"#);

        let stamped = OutboundMessage::Ping { timestamp: Some(42) };
        assert_eq!(stamped.to_json().unwrap(), r#"{"type":"ping","timestamp":42}"#);
    }

    #[test]
    fn test_decode_pong() {
        assert_eq!(InboundEvent::decode(r#"{"type":"pong"}"#).unwrap(), InboundEvent::Pong);
        assert_eq!(
            InboundEvent::decode(r#"{"type":"pong","timestamp":"2024-01-01T00:00:00"}"#).unwrap(),
            InboundEvent::Pong
        );
    }

    #[test]
    fn test_decode_task_update() {
        let event = InboundEvent::decode(
            r#"{"type":"task_update","task_id":"abc","status":"transcribing",
                "progress":42.5,"current_stage":"whisper","timestamp":"2024-01-01T00:00:00"}"#,
        )
        .unwrap();

        match event {
            InboundEvent::TaskUpdate(update) => {
                assert_eq!(update.task_id, "abc");
                assert_eq!(update.status, TaskStatus::Transcribing);
                assert_eq!(update.progress, Some(42.5));
                assert_eq!(update.stage.as_deref(), Some("whisper"));
                assert!(update.message.is_none());
            }
            other => panic!("Expected TaskUpdate, got {:?}", other),
        }
    }

    #[test]
    fn test_numeric_task_id() {
        let event =
            InboundEvent::decode(r#"{"type":"task_update","task_id":42,"status":"completed"}"#)
                .unwrap();
        match event {
            InboundEvent::TaskUpdate(update) => {
                assert_eq!(update.task_id, "42");
                assert!(update.status.is_terminal());
            }
            other => panic!("Expected TaskUpdate, got {:?}", other),
        }
    }

    #[test]
    fn test_unrecognized_status_is_unknown() {
        let event =
            InboundEvent::decode(r#"{"type":"task_update","task_id":"1","status":"paused"}"#)
                .unwrap();
        match event {
            InboundEvent::TaskUpdate(update) => assert_eq!(update.status, TaskStatus::Unknown),
            other => panic!("Expected TaskUpdate, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_system_update_keeps_extra_fields() {
        let event = InboundEvent::decode(
            r#"{"type":"system_update","data":{"cpu_usage":12.5,"memory_usage":40,
                "active_tasks":2,"queue_depth":7}}"#,
        )
        .unwrap();

        match event {
            InboundEvent::SystemUpdate(update) => {
                assert_eq!(update.data.cpu_usage, Some(12.5));
                assert_eq!(update.data.memory_usage, Some(40.0));
                assert_eq!(update.data.active_tasks, Some(2));
                assert_eq!(update.data.extra.get("queue_depth"), Some(&Value::from(7)));
            }
            other => panic!("Expected SystemUpdate, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_known_type_becomes_unknown() {
        let event = InboundEvent::decode(r#"{"type":"task_update","status":"pending"}"#).unwrap();
        assert!(matches!(event, InboundEvent::Unknown(_)));
        assert_eq!(event.type_name(), "task_update");
    }

    #[test]
    fn test_unrecognized_type_is_unknown() {
        let event =
            InboundEvent::decode(r#"{"type":"task_notification","success":true}"#).unwrap();
        assert!(matches!(event, InboundEvent::Unknown(_)));
        assert_eq!(event.type_name(), "task_notification");
    }

    #[test]
    fn test_non_json_is_an_error() {
        assert!(InboundEvent::decode("not json").is_err());
        assert!(InboundEvent::decode_bytes(b"\xff\xfe").is_err());
    }

    #[test]
    fn test_decode_bytes() {
        let event = InboundEvent::decode_bytes(br#"{"type":"pong"}"#).unwrap();
        assert_eq!(event, InboundEvent::Pong);
    }
}
