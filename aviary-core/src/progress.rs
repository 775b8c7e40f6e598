//! Progress event payloads pushed to subscribers.
//!
//! Events are serialized as JSON of shape `{type, instance_id, operation,
//! stage, percentage, message, timestamp, metadata}` and fanned out to
//! every connected subscriber of the reporter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discriminant of a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventKind {
    ProgressStart,
    ProgressUpdate,
    Heartbeat,
    ProgressComplete,
    ProgressCancelled,
}

/// One structured lifecycle/progress event for a long-running operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ProgressEvent {
    /// Event discriminant.
    #[serde(rename = "type")]
    pub kind: ProgressEventKind,

    /// Owning instance name.
    pub instance_id: String,

    /// Operation name, e.g. `"install"` or `"start"`.
    pub operation: String,

    /// Current stage label, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    /// Completion percentage in `[0, 100]`, monotonic per operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u8>,

    /// Free-form detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Emission time.
    pub timestamp: DateTime<Utc>,

    /// Arbitrary operation metadata, attached at `start`.
    #[serde(skip_serializing_if = "serde_json::Value::is_null", default)]
    pub metadata: serde_json::Value,
}

impl ProgressEvent {
    /// Build an event stamped with the current time.
    #[must_use]
    pub fn now(kind: ProgressEventKind, instance_id: &str, operation: &str) -> Self {
        Self {
            kind,
            instance_id: instance_id.to_owned(),
            operation: operation.to_owned(),
            stage: None,
            percentage: None,
            message: None,
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }
}
