//! Operator/provisioning task rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task kind; `input`/`result` schemas depend on this (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    GetParameterValues,
    SetParameterValues,
    Reboot,
    FactoryReset,
    Download,
    Refresh,
}

/// Task status. Transitions only along pending→running, running→completed,
/// running→failed (invariant ii in `spec.md` §3 and §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// A queued CWMP operation for one device.
///
/// `input` and `result` are opaque serialized blobs (JSON) whose shape depends
/// on `kind`; see `provisioning` and `core::dispatcher` for the producers and
/// consumers of each shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub device_id: Uuid,
    pub kind: TaskType,
    pub status: TaskStatus,
    pub input: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new_pending(device_id: Uuid, kind: TaskType, input: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id,
            kind,
            status: TaskStatus::Pending,
            input,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// The `cwmp:ID` correlation token an outbound RPC built from this task carries.
    pub fn correlation_id(&self) -> String {
        format!("task-{}", self.id)
    }

    /// Parse a correlation token of the form `task-<uuid>` back into a task id.
    pub fn parse_correlation_id(id: &str) -> Option<Uuid> {
        id.strip_prefix("task-").and_then(|s| Uuid::parse_str(s).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_id_round_trips() {
        let task = Task::new_pending(Uuid::new_v4(), TaskType::Reboot, serde_json::json!({}));
        let cid = task.correlation_id();
        assert_eq!(Task::parse_correlation_id(&cid), Some(task.id));
    }

    #[test]
    fn parse_correlation_id_rejects_garbage() {
        assert_eq!(Task::parse_correlation_id("not-a-task-id"), None);
        assert_eq!(Task::parse_correlation_id("task-"), None);
    }
}
