//! Wire protocol between the task loop and its listener.
//!
//! A run narrates progress as an ordered sequence of [`TaskEvent`]s,
//! delivered as self-delimited frames (`data: <json>` terminated by a
//! blank line). Events are append-only and never mutated after emission.

mod frame;

pub use frame::{format_frame, parse_frame};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentError;

/// Event types a listener can observe on the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskEventKind {
    /// Loop entered RUNNING.
    #[serde(rename = "TASK_STARTED")]
    TaskStarted,
    /// Narration turn produced (perception or decision).
    #[serde(rename = "TASK_REASONING")]
    TaskReasoning,
    /// One action call dispatched; `data.action` holds `{type, name, args}`.
    #[serde(rename = "TASK_ACTION_STARTED")]
    TaskActionStarted,
    /// Dispatched action finished successfully.
    #[serde(rename = "TASK_ACTION_COMPLETED")]
    TaskActionCompleted,
    /// Terminal failure; `data.code` + `data.details` identify the cause.
    #[serde(rename = "TASK_FAILED")]
    TaskFailed,
    /// Terminal success (stop reached).
    #[serde(rename = "TASK_COMPLETED")]
    TaskCompleted,
    /// Terminal, caller-initiated cancellation.
    #[serde(rename = "TASK_ABORTED")]
    TaskAborted,
    /// Device provisioning finished (passed through from the provisioner).
    #[serde(rename = "SANDBOX_CREATED")]
    SandboxCreated,
}

impl TaskEventKind {
    /// True for the three terminal outcomes that end a run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskEventKind::TaskCompleted | TaskEventKind::TaskFailed | TaskEventKind::TaskAborted
        )
    }
}

/// One event on the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    #[serde(rename = "type")]
    pub kind: TaskEventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl TaskEvent {
    pub fn new(kind: TaskEventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            message: Some(message.into()),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Builds the terminal failure event for a structured error.
    pub fn failed(err: &AgentError) -> Self {
        Self::new(TaskEventKind::TaskFailed, err.message.clone()).with_data(serde_json::json!({
            "code": err.kind.code(),
            "details": err.details,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_wire_type_names() {
        let ev = TaskEvent::new(TaskEventKind::TaskStarted, "Task started");
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "TASK_STARTED");
        assert_eq!(json["message"], "Task started");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn failed_event_carries_code_and_details() {
        let err = AgentError::action_execution("tap", "adb exited with status 1");
        let ev = TaskEvent::failed(&err);
        let data = ev.data.unwrap();
        assert_eq!(data["code"], "action_execution_error");
        assert_eq!(data["details"], "adb exited with status 1");
    }

    #[test]
    fn terminal_kinds() {
        assert!(TaskEventKind::TaskCompleted.is_terminal());
        assert!(TaskEventKind::TaskFailed.is_terminal());
        assert!(TaskEventKind::TaskAborted.is_terminal());
        assert!(!TaskEventKind::TaskReasoning.is_terminal());
        assert!(!TaskEventKind::SandboxCreated.is_terminal());
    }
}
