//! Structured errors for the task loop and its collaborators.
//!
//! Every fault that can terminate a run carries an [`ErrorKind`] whose
//! snake_case code ends up in the `data.code` field of the terminal
//! `TASK_FAILED` event, so callers can branch without string matching.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Error categories surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing/malformed caller input, rejected before any loop starts.
    Validation,
    /// Device backend could not be made ready.
    Provisioning,
    /// Decision service returned an unexpected shape.
    MalformedResponse,
    /// A capability invocation failed on the device.
    ActionExecution,
    /// Iteration cap reached without a stop decision.
    IterationLimit,
    /// Caller-initiated cancellation (not treated as an error).
    Cancelled,
    /// Decision or perception call failed (HTTP, auth, API error).
    Decision,
    /// Internal/unknown error.
    Internal,
}

impl ErrorKind {
    /// Stable code used in event payloads and error bodies.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::Provisioning => "provisioning_error",
            ErrorKind::MalformedResponse => "malformed_response_error",
            ErrorKind::ActionExecution => "action_execution_error",
            ErrorKind::IterationLimit => "iteration_limit_exceeded",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Decision => "decision_error",
            ErrorKind::Internal => "internal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Structured error with kind and optional details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentError {
    /// Error category
    pub kind: ErrorKind,
    /// One-line summary suitable for display
    pub message: String,
    /// Optional additional details (e.g., raw response body)
    pub details: Option<String>,
}

impl AgentError {
    /// Creates a new error without details.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Creates a new error with details attached.
    pub fn with_details(
        kind: ErrorKind,
        message: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            details: Some(details.into()),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn provisioning(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Provisioning, message)
    }

    /// Decision service response missing its expected output container.
    pub fn malformed_response(message: impl Into<String>, body: &str) -> Self {
        let details = if body.is_empty() {
            None
        } else {
            Some(body.to_string())
        };
        Self {
            kind: ErrorKind::MalformedResponse,
            message: message.into(),
            details,
        }
    }

    pub fn action_execution(name: &str, cause: impl fmt::Display) -> Self {
        Self {
            kind: ErrorKind::ActionExecution,
            message: format!("Failed to execute {name} action"),
            details: Some(cause.to_string()),
        }
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for AgentError {}

pub type AgentResult<T> = std::result::Result<T, AgentError>;
