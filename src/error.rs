//! Structured error types for protocol responses.

use serde::Serialize;
use std::fmt;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Delegation errors -- surfaced to the sender as rejection messages
    TargetNotFound,
    TargetAtCapacity,

    // Silent drops / no-ops
    StaleTaskRejected,
    InvalidTaskReference,
    CapacityExceeded,

    // Degraded collaborators
    UpstreamUnavailable,

    // Internal errors
    InternalError,
}

/// Structured protocol error.
///
/// None of these crash the host: delegation errors become targeted
/// rejection messages, the silent variants degrade to no-ops, and
/// `UpstreamUnavailable` falls back to canned output.
#[derive(Debug, Serialize)]
pub struct ProtocolError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ProtocolError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    // Convenience constructors. The delegation messages are the exact
    // strings relayed to the sender's terminal.

    pub fn target_not_found(op_id: &str) -> Self {
        Self::new(
            ErrorCode::TargetNotFound,
            format!("[!] TARGET {} NOT FOUND ON RADAR.", op_id),
        )
    }

    pub fn target_at_capacity(op_id: &str, max_tasks: i32) -> Self {
        Self::new(
            ErrorCode::TargetAtCapacity,
            format!(
                "[!] REJECTED: {} AT MAXIMUM CAPACITY ({}/{}).",
                op_id, max_tasks, max_tasks
            ),
        )
    }

    pub fn stale_task(task_id: &str) -> Self {
        Self::new(
            ErrorCode::StaleTaskRejected,
            format!("Task {} predates the current burn epoch", task_id),
        )
    }

    pub fn invalid_task(task_id: &str) -> Self {
        Self::new(
            ErrorCode::InvalidTaskReference,
            format!("Task not found: {}", task_id),
        )
    }

    pub fn capacity_exceeded(op_id: &str, max_tasks: i32) -> Self {
        Self::new(
            ErrorCode::CapacityExceeded,
            format!("{} already holds {} active tasks", op_id, max_tasks),
        )
    }

    pub fn upstream_unavailable(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::UpstreamUnavailable, "Coprocessor unreachable")
            .with_details(err.to_string())
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InternalError, err.to_string())
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProtocolError {}

// Allow using ? with anyhow errors by converting them
impl From<anyhow::Error> for ProtocolError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ProtocolError>() {
            Ok(proto_err) => proto_err,
            Err(err) => ProtocolError::internal(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_messages_carry_the_operator_and_limits() {
        let e = ProtocolError::target_not_found("CHARLIE");
        assert_eq!(e.code, ErrorCode::TargetNotFound);
        assert_eq!(e.to_string(), "[!] TARGET CHARLIE NOT FOUND ON RADAR.");

        let e = ProtocolError::target_at_capacity("BRAVO", 5);
        assert_eq!(e.to_string(), "[!] REJECTED: BRAVO AT MAXIMUM CAPACITY (5/5).");
    }

    #[test]
    fn stale_task_names_the_dropped_id() {
        let e = ProtocolError::stale_task("task-7");
        assert_eq!(e.code, ErrorCode::StaleTaskRejected);
        assert!(e.to_string().contains("task-7"));
    }

    #[test]
    fn anyhow_bridge_preserves_structured_errors() {
        let source = anyhow::Error::new(ProtocolError::invalid_task("t1"));
        let back = ProtocolError::from(source);
        assert_eq!(back.code, ErrorCode::InvalidTaskReference);

        let opaque = anyhow::anyhow!("boom");
        let back = ProtocolError::from(opaque);
        assert_eq!(back.code, ErrorCode::InternalError);
    }
}
