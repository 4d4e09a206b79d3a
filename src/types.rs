//! Core types for the Syndicate Host.
//!
//! Everything here crosses the wire to browser clients, so serialization
//! uses the camelCase field names the clients expect.

use serde::{Deserialize, Serialize};

/// Two-key completion state machine for a task.
///
/// `Active -> PendingVerification -> Neutralized`, with a back-edge to
/// `Active` when the handler denies the kill. Non-delegated tasks go
/// straight from `Active` to `Neutralized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Active,
    PendingVerification,
    Neutralized,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Active => "ACTIVE",
            TaskStatus::PendingVerification => "PENDING_VERIFICATION",
            TaskStatus::Neutralized => "NEUTRALIZED",
        }
    }
}

/// A task in the shared pool.
///
/// Deserialization is lenient: client snapshots may omit any of the
/// optional fields, and merges must accept whatever a client pushes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub text: String,
    pub created_at: i64,
    #[serde(default)]
    pub completed_at: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
    #[serde(default)]
    pub deleted_at: Option<i64>,
    /// Identity of the node executing the task (None = unclaimed/local).
    #[serde(default)]
    pub owner: Option<String>,
    /// Identity of the node that delegated the task and verifies completion.
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    /// True if the task is part of the shared pool subject to decay rules.
    #[serde(default)]
    pub syndicate: bool,
}

impl Task {
    /// Not completed and not soft-deleted.
    pub fn is_live(&self) -> bool {
        self.completed_at.is_none() && self.deleted_at.is_none()
    }

    /// A task is delegated when its handler is a different identity than
    /// its owner. Only delegated tasks go through two-key verification.
    pub fn is_delegated(&self) -> bool {
        match (&self.handler, &self.owner) {
            (Some(h), Some(o)) => h != o,
            (Some(_), None) => true,
            _ => false,
        }
    }

    /// Timestamp used for last-writer-wins merging.
    pub fn merge_stamp(&self) -> i64 {
        self.updated_at.unwrap_or(self.created_at)
    }

    /// Whether this task counts against `op_id`'s capacity budget.
    /// Unclaimed tasks count against every node.
    pub fn counts_against(&self, op_id: &str) -> bool {
        self.is_live() && self.owner.as_deref().map(|o| o == op_id).unwrap_or(true)
    }
}

/// Aggregate statistics. Counters are monotone; merges take field-wise max.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    #[serde(default)]
    pub total_completed: i64,
    #[serde(default)]
    pub total_expired: i64,
    #[serde(default)]
    pub total_sessions: i64,
    #[serde(default)]
    pub fastest_session_ms: Option<i64>,
}

/// A connected client node.
///
/// `socket_id` is connection-scoped and dies with the connection; `op_id`
/// is the stable human identity. Two connections may share an `op_id`
/// (same operator on two devices) and then share one capacity budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkNode {
    pub socket_id: String,
    pub op_id: String,
    pub ip: String,
    /// Derived: recomputed from the task store, never independently
    /// authoritative. The value announced at join is only an initial guess.
    pub active_task_count: i32,
}

/// Host operating mode. Sticky: once any node joins the syndicate the
/// host stays in syndicate mode for the rest of its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostMode {
    #[default]
    LoneWolf,
    Syndicate,
}

impl HostMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostMode::LoneWolf => "LONE_WOLF",
            HostMode::Syndicate => "SYNDICATE",
        }
    }
}
