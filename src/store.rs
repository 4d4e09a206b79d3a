//! Authoritative in-memory task store and node registry.
//!
//! `HostState` is the single shared mutable resource. It is owned by the
//! host actor and handed to handlers by exclusive reference; every
//! mutation funnels through the methods here so the status/timestamp
//! invariants cannot be violated from the outside. Nothing is durable:
//! state lives for the process lifetime and is reconstructed from client
//! pushes after a restart.

use crate::error::ProtocolError;
use crate::merge::{merge_stats, merge_tasks};
use crate::types::{HostMode, NetworkNode, Stats, Task, TaskStatus};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Get the current timestamp in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Protocol limits, frozen at construction from config.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Most concurrently active owned tasks a node may hold.
    pub max_tasks: i32,
    /// Squad integrity ceiling (and reset value after a wipe).
    pub max_integrity: i32,
    /// Age past which an uncompleted syndicate task decays.
    pub expiry_ms: i64,
    /// How close to expiry a task gets before the one-shot warning fires.
    pub warning_window_ms: i64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_tasks: 5,
            max_integrity: 3,
            expiry_ms: 7 * 24 * 60 * 60 * 1000,
            warning_window_ms: 60 * 60 * 1000,
        }
    }
}

/// Outcome of a completion request against the store.
#[derive(Debug, Clone)]
pub enum CompleteOutcome {
    /// Task went straight to `NEUTRALIZED`.
    Completed(Task),
    /// Task is delegated; it moved to `PENDING_VERIFICATION` and needs
    /// the handler's confirmation before it counts as done.
    VerificationRequired(Task),
    NotFound,
}

/// Canonical host state: mode, integrity, nodes, tasks, stats, burn epoch.
///
/// Serializes to the full `sync_state` snapshot the clients consume.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostState {
    pub mode: HostMode,
    pub squad_integrity: i32,
    /// Connected nodes keyed by connection-scoped socket id.
    pub nodes: HashMap<String, NetworkNode>,
    pub tasks: Vec<Task>,
    pub stats: Stats,
    /// Timestamp of the most recent full wipe. Tasks created before this
    /// epoch are stale and excluded from every future merge.
    pub last_burn_time: i64,
    #[serde(skip)]
    pub limits: Limits,
    /// Task ids that already fired their pre-expiry warning.
    #[serde(skip)]
    pub warned: HashSet<String>,
}

impl HostState {
    pub fn new(limits: Limits) -> Self {
        Self {
            mode: HostMode::LoneWolf,
            squad_integrity: limits.max_integrity,
            nodes: HashMap::new(),
            tasks: Vec::new(),
            stats: Stats::default(),
            last_burn_time: 0,
            limits,
            warned: HashSet::new(),
        }
    }

    // ---- node registry ----

    /// Upsert a node under its connection id. Identity is uppercased;
    /// the announced count is only an optimistic guess until the next
    /// recompute.
    pub fn upsert_node(&mut self, socket_id: &str, op_id: &str, ip: &str, active_task_count: i32) {
        self.nodes.insert(
            socket_id.to_string(),
            NetworkNode {
                socket_id: socket_id.to_string(),
                op_id: op_id.to_uppercase(),
                ip: ip.to_string(),
                active_task_count,
            },
        );
    }

    pub fn remove_node(&mut self, socket_id: &str) -> Option<NetworkNode> {
        self.nodes.remove(socket_id)
    }

    /// Find a connected node by operator identity (case-insensitive).
    /// With multi-device aliasing any one of the connections will do.
    pub fn find_node_by_op(&self, op_id: &str) -> Option<&NetworkNode> {
        let wanted = op_id.to_uppercase();
        self.nodes.values().find(|n| n.op_id == wanted)
    }

    pub fn squad(&self) -> Vec<NetworkNode> {
        self.nodes.values().cloned().collect()
    }

    // ---- capacity accounting ----

    /// Count of live tasks charged against an identity. Unclaimed tasks
    /// (owner = null) count against everyone.
    pub fn active_count_for(&self, op_id: &str) -> i32 {
        let wanted = op_id.to_uppercase();
        self.tasks.iter().filter(|t| t.counts_against(&wanted)).count() as i32
    }

    pub fn at_capacity(&self, op_id: &str) -> bool {
        self.active_count_for(op_id) >= self.limits.max_tasks
    }

    /// Recompute every node's `activeTaskCount` from the task list.
    /// This is the only source of truth for capacity; the per-node field
    /// is never incremented or decremented ad hoc.
    pub fn recompute_capacities(&mut self) {
        let counts: HashMap<String, i32> = self
            .nodes
            .values()
            .map(|n| n.op_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .map(|op| {
                let count = self.tasks.iter().filter(|t| t.counts_against(&op)).count() as i32;
                (op, count)
            })
            .collect();
        for node in self.nodes.values_mut() {
            node.active_task_count = counts.get(&node.op_id).copied().unwrap_or(0);
        }
    }

    // ---- task operations ----

    /// Insert a new task, enforcing the capacity cap at acceptance.
    /// Returns `None` (no task created) when the owner is at capacity.
    pub fn add_task(
        &mut self,
        text: &str,
        owner: Option<&str>,
        handler: Option<&str>,
        syndicate: bool,
        now: i64,
    ) -> Option<Task> {
        let owner = owner.map(|o| o.to_uppercase());
        let budget_key = owner.as_deref().unwrap_or("");
        if self.active_count_for(budget_key) >= self.limits.max_tasks {
            return None;
        }
        let task = Task {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.to_string(),
            created_at: now,
            completed_at: None,
            updated_at: Some(now),
            deleted_at: None,
            owner,
            handler: handler.map(|h| h.to_uppercase()),
            status: TaskStatus::Active,
            syndicate,
        };
        self.tasks.push(task.clone());
        self.recompute_capacities();
        Some(task)
    }

    /// Accept a delegated directive into the store. Silently rejected
    /// (no task inserted) when the accepting owner is at capacity.
    pub fn accept_task(&mut self, mut task: Task, now: i64) -> Option<Task> {
        if task.deleted_at.is_some() {
            return None;
        }
        let budget_key = task.owner.clone().unwrap_or_default();
        if self.active_count_for(&budget_key) >= self.limits.max_tasks {
            return None;
        }
        task.updated_at = Some(now);
        self.tasks.push(task.clone());
        self.recompute_capacities();
        Some(task)
    }

    /// Two-key aware completion. Delegated tasks never complete directly;
    /// they transition to `PENDING_VERIFICATION` and wait for the handler.
    pub fn complete_task(&mut self, task_id: &str, now: i64) -> CompleteOutcome {
        let Some(task) = self.tasks.iter_mut().find(|t| t.id == task_id) else {
            return CompleteOutcome::NotFound;
        };
        if task.is_delegated() && task.status != TaskStatus::Neutralized {
            task.status = TaskStatus::PendingVerification;
            task.updated_at = Some(now);
            let snapshot = task.clone();
            return CompleteOutcome::VerificationRequired(snapshot);
        }
        task.status = TaskStatus::Neutralized;
        task.completed_at = Some(now);
        task.updated_at = Some(now);
        let snapshot = task.clone();
        self.recompute_capacities();
        CompleteOutcome::Completed(snapshot)
    }

    /// Soft-delete a task. Deleted tasks stay in the list for merge
    /// purposes and are never resurrected.
    pub fn delete_task(&mut self, task_id: &str, now: i64) -> Option<Task> {
        let task = self.tasks.iter_mut().find(|t| t.id == task_id)?;
        task.deleted_at = Some(now);
        task.updated_at = Some(now);
        let snapshot = task.clone();
        self.recompute_capacities();
        Some(snapshot)
    }

    // ---- two-key verification transitions ----

    pub fn request_verification(&mut self, task_id: &str, now: i64) -> Option<Task> {
        let task = self.tasks.iter_mut().find(|t| t.id == task_id)?;
        task.status = TaskStatus::PendingVerification;
        task.updated_at = Some(now);
        Some(task.clone())
    }

    pub fn confirm_kill(&mut self, task_id: &str, now: i64) -> Option<Task> {
        let task = self.tasks.iter_mut().find(|t| t.id == task_id)?;
        task.status = TaskStatus::Neutralized;
        task.completed_at = Some(now);
        task.updated_at = Some(now);
        let snapshot = task.clone();
        self.recompute_capacities();
        Some(snapshot)
    }

    pub fn deny_kill(&mut self, task_id: &str, now: i64) -> Option<Task> {
        let task = self.tasks.iter_mut().find(|t| t.id == task_id)?;
        task.status = TaskStatus::Active;
        task.updated_at = Some(now);
        Some(task.clone())
    }

    // ---- sync & epochs ----

    /// Fold a client state push into host state.
    ///
    /// If the client reports a newer burn epoch the host adopts it and
    /// drops everything (catching up to a wipe it missed). Incoming tasks
    /// older than the current epoch are silently rejected, the remainder
    /// merged last-writer-wins, stats merged max-wise, and all node
    /// capacities recomputed.
    pub fn apply_update(&mut self, tasks: &[Task], stats: &Stats, client_burn_time: i64) {
        if client_burn_time > self.last_burn_time {
            self.last_burn_time = client_burn_time;
            self.tasks.clear();
            self.warned.clear();
        }
        let valid: Vec<Task> = tasks
            .iter()
            .filter(|t| {
                let keep = t.created_at >= self.last_burn_time;
                if !keep {
                    // Silent drop; the client is never notified.
                    debug!("{}", ProtocolError::stale_task(&t.id));
                }
                keep
            })
            .cloned()
            .collect();
        self.tasks = merge_tasks(&self.tasks, &valid);
        self.stats = merge_stats(&self.stats, stats);
        self.recompute_capacities();
    }

    /// Full wipe with integrity amnesty: clear all tasks, reset
    /// integrity, advance the burn epoch so anything created before this
    /// moment is stale. Only the M.A.D. cascade earns the reset.
    pub fn burn(&mut self, now: i64) {
        self.wipe_tasks(now);
        self.squad_integrity = self.limits.max_integrity;
    }

    /// Operator-initiated wipe: clear all tasks and advance the burn
    /// epoch, but keep whatever integrity the squad has left.
    pub fn wipe_tasks(&mut self, now: i64) {
        self.tasks.clear();
        self.warned.clear();
        self.last_burn_time = now;
        self.recompute_capacities();
    }

    /// Lone-wolf burn: drop only the caller's owned tasks, leaving the
    /// rest of the network untouched.
    pub fn burn_owned(&mut self, op_id: &str, now: i64) {
        let _ = now;
        let wanted = op_id.to_uppercase();
        self.tasks.retain(|t| t.owner.as_deref() != Some(wanted.as_str()));
        self.recompute_capacities();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> HostState {
        HostState::new(Limits::default())
    }

    #[test]
    fn add_task_enforces_capacity_cap() {
        let mut s = state();
        s.upsert_node("sock-1", "alpha", "127.0.0.1", 0);
        for i in 0..7 {
            s.add_task(&format!("task {}", i), Some("ALPHA"), None, false, 1000 + i);
        }
        let live = s
            .tasks
            .iter()
            .filter(|t| t.owner.as_deref() == Some("ALPHA") && t.is_live())
            .count();
        assert_eq!(live, 5);
        assert_eq!(s.nodes["sock-1"].active_task_count, 5);
    }

    #[test]
    fn completing_a_task_frees_capacity() {
        let mut s = state();
        s.upsert_node("sock-1", "ALPHA", "127.0.0.1", 0);
        let t = s.add_task("one", Some("ALPHA"), None, false, 1000).unwrap();
        assert_eq!(s.nodes["sock-1"].active_task_count, 1);
        match s.complete_task(&t.id, 2000) {
            CompleteOutcome::Completed(done) => {
                assert_eq!(done.status, TaskStatus::Neutralized);
                assert_eq!(done.completed_at, Some(2000));
            }
            other => panic!("expected direct completion, got {:?}", other),
        }
        assert_eq!(s.nodes["sock-1"].active_task_count, 0);
    }

    #[test]
    fn delegated_completion_is_gated_behind_verification() {
        let mut s = state();
        let t = s
            .add_task("delegated", Some("BRAVO"), Some("ALPHA"), true, 1000)
            .unwrap();
        match s.complete_task(&t.id, 2000) {
            CompleteOutcome::VerificationRequired(pending) => {
                assert_eq!(pending.status, TaskStatus::PendingVerification);
                assert!(pending.completed_at.is_none());
            }
            other => panic!("expected verification gate, got {:?}", other),
        }
        // Only the handler's confirm sets completedAt.
        let done = s.confirm_kill(&t.id, 3000).unwrap();
        assert_eq!(done.status, TaskStatus::Neutralized);
        assert_eq!(done.completed_at, Some(3000));
    }

    #[test]
    fn deny_kill_reverts_to_active() {
        let mut s = state();
        let t = s
            .add_task("delegated", Some("BRAVO"), Some("ALPHA"), true, 1000)
            .unwrap();
        s.request_verification(&t.id, 2000);
        let reverted = s.deny_kill(&t.id, 3000).unwrap();
        assert_eq!(reverted.status, TaskStatus::Active);
        assert!(reverted.completed_at.is_none());
    }

    #[test]
    fn capacity_sums_across_connections_sharing_an_identity() {
        let mut s = state();
        // Same operator on two devices: one budget.
        s.upsert_node("sock-1", "alpha", "10.0.0.1", 0);
        s.upsert_node("sock-2", "ALPHA", "10.0.0.2", 0);
        for i in 0..3 {
            s.add_task(&format!("t{}", i), Some("ALPHA"), None, true, 1000 + i);
        }
        assert_eq!(s.nodes["sock-1"].active_task_count, 3);
        assert_eq!(s.nodes["sock-2"].active_task_count, 3);
    }

    #[test]
    fn apply_update_rejects_stale_epoch_tasks() {
        let mut s = state();
        s.last_burn_time = 5000;
        let stale = Task {
            id: "stale".into(),
            text: "old world".into(),
            created_at: 4000,
            completed_at: None,
            updated_at: None,
            deleted_at: None,
            owner: None,
            handler: None,
            status: TaskStatus::Active,
            syndicate: true,
        };
        let fresh = Task {
            created_at: 6000,
            id: "fresh".into(),
            ..stale.clone()
        };
        s.apply_update(&[stale, fresh], &Stats::default(), 0);
        assert_eq!(s.tasks.len(), 1);
        assert_eq!(s.tasks[0].id, "fresh");
    }

    #[test]
    fn apply_update_adopts_newer_burn_epoch() {
        let mut s = state();
        s.add_task("pre-wipe", None, None, true, 1000);
        s.apply_update(&[], &Stats::default(), 9000);
        assert_eq!(s.last_burn_time, 9000);
        assert!(s.tasks.is_empty());
    }

    #[test]
    fn burn_resets_integrity_and_advances_epoch() {
        let mut s = state();
        s.squad_integrity = 1;
        s.add_task("doomed", None, None, true, 1000);
        s.burn(8000);
        assert!(s.tasks.is_empty());
        assert_eq!(s.squad_integrity, s.limits.max_integrity);
        assert_eq!(s.last_burn_time, 8000);
    }

    #[test]
    fn wipe_tasks_preserves_remaining_integrity() {
        let mut s = state();
        s.squad_integrity = 1;
        s.add_task("doomed", None, None, true, 1000);
        s.wipe_tasks(8000);
        assert!(s.tasks.is_empty());
        assert_eq!(s.squad_integrity, 1);
        assert_eq!(s.last_burn_time, 8000);
    }

    #[test]
    fn burn_owned_spares_other_operators() {
        let mut s = state();
        s.add_task("mine", Some("ALPHA"), None, false, 1000);
        s.add_task("theirs", Some("BRAVO"), None, false, 1000);
        s.add_task("unclaimed", None, None, false, 1000);
        s.burn_owned("alpha", 2000);
        let ids: Vec<&str> = s.tasks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(ids, vec!["theirs", "unclaimed"]);
    }

    #[test]
    fn soft_deleted_tasks_are_retained_for_merge() {
        let mut s = state();
        let t = s.add_task("gone", None, None, false, 1000).unwrap();
        s.delete_task(&t.id, 2000);
        assert_eq!(s.tasks.len(), 1);
        assert!(s.tasks[0].deleted_at.is_some());
        assert_eq!(s.active_count_for(""), 0);
    }
}
