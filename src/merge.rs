//! Merge engine: pure reconciliation of task lists and stat summaries.
//!
//! Clients push whole snapshots; the host folds them into its own state
//! with last-writer-wins on tasks and max-aggregation on stats. Both
//! functions are deterministic and idempotent, which is what makes
//! duplicate or out-of-order delivery harmless: re-merging a known
//! snapshot changes nothing.

use crate::types::{Stats, Task};
use std::collections::HashMap;

/// Merge two task lists into one, keyed by task id.
///
/// For tasks sharing an id, the one with the larger `updatedAt` wins
/// (falling back to `createdAt`). Tasks present in only one list are
/// kept as-is. On equal stamps the `local` entry wins, so the result is
/// deterministic for a given argument order.
pub fn merge_tasks(local: &[Task], remote: &[Task]) -> Vec<Task> {
    let mut by_id: HashMap<&str, &Task> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();

    for task in local.iter().chain(remote.iter()) {
        match by_id.get(task.id.as_str()) {
            Some(existing) if existing.merge_stamp() >= task.merge_stamp() => {}
            Some(_) => {
                by_id.insert(&task.id, task);
            }
            None => {
                by_id.insert(&task.id, task);
                order.push(&task.id);
            }
        }
    }

    order.into_iter().map(|id| by_id[id].clone()).collect()
}

/// Merge two stat summaries: field-wise max for the monotone counters,
/// min for `fastestSessionMs` when both sides have one.
pub fn merge_stats(local: &Stats, remote: &Stats) -> Stats {
    Stats {
        total_completed: local.total_completed.max(remote.total_completed),
        total_expired: local.total_expired.max(remote.total_expired),
        total_sessions: local.total_sessions.max(remote.total_sessions),
        fastest_session_ms: match (local.fastest_session_ms, remote.fastest_session_ms) {
            (Some(l), Some(r)) => Some(l.min(r)),
            (l, r) => l.or(r),
        },
    }
}
