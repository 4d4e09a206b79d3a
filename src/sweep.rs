//! Decay sweep: expiry of stale syndicate tasks and the cascading
//! squad-wide penalty ("mutually assured destruction").
//!
//! Like dispatch, the sweep is a pure function over `HostState` that
//! returns routed events. The host loop ticks it on a fixed interval.

use crate::protocol::{Outbound, ServerEvent};
use crate::store::HostState;
use crate::types::HostMode;

const UNKNOWN_OP: &str = "UNKNOWN_OP";

/// Run one decay pass.
///
/// Every live syndicate task older than the expiry window is soft
/// deleted and costs the squad one integrity point, broadcast as an
/// `integrity_strike` naming the task's owner. If integrity hits zero
/// the whole board burns: all tasks cleared, integrity reset, burn
/// epoch advanced. Strikes from one sweep batch into a single state
/// broadcast rather than one per task.
pub fn run_decay_sweep(state: &mut HostState, now: i64) -> Vec<Outbound> {
    if state.mode != HostMode::Syndicate {
        return vec![];
    }

    let expiry_ms = state.limits.expiry_ms;
    let mut out = Vec::new();
    let mut expired_any = false;
    let mut last_culprit: Option<String> = None;

    let expired: Vec<usize> = state
        .tasks
        .iter()
        .enumerate()
        .filter(|(_, t)| t.syndicate && t.is_live() && now - t.created_at > expiry_ms)
        .map(|(i, _)| i)
        .collect();

    for idx in expired {
        let task = &mut state.tasks[idx];
        task.deleted_at = Some(now);
        task.updated_at = Some(now);
        let culprit = task
            .owner
            .clone()
            .unwrap_or_else(|| UNKNOWN_OP.to_string());
        let snapshot = task.clone();

        state.squad_integrity = (state.squad_integrity - 1).max(0);
        state.stats.total_expired += 1;
        expired_any = true;

        out.push(Outbound::Broadcast(ServerEvent::IntegrityStrike {
            task: snapshot,
            strike_caused_by: culprit.clone(),
            current_integrity: state.squad_integrity,
        }));
        last_culprit = Some(culprit);
    }

    if state.squad_integrity <= 0 {
        out.push(Outbound::Broadcast(ServerEvent::GlobalScorchedEarth {
            culprit: last_culprit.unwrap_or_else(|| UNKNOWN_OP.to_string()),
        }));
        state.burn(now);
        out.push(Outbound::Broadcast(ServerEvent::SyncState(state.clone())));
        out.push(Outbound::Broadcast(ServerEvent::SquadUpdate(state.squad())));
        return out;
    }

    if expired_any {
        state.recompute_capacities();
        out.push(Outbound::Broadcast(ServerEvent::SyncState(state.clone())));
        out.push(Outbound::Broadcast(ServerEvent::SquadUpdate(state.squad())));
    }
    out
}

/// Fire a one-shot `incoming_call` for each live syndicate task inside
/// its final hour before expiry. The warned set persists until the task
/// is gone or the board burns, so a task never rings twice.
pub fn expiry_warnings(state: &mut HostState, now: i64) -> Vec<Outbound> {
    if state.mode != HostMode::Syndicate {
        return vec![];
    }

    let expiry_ms = state.limits.expiry_ms;
    let window_ms = state.limits.warning_window_ms;
    let mut out = Vec::new();

    let due: Vec<(String, String)> = state
        .tasks
        .iter()
        .filter(|t| {
            let age = now - t.created_at;
            t.syndicate
                && t.is_live()
                && age > expiry_ms - window_ms
                && age <= expiry_ms
                && !state.warned.contains(&t.id)
        })
        .map(|t| (t.id.clone(), t.text.clone()))
        .collect();

    for (task_id, text) in due {
        state.warned.insert(task_id.clone());
        out.push(Outbound::Broadcast(ServerEvent::IncomingCall {
            task_id,
            text,
        }));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Limits;
    use crate::types::{Task, TaskStatus};

    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    fn syndicate_state() -> HostState {
        let mut s = HostState::new(Limits::default());
        s.mode = HostMode::Syndicate;
        s
    }

    fn aged_task(id: &str, owner: Option<&str>, created_at: i64) -> Task {
        Task {
            id: id.into(),
            text: format!("task {}", id),
            created_at,
            completed_at: None,
            updated_at: None,
            deleted_at: None,
            owner: owner.map(String::from),
            handler: None,
            status: TaskStatus::Active,
            syndicate: true,
        }
    }

    #[test]
    fn lone_wolf_mode_never_sweeps() {
        let mut s = HostState::new(Limits::default());
        s.tasks.push(aged_task("old", Some("ALPHA"), 0));
        let out = run_decay_sweep(&mut s, 30 * DAY_MS);
        assert!(out.is_empty());
        assert!(s.tasks[0].deleted_at.is_none());
    }

    #[test]
    fn expired_task_costs_one_integrity_and_names_the_culprit() {
        let mut s = syndicate_state();
        let now = 10 * DAY_MS;
        s.tasks.push(aged_task("old", Some("ALPHA"), now - 8 * DAY_MS));
        s.tasks.push(aged_task("fresh", Some("BRAVO"), now - DAY_MS));

        let out = run_decay_sweep(&mut s, now);
        assert_eq!(s.squad_integrity, 2);
        assert!(s.tasks[0].deleted_at.is_some());
        assert!(s.tasks[1].deleted_at.is_none());
        assert_eq!(s.stats.total_expired, 1);

        let strike = out
            .iter()
            .find_map(|o| match o {
                Outbound::Broadcast(ServerEvent::IntegrityStrike {
                    strike_caused_by,
                    current_integrity,
                    ..
                }) => Some((strike_caused_by.clone(), *current_integrity)),
                _ => None,
            })
            .expect("strike broadcast");
        assert_eq!(strike, ("ALPHA".to_string(), 2));
    }

    #[test]
    fn strikes_in_one_sweep_share_a_single_state_broadcast() {
        let mut s = syndicate_state();
        let now = 20 * DAY_MS;
        s.tasks.push(aged_task("a", Some("ALPHA"), now - 9 * DAY_MS));
        s.tasks.push(aged_task("b", Some("BRAVO"), now - 8 * DAY_MS));

        let out = run_decay_sweep(&mut s, now);
        let syncs = out
            .iter()
            .filter(|o| matches!(o, Outbound::Broadcast(ServerEvent::SyncState(_))))
            .count();
        assert_eq!(syncs, 1);
        assert_eq!(s.squad_integrity, 1);
    }

    #[test]
    fn exhausted_integrity_triggers_scorched_earth() {
        let mut s = syndicate_state();
        s.squad_integrity = 1;
        let now = 10 * DAY_MS;
        s.tasks.push(aged_task("old", Some("ALPHA"), now - 8 * DAY_MS));
        s.tasks.push(aged_task("fresh", Some("BRAVO"), now - DAY_MS));

        let out = run_decay_sweep(&mut s, now);
        assert!(out.iter().any(|o| matches!(
            o,
            Outbound::Broadcast(ServerEvent::GlobalScorchedEarth { culprit }) if culprit == "ALPHA"
        )));
        // Everything burns, even tasks that had time left.
        assert!(s.tasks.is_empty());
        assert_eq!(s.squad_integrity, s.limits.max_integrity);
        assert_eq!(s.last_burn_time, now);
    }

    #[test]
    fn ownerless_expiry_blames_unknown_op() {
        let mut s = syndicate_state();
        s.squad_integrity = 1;
        let now = 10 * DAY_MS;
        s.tasks.push(aged_task("old", None, now - 8 * DAY_MS));
        let out = run_decay_sweep(&mut s, now);
        assert!(out.iter().any(|o| matches!(
            o,
            Outbound::Broadcast(ServerEvent::GlobalScorchedEarth { culprit }) if culprit == "UNKNOWN_OP"
        )));
    }

    #[test]
    fn sweep_with_nothing_expired_is_silent() {
        let mut s = syndicate_state();
        s.tasks.push(aged_task("fresh", Some("ALPHA"), DAY_MS));
        let out = run_decay_sweep(&mut s, 2 * DAY_MS);
        assert!(out.is_empty());
        assert_eq!(s.squad_integrity, 3);
    }

    #[test]
    fn warning_fires_once_in_the_final_hour() {
        let mut s = syndicate_state();
        let hour_ms = 60 * 60 * 1000;
        let now = 10 * DAY_MS;
        let created = now - (7 * DAY_MS - hour_ms / 2);
        s.tasks.push(aged_task("due", Some("ALPHA"), created));

        let out = expiry_warnings(&mut s, now);
        assert_eq!(out.len(), 1);
        assert!(matches!(
            &out[0],
            Outbound::Broadcast(ServerEvent::IncomingCall { task_id, .. }) if task_id == "due"
        ));

        // Second pass stays quiet.
        let out = expiry_warnings(&mut s, now + 1000);
        assert!(out.is_empty());
    }

    #[test]
    fn warning_skips_tasks_outside_the_window() {
        let mut s = syndicate_state();
        let now = 10 * DAY_MS;
        s.tasks.push(aged_task("young", Some("ALPHA"), now - DAY_MS));
        s.tasks.push(aged_task("gone", Some("ALPHA"), now - 8 * DAY_MS));
        let out = expiry_warnings(&mut s, now);
        assert!(out.is_empty());
    }
}
