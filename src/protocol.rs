//! Wire protocol: inbound commands, outbound events, and the dispatch
//! function that turns one into the other.
//!
//! Dispatch is a pure function over `HostState`: it takes one command,
//! mutates state through the store's operations, and returns the list of
//! outbound events with their routing. No transport types appear here,
//! which is what makes the whole protocol testable by feeding commands
//! and asserting on emitted events.

use crate::error::ProtocolError;
use crate::store::HostState;
use crate::types::{HostMode, NetworkNode, Stats, Task, TaskStatus};
use serde::{Deserialize, Serialize};

/// Connection-scoped context handed to dispatch alongside each command.
#[derive(Debug, Clone)]
pub struct ConnCtx {
    pub conn_id: String,
    pub ip: String,
    /// LAN address the host advertises, if one was detected.
    pub network_ip: Option<String>,
}

/// Snapshot a client pushes with `update_state`. Every field is
/// defaulted; partial pushes from older clients must still merge.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientUpdate {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub stats: Stats,
    #[serde(default)]
    pub last_burn_time: i64,
    #[serde(default)]
    pub syndicate_mode: bool,
}

/// Inbound events, client to host.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    JoinSyndicate {
        #[serde(rename = "opId")]
        op_id: String,
        #[serde(rename = "activeTaskCount", default)]
        active_task_count: i32,
    },
    DelegateDirective {
        #[serde(rename = "targetOpId")]
        target_op_id: String,
        text: String,
        handler: String,
    },
    AcceptDirective(Task),
    RejectDirective {
        handler: String,
        #[serde(rename = "taskId")]
        task_id: String,
        text: String,
    },
    RequestVerification(String),
    ConfirmKill(String),
    DenyKill(String),
    UpdateState(ClientUpdate),
    InitiateBurn {
        #[serde(default)]
        reason: Option<String>,
        #[serde(rename = "syndicateMode", default)]
        syndicate_mode: bool,
        #[serde(rename = "opId", default)]
        op_id: Option<String>,
    },
    TerminateHostProcess,
}

/// Status of the optional AI coprocessor, relayed to clients verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoprocessorStatus {
    pub active: bool,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "modelCount", default)]
    pub model_count: usize,
}

/// Outbound events, host to client(s).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    SyncState(HostState),
    SquadUpdate(Vec<NetworkNode>),
    #[serde(rename_all = "camelCase")]
    NodeStatus {
        online: bool,
        active_nodes: usize,
        network_ip: Option<String>,
    },
    CoprocessorStatus(CoprocessorStatus),
    IncomingDirective(Task),
    DelegationRejected(String),
    VerifyRequired(Task),
    KillConfirmed(Task),
    KillDenied(Task),
    #[serde(rename_all = "camelCase")]
    IntegrityStrike {
        task: Task,
        strike_caused_by: String,
        current_integrity: i32,
    },
    GlobalScorchedEarth {
        culprit: String,
    },
    ExecuteKill(Option<String>),
    #[serde(rename_all = "camelCase")]
    HostTerminating {
        reason: String,
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    HandlerMessage {
        text: String,
        timestamp: i64,
        #[serde(rename = "isAI")]
        is_ai: bool,
    },
    #[serde(rename_all = "camelCase")]
    IncomingCall {
        task_id: String,
        text: String,
    },
}

/// An event plus where it goes.
#[derive(Debug, Clone)]
pub enum Outbound {
    Broadcast(ServerEvent),
    /// Everyone except the named connection (senders already hold the
    /// state they pushed).
    BroadcastExcept(String, ServerEvent),
    To(String, ServerEvent),
}

fn node_status(state: &HostState, ctx: &ConnCtx) -> ServerEvent {
    ServerEvent::NodeStatus {
        online: true,
        active_nodes: state.nodes.len(),
        network_ip: ctx.network_ip.clone(),
    }
}

/// Process one inbound command against host state.
///
/// `TerminateHostProcess` is deliberately not handled here; the host
/// loop intercepts it before dispatch because it ends the process.
pub fn dispatch(
    state: &mut HostState,
    ctx: &ConnCtx,
    cmd: ClientCommand,
    now: i64,
) -> Vec<Outbound> {
    match cmd {
        ClientCommand::JoinSyndicate {
            op_id,
            active_task_count,
        } => {
            // Sticky: once anyone joins, the host stays in syndicate mode.
            state.mode = HostMode::Syndicate;
            state.upsert_node(&ctx.conn_id, &op_id, &ctx.ip, active_task_count);
            state.recompute_capacities();
            vec![
                Outbound::To(ctx.conn_id.clone(), ServerEvent::SyncState(state.clone())),
                Outbound::Broadcast(ServerEvent::SquadUpdate(state.squad())),
                Outbound::Broadcast(node_status(state, ctx)),
            ]
        }

        ClientCommand::DelegateDirective {
            target_op_id,
            text,
            handler,
        } => {
            let Some(target) = state.find_node_by_op(&target_op_id) else {
                return vec![Outbound::To(
                    ctx.conn_id.clone(),
                    ServerEvent::DelegationRejected(
                        ProtocolError::target_not_found(&target_op_id.to_uppercase()).to_string(),
                    ),
                )];
            };
            if target.active_task_count >= state.limits.max_tasks {
                let rejection = ProtocolError::target_at_capacity(
                    &target_op_id.to_uppercase(),
                    state.limits.max_tasks,
                );
                return vec![Outbound::To(
                    ctx.conn_id.clone(),
                    ServerEvent::DelegationRejected(rejection.to_string()),
                )];
            }
            // The task does not enter the store until the target accepts.
            let directive = Task {
                id: uuid::Uuid::new_v4().to_string(),
                text,
                created_at: now,
                completed_at: None,
                updated_at: Some(now),
                deleted_at: None,
                owner: Some(target.op_id.clone()),
                handler: Some(handler.to_uppercase()),
                status: TaskStatus::Active,
                syndicate: true,
            };
            vec![Outbound::To(
                target.socket_id.clone(),
                ServerEvent::IncomingDirective(directive),
            )]
        }

        ClientCommand::AcceptDirective(task) => match state.accept_task(task, now) {
            Some(_) => vec![
                Outbound::Broadcast(ServerEvent::SyncState(state.clone())),
                Outbound::Broadcast(ServerEvent::SquadUpdate(state.squad())),
            ],
            // At capacity: silent rejection, nothing created.
            None => vec![],
        },

        ClientCommand::RejectDirective {
            handler,
            task_id: _,
            text,
        } => match state.find_node_by_op(&handler) {
            Some(node) => vec![Outbound::To(
                node.socket_id.clone(),
                ServerEvent::DelegationRejected(format!(
                    "[!] BOUNCED: Target rejected directive: \"{}\"",
                    text
                )),
            )],
            None => vec![],
        },

        ClientCommand::RequestVerification(task_id) => {
            let Some(task) = state.request_verification(&task_id, now) else {
                return vec![];
            };
            let mut out = Vec::new();
            if let Some(node) = task
                .handler
                .as_deref()
                .and_then(|h| state.find_node_by_op(h))
            {
                out.push(Outbound::To(
                    node.socket_id.clone(),
                    ServerEvent::VerifyRequired(task.clone()),
                ));
            }
            out.push(Outbound::Broadcast(ServerEvent::SyncState(state.clone())));
            out
        }

        ClientCommand::ConfirmKill(task_id) => {
            let Some(task) = state.confirm_kill(&task_id, now) else {
                return vec![];
            };
            state.stats.total_completed += 1;
            let mut out = Vec::new();
            if let Some(node) = task.owner.as_deref().and_then(|o| state.find_node_by_op(o)) {
                out.push(Outbound::To(
                    node.socket_id.clone(),
                    ServerEvent::KillConfirmed(task.clone()),
                ));
            }
            out.push(Outbound::Broadcast(ServerEvent::SyncState(state.clone())));
            out.push(Outbound::Broadcast(ServerEvent::SquadUpdate(state.squad())));
            out
        }

        ClientCommand::DenyKill(task_id) => {
            let Some(task) = state.deny_kill(&task_id, now) else {
                return vec![];
            };
            let mut out = Vec::new();
            if let Some(node) = task.owner.as_deref().and_then(|o| state.find_node_by_op(o)) {
                out.push(Outbound::To(
                    node.socket_id.clone(),
                    ServerEvent::KillDenied(task.clone()),
                ));
            }
            out.push(Outbound::Broadcast(ServerEvent::SyncState(state.clone())));
            out
        }

        ClientCommand::UpdateState(update) => {
            if update.syndicate_mode {
                state.mode = HostMode::Syndicate;
            }
            state.apply_update(&update.tasks, &update.stats, update.last_burn_time);
            vec![
                Outbound::BroadcastExcept(
                    ctx.conn_id.clone(),
                    ServerEvent::SyncState(state.clone()),
                ),
                Outbound::Broadcast(ServerEvent::SquadUpdate(state.squad())),
            ]
        }

        ClientCommand::InitiateBurn {
            reason,
            syndicate_mode,
            op_id,
        } => {
            if syndicate_mode {
                // Integrity is untouched: a voluntary wipe is not amnesty.
                // The caller already executed locally, so only the other
                // nodes hear about it.
                state.wipe_tasks(now);
                vec![
                    Outbound::BroadcastExcept(
                        ctx.conn_id.clone(),
                        ServerEvent::ExecuteKill(reason),
                    ),
                    Outbound::BroadcastExcept(
                        ctx.conn_id.clone(),
                        ServerEvent::SyncState(state.clone()),
                    ),
                    Outbound::BroadcastExcept(
                        ctx.conn_id.clone(),
                        ServerEvent::SquadUpdate(state.squad()),
                    ),
                ]
            } else {
                if let Some(op) = op_id.as_deref() {
                    state.burn_owned(op, now);
                }
                vec![Outbound::BroadcastExcept(
                    ctx.conn_id.clone(),
                    ServerEvent::SyncState(state.clone()),
                )]
            }
        }

        // Handled by the host loop; reaching dispatch is a no-op.
        ClientCommand::TerminateHostProcess => vec![],
    }
}

/// Events emitted when a connection drops.
pub fn handle_disconnect(state: &mut HostState, ctx: &ConnCtx) -> Vec<Outbound> {
    if state.remove_node(&ctx.conn_id).is_none() {
        // Connection never announced an identity.
        return vec![Outbound::Broadcast(node_status(state, ctx))];
    }
    state.recompute_capacities();
    vec![
        Outbound::Broadcast(ServerEvent::SquadUpdate(state.squad())),
        Outbound::Broadcast(node_status(state, ctx)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Limits;

    fn ctx(conn_id: &str) -> ConnCtx {
        ConnCtx {
            conn_id: conn_id.into(),
            ip: "10.0.0.9".into(),
            network_ip: Some("10.0.0.1".into()),
        }
    }

    fn join(state: &mut HostState, conn_id: &str, op_id: &str) {
        dispatch(
            state,
            &ctx(conn_id),
            ClientCommand::JoinSyndicate {
                op_id: op_id.into(),
                active_task_count: 0,
            },
            1000,
        );
    }

    fn targeted<'a>(out: &'a [Outbound], conn: &str) -> Vec<&'a ServerEvent> {
        out.iter()
            .filter_map(|o| match o {
                Outbound::To(c, ev) if c == conn => Some(ev),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn join_is_sticky_and_registers_the_node() {
        let mut s = HostState::new(Limits::default());
        join(&mut s, "conn-a", "alpha");
        assert_eq!(s.mode, HostMode::Syndicate);
        assert_eq!(s.nodes["conn-a"].op_id, "ALPHA");
    }

    #[test]
    fn delegation_to_offline_target_is_rejected_to_sender_only() {
        let mut s = HostState::new(Limits::default());
        join(&mut s, "conn-a", "ALPHA");
        let out = dispatch(
            &mut s,
            &ctx("conn-a"),
            ClientCommand::DelegateDirective {
                target_op_id: "charlie".into(),
                text: "ship report".into(),
                handler: "ALPHA".into(),
            },
            2000,
        );
        let to_sender = targeted(&out, "conn-a");
        assert_eq!(to_sender.len(), 1);
        match to_sender[0] {
            ServerEvent::DelegationRejected(msg) => {
                assert!(msg.contains("NOT FOUND"), "got: {}", msg);
                assert!(msg.contains("CHARLIE"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(s.tasks.is_empty());
    }

    #[test]
    fn delegation_to_full_target_is_rejected() {
        let mut s = HostState::new(Limits::default());
        join(&mut s, "conn-a", "ALPHA");
        join(&mut s, "conn-b", "BRAVO");
        for i in 0..5 {
            s.add_task(&format!("t{}", i), Some("BRAVO"), None, true, 1000 + i);
        }
        let out = dispatch(
            &mut s,
            &ctx("conn-a"),
            ClientCommand::DelegateDirective {
                target_op_id: "BRAVO".into(),
                text: "one more".into(),
                handler: "ALPHA".into(),
            },
            2000,
        );
        match targeted(&out, "conn-a")[0] {
            ServerEvent::DelegationRejected(msg) => {
                assert!(msg.contains("MAXIMUM CAPACITY (5/5)"), "got: {}", msg);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn directive_goes_to_target_only_and_is_not_stored() {
        let mut s = HostState::new(Limits::default());
        join(&mut s, "conn-a", "ALPHA");
        join(&mut s, "conn-b", "BRAVO");
        let out = dispatch(
            &mut s,
            &ctx("conn-a"),
            ClientCommand::DelegateDirective {
                target_op_id: "BRAVO".into(),
                text: "ship report".into(),
                handler: "ALPHA".into(),
            },
            2000,
        );
        assert_eq!(out.len(), 1);
        match &out[0] {
            Outbound::To(conn, ServerEvent::IncomingDirective(task)) => {
                assert_eq!(conn, "conn-b");
                assert_eq!(task.owner.as_deref(), Some("BRAVO"));
                assert_eq!(task.handler.as_deref(), Some("ALPHA"));
                assert!(task.syndicate);
            }
            other => panic!("unexpected outbound: {:?}", other),
        }
        assert!(s.tasks.is_empty());
    }

    #[test]
    fn two_key_handshake_end_to_end() {
        let mut s = HostState::new(Limits::default());
        join(&mut s, "conn-a", "ALPHA");
        join(&mut s, "conn-b", "BRAVO");

        // ALPHA delegates, BRAVO accepts.
        let out = dispatch(
            &mut s,
            &ctx("conn-a"),
            ClientCommand::DelegateDirective {
                target_op_id: "BRAVO".into(),
                text: "ship report".into(),
                handler: "ALPHA".into(),
            },
            2000,
        );
        let directive = match &out[0] {
            Outbound::To(_, ServerEvent::IncomingDirective(t)) => t.clone(),
            other => panic!("unexpected outbound: {:?}", other),
        };
        dispatch(
            &mut s,
            &ctx("conn-b"),
            ClientCommand::AcceptDirective(directive.clone()),
            3000,
        );
        assert_eq!(s.nodes["conn-b"].active_task_count, 1);

        // BRAVO requests verification; notice routes to ALPHA.
        let out = dispatch(
            &mut s,
            &ctx("conn-b"),
            ClientCommand::RequestVerification(directive.id.clone()),
            4000,
        );
        assert!(matches!(
            targeted(&out, "conn-a")[0],
            ServerEvent::VerifyRequired(t) if t.status == TaskStatus::PendingVerification
        ));
        assert!(s.tasks[0].completed_at.is_none());

        // ALPHA confirms; BRAVO is notified and freed up.
        let out = dispatch(
            &mut s,
            &ctx("conn-a"),
            ClientCommand::ConfirmKill(directive.id.clone()),
            5000,
        );
        assert!(matches!(
            targeted(&out, "conn-b")[0],
            ServerEvent::KillConfirmed(t) if t.status == TaskStatus::Neutralized
        ));
        assert_eq!(s.tasks[0].completed_at, Some(5000));
        assert_eq!(s.nodes["conn-b"].active_task_count, 0);
        assert_eq!(s.stats.total_completed, 1);
    }

    #[test]
    fn deny_kill_notifies_owner_and_reverts() {
        let mut s = HostState::new(Limits::default());
        join(&mut s, "conn-a", "ALPHA");
        join(&mut s, "conn-b", "BRAVO");
        let t = s
            .add_task("ship report", Some("BRAVO"), Some("ALPHA"), true, 1000)
            .unwrap();
        dispatch(
            &mut s,
            &ctx("conn-b"),
            ClientCommand::RequestVerification(t.id.clone()),
            2000,
        );
        let out = dispatch(&mut s, &ctx("conn-a"), ClientCommand::DenyKill(t.id), 3000);
        assert!(matches!(
            targeted(&out, "conn-b")[0],
            ServerEvent::KillDenied(t) if t.status == TaskStatus::Active
        ));
        assert!(s.tasks[0].completed_at.is_none());
    }

    #[test]
    fn verification_of_unknown_task_is_a_no_op() {
        let mut s = HostState::new(Limits::default());
        join(&mut s, "conn-a", "ALPHA");
        let out = dispatch(
            &mut s,
            &ctx("conn-a"),
            ClientCommand::RequestVerification("no-such-task".into()),
            2000,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn update_state_broadcasts_to_everyone_but_the_sender() {
        let mut s = HostState::new(Limits::default());
        join(&mut s, "conn-a", "ALPHA");
        let update = ClientUpdate {
            tasks: vec![],
            stats: Stats {
                total_completed: 4,
                ..Stats::default()
            },
            last_burn_time: 0,
            syndicate_mode: true,
        };
        let out = dispatch(
            &mut s,
            &ctx("conn-a"),
            ClientCommand::UpdateState(update),
            2000,
        );
        assert!(out.iter().any(|o| matches!(
            o,
            Outbound::BroadcastExcept(c, ServerEvent::SyncState(_)) if c == "conn-a"
        )));
        assert_eq!(s.stats.total_completed, 4);
    }

    #[test]
    fn syndicate_burn_wipes_everything_and_orders_the_kill() {
        let mut s = HostState::new(Limits::default());
        join(&mut s, "conn-a", "ALPHA");
        s.add_task("doomed", Some("ALPHA"), None, true, 1000);
        s.squad_integrity = 1;
        let out = dispatch(
            &mut s,
            &ctx("conn-a"),
            ClientCommand::InitiateBurn {
                reason: Some("compromised".into()),
                syndicate_mode: true,
                op_id: Some("ALPHA".into()),
            },
            9000,
        );
        // The caller executed locally; only the others hear the order.
        assert!(out.iter().any(|o| matches!(
            o,
            Outbound::BroadcastExcept(skip, ServerEvent::ExecuteKill(Some(r)))
                if skip == "conn-a" && r == "compromised"
        )));
        assert!(out.iter().all(|o| !matches!(o, Outbound::Broadcast(_))));
        assert!(s.tasks.is_empty());
        assert_eq!(s.last_burn_time, 9000);
        // A voluntary wipe is not amnesty; integrity stays where it was.
        assert_eq!(s.squad_integrity, 1);
    }

    #[test]
    fn lone_wolf_burn_only_clears_the_caller() {
        let mut s = HostState::new(Limits::default());
        join(&mut s, "conn-a", "ALPHA");
        s.add_task("mine", Some("ALPHA"), None, false, 1000);
        s.add_task("theirs", Some("BRAVO"), None, false, 1000);
        dispatch(
            &mut s,
            &ctx("conn-a"),
            ClientCommand::InitiateBurn {
                reason: None,
                syndicate_mode: false,
                op_id: Some("ALPHA".into()),
            },
            9000,
        );
        assert_eq!(s.tasks.len(), 1);
        assert_eq!(s.tasks[0].owner.as_deref(), Some("BRAVO"));
    }

    #[test]
    fn disconnect_removes_the_node_and_updates_presence() {
        let mut s = HostState::new(Limits::default());
        join(&mut s, "conn-a", "ALPHA");
        join(&mut s, "conn-b", "BRAVO");
        let out = handle_disconnect(&mut s, &ctx("conn-a"));
        assert!(!s.nodes.contains_key("conn-a"));
        assert!(out.iter().any(|o| matches!(
            o,
            Outbound::Broadcast(ServerEvent::NodeStatus { active_nodes: 1, .. })
        )));
    }

    #[test]
    fn commands_deserialize_from_the_tagged_wire_form() {
        let json = r#"{"event":"join_syndicate","data":{"opId":"alpha","activeTaskCount":2}}"#;
        let cmd: ClientCommand = serde_json::from_str(json).unwrap();
        assert!(matches!(
            cmd,
            ClientCommand::JoinSyndicate { op_id, active_task_count: 2 } if op_id == "alpha"
        ));

        let json = r#"{"event":"confirm_kill","data":"task-9"}"#;
        let cmd: ClientCommand = serde_json::from_str(json).unwrap();
        assert!(matches!(cmd, ClientCommand::ConfirmKill(id) if id == "task-9"));
    }
}
