//! Host actor: owns `HostState` and serializes every mutation.
//!
//! All transports talk to the actor over a command channel, so one
//! logical thread processes one event at a time to completion. Timer
//! ticks (decay sweep, expiry warnings, coprocessor probe, handler
//! sitreps) run as arms of the same select loop and therefore never
//! interleave with connection events mid-mutation.

use crate::config::Config;
use crate::coprocessor::CoprocessorMonitor;
use crate::protocol::{
    dispatch, handle_disconnect, ClientCommand, ConnCtx, Outbound, ServerEvent,
};
use crate::store::{now_ms, CompleteOutcome, HostState};
use crate::sweep::{expiry_warnings, run_decay_sweep};
use crate::types::Task;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// Commands accepted by the host actor.
pub enum HostCommand {
    Attach {
        conn_id: String,
        ip: String,
        tx: mpsc::UnboundedSender<ServerEvent>,
    },
    Detach {
        conn_id: String,
    },
    Client {
        conn_id: String,
        cmd: ClientCommand,
    },
    Snapshot {
        reply: oneshot::Sender<HostState>,
    },
    CreateTask {
        text: String,
        owner: Option<String>,
        handler: Option<String>,
        syndicate: bool,
        reply: oneshot::Sender<Option<Task>>,
    },
    CompleteTask {
        task_id: String,
        reply: oneshot::Sender<CompleteOutcome>,
    },
    DeleteTask {
        task_id: String,
        reply: oneshot::Sender<Option<Task>>,
    },
    Shutdown {
        reason: String,
    },
}

/// Cloneable handle used by the HTTP and WebSocket layers.
#[derive(Clone)]
pub struct HostHandle {
    tx: mpsc::Sender<HostCommand>,
}

impl HostHandle {
    pub async fn send(&self, cmd: HostCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| anyhow!("host actor is gone"))
    }

    pub async fn snapshot(&self) -> Result<HostState> {
        let (reply, rx) = oneshot::channel();
        self.send(HostCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| anyhow!("host actor dropped the reply"))
    }

    pub async fn create_task(
        &self,
        text: String,
        owner: Option<String>,
        handler: Option<String>,
        syndicate: bool,
    ) -> Result<Option<Task>> {
        let (reply, rx) = oneshot::channel();
        self.send(HostCommand::CreateTask {
            text,
            owner,
            handler,
            syndicate,
            reply,
        })
        .await?;
        rx.await.map_err(|_| anyhow!("host actor dropped the reply"))
    }

    pub async fn complete_task(&self, task_id: String) -> Result<CompleteOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(HostCommand::CompleteTask { task_id, reply }).await?;
        rx.await.map_err(|_| anyhow!("host actor dropped the reply"))
    }

    pub async fn delete_task(&self, task_id: String) -> Result<Option<Task>> {
        let (reply, rx) = oneshot::channel();
        self.send(HostCommand::DeleteTask { task_id, reply }).await?;
        rx.await.map_err(|_| anyhow!("host actor dropped the reply"))
    }
}

struct Connection {
    ip: String,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

/// The actor itself. Construct with [`Host::spawn`].
pub struct Host {
    state: HostState,
    conns: HashMap<String, Connection>,
    monitor: CoprocessorMonitor,
    coprocessor_enabled: bool,
    network_ip: Option<String>,
    shutdown_grace: Duration,
    rx: mpsc::Receiver<HostCommand>,
    config: Config,
}

impl Host {
    /// Spawn the actor task and return its handle.
    pub fn spawn(config: Config, network_ip: Option<String>) -> HostHandle {
        let (tx, rx) = mpsc::channel(256);
        let host = Host {
            state: HostState::new(config.limits()),
            conns: HashMap::new(),
            monitor: CoprocessorMonitor::new(config.coprocessor.base_url.clone()),
            coprocessor_enabled: config.coprocessor.enabled,
            network_ip,
            shutdown_grace: Duration::from_millis(config.server.shutdown_grace_ms),
            rx,
            config,
        };
        tokio::spawn(host.run());
        HostHandle { tx }
    }

    async fn run(mut self) {
        let mut sweep = interval(self.config.protocol.sweep_interval_secs);
        let mut calls = interval(self.config.protocol.call_check_interval_secs);
        let mut probe = interval(self.config.coprocessor.probe_interval_secs);
        let mut sitrep = interval(self.config.coprocessor.sitrep_interval_secs);

        loop {
            tokio::select! {
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle(cmd).await,
                        None => break,
                    }
                }
                _ = sweep.tick() => {
                    let out = run_decay_sweep(&mut self.state, now_ms());
                    self.route(out);
                }
                _ = calls.tick() => {
                    let out = expiry_warnings(&mut self.state, now_ms());
                    self.route(out);
                }
                _ = probe.tick(), if self.coprocessor_enabled => {
                    if let Some(status) = self.monitor.probe().await {
                        info!(active = status.active, models = status.model_count,
                              "coprocessor status changed");
                        self.route(vec![Outbound::Broadcast(
                            ServerEvent::CoprocessorStatus(status),
                        )]);
                    }
                }
                _ = sitrep.tick(), if self.coprocessor_enabled => {
                    if !self.conns.is_empty() {
                        if let Some((text, is_ai)) = self.monitor.sitrep(&self.state.tasks).await {
                            self.route(vec![Outbound::Broadcast(ServerEvent::HandlerMessage {
                                text,
                                timestamp: now_ms(),
                                is_ai,
                            })]);
                        }
                    }
                }
            }
        }
    }

    fn ctx(&self, conn_id: &str) -> ConnCtx {
        ConnCtx {
            conn_id: conn_id.to_string(),
            ip: self
                .conns
                .get(conn_id)
                .map(|c| c.ip.clone())
                .unwrap_or_default(),
            network_ip: self.network_ip.clone(),
        }
    }

    async fn handle(&mut self, cmd: HostCommand) {
        match cmd {
            HostCommand::Attach { conn_id, ip, tx } => {
                info!(%conn_id, %ip, "node connected");
                // The new connection gets the full picture immediately;
                // everyone else just sees the presence count change.
                let _ = tx.send(ServerEvent::SyncState(self.state.clone()));
                let _ = tx.send(ServerEvent::CoprocessorStatus(self.monitor.status()));
                self.conns.insert(conn_id.clone(), Connection { ip, tx });
                let ctx = self.ctx(&conn_id);
                self.route(vec![
                    Outbound::Broadcast(ServerEvent::NodeStatus {
                        online: true,
                        active_nodes: self.state.nodes.len(),
                        network_ip: ctx.network_ip,
                    }),
                    Outbound::Broadcast(ServerEvent::SquadUpdate(self.state.squad())),
                ]);
            }
            HostCommand::Detach { conn_id } => {
                info!(%conn_id, "node disconnected");
                let ctx = self.ctx(&conn_id);
                self.conns.remove(&conn_id);
                let out = handle_disconnect(&mut self.state, &ctx);
                self.route(out);
            }
            HostCommand::Client { conn_id, cmd } => {
                if matches!(cmd, ClientCommand::TerminateHostProcess) {
                    self.shutdown("operator terminated the host").await;
                    return;
                }
                let ctx = self.ctx(&conn_id);
                let out = dispatch(&mut self.state, &ctx, cmd, now_ms());
                self.route(out);
            }
            HostCommand::Snapshot { reply } => {
                let _ = reply.send(self.state.clone());
            }
            HostCommand::CreateTask {
                text,
                owner,
                handler,
                syndicate,
                reply,
            } => {
                let created = self.state.add_task(
                    &text,
                    owner.as_deref(),
                    handler.as_deref(),
                    syndicate,
                    now_ms(),
                );
                if created.is_some() {
                    self.route(vec![
                        Outbound::Broadcast(ServerEvent::SyncState(self.state.clone())),
                        Outbound::Broadcast(ServerEvent::SquadUpdate(self.state.squad())),
                    ]);
                }
                let _ = reply.send(created);
            }
            HostCommand::CompleteTask { task_id, reply } => {
                let outcome = self.state.complete_task(&task_id, now_ms());
                match &outcome {
                    CompleteOutcome::Completed(_) => {
                        self.state.stats.total_completed += 1;
                        self.route(vec![
                            Outbound::Broadcast(ServerEvent::SyncState(self.state.clone())),
                            Outbound::Broadcast(ServerEvent::SquadUpdate(self.state.squad())),
                        ]);
                    }
                    CompleteOutcome::VerificationRequired(task) => {
                        let mut out = Vec::new();
                        if let Some(node) = task
                            .handler
                            .as_deref()
                            .and_then(|h| self.state.find_node_by_op(h))
                        {
                            out.push(Outbound::To(
                                node.socket_id.clone(),
                                ServerEvent::VerifyRequired(task.clone()),
                            ));
                        }
                        out.push(Outbound::Broadcast(ServerEvent::SyncState(
                            self.state.clone(),
                        )));
                        self.route(out);
                    }
                    CompleteOutcome::NotFound => {}
                }
                let _ = reply.send(outcome);
            }
            HostCommand::DeleteTask { task_id, reply } => {
                let deleted = self.state.delete_task(&task_id, now_ms());
                if deleted.is_some() {
                    self.route(vec![
                        Outbound::Broadcast(ServerEvent::SyncState(self.state.clone())),
                        Outbound::Broadcast(ServerEvent::SquadUpdate(self.state.squad())),
                    ]);
                }
                let _ = reply.send(deleted);
            }
            HostCommand::Shutdown { reason } => {
                self.shutdown(&reason).await;
            }
        }
    }

    async fn shutdown(&mut self, reason: &str) {
        warn!(%reason, "host terminating");
        self.route(vec![Outbound::Broadcast(ServerEvent::HostTerminating {
            reason: reason.to_string(),
            timestamp: now_ms(),
        })]);
        // Grace period so connected clients can render the notice.
        tokio::time::sleep(self.shutdown_grace).await;
        std::process::exit(0);
    }

    fn route(&mut self, out: Vec<Outbound>) {
        let mut dead: Vec<String> = Vec::new();
        for item in out {
            match item {
                Outbound::Broadcast(ev) => {
                    for (id, conn) in &self.conns {
                        if conn.tx.send(ev.clone()).is_err() {
                            dead.push(id.clone());
                        }
                    }
                }
                Outbound::BroadcastExcept(skip, ev) => {
                    for (id, conn) in &self.conns {
                        if *id == skip {
                            continue;
                        }
                        if conn.tx.send(ev.clone()).is_err() {
                            dead.push(id.clone());
                        }
                    }
                }
                Outbound::To(conn_id, ev) => {
                    if let Some(conn) = self.conns.get(&conn_id) {
                        if conn.tx.send(ev).is_err() {
                            dead.push(conn_id);
                        }
                    }
                }
            }
        }
        for id in dead {
            self.conns.remove(&id);
        }
    }
}

fn interval(secs: u64) -> tokio::time::Interval {
    let mut i = tokio::time::interval(Duration::from_secs(secs.max(1)));
    i.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // Skip the immediate first tick.
    i.reset();
    i
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ServerEvent {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event within a second")
            .expect("channel open")
    }

    #[tokio::test]
    async fn attach_pushes_state_then_broadcasts_presence_and_squad() {
        let mut config = Config::default();
        config.coprocessor.enabled = false;
        let handle = Host::spawn(config, Some("10.0.0.1".into()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        handle
            .send(HostCommand::Attach {
                conn_id: "conn-1".into(),
                ip: "10.0.0.50".into(),
                tx,
            })
            .await
            .unwrap();

        // The new connection gets the full picture first.
        assert!(matches!(next_event(&mut rx).await, ServerEvent::SyncState(_)));
        assert!(matches!(
            next_event(&mut rx).await,
            ServerEvent::CoprocessorStatus(_)
        ));
        // Then the presence broadcasts reach it like everyone else.
        assert!(matches!(
            next_event(&mut rx).await,
            ServerEvent::NodeStatus {
                online: true,
                active_nodes: 0,
                ..
            }
        ));
        assert!(matches!(
            next_event(&mut rx).await,
            ServerEvent::SquadUpdate(nodes) if nodes.is_empty()
        ));
    }
}
