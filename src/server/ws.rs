//! WebSocket endpoint: one connection per node.
//!
//! Each connection gets a fresh id and an unbounded event queue. The
//! socket task only shuttles frames; every decision happens in the host
//! actor.

use super::AppState;
use crate::host::HostCommand;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::debug;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(app): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, app))
}

async fn handle_socket(socket: WebSocket, addr: SocketAddr, app: AppState) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    if app
        .host
        .send(HostCommand::Attach {
            conn_id: conn_id.clone(),
            ip: addr.ip().to_string(),
            tx: event_tx,
        })
        .await
        .is_err()
    {
        return;
    }

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let Ok(frame) = serde_json::to_string(&event) else { continue };
                if sink.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str(&text) {
                            Ok(cmd) => {
                                if app
                                    .host
                                    .send(HostCommand::Client {
                                        conn_id: conn_id.clone(),
                                        cmd,
                                    })
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            Err(err) => {
                                // Unknown frames are dropped, never fatal.
                                debug!(%conn_id, "unparseable frame: {}", err);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(%conn_id, "socket error: {}", err);
                        break;
                    }
                }
            }
        }
    }

    let _ = app.host.send(HostCommand::Detach { conn_id }).await;
}
