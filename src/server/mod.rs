//! Network transports: one WebSocket endpoint for the live protocol and
//! a small HTTP surface for stateless tooling.

mod http;
mod ws;

use crate::host::HostHandle;
use anyhow::{Context, Result};
use axum::routing::{any, get, post};
use axum::Router;
use std::net::SocketAddr;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub host: HostHandle,
    pub port: u16,
    pub network_ip: Option<String>,
    pub started: Instant,
    pub max_tasks: i32,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", any(ws::ws_handler))
        .route("/healthz", get(http::healthz))
        .route("/api/discovery", get(http::discovery))
        .route("/api/state", get(http::state_snapshot))
        .route("/api/tasks", get(http::list_tasks).post(http::create_task))
        .route("/api/tasks/{id}/complete", post(http::complete_task))
        .route("/api/tasks/{id}/delete", post(http::delete_task))
        .route("/api/shutdown", post(http::shutdown))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, bind: &str) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", bind, state.port)
        .parse()
        .context("parsing bind address")?;
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")
}
