//! WebSocket transport and read-only HTTP API.
//!
//! `/ws` upgrades into the relay: each socket gets a slot in the
//! [`ConnectionTable`](crate::transport::ConnectionTable) and its frames are
//! fed to the session controller. Everything else is read-only.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::lifecycle::ConnectionEvent;
use crate::protocol::ClientEvent;
use crate::registry::ConnId;
use crate::server::SharedState;

/// How long a single frame write may take before the client is dropped.
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

pub fn router(state: Arc<SharedState>) -> Router {
    let mut app = Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/api/stats", get(api_stats))
        .route("/api/health", get(api_health))
        .layer(cors_layer(&state.config.cors_origins));

    // Serve the static web client if the directory exists
    let dir = std::path::PathBuf::from(&state.config.static_dir);
    if dir.exists() {
        tracing::info!("Serving web client from {}", dir.display());
        let index_path = dir.join("index.html");
        let serve = tower_http::services::ServeDir::new(&dir)
            .append_index_html_on_directories(true)
            .fallback(tower_http::services::ServeFile::new(index_path));
        app = app.fallback_service(serve);
    } else {
        tracing::warn!("Static dir not found: {}", dir.display());
    }

    app.with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    use axum::http::{Method, header};
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    layer.allow_origin(AllowOrigin::list(origins.iter().filter_map(|o| {
        match o.parse() {
            Ok(origin) => Some(origin),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {o}");
                None
            }
        }
    })))
}

// ── WebSocket handler ──────────────────────────────────────────────────

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<SharedState>>) -> impl IntoResponse {
    // Oversized frames fail the read instead of being buffered first.
    let limit = state.config.max_frame_len;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(mut socket: WebSocket, state: Arc<SharedState>) {
    let (conn, mut outbound) = state.connections.open();
    state.controller.handle(ConnectionEvent::Connect(conn));

    let silence_limit = state.config.silence_limit();
    let mut heartbeat = tokio::time::interval(state.config.ping_interval());
    heartbeat.tick().await; // skip first immediate tick
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                if matches!(incoming, Some(Ok(_))) {
                    last_activity = Instant::now();
                }
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => handle_frame(&state, conn, text.as_str()),
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    // Pings are answered by axum and pongs only count as activity;
                    // binary frames are not part of the protocol.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(%conn, "WebSocket read error: {e}");
                        break;
                    }
                }
            },
            event = outbound.recv() => {
                let Some(event) = event else { break };
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(%conn, event = event.name(), "Failed to encode event: {e}");
                        continue;
                    }
                };
                if !send_frame(&mut socket, conn, WsMessage::Text(json.into())).await {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if last_activity.elapsed() > silence_limit {
                    tracing::info!(%conn, "Ping timeout");
                    break;
                }
                if !send_frame(&mut socket, conn, WsMessage::Ping(Default::default())).await {
                    break;
                }
            }
        }
    }

    state.connections.close(conn);
    state.controller.handle(ConnectionEvent::Disconnect(conn));
    tracing::debug!(%conn, "Connection closed");
}

/// Write one frame. Returns false when the connection should be dropped.
async fn send_frame(socket: &mut WebSocket, conn: ConnId, frame: WsMessage) -> bool {
    match tokio::time::timeout(SEND_TIMEOUT, socket.send(frame)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!(%conn, "WebSocket write error: {e}");
            false
        }
        Err(_) => {
            tracing::warn!(%conn, "WebSocket write timed out");
            false
        }
    }
}

fn handle_frame(state: &SharedState, conn: ConnId, text: &str) {
    match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => state.controller.handle(ConnectionEvent::Message(conn, event)),
        Err(e) => tracing::debug!(%conn, "Malformed frame ignored: {e}"),
    }
}

// ── REST types ─────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    connected_users: usize,
    users: Vec<StatsUser>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsUser {
    username: String,
    join_time: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    connections: usize,
    uptime_secs: u64,
}

// ── REST handlers ──────────────────────────────────────────────────────

async fn api_stats(State(state): State<Arc<SharedState>>) -> Json<StatsResponse> {
    let users: Vec<StatsUser> = state
        .registry()
        .snapshot()
        .into_iter()
        .map(|u| StatsUser {
            username: u.name,
            join_time: u.join_time,
        })
        .collect();
    Json(StatsResponse {
        connected_users: users.len(),
        users,
    })
}

async fn api_health(State(state): State<Arc<SharedState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connections: state.connections.len(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}
