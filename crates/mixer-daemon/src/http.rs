use crate::core::MixerEvent;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use mixer_proto::protocol::{Command, MixerSnapshot};
use mixer_proto::state::StateManager;
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<MixerEvent>,
}

#[derive(Debug, Serialize)]
struct ChannelInfo {
    idx: usize,
    name: String,
    source: String,
    duration_secs: Option<f64>,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<MixerEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(HttpState {
            state_manager,
            event_tx,
        });

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/channels", get(get_channels))
        .route("/api/select/:idx/:percent", post(select_channel))
        .route("/api/tap/:idx", post(tap_channel))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn get_state(State(state): State<HttpState>) -> Json<MixerSnapshot> {
    Json(state.state_manager.get_state().await)
}

async fn get_channels(State(state): State<HttpState>) -> Json<Vec<ChannelInfo>> {
    let snapshot = state.state_manager.get_state().await;
    let channels = snapshot
        .channels
        .into_iter()
        .map(|c| ChannelInfo {
            idx: c.index,
            name: c.name,
            source: c.source,
            duration_secs: c.duration_secs,
        })
        .collect();
    Json(channels)
}

async fn select_channel(
    State(state): State<HttpState>,
    Path((idx, percent)): Path<(usize, i32)>,
) -> StatusCode {
    let level = (percent as f32 / 100.0).clamp(0.0, 1.0);
    info!("HTTP API: select channel {} at {}%", idx, percent);
    forward(
        &state,
        Command::Select {
            channel_idx: idx,
            level,
        },
    )
    .await
}

async fn tap_channel(State(state): State<HttpState>, Path(idx): Path<usize>) -> StatusCode {
    info!("HTTP API: tap channel {}", idx);
    forward(&state, Command::Tap { channel_idx: idx }).await
}

/// Out-of-range indices are still forwarded; the mixer rejects them.
async fn forward(state: &HttpState, cmd: Command) -> StatusCode {
    if state
        .event_tx
        .send(MixerEvent::ClientCommand(cmd))
        .await
        .is_err()
    {
        error!("Failed to forward command to mixer");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::ACCEPTED
}
