use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

use crate::reconcile::RigSnapshot;
use crate::rig::{RigHandle, ViewEvent, ViewRequest};

#[derive(Clone)]
pub struct AppState {
    pub rig: RigHandle,
}

pub fn router(rig: RigHandle) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/rig/state", get(rig_state_handler))
        .route("/api/rig/ws", get(ws_rig_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(AppState { rig })
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn rig_state_handler(State(state): State<AppState>) -> Json<RigSnapshot> {
    Json(state.rig.snapshot())
}

async fn ws_rig_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_rig_socket(socket, state))
}

async fn handle_rig_socket(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut rx = state.rig.subscribe();

    let greeting = [
        ViewEvent::Link {
            status: state.rig.link_status(),
        },
        ViewEvent::Snapshot {
            snapshot: state.rig.snapshot(),
        },
    ];
    for event in greeting {
        if send_view_event(&mut ws_tx, event).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ViewRequest>(&text) {
                    Ok(request) => {
                        if let Err(err) = state.rig.request(request).await {
                            error!("{err}");
                            break;
                        }
                    }
                    Err(err) => warn!("ignoring view request: {err}"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    info!("rig websocket closed: {err}");
                    break;
                }
            },
            event = rx.recv() => match event {
                Ok(event) => {
                    if send_view_event(&mut ws_tx, event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("rig websocket lagged by {skipped} events");
                    let snapshot = state.rig.snapshot();
                    let event = ViewEvent::Snapshot { snapshot };
                    if send_view_event(&mut ws_tx, event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

async fn send_view_event(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    event: ViewEvent,
) -> Result<(), ()> {
    let text = match serde_json::to_string(&event) {
        Ok(value) => value,
        Err(err) => {
            error!("failed to serialize view event: {err}");
            return Err(());
        }
    };
    ws_tx
        .send(Message::Text(text.into()))
        .await
        .map_err(|err| debug!("view socket gone: {err}"))
}
