//! Reconnecting websocket client for the CAN bridge.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as TMessage;
use tracing::{error, info, warn};

use crate::protocol::{Command, TelemetrySnapshot, parse_frame};

pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LinkStatus {
    Connected { url: String },
    Disconnected { reason: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum BridgeEvent {
    Link(LinkStatus),
    Telemetry(TelemetrySnapshot),
}

type BridgeStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Keep a link to the bridge at `url` open until the rig goes away.
///
/// Commands arriving while the link is down are dropped, never replayed later.
pub async fn run_bridge_client(
    url: String,
    events: mpsc::Sender<BridgeEvent>,
    mut commands: mpsc::Receiver<Command>,
) {
    loop {
        info!("connecting to bridge: {url}");
        let reason = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws_stream, _response)) => {
                drop_pending(&mut commands);
                info!("connected to bridge");
                let connected = LinkStatus::Connected { url: url.clone() };
                if events.send(BridgeEvent::Link(connected)).await.is_err() {
                    return;
                }
                match run_bridge_session(ws_stream, &events, &mut commands).await {
                    Some(reason) => {
                        warn!("disconnected from bridge ({reason}), reconnecting in {RECONNECT_DELAY:?}");
                        reason
                    }
                    None => return,
                }
            }
            Err(err) => {
                warn!("failed to connect to bridge: {err}, retrying in {RECONNECT_DELAY:?}");
                err.to_string()
            }
        };
        let down = LinkStatus::Disconnected { reason };
        if events.send(BridgeEvent::Link(down)).await.is_err() {
            return;
        }
        if !wait_out_reconnect_delay(&mut commands).await {
            return;
        }
    }
}

fn drop_pending(commands: &mut mpsc::Receiver<Command>) {
    while let Ok(command) = commands.try_recv() {
        warn!("bridge link was down, dropping {command:?}");
    }
}

/// Sleep through the reconnect delay, discarding commands. False once the rig has
/// stopped sending commands altogether.
async fn wait_out_reconnect_delay(commands: &mut mpsc::Receiver<Command>) -> bool {
    let delay = tokio::time::sleep(RECONNECT_DELAY);
    tokio::pin!(delay);
    loop {
        tokio::select! {
            _ = &mut delay => return true,
            command = commands.recv() => match command {
                Some(command) => warn!("bridge link is down, dropping {command:?}"),
                None => return false,
            },
        }
    }
}

/// Pump one connected session. Returns why it ended, or `None` when the rig side
/// has shut down.
async fn run_bridge_session(
    ws_stream: BridgeStream,
    events: &mpsc::Sender<BridgeEvent>,
    commands: &mut mpsc::Receiver<Command>,
) -> Option<String> {
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    loop {
        tokio::select! {
            msg_opt = ws_rx.next() => {
                match msg_opt {
                    Some(Ok(TMessage::Text(text))) => match parse_frame(text.as_str()) {
                        Ok(Some(snapshot)) => {
                            if events.send(BridgeEvent::Telemetry(snapshot)).await.is_err() {
                                return None;
                            }
                        }
                        Ok(None) => {}
                        Err(err) => warn!("dropping bridge frame: {err}"),
                    },
                    Some(Ok(TMessage::Close(_))) | None => {
                        return Some("connection closed by bridge".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Some(format!("websocket error: {err}")),
                }
            }
            command = commands.recv() => {
                let command = command?;
                let json = match serde_json::to_string(&command) {
                    Ok(json) => json,
                    Err(err) => {
                        error!("failed to serialize command {command:?}: {err}");
                        continue;
                    }
                };
                if let Err(err) = ws_tx.send(TMessage::Text(json.into())).await {
                    warn!("failed to send {command:?}: {err}");
                    return Some(format!("send failed: {err}"));
                }
            }
        }
    }
}
