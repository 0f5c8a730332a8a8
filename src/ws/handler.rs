//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::GameHandle;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Per-connection outbound queue; a client this far behind loses messages
const OUTBOUND_BUFFER: usize = 64;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.game))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, game: GameHandle) {
    let connection_id = Uuid::new_v4();
    info!(connection_id = %connection_id, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel::<ServerMsg>(OUTBOUND_BUFFER);

    if let Err(e) = game.connect(connection_id, outbound_tx.clone()).await {
        error!(connection_id = %connection_id, error = %e, "Failed to register connection");
        return;
    }

    run_session(connection_id, &game, ws_sink, ws_stream, outbound_tx, outbound_rx).await;

    // Cleanup on disconnect
    if let Err(e) = game.disconnect(connection_id).await {
        debug!(connection_id = %connection_id, error = %e, "Disconnect after loop shutdown");
    }

    info!(connection_id = %connection_id, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session<S, R>(
    connection_id: Uuid,
    game: &GameHandle,
    mut ws_sink: S,
    mut ws_stream: R,
    outbound_tx: mpsc::Sender<ServerMsg>,
    mut outbound_rx: mpsc::Receiver<ServerMsg>,
) where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    // Spawn writer task: outbound queue -> WebSocket
    let mut writer_handle = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(connection_id = %connection_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // Reader loop: WebSocket -> simulation loop
    let reader = async {
        while let Some(result) = ws_stream.next().await {
            match result {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(ClientMsg::PlayerInput { input }) => {
                        if game.input(connection_id, input).await.is_err() {
                            debug!(connection_id = %connection_id, "Simulation loop closed");
                            break;
                        }
                    }
                    Ok(ClientMsg::Ping { timestamp }) => {
                        // Answered here; latency probes never touch the simulation
                        if outbound_tx.try_send(ServerMsg::Pong { timestamp }).is_err() {
                            debug!(connection_id = %connection_id, "Outbound queue full, pong dropped");
                        }
                    }
                    Err(e) => {
                        debug!(connection_id = %connection_id, error = %e, "Ignoring unparseable message");
                    }
                },
                Ok(Message::Binary(_)) => {
                    warn!(connection_id = %connection_id, "Received binary message, ignoring");
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => {
                    info!(connection_id = %connection_id, "Client initiated close");
                    break;
                }
                Err(e) => {
                    error!(connection_id = %connection_id, error = %e, "WebSocket error");
                    break;
                }
            }
        }
    };

    // Either half ending ends the session
    tokio::select! {
        _ = reader => {}
        _ = &mut writer_handle => {
            debug!(connection_id = %connection_id, "Writer stopped, closing session");
        }
    }

    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg<S>(sink: &mut S, msg: &ServerMsg) -> Result<(), String>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
