//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::EngineError;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// WebSocket upgrade handler. Viewers are anonymous.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let session_id = Uuid::new_v4();
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, session_id: Uuid, state: AppState) {
    info!(session_id = %session_id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        session_id,
        instance_id: state.instance_id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(session_id = %session_id, error = %e, "Failed to send welcome");
        return;
    }

    run_session(session_id, state, ws_sink, ws_stream).await;

    info!(session_id = %session_id, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    session_id: Uuid,
    state: AppState,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
) {
    // Direct replies from the reader (pongs, acks, errors)
    let (reply_tx, mut reply_rx) = mpsc::channel::<ServerMsg>(32);

    // Spawn writer task: mirrored changes and replies -> WebSocket
    let writer_state = state.clone();
    let writer_handle = tokio::spawn(async move {
        let mut mirror = writer_state.mirror.clone();
        let mut summary = writer_state.vote_feed.summary.clone();
        let mut driver = writer_state.driver.clone();

        let initial = ServerMsg::Snapshot(writer_state.snapshot());
        if send_msg(&mut ws_sink, &initial).await.is_err() {
            return;
        }

        loop {
            let msg = tokio::select! {
                _ = mirror.changed() => ServerMsg::Snapshot(writer_state.snapshot()),
                changed = summary.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    ServerMsg::Snapshot(writer_state.snapshot())
                }
                changed = driver.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    ServerMsg::Snapshot(writer_state.snapshot())
                }
                reply = reply_rx.recv() => match reply {
                    Some(reply) => reply,
                    None => break,
                },
            };

            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(session_id = %session_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // Reader loop: WebSocket -> commands
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let reply = match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => handle_client_msg(&state, client_msg).await,
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "Failed to parse client message");
                        Some(ServerMsg::error("bad_message", e))
                    }
                };
                if let Some(reply) = reply {
                    if reply_tx.send(reply).await.is_err() {
                        debug!(session_id = %session_id, "Writer gone");
                        break;
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(session_id = %session_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(session_id = %session_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Apply one client command, returning the direct reply if any
async fn handle_client_msg(state: &AppState, msg: ClientMsg) -> Option<ServerMsg> {
    match msg {
        ClientMsg::Vote { direction } => match state.votes.cast_vote(direction).await {
            Ok(count) => Some(ServerMsg::VoteAccepted { direction, count }),
            Err(e) => {
                warn!(error = %e, "Vote not counted");
                Some(ServerMsg::error("not_synchronized", e))
            }
        },
        ClientMsg::TogglePause => state.engine.toggle_pause().await.err().map(engine_error),
        ClientMsg::Reset => state.engine.reset().await.err().map(engine_error),
        ClientMsg::Ping { t } => Some(ServerMsg::Pong { t }),
    }
}

fn engine_error(e: EngineError) -> ServerMsg {
    let code = match &e {
        EngineError::NotDriver => "not_driver",
        EngineError::NotSynchronized(_) => "not_synchronized",
        EngineError::Stopped => "stopped",
    };
    ServerMsg::error(code, e)
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
