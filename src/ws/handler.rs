//! WebSocket upgrade handler

use std::fmt::Display;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::util::rate_limit::InputRateLimiter;
use crate::ws::registry::{Frame, SessionId};
use crate::ws::session::{Session, SessionError};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4();
    let entity_id = state.config.binding.entity_for(&session_id);
    info!(session_id = %session_id, entity_id = %entity_id, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(state.config.outbound_queue.max(1));

    // Initial snapshot goes into the queue ahead of any tick broadcast
    if state.config.send_initial_snapshot {
        match state.snapshots.encode(state.current_tick(), &state.world) {
            Ok(frame) => {
                let _ = outbound_tx.try_send(frame);
            }
            Err(e) => error!(session_id = %session_id, error = %e, "Failed to encode initial snapshot"),
        }
    }

    let mut session = Session::new(
        session_id,
        entity_id,
        state.world.clone(),
        state.registry.clone(),
        InputRateLimiter::new(state.config.input_rate_limit),
    );
    session.open(outbound_tx);

    drive_session(
        session,
        ws_stream,
        ws_sink,
        outbound_rx,
        state.config.send_timeout,
    )
    .await;

    info!(session_id = %session_id, "WebSocket connection closed");
}

/// Run an open session until either side of the socket gives up
async fn drive_session<St, Si>(
    mut session: Session,
    ws_stream: St,
    ws_sink: Si,
    outbound_rx: mpsc::Receiver<Frame>,
    send_timeout: Duration,
) where
    St: Stream<Item = Result<Message, axum::Error>> + Unpin,
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display + Send,
{
    let session_id = session.id();
    let mut writer_handle = tokio::spawn(run_writer(session_id, ws_sink, outbound_rx, send_timeout));

    let writer_done = tokio::select! {
        _ = run_reader(&session, ws_stream) => false,
        _ = &mut writer_handle => {
            debug!(session_id = %session_id, "Writer finished, closing session");
            true
        }
    };

    // Releasing the registry entry drops the queue sender; the writer then
    // flushes what is already queued and closes the socket
    session.close();

    if !writer_done {
        // Queued frames plus the close frame, each bounded by send_timeout
        if timeout(send_timeout * 2, &mut writer_handle).await.is_err() {
            debug!(session_id = %session_id, "Writer did not finish in time, aborting");
            writer_handle.abort();
        }
    }
}

/// Reader loop: WebSocket -> world
async fn run_reader<St>(session: &Session, mut ws_stream: St)
where
    St: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let session_id = session.id();

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => match session.handle_text(&text) {
                Ok(_) => {}
                Err(SessionError::RateLimited) => {
                    warn!(session_id = %session_id, "Rate limited input message");
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Dropping client message");
                }
            },
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
}

/// Writer loop: session queue -> WebSocket, each write bounded by `send_timeout`
async fn run_writer<Si>(
    session_id: SessionId,
    mut ws_sink: Si,
    mut outbound_rx: mpsc::Receiver<Frame>,
    send_timeout: Duration,
) where
    Si: Sink<Message> + Unpin,
    Si::Error: Display + Send,
{
    while let Some(frame) = outbound_rx.recv().await {
        match timeout(send_timeout, ws_sink.send(Message::Text(frame.to_string()))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(session_id = %session_id, error = %e, "WebSocket send failed");
                break;
            }
            Err(_) => {
                warn!(session_id = %session_id, "WebSocket send timed out");
                break;
            }
        }
    }
    let _ = timeout(send_timeout, ws_sink.close()).await;
}
