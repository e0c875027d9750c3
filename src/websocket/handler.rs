use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::server::AppState;

use super::connection::Connection;
use super::message::OutboundFrame;

/// How long the writer may take to flush a queued close after the reader stops
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Why the reader task stopped
enum ReaderExit {
    /// Client sent a close frame
    ClientClosed(Option<u16>),
    /// The connection queued its own close (goodbye)
    LocalClose,
    /// Stream ended or errored
    Gone,
}

/// First non-empty `session_id` query parameter, already URL-decoded.
///
/// Repeated parameters are allowed; later values are ignored.
pub fn session_id_from_params(params: &[(String, String)]) -> Option<String> {
    params
        .iter()
        .find(|(key, _)| key == "session_id")
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
        .cloned()
}

/// WebSocket upgrade handler
#[tracing::instrument(name = "ws.upgrade", skip(ws, state, params))]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let session_id = session_id_from_params(&params);
    tracing::debug!(has_session_id = session_id.is_some(), "WebSocket upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

/// Handle an established WebSocket connection
#[tracing::instrument(name = "ws.connection", skip(socket, state, session_id), fields(otel.kind = "server"))]
async fn handle_socket(socket: WebSocket, state: AppState, session_id: Option<String>) {
    let ctx = &state.connections;
    let (tx, mut rx) = mpsc::channel::<OutboundFrame>(ctx.channel_buffer_size.max(1));
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let accepted = match Connection::connect(ctx, session_id.as_deref(), tx).await {
        Ok(accepted) => accepted,
        Err(e) => {
            tracing::error!(error = %e, "WebSocket connection setup failed");
            let _ = ws_sender
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::ERROR,
                    reason: "Internal error".into(),
                })))
                .await;
            return;
        }
    };
    let connection = accepted.connection;
    let mut events = accepted.events;
    let connection_id = connection.id;

    // Task for writing queued frames to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                OutboundFrame::Message(msg) => {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to serialize message");
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                OutboundFrame::Close { code, reason } => {
                    let _ = ws_sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    return Some(code);
                }
            }
        }
        None
    });

    // Task for reading client frames, one at a time
    let conn = connection.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Close(frame)) => {
                    let code = frame.map(|f| f.code);
                    tracing::debug!(connection_id = %conn.id, close_code = ?code, "Received close frame");
                    return ReaderExit::ClientClosed(code);
                }
                Ok(msg) => {
                    if !process_message(msg, &conn).await {
                        return ReaderExit::LocalClose;
                    }
                }
                Err(e) => {
                    tracing::warn!(connection_id = %conn.id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
        ReaderExit::Gone
    });

    // Task for broadcast events: heartbeats and the shutdown drain
    let conn = connection.clone();
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if !conn.on_event(event).await {
                break;
            }
        }
    });

    let exit_code = tokio::select! {
        sent = &mut send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
            sent.ok().flatten()
        }
        received = &mut recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
            match received {
                Ok(ReaderExit::ClientClosed(code)) => code,
                // A goodbye leaves a reply and a close frame queued
                Ok(ReaderExit::LocalClose) => {
                    match tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut send_task).await {
                        Ok(Ok(code)) => code,
                        _ => None,
                    }
                }
                _ => None,
            }
        }
    };

    recv_task.abort();
    event_task.abort();
    send_task.abort();

    connection.disconnect(exit_code).await;
}

/// Process a received WebSocket message
/// Returns false if the connection should be closed
async fn process_message(msg: Message, connection: &Arc<Connection>) -> bool {
    match msg {
        Message::Text(text) => connection.on_message(text.as_str()).await,
        Message::Binary(bytes) => connection.on_binary(&bytes).await,
        // Axum answers pings itself
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_session_id_first_value_wins() {
        let query = params(&[("session_id", "a"), ("session_id", "b")]);
        assert_eq!(session_id_from_params(&query), Some("a".to_string()));
    }

    #[test]
    fn test_session_id_absent_or_empty() {
        assert_eq!(session_id_from_params(&[]), None);
        assert_eq!(session_id_from_params(&params(&[("other", "x")])), None);
        assert_eq!(session_id_from_params(&params(&[("session_id", "")])), None);
    }
}
