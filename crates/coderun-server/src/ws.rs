//! WebSocket transport for execution sessions.
//!
//! Every accepted socket runs exactly one session. Events flow through a
//! bounded channel into a writer task that owns the sending half of the
//! socket; the receiving half is turned into the stream of client text frames
//! the engine consumes.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use coderun_core::{EventSink, SessionEngine};
use coderun_types::ServerEvent;
use futures_util::future;
use futures_util::sink::SinkExt;
use futures_util::stream::{Stream, StreamExt};

use crate::AppState;

/// Handler for `GET /ws/execute`.
pub async fn execute_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.engine))
}

async fn handle_socket(socket: WebSocket, engine: SessionEngine) {
    let (mut sender, receiver) = socket.split();
    let (events, mut rx) = EventSink::channel(engine.config().event_buffer);

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Some(message) = event_message(&event) else {
                continue;
            };
            if sender.send(message).await.is_err() {
                log::debug!("Client went away, dropping remaining events");
                break;
            }
        }
        // The session is over once its event sink is dropped.
        if let Err(e) = sender.close().await {
            log::debug!("Error closing websocket: {}", e);
        }
    });

    let state = engine.run_session(client_frames(receiver), events).await;
    log::debug!("Session finished in state {}", state);

    if let Err(e) = writer.await {
        log::error!("Websocket writer task failed: {}", e);
    }
}

/// Serialize an event into a text frame.
pub fn event_message(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            log::error!("Failed to serialize event {:?}: {}", event, e);
            None
        }
    }
}

/// Client text frames, in order.
///
/// Binary frames holding UTF-8 count as text. The stream ends at the first
/// close frame; control frames are skipped.
pub fn client_frames<St>(
    receiver: St,
) -> impl Stream<Item = Result<String, axum::Error>> + Unpin + Send
where
    St: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
{
    receiver
        .take_while(|message| future::ready(!matches!(message, Ok(Message::Close(_)))))
        .filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        log::debug!("Ignoring non UTF-8 binary frame ({} bytes)", bytes.len());
                        None
                    }
                },
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Close(_)) => None,
                Err(e) => Some(Err(e)),
            })
        })
}
