use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use hawkeye_proto::Batch;
use metrics::counter;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::registry::SessionRegistry;
use crate::session::ClientSink;
use crate::AppState;

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.registry.clone()))
}

async fn handle_socket(socket: WebSocket, registry: SessionRegistry) {
    let connection_id = Uuid::new_v4();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (sink, mut outbound) = ClientSink::channel(connection_id);
    info!(connection_id = %connection_id, "client connected");

    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        debug!(connection_id = %connection_id, "writer task finished");
    });

    if let Err(err) = registry.get_or_create(connection_id, &sink) {
        error!(connection_id = %connection_id, error = %err, "failed to start session");
    }

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => relay_frame(&registry, connection_id, &sink, &text),
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => relay_frame(&registry, connection_id, &sink, text),
                Err(_) => {
                    warn!(connection_id = %connection_id, "dropping non-utf8 binary frame");
                }
            },
            Ok(Message::Close(frame)) => {
                info!(
                    connection_id = %connection_id,
                    reason = ?frame.map(|f| f.reason.to_string()),
                    "client closed websocket"
                );
                break;
            }
            Ok(_) => continue,
            Err(err) => {
                warn!(connection_id = %connection_id, error = %err, "error receiving message");
                break;
            }
        }
    }

    if let Err(err) = registry.remove(&connection_id).await {
        error!(connection_id = %connection_id, error = %err, "session teardown failed");
    }
    writer.abort();
    info!(connection_id = %connection_id, "client disconnected");
}

/// Parses one client frame and hands it to the session. A frame that does
/// not parse is dropped whole and the connection stays open.
fn relay_frame(registry: &SessionRegistry, connection_id: Uuid, sink: &ClientSink, text: &str) {
    let batch = match Batch::from_json(text) {
        Ok(batch) => batch,
        Err(err) => {
            counter!("hawkeye_malformed_batches_total", 1);
            error!(connection_id = %connection_id, error = %err, "dropping malformed batch");
            return;
        }
    };

    let session = match registry.get_or_create(connection_id, sink) {
        Ok(session) => session,
        Err(err) => {
            error!(connection_id = %connection_id, error = %err, "no session for command");
            return;
        }
    };
    if let Err(err) = session.submit(batch) {
        warn!(connection_id = %connection_id, error = %err, "command not relayed");
    }
}
