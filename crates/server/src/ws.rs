use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use wsjobd_core::ConnectionId;

use crate::connection::{Connection, Outbound, Outbox};
use crate::dispatch;
use crate::state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let _client = state.clients.enter();
    let (sink, mut stream) = socket.split();
    let (conn, outbox) = Connection::open(state.next_connection_id());
    info!(conn = conn.id(), clients = state.clients.current(), "connection opened");

    // Single writer for this socket: error replies, progress reports, close.
    let mut forward_task = tokio::spawn(forward_outbound(sink, outbox, conn.id()));

    loop {
        tokio::select! {
            _ = &mut forward_task => break,
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if !conn.try_begin_request() {
                        debug!(conn = conn.id(), "request in flight, dropping message");
                        continue;
                    }
                    let raw = text.as_str().to_owned();
                    info!(conn = conn.id(), message = %raw, "received message");
                    state.pool.submit(dispatch::handle_message(
                        state.clone(),
                        Arc::clone(&conn),
                        raw,
                    ));
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(conn = conn.id(), error = %e, "websocket read failed");
                    break;
                }
                // Pong is handled automatically by axum
                Some(Ok(_)) => {}
            },
        }
    }

    // Reporters still holding the handle now see it as closed.
    conn.close();
    forward_task.abort();
    info!(conn = conn.id(), "connection closed");
}

async fn forward_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbox: Outbox,
    conn_id: ConnectionId,
) {
    while let Some(outbound) = outbox.next().await {
        match outbound {
            Outbound::Text(text) => {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!(conn = conn_id, error = %e, "websocket send failed, closing connection");
                    break;
                }
            }
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}
