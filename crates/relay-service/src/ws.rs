//! WebSocket transport for the relay.
//!
//! Each accepted socket gets a bounded outbound channel and a
//! `ConnectionHandle` wrapping its sender; the handle is what the gateway
//! delivers events through. The socket task itself stays dumb: decode
//! inbound frames, push them into the gateway mailbox, and report the close.
//! All identity binding and state changes happen inside the gateway.
//!
//! Malformed frames are answered with a typed `error` event on the offending
//! socket only; the connection stays open.

use crate::actors::GatewayHandle;
use crate::errors::RelayError;
use crate::events::{ClientEvent, ServerEvent};
use crate::registry::ConnectionHandle;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Outbound event buffer per socket. When full, events to this socket are
/// dropped; the relay never blocks on a slow consumer.
const OUTBOUND_BUFFER: usize = 64;

/// Shared state for the WebSocket router.
#[derive(Clone)]
pub struct WsContext {
    pub gateway: GatewayHandle,
}

/// Create the WebSocket router.
///
/// # Endpoints
///
/// - `GET /ws` - Upgrade to the relay event protocol
pub fn ws_router(gateway: GatewayHandle) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(WsContext { gateway })
}

/// Upgrade handler. Identity binding happens later via the `register` event,
/// so the upgrade itself is unconditional.
async fn ws_handler(ws: WebSocketUpgrade, State(ctx): State<WsContext>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx.gateway))
}

/// Drive one socket: writer task for outbound events, read loop for inbound.
async fn handle_socket(socket: WebSocket, gateway: GatewayHandle) {
    let (mut sink, mut stream) = socket.split();

    let (tx, mut rx) = mpsc::channel::<ServerEvent>(OUTBOUND_BUFFER);
    let conn = ConnectionHandle::new(tx);
    let connection_id = conn.id();
    let cancel = gateway.child_token();

    info!(
        target: "relay.ws",
        connection_id = %connection_id,
        "WebSocket connected"
    );

    // Writer: serialize gateway events onto the wire.
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sink.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(
                        target: "relay.ws",
                        error = %e,
                        "Failed to serialize outbound event"
                    );
                }
            }
        }
    });

    // Reader: decode frames and push them into the gateway mailbox.
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(
                    target: "relay.ws",
                    connection_id = %connection_id,
                    "Closing socket on shutdown"
                );
                break;
            }

            msg = stream.next() => {
                let Some(Ok(msg)) = msg else {
                    break;
                };
                match msg {
                    Message::Text(text) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => {
                                if gateway.inbound(conn.clone(), event).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                debug!(
                                    target: "relay.ws",
                                    connection_id = %connection_id,
                                    error = %e,
                                    "Malformed inbound frame"
                                );
                                let err = RelayError::Malformed(e.to_string());
                                conn.deliver(ServerEvent::Error {
                                    code: err.error_code(),
                                    message: err.client_message(),
                                });
                            }
                        }
                    }
                    Message::Close(_) => {
                        debug!(
                            target: "relay.ws",
                            connection_id = %connection_id,
                            "Close frame received"
                        );
                        break;
                    }
                    // Axum answers pings automatically.
                    Message::Ping(_) | Message::Pong(_) => {}
                    Message::Binary(_) => {}
                }
            }
        }
    }

    info!(
        target: "relay.ws",
        connection_id = %connection_id,
        "WebSocket disconnected"
    );

    // The gateway runs the full disconnect handler exactly once per socket.
    let _ = gateway.connection_closed(connection_id).await;
    send_task.abort();
}
