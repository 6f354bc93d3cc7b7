use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use gproxy_protocol::duplex::{RequestDescriptor, UpstreamEvent};
use tokio::select;
use tokio::sync::mpsc;

use crate::bridge::Bridge;

pub fn duplex_router<S>(bridge: Arc<Bridge>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/__bridge/agent", get(agent_ws))
        .with_state(bridge)
}

async fn agent_ws(ws: WebSocketUpgrade, State(bridge): State<Arc<Bridge>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_agent_socket(socket, bridge))
}

/// Services exactly one Client Agent connection for its lifetime. Only one
/// browser tab is ever expected to hold this socket; a second connection
/// attempt replaces the first, which the bridge then treats as disconnected.
async fn handle_agent_socket(mut socket: WebSocket, bridge: Arc<Bridge>) {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<RequestDescriptor>();
    bridge.attach(outbound_tx).await;
    tracing::info!("client agent connected");

    loop {
        select! {
            outgoing = outbound_rx.recv() => {
                let Some(descriptor) = outgoing else { break };
                let Ok(text) = serde_json::to_string(&descriptor) else {
                    tracing::warn!(request_id = %descriptor.request_id, "failed to encode request descriptor");
                    continue;
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                let Some(Ok(message)) = incoming else { break };
                let Message::Text(text) = message else { continue };
                match serde_json::from_str::<UpstreamEvent>(&text) {
                    Ok(UpstreamEvent::Handshake) => {
                        bridge.mark_ready().await;
                    }
                    Ok(event) => bridge.queue().deliver(event),
                    Err(err) => tracing::warn!(%err, "malformed upstream event"),
                }
            }
        }
    }

    tracing::info!("client agent disconnected");
    bridge.detach().await;
}
