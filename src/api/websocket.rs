//! WebSocket transport for relay sessions

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket, rejection::WebSocketUpgradeRejection},
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt, future};

use crate::Error;
use crate::protocol::{self, InboundFrame, OutboundFrame};
use crate::relay::Relay;

/// Build the catch-all router: upgrade on any path, `OK` otherwise
pub fn router(relay: Relay) -> Router {
    Router::new().fallback(upgrade_or_ok).with_state(relay)
}

/// Upgrade WebSocket requests; answer anything else with a plain `OK`
async fn upgrade_or_ok(
    State(relay): State<Relay>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| handle_socket(socket, relay)),
        Err(_) => "OK".into_response(),
    }
}

/// Handle one WebSocket connection
async fn handle_socket(socket: WebSocket, relay: Relay) {
    let (mut sender, receiver) = socket.split();

    let (session, mut rx) = relay.open_session().await;
    let session_id = session.id();
    tracing::info!(session_id = %session_id, "client connected");

    // Single writer: frame order on the wire equals enqueue order
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let message = match frame {
                OutboundFrame::Envelope(envelope) => match protocol::encode(&envelope) {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        tracing::error!(kind = envelope.kind(), error = %e, "failed to encode envelope");
                        continue;
                    }
                },
                OutboundFrame::Audio(bytes) => Message::Binary(bytes),
            };

            if sender.send(message).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let inbound = receiver
        .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(InboundFrame::Text(text.as_str().to_owned()))),
                Ok(Message::Binary(bytes)) => Some(Ok(InboundFrame::Binary(bytes))),
                Ok(_) => None,
                Err(e) => Some(Err(Error::Transport(e.to_string()))),
            })
        });

    if let Err(e) = session.run(inbound).await {
        tracing::debug!(session_id = %session_id, error = %e, "session ended with error");
    }

    let _ = send_task.await;
    tracing::info!(session_id = %session_id, "client disconnected");
}
