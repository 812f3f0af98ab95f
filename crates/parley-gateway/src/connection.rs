use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use parley_types::events::ClientEvent;

use crate::handlers;
use crate::AppState;

/// Drive one authenticated chat session: register it with the
/// dispatcher, pump outbound events into the socket, and dispatch
/// inbound frames until either direction closes.
pub async fn handle_session(socket: WebSocket, state: AppState, username: String) {
    let (mut sender, mut receiver) = socket.split();

    let (conn_id, mut session_rx) = state.dispatcher.register(&username).await;
    info!("{} connected", username);

    // Forward targeted events -> client
    let username_send = username.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = session_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    warn!("{} outbound event failed to serialize: {}", username_send, err);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Read events from client
    let state_recv = state.clone();
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => {
                        handlers::dispatch(&state_recv, &username_recv, event).await;
                    }
                    Err(err) => {
                        // Unknown discriminators land here too: the
                        // frame is dropped, the session stays open.
                        debug!(
                            "{} dropped undecodable frame ({} bytes): {}",
                            username_recv,
                            text.len(),
                            err
                        );
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.dispatcher.unregister(&username, conn_id).await;
    info!("{} disconnected", username);
}
