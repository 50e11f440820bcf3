//! Inbound ACS-style WebSocket acceptor (`spec.md` §4.4, §6.1).
//!
//! Mirrors the teacher's `handle_ws` shape: split the socket, register a
//! guard for RAII cleanup, then `tokio::select!` over force-close,
//! outbound frames from the pipeline, and inbound frames from the peer.
//! All protocol and pipeline logic lives in [`crate::session::Session`];
//! this function only moves bytes.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::api::AppState;
use crate::runtime::TaskSpawner;
use crate::session::Session;
use crate::wire::OutboundFrame;

/// Grace period to let an in-flight `error` frame reach the peer before
/// the transport is closed on a fatal session error (`spec.md` §7).
const FATAL_FRAME_GRACE: Duration = Duration::from_millis(500);

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (peer_tx, mut peer_rx) = mpsc::unbounded_channel::<OutboundFrame>();

    let session_id = state.session_manager.next_session_id();
    let spawner = state.spawner.clone() as std::sync::Arc<dyn TaskSpawner>;
    let session = match Session::new(session_id, &state.config, state.clock.clone(), spawner, peer_tx) {
        Ok(session) => session,
        Err(e) => {
            log::error!("[ws] failed to initialize session: {e}");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    let guard = state.session_manager.register(session.clone());
    let cancel_token = guard.cancel_token().clone();
    log::info!("[ws] session {} accepted", session.id());

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log::info!("[ws] session {} force-closed", session.id());
                break;
            }
            frame = peer_rx.recv() => {
                let Some(frame) = frame else { continue };
                if sender.send(Message::Text(frame.to_json().into())).await.is_err() {
                    log::debug!("[ws] session {} peer disconnected on write", session.id());
                    break;
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = session.on_text_message(&text).await {
                            log::warn!("[ws] session {} ended fatally: {e}", session.id());
                            drain_final_frame(&mut peer_rx, &mut sender).await;
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        log::debug!("[ws] session {} dropped unexpected binary frame", session.id());
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("[ws] session {} transport closed", session.id());
                        break;
                    }
                    Some(Err(e)) => {
                        log::warn!("[ws] session {} read error: {e}", session.id());
                        break;
                    }
                }
            }
        }
    }

    state.session_manager.remove(session.id()).await;
    drop(guard);
}

/// Forwards at most one more queued outbound frame (the fatal `error`
/// frame `Session::on_text_message` just published) before the caller
/// closes the transport.
async fn drain_final_frame(
    peer_rx: &mut mpsc::UnboundedReceiver<OutboundFrame>,
    sender: &mut SplitSink<WebSocket, Message>,
) {
    if let Ok(Some(frame)) = tokio::time::timeout(FATAL_FRAME_GRACE, peer_rx.recv()).await {
        let _ = sender.send(Message::Text(frame.to_json().into())).await;
    }
}
