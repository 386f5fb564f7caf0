//! WebSocket Session Handler
//!
//! Owns the per-session task trio:
//!
//! - **reader**: renews a 60 s read deadline on every inbound frame,
//!   dispatches `send_message` / `delete_message`, enforces the absolute
//!   15-minute session lifetime.
//! - **writer**: drains the bounded outbound queue onto the socket with a
//!   10 s deadline per write; a stalled or broken socket ends the session.
//! - **heartbeat**: a ping every 54 s, sent through the same queue.
//!
//! On connect the session receives its backfill: the newest 100 messages,
//! transmitted oldest-first so an append-at-head client ends up newest at
//! top. Tombstoned content is masked according to the session's role.

use crate::error::ApiError;
use crate::middleware::AuthContext;
use crate::registry::{
    Outbound, HEARTBEAT_INTERVAL, PONG_TIMEOUT, SESSION_LIFETIME, WRITE_TIMEOUT,
};
use crate::AppState;
use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::Extension;
use chathouse_core::{ClientFrame, ServerFrame};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

/// Messages delivered to a newly connected session.
const BACKFILL_LIMIT: usize = 100;

/// GET /api/ws: authenticated upgrade into a streaming session.
pub async fn websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Response, ApiError> {
    // The token may outlive the account: a banned (soft-deleted) user must
    // not open a new session.
    match state.users.get_by_id(auth.user_id).await? {
        Some(_) => {}
        None => return Err(ApiError::Forbidden("account is disabled".to_string())),
    }

    Ok(ws.on_upgrade(move |socket| handle_session(socket, state, auth)))
}

async fn handle_session(socket: WebSocket, state: AppState, auth: AuthContext) {
    let (session_id, outbound, outbound_rx) =
        state
            .registry
            .register(auth.user_id, auth.username.clone(), auth.role);

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(sink, outbound_rx));

    send_backfill(&state, &outbound, &auth).await;
    read_loop(stream, &state, &auth, &outbound).await;

    state.registry.unregister(session_id);
    // Both senders are gone now; the writer drains what is queued and ends.
    drop(outbound);
    let _ = writer.await;
}

/// Initial backfill: newest 100, delivered oldest-first.
async fn send_backfill(state: &AppState, outbound: &mpsc::Sender<Outbound>, auth: &AuthContext) {
    let messages = match state.service.recent(BACKFILL_LIMIT).await {
        Ok(messages) => messages,
        Err(e) => {
            warn!(error = %e, "backfill unavailable for new session");
            return;
        }
    };

    for message in messages.iter().rev() {
        let frame = ServerFrame::from_message(message, auth.is_moderator());
        if outbound.send(Outbound::Frame(frame)).await.is_err() {
            return;
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    state: &AppState,
    auth: &AuthContext,
    outbound: &mpsc::Sender<Outbound>,
) {
    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + HEARTBEAT_INTERVAL,
        HEARTBEAT_INTERVAL,
    );
    let expiry = tokio::time::sleep(SESSION_LIFETIME);
    tokio::pin!(expiry);

    loop {
        tokio::select! {
            _ = &mut expiry => {
                debug!(user = %auth.username, "session lifetime reached");
                let _ = outbound
                    .send(Outbound::Frame(ServerFrame::SessionExpired {
                        error: "session expired after 15 minutes".to_string(),
                    }))
                    .await;
                let _ = outbound
                    .send(Outbound::Close {
                        reason: "session expired".to_string(),
                    })
                    .await;
                return;
            }

            _ = heartbeat.tick() => {
                if outbound.send(Outbound::Ping).await.is_err() {
                    return;
                }
            }

            inbound = timeout(PONG_TIMEOUT, stream.next()) => {
                match inbound {
                    // No inbound traffic (not even a heartbeat reply)
                    // within the deadline: the peer is gone.
                    Err(_) => {
                        debug!(user = %auth.username, "read deadline exceeded");
                        return;
                    }
                    Ok(None) => return,
                    Ok(Some(Err(e))) => {
                        debug!(user = %auth.username, error = %e, "socket read failed");
                        return;
                    }
                    Ok(Some(Ok(WsMessage::Text(text)))) => {
                        dispatch(state, auth, outbound, &text).await;
                    }
                    Ok(Some(Ok(WsMessage::Close(_)))) => return,
                    // Pongs and other control traffic just renew the
                    // deadline by reaching this loop at all.
                    Ok(Some(Ok(_))) => {}
                }
            }
        }
    }
}

async fn dispatch(
    state: &AppState,
    auth: &AuthContext,
    outbound: &mpsc::Sender<Outbound>,
    text: &str,
) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(_) => {
            send_frame(outbound, ServerFrame::Error {
                error: "unknown message type".to_string(),
            })
            .await;
            return;
        }
    };

    match frame {
        ClientFrame::SendMessage { temp_id, content } => {
            match state.service.send(auth.user_id, &auth.username, &content).await {
                Ok(message) => {
                    send_frame(
                        outbound,
                        ServerFrame::ack_success(&temp_id, &message.message_id.to_string()),
                    )
                    .await;
                }
                Err(e) => {
                    debug!(user = %auth.username, error = %e, "send rejected");
                    send_frame(outbound, ServerFrame::ack_error(&temp_id, e.to_string())).await;
                }
            }
        }

        ClientFrame::DeleteMessage { message_id } => {
            let message_id = match Uuid::parse_str(&message_id) {
                Ok(id) => id,
                Err(_) => {
                    send_frame(outbound, ServerFrame::Error {
                        error: "invalid message id".to_string(),
                    })
                    .await;
                    return;
                }
            };

            if let Err(e) = state
                .service
                .delete(message_id, auth.user_id, auth.is_moderator())
                .await
            {
                debug!(user = %auth.username, error = %e, "delete rejected");
                send_frame(outbound, ServerFrame::Error {
                    error: e.to_string(),
                })
                .await;
            }
            // Success is announced by the broadcast `message_deleted`
            // frame, which this session receives like everyone else.
        }
    }
}

async fn send_frame(outbound: &mpsc::Sender<Outbound>, frame: ServerFrame) {
    let _ = outbound.send(Outbound::Frame(frame)).await;
}

/// Drain the outbound queue onto the socket, each write bounded by the
/// write deadline. Ends when the queue closes, a write stalls, or a close
/// frame is sent.
async fn write_loop(mut sink: SplitSink<WebSocket, WsMessage>, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(outbound) = rx.recv().await {
        let write = match outbound {
            Outbound::Frame(frame) => {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "dropping unserializable frame");
                        continue;
                    }
                };
                timeout(WRITE_TIMEOUT, sink.send(WsMessage::Text(text))).await
            }
            Outbound::Ping => timeout(WRITE_TIMEOUT, sink.send(WsMessage::Ping(Vec::new()))).await,
            Outbound::Close { reason } => {
                let _ = timeout(
                    WRITE_TIMEOUT,
                    sink.send(WsMessage::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: reason.into(),
                    }))),
                )
                .await;
                return;
            }
        };

        match write {
            Err(_) => {
                debug!("write deadline exceeded, closing session");
                return;
            }
            Ok(Err(e)) => {
                debug!(error = %e, "socket write failed");
                return;
            }
            Ok(Ok(())) => {}
        }
    }
}
