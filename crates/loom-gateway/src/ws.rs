// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! WebSocket bridge between a browser client and one
//! [`loom_session::BackgroundSession`]: JSON frames in, JSON frames out.
//!
//! Authentication happens before the upgrade, via [`crate::auth::bearer_auth_mw`].
//! The socket itself adds no further auth — it inherits the HTTP connection's.
//!
//! Unlike the teacher's `broadcast`-backed bridge, each observer here holds
//! its own bounded `mpsc::Receiver<Event>` (see `BackgroundSession::attach_client`),
//! so there is no `Lagged` case: a slow or gone client is simply dropped from
//! the session's fan-out map, and this handler notices by its own receiver
//! channel closing.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use loom_session::SessionManager;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{ClientMessage, ServerMessage};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<Uuid>,
    State(manager): State<Arc<SessionManager>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, manager, session_id))
}

async fn handle_socket(mut socket: WebSocket, manager: Arc<SessionManager>, session_id: Uuid) {
    let session = match manager.resume(session_id).await {
        Ok(session) => session,
        Err(e) => {
            send(&mut socket, &ServerMessage::Error { message: e.to_string(), code: Some(404) }).await;
            return;
        }
    };

    let client_id = Uuid::new_v4();
    let (observer_id, mut events) = session.attach_client();

    let acp_server = manager
        .store()
        .get_metadata(session_id)
        .map(|m| m.acp_server)
        .unwrap_or_default();
    send(&mut socket, &ServerMessage::Connected { session_id, client_id, acp_server }).await;

    if let Ok(sync) = manager.store().sync(session_id, 0, true) {
        send(&mut socket, &ServerMessage::SessionLoaded { events: sync.events }).await;
    }

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_client_message(&text, &manager, &session, client_id, &mut socket).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(session_id = %session_id, error = %e, "WebSocket recv error");
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Some(ev) => send(&mut socket, &ev.into()).await,
                    None => break,
                }
            }
        }
    }

    session.detach_client(observer_id);
    info!(session_id = %session_id, %client_id, "WebSocket connection closed");
}

/// Returns `false` when the connection should close.
async fn handle_client_message(
    text: &str,
    manager: &Arc<SessionManager>,
    session: &Arc<loom_session::BackgroundSession>,
    client_id: Uuid,
    socket: &mut WebSocket,
) -> bool {
    let cmd = match serde_json::from_str::<ClientMessage>(text) {
        Ok(cmd) => cmd,
        Err(e) => {
            send(socket, &ServerMessage::Error { message: format!("invalid JSON command: {e}"), code: Some(400) }).await;
            return true;
        }
    };

    match cmd {
        ClientMessage::Prompt { message, .. } => {
            if let Err(e) = session.prompt(message, client_id.to_string(), None).await {
                warn!(error = %e, "failed to start prompt");
                send(socket, &ServerMessage::Error { message: e.to_string(), code: None }).await;
            }
        }
        ClientMessage::Cancel => session.cancel().await,
        ClientMessage::PermissionAnswer { request_id, option_id } => {
            session.answer_permission(&request_id, option_id);
        }
        ClientMessage::SyncSession { session_id, after_seq } => {
            let is_running = manager.get(session_id).await.is_some();
            if let Ok(sync) = manager.store().sync(session_id, after_seq, is_running) {
                send(
                    socket,
                    &ServerMessage::SessionSync {
                        session_id: sync.session_id,
                        after_seq: sync.after_seq,
                        events: sync.events,
                        event_count: sync.event_count,
                        status: sync.status,
                        is_running: sync.is_running,
                    },
                )
                .await;
            }
        }
        ClientMessage::Keepalive { timestamp } => {
            send(
                socket,
                &ServerMessage::KeepaliveAck { client_timestamp: timestamp, server_timestamp: chrono::Utc::now().to_rfc3339() },
            )
            .await;
        }
        ClientMessage::RenameSession { name } => {
            let target = session.session_id();
            match manager.rename(target, name.clone()).await {
                Ok(()) => send(socket, &ServerMessage::SessionRenamed { session_id: target, name }).await,
                Err(e) => {
                    warn!(error = %e, "failed to rename session");
                    send(socket, &ServerMessage::Error { message: e.to_string(), code: None }).await;
                }
            }
        }
        ClientMessage::SetConfigOption { .. } => {
            // No-op: per-session config options are not wired up in this
            // iteration.
        }
    }
    true
}

async fn send(socket: &mut WebSocket, msg: &ServerMessage) {
    if let Ok(json) = serde_json::to_string(msg) {
        let _ = socket.send(Message::Text(json)).await;
    }
}
