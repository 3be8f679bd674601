use anyhow::Result;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

use super::messages::{ClientMessage, ServerMessage};
use crate::realtime::{PresenceSession, RealtimeEvent};
use crate::web::client_ip::ClientIp;
use crate::web::state::AppState;

pub async fn presence_websocket_handler(
    Path(room): Path<String>,
    ClientIp(client_ip): ClientIp,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, room, state, client_ip))
}

pub async fn handle_socket(socket: WebSocket, room: String, state: AppState, client_ip: String) {
    let (mut sender, mut receiver) = socket.split();
    let mut session = PresenceSession::new(room, state.presence.clone(), state.bus.clone());

    info!(
        "New presence connection {} from {} for room {}",
        session.connection_id(),
        client_ip,
        session.room()
    );

    // Subscribe before anything can be tracked so no change goes unseen.
    let mut events = match state.bus.subscribe().await {
        Ok(events) => events,
        Err(e) => {
            error!(
                "Failed to subscribe connection {} to realtime events: {}",
                session.connection_id(),
                e
            );
            if let Ok(text) = serde_json::to_string(&ServerMessage::error("realtime unavailable")) {
                let _ = sender.send(Message::Text(text)).await;
            }
            return;
        }
    };

    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let connection_id = session.connection_id().to_string();
    let outgoing_task = tokio::spawn(async move {
        while let Some(msg) = outgoing_rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize message for {}: {}", connection_id, e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                debug!("WebSocket send failed for connection {}", connection_id);
                break;
            }
        }
    });

    let period = state.config.heartbeat_interval;
    let mut heartbeat = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    handle_client_message(&text, &mut session, &state, &client_ip, &outgoing_tx).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("WebSocket error for connection {}: {}", session.connection_id(), e);
                    break;
                }
            },
            event = events.next() => match event {
                Some(event) => forward_event(event, &session, &outgoing_tx).await,
                None => {
                    warn!("Realtime event stream ended for connection {}", session.connection_id());
                    break;
                }
            },
            _ = heartbeat.tick() => {
                if let Err(e) = session.heartbeat().await {
                    error!("Presence heartbeat failed for connection {}: {}", session.connection_id(), e);
                }
                if let Err(e) = session.prune_stale().await {
                    error!("Failed to prune stale presences of room {}: {}", session.room(), e);
                }
            }
        }
    }

    if let Err(e) = session.leave().await {
        error!(
            "Failed to untrack connection {} from room {}: {}",
            session.connection_id(),
            session.room(),
            e
        );
    }
    info!("Presence connection {} closed", session.connection_id());

    outgoing_task.abort();
}

async fn handle_client_message(
    text: &str,
    session: &mut PresenceSession,
    state: &AppState,
    client_ip: &str,
    outgoing: &mpsc::UnboundedSender<ServerMessage>,
) {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(
                "Unreadable message on connection {}: {}",
                session.connection_id(),
                e
            );
            let _ = outgoing.send(ServerMessage::error(format!("invalid message: {}", e)));
            return;
        }
    };

    if let Err(e) = apply_client_message(msg, session, state, client_ip, outgoing).await {
        error!(
            "Presence update failed on connection {}: {}",
            session.connection_id(),
            e
        );
        let _ = outgoing.send(ServerMessage::error(e));
    }
}

async fn apply_client_message(
    msg: ClientMessage,
    session: &mut PresenceSession,
    state: &AppState,
    client_ip: &str,
    outgoing: &mpsc::UnboundedSender<ServerMessage>,
) -> Result<()> {
    match msg {
        ClientMessage::Join { mut user } => {
            // Known workstations get their owner's name unless the client chose one.
            if !user.contains_key("name") {
                if let Some(known) = state.users.find_user_by_ip(client_ip) {
                    user.insert("name".to_string(), Value::String(known.name.clone()));
                }
            }
            let joined = session.join(user).await?.clone();
            let _ = outgoing.send(ServerMessage::Joined { user: joined });
        }
        ClientMessage::Update { updates } => session.update_presence(updates).await?,
        ClientMessage::SetEditing { field } => session.set_editing(&field).await?,
        ClientMessage::ClearEditing { field } => session.clear_editing(&field).await?,
        ClientMessage::Leave => session.leave().await?,
    }
    Ok(())
}

async fn forward_event(
    event: RealtimeEvent,
    session: &PresenceSession,
    outgoing: &mpsc::UnboundedSender<ServerMessage>,
) {
    match event {
        RealtimeEvent::PresenceChanged { room } => {
            if room != session.room() || !session.is_joined() {
                return;
            }
            match session.presence_state().await {
                Ok(presence) => {
                    let current_user_id = session.current_user().map(|user| user.id.as_str());
                    let _ = outgoing.send(ServerMessage::presence_sync(presence, current_user_id));
                }
                Err(e) => {
                    error!("Failed to load presence of room {}: {}", room, e);
                }
            }
        }
        RealtimeEvent::FormChanged {
            key,
            value,
            updated_at,
        } => {
            let _ = outgoing.send(ServerMessage::FormChanged {
                key,
                value,
                updated_at,
            });
        }
    }
}
