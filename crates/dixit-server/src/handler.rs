//! Per-connection handler: authentication, the writer task and message
//! routing.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Decode credentials from the upgrade query → authenticate
//!   2. Send `connection_established`
//!   3. Register an outbound sink and spawn the task that drains it
//!   4. Loop: receive frames → decode `ClientMessage` → route to the registry
//!   5. On close: unregister the sink, mark the player disconnected

use std::collections::HashSet;
use std::sync::Arc;

use dixit_protocol::{ClientMessage, Codec, ParticipantId, RoomCode, ServerEvent};
use dixit_room::{Frame, ParticipantSink, Room, RoomError};
use dixit_session::{Authenticator, Credentials, Identity, SessionError};
use dixit_transport::{Connection, WebSocketConnection};

use crate::ServerError;
use crate::server::ServerState;

/// Drop guard that detaches a player from the engine when the handler
/// exits, including by panic. `Drop` is synchronous, so the async cleanup
/// runs in a fire-and-forget task.
struct ConnectionGuard<A: Authenticator> {
    player_id: ParticipantId,
    sink_id: u64,
    /// Rooms this connection created or joined.
    joined: HashSet<RoomCode>,
    state: Arc<ServerState<A>>,
}

impl<A: Authenticator> Drop for ConnectionGuard<A> {
    fn drop(&mut self) {
        let player_id = self.player_id;
        let sink_id = self.sink_id;
        let joined = std::mem::take(&mut self.joined);
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            state.registry.unregister_sink(player_id, sink_id).await;
            for code in joined {
                if let Some(room) = state.registry.get(&code).await {
                    room.mark_disconnected(player_id, Some(sink_id)).await;
                }
            }
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<A: Authenticator>(
    conn: WebSocketConnection,
    state: Arc<ServerState<A>>,
) -> Result<(), ServerError> {
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    tracing::debug!(%conn_id, peer = ?conn.peer_addr(), "handling new connection");

    // --- Step 1: Identity ---
    let identity = authenticate(&conn, &state).await?;
    let player_id = identity.player_id;
    tracing::info!(%conn_id, participant_id = %player_id, player_name = %identity.player_name, "player connected");

    let welcome = state.codec.encode(&identity.welcome())?;
    conn.send(&welcome).await?;

    // --- Step 2: Outbound sink ---
    let config = &state.registry.context().config;
    let deadline = config.sink_write_deadline;
    let (sink, mut rx) = ParticipantSink::channel(config.sink_buffer);
    state.registry.register_sink(player_id, sink.clone()).await;
    let mut guard = ConnectionGuard {
        player_id,
        sink_id: sink.id(),
        joined: HashSet::new(),
        state: Arc::clone(&state),
    };

    let writer = tokio::spawn({
        let conn = Arc::clone(&conn);
        async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = conn.send(&frame).await {
                    tracing::debug!(%conn_id, error = %e, "write failed, stopping writer");
                    break;
                }
            }
        }
    });

    // --- Step 3: Message loop ---
    loop {
        let text = match conn.recv().await {
            Ok(Some(text)) => text,
            Ok(None) => {
                tracing::info!(participant_id = %player_id, "connection closed cleanly");
                break;
            }
            Err(e) => {
                tracing::debug!(participant_id = %player_id, error = %e, "recv error");
                break;
            }
        };

        let msg: ClientMessage = match state.codec.decode(&text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(participant_id = %player_id, error = %e, "failed to decode message");
                let event = ServerEvent::error("invalid_message", e.to_string());
                reply(&state, &sink, &event, deadline).await?;
                continue;
            }
        };

        let kind = msg.kind();
        let room_code = msg.room_code().clone();
        if let Err(e) = route(&state, &identity, &mut guard.joined, msg).await {
            tracing::debug!(
                participant_id = %player_id,
                %room_code,
                message = kind,
                error = %e,
                "action rejected"
            );
            reply(&state, &sink, &e.to_event(), deadline).await?;
        }
    }

    writer.abort();
    drop(guard);
    Ok(())
}

/// Binds the connection to an identity, or reports why not and closes it.
async fn authenticate<A: Authenticator>(
    conn: &WebSocketConnection,
    state: &ServerState<A>,
) -> Result<Identity, ServerError> {
    let creds = Credentials::from_query(conn.query());
    match state.auth.authenticate(&creds).await {
        Ok(identity) => Ok(identity),
        Err(e) => {
            let code = match e {
                SessionError::AuthFailed(_) => "auth_failed",
                SessionError::InvalidName(_) => "invalid_name",
            };
            let frame = state.codec.encode(&ServerEvent::error(code, e.to_string()))?;
            conn.send(&frame).await?;
            let _ = conn.close().await;
            Err(e.into())
        }
    }
}

/// Performs one client action on behalf of `identity`.
///
/// The acting participant is always the connection's identity; the only
/// identity-shaped field read from a payload is the display name on create
/// and join.
async fn route<A: Authenticator>(
    state: &ServerState<A>,
    identity: &Identity,
    joined: &mut HashSet<RoomCode>,
    msg: ClientMessage,
) -> Result<(), RoomError> {
    let registry = &state.registry;
    let id = identity.player_id;

    match msg {
        ClientMessage::CreateGame(m) => {
            let name = display_name(&m.player_name, identity);
            registry.create(m.room_code.clone(), id, name).await?;
            joined.insert(m.room_code);
        }
        ClientMessage::JoinGame(m) => {
            let name = display_name(&m.player_name, identity);
            registry.join(&m.room_code, id, name).await?;
            joined.insert(m.room_code);
        }
        ClientMessage::StartGame(r) => {
            room(state, &r.room_code).await?.start(id).await?;
        }
        ClientMessage::SubmitClue(m) => {
            room(state, &m.room_code)
                .await?
                .submit_clue(id, &m.clue, m.card_id)
                .await?;
        }
        ClientMessage::SubmitCard(m) => {
            room(state, &m.room_code).await?.submit_card(id, m.card_id).await?;
        }
        ClientMessage::SubmitVote(m) => {
            room(state, &m.room_code).await?.submit_vote(id, m.card_id).await?;
        }
        ClientMessage::LeaveGame(r) => {
            room(state, &r.room_code).await?.leave(id).await?;
            joined.remove(&r.room_code);
        }
        ClientMessage::SendChat(m) => {
            room(state, &m.room_code)
                .await?
                .send_chat(id, &m.message, m.message_type.unwrap_or_default())
                .await?;
        }
        ClientMessage::GetChatHistory(m) => {
            room(state, &m.room_code)
                .await?
                .send_chat_history(id, m.phase.unwrap_or_default(), m.limit)
                .await?;
        }
        ClientMessage::AddBot(m) => {
            room(state, &m.room_code)
                .await?
                .add_bot(id, m.difficulty.unwrap_or_default())
                .await?;
        }
        ClientMessage::DeleteGame(r) => {
            registry.delete(&r.room_code, id).await?;
            joined.remove(&r.room_code);
        }
        ClientMessage::GetGameState(r) => {
            room(state, &r.room_code).await?.send_state(id).await?;
        }
    }
    Ok(())
}

async fn room<A: Authenticator>(
    state: &ServerState<A>,
    code: &RoomCode,
) -> Result<Arc<Room>, RoomError> {
    state.registry.get(code).await.ok_or(RoomError::GameNotFound)
}

/// The payload name wins when it is not blank.
fn display_name(requested: &str, identity: &Identity) -> String {
    match requested.trim() {
        "" => identity.player_name.clone(),
        name => name.to_string(),
    }
}

/// Queues `event` on the caller's own sink, behind any room events already
/// waiting there.
async fn reply<A: Authenticator>(
    state: &ServerState<A>,
    sink: &ParticipantSink,
    event: &ServerEvent,
    deadline: std::time::Duration,
) -> Result<(), ServerError> {
    let text = state.codec.encode(event)?;
    if let Err(e) = sink.send(Frame::from(text.as_str()), deadline).await {
        tracing::debug!(error = %e, "could not queue reply");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use dixit_protocol::AuthType;

    use super::*;

    fn guest(name: &str) -> Identity {
        Identity {
            player_id: ParticipantId::random(),
            player_name: name.into(),
            auth_type: AuthType::Guest,
            authenticated: false,
        }
    }

    #[test]
    fn test_display_name_prefers_payload() {
        assert_eq!(display_name(" Alice ", &guest("Guest-1234")), "Alice");
    }

    #[test]
    fn test_display_name_falls_back_to_identity() {
        assert_eq!(display_name("   ", &guest("Guest-1234")), "Guest-1234");
    }
}
