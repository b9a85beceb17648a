//! Integration tests for the server edge: a real WebSocket client talking to
//! a real listener.

use std::time::Duration;

use dixit_protocol::{AuthType, ParticipantId, RoomCode, RoomStatus, ServerEvent};
use dixit_room::{EngineConfig, Registry};
use dixit_server::DixitServer;
use dixit_session::GuestAuthenticator;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

fn engine() -> EngineConfig {
    EngineConfig {
        seed: Some(42),
        ..EngineConfig::default()
    }
}

/// Starts a server on a random port. Returns its address, registry and a
/// trigger that shuts it down.
async fn start_server() -> (String, Registry, oneshot::Sender<()>) {
    let server = DixitServer::<GuestAuthenticator>::builder()
        .bind("127.0.0.1:0")
        .engine(engine())
        .janitor(false)
        .build(GuestAuthenticator)
        .await
        .expect("server should build");

    let addr = server.local_addr().expect("local addr").to_string();
    let registry = server.registry().clone();
    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = server
            .run_until(async {
                let _ = stopped.await;
            })
            .await;
    });
    (addr, registry, stop)
}

async fn open(addr: &str, query: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws?{query}"))
        .await
        .expect("should connect");
    ws
}

/// Connects as `name` and consumes `connection_established`.
async fn connect(addr: &str, name: &str) -> (ClientWs, ParticipantId) {
    let mut ws = open(addr, &format!("player_name={name}")).await;
    match next_event(&mut ws).await {
        ServerEvent::ConnectionEstablished(body) => (ws, body.player_id),
        other => panic!("expected connection_established, got {other:?}"),
    }
}

async fn send(ws: &mut ClientWs, frame: Value) {
    ws.send(Message::Text(frame.to_string().into()))
        .await
        .expect("send");
}

async fn next_event(ws: &mut ClientWs) -> ServerEvent {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for an event")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("decode event");
        }
    }
}

/// Skips events until one of type `kind` arrives.
async fn wait_for(ws: &mut ClientWs, kind: &str) -> ServerEvent {
    loop {
        let event = next_event(ws).await;
        if event.kind() == kind {
            return event;
        }
    }
}

async fn expect_error(ws: &mut ClientWs, code: &str) {
    match wait_for(ws, "error").await {
        ServerEvent::Error(body) => assert_eq!(body.code, code, "{}", body.message),
        _ => unreachable!(),
    }
}

/// Alice creates `code`; Bob and Carol join it.
async fn table(addr: &str, code: &str) -> Vec<(ClientWs, ParticipantId)> {
    let mut players = Vec::new();
    for (i, name) in ["Alice", "Bob", "Carol"].into_iter().enumerate() {
        let (mut ws, id) = connect(addr, name).await;
        let kind = if i == 0 { "create_game" } else { "join_game" };
        send(
            &mut ws,
            json!({ "type": kind, "payload": { "room_code": code, "player_name": name } }),
        )
        .await;
        wait_for(&mut ws, "game_state").await;
        players.push((ws, id));
    }
    players
}

// =========================================================================
// Connection
// =========================================================================

#[tokio::test]
async fn test_connection_established_uses_query_name() {
    let (addr, _registry, _stop) = start_server().await;
    let mut ws = open(&addr, "player_name=Alice").await;

    match next_event(&mut ws).await {
        ServerEvent::ConnectionEstablished(body) => {
            assert_eq!(body.player_name, "Alice");
            assert_eq!(body.auth_type, AuthType::Guest);
            assert!(!body.authenticated);
        }
        other => panic!("expected connection_established, got {other:?}"),
    }
}

#[tokio::test]
async fn test_player_id_is_resumed_from_query() {
    let (addr, _registry, _stop) = start_server().await;
    let id = ParticipantId::random();
    let mut ws = open(&addr, &format!("player_id={id}&player_name=Bob")).await;

    let ServerEvent::ConnectionEstablished(body) = next_event(&mut ws).await else {
        panic!("expected connection_established");
    };
    assert_eq!(body.player_id, id);
}

#[tokio::test]
async fn test_invalid_name_is_rejected_and_closed() {
    let (addr, _registry, _stop) = start_server().await;
    let long = "x".repeat(64);
    let mut ws = open(&addr, &format!("player_name={long}")).await;

    expect_error(&mut ws, "invalid_name").await;
    let rest = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("socket should close");
    assert!(matches!(rest, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
}

// =========================================================================
// Routing
// =========================================================================

#[tokio::test]
async fn test_create_join_start_flow() {
    let (addr, registry, _stop) = start_server().await;
    let mut players = table(&addr, "FLOW1").await;
    let alice_id = players[0].1;

    send(
        &mut players[0].0,
        json!({ "type": "start_game", "payload": { "room_code": "FLOW1" } }),
    )
    .await;

    for (ws, id) in players.iter_mut() {
        let ServerEvent::GameStarted(started) = wait_for(ws, "game_started").await else {
            unreachable!();
        };
        assert_eq!(started.players.len(), 3);
        assert!(started.players.iter().all(|p| p.hand.is_none()));

        let ServerEvent::RoundStarted(round) = wait_for(ws, "round_started").await else {
            unreachable!();
        };
        assert_eq!(round.round_number, 1);
        assert_eq!(round.storyteller_id, alice_id);

        let ServerEvent::GameState(snapshot) = wait_for(ws, "game_state").await else {
            unreachable!();
        };
        assert_eq!(snapshot.status, RoomStatus::InProgress);
        for player in &snapshot.players {
            if player.id == *id {
                assert_eq!(player.hand.as_ref().map(Vec::len), Some(6));
            } else {
                assert!(player.hand.is_none());
            }
        }
    }

    let room = registry.get(&RoomCode::from("FLOW1")).await.expect("room");
    assert_eq!(room.status().await, RoomStatus::InProgress);
}

#[tokio::test]
async fn test_storyteller_clue_reaches_everyone() {
    let (addr, _registry, _stop) = start_server().await;
    let mut players = table(&addr, "CLUE1").await;

    send(
        &mut players[0].0,
        json!({ "type": "start_game", "payload": { "room_code": "CLUE1" } }),
    )
    .await;
    // Lobby snapshots are still queued ahead of the one sent with round 1.
    wait_for(&mut players[0].0, "round_started").await;
    let ServerEvent::GameState(snapshot) = wait_for(&mut players[0].0, "game_state").await else {
        unreachable!();
    };
    let alice = players[0].1;
    let card = snapshot.player(alice).and_then(|p| p.hand.clone()).expect("hand")[0];

    send(
        &mut players[0].0,
        json!({
            "type": "submit_clue",
            "payload": { "room_code": "CLUE1", "clue": "  a long journey ", "card_id": card.0 }
        }),
    )
    .await;

    for (ws, _) in players.iter_mut() {
        let ServerEvent::ClueSubmitted(clue) = wait_for(ws, "clue_submitted").await else {
            unreachable!();
        };
        assert_eq!(clue.clue, "a long journey");
        assert_eq!(clue.storyteller_id, alice);
    }
}

#[tokio::test]
async fn test_errors_go_only_to_the_caller() {
    let (addr, _registry, _stop) = start_server().await;
    let (mut alice, _) = connect(&addr, "Alice").await;
    let (mut mallory, _) = connect(&addr, "Mallory").await;

    send(
        &mut alice,
        json!({ "type": "create_game", "payload": { "room_code": "SOLO", "player_name": "Alice" } }),
    )
    .await;
    wait_for(&mut alice, "game_state").await;

    send(
        &mut mallory,
        json!({ "type": "start_game", "payload": { "room_code": "SOLO" } }),
    )
    .await;
    expect_error(&mut mallory, "not_a_participant").await;

    // The next thing Alice sees is her own snapshot, not Mallory's error.
    send(
        &mut alice,
        json!({ "type": "get_game_state", "payload": { "room_code": "SOLO" } }),
    )
    .await;
    assert_eq!(next_event(&mut alice).await.kind(), "game_state");
}

#[tokio::test]
async fn test_rule_violations_are_reported() {
    let (addr, _registry, _stop) = start_server().await;
    let (mut alice, _) = connect(&addr, "Alice").await;

    send(
        &mut alice,
        json!({ "type": "start_game", "payload": { "room_code": "NOPE" } }),
    )
    .await;
    expect_error(&mut alice, "game_not_found").await;

    send(
        &mut alice,
        json!({ "type": "create_game", "payload": { "room_code": "TINY", "player_name": "" } }),
    )
    .await;
    let ServerEvent::GameState(snapshot) = wait_for(&mut alice, "game_state").await else {
        unreachable!();
    };
    assert_eq!(snapshot.players[0].name, "Alice");

    send(
        &mut alice,
        json!({ "type": "start_game", "payload": { "room_code": "TINY" } }),
    )
    .await;
    expect_error(&mut alice, "not_enough_players").await;

    send(
        &mut alice,
        json!({ "type": "create_game", "payload": { "room_code": "TINY", "player_name": "A" } }),
    )
    .await;
    expect_error(&mut alice, "room_code_taken").await;
}

#[tokio::test]
async fn test_invalid_message_keeps_connection_open() {
    let (addr, _registry, _stop) = start_server().await;
    let (mut ws, _) = connect(&addr, "Alice").await;

    ws.send(Message::Text("not json".into())).await.expect("send");
    expect_error(&mut ws, "invalid_message").await;

    send(&mut ws, json!({ "type": "fly_to_moon", "payload": {} })).await;
    expect_error(&mut ws, "invalid_message").await;

    send(
        &mut ws,
        json!({ "type": "submit_vote", "payload": { "room_code": "R1" } }),
    )
    .await;
    expect_error(&mut ws, "invalid_message").await;

    send(
        &mut ws,
        json!({ "type": "create_game", "payload": { "room_code": "STILL", "player_name": "Alice" } }),
    )
    .await;
    wait_for(&mut ws, "game_state").await;
}

#[tokio::test]
async fn test_chat_and_history() {
    let (addr, _registry, _stop) = start_server().await;
    let mut players = table(&addr, "CHAT1").await;

    send(
        &mut players[1].0,
        json!({ "type": "send_chat", "payload": { "room_code": "CHAT1", "message": "hello there" } }),
    )
    .await;
    for (ws, _) in players.iter_mut() {
        loop {
            let ServerEvent::ChatMessage(line) = wait_for(ws, "chat_message").await else {
                unreachable!();
            };
            if line.message == "hello there" {
                assert_eq!(line.sender_name.as_deref(), Some("Bob"));
                break;
            }
        }
    }

    send(
        &mut players[0].0,
        json!({ "type": "get_chat_history", "payload": { "room_code": "CHAT1", "limit": 100 } }),
    )
    .await;
    let ServerEvent::ChatHistory(history) = wait_for(&mut players[0].0, "chat_history").await
    else {
        unreachable!();
    };
    assert_eq!(history.room_code.as_str(), "CHAT1");
    assert_eq!(
        history.messages.last().map(|m| m.message.as_str()),
        Some("hello there")
    );
}

#[tokio::test]
async fn test_add_bot_and_delete_lobby() {
    let (addr, registry, _stop) = start_server().await;
    let (mut alice, _) = connect(&addr, "Alice").await;

    send(
        &mut alice,
        json!({ "type": "create_game", "payload": { "room_code": "BOTS", "player_name": "Alice" } }),
    )
    .await;
    wait_for(&mut alice, "game_state").await;

    send(
        &mut alice,
        json!({ "type": "add_bot", "payload": { "room_code": "BOTS", "difficulty": "easy" } }),
    )
    .await;
    let ServerEvent::PlayerJoined(joined) = wait_for(&mut alice, "player_joined").await else {
        unreachable!();
    };
    assert!(joined.player.is_bot);

    send(
        &mut alice,
        json!({ "type": "delete_game", "payload": { "room_code": "BOTS" } }),
    )
    .await;
    let ServerEvent::GameDeleted(deleted) = wait_for(&mut alice, "game_deleted").await else {
        unreachable!();
    };
    assert_eq!(deleted.room_code.as_str(), "BOTS");
    assert!(registry.get(&RoomCode::from("BOTS")).await.is_none());
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test]
async fn test_disconnect_marks_player_disconnected() {
    let (addr, registry, _stop) = start_server().await;
    let mut players = table(&addr, "GONE").await;
    let (bob_ws, bob) = players.remove(1);

    drop(bob_ws);

    let room = registry.get(&RoomCode::from("GONE")).await.expect("room");
    let mut connected = true;
    for _ in 0..50 {
        let snapshot = room.snapshot_for(None).await;
        connected = snapshot.player(bob).expect("bob").is_connected;
        if !connected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!connected, "bob should be marked disconnected");
}

#[tokio::test]
async fn test_rejoin_reattaches_connection() {
    let (addr, registry, _stop) = start_server().await;
    let mut players = table(&addr, "BACK").await;
    let (bob_ws, bob) = players.remove(1);
    drop(bob_ws);

    let room = registry.get(&RoomCode::from("BACK")).await.expect("room");
    for _ in 0..50 {
        if !room.snapshot_for(None).await.player(bob).expect("bob").is_connected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut ws = open(&addr, &format!("player_id={bob}&player_name=Bob")).await;
    wait_for(&mut ws, "connection_established").await;
    send(
        &mut ws,
        json!({ "type": "join_game", "payload": { "room_code": "BACK", "player_name": "Bob" } }),
    )
    .await;
    let ServerEvent::GameState(snapshot) = wait_for(&mut ws, "game_state").await else {
        unreachable!();
    };
    let seat = snapshot.player(bob).expect("bob");
    assert!(seat.is_connected);
    assert_eq!(seat.position, 2);
    assert_eq!(snapshot.players.len(), 3);
}

#[tokio::test]
async fn test_shutdown_stops_server_and_clears_rooms() {
    let server = DixitServer::<GuestAuthenticator>::builder()
        .bind("127.0.0.1:0")
        .engine(engine())
        .build(GuestAuthenticator)
        .await
        .expect("server should build");
    let addr = server.local_addr().expect("local addr").to_string();
    let registry = server.registry().clone();
    let (stop, stopped) = oneshot::channel::<()>();
    let running = tokio::spawn(server.run_until(async {
        let _ = stopped.await;
    }));

    let (mut alice, _) = connect(&addr, "Alice").await;
    send(
        &mut alice,
        json!({ "type": "create_game", "payload": { "room_code": "LAST", "player_name": "Alice" } }),
    )
    .await;
    wait_for(&mut alice, "game_state").await;
    assert_eq!(registry.room_count().await, 1);

    stop.send(()).expect("server still running");
    let result = tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("shutdown should finish")
        .expect("task should not panic");
    assert!(result.is_ok());
    assert_eq!(registry.room_count().await, 0);
}
