//! The durable-record seam.
//!
//! The engine writes through a [`Store`] but never waits on it for game
//! progress: every write except room creation is queued on the room's
//! outbox and executed after the room lock is released, under
//! [`EngineConfig::store_deadline`](crate::EngineConfig). Failures are
//! logged and the in-memory state stays authoritative.
//!
//! ```text
//! Room op ──StoreWrite──→ outbox ──→ dispatcher ──timeout(store.*)──→ backend
//! ```
//!
//! [`MemoryStore`] is the in-process implementation used by the binary and
//! the tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dixit_protocol::{
    BotDifficulty, CardId, ChatHistoryFilter, ChatMessageView, ParticipantId, RoomCode,
    RoomId, RoomStatus, RoundId, RoundPhase,
};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::round::Round;
use crate::{RoomError, StoreError};

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomRecord {
    pub id: RoomId,
    pub code: RoomCode,
    pub status: RoomStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub id: ParticipantId,
    pub name: String,
    pub position: u8,
    pub score: u32,
    pub is_bot: bool,
    pub bot_level: Option<BotDifficulty>,
    pub was_replaced: bool,
    pub replacement_id: Option<ParticipantId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub id: RoundId,
    pub number: u32,
    pub storyteller_id: ParticipantId,
    pub clue: String,
    pub phase: RoundPhase,
    pub storyteller_card: Option<CardId>,
    pub created_at: DateTime<Utc>,
}

impl From<&Round> for RoundRecord {
    fn from(round: &Round) -> Self {
        Self {
            id: round.id,
            number: round.number,
            storyteller_id: round.storyteller_id,
            clue: round.clue.clone(),
            phase: round.phase,
            storyteller_card: round.storyteller_card,
            created_at: round.created_at,
        }
    }
}

/// A seat inside a [`StoredRoom`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredParticipant {
    pub id: ParticipantId,
    pub name: String,
    pub position: u8,
    pub score: u32,
    pub hand: Vec<CardId>,
    pub is_bot: bool,
    pub bot_level: Option<BotDifficulty>,
    pub is_active: bool,
    pub was_replaced: bool,
    pub replacement_id: Option<ParticipantId>,
}

/// Everything needed to rebuild a live room after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRoom {
    pub id: RoomId,
    pub code: RoomCode,
    pub status: RoomStatus,
    pub catalog_size: u32,
    pub round_number: u32,
    pub participants: Vec<StoredParticipant>,
    pub deck: Vec<CardId>,
    pub used_cards: Vec<CardId>,
    pub current_round: Option<Round>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl StoredRoom {
    /// Every card the room accounts for, sorted. For a consistent room this
    /// is exactly `1..=catalog_size`.
    pub fn card_census(&self) -> Vec<CardId> {
        let mut cards: Vec<CardId> = self
            .deck
            .iter()
            .chain(self.used_cards.iter())
            .chain(self.participants.iter().flat_map(|p| p.hand.iter()))
            .copied()
            .chain(self.current_round.iter().flat_map(|r| r.cards()))
            .collect();
        cards.sort();
        cards
    }

    /// Checks the card partition and seat numbering.
    pub fn validate(&self) -> Result<(), RoomError> {
        let expected: Vec<CardId> = (1..=self.catalog_size).map(CardId).collect();
        if self.card_census() != expected {
            return Err(RoomError::Internal(format!(
                "stored room {} does not account for every card exactly once",
                self.code
            )));
        }
        let mut positions: Vec<u8> = self
            .participants
            .iter()
            .filter(|p| !p.was_replaced)
            .map(|p| p.position)
            .collect();
        positions.sort_unstable();
        if positions.iter().enumerate().any(|(i, p)| usize::from(*p) != i + 1) {
            return Err(RoomError::Internal(format!(
                "stored room {} has non-dense seat positions",
                self.code
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Abstraction over the durable record backend.
pub trait Store: Send + Sync + 'static {
    /// Must commit before the room goes live. Rejects duplicate live codes
    /// with [`StoreError::Conflict`].
    fn create_room(&self, record: RoomRecord) -> BoxFuture<'static, StoreResult<()>>;
    /// Idempotent by participant id.
    fn upsert_participant(&self, record: ParticipantRecord) -> BoxFuture<'static, StoreResult<()>>;
    fn create_game_player(
        &self,
        room_id: RoomId,
        record: ParticipantRecord,
    ) -> BoxFuture<'static, StoreResult<()>>;
    fn remove_game_player(
        &self,
        room_id: RoomId,
        participant_id: ParticipantId,
    ) -> BoxFuture<'static, StoreResult<()>>;
    fn update_room_status(
        &self,
        room_id: RoomId,
        status: RoomStatus,
    ) -> BoxFuture<'static, StoreResult<()>>;
    fn create_round(&self, room_id: RoomId, round: RoundRecord) -> BoxFuture<'static, StoreResult<()>>;
    fn update_round(&self, round: RoundRecord) -> BoxFuture<'static, StoreResult<()>>;
    fn record_submission(
        &self,
        round_id: RoundId,
        participant_id: ParticipantId,
        card_id: CardId,
    ) -> BoxFuture<'static, StoreResult<()>>;
    fn record_vote(
        &self,
        round_id: RoundId,
        participant_id: ParticipantId,
        card_id: CardId,
    ) -> BoxFuture<'static, StoreResult<()>>;
    fn create_game_history(
        &self,
        room_id: RoomId,
        winner_id: ParticipantId,
    ) -> BoxFuture<'static, StoreResult<()>>;
    fn write_chat(&self, record: ChatMessageView) -> BoxFuture<'static, StoreResult<()>>;
    /// Newest first, at most `limit` lines.
    fn read_chat(
        &self,
        room_id: RoomId,
        filter: ChatHistoryFilter,
        limit: usize,
    ) -> BoxFuture<'static, StoreResult<Vec<ChatMessageView>>>;
    fn delete_room(&self, room_id: RoomId) -> BoxFuture<'static, StoreResult<()>>;
    fn save_snapshot(&self, snapshot: StoredRoom) -> BoxFuture<'static, StoreResult<()>>;
    fn load_snapshot(&self, code: RoomCode) -> BoxFuture<'static, StoreResult<Option<StoredRoom>>>;
}

/// A best-effort write queued on a room's outbox.
#[derive(Debug, Clone)]
pub enum StoreWrite {
    UpsertParticipant(ParticipantRecord),
    CreateGamePlayer(RoomId, ParticipantRecord),
    RemoveGamePlayer(RoomId, ParticipantId),
    UpdateRoomStatus(RoomId, RoomStatus),
    CreateRound(RoomId, RoundRecord),
    UpdateRound(RoundRecord),
    RecordSubmission(RoundId, ParticipantId, CardId),
    RecordVote(RoundId, ParticipantId, CardId),
    CreateGameHistory(RoomId, ParticipantId),
    WriteChat(ChatMessageView),
    DeleteRoom(RoomId),
    SaveSnapshot(Box<StoredRoom>),
}

impl StoreWrite {
    pub fn apply(self, store: &dyn Store) -> BoxFuture<'static, StoreResult<()>> {
        match self {
            Self::UpsertParticipant(r) => store.upsert_participant(r),
            Self::CreateGamePlayer(room, r) => store.create_game_player(room, r),
            Self::RemoveGamePlayer(room, p) => store.remove_game_player(room, p),
            Self::UpdateRoomStatus(room, s) => store.update_room_status(room, s),
            Self::CreateRound(room, r) => store.create_round(room, r),
            Self::UpdateRound(r) => store.update_round(r),
            Self::RecordSubmission(round, p, c) => store.record_submission(round, p, c),
            Self::RecordVote(round, p, c) => store.record_vote(round, p, c),
            Self::CreateGameHistory(room, w) => store.create_game_history(room, w),
            Self::WriteChat(c) => store.write_chat(c),
            Self::DeleteRoom(room) => store.delete_room(room),
            Self::SaveSnapshot(s) => store.save_snapshot(*s),
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UpsertParticipant(_) => "upsert_participant",
            Self::CreateGamePlayer(..) => "create_game_player",
            Self::RemoveGamePlayer(..) => "remove_game_player",
            Self::UpdateRoomStatus(..) => "update_room_status",
            Self::CreateRound(..) => "create_round",
            Self::UpdateRound(_) => "update_round",
            Self::RecordSubmission(..) => "record_submission",
            Self::RecordVote(..) => "record_vote",
            Self::CreateGameHistory(..) => "create_game_history",
            Self::WriteChat(_) => "write_chat",
            Self::DeleteRoom(_) => "delete_room",
            Self::SaveSnapshot(_) => "save_snapshot",
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Tables {
    rooms: HashMap<RoomId, RoomRecord>,
    participants: HashMap<ParticipantId, ParticipantRecord>,
    game_players: HashMap<RoomId, Vec<ParticipantId>>,
    rounds: HashMap<RoundId, (RoomId, RoundRecord)>,
    submissions: Vec<(RoundId, ParticipantId, CardId)>,
    votes: Vec<(RoundId, ParticipantId, CardId)>,
    history: Vec<(RoomId, ParticipantId)>,
    chat: Vec<ChatMessageView>,
    snapshots: HashMap<RoomCode, StoredRoom>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
}

/// An in-process [`Store`].
///
/// Cheap to clone; clones share the same tables. Tests can make it fail
/// ([`set_available`](Self::set_available)) or slow
/// ([`set_latency`](Self::set_latency)).
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// When `false`, every call fails with [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.inner.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.inner.latency_ms.store(ms, Ordering::SeqCst);
    }

    fn run<T, F>(&self, op: F) -> BoxFuture<'static, StoreResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut Tables) -> StoreResult<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        async move {
            let latency = inner.latency_ms.load(Ordering::SeqCst);
            if latency > 0 {
                tokio::time::sleep(Duration::from_millis(latency)).await;
            }
            if inner.unavailable.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("memory store switched off".into()));
            }
            let mut tables = inner
                .tables
                .lock()
                .map_err(|_| StoreError::Unavailable("memory store poisoned".into()))?;
            op(&mut tables)
        }
        .boxed()
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Option<T> {
        self.inner.tables.lock().ok().map(|t| f(&t))
    }

    pub fn room(&self, id: RoomId) -> Option<RoomRecord> {
        self.read(|t| t.rooms.get(&id).cloned()).flatten()
    }

    pub fn room_count(&self) -> usize {
        self.read(|t| t.rooms.len()).unwrap_or(0)
    }

    pub fn participant(&self, id: ParticipantId) -> Option<ParticipantRecord> {
        self.read(|t| t.participants.get(&id).cloned()).flatten()
    }

    pub fn game_players(&self, room_id: RoomId) -> Vec<ParticipantId> {
        self.read(|t| t.game_players.get(&room_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn rounds(&self, room_id: RoomId) -> Vec<RoundRecord> {
        let mut rounds: Vec<RoundRecord> = self
            .read(|t| {
                t.rounds
                    .values()
                    .filter(|(r, _)| *r == room_id)
                    .map(|(_, round)| round.clone())
                    .collect()
            })
            .unwrap_or_default();
        rounds.sort_by_key(|r| r.number);
        rounds
    }

    pub fn submissions(&self) -> Vec<(RoundId, ParticipantId, CardId)> {
        self.read(|t| t.submissions.clone()).unwrap_or_default()
    }

    pub fn votes(&self) -> Vec<(RoundId, ParticipantId, CardId)> {
        self.read(|t| t.votes.clone()).unwrap_or_default()
    }

    pub fn history(&self) -> Vec<(RoomId, ParticipantId)> {
        self.read(|t| t.history.clone()).unwrap_or_default()
    }

    pub fn chat(&self, room_id: RoomId) -> Vec<ChatMessageView> {
        self.read(|t| {
            t.chat
                .iter()
                .filter(|c| c.room_id == room_id)
                .cloned()
                .collect()
        })
        .unwrap_or_default()
    }

    pub fn snapshot(&self, code: &RoomCode) -> Option<StoredRoom> {
        self.read(|t| t.snapshots.get(code).cloned()).flatten()
    }
}

impl Store for MemoryStore {
    fn create_room(&self, record: RoomRecord) -> BoxFuture<'static, StoreResult<()>> {
        self.run(move |t| {
            let live_duplicate = t
                .rooms
                .values()
                .any(|r| r.code == record.code && !r.status.is_terminal());
            if live_duplicate {
                return Err(StoreError::Conflict(format!(
                    "room code {} is in use",
                    record.code
                )));
            }
            t.rooms.insert(record.id, record);
            Ok(())
        })
    }

    fn upsert_participant(&self, record: ParticipantRecord) -> BoxFuture<'static, StoreResult<()>> {
        self.run(move |t| {
            t.participants.insert(record.id, record);
            Ok(())
        })
    }

    fn create_game_player(
        &self,
        room_id: RoomId,
        record: ParticipantRecord,
    ) -> BoxFuture<'static, StoreResult<()>> {
        self.run(move |t| {
            let players = t.game_players.entry(room_id).or_default();
            if !players.contains(&record.id) {
                players.push(record.id);
            }
            t.participants.insert(record.id, record);
            Ok(())
        })
    }

    fn remove_game_player(
        &self,
        room_id: RoomId,
        participant_id: ParticipantId,
    ) -> BoxFuture<'static, StoreResult<()>> {
        self.run(move |t| {
            if let Some(players) = t.game_players.get_mut(&room_id) {
                players.retain(|p| *p != participant_id);
            }
            Ok(())
        })
    }

    fn update_room_status(
        &self,
        room_id: RoomId,
        status: RoomStatus,
    ) -> BoxFuture<'static, StoreResult<()>> {
        self.run(move |t| match t.rooms.get_mut(&room_id) {
            Some(room) => {
                room.status = status;
                Ok(())
            }
            None => Err(StoreError::Unavailable(format!("no room {room_id}"))),
        })
    }

    fn create_round(&self, room_id: RoomId, round: RoundRecord) -> BoxFuture<'static, StoreResult<()>> {
        self.run(move |t| {
            t.rounds.insert(round.id, (room_id, round));
            Ok(())
        })
    }

    fn update_round(&self, round: RoundRecord) -> BoxFuture<'static, StoreResult<()>> {
        self.run(move |t| match t.rounds.get_mut(&round.id) {
            Some((_, existing)) => {
                *existing = round;
                Ok(())
            }
            None => Err(StoreError::Unavailable(format!("no round {}", round.id))),
        })
    }

    fn record_submission(
        &self,
        round_id: RoundId,
        participant_id: ParticipantId,
        card_id: CardId,
    ) -> BoxFuture<'static, StoreResult<()>> {
        self.run(move |t| {
            t.submissions.push((round_id, participant_id, card_id));
            Ok(())
        })
    }

    fn record_vote(
        &self,
        round_id: RoundId,
        participant_id: ParticipantId,
        card_id: CardId,
    ) -> BoxFuture<'static, StoreResult<()>> {
        self.run(move |t| {
            t.votes.push((round_id, participant_id, card_id));
            Ok(())
        })
    }

    fn create_game_history(
        &self,
        room_id: RoomId,
        winner_id: ParticipantId,
    ) -> BoxFuture<'static, StoreResult<()>> {
        self.run(move |t| {
            t.history.push((room_id, winner_id));
            Ok(())
        })
    }

    fn write_chat(&self, record: ChatMessageView) -> BoxFuture<'static, StoreResult<()>> {
        self.run(move |t| {
            t.chat.push(record);
            Ok(())
        })
    }

    fn read_chat(
        &self,
        room_id: RoomId,
        filter: ChatHistoryFilter,
        limit: usize,
    ) -> BoxFuture<'static, StoreResult<Vec<ChatMessageView>>> {
        self.run(move |t| {
            Ok(t.chat
                .iter()
                .rev()
                .filter(|c| c.room_id == room_id && filter.matches(c.phase))
                .take(limit)
                .cloned()
                .collect())
        })
    }

    fn delete_room(&self, room_id: RoomId) -> BoxFuture<'static, StoreResult<()>> {
        self.run(move |t| {
            if let Some(record) = t.rooms.remove(&room_id) {
                t.snapshots.remove(&record.code);
            }
            t.game_players.remove(&room_id);
            Ok(())
        })
    }

    fn save_snapshot(&self, snapshot: StoredRoom) -> BoxFuture<'static, StoreResult<()>> {
        self.run(move |t| {
            t.snapshots.insert(snapshot.code.clone(), snapshot);
            Ok(())
        })
    }

    fn load_snapshot(&self, code: RoomCode) -> BoxFuture<'static, StoreResult<Option<StoredRoom>>> {
        self.run(move |t| Ok(t.snapshots.get(&code).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dixit_protocol::{ChatKind, ChatMessageId, ChatPhase};

    fn room_record(code: &str) -> RoomRecord {
        RoomRecord {
            id: RoomId::random(),
            code: RoomCode::from(code),
            status: RoomStatus::Waiting,
            created_at: Utc::now(),
        }
    }

    fn chat(room_id: RoomId, text: &str, phase: ChatPhase) -> ChatMessageView {
        ChatMessageView {
            id: ChatMessageId::random(),
            room_id,
            sender_id: None,
            sender_name: None,
            message: text.into(),
            message_type: ChatKind::System,
            phase,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_room_rejects_live_duplicate_code() {
        let store = MemoryStore::new();
        store.create_room(room_record("XYZ789")).await.unwrap();
        let err = store.create_room(room_record("XYZ789")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.room_count(), 1);
    }

    #[tokio::test]
    async fn test_create_room_allows_code_of_finished_room() {
        let store = MemoryStore::new();
        let first = room_record("AAA111");
        let first_id = first.id;
        store.create_room(first).await.unwrap();
        store
            .update_room_status(first_id, RoomStatus::Abandoned)
            .await
            .unwrap();
        store.create_room(room_record("AAA111")).await.unwrap();
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_available(false);
        let err = store.create_room(room_record("R1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_read_chat_is_newest_first_filtered_and_limited() {
        let store = MemoryStore::new();
        let room = RoomId::random();
        for (text, phase) in [
            ("one", ChatPhase::Lobby),
            ("two", ChatPhase::Voting),
            ("three", ChatPhase::Lobby),
            ("four", ChatPhase::Lobby),
        ] {
            store.write_chat(chat(room, text, phase)).await.unwrap();
        }
        let lines = store
            .read_chat(room, ChatHistoryFilter::Lobby, 2)
            .await
            .unwrap();
        let texts: Vec<_> = lines.iter().map(|c| c.message.as_str()).collect();
        assert_eq!(texts, vec!["four", "three"]);
    }

    #[tokio::test]
    async fn test_create_game_player_is_idempotent() {
        let store = MemoryStore::new();
        let room = RoomId::random();
        let record = ParticipantRecord {
            id: ParticipantId::random(),
            name: "Alice".into(),
            position: 1,
            score: 0,
            is_bot: false,
            bot_level: None,
            was_replaced: false,
            replacement_id: None,
        };
        store.create_game_player(room, record.clone()).await.unwrap();
        store.create_game_player(room, record.clone()).await.unwrap();
        assert_eq!(store.game_players(room), vec![record.id]);
    }

    #[test]
    fn test_validate_detects_missing_card() {
        let stored = StoredRoom {
            id: RoomId::random(),
            code: RoomCode::from("R1"),
            status: RoomStatus::Waiting,
            catalog_size: 3,
            round_number: 0,
            participants: Vec::new(),
            deck: vec![CardId(1), CardId(2)],
            used_cards: Vec::new(),
            current_round: None,
            created_at: Utc::now(),
            last_activity_at: Utc::now(),
        };
        assert!(stored.validate().is_err());

        let complete = StoredRoom {
            deck: vec![CardId(3), CardId(1), CardId(2)],
            ..stored
        };
        assert!(complete.validate().is_ok());
    }
}
