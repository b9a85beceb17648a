//! The rules of one room, as synchronous state transitions.
//!
//! [`RoomState`] is what the room's `RwLock` protects. Every operation
//! validates first, then mutates, then records the side effects it wants
//! (events, store writes, timers) as [`Effect`]s. The async wrapper in
//! `room.rs` turns those effects into outbox items and spawned tasks
//! before releasing the lock, so nothing here awaits or performs I/O.

use std::cmp::Reverse;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dixit_protocol::{
    BotDifficulty, CardId, CardSubmitted, ChatKind, ChatMessageId, ChatMessageView, ChatPhase,
    ClueSubmitted, EndReason, FinalScore, GameCompleted, GameDeleted, GameSnapshot, GameStarted,
    ParticipantId, PlayerJoined, PlayerLeft, PlayerReplaced, RoomCode, RoomId, RoomStatus,
    RoundCompleted, RoundId, RoundPhase, RoundStarted, ScoreChange, ServerEvent, VoteSubmitted,
    VoteView, VotingStarted,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use tokio::time::Instant;

use crate::bot::{self, BOT_NAMES, BotAction};
use crate::deck::Deck;
use crate::outbox::FailedSink;
use crate::participant::{Participant, ParticipantSink};
use crate::round::Round;
use crate::store::{ParticipantRecord, RoundRecord, StoreWrite, StoredParticipant, StoredRoom};
use crate::{EngineConfig, RoomError};

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

/// Background work a transition asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Timer {
    /// Let `bot_id` perform `action` in round `round_id` after `delay`.
    Bot {
        bot_id: ParticipantId,
        action: BotAction,
        round_id: RoundId,
        delay: Duration,
    },
    /// Start the round after `round_id` once `delay` has passed.
    NextRound { round_id: RoundId, delay: Duration },
}

#[derive(Debug)]
pub(crate) enum Effect {
    /// One frame to the sinks that were connected when it was emitted.
    Send {
        to: Vec<(ParticipantId, ParticipantSink)>,
        event: ServerEvent,
    },
    /// A personal `game_state` to every connected human.
    Snapshot,
    /// A personal `game_state` to one participant.
    SnapshotTo(ParticipantId),
    Persist(StoreWrite),
    Mirror,
    Unmirror,
    Schedule(Timer),
}

/// Result of a successful [`RoomState::join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A new seat was created.
    Joined,
    /// An existing participant re-attached a connection.
    Reconnected,
}

/// What the janitor needs to know about a room.
#[derive(Debug, Clone)]
pub(crate) struct Inspection {
    pub status: RoomStatus,
    pub connected_humans: usize,
    pub idle: Duration,
    /// Humans that should be handed to a bot, with the reason.
    pub afk: Vec<(ParticipantId, &'static str)>,
}

/// Everything a bot needs to decide, copied out of the lock.
#[derive(Debug, Clone)]
pub(crate) struct BotPlan {
    pub level: BotDifficulty,
    pub hand: Vec<CardId>,
    pub clue: String,
    pub revealed: Vec<CardId>,
    pub own: Vec<CardId>,
}

// ---------------------------------------------------------------------------
// RoomState
// ---------------------------------------------------------------------------

pub(crate) struct RoomState {
    pub id: RoomId,
    pub code: RoomCode,
    pub status: RoomStatus,
    /// Set until the store has committed the room record.
    pub pending: bool,
    pub participants: Vec<Participant>,
    pub deck: Deck,
    pub used: Vec<CardId>,
    pub round: Option<Round>,
    pub round_number: u32,
    pub created_at: DateTime<Utc>,
    pub last_activity: Instant,
    pub last_activity_at: DateTime<Utc>,
    config: EngineConfig,
    rng: StdRng,
    effects: Vec<Effect>,
}

fn room_rng(config: &EngineConfig) -> StdRng {
    match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

fn participant_record(p: &Participant) -> ParticipantRecord {
    ParticipantRecord {
        id: p.id,
        name: p.name.clone(),
        position: p.position,
        score: p.score,
        is_bot: p.is_bot,
        bot_level: p.bot_level,
        was_replaced: p.was_replaced,
        replacement_id: p.replacement_id,
    }
}

impl RoomState {
    /// A fresh lobby holding only its creator.
    pub fn new(
        id: RoomId,
        code: RoomCode,
        config: EngineConfig,
        creator: Participant,
    ) -> Self {
        let mut rng = room_rng(&config);
        let deck = Deck::shuffled(config.catalog_size, &mut rng);
        let now = Utc::now();
        Self {
            id,
            code,
            status: RoomStatus::Waiting,
            pending: true,
            participants: vec![creator],
            deck,
            used: Vec::new(),
            round: None,
            round_number: 0,
            created_at: now,
            last_activity: Instant::now(),
            last_activity_at: now,
            config,
            rng,
            effects: Vec::new(),
        }
    }

    /// Rebuilds a room from its durable snapshot. `sink_for` supplies the
    /// live connection of any human that is currently online.
    pub fn from_stored(
        stored: StoredRoom,
        config: EngineConfig,
        sink_for: impl Fn(ParticipantId) -> Option<ParticipantSink>,
    ) -> Result<Self, RoomError> {
        stored.validate()?;
        let now = Instant::now();
        let participants = stored
            .participants
            .into_iter()
            .map(|p| {
                let sink = if p.is_bot { None } else { sink_for(p.id) };
                Participant {
                    id: p.id,
                    name: p.name,
                    position: p.position,
                    score: p.score,
                    hand: p.hand,
                    is_bot: p.is_bot,
                    bot_level: p.bot_level,
                    is_connected: p.is_bot || sink.is_some(),
                    is_active: p.is_active,
                    was_replaced: p.was_replaced,
                    replacement_id: p.replacement_id,
                    last_activity: now,
                    sink,
                }
            })
            .collect();
        Ok(Self {
            id: stored.id,
            code: stored.code,
            status: stored.status,
            pending: false,
            participants,
            deck: Deck::from_cards(stored.deck),
            used: stored.used_cards,
            round: stored.current_round,
            round_number: stored.round_number,
            created_at: stored.created_at,
            last_activity: now,
            last_activity_at: stored.last_activity_at,
            rng: room_rng(&config),
            config,
            effects: Vec::new(),
        })
    }

    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    fn emit(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    fn broadcast(&mut self, event: ServerEvent) {
        let to = self.recipients();
        self.emit(Effect::Send { to, event });
    }

    fn persist(&mut self, write: StoreWrite) {
        self.emit(Effect::Persist(write));
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    fn participant_mut(&mut self, id: ParticipantId) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.id == id)
    }

    /// Seats in position order. Replaced humans are not seats.
    pub fn seats(&self) -> Vec<&Participant> {
        let mut seats: Vec<&Participant> =
            self.participants.iter().filter(|p| p.is_seated()).collect();
        seats.sort_by_key(|p| p.position);
        seats
    }

    fn seat_count(&self) -> usize {
        self.participants.iter().filter(|p| p.is_seated()).count()
    }

    /// Submissions (and votes) a round needs before it moves on.
    fn expected_actions(&self) -> usize {
        self.seat_count().saturating_sub(1)
    }

    /// Connected humans and their sinks.
    pub fn recipients(&self) -> Vec<(ParticipantId, ParticipantSink)> {
        self.participants
            .iter()
            .filter(|p| !p.is_bot && p.is_connected)
            .filter_map(|p| p.sink.clone().map(|s| (p.id, s)))
            .collect()
    }

    pub fn sink_of(&self, id: ParticipantId) -> Option<ParticipantSink> {
        self.participant(id)
            .filter(|p| p.is_connected)
            .and_then(|p| p.sink.clone())
    }

    fn ensure_live(&self) -> Result<(), RoomError> {
        if self.pending {
            return Err(RoomError::GameNotFound);
        }
        Ok(())
    }

    /// Any participant, replaced or not.
    pub fn ensure_member(&self, id: ParticipantId) -> Result<&Participant, RoomError> {
        self.ensure_live()?;
        self.participant(id).ok_or(RoomError::NotAParticipant)
    }

    /// A participant still holding a seat.
    fn actor(&self, id: ParticipantId) -> Result<&Participant, RoomError> {
        let p = self.participant(id).ok_or(RoomError::NotAParticipant)?;
        if p.was_replaced {
            return Err(RoomError::AlreadyReplaced);
        }
        Ok(p)
    }

    fn active_round(&self) -> Result<&Round, RoomError> {
        if self.status != RoomStatus::InProgress {
            return Err(RoomError::NoActiveRound);
        }
        self.round.as_ref().ok_or(RoomError::NoActiveRound)
    }

    pub fn chat_phase(&self) -> ChatPhase {
        match self.status {
            RoomStatus::Waiting => ChatPhase::Lobby,
            RoomStatus::Completed | RoomStatus::Abandoned => ChatPhase::Finished,
            RoomStatus::InProgress => match self.round.as_ref().map(|r| r.phase) {
                Some(RoundPhase::Storytelling) | None => ChatPhase::Storytelling,
                Some(RoundPhase::Submitting) => ChatPhase::Submitting,
                Some(RoundPhase::Voting) => ChatPhase::Voting,
                Some(RoundPhase::Scoring | RoundPhase::Completed) => ChatPhase::Scoring,
            },
        }
    }

    fn touch(&mut self, id: Option<ParticipantId>) {
        let now = Instant::now();
        self.last_activity = now;
        self.last_activity_at = Utc::now();
        if let Some(p) = id.and_then(|id| self.participant_mut(id)) {
            p.last_activity = now;
        }
    }

    fn set_status(&mut self, next: RoomStatus) -> Result<(), RoomError> {
        if !self.status.can_transition_to(next) {
            return Err(RoomError::Internal(format!(
                "room {} cannot move from {} to {}",
                self.code, self.status, next
            )));
        }
        tracing::info!(room_code = %self.code, from = %self.status, to = %next, "room status changed");
        self.status = next;
        self.persist(StoreWrite::UpdateRoomStatus(self.id, next));
        Ok(())
    }

    fn system_chat(&mut self, text: String) {
        let line = ChatMessageView {
            id: ChatMessageId::random(),
            room_id: self.id,
            sender_id: None,
            sender_name: None,
            message: text,
            message_type: ChatKind::System,
            phase: self.chat_phase(),
            created_at: Utc::now(),
        };
        self.persist(StoreWrite::WriteChat(line.clone()));
        self.broadcast(ServerEvent::ChatMessage(line));
    }

    fn checkpoint(&mut self) {
        let stored = self.to_stored();
        self.persist(StoreWrite::SaveSnapshot(Box::new(stored)));
        self.emit(Effect::Mirror);
    }

    // -----------------------------------------------------------------------
    // Lobby
    // -----------------------------------------------------------------------

    /// Called once the store has accepted the room record.
    pub fn commit(&mut self) {
        self.pending = false;
        let creator = self.participants.first().map(|p| (participant_record(p), p.name.clone()));
        if let Some((record, name)) = creator {
            self.persist(StoreWrite::UpsertParticipant(record.clone()));
            self.persist(StoreWrite::CreateGamePlayer(self.id, record));
            self.system_chat(format!("{name} created the game"));
        }
        self.emit(Effect::Snapshot);
        self.emit(Effect::Mirror);
    }

    pub fn join(
        &mut self,
        id: ParticipantId,
        name: String,
        sink: Option<ParticipantSink>,
    ) -> Result<JoinOutcome, RoomError> {
        self.ensure_live()?;

        if let Some(existing) = self.participant(id) {
            if existing.was_replaced {
                return Err(RoomError::AlreadyReplaced);
            }
            let live = existing.sink.as_ref().is_some_and(|s| !s.is_closed());
            if self.status == RoomStatus::Waiting && live {
                return Err(RoomError::AlreadyJoined);
            }
            return Ok(self.reconnect(id, sink));
        }

        if !self.status.is_joinable() {
            return Err(RoomError::GameStarted);
        }
        let seats = self.seat_count();
        if seats >= self.config.max_players {
            return Err(RoomError::RoomFull);
        }

        let position = u8::try_from(seats + 1)
            .map_err(|_| RoomError::Internal("seat position overflow".into()))?;
        let participant = Participant::human(id, name, position, sink);
        let view = participant.view(false);
        let record = participant_record(&participant);
        let name = participant.name.clone();
        self.participants.push(participant);

        tracing::info!(room_code = %self.code, participant_id = %id, position, "player joined");
        self.persist(StoreWrite::UpsertParticipant(record.clone()));
        self.persist(StoreWrite::CreateGamePlayer(self.id, record));
        self.broadcast(ServerEvent::PlayerJoined(PlayerJoined { player: view }));
        self.system_chat(format!("{name} joined the game"));
        self.touch(Some(id));
        self.emit(Effect::Snapshot);
        self.emit(Effect::Mirror);
        Ok(JoinOutcome::Joined)
    }

    fn reconnect(&mut self, id: ParticipantId, sink: Option<ParticipantSink>) -> JoinOutcome {
        if let Some(p) = self.participant_mut(id) {
            if let Some(sink) = sink {
                p.attach(sink);
            }
            p.is_active = true;
        }
        tracing::info!(room_code = %self.code, participant_id = %id, "participant reconnected");
        self.touch(Some(id));
        self.emit(Effect::Snapshot);
        JoinOutcome::Reconnected
    }

    pub fn add_bot(
        &mut self,
        caller: ParticipantId,
        difficulty: BotDifficulty,
    ) -> Result<ParticipantId, RoomError> {
        self.ensure_member(caller)?;
        if !self.status.is_joinable() {
            return Err(RoomError::GameStarted);
        }
        let seats = self.seat_count();
        if seats >= self.config.max_players {
            return Err(RoomError::RoomFull);
        }

        let taken: Vec<&str> = self.participants.iter().map(|p| p.name.as_str()).collect();
        let free: Vec<&str> = BOT_NAMES
            .iter()
            .copied()
            .filter(|n| !taken.contains(n))
            .collect();
        let name = match free.choose(&mut self.rng) {
            Some(name) => (*name).to_string(),
            None => format!("Bot {}", seats + 1),
        };

        let position = u8::try_from(seats + 1)
            .map_err(|_| RoomError::Internal("seat position overflow".into()))?;
        let bot = Participant::bot(name.clone(), position, difficulty);
        let bot_id = bot.id;
        let view = bot.view(false);
        let record = participant_record(&bot);
        self.participants.push(bot);

        tracing::info!(room_code = %self.code, bot_id = %bot_id, ?difficulty, "bot added");
        self.persist(StoreWrite::UpsertParticipant(record.clone()));
        self.persist(StoreWrite::CreateGamePlayer(self.id, record));
        self.broadcast(ServerEvent::PlayerJoined(PlayerJoined { player: view }));
        self.system_chat(format!("{name} (bot) joined the game"));
        self.touch(Some(caller));
        self.emit(Effect::Snapshot);
        self.emit(Effect::Mirror);
        Ok(bot_id)
    }

    pub fn remove_participant(&mut self, id: ParticipantId) -> Result<(), RoomError> {
        self.ensure_live()?;
        let p = self.participant(id).ok_or(RoomError::ParticipantNotFound)?;
        let name = p.name.clone();
        let left = ServerEvent::PlayerLeft(PlayerLeft {
            player_id: id,
            player_name: name.clone(),
        });
        // Addressed before the seat changes so the leaver still receives it.
        self.broadcast(left);

        match self.status {
            RoomStatus::Waiting => {
                self.participants.retain(|p| p.id != id);
                let mut seats: Vec<&mut Participant> = self.participants.iter_mut().collect();
                seats.sort_by_key(|p| p.position);
                for (i, p) in seats.into_iter().enumerate() {
                    p.position = u8::try_from(i + 1).unwrap_or(u8::MAX);
                }
                self.persist(StoreWrite::RemoveGamePlayer(self.id, id));
                tracing::info!(room_code = %self.code, participant_id = %id, "player left lobby");
            }
            _ => {
                if let Some(p) = self.participant_mut(id) {
                    p.is_active = false;
                    p.detach();
                    p.last_activity = Instant::now();
                }
                tracing::info!(room_code = %self.code, participant_id = %id, "player left game");
            }
        }
        self.system_chat(format!("{name} left the game"));
        self.touch(None);
        self.emit(Effect::Snapshot);
        self.emit(Effect::Mirror);
        Ok(())
    }

    pub fn delete(&mut self, caller: ParticipantId) -> Result<(), RoomError> {
        self.ensure_member(caller)?;
        if self.status != RoomStatus::Waiting {
            return Err(RoomError::GameStarted);
        }
        self.set_status(RoomStatus::Abandoned)?;
        self.broadcast(ServerEvent::GameDeleted(GameDeleted {
            room_code: self.code.clone(),
        }));
        self.persist(StoreWrite::DeleteRoom(self.id));
        self.emit(Effect::Unmirror);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Play
    // -----------------------------------------------------------------------

    pub fn start(&mut self, caller: ParticipantId) -> Result<(), RoomError> {
        self.ensure_live()?;
        if self.status != RoomStatus::Waiting {
            return Err(RoomError::GameStarted);
        }
        self.actor(caller)?;
        if self.seat_count() < self.config.min_players {
            return Err(RoomError::NotEnoughPlayers);
        }

        self.set_status(RoomStatus::InProgress)?;
        let hand_size = self.config.hand_size;
        let mut order: Vec<usize> = (0..self.participants.len())
            .filter(|i| self.participants[*i].is_seated())
            .collect();
        order.sort_by_key(|i| self.participants[*i].position);
        for i in order {
            let cards = self.deck.draw(hand_size);
            self.participants[i].hand = cards;
        }

        let players = self.seats().into_iter().map(|p| p.view(false)).collect();
        self.broadcast(ServerEvent::GameStarted(GameStarted {
            room_code: self.code.clone(),
            players,
        }));
        tracing::info!(room_code = %self.code, seats = self.seat_count(), "game started");
        self.begin_round()?;
        self.touch(Some(caller));
        self.checkpoint();
        Ok(())
    }

    /// Retires the previous round's cards and opens storytelling for the
    /// next seat in rotation.
    fn begin_round(&mut self) -> Result<(), RoomError> {
        if let Some(previous) = self.round.take() {
            self.used.extend(previous.cards());
        }
        let seats: Vec<(u8, ParticipantId)> =
            self.seats().iter().map(|p| (p.position, p.id)).collect();
        let count = u32::try_from(seats.len()).unwrap_or(u32::MAX);
        if count == 0 {
            return Err(RoomError::Internal("no seats to start a round".into()));
        }

        self.round_number += 1;
        let wanted = (self.round_number - 1) % count + 1;
        let storyteller_id = seats
            .iter()
            .find(|(pos, _)| u32::from(*pos) == wanted)
            .or_else(|| seats.first())
            .map(|(_, id)| *id)
            .ok_or_else(|| RoomError::Internal("no storyteller".into()))?;

        let round = Round::new(self.round_number, storyteller_id);
        tracing::info!(
            room_code = %self.code,
            round = round.number,
            storyteller_id = %storyteller_id,
            "round started"
        );
        self.persist(StoreWrite::CreateRound(self.id, RoundRecord::from(&round)));
        self.broadcast(ServerEvent::RoundStarted(RoundStarted {
            round_id: round.id,
            round_number: round.number,
            storyteller_id,
        }));
        self.round = Some(round);
        self.schedule_bots();
        self.emit(Effect::Snapshot);
        Ok(())
    }

    pub fn submit_clue(
        &mut self,
        caller: ParticipantId,
        clue: &str,
        card: CardId,
    ) -> Result<(), RoomError> {
        self.ensure_live()?;
        let round = self.active_round()?;
        let actor = self.actor(caller)?;
        if round.storyteller_id != caller {
            return Err(RoomError::NotStoryteller);
        }
        if round.phase != RoundPhase::Storytelling {
            return Err(RoomError::WrongPhase);
        }
        let clue = clue.trim();
        if clue.len() > self.config.clue_max_bytes {
            return Err(RoomError::MessageTooLong);
        }
        if !actor.holds(card) {
            return Err(RoomError::CardNotInHand);
        }

        if let Some(p) = self.participant_mut(caller) {
            p.play(card);
        }
        let round = self.round.as_mut().ok_or(RoomError::NoActiveRound)?;
        round.tell(clue.to_string(), card)?;
        let record = RoundRecord::from(&*round);
        let event = ClueSubmitted {
            round_number: round.number,
            storyteller_id: caller,
            clue: round.clue.clone(),
        };

        tracing::debug!(room_code = %self.code, participant_id = %caller, "clue submitted");
        self.persist(StoreWrite::UpdateRound(record));
        self.broadcast(ServerEvent::ClueSubmitted(event));
        self.schedule_bots();
        self.touch(Some(caller));
        self.emit(Effect::Snapshot);
        Ok(())
    }

    pub fn submit_card(&mut self, caller: ParticipantId, card: CardId) -> Result<(), RoomError> {
        self.ensure_live()?;
        let round = self.active_round()?;
        let actor = self.actor(caller)?;
        if round.storyteller_id == caller {
            return Err(RoomError::StorytellerCannotSubmit);
        }
        if round.phase != RoundPhase::Submitting {
            return Err(RoomError::WrongPhase);
        }
        if round.has_submitted(caller) {
            return Err(RoomError::AlreadySubmitted);
        }
        if !actor.holds(card) {
            return Err(RoomError::CardNotInHand);
        }

        let expected = self.expected_actions();
        if let Some(p) = self.participant_mut(caller) {
            p.play(card);
        }
        let round = self.round.as_mut().ok_or(RoomError::NoActiveRound)?;
        round.submissions.push((caller, card));
        let round_id = round.id;
        let submitted = round.submissions.len();

        self.persist(StoreWrite::RecordSubmission(round_id, caller, card));
        self.broadcast(ServerEvent::CardSubmitted(CardSubmitted {
            player_id: caller,
            submitted: submitted as u32,
            expected: expected as u32,
        }));
        if submitted >= expected {
            self.open_voting()?;
        }
        self.touch(Some(caller));
        self.emit(Effect::Snapshot);
        Ok(())
    }

    fn open_voting(&mut self) -> Result<(), RoomError> {
        let round = self.round.as_mut().ok_or(RoomError::NoActiveRound)?;
        round.begin_voting(&mut self.rng)?;
        let event = VotingStarted {
            round_number: round.number,
            cards: round.reveal.clone(),
        };
        let record = RoundRecord::from(&*round);

        tracing::debug!(room_code = %self.code, round = event.round_number, "voting opened");
        self.persist(StoreWrite::UpdateRound(record));
        self.broadcast(ServerEvent::VotingStarted(event));
        self.schedule_bots();
        Ok(())
    }

    pub fn submit_vote(&mut self, caller: ParticipantId, card: CardId) -> Result<(), RoomError> {
        self.ensure_live()?;
        let round = self.active_round()?;
        self.actor(caller)?;
        if round.storyteller_id == caller {
            return Err(RoomError::StorytellerCannotVote);
        }
        if round.phase != RoundPhase::Voting {
            return Err(RoomError::WrongPhase);
        }
        if round.has_voted(caller) {
            return Err(RoomError::AlreadyVoted);
        }
        if !round.reveal.contains(&card) {
            return Err(RoomError::InvalidCard);
        }

        let expected = self.expected_actions();
        let round = self.round.as_mut().ok_or(RoomError::NoActiveRound)?;
        round.votes.push((caller, card));
        let round_id = round.id;
        let votes = round.votes.len();

        self.persist(StoreWrite::RecordVote(round_id, caller, card));
        self.broadcast(ServerEvent::VoteSubmitted(VoteSubmitted {
            player_id: caller,
            votes: votes as u32,
            expected: expected as u32,
        }));
        self.touch(Some(caller));
        if votes >= expected {
            self.complete_round()?;
        }
        self.emit(Effect::Snapshot);
        Ok(())
    }

    fn complete_round(&mut self) -> Result<(), RoomError> {
        let round = self.round.as_mut().ok_or(RoomError::NoActiveRound)?;
        let gains = round.conclude()?;
        let storyteller_card = round
            .storyteller_card
            .ok_or_else(|| RoomError::Internal("completed round has no storyteller card".into()))?;
        let round_id = round.id;
        let round_number = round.number;
        let storyteller_id = round.storyteller_id;
        let revealed_cards = round.revealed();
        let votes = round
            .votes
            .iter()
            .map(|(voter_id, card_id)| VoteView {
                voter_id: *voter_id,
                card_id: *card_id,
            })
            .collect();
        let record = RoundRecord::from(&*round);

        let mut score_changes: Vec<(u8, ScoreChange)> = Vec::new();
        for p in self.participants.iter_mut() {
            if let Some(gained) = gains.get(&p.id) {
                p.score += gained;
                score_changes.push((
                    p.position,
                    ScoreChange {
                        player_id: p.id,
                        gained: *gained,
                        total: p.score,
                    },
                ));
            }
        }
        score_changes.sort_by_key(|(pos, _)| *pos);

        tracing::info!(room_code = %self.code, round = round_number, "round completed");
        self.persist(StoreWrite::UpdateRound(record));
        self.broadcast(ServerEvent::RoundCompleted(RoundCompleted {
            round_number,
            storyteller_id,
            storyteller_card,
            revealed_cards,
            votes,
            score_changes: score_changes.into_iter().map(|(_, c)| c).collect(),
        }));

        self.refill_hands();
        match self.end_reason() {
            Some(reason) => self.finish(reason)?,
            None => {
                let delay = self.config.next_round_delay;
                self.emit(Effect::Schedule(Timer::NextRound { round_id, delay }));
            }
        }
        self.checkpoint();
        Ok(())
    }

    fn refill_hands(&mut self) {
        let hand_size = self.config.hand_size;
        let mut order: Vec<usize> = (0..self.participants.len())
            .filter(|i| self.participants[*i].is_seated())
            .collect();
        order.sort_by_key(|i| self.participants[*i].position);
        for i in order {
            let missing = hand_size.saturating_sub(self.participants[i].hand.len());
            let cards = self.deck.draw(missing);
            self.participants[i].hand.extend(cards);
        }
    }

    fn end_reason(&self) -> Option<EndReason> {
        if self
            .seats()
            .iter()
            .any(|p| p.score >= self.config.winning_score)
        {
            return Some(EndReason::ScoreLimit);
        }
        self.deck.is_empty().then_some(EndReason::DeckExhausted)
    }

    fn finish(&mut self, reason: EndReason) -> Result<(), RoomError> {
        let seats = self.seats();
        let winner_id = seats
            .iter()
            .max_by_key(|p| (p.score, Reverse(p.position)))
            .map(|p| p.id)
            .ok_or_else(|| RoomError::Internal("no seats at game end".into()))?;
        let final_scores = seats
            .iter()
            .map(|p| FinalScore {
                player_id: p.id,
                player_name: p.name.clone(),
                score: p.score,
                position: p.position,
            })
            .collect();

        self.set_status(RoomStatus::Completed)?;
        tracing::info!(room_code = %self.code, winner_id = %winner_id, ?reason, "game completed");
        self.persist(StoreWrite::CreateGameHistory(self.id, winner_id));
        self.broadcast(ServerEvent::GameCompleted(GameCompleted {
            winner_id,
            final_scores,
            reason: reason.message().to_string(),
        }));
        Ok(())
    }

    /// Fired by the inter-round timer. A no-op if the room moved on.
    pub fn start_next_round(&mut self, after: RoundId) -> Result<(), RoomError> {
        let due = self.status == RoomStatus::InProgress
            && self
                .round
                .as_ref()
                .is_some_and(|r| r.id == after && r.phase == RoundPhase::Completed);
        if !due {
            return Ok(());
        }
        self.begin_round()?;
        self.checkpoint();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bots and replacement
    // -----------------------------------------------------------------------

    /// Schedules every bot action the current phase is waiting for.
    fn schedule_bots(&mut self) {
        let Some(round) = self.round.as_ref() else {
            return;
        };
        let owed: Vec<(ParticipantId, BotAction)> = self
            .participants
            .iter()
            .filter(|p| p.is_bot && p.is_seated())
            .filter_map(|p| round.owed_action(p.id).map(|a| (p.id, a)))
            .collect();
        let round_id = round.id;
        for (bot_id, action) in owed {
            self.schedule_bot(bot_id, action, round_id);
        }
    }

    fn schedule_bot(&mut self, bot_id: ParticipantId, action: BotAction, round_id: RoundId) {
        let range = match action {
            BotAction::Clue => self.config.bot_clue_delay,
            BotAction::Submit => self.config.bot_submit_delay,
            BotAction::Vote => self.config.bot_vote_delay,
        };
        let delay = bot::think_time(&mut self.rng, range);
        tracing::debug!(room_code = %self.code, bot_id = %bot_id, ?action, ?delay, "bot action scheduled");
        self.emit(Effect::Schedule(Timer::Bot {
            bot_id,
            action,
            round_id,
            delay,
        }));
    }

    /// What a bot needs to act, or `None` if the action is no longer owed.
    pub fn bot_plan(
        &self,
        bot_id: ParticipantId,
        action: BotAction,
        round_id: RoundId,
    ) -> Option<BotPlan> {
        if self.status != RoomStatus::InProgress {
            return None;
        }
        let round = self.round.as_ref().filter(|r| r.id == round_id)?;
        if round.owed_action(bot_id) != Some(action) {
            return None;
        }
        let bot = self
            .participant(bot_id)
            .filter(|p| p.is_bot && p.is_seated())?;
        Some(BotPlan {
            level: bot.bot_level.unwrap_or_default(),
            hand: bot.hand.clone(),
            clue: round.clue.clone(),
            revealed: round.reveal.clone(),
            own: round.submission_of(bot_id).into_iter().collect(),
        })
    }

    pub fn replace_with_bot(
        &mut self,
        target: ParticipantId,
        reason: &str,
    ) -> Result<ParticipantId, RoomError> {
        self.ensure_live()?;
        let human = self.participant(target).ok_or(RoomError::ParticipantNotFound)?;
        if human.is_bot {
            return Err(RoomError::IsBot);
        }
        if human.was_replaced {
            return Err(RoomError::AlreadyReplaced);
        }
        if self.status != RoomStatus::InProgress {
            return Err(RoomError::GameNotStarted);
        }

        let mut bot = Participant::bot(
            bot::replacement_name(&human.name),
            human.position,
            BotDifficulty::Medium,
        );
        bot.score = human.score;
        let bot_id = bot.id;
        let human_name = human.name.clone();

        let Some(human) = self.participant_mut(target) else {
            return Err(RoomError::ParticipantNotFound);
        };
        bot.hand = std::mem::take(&mut human.hand);
        human.was_replaced = true;
        human.is_active = false;
        human.replacement_id = Some(bot_id);
        let human_record = participant_record(human);

        let bot_view = bot.view(false);
        let bot_record = participant_record(&bot);
        let bot_name = bot.name.clone();
        self.participants.push(bot);
        if let Some(round) = self.round.as_mut() {
            round.reassign(target, bot_id);
        }

        tracing::info!(
            room_code = %self.code,
            participant_id = %target,
            bot_id = %bot_id,
            reason,
            "participant replaced by bot"
        );
        self.persist(StoreWrite::UpsertParticipant(human_record));
        self.persist(StoreWrite::UpsertParticipant(bot_record.clone()));
        self.persist(StoreWrite::CreateGamePlayer(self.id, bot_record));
        self.broadcast(ServerEvent::PlayerReplaced(PlayerReplaced {
            replaced_id: target,
            replaced_name: human_name.clone(),
            bot: bot_view,
            reason: reason.to_string(),
        }));
        self.system_chat(format!("{bot_name} took over for {human_name}"));

        let owed = self
            .round
            .as_ref()
            .and_then(|r| r.owed_action(bot_id).map(|a| (a, r.id)));
        if let Some((action, round_id)) = owed {
            self.schedule_bot(bot_id, action, round_id);
        }
        self.emit(Effect::Snapshot);
        self.checkpoint();
        Ok(bot_id)
    }

    // -----------------------------------------------------------------------
    // Chat
    // -----------------------------------------------------------------------

    pub fn send_chat(
        &mut self,
        caller: ParticipantId,
        message: &str,
        kind: ChatKind,
    ) -> Result<(), RoomError> {
        let sender_name = self.ensure_member(caller)?.name.clone();
        let phase = self.chat_phase();
        if !matches!(phase, ChatPhase::Lobby | ChatPhase::Voting) {
            return Err(RoomError::ChatNotAllowedInPhase);
        }
        let message = message.trim();
        if message.is_empty() {
            return Err(RoomError::EmptyMessage);
        }
        if message.len() > self.config.chat_max_bytes {
            return Err(RoomError::MessageTooLong);
        }
        let kind = match kind {
            ChatKind::System => ChatKind::Chat,
            other => other,
        };

        let line = ChatMessageView {
            id: ChatMessageId::random(),
            room_id: self.id,
            sender_id: Some(caller),
            sender_name: Some(sender_name),
            message: message.to_string(),
            message_type: kind,
            phase,
            created_at: Utc::now(),
        };
        self.persist(StoreWrite::WriteChat(line.clone()));
        self.broadcast(ServerEvent::ChatMessage(line));
        self.touch(Some(caller));
        Ok(())
    }

    /// Queues `event` for `to` alone.
    pub fn send_private(&mut self, to: ParticipantId, event: ServerEvent) {
        let to = self.sink_of(to).map(|s| (to, s)).into_iter().collect();
        self.emit(Effect::Send { to, event });
    }

    /// Queues a personal `game_state` for `to`.
    pub fn send_snapshot(&mut self, to: ParticipantId) {
        self.emit(Effect::SnapshotTo(to));
    }

    // -----------------------------------------------------------------------
    // Connectivity and closure
    // -----------------------------------------------------------------------

    /// Drops sinks that failed a write. A sink replaced since the write is
    /// left alone.
    pub fn demote(&mut self, failed: &[FailedSink]) -> usize {
        let mut demoted = 0;
        for f in failed {
            let Some(p) = self.participant_mut(f.participant_id) else {
                continue;
            };
            if p.sink.as_ref().map(|s| s.id()) != Some(f.sink_id) {
                continue;
            }
            p.detach();
            demoted += 1;
            tracing::warn!(
                participant_id = %f.participant_id,
                error = %f.error,
                "sink demoted after failed write"
            );
        }
        if demoted > 0 {
            self.emit(Effect::Snapshot);
        }
        demoted
    }

    /// Marks `id` disconnected. With `sink_id`, only if that sink is still
    /// the participant's current one.
    pub fn mark_disconnected(&mut self, id: ParticipantId, sink_id: Option<u64>) -> bool {
        let Some(p) = self.participant_mut(id) else {
            return false;
        };
        if p.is_bot {
            return false;
        }
        if let Some(sink_id) = sink_id {
            if p.sink.as_ref().map(|s| s.id()) != Some(sink_id) {
                return false;
            }
        }
        p.detach();
        p.last_activity = Instant::now();
        tracing::info!(participant_id = %id, "participant disconnected");
        self.emit(Effect::Snapshot);
        true
    }

    /// Drops every sink. Used at shutdown.
    pub fn detach_all(&mut self) {
        for p in self.participants.iter_mut() {
            p.sink = None;
        }
    }

    pub fn inspect(&self, now: Instant, afk_threshold: Duration) -> Inspection {
        let connected_humans = self
            .participants
            .iter()
            .filter(|p| !p.is_bot && p.is_seated() && p.is_connected)
            .count();
        let afk = self
            .participants
            .iter()
            .filter(|p| !p.is_bot && p.is_seated())
            .filter_map(|p| {
                if !p.is_active {
                    Some((p.id, "left"))
                } else if !p.is_connected
                    && now.saturating_duration_since(p.last_activity) > afk_threshold
                {
                    Some((p.id, "afk"))
                } else {
                    None
                }
            })
            .collect();
        Inspection {
            status: self.status,
            connected_humans,
            idle: now.saturating_duration_since(self.last_activity),
            afk,
        }
    }

    /// Abandons an in-progress game that no active human is left in.
    pub fn abandon_if_unattended(&mut self) -> Result<bool, RoomError> {
        if self.status != RoomStatus::InProgress {
            return Ok(false);
        }
        let attended = self
            .participants
            .iter()
            .any(|p| !p.is_bot && p.is_active && !p.was_replaced);
        if attended {
            return Ok(false);
        }
        self.set_status(RoomStatus::Abandoned)?;
        self.broadcast(ServerEvent::error(
            "game_abandoned",
            "every human player has left the game",
        ));
        self.emit(Effect::Snapshot);
        self.checkpoint();
        Ok(true)
    }

    /// Closes the room after inactivity.
    pub fn close(&mut self) -> Result<(), RoomError> {
        self.broadcast(ServerEvent::error(
            "room_closed",
            "room closed after inactivity",
        ));
        if !self.status.is_terminal() {
            self.set_status(RoomStatus::Abandoned)?;
        }
        // A terminal snapshot keeps a later join from restoring the game.
        let stored = self.to_stored();
        self.persist(StoreWrite::SaveSnapshot(Box::new(stored)));
        self.emit(Effect::Unmirror);
        Ok(())
    }

    /// Re-arms timers after a restore.
    pub fn resume(&mut self) {
        if self.status == RoomStatus::InProgress {
            match self.round.as_ref() {
                Some(r) if r.phase == RoundPhase::Completed => {
                    let round_id = r.id;
                    let delay = self.config.next_round_delay;
                    self.emit(Effect::Schedule(Timer::NextRound { round_id, delay }));
                }
                _ => self.schedule_bots(),
            }
        }
        self.emit(Effect::Snapshot);
    }

    // -----------------------------------------------------------------------
    // Rendering
    // -----------------------------------------------------------------------

    /// The snapshot as `viewer` may see it. `None` renders the public view.
    pub fn render(&self, viewer: Option<ParticipantId>) -> GameSnapshot {
        let mut players: Vec<&Participant> = self.participants.iter().collect();
        players.sort_by_key(|p| (p.position, !p.was_replaced));
        GameSnapshot {
            id: self.id,
            room_code: self.code.clone(),
            status: self.status,
            round_number: self.round_number,
            max_rounds: None,
            players: players
                .into_iter()
                .map(|p| p.view(Some(p.id) == viewer))
                .collect(),
            current_round: self.round.as_ref().map(|r| r.view(viewer)),
            deck_size: self.deck.len(),
            created_at: self.created_at,
            last_activity: self.last_activity_at,
        }
    }

    pub fn to_stored(&self) -> StoredRoom {
        StoredRoom {
            id: self.id,
            code: self.code.clone(),
            status: self.status,
            catalog_size: self.config.catalog_size,
            round_number: self.round_number,
            participants: self
                .participants
                .iter()
                .map(|p| StoredParticipant {
                    id: p.id,
                    name: p.name.clone(),
                    position: p.position,
                    score: p.score,
                    hand: p.hand.clone(),
                    is_bot: p.is_bot,
                    bot_level: p.bot_level,
                    is_active: p.is_active,
                    was_replaced: p.was_replaced,
                    replacement_id: p.replacement_id,
                })
                .collect(),
            deck: self.deck.iter().collect(),
            used_cards: self.used.clone(),
            current_round: self.round.clone(),
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn config() -> EngineConfig {
        EngineConfig {
            seed: Some(11),
            ..EngineConfig::default()
        }
    }

    /// A committed lobby with `n` humans; returns the state and their ids.
    fn lobby(n: usize) -> (RoomState, Vec<ParticipantId>) {
        let ids: Vec<ParticipantId> = (0..n).map(|_| ParticipantId::random()).collect();
        let creator = Participant::human(ids[0], "P1".into(), 1, None);
        let mut state = RoomState::new(RoomId::random(), RoomCode::from("T1"), config(), creator);
        state.commit();
        for (i, id) in ids.iter().enumerate().skip(1) {
            state.join(*id, format!("P{}", i + 1), None).unwrap();
        }
        state.take_effects();
        (state, ids)
    }

    fn census(state: &RoomState) -> Vec<CardId> {
        state.to_stored().card_census()
    }

    fn full_catalog(state: &RoomState) -> Vec<CardId> {
        (1..=state.config.catalog_size).map(CardId).collect()
    }

    fn hand(state: &RoomState, id: ParticipantId) -> Vec<CardId> {
        state.participant(id).unwrap().hand.clone()
    }

    #[test]
    fn test_pending_room_rejects_join() {
        let creator = Participant::human(ParticipantId::random(), "A".into(), 1, None);
        let mut state = RoomState::new(RoomId::random(), RoomCode::from("P"), config(), creator);
        let err = state.join(ParticipantId::random(), "B".into(), None).unwrap_err();
        assert_eq!(err, RoomError::GameNotFound);
    }

    #[test]
    fn test_join_assigns_dense_positions() {
        let (state, ids) = lobby(3);
        let positions: Vec<u8> = ids
            .iter()
            .map(|id| state.participant(*id).unwrap().position)
            .collect();
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[test]
    fn test_join_full_room_is_rejected() {
        let (mut state, _) = lobby(6);
        let err = state.join(ParticipantId::random(), "X".into(), None).unwrap_err();
        assert_eq!(err, RoomError::RoomFull);
    }

    #[test]
    fn test_join_twice_with_live_sink_is_already_joined() {
        let (mut state, ids) = lobby(1);
        let (sink, _rx) = ParticipantSink::channel(4);
        state.participant_mut(ids[0]).unwrap().attach(sink.clone());
        let err = state.join(ids[0], "P1".into(), Some(sink)).unwrap_err();
        assert_eq!(err, RoomError::AlreadyJoined);
    }

    #[test]
    fn test_leave_in_lobby_renumbers_seats() {
        let (mut state, ids) = lobby(3);
        state.remove_participant(ids[0]).unwrap();
        assert!(state.participant(ids[0]).is_none());
        assert_eq!(state.participant(ids[1]).unwrap().position, 1);
        assert_eq!(state.participant(ids[2]).unwrap().position, 2);
    }

    #[test]
    fn test_start_requires_three_seats() {
        let (mut state, ids) = lobby(2);
        assert_eq!(state.start(ids[0]).unwrap_err(), RoomError::NotEnoughPlayers);
        state.add_bot(ids[0], BotDifficulty::Easy).unwrap();
        state.start(ids[0]).unwrap();
        assert_eq!(state.status, RoomStatus::InProgress);
        assert_eq!(state.start(ids[0]).unwrap_err(), RoomError::GameStarted);
    }

    #[test]
    fn test_start_by_stranger_is_rejected() {
        let (mut state, _) = lobby(3);
        let err = state.start(ParticipantId::random()).unwrap_err();
        assert_eq!(err, RoomError::NotAParticipant);
    }

    #[test]
    fn test_start_deals_hands_and_keeps_partition() {
        let (mut state, ids) = lobby(3);
        state.start(ids[0]).unwrap();
        for id in &ids {
            assert_eq!(hand(&state, *id).len(), 6);
        }
        assert_eq!(state.deck.len(), 84 - 18);
        assert_eq!(census(&state), full_catalog(&state));
        let round = state.round.as_ref().unwrap();
        assert_eq!(round.number, 1);
        assert_eq!(round.storyteller_id, ids[0]);
    }

    #[test]
    fn test_round_validation_errors() {
        let (mut state, ids) = lobby(3);
        assert_eq!(
            state.submit_card(ids[1], CardId(1)).unwrap_err(),
            RoomError::NoActiveRound
        );
        state.start(ids[0]).unwrap();
        let alice_card = hand(&state, ids[0])[0];
        let bob_card = hand(&state, ids[1])[0];

        assert_eq!(
            state.submit_clue(ids[1], "x", bob_card).unwrap_err(),
            RoomError::NotStoryteller
        );
        assert_eq!(
            state.submit_card(ids[1], bob_card).unwrap_err(),
            RoomError::WrongPhase
        );
        assert_eq!(
            state.submit_clue(ids[0], "x", bob_card).unwrap_err(),
            RoomError::CardNotInHand
        );

        state.submit_clue(ids[0], "ocean", alice_card).unwrap();
        assert_eq!(
            state.submit_card(ids[0], alice_card).unwrap_err(),
            RoomError::StorytellerCannotSubmit
        );
        assert_eq!(
            state.submit_card(ids[1], alice_card).unwrap_err(),
            RoomError::CardNotInHand
        );
        state.submit_card(ids[1], bob_card).unwrap();
        assert_eq!(
            state.submit_card(ids[1], hand(&state, ids[1])[0]).unwrap_err(),
            RoomError::AlreadySubmitted
        );
        assert_eq!(
            state.submit_vote(ids[2], alice_card).unwrap_err(),
            RoomError::WrongPhase
        );
        assert_eq!(census(&state), full_catalog(&state));
    }

    #[test]
    fn test_full_round_scores_and_schedules_next() {
        let (mut state, ids) = lobby(3);
        state.start(ids[0]).unwrap();
        let told = hand(&state, ids[0])[0];
        let bob_card = hand(&state, ids[1])[0];
        let carol_card = hand(&state, ids[2])[0];
        state.submit_clue(ids[0], "ocean", told).unwrap();
        state.submit_card(ids[1], bob_card).unwrap();
        state.submit_card(ids[2], carol_card).unwrap();
        assert_eq!(state.round.as_ref().unwrap().phase, RoundPhase::Voting);

        assert_eq!(
            state.submit_vote(ids[0], told).unwrap_err(),
            RoomError::StorytellerCannotVote
        );
        assert_eq!(
            state.submit_vote(ids[1], CardId(999)).unwrap_err(),
            RoomError::InvalidCard
        );
        state.submit_vote(ids[1], told).unwrap();
        assert_eq!(state.submit_vote(ids[1], told).unwrap_err(), RoomError::AlreadyVoted);
        state.take_effects();
        state.submit_vote(ids[2], bob_card).unwrap();

        let scores: Vec<u32> = ids
            .iter()
            .map(|id| state.participant(*id).unwrap().score)
            .collect();
        assert_eq!(scores, vec![3, 4, 0]);
        for id in &ids {
            assert_eq!(hand(&state, *id).len(), 6);
        }
        assert_eq!(census(&state), full_catalog(&state));

        let effects = state.take_effects();
        let round_id = state.round.as_ref().unwrap().id;
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Schedule(Timer::NextRound { round_id: r, .. }) if *r == round_id
        )));

        state.start_next_round(round_id).unwrap();
        let round = state.round.as_ref().unwrap();
        assert_eq!(round.number, 2);
        assert_eq!(round.storyteller_id, ids[1]);
        assert_eq!(state.used.len(), 3);
        assert_eq!(census(&state), full_catalog(&state));
    }

    #[test]
    fn test_stale_next_round_timer_is_ignored() {
        let (mut state, ids) = lobby(3);
        state.start(ids[0]).unwrap();
        state.start_next_round(RoundId::random()).unwrap();
        assert_eq!(state.round.as_ref().unwrap().number, 1);
    }

    #[test]
    fn test_replace_with_bot_inherits_seat_hand_and_score() {
        let (mut state, ids) = lobby(3);
        state.start(ids[0]).unwrap();
        state.participant_mut(ids[0]).unwrap().score = 7;
        let old_hand = hand(&state, ids[0]);

        let bot_id = state.replace_with_bot(ids[0], "afk").unwrap();
        let bot = state.participant(bot_id).unwrap();
        assert_eq!(bot.name, "Bot-P1");
        assert_eq!(bot.position, 1);
        assert_eq!(bot.score, 7);
        assert_eq!(bot.hand, old_hand);

        let human = state.participant(ids[0]).unwrap();
        assert!(human.was_replaced);
        assert!(!human.is_active);
        assert!(human.hand.is_empty());
        assert_eq!(human.replacement_id, Some(bot_id));
        assert_eq!(state.round.as_ref().unwrap().storyteller_id, bot_id);
        assert_eq!(census(&state), full_catalog(&state));

        assert_eq!(
            state.replace_with_bot(ids[0], "afk").unwrap_err(),
            RoomError::AlreadyReplaced
        );
        assert_eq!(state.replace_with_bot(bot_id, "afk").unwrap_err(), RoomError::IsBot);
        assert_eq!(
            state.replace_with_bot(ParticipantId::random(), "afk").unwrap_err(),
            RoomError::ParticipantNotFound
        );
    }

    #[test]
    fn test_replacement_bot_is_scheduled_for_owed_action() {
        let (mut state, ids) = lobby(3);
        state.start(ids[0]).unwrap();
        state.take_effects();
        let bot_id = state.replace_with_bot(ids[0], "afk").unwrap();
        let effects = state.take_effects();
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Schedule(Timer::Bot { bot_id: b, action: BotAction::Clue, .. }) if *b == bot_id
        )));
        let round_id = state.round.as_ref().unwrap().id;
        assert!(state.bot_plan(bot_id, BotAction::Clue, round_id).is_some());
        assert!(state.bot_plan(bot_id, BotAction::Vote, round_id).is_none());
    }

    #[test]
    fn test_chat_rules() {
        let (mut state, ids) = lobby(3);
        state.send_chat(ids[0], "hello", ChatKind::Chat).unwrap();
        assert_eq!(
            state.send_chat(ids[0], "   ", ChatKind::Chat).unwrap_err(),
            RoomError::EmptyMessage
        );
        let long = "x".repeat(501);
        assert_eq!(
            state.send_chat(ids[0], &long, ChatKind::Chat).unwrap_err(),
            RoomError::MessageTooLong
        );
        assert_eq!(
            state
                .send_chat(ParticipantId::random(), "hi", ChatKind::Chat)
                .unwrap_err(),
            RoomError::NotAParticipant
        );
        state.start(ids[0]).unwrap();
        assert_eq!(
            state.send_chat(ids[1], "hint?", ChatKind::Chat).unwrap_err(),
            RoomError::ChatNotAllowedInPhase
        );
    }

    #[test]
    fn test_render_shows_only_viewers_hand() {
        let (mut state, ids) = lobby(3);
        state.start(ids[0]).unwrap();
        let snap = state.render(Some(ids[1]));
        for p in &snap.players {
            if p.id == ids[1] {
                assert_eq!(p.hand.as_ref().map(Vec::len), Some(6));
            } else {
                assert!(p.hand.is_none());
            }
        }
        assert!(state.render(None).players.iter().all(|p| p.hand.is_none()));
        assert_eq!(snap.max_rounds, None);
        assert_eq!(snap.deck_size, 84 - 18);
    }

    #[test]
    fn test_inspect_flags_left_and_afk_humans() {
        let (mut state, ids) = lobby(3);
        state.start(ids[0]).unwrap();
        state.remove_participant(ids[1]).unwrap();
        let later = Instant::now() + Duration::from_secs(3 * 60 + 1);
        let view = state.inspect(later, Duration::from_secs(180));
        assert!(view.afk.contains(&(ids[1], "left")));
        // Never connected, so idle past the threshold too.
        assert!(view.afk.contains(&(ids[2], "afk")));
        assert_eq!(view.connected_humans, 0);
    }

    #[test]
    fn test_abandon_when_no_active_human_remains() {
        let (mut state, ids) = lobby(3);
        state.start(ids[0]).unwrap();
        for id in &ids {
            state.replace_with_bot(*id, "afk").unwrap();
        }
        assert!(state.abandon_if_unattended().unwrap());
        assert_eq!(state.status, RoomStatus::Abandoned);
        assert!(!state.abandon_if_unattended().unwrap());
    }

    #[test]
    fn test_stored_round_trip_preserves_partition() {
        let (mut state, ids) = lobby(3);
        state.start(ids[0]).unwrap();
        let told = hand(&state, ids[0])[2];
        state.submit_clue(ids[0], "ocean", told).unwrap();

        let stored = state.to_stored();
        let restored = RoomState::from_stored(stored.clone(), config(), |_| None).unwrap();
        assert_eq!(restored.to_stored().card_census(), stored.card_census());
        assert_eq!(restored.round.as_ref().unwrap().phase, RoundPhase::Submitting);
        assert!(!restored.participant(ids[0]).unwrap().is_connected);
    }

    #[test]
    fn test_delete_only_in_lobby() {
        let (mut state, ids) = lobby(3);
        state.delete(ids[0]).unwrap();
        assert_eq!(state.status, RoomStatus::Abandoned);

        let (mut started, ids) = lobby(3);
        started.start(ids[0]).unwrap();
        assert_eq!(started.delete(ids[0]).unwrap_err(), RoomError::GameStarted);
    }

    #[test]
    fn test_room_rng_is_seeded() {
        let (mut a, _) = lobby(1);
        let (mut b, _) = lobby(1);
        let x: u64 = a.rng.random();
        let y: u64 = b.rng.random();
        assert_eq!(x, y);
    }
}
