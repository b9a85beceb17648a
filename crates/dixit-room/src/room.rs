//! The async face of one room.
//!
//! A [`Room`] owns its [`RoomState`] behind a Tokio `RwLock`. Every
//! mutating call takes the write lock, runs one synchronous transition and,
//! before releasing the lock, turns the transition's effects into outbox
//! items and timers. A per-room dispatcher task drains the outbox, so no
//! socket or store I/O ever happens under the lock.
//!
//! Lock order is Registry → Room. A room never reaches back into the
//! registry.

use std::sync::{Arc, Weak};

use dixit_protocol::{
    BotDifficulty, CardId, ChatHistory, ChatHistoryFilter, ChatKind, ChatMessageView, Codec,
    GameSnapshot, JsonCodec, ParticipantId, RoomCode, RoomId, RoomStatus, RoundId, ServerEvent,
};
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::time::Instant;

use crate::bot::BotAction;
use crate::context::EngineContext;
use crate::outbox::{self, Delivery, FailedSink, OutboxSender, Outbound};
use crate::participant::{Frame, Participant, ParticipantSink};
use crate::state::{Effect, Inspection, JoinOutcome, RoomState, Timer};
use crate::store::{RoomRecord, StoredRoom};
use crate::RoomError;

pub struct Room {
    id: RoomId,
    code: RoomCode,
    ctx: Arc<EngineContext>,
    me: Weak<Room>,
    state: RwLock<RoomState>,
    outbox: OutboxSender,
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("code", &self.code)
            .finish_non_exhaustive()
    }
}

impl Room {
    /// A pending lobby holding `creator`. It rejects every operation until
    /// [`commit`](Self::commit) is called.
    pub(crate) fn create(
        ctx: Arc<EngineContext>,
        code: RoomCode,
        creator_id: ParticipantId,
        creator_name: String,
        sink: Option<ParticipantSink>,
    ) -> Arc<Self> {
        let creator = Participant::human(creator_id, creator_name, 1, sink);
        let state = RoomState::new(RoomId::random(), code, ctx.config.clone(), creator);
        Self::spawn(ctx, state)
    }

    pub(crate) fn restore(
        ctx: Arc<EngineContext>,
        stored: StoredRoom,
        sink_for: impl Fn(ParticipantId) -> Option<ParticipantSink>,
    ) -> Result<Arc<Self>, RoomError> {
        let state = RoomState::from_stored(stored, ctx.config.clone(), sink_for)?;
        Ok(Self::spawn(ctx, state))
    }

    fn spawn(ctx: Arc<EngineContext>, state: RoomState) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let room = Arc::new_cyclic(|me| Self {
            id: state.id,
            code: state.code.clone(),
            ctx: ctx.clone(),
            me: me.clone(),
            state: RwLock::new(state),
            outbox: tx,
        });
        ctx.spawn_guarded(
            "outbox",
            outbox::dispatch(Arc::downgrade(&room), ctx.clone(), rx),
        );
        room
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    pub(crate) async fn record(&self) -> RoomRecord {
        let state = self.state.read().await;
        RoomRecord {
            id: state.id,
            code: state.code.clone(),
            status: state.status,
            created_at: state.created_at,
        }
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    /// Runs `op` under the write lock and queues whatever it produced.
    async fn mutate<T>(
        &self,
        op: impl FnOnce(&mut RoomState) -> Result<T, RoomError>,
    ) -> Result<T, RoomError> {
        let mut state = self.state.write().await;
        let result = op(&mut state);
        self.apply_effects(&mut state);
        result
    }

    fn enqueue(&self, item: Outbound) {
        if self.outbox.send(item).is_err() {
            tracing::debug!(room_code = %self.code, "outbox closed, dropping item");
        }
    }

    fn encode<T: serde::Serialize>(&self, value: &T) -> Option<String> {
        match JsonCodec.encode(value) {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::error!(room_code = %self.code, error = %e, "failed to encode outbound value");
                None
            }
        }
    }

    fn deliver(&self, to: Vec<(ParticipantId, ParticipantSink)>, event: &ServerEvent) {
        if to.is_empty() {
            return;
        }
        let Some(text) = self.encode(event) else {
            return;
        };
        let frame = Frame::from(text);
        let deliveries = to
            .into_iter()
            .map(|(participant_id, sink)| Delivery {
                participant_id,
                sink,
                frame: frame.clone(),
            })
            .collect();
        self.enqueue(Outbound::Deliver(deliveries));
    }

    fn send_snapshots(&self, state: &RoomState, to: Vec<(ParticipantId, ParticipantSink)>) {
        let deliveries: Vec<Delivery> = to
            .into_iter()
            .filter_map(|(participant_id, sink)| {
                let event = ServerEvent::GameState(state.render(Some(participant_id)));
                self.encode(&event).map(|text| Delivery {
                    participant_id,
                    sink,
                    frame: Frame::from(text),
                })
            })
            .collect();
        if !deliveries.is_empty() {
            self.enqueue(Outbound::Deliver(deliveries));
        }
    }

    fn apply_effects(&self, state: &mut RoomState) {
        for effect in state.take_effects() {
            match effect {
                Effect::Send { to, event } => self.deliver(to, &event),
                Effect::Snapshot => self.send_snapshots(state, state.recipients()),
                Effect::SnapshotTo(to) => {
                    self.send_snapshots(state, state.sink_of(to).map(|s| (to, s)).into_iter().collect())
                }
                Effect::Persist(write) => self.enqueue(Outbound::Persist(write)),
                Effect::Mirror => {
                    if let Some(json) = self.encode(&state.render(None)) {
                        self.enqueue(Outbound::Mirror(self.code.clone(), json));
                    }
                }
                Effect::Unmirror => self.enqueue(Outbound::Unmirror(self.code.clone())),
                Effect::Schedule(timer) => self.schedule(timer),
            }
        }
    }

    fn schedule(&self, timer: Timer) {
        let room = self.me.clone();
        let token = self.ctx.shutdown_token().clone();
        let (name, delay) = match timer {
            Timer::Bot { delay, .. } => ("bot_autoplay", delay),
            Timer::NextRound { delay, .. } => ("next_round", delay),
        };
        self.ctx.spawn_guarded(name, async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let Some(room) = room.upgrade() else {
                return;
            };
            match timer {
                Timer::Bot {
                    bot_id,
                    action,
                    round_id,
                    ..
                } => room.play_bot(bot_id, action, round_id).await,
                Timer::NextRound { round_id, .. } => {
                    if let Err(e) = room.mutate(|s| s.start_next_round(round_id)).await {
                        tracing::warn!(room_code = %room.code, error = %e, "next round failed to start");
                    }
                }
            }
        });
    }

    /// Takes one bot turn. The decision is made outside the lock and the
    /// action is then submitted like any other, so it is re-validated.
    async fn play_bot(&self, bot_id: ParticipantId, action: BotAction, round_id: RoundId) {
        let plan = self.state.read().await.bot_plan(bot_id, action, round_id);
        let Some(plan) = plan else {
            tracing::debug!(room_code = %self.code, bot_id = %bot_id, ?action, "bot action no longer owed");
            return;
        };
        let advisor = &self.ctx.advisor;

        let result = match action {
            BotAction::Clue => {
                let choice = advisor
                    .choose_storyteller(&plan.hand, plan.level)
                    .filter(|(card, _)| plan.hand.contains(card))
                    .or_else(|| plan.hand.first().map(|c| (*c, "mystery".to_string())));
                match choice {
                    Some((card, clue)) => self.submit_clue(bot_id, &clue, card).await,
                    None => Err(RoomError::CardNotInHand),
                }
            }
            BotAction::Submit => {
                let choice = advisor
                    .choose_card_for_clue(&plan.hand, &plan.clue, plan.level)
                    .filter(|card| plan.hand.contains(card))
                    .or_else(|| plan.hand.first().copied());
                match choice {
                    Some(card) => self.submit_card(bot_id, card).await,
                    None => Err(RoomError::CardNotInHand),
                }
            }
            BotAction::Vote => {
                let choice = advisor
                    .choose_vote(&plan.revealed, &plan.clue, &plan.own, plan.level)
                    .filter(|card| plan.revealed.contains(card) && !plan.own.contains(card))
                    .or_else(|| plan.revealed.iter().copied().find(|c| !plan.own.contains(c)));
                match choice {
                    Some(card) => self.submit_vote(bot_id, card).await,
                    None => Err(RoomError::InvalidCard),
                }
            }
        };

        if let Err(e) = result {
            tracing::debug!(room_code = %self.code, bot_id = %bot_id, ?action, error = %e, "bot action rejected");
        }
    }

    /// Waits until everything queued so far has been handled.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Outbound::Flush(tx));
        let _ = rx.await;
    }

    pub(crate) async fn demote_sinks(&self, failed: &[FailedSink]) {
        let _ = self.mutate(|s| Ok(s.demote(failed))).await;
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub(crate) async fn commit(&self) {
        let _ = self
            .mutate(|s| {
                s.commit();
                Ok(())
            })
            .await;
    }

    /// Adds `id` to the room, or re-attaches `sink` if `id` is already in it.
    pub async fn join(
        &self,
        id: ParticipantId,
        name: String,
        sink: Option<ParticipantSink>,
    ) -> Result<JoinOutcome, RoomError> {
        self.mutate(|s| s.join(id, name, sink)).await
    }

    pub async fn add_bot(
        &self,
        caller: ParticipantId,
        difficulty: BotDifficulty,
    ) -> Result<ParticipantId, RoomError> {
        self.mutate(|s| s.add_bot(caller, difficulty)).await
    }

    pub async fn leave(&self, id: ParticipantId) -> Result<(), RoomError> {
        self.mutate(|s| s.remove_participant(id)).await
    }

    pub(crate) async fn delete(&self, caller: ParticipantId) -> Result<(), RoomError> {
        self.mutate(|s| s.delete(caller)).await
    }

    pub async fn start(&self, caller: ParticipantId) -> Result<(), RoomError> {
        self.mutate(|s| s.start(caller)).await
    }

    pub async fn submit_clue(
        &self,
        caller: ParticipantId,
        clue: &str,
        card: CardId,
    ) -> Result<(), RoomError> {
        self.mutate(|s| s.submit_clue(caller, clue, card)).await
    }

    pub async fn submit_card(&self, caller: ParticipantId, card: CardId) -> Result<(), RoomError> {
        self.mutate(|s| s.submit_card(caller, card)).await
    }

    pub async fn submit_vote(&self, caller: ParticipantId, card: CardId) -> Result<(), RoomError> {
        self.mutate(|s| s.submit_vote(caller, card)).await
    }

    /// Hands `target`'s seat to a new bot and returns the bot's id.
    pub async fn replace_with_bot(
        &self,
        target: ParticipantId,
        reason: &str,
    ) -> Result<ParticipantId, RoomError> {
        self.mutate(|s| s.replace_with_bot(target, reason)).await
    }

    pub async fn send_chat(
        &self,
        caller: ParticipantId,
        message: &str,
        kind: ChatKind,
    ) -> Result<(), RoomError> {
        self.mutate(|s| s.send_chat(caller, message, kind)).await
    }

    /// The room's chat, oldest first. Pending chat writes are flushed to the
    /// store before it is read.
    pub async fn chat_history(
        &self,
        caller: ParticipantId,
        filter: ChatHistoryFilter,
        limit: Option<u32>,
    ) -> Result<Vec<ChatMessageView>, RoomError> {
        self.state.read().await.ensure_member(caller)?;
        self.flush().await;
        let limit = self.ctx.config.chat_limit(limit);
        let call = self.ctx.store.read_chat(self.id, filter, limit);
        let mut lines = outbox::within(self.ctx.config.store_deadline, call)
            .await
            .map_err(|e| {
                tracing::warn!(room_code = %self.code, error = %e, "chat history read failed");
                RoomError::StoreUnavailable
            })?;
        lines.reverse();
        Ok(lines)
    }

    /// Like [`chat_history`](Self::chat_history), but delivers the result to
    /// the caller's sink in order with other room events.
    pub async fn send_chat_history(
        &self,
        caller: ParticipantId,
        filter: ChatHistoryFilter,
        limit: Option<u32>,
    ) -> Result<(), RoomError> {
        let messages = self.chat_history(caller, filter, limit).await?;
        let event = ServerEvent::ChatHistory(ChatHistory {
            room_code: self.code.clone(),
            messages,
        });
        self.mutate(|s| {
            s.send_private(caller, event);
            Ok(())
        })
        .await
    }

    /// Queues a personal `game_state` for `caller`.
    pub async fn send_state(&self, caller: ParticipantId) -> Result<(), RoomError> {
        self.mutate(|s| {
            s.ensure_member(caller)?;
            s.send_snapshot(caller);
            Ok(())
        })
        .await
    }

    /// The snapshot as `viewer` would receive it.
    pub async fn snapshot_for(&self, viewer: Option<ParticipantId>) -> GameSnapshot {
        self.state.read().await.render(viewer)
    }

    pub async fn status(&self) -> RoomStatus {
        self.state.read().await.status
    }

    /// Marks `id` disconnected if `sink_id` is still its current sink.
    pub async fn mark_disconnected(&self, id: ParticipantId, sink_id: Option<u64>) -> bool {
        self.mutate(|s| Ok(s.mark_disconnected(id, sink_id)))
            .await
            .unwrap_or(false)
    }

    pub async fn to_stored(&self) -> StoredRoom {
        self.state.read().await.to_stored()
    }

    // -----------------------------------------------------------------------
    // Janitor and registry hooks
    // -----------------------------------------------------------------------

    pub(crate) async fn inspect(&self, now: Instant) -> Inspection {
        self.state
            .read()
            .await
            .inspect(now, self.ctx.config.afk_threshold)
    }

    pub(crate) async fn abandon_if_unattended(&self) -> bool {
        match self.mutate(|s| s.abandon_if_unattended()).await {
            Ok(abandoned) => abandoned,
            Err(e) => {
                tracing::warn!(room_code = %self.code, error = %e, "failed to abandon room");
                false
            }
        }
    }

    pub(crate) async fn close(&self) {
        if let Err(e) = self.mutate(|s| s.close()).await {
            tracing::warn!(room_code = %self.code, error = %e, "failed to close room");
        }
    }

    pub(crate) async fn resume(&self) {
        let _ = self
            .mutate(|s| {
                s.resume();
                Ok(())
            })
            .await;
    }

    pub(crate) async fn detach_all(&self) {
        self.state.write().await.detach_all();
    }
}
