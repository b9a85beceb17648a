//! Seats and the outbound sinks that feed their sockets.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dixit_protocol::{BotDifficulty, CardId, ParticipantId, PlayerView};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// One encoded text frame, shared by every recipient of a broadcast.
pub type Frame = Arc<str>;

static NEXT_SINK_ID: AtomicU64 = AtomicU64::new(1);

/// Why a frame could not be handed to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The connection's writer is gone.
    #[error("sink closed")]
    Closed,
    /// The writer did not make room within the deadline.
    #[error("sink write timed out")]
    TimedOut,
}

/// The sending half of a connection's bounded outbound queue.
///
/// The edge owns the receiving half and writes frames to the socket; rooms
/// and the registry hold clones of this handle. Each sink carries a unique
/// id so a room can tell a stale handle from a fresh one after reconnect.
#[derive(Debug, Clone)]
pub struct ParticipantSink {
    id: u64,
    tx: mpsc::Sender<Frame>,
}

impl ParticipantSink {
    /// Creates a sink with room for `buffer` frames.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let id = NEXT_SINK_ID.fetch_add(1, Ordering::Relaxed);
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Queues a frame, waiting at most `deadline` for buffer space.
    pub async fn send(&self, frame: Frame, deadline: Duration) -> Result<(), SinkError> {
        match tokio::time::timeout(deadline, self.tx.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SinkError::Closed),
            Err(_) => Err(SinkError::TimedOut),
        }
    }

    /// Queues a frame only if there is room right now.
    pub fn try_send(&self, frame: Frame) -> Result<(), SinkError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::TimedOut,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// A human or bot seat in a room.
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    /// Dense seat number starting at 1.
    pub position: u8,
    pub score: u32,
    pub hand: Vec<CardId>,
    pub is_bot: bool,
    pub bot_level: Option<BotDifficulty>,
    pub is_connected: bool,
    pub is_active: bool,
    pub was_replaced: bool,
    pub replacement_id: Option<ParticipantId>,
    pub last_activity: Instant,
    /// Humans only; `None` while disconnected.
    pub sink: Option<ParticipantSink>,
}

impl Participant {
    pub fn human(
        id: ParticipantId,
        name: String,
        position: u8,
        sink: Option<ParticipantSink>,
    ) -> Self {
        Self {
            id,
            name,
            position,
            score: 0,
            hand: Vec::new(),
            is_bot: false,
            bot_level: None,
            is_connected: sink.is_some(),
            is_active: true,
            was_replaced: false,
            replacement_id: None,
            last_activity: Instant::now(),
            sink,
        }
    }

    pub fn bot(name: String, position: u8, level: BotDifficulty) -> Self {
        Self {
            id: ParticipantId::random(),
            name,
            position,
            score: 0,
            hand: Vec::new(),
            is_bot: true,
            bot_level: Some(level),
            is_connected: true,
            is_active: true,
            was_replaced: false,
            replacement_id: None,
            last_activity: Instant::now(),
            sink: None,
        }
    }

    /// Holds a seat: not a human that a bot has taken over from.
    pub fn is_seated(&self) -> bool {
        !self.was_replaced
    }

    pub fn holds(&self, card: CardId) -> bool {
        self.hand.contains(&card)
    }

    /// Removes `card` from the hand. Returns `false` if it was not there.
    pub fn play(&mut self, card: CardId) -> bool {
        match self.hand.iter().position(|c| *c == card) {
            Some(i) => {
                self.hand.remove(i);
                true
            }
            None => false,
        }
    }

    /// Marks the seat as reachable through `sink`.
    pub fn attach(&mut self, sink: ParticipantSink) {
        self.sink = Some(sink);
        self.is_connected = true;
        self.last_activity = Instant::now();
    }

    /// Marks the seat unreachable and drops its sink.
    pub fn detach(&mut self) {
        self.sink = None;
        if !self.is_bot {
            self.is_connected = false;
        }
    }

    /// Renders the seat; the hand is included only when `show_hand`.
    pub fn view(&self, show_hand: bool) -> PlayerView {
        PlayerView {
            id: self.id,
            name: self.name.clone(),
            score: self.score,
            position: self.position,
            hand: show_hand.then(|| self.hand.clone()),
            is_connected: self.is_connected,
            is_active: self.is_active,
            is_bot: self.is_bot,
            bot_level: self.bot_level,
            was_replaced: self.was_replaced,
            replacement_id: self.replacement_id,
        }
    }
}
