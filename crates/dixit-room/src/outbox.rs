//! Ordered, lock-free delivery of a room's side effects.
//!
//! Room operations run under the room's write lock but never perform I/O
//! there. Instead they enqueue [`Outbound`] items on an unbounded channel
//! while still holding the lock, which fixes their order. One dispatcher
//! task per room drains the channel:
//!
//! ```text
//! Room op (write lock) ──enqueue──→ [Deliver, Persist, Mirror, ...] ──→ dispatcher
//!                                                                         │
//!               ┌───────────── join_all(sink.send with deadline) ←────────┤
//!               │                timeout(store write) ←───────────────────┤
//!               ▼                cache mirror ←───────────────────────────┘
//!    failed sinks demoted under the write lock
//! ```
//!
//! Every recipient of one event is written concurrently, so a slow sink
//! delays the others by at most the per-sink deadline. A sink that failed
//! once is skipped for the rest of the room's life; its participant gets a
//! fresh sink on reconnect.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use dixit_protocol::{ParticipantId, RoomCode};
use futures_util::FutureExt;
use futures_util::future::join_all;
use tokio::sync::{mpsc, oneshot};

use crate::context::EngineContext;
use crate::participant::{Frame, ParticipantSink, SinkError};
use crate::room::Room;
use crate::StoreError;
use crate::store::{StoreResult, StoreWrite};

/// One frame bound for one sink.
#[derive(Debug, Clone)]
pub(crate) struct Delivery {
    pub participant_id: ParticipantId,
    pub sink: ParticipantSink,
    pub frame: Frame,
}

/// A sink that failed during fan-out.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FailedSink {
    pub participant_id: ParticipantId,
    pub sink_id: u64,
    pub error: SinkError,
}

#[derive(Debug)]
pub(crate) enum Outbound {
    Deliver(Vec<Delivery>),
    Persist(StoreWrite),
    Mirror(RoomCode, String),
    Unmirror(RoomCode),
    Flush(oneshot::Sender<()>),
}

pub(crate) type OutboxSender = mpsc::UnboundedSender<Outbound>;

/// Drains `rx` until every sender is gone.
pub(crate) async fn dispatch(
    room: Weak<Room>,
    ctx: Arc<EngineContext>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    let mut failed_sinks = HashSet::new();
    while let Some(item) = rx.recv().await {
        let step = AssertUnwindSafe(process(&room, &ctx, &mut failed_sinks, item)).catch_unwind();
        if step.await.is_err() {
            tracing::error!("outbox step panicked; continuing with next item");
        }
    }
    tracing::debug!("outbox drained");
}

async fn process(
    room: &Weak<Room>,
    ctx: &EngineContext,
    failed_sinks: &mut HashSet<u64>,
    item: Outbound,
) {
    match item {
        Outbound::Deliver(mut deliveries) => {
            deliveries.retain(|d| !failed_sinks.contains(&d.sink.id()));
            if deliveries.is_empty() {
                return;
            }
            let failed = fan_out(deliveries, ctx.config.sink_write_deadline).await;
            if failed.is_empty() {
                return;
            }
            failed_sinks.extend(failed.iter().map(|f| f.sink_id));
            if let Some(room) = room.upgrade() {
                room.demote_sinks(&failed).await;
            }
        }
        Outbound::Persist(write) => {
            let kind = write.kind();
            let call = write.apply(ctx.store.as_ref());
            if let Err(e) = within(ctx.config.store_deadline, call).await {
                tracing::warn!(write = kind, error = %e, "store write failed");
            }
        }
        Outbound::Mirror(code, json) => {
            let call = ctx.cache.put_room_snapshot(code.clone(), json, ctx.config.cache_ttl);
            if let Err(e) = within(ctx.config.store_deadline, call).await {
                tracing::warn!(room_code = %code, error = %e, "cache mirror failed");
            }
        }
        Outbound::Unmirror(code) => {
            let call = ctx.cache.delete_room_snapshot(code.clone());
            if let Err(e) = within(ctx.config.store_deadline, call).await {
                tracing::warn!(room_code = %code, error = %e, "cache delete failed");
            }
        }
        Outbound::Flush(done) => {
            let _ = done.send(());
        }
    }
}

/// Runs a store or cache call under `deadline`.
pub(crate) async fn within<T>(
    deadline: std::time::Duration,
    call: impl std::future::Future<Output = StoreResult<T>>,
) -> StoreResult<T> {
    tokio::time::timeout(deadline, call)
        .await
        .unwrap_or(Err(StoreError::Timeout))
}

/// Writes every delivery concurrently and returns the ones that failed.
pub(crate) async fn fan_out(
    deliveries: Vec<Delivery>,
    deadline: std::time::Duration,
) -> Vec<FailedSink> {
    let sends = deliveries.into_iter().map(|d| async move {
        d.sink
            .send(d.frame, deadline)
            .await
            .err()
            .map(|error| FailedSink {
                participant_id: d.participant_id,
                sink_id: d.sink.id(),
                error,
            })
    });
    join_all(sends).await.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_slow_sink_does_not_block_others() {
        let (fast, mut fast_rx) = ParticipantSink::channel(4);
        let (slow, _slow_rx) = ParticipantSink::channel(1);
        slow.try_send(Frame::from("filler")).unwrap();

        let fast_id = ParticipantId::random();
        let slow_id = ParticipantId::random();
        let frame = Frame::from("event");
        let deliveries = vec![
            Delivery {
                participant_id: slow_id,
                sink: slow.clone(),
                frame: frame.clone(),
            },
            Delivery {
                participant_id: fast_id,
                sink: fast,
                frame,
            },
        ];

        let started = tokio::time::Instant::now();
        let failed = fan_out(deliveries, Duration::from_secs(5)).await;

        assert_eq!(fast_rx.try_recv().unwrap().as_ref(), "event");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].participant_id, slow_id);
        assert_eq!(failed[0].sink_id, slow.id());
        assert_eq!(failed[0].error, SinkError::TimedOut);
        assert!(started.elapsed() <= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_fan_out_reports_closed_sinks() {
        let (sink, rx) = ParticipantSink::channel(4);
        drop(rx);
        let failed = fan_out(
            vec![Delivery {
                participant_id: ParticipantId::random(),
                sink,
                frame: Frame::from("x"),
            }],
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error, SinkError::Closed);
    }
}
