//! Periodic sweep that closes idle rooms and hands absent players to bots.

use std::panic::AssertUnwindSafe;

use dixit_protocol::{ParticipantId, RoomCode, RoomStatus};
use futures_util::FutureExt;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::Registry;

/// What one sweep did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub closed: Vec<RoomCode>,
    pub replaced: Vec<ParticipantId>,
    pub abandoned: Vec<RoomCode>,
}

pub struct Janitor {
    registry: Registry,
}

impl Janitor {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Sweeps every `janitor_period` until `token` fires. A panicking sweep
    /// is logged and the loop carries on.
    pub async fn run(self, token: CancellationToken) {
        let period = self.registry.context().config.janitor_period;
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        interval.tick().await;

        tracing::info!(?period, "janitor started");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    let sweep = AssertUnwindSafe(self.sweep(Instant::now())).catch_unwind();
                    if sweep.await.is_err() {
                        tracing::error!("janitor sweep panicked");
                    }
                }
            }
        }
        tracing::info!("janitor stopped");
    }

    /// One pass over every room, as of `now`.
    ///
    /// - A room idle past its timeout is closed: 10 minutes with no
    ///   connected human, 30 minutes otherwise.
    /// - In a running game, every seated human that left or has been
    ///   disconnected past the AFK threshold is replaced by a bot.
    /// - A running game with no active human left is abandoned.
    pub async fn sweep(&self, now: Instant) -> SweepReport {
        let config = &self.registry.context().config;
        let mut report = SweepReport::default();

        for room in self.registry.rooms().await {
            let view = room.inspect(now).await;
            let timeout = if view.connected_humans == 0 {
                config.empty_room_timeout
            } else {
                config.occupied_room_timeout
            };
            if view.idle > timeout {
                tracing::info!(room_code = %room.code(), idle = ?view.idle, "closing idle room");
                room.close().await;
                self.registry.remove(room.code(), &room).await;
                report.closed.push(room.code().clone());
                continue;
            }

            if view.status != RoomStatus::InProgress {
                continue;
            }
            for (id, reason) in view.afk {
                match room.replace_with_bot(id, reason).await {
                    Ok(_) => report.replaced.push(id),
                    Err(e) => {
                        tracing::debug!(room_code = %room.code(), participant_id = %id, error = %e, "replacement skipped");
                    }
                }
            }
            if room.abandon_if_unattended().await {
                tracing::info!(room_code = %room.code(), "game abandoned");
                report.abandoned.push(room.code().clone());
            }
        }

        if report != SweepReport::default() {
            tracing::debug!(
                closed = report.closed.len(),
                replaced = report.replaced.len(),
                abandoned = report.abandoned.len(),
                "janitor sweep finished"
            );
        }
        report
    }
}
