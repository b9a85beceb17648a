//! Process-wide index of live rooms and connected sinks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dixit_protocol::{ParticipantId, RoomCode};
use tokio::sync::Mutex;

use crate::context::EngineContext;
use crate::janitor::Janitor;
use crate::outbox;
use crate::participant::ParticipantSink;
use crate::room::Room;
use crate::store::StoredRoom;
use crate::RoomError;

/// How long shutdown waits for background tasks to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Tables {
    rooms: HashMap<RoomCode, Arc<Room>>,
    sinks: HashMap<ParticipantId, ParticipantSink>,
}

struct Inner {
    ctx: Arc<EngineContext>,
    tables: Mutex<Tables>,
}

/// Maps room codes to rooms and participant ids to their current sink.
///
/// Cheap to clone. The table lock is held only for lookups and inserts,
/// never across a room operation or a store call.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx: Arc::new(ctx),
                tables: Mutex::new(Tables::default()),
            }),
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.inner.ctx
    }

    /// Creates a room with `creator_id` in seat 1.
    ///
    /// The code is reserved in memory first so a concurrent create with the
    /// same code fails fast. The room only becomes visible to other calls
    /// once the store has accepted it; if the store refuses or times out,
    /// the reservation is rolled back.
    pub async fn create(
        &self,
        code: RoomCode,
        creator_id: ParticipantId,
        creator_name: String,
    ) -> Result<Arc<Room>, RoomError> {
        let ctx = &self.inner.ctx;
        let room = {
            let mut tables = self.inner.tables.lock().await;
            if tables.rooms.contains_key(&code) {
                return Err(RoomError::RoomCodeTaken);
            }
            let sink = tables.sinks.get(&creator_id).cloned();
            let room = Room::create(ctx.clone(), code.clone(), creator_id, creator_name, sink);
            tables.rooms.insert(code.clone(), room.clone());
            room
        };

        let record = room.record().await;
        let call = ctx.store.create_room(record);
        if let Err(e) = outbox::within(ctx.config.store_deadline, call).await {
            tracing::warn!(room_code = %code, error = %e, "room creation rejected by store");
            self.remove(&code, &room).await;
            return Err(e.into());
        }

        room.commit().await;
        tracing::info!(room_code = %code, room_id = %room.id(), creator_id = %creator_id, "room created");
        Ok(room)
    }

    pub async fn get(&self, code: &RoomCode) -> Option<Arc<Room>> {
        self.inner.tables.lock().await.rooms.get(code).cloned()
    }

    /// Joins `id` to the room, restoring it from the store if it is not in
    /// memory.
    pub async fn join(
        &self,
        code: &RoomCode,
        id: ParticipantId,
        name: String,
    ) -> Result<Arc<Room>, RoomError> {
        let (room, sink) = {
            let tables = self.inner.tables.lock().await;
            (tables.rooms.get(code).cloned(), tables.sinks.get(&id).cloned())
        };
        let room = match room {
            Some(room) => room,
            None => self.restore(code).await?.ok_or(RoomError::GameNotFound)?,
        };
        room.join(id, name, sink).await?;
        Ok(room)
    }

    /// Loads `code` from the store's snapshot, if it has a live one.
    pub async fn restore(&self, code: &RoomCode) -> Result<Option<Arc<Room>>, RoomError> {
        let ctx = &self.inner.ctx;
        let call = ctx.store.load_snapshot(code.clone());
        let stored = match outbox::within(ctx.config.store_deadline, call).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(room_code = %code, error = %e, "snapshot load failed");
                return Ok(None);
            }
        };
        match stored {
            Some(stored) if !stored.status.is_terminal() => {
                self.load_from_store(stored).await.map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Registers a room from its durable snapshot and re-arms its timers.
    /// Loading a code that is already live returns the live room.
    pub async fn load_from_store(&self, stored: StoredRoom) -> Result<Arc<Room>, RoomError> {
        let code = stored.code.clone();
        let room = {
            let mut tables = self.inner.tables.lock().await;
            if let Some(live) = tables.rooms.get(&code) {
                return Ok(live.clone());
            }
            let sinks = &tables.sinks;
            let room = Room::restore(self.inner.ctx.clone(), stored, |id| sinks.get(&id).cloned())?;
            tables.rooms.insert(code.clone(), room.clone());
            room
        };
        room.resume().await;
        tracing::info!(room_code = %code, room_id = %room.id(), "room restored from store");
        Ok(room)
    }

    /// Deletes a lobby on behalf of `caller`.
    pub async fn delete(&self, code: &RoomCode, caller: ParticipantId) -> Result<(), RoomError> {
        let room = self.get(code).await.ok_or(RoomError::GameNotFound)?;
        room.delete(caller).await?;
        self.remove(code, &room).await;
        tracing::info!(room_code = %code, participant_id = %caller, "room deleted");
        Ok(())
    }

    /// Drops `code` from the index if it still maps to `room`.
    pub async fn remove(&self, code: &RoomCode, room: &Arc<Room>) {
        let mut tables = self.inner.tables.lock().await;
        if tables.rooms.get(code).is_some_and(|r| Arc::ptr_eq(r, room)) {
            tables.rooms.remove(code);
        }
    }

    pub async fn rooms(&self) -> Vec<Arc<Room>> {
        self.inner.tables.lock().await.rooms.values().cloned().collect()
    }

    pub async fn room_count(&self) -> usize {
        self.inner.tables.lock().await.rooms.len()
    }

    /// Records `sink` as the current connection of `id`.
    pub async fn register_sink(&self, id: ParticipantId, sink: ParticipantSink) {
        self.inner.tables.lock().await.sinks.insert(id, sink);
    }

    /// Forgets `id`'s sink unless it has been replaced by a newer one.
    pub async fn unregister_sink(&self, id: ParticipantId, sink_id: u64) {
        let mut tables = self.inner.tables.lock().await;
        if tables.sinks.get(&id).is_some_and(|s| s.id() == sink_id) {
            tables.sinks.remove(&id);
        }
    }

    /// Starts the periodic sweeper.
    pub fn spawn_janitor(&self) {
        let janitor = Janitor::new(self.clone());
        let token = self.inner.ctx.shutdown_token().clone();
        self.inner.ctx.spawn_guarded("janitor", janitor.run(token));
    }

    /// Stops timers and the janitor, flushes every room's pending store
    /// writes, then drops all rooms and sinks.
    pub async fn shutdown(&self) {
        let ctx = &self.inner.ctx;
        tracing::info!("room registry shutting down");
        ctx.shutdown_token().cancel();

        let rooms = self.rooms().await;
        for room in &rooms {
            room.flush().await;
            room.detach_all().await;
        }
        {
            let mut tables = self.inner.tables.lock().await;
            tables.rooms.clear();
            tables.sinks.clear();
        }
        drop(rooms);

        ctx.tasks().close();
        if tokio::time::timeout(SHUTDOWN_GRACE, ctx.tasks().wait())
            .await
            .is_err()
        {
            tracing::warn!("background tasks still running after shutdown grace period");
        }
        tracing::info!("room registry stopped");
    }
}
