//! Advisory snapshot mirror.
//!
//! Rooms mirror their public snapshot into a [`Cache`] after every change so
//! other services can read room state cheaply. The engine itself never
//! reads it back, and a failing cache never aborts an operation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dixit_protocol::RoomCode;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::time::Instant;

use crate::store::StoreResult;
use crate::StoreError;

pub trait Cache: Send + Sync + 'static {
    fn put_room_snapshot(
        &self,
        code: RoomCode,
        json: String,
        ttl: Duration,
    ) -> BoxFuture<'static, StoreResult<()>>;

    fn delete_room_snapshot(&self, code: RoomCode) -> BoxFuture<'static, StoreResult<()>>;
}

/// A cache that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

impl Cache for NoopCache {
    fn put_room_snapshot(
        &self,
        _code: RoomCode,
        _json: String,
        _ttl: Duration,
    ) -> BoxFuture<'static, StoreResult<()>> {
        async { Ok(()) }.boxed()
    }

    fn delete_room_snapshot(&self, _code: RoomCode) -> BoxFuture<'static, StoreResult<()>> {
        async { Ok(()) }.boxed()
    }
}

/// An in-process cache with per-entry expiry.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<RoomCode, (String, Instant)>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mirrored JSON for `code`, if present and not expired.
    pub fn get(&self, code: &RoomCode) -> Option<String> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(code)
            .filter(|(_, expires)| Instant::now() < *expires)
            .map(|(json, _)| json.clone())
    }
}

impl Cache for MemoryCache {
    fn put_room_snapshot(
        &self,
        code: RoomCode,
        json: String,
        ttl: Duration,
    ) -> BoxFuture<'static, StoreResult<()>> {
        let entries = self.entries.clone();
        async move {
            let mut entries = entries
                .lock()
                .map_err(|_| StoreError::Unavailable("cache poisoned".into()))?;
            entries.insert(code, (json, Instant::now() + ttl));
            Ok(())
        }
        .boxed()
    }

    fn delete_room_snapshot(&self, code: RoomCode) -> BoxFuture<'static, StoreResult<()>> {
        let entries = self.entries.clone();
        async move {
            let mut entries = entries
                .lock()
                .map_err(|_| StoreError::Unavailable("cache poisoned".into()))?;
            entries.remove(&code);
            Ok(())
        }
        .boxed()
    }
}
