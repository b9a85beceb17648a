//! Shared collaborators handed to every room.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::{BotAdvisor, Cache, EngineConfig, NoopCache, RandomAdvisor, Store};

/// Configuration, external seams and the background task set.
///
/// Built once at startup and shared behind an `Arc` by the registry and
/// every room. Background work (outbox dispatchers, bot think timers, the
/// inter-round pause, the janitor) is spawned through
/// [`spawn_guarded`](Self::spawn_guarded) so shutdown can cancel and drain
/// it in one place.
pub struct EngineContext {
    pub config: EngineConfig,
    pub store: Arc<dyn Store>,
    pub cache: Arc<dyn Cache>,
    pub advisor: Arc<dyn BotAdvisor>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl EngineContext {
    /// A context with no cache mirror and the random bot advisor.
    pub fn new(config: EngineConfig, store: Arc<dyn Store>) -> Self {
        Self {
            config,
            store,
            cache: Arc::new(NoopCache),
            advisor: Arc::new(RandomAdvisor),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn BotAdvisor>) -> Self {
        self.advisor = advisor;
        self
    }

    /// Fires when the engine is shutting down.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub(crate) fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// Spawns `fut` on the task tracker. A panic inside it is logged and
    /// swallowed.
    pub(crate) fn spawn_guarded<F>(&self, name: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(async move {
            if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
                tracing::error!(task = name, "background task panicked");
            }
        });
    }
}
