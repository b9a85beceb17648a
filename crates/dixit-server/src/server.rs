//! `DixitServer` builder and accept loop.
//!
//! This is the entry point for running a game server. It ties the layers
//! together: transport → session → protocol → room registry.

use std::future::Future;
use std::sync::Arc;

use dixit_protocol::JsonCodec;
use dixit_room::{
    BotAdvisor, Cache, EngineConfig, EngineContext, MemoryStore, Registry, Store,
};
use dixit_session::Authenticator;
use dixit_transport::{Transport, WebSocketTransport};

use crate::handler::handle_connection;
use crate::{ServerConfig, ServerError};

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<A: Authenticator> {
    pub(crate) registry: Registry,
    pub(crate) auth: A,
    pub(crate) codec: JsonCodec,
}

/// Builder for configuring and starting a server.
///
/// # Example
///
/// ```rust,ignore
/// use dixit_server::DixitServer;
/// use dixit_session::GuestAuthenticator;
///
/// let server = DixitServer::builder()
///     .bind("0.0.0.0:8080")
///     .build(GuestAuthenticator)
///     .await?;
/// server.run_until(tokio::signal::ctrl_c()).await
/// ```
pub struct DixitServerBuilder {
    bind_addr: String,
    engine: EngineConfig,
    store: Option<Arc<dyn Store>>,
    cache: Option<Arc<dyn Cache>>,
    advisor: Option<Arc<dyn BotAdvisor>>,
    janitor: bool,
}

impl DixitServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            engine: EngineConfig::default(),
            store: None,
            cache: None,
            advisor: None,
            janitor: true,
        }
    }

    /// Takes the bind address and engine tuning from `config`.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.bind_addr = config.bind;
        self.engine = config.engine;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Durable store. Defaults to an in-process [`MemoryStore`].
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Snapshot mirror. Defaults to none.
    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn advisor(mut self, advisor: Arc<dyn BotAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    /// Whether [`run`](DixitServer::run) starts the janitor. On by default.
    pub fn janitor(mut self, enabled: bool) -> Self {
        self.janitor = enabled;
        self
    }

    /// Binds the listener and assembles the room engine.
    pub async fn build<A: Authenticator>(self, auth: A) -> Result<DixitServer<A>, ServerError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let mut ctx = EngineContext::new(self.engine, store);
        if let Some(cache) = self.cache {
            ctx = ctx.with_cache(cache);
        }
        if let Some(advisor) = self.advisor {
            ctx = ctx.with_advisor(advisor);
        }

        let state = Arc::new(ServerState {
            registry: Registry::new(ctx),
            auth,
            codec: JsonCodec,
        });

        Ok(DixitServer {
            transport,
            state,
            janitor: self.janitor,
        })
    }
}

impl Default for DixitServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound game server.
///
/// Call [`run()`](Self::run) or [`run_until()`](Self::run_until) to start
/// accepting connections.
pub struct DixitServer<A: Authenticator> {
    transport: WebSocketTransport,
    state: Arc<ServerState<A>>,
    janitor: bool,
}

impl<A: Authenticator> DixitServer<A> {
    /// Creates a new builder.
    pub fn builder() -> DixitServerBuilder {
        DixitServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        Ok(self.transport.local_addr()?)
    }

    /// The room registry behind this server.
    pub fn registry(&self) -> &Registry {
        &self.state.registry
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Runs the accept loop until `shutdown` resolves, then stops the room
    /// engine: timers are cancelled and pending store writes are flushed.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future + Send,
    {
        if self.janitor {
            self.state.registry.spawn_janitor();
        }
        tracing::info!("dixit server running");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(conn, state).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        tracing::info!("shutdown requested");
        self.transport.shutdown().await?;
        self.state.registry.shutdown().await;
        Ok(())
    }
}
