//! # Dixit server
//!
//! WebSocket edge for the storyteller card game. Clients connect with
//! their credentials in the query string, receive `connection_established`,
//! then exchange `{type, payload}` JSON frames with the room engine.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dixit_server::{DixitServer, ServerConfig};
//! use dixit_session::GuestAuthenticator;
//!
//! # async fn run() -> Result<(), dixit_server::ServerError> {
//! let server = DixitServer::<GuestAuthenticator>::builder()
//!     .config(ServerConfig::from_env())
//!     .build(GuestAuthenticator)
//!     .await?;
//! server.run_until(tokio::signal::ctrl_c()).await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod server;

pub use config::ServerConfig;
pub use error::ServerError;
pub use server::{DixitServer, DixitServerBuilder};
