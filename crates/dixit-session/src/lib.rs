//! Connection identity for the storyteller game server.
//!
//! Every socket is bound to exactly one participant identity for its whole
//! lifetime. This crate turns the upgrade request's query string into that
//! identity:
//!
//! 1. **Credentials**: [`Credentials::from_query`] decodes `player_id`,
//!    `player_name` and `token` from the query string.
//! 2. **Authentication**: an [`Authenticator`] validates the credentials and
//!    returns an [`Identity`]. [`GuestAuthenticator`] accepts everyone.
//!
//! # How it fits in the stack
//!
//! ```text
//! Server edge (above)  ← binds the Identity to the connection
//!     ↕
//! Session Layer (this crate)  ← credentials → identity
//!     ↕
//! Protocol Layer (below)  ← provides ParticipantId, AuthType
//! ```

#![allow(async_fn_in_trait)]

mod auth;
mod credentials;
mod error;
mod identity;

pub use auth::{Authenticator, GuestAuthenticator};
pub use credentials::Credentials;
pub use error::SessionError;
pub use identity::{Identity, MAX_NAME_LEN};
