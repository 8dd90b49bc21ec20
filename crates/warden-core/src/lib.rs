//! warden-core - protocol correlation and temporary-ban lifecycle engine.
//!
//! The crate sits between a line-oriented IRC transport and bot policy code:
//!
//! - [`isupport`]: capability table built from `RPL_ISUPPORT` (005).
//! - [`dispatch`]: ordered, removable event handler registries.
//! - [`connection`]: the transport-facing collaborator that delivers parsed
//!   lines through the dispatcher and accepts outgoing lines.
//! - [`mode`]: `MODE` line parser emitting one event per mode character.
//! - [`correlator`]: one-shot request/response helper used by every query.
//! - [`whois`], [`nickserv`], [`banlist`]: correlated queries.
//! - [`modebuf`]: outbound mode batching that respects `MODES=`.
//! - [`tempban`]: temporary ban stores, expiry, persistence and server sync.

pub mod banlist;
pub mod connection;
pub mod correlator;
pub mod dispatch;
pub mod error;
pub mod isupport;
pub mod line;
pub mod mode;
pub mod modebuf;
pub mod nickserv;
pub mod numeric;
pub mod pattern;
pub mod tempban;
pub mod whois;

pub use connection::{Connection, ServerIdentity};
pub use dispatch::{Dispatcher, HandlerHandle};
pub use error::{ParseError, RequestError};
pub use isupport::Isupport;
pub use line::Line;
pub use mode::{ModeAction, ModeChangeEvent, ModeKey, ModeTracker};
pub use tempban::{BanError, TempBanManager, TemporaryBan};
