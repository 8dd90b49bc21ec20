//! Network module.
//!
//! Contains the line transport that drives a [`warden_core::Connection`] and
//! the client-protocol handlers (PING, CTCP VERSION, nick collisions).

mod client;
mod protocol;

pub use client::{NetworkError, Registration, connect, run};
pub use protocol::install as install_protocol;
