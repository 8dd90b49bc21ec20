//! Error types shared across the engine.
//!
//! Component-specific errors live next to their component
//! ([`crate::tempban::BanError`], [`crate::nickserv::StatusError`]); the
//! types here cover line parsing and the generic correlated-request failures.

use thiserror::Error;

/// Errors produced while parsing a raw protocol line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,

    #[error("line has no command: {0:?}")]
    MissingCommand(String),
}

/// Failures of a correlated server request.
///
/// Everything except [`RequestError::TimedOut`] and
/// [`RequestError::NotAChannel`] is derived from a numeric reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("no such nick/channel")]
    NoSuchNick,

    #[error("invalid or no nickname given")]
    InvalidNick,

    #[error("no such channel")]
    NoSuchChannel,

    #[error("not on that channel")]
    NotOnChannel,

    #[error("not a channel")]
    NotAChannel,

    #[error("server load is temporarily too heavy")]
    ServerOverloaded,

    #[error("request timed out")]
    TimedOut,
}

impl RequestError {
    /// Get a static error code string for log labeling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NoSuchNick => "no_such_nick",
            Self::InvalidNick => "invalid_nick",
            Self::NoSuchChannel => "no_such_channel",
            Self::NotOnChannel => "not_on_channel",
            Self::NotAChannel => "not_a_channel",
            Self::ServerOverloaded => "server_overloaded",
            Self::TimedOut => "timed_out",
        }
    }
}
