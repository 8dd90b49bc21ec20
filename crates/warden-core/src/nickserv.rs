//! NickServ integration: identify on connect, join once identified, and
//! batched `STATUS` queries.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::correlator::{QUERY_TIMEOUT, Request};
use crate::dispatch::HandlerHandle;
use crate::line::Line;
use crate::mode::{ModeKey, ModeTracker};
use crate::numeric::RPL_WELCOME;

/// Most nicks NickServ accepts in one `STATUS` request.
pub const MAX_STATUS_NICKS: usize = 16;

const NICKSERV: &str = "NickServ";

/// Authentication level reported by `STATUS`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatusLevel {
    /// No such user online or nickname not registered.
    NoSuchUser = 0,
    /// User not recognized as the nickname's owner.
    NotRecognized = 1,
    /// Recognized as owner via access list only.
    AccessList = 2,
    /// Recognized as owner via password identification.
    Password = 3,
}

impl StatusLevel {
    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::NoSuchUser),
            1 => Some(Self::NotRecognized),
            2 => Some(Self::AccessList),
            3 => Some(Self::Password),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusError {
    #[error("too many nicknames: {0} (at most {MAX_STATUS_NICKS})")]
    TooManyNicks(usize),

    #[error("timed out")]
    TimedOut,

    #[error("invalid status level {0:?}")]
    InvalidLevel(String),
}

pub type StatusResult = Result<StatusLevel, StatusError>;

/// Parse `STATUS <nick> <level>` from a NickServ notice.
fn parse_status(text: &str) -> Option<(&str, &str)> {
    let mut words = text.split(' ').filter(|w| !w.is_empty());
    if !words.next()?.eq_ignore_ascii_case("STATUS") {
        return None;
    }
    Some((words.next()?, words.next()?))
}

/// Query the authentication status of up to [`MAX_STATUS_NICKS`] nicks.
///
/// Nicks NickServ does not answer for within 30 seconds map to
/// [`StatusError::TimedOut`].
/// Nicks repeated in a different case are asked about once and keyed by
/// their first spelling.
pub async fn status(
    conn: &Arc<Connection>,
    nicks: &[&str],
) -> Result<HashMap<String, StatusResult>, StatusError> {
    if nicks.len() > MAX_STATUS_NICKS {
        return Err(StatusError::TooManyNicks(nicks.len()));
    }
    if nicks.is_empty() {
        return Ok(HashMap::new());
    }

    // NickServ answers once per nick, whatever its case.
    let mut unique: Vec<&str> = Vec::with_capacity(nicks.len());
    for nick in nicks {
        if !unique.iter().any(|u| u.eq_ignore_ascii_case(nick)) {
            unique.push(*nick);
        }
    }

    let responses: Arc<Mutex<HashMap<String, StatusResult>>> = Arc::new(Mutex::new(
        unique
            .iter()
            .map(|n| (n.to_string(), Err(StatusError::TimedOut)))
            .collect(),
    ));
    let answered = Arc::new(Mutex::new(0usize));
    let mut request = Request::<()>::new();

    {
        let (conn_ref, responses, done) =
            (Arc::clone(conn), Arc::clone(&responses), request.completion());
        let wanted = unique.len();
        request.track(conn.handle("NOTICE", move |line: &Line| {
            if !line.nick.eq_ignore_ascii_case(NICKSERV) || !conn_ref.is_me(line.target()) {
                return;
            }
            let Some((nick, level)) = line.arg(1).and_then(parse_status) else {
                return;
            };

            let mut responses = responses.lock();
            let Some(key) = responses
                .keys()
                .find(|k| k.eq_ignore_ascii_case(nick))
                .cloned()
            else {
                debug!(nick = %nick, "STATUS reply for a nick we did not ask about");
                return;
            };

            let result = level
                .parse::<u8>()
                .ok()
                .and_then(StatusLevel::from_code)
                .ok_or_else(|| StatusError::InvalidLevel(level.to_string()));
            let first_answer = matches!(responses.get(&key), Some(Err(StatusError::TimedOut)));
            responses.insert(key, result);

            if first_answer {
                let mut answered = answered.lock();
                *answered += 1;
                if *answered == wanted {
                    done.complete(());
                }
            }
        }));
    }

    conn.privmsg(NICKSERV, &format!("STATUS {}", unique.join(" ")));
    if request.wait(QUERY_TIMEOUT).await.is_err() {
        warn!(nicks = %nicks.join(","), "Timed out waiting for NickServ status replies");
    }

    let responses = std::mem::take(&mut *responses.lock());
    Ok(responses)
}

/// Credentials for identifying to NickServ.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Identify after registration and join the configured channels once the
/// server marks us `+r`.
pub struct NickServ {
    handles: Vec<HandlerHandle>,
}

impl NickServ {
    pub fn register<F>(
        conn: &Arc<Connection>,
        modes: &ModeTracker,
        credentials: Credentials,
        channels: F,
    ) -> Self
    where
        F: Fn() -> Vec<String> + Send + Sync + 'static,
    {
        let mut handles = Vec::new();

        let identify_conn = Arc::clone(conn);
        handles.push(conn.handle(RPL_WELCOME, move |_| {
            if credentials.password.is_empty() {
                return;
            }
            let command = if credentials.username.is_empty() {
                format!("IDENTIFY {}", credentials.password)
            } else {
                format!("IDENTIFY {} {}", credentials.username, credentials.password)
            };
            info!("Identifying with NickServ");
            identify_conn.privmsg(NICKSERV, &command);
        }));

        let join_conn = Arc::clone(conn);
        handles.push(modes.handle(ModeKey::added('r'), move |e| {
            if !join_conn.is_me(&e.target) {
                return;
            }
            let channels = channels();
            if channels.is_empty() {
                return;
            }
            info!(channels = %channels.join(","), "Identified, joining channels");
            join_conn.join(&channels.join(","));
        }));

        Self { handles }
    }

    pub fn detach(&self) {
        for handle in &self.handles {
            handle.remove();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_words() {
        assert_eq!(parse_status("STATUS alice 3"), Some(("alice", "3")));
        assert_eq!(parse_status("status bob 0 extra"), Some(("bob", "0")));
        assert_eq!(parse_status("STATUS bob"), None);
        assert_eq!(parse_status("You are now identified"), None);
    }

    #[test]
    fn test_level_ordering() {
        assert!(StatusLevel::Password > StatusLevel::AccessList);
        assert_eq!(StatusLevel::from_code(1), Some(StatusLevel::NotRecognized));
        assert_eq!(StatusLevel::from_code(9), None);
    }
}
