//! Channel ban-list retrieval (`MODE <channel> +b`).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::connection::Connection;
use crate::correlator::{QUERY_TIMEOUT, Request};
use crate::error::RequestError;
use crate::isupport::ChanModeType;
use crate::line::Line;
use crate::mode::split_hostmask;
use crate::numeric::{
    ERR_NOSUCHCHANNEL, ERR_NOTONCHANNEL, RPL_BANLIST, RPL_ENDOFBANLIST, RPL_TRYAGAIN,
};

/// One entry of a channel's ban list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BanEntry {
    pub hostmask: String,
    /// Who set the ban, as reported by the server.
    pub source: String,
    pub nick: String,
    pub ident: String,
    pub host: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl BanEntry {
    /// Build from `367 <me> <channel> <mask> [<setter> [<unix time>]]`.
    fn from_reply(line: &Line) -> Option<Self> {
        let hostmask = line.arg(2)?.to_string();
        let source = line.arg(3).unwrap_or_default().to_string();
        let setter = split_hostmask(&source);
        let timestamp = line
            .arg(4)
            .and_then(|ts| ts.parse::<i64>().ok())
            .and_then(|ts| DateTime::from_timestamp(ts, 0));
        Some(Self {
            hostmask,
            nick: setter.nick,
            ident: setter.ident,
            host: setter.host,
            source,
            timestamp,
        })
    }
}

fn for_channel(line: &Line, channel: &str) -> bool {
    line.arg(1).is_some_and(|c| c.eq_ignore_ascii_case(channel))
}

/// Fetch the ban list of `channel`, waiting up to 30 seconds for its end.
///
/// Servers that do not announce `b` as a list mode yield an empty list.
pub async fn list_bans(conn: &Arc<Connection>, channel: &str) -> Result<Vec<BanEntry>, RequestError> {
    let isupport = conn.isupport();
    if !isupport.is_channel(channel) {
        return Err(RequestError::NotAChannel);
    }
    let (chan_modes, _) = isupport.chan_modes();
    if chan_modes.classify('b') != Some(ChanModeType::List) {
        debug!(channel = %channel, "Server has no ban list mode");
        return Ok(Vec::new());
    }

    let entries = Arc::new(Mutex::new(Vec::new()));
    let mut request = Request::<Result<(), RequestError>>::new();

    {
        let (entries, channel) = (Arc::clone(&entries), channel.to_string());
        request.track(conn.handle(RPL_BANLIST, move |line: &Line| {
            if !for_channel(line, &channel) {
                return;
            }
            if let Some(entry) = BanEntry::from_reply(line) {
                entries.lock().push(entry);
            }
        }));
    }

    for (code, outcome) in [
        (RPL_ENDOFBANLIST, Ok(())),
        (ERR_NOSUCHCHANNEL, Err(RequestError::NoSuchChannel)),
        (ERR_NOTONCHANNEL, Err(RequestError::NotOnChannel)),
    ] {
        let (done, channel) = (request.completion(), channel.to_string());
        request.track(conn.handle(code, move |line: &Line| {
            if for_channel(line, &channel) {
                done.complete(outcome.clone());
            }
        }));
    }

    {
        let done = request.completion();
        request.track(conn.handle(RPL_TRYAGAIN, move |line: &Line| {
            if line.arg(1).is_none_or(|cmd| cmd.eq_ignore_ascii_case("MODE")) {
                done.complete(Err(RequestError::ServerOverloaded));
            }
        }));
    }

    conn.mode::<&str>(channel, "+b", &[]);
    request.wait(QUERY_TIMEOUT).await??;

    let entries = std::mem::take(&mut *entries.lock());
    debug!(channel = %channel, count = entries.len(), "Fetched ban list");
    Ok(entries)
}
