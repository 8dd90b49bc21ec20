//! Identity lookup via `WHOIS`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::connection::Connection;
use crate::correlator::{QUERY_TIMEOUT, Request};
use crate::error::RequestError;
use crate::isupport::split_prefix;
use crate::line::Line;
use crate::numeric::{
    ERR_NONICKNAMEGIVEN, ERR_NOSUCHNICK, RPL_AWAY, RPL_ENDOFWHOIS, RPL_TRYAGAIN,
    RPL_WHOISCHANNELS, RPL_WHOISIDLE, RPL_WHOISOPERATOR, RPL_WHOISSERVER, RPL_WHOISUSER,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WhoisServer {
    pub host: String,
    pub info: String,
}

/// Everything a `WHOIS` told us about a nick.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WhoisResponse {
    pub nick: String,
    pub ident: String,
    pub host: String,
    pub realname: String,
    pub server: WhoisServer,
    pub is_operator: bool,
    pub is_away: bool,
    pub away_message: String,
    pub idle: Duration,
    pub sign_on: Option<DateTime<Utc>>,
    /// Channel name to the highest status symbol held there, if any.
    pub channels: HashMap<String, Option<char>>,
}

fn about(line: &Line, nick: &str, min_args: usize) -> bool {
    line.args.len() >= min_args && line.arg(1).is_some_and(|n| n.eq_ignore_ascii_case(nick))
}

type Outcome = Result<(), RequestError>;

/// Look up `nick`, waiting up to 30 seconds for `RPL_ENDOFWHOIS`.
pub async fn whois(conn: &Arc<Connection>, nick: &str) -> Result<WhoisResponse, RequestError> {
    let resp = Arc::new(Mutex::new(WhoisResponse::default()));
    let (prefixes, _) = conn.isupport().prefixes();
    let symbols = prefixes.symbols;
    let mut request = Request::<Outcome>::new();

    {
        let (resp, nick) = (Arc::clone(&resp), nick.to_string());
        request.track(conn.handle(RPL_AWAY, move |line: &Line| {
            if !about(line, &nick, 3) {
                return;
            }
            let mut resp = resp.lock();
            resp.is_away = true;
            resp.away_message = line.args[2].clone();
        }));
    }

    {
        let (resp, nick) = (Arc::clone(&resp), nick.to_string());
        request.track(conn.handle(RPL_WHOISUSER, move |line: &Line| {
            if !about(line, &nick, 6) {
                return;
            }
            let mut resp = resp.lock();
            resp.nick = line.args[1].clone();
            resp.ident = line.args[2].clone();
            resp.host = line.args[3].clone();
            resp.realname = line.args[5].clone();
        }));
    }

    {
        let (resp, nick) = (Arc::clone(&resp), nick.to_string());
        request.track(conn.handle(RPL_WHOISSERVER, move |line: &Line| {
            if !about(line, &nick, 4) {
                return;
            }
            resp.lock().server = WhoisServer {
                host: line.args[2].clone(),
                info: line.args[3].clone(),
            };
        }));
    }

    {
        let (resp, nick) = (Arc::clone(&resp), nick.to_string());
        request.track(conn.handle(RPL_WHOISOPERATOR, move |line: &Line| {
            if about(line, &nick, 2) {
                resp.lock().is_operator = true;
            }
        }));
    }

    {
        let (resp, nick) = (Arc::clone(&resp), nick.to_string());
        request.track(conn.handle(RPL_WHOISIDLE, move |line: &Line| {
            if !about(line, &nick, 3) {
                return;
            }
            let Ok(idle) = line.args[2].parse::<u64>() else {
                return;
            };
            let mut resp = resp.lock();
            resp.idle = Duration::from_secs(idle);
            resp.sign_on = line
                .arg(3)
                .and_then(|ts| ts.parse::<i64>().ok())
                .and_then(|ts| DateTime::from_timestamp(ts, 0));
        }));
    }

    {
        let (resp, nick) = (Arc::clone(&resp), nick.to_string());
        request.track(conn.handle(RPL_WHOISCHANNELS, move |line: &Line| {
            if !about(line, &nick, 3) {
                return;
            }
            let mut resp = resp.lock();
            for prefixed in line.args[2].split(' ').filter(|c| !c.is_empty()) {
                let (status, channel) = split_prefix(prefixed, &symbols);
                resp.channels
                    .insert(channel.to_string(), status.first().copied());
            }
        }));
    }

    {
        let (done, nick) = (request.completion(), nick.to_string());
        request.track(conn.handle(RPL_ENDOFWHOIS, move |line: &Line| {
            if about(line, &nick, 2) {
                done.complete(Ok(()));
            }
        }));
    }

    {
        let (done, nick) = (request.completion(), nick.to_string());
        request.track(conn.handle(ERR_NOSUCHNICK, move |line: &Line| {
            if about(line, &nick, 2) {
                done.complete(Err(RequestError::NoSuchNick));
            }
        }));
    }

    {
        let done = request.completion();
        request.track(conn.handle(ERR_NONICKNAMEGIVEN, move |_| {
            done.complete(Err(RequestError::InvalidNick));
        }));
    }

    {
        let done = request.completion();
        request.track(conn.handle(RPL_TRYAGAIN, move |line: &Line| {
            if line.arg(1).is_none_or(|cmd| cmd.eq_ignore_ascii_case("WHOIS")) {
                done.complete(Err(RequestError::ServerOverloaded));
            }
        }));
    }

    conn.whois(nick);
    request.wait(QUERY_TIMEOUT).await??;

    let resp = resp.lock().clone();
    debug!(nick = %nick, channels = resp.channels.len(), "WHOIS complete");
    Ok(resp)
}
