//! Client-protocol housekeeping handlers.

use std::sync::{Arc, Weak};
use tracing::{info, warn};
use warden_core::{Connection, HandlerHandle, Line};

const CTCP_DELIM: char = '\x01';

/// `433 <me|*> <nick> :Nickname is already in use`
const ERR_NICKNAMEINUSE: &str = "433";

/// Answer PING, CTCP VERSION, and retry registration with a suffixed nick
/// when ours is taken.
pub fn install(conn: &Arc<Connection>, version: &str) -> Vec<HandlerHandle> {
    let mut handles = Vec::new();

    let weak = Arc::downgrade(conn);
    handles.push(conn.handle_internal("PING", move |line: &Line| {
        if let Some(conn) = weak.upgrade() {
            conn.send_line("PONG", line.args.iter().map(String::as_str));
        }
    }));

    let weak = Arc::downgrade(conn);
    let reply = format!("{CTCP_DELIM}VERSION {version}{CTCP_DELIM}");
    handles.push(conn.handle("PRIVMSG", move |line: &Line| {
        let is_version = line.arg(1).is_some_and(|text| {
            text.trim_matches(CTCP_DELIM)
                .split(' ')
                .next()
                .is_some_and(|word| word.eq_ignore_ascii_case("VERSION"))
                && text.starts_with(CTCP_DELIM)
        });
        if !is_version || line.nick.is_empty() {
            return;
        }
        if let Some(conn) = weak.upgrade() {
            conn.notice(&line.nick, &reply);
        }
    }));

    let weak: Weak<Connection> = Arc::downgrade(conn);
    handles.push(conn.handle(ERR_NICKNAMEINUSE, move |line: &Line| {
        // Only before registration completes; later collisions come from our own NICK.
        if line.arg(0) != Some("*") {
            return;
        }
        let Some(taken) = line.arg(1) else {
            return;
        };
        let next = format!("{taken}_");
        info!(taken = %taken, next = %next, "Nick in use, retrying");
        if let Some(conn) = weak.upgrade() {
            conn.send_line("NICK", [next.as_str()]);
        }
    }));

    handles.push(conn.handle("ERROR", |line: &Line| {
        warn!(reason = %line.trailing().unwrap_or_default(), "Server sent ERROR");
    }));

    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::ServerIdentity;

    #[tokio::test]
    async fn test_protocol_replies() {
        let (conn, mut rx) = Connection::new(ServerIdentity::new("test:6667", false), "warden");
        let _handles = install(&conn, "warden/0.1.0");

        conn.process("PING :irc.example.net".parse().unwrap()).await;
        assert_eq!(rx.recv().await.unwrap().to_string(), "PONG irc.example.net");

        conn.process(":bob!b@h PRIVMSG warden :\x01VERSION\x01".parse().unwrap())
            .await;
        assert_eq!(
            rx.recv().await.unwrap().to_string(),
            "NOTICE bob :\x01VERSION warden/0.1.0\x01"
        );

        conn.process(":bob!b@h PRIVMSG warden :VERSION".parse().unwrap())
            .await;
        conn.process(":irc.example.net 433 * warden :Nickname is already in use".parse().unwrap())
            .await;
        assert_eq!(rx.recv().await.unwrap().to_string(), "NICK warden_");
    }
}
