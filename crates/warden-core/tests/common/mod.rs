//! Shared harness for warden-core integration tests.
//!
//! A [`FakeServer`] owns a [`Connection`] with no socket behind it: tests feed
//! raw server lines in and read back what the bot queued to send.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use warden_core::{Connection, Line, ModeTracker, ServerIdentity};

pub const SERVER: &str = "irc.example.net:6697";
pub const ME: &str = "warden";

/// ISUPPORT tokens most tests run with.
pub const DEFAULT_ISUPPORT: &str =
    "CHANTYPES=# PREFIX=(qaohv)~&@%+ CHANMODES=beI,k,l,imnpst MODES=4";

pub struct FakeServer {
    pub conn: Arc<Connection>,
    pub modes: Arc<ModeTracker>,
    outbound: mpsc::UnboundedReceiver<Line>,
}

impl FakeServer {
    /// A registered connection that has seen `001` and the given `005` tokens.
    pub async fn start(isupport: &str) -> Self {
        let (conn, outbound) = Connection::new(ServerIdentity::new(SERVER, false), ME);
        let modes = ModeTracker::register(&conn);
        let server = Self {
            conn,
            modes,
            outbound,
        };
        server
            .feed(&format!(":irc.example.net 001 {ME} :Welcome to the network"))
            .await;
        server
            .feed(&format!(
                ":irc.example.net 005 {ME} {isupport} :are supported by this server"
            ))
            .await;
        server
    }

    pub async fn feed(&self, raw: &str) {
        let line: Line = raw.parse().expect("valid test line");
        self.conn.process(line).await;
    }

    /// Next line the bot sent, waiting up to five seconds.
    pub async fn sent(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.outbound.recv())
            .await
            .expect("timed out waiting for an outbound line")
            .expect("outbound queue closed")
            .to_string()
    }

    /// Whatever the bot sent within `wait`, if anything.
    pub async fn sent_within(&mut self, wait: Duration) -> Option<String> {
        tokio::time::timeout(wait, self.outbound.recv())
            .await
            .ok()
            .flatten()
            .map(|line| line.to_string())
    }
}

/// Poll `cond` every 10ms for up to five seconds.
pub async fn eventually<F: Fn() -> bool>(cond: F) -> bool {
    for _ in 0..500 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
