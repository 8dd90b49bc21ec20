//! Join heuristics for ban-evading bots.
//!
//! A joining user is checked when all of these hold:
//!
//! 1. no check for the same nick started within the last 15 minutes;
//! 2. the nick, stripped of non-word characters, starts with the ident;
//! 3. the host is a network-masked address rather than a custom vhost.
//!
//! The check then waits for signs of life (a message, notice, part or quit
//! from the nick cancels it), looks the user up with WHOIS and NickServ, and
//! finally kickbans `*!*@host` in every channel for 48 hours. A quit with
//! "Excess flood" during the check bans immediately.

use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, warn};
use warden_core::correlator::HandlerGuard;
use warden_core::nickserv::{self, StatusLevel};
use warden_core::whois::whois;
use warden_core::{HandlerHandle, Line};

use super::Context;
use crate::telemetry::spans;

pub const RECHECK_INTERVAL: Duration = Duration::from_secs(15 * 60);
/// Quiet time required before the first lookup.
pub const ACTIVITY_WINDOW: Duration = Duration::from_secs(1);
/// Quiet time required between later steps.
pub const STEP_DELAY: Duration = Duration::from_millis(250);
pub const MIN_CHANNELS: usize = 48;
pub const BAN_DURATION: Duration = Duration::from_secs(48 * 3600);

pub const BOT_BAN_REASON: &str = "Known pattern of ban-evading/logging bot";
pub const FLOOD_BAN_REASON: &str = "Instant excess flood";

const OPERATOR_PREFIXES: [char; 4] = ['%', '@', '&', '~'];

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("[^0-9A-Za-z_]").expect("static pattern is valid")
});

static MASKED_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Rizon\-[A-F0-9]{8}\..+\.[A-Za-z]|[0-9A-F]{8}\.[0-9A-F]{8}\.[0-9A-F]{8}\.IP")
        .expect("static pattern is valid")
});

/// Whether `host` looks like a network-masked address.
pub fn is_masked_host(host: &str) -> bool {
    MASKED_HOST.is_match(host)
}

/// Whether the nick, stripped of non-word characters, starts with the ident
/// (without a leading `~`).
pub fn nick_matches_ident(nick: &str, ident: &str) -> bool {
    NON_WORD
        .replace_all(nick, "")
        .starts_with(ident.trim_start_matches('~'))
}

/// Why a check ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Banned,
    Skipped(String),
}

fn skip(reason: impl Into<String>) -> Verdict {
    Verdict::Skipped(reason.into())
}

struct Suspect {
    nick: String,
    host: String,
    channel: String,
}

pub struct Detector {
    ctx: Context,
    last_checked: Mutex<HashMap<String, Instant>>,
}

impl Detector {
    pub fn register(ctx: Context) -> (Arc<Self>, HandlerHandle) {
        let detector = Arc::new(Self {
            ctx,
            last_checked: Mutex::new(HashMap::new()),
        });
        let weak = Arc::downgrade(&detector);
        let handle = detector.ctx.conn.handle("JOIN", move |line: &Line| {
            let Some(detector) = weak.upgrade() else {
                return;
            };
            if !detector.should_check(line) {
                return;
            }
            let suspect = Suspect {
                nick: line.nick.clone(),
                host: line.host.clone(),
                channel: line.target().to_string(),
            };
            // Watch for activity from the moment of the join.
            let (activity, guard) = detector.watch(&suspect);
            let span = spans::check(&suspect.nick, &suspect.channel);
            tokio::spawn(
                async move {
                    let verdict = detector.check(&suspect, activity).await;
                    drop(guard);
                    match verdict {
                        Verdict::Banned => info!(host = %suspect.host, "Banned suspected bot"),
                        Verdict::Skipped(reason) => info!(reason = %reason, "Skipping"),
                    }
                }
                .instrument(span),
            );
        });
        (detector, handle)
    }

    fn should_check(&self, line: &Line) -> bool {
        let now = Instant::now();
        {
            let mut last_checked = self.last_checked.lock();
            last_checked.retain(|_, at| now.duration_since(*at) < RECHECK_INTERVAL);
            let key = line.nick.to_ascii_lowercase();
            if last_checked.contains_key(&key) {
                debug!(nick = %line.nick, "Checked recently, not checking again");
                return false;
            }
            last_checked.insert(key, now);
        }

        if self.ctx.conn.is_me(&line.nick) {
            return false;
        }
        if !nick_matches_ident(&line.nick, &line.ident) {
            debug!(nick = %line.nick, ident = %line.ident, "Nick doesn't match the ident, skipping");
            return false;
        }
        if !is_masked_host(&line.host) {
            debug!(nick = %line.nick, host = %line.host, "Custom vhost, skipping");
            return false;
        }
        true
    }

    /// Report messages, notices, parts and quits from the suspect.
    fn watch(&self, suspect: &Suspect) -> (mpsc::UnboundedReceiver<&'static str>, HandlerGuard) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = HandlerGuard::new();
        let conn = &self.ctx.conn;

        for (verb, reason) in [
            ("PRIVMSG", "User sent a message"),
            ("NOTICE", "User sent a notice"),
            ("PART", "User left"),
        ] {
            let (tx, nick) = (tx.clone(), suspect.nick.clone());
            guard.push(conn.handle(verb, move |line: &Line| {
                if line.nick.eq_ignore_ascii_case(&nick) {
                    let _ = tx.send(reason);
                }
            }));
        }

        let (ctx, nick) = (self.ctx.clone(), suspect.nick.clone());
        guard.push(conn.handle("QUIT", move |line: &Line| {
            if !line.nick.eq_ignore_ascii_case(&nick) {
                return;
            }
            if line.arg(0) == Some("Excess flood") {
                let ban = ctx.generate_ban(
                    &line.nick,
                    &format!("*!*@{}", line.host),
                    FLOOD_BAN_REASON,
                    chrono::Duration::from_std(BAN_DURATION).unwrap_or_default(),
                );
                ctx.ban_global(vec![ban]);
                let _ = tx.send("Excess flood, banned early");
            } else {
                let _ = tx.send("User quit normally");
            }
        }));

        (rx, guard)
    }

    async fn check(
        &self,
        suspect: &Suspect,
        mut activity: mpsc::UnboundedReceiver<&'static str>,
    ) -> Verdict {
        if let Some(reason) = quiet_for(&mut activity, ACTIVITY_WINDOW).await {
            return skip(reason);
        }

        let conn = &self.ctx.conn;
        let info = match whois(conn, &suspect.nick).await {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "Can't get WHOIS info");
                return skip(format!("WHOIS failed: {e}"));
            }
        };
        if info.is_operator {
            return skip("User is an operator");
        }
        if info.is_away {
            return skip("User is away");
        }
        if info.realname != suspect.nick {
            return skip("Nick doesn't match the realname");
        }
        if info.channels.len() < MIN_CHANNELS {
            return skip(format!("Only in {} channels", info.channels.len()));
        }
        if info
            .channels
            .values()
            .any(|prefix| prefix.is_some_and(|p| OPERATOR_PREFIXES.contains(&p)))
        {
            return skip("User is opped in a channel");
        }

        if let Some(reason) = quiet_for(&mut activity, STEP_DELAY).await {
            return skip(reason);
        }

        let status = match nickserv::status(conn, &[&suspect.nick]).await {
            Ok(mut statuses) => statuses.remove(&suspect.nick),
            Err(e) => return skip(format!("NickServ status failed: {e}")),
        };
        match status {
            Some(Ok(level)) if level < StatusLevel::Password => {}
            Some(Ok(_)) => return skip("User is identified"),
            Some(Err(e)) => {
                warn!(error = %e, "Can't get auth status");
                return skip(format!("NickServ status failed: {e}"));
            }
            None => return skip("NickServ status missing"),
        }

        if let Some(reason) = quiet_for(&mut activity, STEP_DELAY).await {
            return skip(reason);
        }

        let ban = self.ctx.generate_ban(
            &suspect.nick,
            &format!("*!*@{}", suspect.host),
            BOT_BAN_REASON,
            chrono::Duration::from_std(BAN_DURATION).unwrap_or_default(),
        );
        self.ctx.ban_global(vec![ban]);
        Verdict::Banned
    }
}

/// Wait `window`; returns the first activity reported within it.
async fn quiet_for(
    activity: &mut mpsc::UnboundedReceiver<&'static str>,
    window: Duration,
) -> Option<&'static str> {
    tokio::select! {
        Some(reason) = activity.recv() => Some(reason),
        _ = tokio::time::sleep(window) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_host_pattern() {
        assert!(is_masked_host("2BCAD547.E6EC7FF2.5266FBB4.IP"));
        assert!(is_masked_host(
            "Rizon-C266C4C8.lousy.speed.is.1kbps.on.this.strangled.net"
        ));
        assert!(!is_masked_host("JUST.DO.IT"));
        assert!(!is_masked_host("staff.example.net"));
    }

    #[test]
    fn test_nick_matches_ident() {
        assert!(nick_matches_ident("Bot_123", "~Bot_"));
        assert!(nick_matches_ident("[x]bot", "xbot"));
        assert!(nick_matches_ident("longnickname", "longnickn"));
        assert!(!nick_matches_ident("alice", "~bob"));
    }
}
