//! Chat commands.
//!
//! Admin commands are addressed with `!` in a channel, or sent in a private
//! message with or without the `!`. Callers whose full source does not match
//! an admin hostmask are ignored.
//!
//! | command                               | effect                               |
//! |---------------------------------------|--------------------------------------|
//! | `listbans <channel>`                  | list stored temporary bans           |
//! | `globalban <nick\|mask> <dur> <why>`  | kickban in every channel we are in   |
//! | `globalunban <nick\|mask>`            | `-b` in every channel we are in      |
//!
//! Anyone may say `!bots` (or `.bots`, `+bots`, `@bots`) in a channel named
//! `bots` or `vpnbot` to get a report-in.

use chrono::Utc;
use std::sync::Arc;
use tracing::{Instrument, debug};
use warden_core::isupport::split_prefix;
use warden_core::pattern::matches_any;
use warden_core::tempban::humanize;
use warden_core::whois::whois;
use warden_core::{HandlerHandle, Line};

use super::Context;
use crate::telemetry::spans;

pub const COMMAND_PREFIX: char = '!';
const REPORT_IN_PREFIXES: [char; 4] = ['.', '!', '+', '@'];
const REPORT_IN_CHANNELS: [&str; 2] = ["bots", "vpnbot"];

/// A parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Lower-cased command name.
    pub name: String,
    pub args: String,
    /// Channel or nick to answer to.
    pub reply_to: String,
}

/// Extract a command from a PRIVMSG addressed to a channel or to us.
pub fn parse_invocation(ctx: &Context, line: &Line) -> Option<Invocation> {
    let target = line.target();
    let text = line.arg(1)?;
    let (text, reply_to) = if ctx.conn.isupport().is_channel(target) {
        (text.strip_prefix(COMMAND_PREFIX)?, target.to_string())
    } else if ctx.conn.is_me(target) {
        (
            text.strip_prefix(COMMAND_PREFIX).unwrap_or(text),
            line.nick.clone(),
        )
    } else {
        return None;
    };

    let (name, args) = text.split_once(' ').unwrap_or((text, ""));
    if name.is_empty() {
        return None;
    }
    Some(Invocation {
        name: name.to_ascii_lowercase(),
        args: args.trim().to_string(),
        reply_to,
    })
}

pub fn register(ctx: Context) -> HandlerHandle {
    let conn = Arc::clone(&ctx.conn);
    conn.handle_background("PRIVMSG", move |line: Arc<Line>| {
        let ctx = ctx.clone();
        async move {
            if report_in(&ctx, &line) {
                return;
            }
            let Some(invocation) = parse_invocation(&ctx, &line) else {
                return;
            };
            let admins = ctx.config.read(|c| c.admin_patterns());
            if !matches_any(&admins, line.src()) {
                debug!(source = %line.src(), command = %invocation.name, "Ignoring command from non-admin");
                return;
            }
            let span = spans::command(&invocation.name, line.src());
            run(&ctx, &invocation).instrument(span).await;
        }
    })
}

async fn run(ctx: &Context, invocation: &Invocation) {
    let reply = |text: &str| ctx.conn.privmsg(&invocation.reply_to, text);
    match invocation.name.as_str() {
        "listbans" => list_bans(ctx, &invocation.args, reply),
        "globalban" => global_ban(ctx, &invocation.args, reply).await,
        "globalunban" => global_unban(ctx, &invocation.args, reply).await,
        _ => {}
    }
}

fn list_bans(ctx: &Context, channel: &str, reply: impl Fn(&str)) {
    if channel.is_empty() {
        reply("Need a channel to query.");
        return;
    }
    let bans = ctx.tempban.bans(channel);
    if bans.is_empty() {
        reply(&format!("No bans set for \x02{channel}\x02."));
        return;
    }
    let now = Utc::now();
    for (i, ban) in bans.iter().enumerate() {
        reply(&format!(
            "{:>4}. \x02{:<41}\x02 (\x02{}\x02, expires \x02{}\x02)",
            i + 1,
            ban.hostmask,
            ban.reason,
            humanize(ban.expiration_time, now)
        ));
    }
}

/// Turn a nick into `*!*@host` via WHOIS; masks pass through. Returns the
/// mask and the nick to kick, which is empty for masks.
async fn resolve(ctx: &Context, target: &str) -> Result<(String, String), String> {
    if target.contains(['@', '!']) {
        return Ok((target.to_string(), String::new()));
    }
    match whois(&ctx.conn, target).await {
        Ok(info) => Ok((format!("*!*@{}", info.host), target.to_string())),
        Err(e) => Err(format!("Can't get information about this nick: {e}")),
    }
}

async fn global_ban(ctx: &Context, args: &str, reply: impl Fn(&str)) {
    let mut parts = args.splitn(3, ' ');
    let (Some(target), Some(duration), Some(reason)) = (parts.next(), parts.next(), parts.next())
    else {
        reply("Need a nickname or hostmask, duration and reason to ban, in this order.");
        return;
    };
    let duration = match humantime::parse_duration(duration)
        .map_err(|e| e.to_string())
        .and_then(|d| chrono::Duration::from_std(d).map_err(|e| e.to_string()))
    {
        Ok(duration) => duration,
        Err(e) => {
            reply(&format!("Failed to parse duration: {e}"));
            return;
        }
    };
    let (mask, nick) = match resolve(ctx, target).await {
        Ok(resolved) => resolved,
        Err(e) => {
            reply(&e);
            return;
        }
    };

    let reason = format!("Manual global ban: {reason}");
    let now = Utc::now();
    reply(&format!(
        "Banning \x02{mask}\x02 until \x02{}\x02 with reason \x02{reason}\x02.",
        humanize(now + duration, now)
    ));
    ctx.ban_global(vec![ctx.generate_ban(&nick, &mask, &reason, duration)]);
}

async fn global_unban(ctx: &Context, args: &str, reply: impl Fn(&str)) {
    let Some(target) = args.split(' ').next().filter(|t| !t.is_empty()) else {
        reply("Need a nickname or hostmask.");
        return;
    };
    let (mask, _) = match resolve(ctx, target).await {
        Ok(resolved) => resolved,
        Err(e) => {
            reply(&e);
            return;
        }
    };
    reply(&format!("Unbanning \x02{mask}\x02."));
    ctx.unban_global(&mask);
}

/// Answer `!bots` in the report-in channels. Returns whether it did.
fn report_in(ctx: &Context, line: &Line) -> bool {
    let target = line.target();
    let (chan_prefixes, name) = ctx.conn.isupport().split_channel(target);
    if chan_prefixes.is_empty() || !REPORT_IN_CHANNELS.iter().any(|c| c.eq_ignore_ascii_case(name)) {
        return false;
    }
    let Some(word) = line.arg(1).and_then(|text| text.split(' ').next()) else {
        return false;
    };
    let (prefixes, word) = split_prefix(word, &REPORT_IN_PREFIXES);
    if prefixes.is_empty() || !word.eq_ignore_ascii_case("bots") {
        return false;
    }
    ctx.conn.privmsg(
        target,
        &format!(
            "Reporting in! [Rust] {} {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ),
    );
    true
}
