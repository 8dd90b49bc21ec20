//! Bot policy built on the warden-core engine.
//!
//! - [`channels`]: the set of channels we sit in, mirrored into the config.
//! - [`autojoin`]: INVITE handling.
//! - [`detector`]: join heuristics that spot ban-evading bots.
//! - [`commands`]: admin commands and the public `bots` report-in.

pub mod autojoin;
pub mod channels;
pub mod commands;
pub mod detector;

use std::sync::Arc;
use tracing::warn;
use warden_core::modebuf::ModeChangeBuffer;
use warden_core::tempban::TempBanManager;
use warden_core::{Connection, TemporaryBan};

use crate::config::SharedConfig;
use channels::ChannelRoster;

/// Everything a policy component needs.
#[derive(Clone)]
pub struct Context {
    pub conn: Arc<Connection>,
    pub tempban: Arc<TempBanManager>,
    pub roster: Arc<ChannelRoster>,
    pub config: Arc<SharedConfig>,
}

impl Context {
    /// A ban issued by us, starting now.
    pub fn generate_ban(
        &self,
        nick: &str,
        hostmask: &str,
        reason: &str,
        duration: chrono::Duration,
    ) -> TemporaryBan {
        TemporaryBan::new(nick, hostmask, self.conn.me(), reason, duration)
    }

    /// Kickban in every channel we are in, one task per channel.
    pub fn ban_global(&self, bans: Vec<TemporaryBan>) {
        let bans = Arc::new(bans);
        for channel in self.roster.channels() {
            let tempban = Arc::clone(&self.tempban);
            let bans = Arc::clone(&bans);
            tokio::spawn(async move {
                let results = tempban.kickban(&channel, &bans).await;
                for (ban, result) in bans.iter().zip(results) {
                    if let Err(e) = result {
                        warn!(
                            channel = %channel,
                            nick = %ban.nick,
                            hostmask = %ban.hostmask,
                            error = %e,
                            "Couldn't ban"
                        );
                    }
                }
            });
        }
    }

    /// Send `-b hostmask` to every channel we are in and forget the
    /// matching stored bans.
    pub fn unban_global(&self, hostmask: &str) {
        let channels = self.roster.channels();
        let buffer = ModeChangeBuffer::for_connection(&self.conn);
        for channel in &channels {
            buffer.append(channel, "-b", &[hostmask]);
        }
        buffer.flush();

        let tempban = Arc::clone(&self.tempban);
        let hostmask = hostmask.to_string();
        tokio::spawn(async move {
            for channel in channels {
                tempban.forget(&channel, &hostmask).await;
            }
        });
    }
}
