//! Channel membership tracking.
//!
//! The roster is the live set of channels we sit in. Every own JOIN, PART or
//! KICK is mirrored into the configured channel list so the next start
//! rejoins the same channels.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use warden_core::numeric::RPL_WELCOME;
use warden_core::{Connection, HandlerHandle, Line};

use crate::config::SharedConfig;

#[derive(Default)]
pub struct ChannelRoster {
    /// Lower-cased name to name as joined.
    joined: RwLock<BTreeMap<String, String>>,
}

impl ChannelRoster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Track our JOIN/PART/KICK on `conn`. With `config`, the configured
    /// channel list follows along and is saved on every change.
    pub fn register(
        self: &Arc<Self>,
        conn: &Arc<Connection>,
        config: Option<Arc<SharedConfig>>,
    ) -> Vec<HandlerHandle> {
        let mut handles = Vec::new();

        let (roster, weak, config_join) = (Arc::clone(self), Arc::downgrade(conn), config.clone());
        handles.push(conn.handle_internal("JOIN", move |line: &Line| {
            let Some(conn) = weak.upgrade() else {
                return;
            };
            if !conn.is_me(&line.nick) {
                return;
            }
            let channel = line.target();
            roster.insert(channel);
            if let Some(config) = &config_join {
                config.update(|c| {
                    if c.channels.iter().any(|s| s.eq_ignore_ascii_case(channel)) {
                        return false;
                    }
                    info!(channel = %channel, "Adding to configured channels");
                    c.channels.push(channel.to_string());
                    true
                });
            }
        }));

        let (roster, weak, config_part) = (Arc::clone(self), Arc::downgrade(conn), config.clone());
        handles.push(conn.handle_internal("PART", move |line: &Line| {
            let Some(conn) = weak.upgrade() else {
                return;
            };
            if conn.is_me(&line.nick) {
                roster.leave(line.target(), config_part.as_deref());
            }
        }));

        let (roster, weak) = (Arc::clone(self), Arc::downgrade(conn));
        handles.push(conn.handle_internal("KICK", move |line: &Line| {
            let Some(conn) = weak.upgrade() else {
                return;
            };
            if line.arg(1).is_some_and(|kicked| conn.is_me(kicked)) {
                roster.leave(line.target(), config.as_deref());
            }
        }));

        handles
    }

    pub(crate) fn insert(&self, channel: &str) {
        self.joined
            .write()
            .insert(channel.to_ascii_lowercase(), channel.to_string());
    }

    fn leave(&self, channel: &str, config: Option<&SharedConfig>) {
        self.joined.write().remove(&channel.to_ascii_lowercase());
        if let Some(config) = config {
            config.update(|c| {
                let before = c.channels.len();
                c.channels.retain(|s| !s.eq_ignore_ascii_case(channel));
                if c.channels.len() == before {
                    return false;
                }
                info!(channel = %channel, "Removing from configured channels");
                true
            });
        }
    }

    pub fn channels(&self) -> Vec<String> {
        self.joined.read().values().cloned().collect()
    }
}

/// Join the configured channels right after registration. Used when there
/// are no NickServ credentials, since identification would otherwise trigger
/// the join.
pub fn join_on_welcome(conn: &Arc<Connection>, config: Arc<SharedConfig>) -> HandlerHandle {
    let weak = Arc::downgrade(conn);
    conn.handle(RPL_WELCOME, move |_| {
        let channels = config.read(|c| c.channels.join(","));
        if channels.is_empty() {
            return;
        }
        if let Some(conn) = weak.upgrade() {
            info!(channels = %channels, "Joining configured channels");
            conn.join(&channels);
        }
    })
}
