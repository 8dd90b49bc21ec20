//! `MODE` line parsing and mode-change subscriptions.
//!
//! [`ModeTracker`] subscribes to `MODE` on a [`Connection`] and turns each line
//! into one [`ModeChangeEvent`] per mode character. Each event is dispatched
//! under its specific key (`+b`, `-l`, ...) and then under [`ModeKey::Any`],
//! fully, before the next character is looked at.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tracing::trace;

use crate::connection::Connection;
use crate::dispatch::{Dispatcher, Event, HandlerHandle};
use crate::isupport::{ChanModeType, Isupport};
use crate::line::Line;

/// Whether a mode was set or unset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModeAction {
    Added,
    Removed,
}

impl ModeAction {
    pub fn sign(self) -> char {
        match self {
            Self::Added => '+',
            Self::Removed => '-',
        }
    }
}

/// Subscription key for mode changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModeKey {
    /// Every mode change.
    Any,
    /// One action on one mode character.
    Change(ModeAction, char),
}

impl ModeKey {
    pub fn added(mode: char) -> Self {
        Self::Change(ModeAction::Added, mode)
    }

    pub fn removed(mode: char) -> Self {
        Self::Change(ModeAction::Removed, mode)
    }

    /// Parse `*`, `+x` or `-x`.
    pub fn parse(s: &str) -> Option<Self> {
        if s == "*" {
            return Some(Self::Any);
        }
        let mut chars = s.chars();
        let action = match chars.next()? {
            '+' => ModeAction::Added,
            '-' => ModeAction::Removed,
            _ => return None,
        };
        let mode = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        Some(Self::Change(action, mode))
    }
}

impl fmt::Display for ModeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Change(action, mode) => write!(f, "{}{}", action.sign(), mode),
        }
    }
}

/// One resolved mode change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModeChangeEvent {
    pub nick: String,
    pub ident: String,
    pub host: String,
    pub source: String,
    pub tags: Vec<(String, Option<String>)>,
    pub target: String,
    pub action: ModeAction,
    pub mode: char,
    /// Present only when the mode takes a parameter for this action.
    pub argument: Option<String>,
}

impl ModeChangeEvent {
    pub fn key(&self) -> ModeKey {
        ModeKey::Change(self.action, self.mode)
    }
}

impl Event for ModeChangeEvent {
    type Key = ModeKey;
}

/// Resolve a `MODE` line into its individual changes.
///
/// Returns nothing for lines with fewer than two arguments or whose mode
/// string does not start with `+` or `-`. A missing parameter stops parsing;
/// the changes before it are kept.
pub fn parse_mode_line(line: &Line, isupport: &Isupport) -> Vec<ModeChangeEvent> {
    let (Some(target), Some(modes)) = (line.arg(0), line.arg(1)) else {
        return Vec::new();
    };

    let is_channel = isupport.is_channel(target);
    let (chan_modes, _) = isupport.chan_modes();
    let (prefixes, _) = isupport.prefixes();

    let mut params = line.args.iter().skip(2);
    let mut action = None;
    let mut events = Vec::new();

    for c in modes.chars() {
        match c {
            '+' => action = Some(ModeAction::Added),
            '-' => action = Some(ModeAction::Removed),
            mode => {
                let Some(action) = action else {
                    return Vec::new();
                };

                let takes_param = is_channel
                    && if prefixes.is_prefix_mode(mode) {
                        true
                    } else {
                        match chan_modes.classify(mode) {
                            Some(ChanModeType::List | ChanModeType::Setting) => true,
                            Some(ChanModeType::SettingParamWhenSet) => action == ModeAction::Added,
                            Some(ChanModeType::SettingNoParam) | None => false,
                        }
                    };

                let argument = if takes_param {
                    match params.next() {
                        Some(param) => Some(param.clone()),
                        None => {
                            trace!(target = %target, mode = %mode, "MODE line missing parameter");
                            return events;
                        }
                    }
                } else {
                    None
                };

                events.push(ModeChangeEvent {
                    nick: line.nick.clone(),
                    ident: line.ident.clone(),
                    host: line.host.clone(),
                    source: line.src().to_string(),
                    tags: line.tags.clone(),
                    target: target.to_string(),
                    action,
                    mode,
                    argument,
                });
            }
        }
    }

    events
}

/// Mode-change dispatcher fed from a connection's `MODE` lines.
pub struct ModeTracker {
    dispatcher: Arc<Dispatcher<ModeChangeEvent>>,
    mode_handler: HandlerHandle,
}

impl ModeTracker {
    /// Subscribe to `MODE` on `conn`.
    pub fn register(conn: &Arc<Connection>) -> Arc<Self> {
        let dispatcher = Arc::new(Dispatcher::new());
        let isupport = Arc::clone(conn.isupport());

        let mode_dispatcher = Arc::clone(&dispatcher);
        let mode_handler = conn.handle_async("MODE", move |line: Arc<Line>| {
            let dispatcher = Arc::clone(&mode_dispatcher);
            let events = parse_mode_line(&line, &isupport);
            async move {
                for event in events {
                    let key = event.key();
                    let event = Arc::new(event);
                    dispatcher.dispatch(&key, Arc::clone(&event)).await;
                    dispatcher.dispatch(&ModeKey::Any, event).await;
                }
            }
        });

        Arc::new(Self {
            dispatcher,
            mode_handler,
        })
    }

    pub fn handle<F>(&self, key: ModeKey, f: F) -> HandlerHandle
    where
        F: Fn(&ModeChangeEvent) + Send + Sync + 'static,
    {
        self.dispatcher.handle(key, f)
    }

    pub fn handle_async<F, Fut>(&self, key: ModeKey, f: F) -> HandlerHandle
    where
        F: Fn(Arc<ModeChangeEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.dispatcher.handle_async(key, f)
    }

    pub fn handle_background<F, Fut>(&self, key: ModeKey, f: F) -> HandlerHandle
    where
        F: Fn(Arc<ModeChangeEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.dispatcher.handle_background(key, f)
    }

    /// Stop listening for `MODE` lines.
    pub fn detach(&self) -> bool {
        self.mode_handler.remove()
    }
}

/// The parts of a `nick!ident@host` mask.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Hostmask {
    pub nick: String,
    pub ident: String,
    pub host: String,
}

/// Split a hostmask; missing parts are left empty and the remainder is the host.
pub fn split_hostmask(mask: &str) -> Hostmask {
    let mut rest = mask;
    let mut parts = Hostmask::default();
    if let Some((nick, tail)) = rest.split_once('!') {
        parts.nick = nick.to_string();
        rest = tail;
    }
    if let Some((ident, tail)) = rest.split_once('@') {
        parts.ident = ident.to_string();
        rest = tail;
    }
    parts.host = rest.to_string();
    parts
}
