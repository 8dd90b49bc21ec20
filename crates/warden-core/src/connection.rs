//! The transport-facing collaborator.
//!
//! [`Connection`] does not own a socket. The transport feeds it parsed lines
//! through [`Connection::process`] (one at a time) and drains the outbound
//! queue returned by [`Connection::new`]. Everything above it registers
//! handlers keyed by verb or numeric and sends lines through it.

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::dispatch::{Dispatcher, Event, HandlerHandle};
use crate::isupport::Isupport;
use crate::line::Line;
use crate::numeric::{RPL_ISUPPORT, RPL_WELCOME};

impl Event for Line {
    type Key = String;
}

/// The server we are connected to, as used for naming persisted state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerIdentity {
    pub address: String,
    pub tls: bool,
}

impl ServerIdentity {
    pub fn new(address: impl Into<String>, tls: bool) -> Self {
        Self {
            address: address.into(),
            tls,
        }
    }
}

/// Shared connection state and handler registry.
pub struct Connection {
    identity: ServerIdentity,
    me: Arc<RwLock<String>>,
    isupport: Arc<Isupport>,
    dispatcher: Dispatcher<Line>,
    outbound: mpsc::UnboundedSender<Line>,
}

impl Connection {
    /// Create a connection for `nick` and the receiving end of its outbound queue.
    pub fn new(identity: ServerIdentity, nick: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<Line>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Self {
            identity,
            me: Arc::new(RwLock::new(nick.to_string())),
            isupport: Arc::new(Isupport::new()),
            dispatcher: Dispatcher::new(),
            outbound: tx,
        };
        conn.install_state_tracking();
        (Arc::new(conn), rx)
    }

    fn install_state_tracking(&self) {
        let me = Arc::clone(&self.me);
        self.dispatcher.handle_internal(RPL_WELCOME.to_string(), move |line: &Line| {
            if let Some(nick) = line.arg(0) {
                info!(nick = %nick, "Registered with server");
                *me.write() = nick.to_string();
            }
        });

        let me = Arc::clone(&self.me);
        self.dispatcher.handle_internal("NICK".to_string(), move |line: &Line| {
            let Some(new_nick) = line.arg(0) else {
                return;
            };
            let mut me = me.write();
            if line.nick.eq_ignore_ascii_case(&me) {
                debug!(old = %me.as_str(), new = %new_nick, "Own nick changed");
                *me = new_nick.to_string();
            }
        });

        let isupport = Arc::clone(&self.isupport);
        self.dispatcher.handle_internal(RPL_ISUPPORT.to_string(), move |line: &Line| {
            isupport.update_from_args(&line.args);
        });
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    /// Our current nick.
    pub fn me(&self) -> String {
        self.me.read().clone()
    }

    pub fn is_me(&self, nick: &str) -> bool {
        self.me.read().eq_ignore_ascii_case(nick)
    }

    pub fn isupport(&self) -> &Arc<Isupport> {
        &self.isupport
    }

    /// Dispatch one inbound line to every handler registered for its verb.
    ///
    /// Callers must await each call before processing the next line.
    pub async fn process(&self, line: Line) {
        let key = line.command.clone();
        self.dispatcher.dispatch(&key, Arc::new(line)).await;
    }

    pub fn handle<F>(&self, verb: &str, f: F) -> HandlerHandle
    where
        F: Fn(&Line) + Send + Sync + 'static,
    {
        self.dispatcher.handle(verb.to_ascii_uppercase(), f)
    }

    pub fn handle_async<F, Fut>(&self, verb: &str, f: F) -> HandlerHandle
    where
        F: Fn(Arc<Line>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.dispatcher.handle_async(verb.to_ascii_uppercase(), f)
    }

    pub fn handle_background<F, Fut>(&self, verb: &str, f: F) -> HandlerHandle
    where
        F: Fn(Arc<Line>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.dispatcher.handle_background(verb.to_ascii_uppercase(), f)
    }

    /// Register a state-tracking handler that runs before all others.
    pub fn handle_internal<F>(&self, verb: &str, f: F) -> HandlerHandle
    where
        F: Fn(&Line) + Send + Sync + 'static,
    {
        self.dispatcher.handle_internal(verb.to_ascii_uppercase(), f)
    }

    /// Queue one outbound line.
    pub fn send(&self, line: Line) {
        if self.outbound.send(line).is_err() {
            debug!("Outbound queue closed, dropping line");
        }
    }

    pub fn send_line<I, S>(&self, command: &str, args: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.send(Line::new(command, args));
    }

    pub fn privmsg(&self, target: &str, text: &str) {
        self.send_line("PRIVMSG", [target, text]);
    }

    pub fn notice(&self, target: &str, text: &str) {
        self.send_line("NOTICE", [target, text]);
    }

    pub fn join(&self, channels: &str) {
        self.send_line("JOIN", [channels]);
    }

    pub fn kick(&self, channel: &str, nick: &str, reason: &str) {
        self.send_line("KICK", [channel, nick, reason]);
    }

    /// Send `MODE <target> <modes> [args...]`.
    pub fn mode<S: AsRef<str>>(&self, target: &str, modes: &str, args: &[S]) {
        let mut params = vec![target.to_string(), modes.to_string()];
        params.extend(args.iter().map(|a| a.as_ref().to_string()));
        self.send_line("MODE", params);
    }

    pub fn whois(&self, nick: &str) {
        self.send_line("WHOIS", [nick]);
    }

    pub fn quit(&self, reason: &str) {
        self.send_line("QUIT", [reason]);
    }
}
