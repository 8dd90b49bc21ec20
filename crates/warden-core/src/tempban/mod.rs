//! Temporary bans: per-channel stores, expiry, persistence and server sync.
//!
//! # Applying bans
//!
//! [`TempBanManager::ban`] sends a `-b+b` toggle per ban through a
//! [`ModeChangeBuffer`], which makes the server echo an authoritative `+b` even
//! when the mask was already set. Replies carry no correlation token, so:
//!
//! - a `+b` echo from us is matched to the pending ban with the same mask, or
//!   failing that to the oldest pending ban;
//! - `482`, and a `478` naming a mask we did not send, apply to every
//!   pending ban in the oldest outbound line that still has a pending ban;
//!   a `478` naming one of our masks only fails that ban.
//!
//! Calls for the same channel are serialized (single-flight), as is the
//! expiry toggle, so two callers never share one reply stream. Within a single
//! call, an error reply for a line holding several bans fails all of them,
//! even if the server only rejected one.
//!
//! # Expiry
//!
//! When a ban's timer fires the manager takes the channel's single-flight
//! lock, checks the stored ban is still the one that fired, then sends
//! `+b-b <mask> <mask>` and waits for a `-b` of that mask. On `482` or
//! timeout the ban is kept and re-armed [`EXPIRY_RETRY`] in the future so an
//! operator can grant privileges. A ban replaced while the expiry waited is
//! left to its own timer.

mod ban;
mod store;

pub use ban::{TemporaryBan, humanize};
pub use store::{BanStore, EXPORT_VERSION, ExpiryHandler, StoreError};

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures_util::FutureExt;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::banlist::list_bans;
use crate::connection::Connection;
use crate::correlator::{QUERY_TIMEOUT, Request};
use crate::dispatch::HandlerHandle;
use crate::error::RequestError;
use crate::line::Line;
use crate::mode::{ModeKey, ModeTracker};
use crate::modebuf::ModeChangeBuffer;
use crate::numeric::{ERR_BANLISTFULL, ERR_CHANOPRIVSNEEDED};
use crate::pattern::{Pattern, matches_any};

/// Delay before retrying an expired ban we could not remove.
pub const EXPIRY_RETRY: Duration = Duration::from_secs(60);

/// Lifetime given to adopted server bans, counted from when they were set.
pub const MIGRATED_BAN_LIFETIME: Duration = Duration::from_secs(48 * 3600);

pub const MIGRATED_BAN_REASON: &str = "Migrated old ban";

/// Outcome of applying one ban.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BanError {
    #[error("not a channel")]
    NotAChannel,

    #[error("missing channel operator privileges")]
    NoPrivileges,

    #[error("the ban list is full")]
    BanListFull,

    #[error("timed out waiting for the server")]
    TimedOut,

    #[error(transparent)]
    Request(#[from] RequestError),
}

impl BanError {
    /// Get a static error code string for log labeling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotAChannel => "not_a_channel",
            Self::NoPrivileges => "no_privileges",
            Self::BanListFull => "ban_list_full",
            Self::TimedOut => "timed_out",
            Self::Request(e) => e.error_code(),
        }
    }
}

/// Reports `(channel, adopted count, error)` after a dump.
pub type DumpCallback = Arc<dyn Fn(&str, usize, Option<&BanError>) + Send + Sync>;

#[derive(Clone, Debug, Default)]
pub struct TempBanOptions {
    /// Directory holding the `target_<hash>.tempban` files.
    pub data_dir: PathBuf,
    /// Server bans set from any of these masks are adopted on join.
    pub old_hostmasks: Vec<Pattern>,
}

struct Target {
    name: String,
    store: Arc<BanStore>,
    single_flight: tokio::sync::Mutex<()>,
    save_lock: tokio::sync::Mutex<()>,
}

/// Positional reply bookkeeping for one [`TempBanManager::ban`] call.
struct Pending {
    hostmasks: Vec<String>,
    /// Indices of the bans with entries in each outbound line, oldest first.
    lines: Vec<Vec<usize>>,
    results: Vec<Option<Result<(), BanError>>>,
    unresolved: usize,
}

impl Pending {
    fn new(hostmasks: Vec<String>, modes_per_line: usize) -> Self {
        // Each ban contributes a `-b` and a `+b` entry.
        let entries: Vec<usize> = (0..hostmasks.len()).flat_map(|i| [i, i]).collect();
        let lines = entries
            .chunks(modes_per_line.max(1))
            .map(|chunk| {
                let mut line = chunk.to_vec();
                line.dedup();
                line
            })
            .collect();
        Self {
            unresolved: hostmasks.len(),
            results: vec![None; hostmasks.len()],
            hostmasks,
            lines,
        }
    }

    fn resolve(&mut self, index: usize, result: Result<(), BanError>) {
        if self.results[index].is_none() {
            self.results[index] = Some(result);
            self.unresolved -= 1;
        }
    }

    fn find_unresolved(&self, mask: &str) -> Option<usize> {
        (0..self.hostmasks.len())
            .find(|&i| self.results[i].is_none() && self.hostmasks[i].eq_ignore_ascii_case(mask))
    }

    fn confirm(&mut self, mask: &str) {
        let index = self
            .find_unresolved(mask)
            .or_else(|| self.results.iter().position(Option::is_none));
        if let Some(index) = index {
            self.resolve(index, Ok(()));
        }
    }

    fn fail(&mut self, mask: Option<&str>, error: BanError) {
        if let Some(mask) = mask.filter(|m| self.hostmasks.iter().any(|h| h.eq_ignore_ascii_case(m))) {
            // A named mask only ever fails its own ban.
            if let Some(index) = self.find_unresolved(mask) {
                self.resolve(index, Err(error));
            }
            return;
        }
        let line = self
            .lines
            .iter()
            .find(|line| line.iter().any(|&i| self.results[i].is_none()))
            .cloned()
            .unwrap_or_default();
        for index in line {
            self.resolve(index, Err(error.clone()));
        }
    }
}

/// Owns every channel's [`BanStore`] and keeps them in sync with the server.
pub struct TempBanManager {
    conn: Arc<Connection>,
    modes: Arc<ModeTracker>,
    options: TempBanOptions,
    dump: Option<DumpCallback>,
    targets: DashMap<String, Arc<Target>>,
    handles: Mutex<Vec<HandlerHandle>>,
    this: Weak<Self>,
}

impl TempBanManager {
    fn build(
        conn: &Arc<Connection>,
        modes: &Arc<ModeTracker>,
        options: TempBanOptions,
        dump: Option<DumpCallback>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            conn: Arc::clone(conn),
            modes: Arc::clone(modes),
            options,
            dump,
            targets: DashMap::new(),
            handles: Mutex::new(Vec::new()),
            this: this.clone(),
        })
    }

    /// Manage temporary bans: load on join, adopt our old server bans, expire
    /// bans and forget bans other users lift.
    pub fn register(
        conn: &Arc<Connection>,
        modes: &Arc<ModeTracker>,
        options: TempBanOptions,
    ) -> Arc<Self> {
        let manager = Self::build(conn, modes, options, None);
        let mut handles = Vec::new();

        let this = manager.this.clone();
        handles.push(modes.handle_async(ModeKey::removed('b'), move |e| {
            let this = this.clone();
            async move {
                let Some(manager) = this.upgrade() else {
                    return;
                };
                // Our own removals belong to the expiry path.
                if manager.conn.is_me(&e.nick) || !manager.conn.isupport().is_channel(&e.target) {
                    return;
                }
                let Some(mask) = e.argument.as_deref() else {
                    return;
                };
                if let Some(ban) = manager.target(&e.target).store.remove(mask) {
                    debug!(channel = %e.target, by = %e.nick, hostmask = %ban.hostmask, "Temporary ban lifted");
                    manager.sync(&e.target).await;
                }
            }
        }));

        handles.push(manager.handle_own_join());
        *manager.handles.lock() = handles;
        manager
    }

    /// One-shot migration mode: expiry is disabled, and every joined channel
    /// has its server bans adopted, saved and reported through `on_dumped`.
    pub fn register_dump<F>(
        conn: &Arc<Connection>,
        modes: &Arc<ModeTracker>,
        options: TempBanOptions,
        on_dumped: F,
    ) -> Arc<Self>
    where
        F: Fn(&str, usize, Option<&BanError>) + Send + Sync + 'static,
    {
        let manager = Self::build(conn, modes, options, Some(Arc::new(on_dumped)));
        let handle = manager.handle_own_join();
        manager.handles.lock().push(handle);
        manager
    }

    fn handle_own_join(&self) -> HandlerHandle {
        let this = self.this.clone();
        self.conn.handle_background("JOIN", move |line: Arc<Line>| {
            let this = this.clone();
            async move {
                let Some(manager) = this.upgrade() else {
                    return;
                };
                if !manager.conn.is_me(&line.nick) {
                    return;
                }
                let channel = line.target().to_string();
                if let Err(e) = manager.load(&channel).await {
                    warn!(channel = %channel, error = %e, "Could not load temporary bans");
                }

                let result = manager.adopt_server_bans(&channel).await;
                match (&manager.dump, &result) {
                    (Some(report), Ok(count)) => report(&channel, *count, None),
                    (Some(report), Err(e)) => report(&channel, 0, Some(e)),
                    (None, Ok(0)) => {}
                    (None, Ok(count)) => info!(channel = %channel, count, "Migrated old bans"),
                    (None, Err(e)) => warn!(
                        channel = %channel,
                        error = %e,
                        "Could not fetch ban list, old bans won't get handled"
                    ),
                }
            }
        })
    }

    /// Remove every handler this manager registered.
    pub fn detach(&self) {
        for handle in self.handles.lock().drain(..) {
            handle.remove();
        }
    }

    pub fn options(&self) -> &TempBanOptions {
        &self.options
    }

    fn target(&self, name: &str) -> Arc<Target> {
        let key = name.to_ascii_lowercase();
        if let Some(target) = self.targets.get(&key) {
            return Arc::clone(&target);
        }

        let store = match self.dump {
            Some(_) => BanStore::without_expiry(),
            None => BanStore::new(self.expiry_handler(name)),
        };
        let entry = self.targets.entry(key).or_insert_with(|| {
            Arc::new(Target {
                name: name.to_string(),
                store,
                single_flight: tokio::sync::Mutex::new(()),
                save_lock: tokio::sync::Mutex::new(()),
            })
        });
        Arc::clone(&entry)
    }

    fn expiry_handler(&self, channel: &str) -> ExpiryHandler {
        let this = self.this.clone();
        let channel = channel.to_string();
        Arc::new(move |ban: TemporaryBan| {
            let this = this.clone();
            let channel = channel.clone();
            async move {
                if let Some(manager) = this.upgrade() {
                    manager.expire(&channel, ban).await;
                }
            }
            .boxed()
        })
    }

    /// The store for `channel`, created on first use.
    pub fn store(&self, channel: &str) -> Arc<BanStore> {
        Arc::clone(&self.target(channel).store)
    }

    pub fn bans(&self, channel: &str) -> Vec<TemporaryBan> {
        self.target(channel).store.get_all()
    }

    /// Persistence file for `channel` on the current server.
    pub fn file_path(&self, channel: &str) -> PathBuf {
        let identity = self.conn.identity();
        let mut hasher = Sha256::new();
        hasher.update(identity.address.as_bytes());
        hasher.update([u8::from(identity.tls)]);
        hasher.update(channel.to_ascii_lowercase().as_bytes());
        let digest: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        self.options.data_dir.join(format!("target_{}.tempban", digest))
    }

    /// Load `channel`'s bans from disk. A missing file is not an error.
    pub async fn load(&self, channel: &str) -> Result<usize, StoreError> {
        let path = self.file_path(channel);
        debug!(channel = %channel, path = %path.display(), "Loading temporary bans");
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        self.target(channel).store.import(&bytes)
    }

    /// Write `channel`'s bans to disk.
    pub async fn save(&self, channel: &str) -> Result<(), StoreError> {
        let target = self.target(channel);
        let _guard = target.save_lock.lock().await;
        let bytes = target.store.export()?;
        let path = self.file_path(channel);
        tokio::fs::create_dir_all(&self.options.data_dir).await?;
        let tmp = path.with_extension("tempban.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(channel = %target.name, path = %path.display(), count = target.store.len(), "Saved temporary bans");
        Ok(())
    }

    /// Save, logging instead of failing; memory stays authoritative.
    async fn sync(&self, channel: &str) {
        if let Err(e) = self.save(channel).await {
            warn!(channel = %channel, error = %e, "Could not save temporary bans");
        }
    }

    /// Drop a stored ban without touching the server, e.g. after we lifted it
    /// ourselves. Returns whether a ban was stored under `hostmask`.
    pub async fn forget(&self, channel: &str, hostmask: &str) -> bool {
        if self.target(channel).store.remove(hostmask).is_none() {
            return false;
        }
        self.sync(channel).await;
        true
    }

    /// Apply `bans` to `channel`, returning one result per ban in order.
    ///
    /// Waits for server replies, so it must not be awaited from a foreground
    /// handler of the connection it uses.
    pub async fn ban(&self, channel: &str, bans: &[TemporaryBan]) -> Vec<Result<(), BanError>> {
        if !self.conn.isupport().is_channel(channel) {
            return vec![Err(BanError::NotAChannel); bans.len()];
        }
        if bans.is_empty() {
            return Vec::new();
        }

        let target = self.target(channel);
        let _flight = target.single_flight.lock().await;

        let buffer = ModeChangeBuffer::for_connection(&self.conn);
        let pending = Arc::new(Mutex::new(Pending::new(
            bans.iter().map(|b| b.hostmask.clone()).collect(),
            buffer.max_modes(),
        )));
        let mut request = Request::<()>::new();

        for (code, error) in [
            (ERR_CHANOPRIVSNEEDED, BanError::NoPrivileges),
            (ERR_BANLISTFULL, BanError::BanListFull),
        ] {
            let (conn, pending, done) =
                (Arc::clone(&self.conn), Arc::clone(&pending), request.completion());
            let channel = channel.to_string();
            request.track(self.conn.handle(code, move |line: &Line| {
                let ours = line.arg(0).is_some_and(|me| conn.is_me(me))
                    && line.arg(1).is_some_and(|c| c.eq_ignore_ascii_case(&channel));
                if !ours {
                    return;
                }
                // 478 names the rejected mask; 482 does not.
                let mask = if line.args.len() > 3 { line.arg(2) } else { None };
                let mut pending = pending.lock();
                pending.fail(mask, error.clone());
                if pending.unresolved == 0 {
                    done.complete(());
                }
            }));
        }

        {
            let (conn, pending, done) =
                (Arc::clone(&self.conn), Arc::clone(&pending), request.completion());
            let channel = channel.to_string();
            request.track(self.modes.handle(ModeKey::added('b'), move |e| {
                if !e.target.eq_ignore_ascii_case(&channel) || !conn.is_me(&e.nick) {
                    return;
                }
                let mut pending = pending.lock();
                pending.confirm(e.argument.as_deref().unwrap_or_default());
                if pending.unresolved == 0 {
                    done.complete(());
                }
            }));
        }

        for ban in bans {
            buffer.append(channel, "-b", &[&ban.hostmask]);
            buffer.append(channel, "+b", &[&ban.hostmask]);
        }
        buffer.flush();

        if request.wait(QUERY_TIMEOUT).await.is_err() {
            warn!(channel = %channel, "Timed out waiting for ban confirmations");
        }

        let results: Vec<Result<(), BanError>> = std::mem::take(&mut pending.lock().results)
            .into_iter()
            .map(|r| r.unwrap_or(Err(BanError::TimedOut)))
            .collect();

        let mut applied = 0;
        for (ban, result) in bans.iter().zip(&results) {
            match result {
                Ok(()) => {
                    if target.store.replace(ban.clone()).is_some() {
                        debug!(channel = %channel, hostmask = %ban.hostmask, "Replaced existing temporary ban");
                    }
                    applied += 1;
                }
                Err(e) => warn!(
                    channel = %channel,
                    hostmask = %ban.hostmask,
                    error = %e,
                    code = e.error_code(),
                    "Could not apply ban"
                ),
            }
        }
        if applied > 0 {
            info!(channel = %channel, applied, "Applied temporary bans");
            self.sync(channel).await;
        }

        results
    }

    /// [`Self::ban`], then kick each banned nick with a reason naming the expiry.
    pub async fn kickban(&self, channel: &str, bans: &[TemporaryBan]) -> Vec<Result<(), BanError>> {
        let results = self.ban(channel, bans).await;
        let now = Utc::now();
        for (ban, result) in bans.iter().zip(&results) {
            if ban.nick.is_empty() || matches!(result, Err(BanError::NotAChannel)) {
                continue;
            }
            let reason = match result {
                Ok(()) => format!(
                    "Banned until {} ({})",
                    humanize(ban.expiration_time, now),
                    ban.reason
                ),
                Err(_) => ban.reason.clone(),
            };
            self.conn.kick(channel, &ban.nick, &reason);
        }
        results
    }

    /// Lift an expired ban on the server, or push it back on failure.
    async fn expire(&self, channel: &str, ban: TemporaryBan) {
        let target = self.target(channel);
        let flight = target.single_flight.lock().await;
        // A ban() of the same mask may have replaced it while we waited.
        if !target.store.is_fired(&ban) {
            debug!(channel = %channel, hostmask = %ban.hostmask, "Expired ban was replaced, leaving it");
            return;
        }

        let mut request = Request::<Result<(), BanError>>::new();
        {
            let (conn, done) = (Arc::clone(&self.conn), request.completion());
            let channel = channel.to_string();
            request.track(self.conn.handle(ERR_CHANOPRIVSNEEDED, move |line: &Line| {
                if line.arg(0).is_some_and(|me| conn.is_me(me))
                    && line.arg(1).is_some_and(|c| c.eq_ignore_ascii_case(&channel))
                {
                    done.complete(Err(BanError::NoPrivileges));
                }
            }));
        }
        {
            let done = request.completion();
            let (channel, mask) = (channel.to_string(), ban.hostmask.clone());
            request.track(self.modes.handle(ModeKey::removed('b'), move |e| {
                let lifted = e.argument.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(&mask));
                if lifted && e.target.eq_ignore_ascii_case(&channel) {
                    done.complete(Ok(()));
                }
            }));
        }

        // +b-b always produces a -b echo when we hold privileges.
        self.conn
            .mode(channel, "+b-b", &[&ban.hostmask, &ban.hostmask]);

        let outcome = match request.wait(QUERY_TIMEOUT).await {
            Ok(outcome) => outcome,
            Err(_) => Err(BanError::TimedOut),
        };

        match outcome {
            Ok(()) => {
                if target.store.remove_fired(&ban) {
                    info!(channel = %channel, hostmask = %ban.hostmask, "Removed expired ban");
                }
            }
            Err(e) => {
                let retry = chrono::Duration::from_std(EXPIRY_RETRY).unwrap_or_default();
                warn!(
                    channel = %channel,
                    hostmask = %ban.hostmask,
                    error = %e,
                    "Could not remove expired ban, extending by a minute"
                );
                target.store.extend_fired(&ban, Utc::now() + retry);
            }
        }
        drop(flight);
        self.sync(channel).await;
    }

    /// Adopt bans on the server that we set earlier (by our nick or one of
    /// the configured old hostmasks) but are not tracking yet.
    pub async fn adopt_server_bans(&self, channel: &str) -> Result<usize, BanError> {
        let entries = list_bans(&self.conn, channel).await?;
        let store = self.store(channel);
        let lifetime = chrono::Duration::from_std(MIGRATED_BAN_LIFETIME).unwrap_or_default();

        let mut adopted = 0;
        for entry in entries {
            let ours = self.conn.is_me(&entry.nick)
                || matches_any(&self.options.old_hostmasks, &entry.source);
            if !ours || store.get(&entry.hostmask).is_some() {
                continue;
            }

            let set_at = entry.timestamp.unwrap_or_else(Utc::now);
            let ban = TemporaryBan {
                nick: entry.nick,
                hostmask: entry.hostmask,
                source: entry.source,
                reason: MIGRATED_BAN_REASON.to_string(),
                ban_time: set_at,
                expiration_time: set_at + lifetime,
            };
            match store.add(ban) {
                Ok(()) => adopted += 1,
                Err(e) => warn!(channel = %channel, error = %e, "Could not migrate ban"),
            }
        }

        if adopted > 0 || self.dump.is_some() {
            self.sync(channel).await;
        }
        Ok(adopted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_lines_follow_mode_limit() {
        let masks = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(
            Pending::new(masks.clone(), 1).lines,
            vec![vec![0], vec![0], vec![1], vec![1], vec![2], vec![2]]
        );
        assert_eq!(
            Pending::new(masks.clone(), 4).lines,
            vec![vec![0, 1], vec![2]]
        );
        assert_eq!(Pending::new(masks, 3).lines, vec![vec![0, 1], vec![1, 2]]);
    }

    #[test]
    fn test_pending_error_hits_oldest_line() {
        let masks = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut pending = Pending::new(masks, 4);
        pending.fail(None, BanError::NoPrivileges);
        assert_eq!(pending.results[0], Some(Err(BanError::NoPrivileges)));
        assert_eq!(pending.results[1], Some(Err(BanError::NoPrivileges)));
        assert_eq!(pending.results[2], None);
        assert_eq!(pending.unresolved, 1);
    }

    #[test]
    fn test_pending_single_mode_lines_pair_up() {
        // Without privileges every line draws a 482, two per ban.
        let masks = vec!["a".to_string(), "b".to_string()];
        let mut pending = Pending::new(masks, 1);
        for _ in 0..4 {
            pending.fail(None, BanError::NoPrivileges);
        }
        assert_eq!(pending.unresolved, 0);
        assert!(pending.results.iter().all(|r| *r == Some(Err(BanError::NoPrivileges))));
    }

    #[test]
    fn test_pending_confirm_prefers_mask() {
        let masks = vec!["*!*@a".to_string(), "*!*@b".to_string()];
        let mut pending = Pending::new(masks, 1);
        pending.confirm("*!*@B");
        assert_eq!(pending.results[1], Some(Ok(())));
        pending.confirm("normalized!*@*");
        assert_eq!(pending.results[0], Some(Ok(())));
        pending.fail(Some("*!*@a"), BanError::BanListFull);
        assert_eq!(pending.results[0], Some(Ok(())));
    }

    #[test]
    fn test_pending_named_error_spares_other_bans() {
        let masks = vec!["*!*@a".to_string(), "*!*@b".to_string()];
        let mut pending = Pending::new(masks, 4);
        pending.confirm("*!*@a");
        pending.fail(Some("*!*@A"), BanError::BanListFull);
        assert_eq!(pending.results[0], Some(Ok(())));
        assert_eq!(pending.results[1], None);
        assert_eq!(pending.unresolved, 1);
    }
}
