//! Per-target ban storage with one expiry timer per entry.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, trace};

use super::ban::TemporaryBan;

/// Current on-disk export version.
pub const EXPORT_VERSION: u64 = 0;

/// Called with a ban whose timer fired. The ban is still stored; the handler
/// decides whether to remove or extend it.
pub type ExpiryHandler = Arc<dyn Fn(TemporaryBan) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("hostmask {0} is already banned")]
    AlreadyBanned(String),

    #[error("unsupported export version {0}")]
    UnsupportedVersion(u64),

    #[error("encoding failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("decoding failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Serialize, Deserialize)]
struct BanExport {
    bans: Vec<TemporaryBan>,
}

struct Timer {
    id: u64,
    cancel: oneshot::Sender<()>,
}

impl Timer {
    fn cancel(self) {
        // The task may have just fired.
        let _ = self.cancel.send(());
    }
}

#[derive(Default)]
struct StoreInner {
    bans: Vec<TemporaryBan>,
    timers: HashMap<String, Timer>,
}

/// Ordered collection of temporary bans for one target.
///
/// Hostmasks are unique. Unless expiry is disabled, each stored ban owns
/// exactly one pending timer, and removing the ban cancels it.
pub struct BanStore {
    inner: RwLock<StoreInner>,
    expiry: Option<ExpiryHandler>,
    next_timer: AtomicU64,
}

impl BanStore {
    pub fn new(expiry: ExpiryHandler) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(StoreInner::default()),
            expiry: Some(expiry),
            next_timer: AtomicU64::new(1),
        })
    }

    /// A store that never schedules expiry, for one-shot migration.
    pub fn without_expiry() -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(StoreInner::default()),
            expiry: None,
            next_timer: AtomicU64::new(1),
        })
    }

    pub fn expiry_disabled(&self) -> bool {
        self.expiry.is_none()
    }

    pub fn len(&self) -> usize {
        self.inner.read().bans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().bans.is_empty()
    }

    /// Number of pending expiry timers.
    pub fn pending_timers(&self) -> usize {
        self.inner.read().timers.len()
    }

    pub fn get(&self, hostmask: &str) -> Option<TemporaryBan> {
        self.inner
            .read()
            .bans
            .iter()
            .find(|b| b.hostmask == hostmask)
            .cloned()
    }

    pub fn get_all(&self) -> Vec<TemporaryBan> {
        self.inner.read().bans.clone()
    }

    /// Store a ban and schedule its expiry.
    pub fn add(self: &Arc<Self>, ban: TemporaryBan) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.bans.iter().any(|b| b.hostmask == ban.hostmask) {
            return Err(StoreError::AlreadyBanned(ban.hostmask));
        }
        self.arm(&mut inner, &ban);
        inner.bans.push(ban);
        Ok(())
    }

    /// Store a ban, replacing any existing ban on the same hostmask.
    pub fn replace(self: &Arc<Self>, ban: TemporaryBan) -> Option<TemporaryBan> {
        let mut inner = self.inner.write();
        let old = Self::remove_locked(&mut inner, &ban.hostmask);
        self.arm(&mut inner, &ban);
        inner.bans.push(ban);
        old
    }

    /// Remove a ban and cancel its timer. Returns the removed ban, or `None`
    /// if nothing was stored under `hostmask`.
    pub fn remove(&self, hostmask: &str) -> Option<TemporaryBan> {
        Self::remove_locked(&mut self.inner.write(), hostmask)
    }

    fn remove_locked(inner: &mut StoreInner, hostmask: &str) -> Option<TemporaryBan> {
        let index = inner.bans.iter().position(|b| b.hostmask == hostmask)?;
        if let Some(timer) = inner.timers.remove(hostmask) {
            timer.cancel();
        }
        Some(inner.bans.remove(index))
    }

    /// Move a stored ban's expiration and re-arm its timer.
    pub fn extend(self: &Arc<Self>, hostmask: &str, expiration: DateTime<Utc>) -> bool {
        self.extend_locked(&mut self.inner.write(), hostmask, expiration)
    }

    fn extend_locked(
        self: &Arc<Self>,
        inner: &mut StoreInner,
        hostmask: &str,
        expiration: DateTime<Utc>,
    ) -> bool {
        let Some(ban) = inner.bans.iter_mut().find(|b| b.hostmask == hostmask) else {
            return false;
        };
        ban.expiration_time = expiration;
        let ban = ban.clone();
        self.arm(inner, &ban);
        true
    }

    /// Whether `ban` is still the copy handed to the expiry handler: stored
    /// unchanged, with no newer timer armed for its hostmask.
    pub fn is_fired(&self, ban: &TemporaryBan) -> bool {
        Self::fired_locked(&self.inner.read(), ban)
    }

    fn fired_locked(inner: &StoreInner, ban: &TemporaryBan) -> bool {
        !inner.timers.contains_key(&ban.hostmask) && inner.bans.iter().any(|b| b == ban)
    }

    /// [`Self::remove`], but only while `ban` is the fired copy.
    pub fn remove_fired(&self, ban: &TemporaryBan) -> bool {
        let mut inner = self.inner.write();
        Self::fired_locked(&inner, ban) && Self::remove_locked(&mut inner, &ban.hostmask).is_some()
    }

    /// [`Self::extend`], but only while `ban` is the fired copy.
    pub fn extend_fired(self: &Arc<Self>, ban: &TemporaryBan, expiration: DateTime<Utc>) -> bool {
        let mut inner = self.inner.write();
        Self::fired_locked(&inner, ban) && self.extend_locked(&mut inner, &ban.hostmask, expiration)
    }

    fn arm(self: &Arc<Self>, inner: &mut StoreInner, ban: &TemporaryBan) {
        let Some(handler) = &self.expiry else {
            return;
        };

        let id = self.next_timer.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        if let Some(old) = inner
            .timers
            .insert(ban.hostmask.clone(), Timer { id, cancel: tx })
        {
            old.cancel();
        }

        let wait = ban.remaining().to_std().unwrap_or(Duration::ZERO);
        let store: Weak<Self> = Arc::downgrade(self);
        let hostmask = ban.hostmask.clone();
        let handler = Arc::clone(handler);
        trace!(hostmask = %hostmask, wait_secs = wait.as_secs(), "Expiry armed");

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = rx => return,
            }
            let Some(store) = store.upgrade() else {
                return;
            };
            let Some(ban) = store.take_fired(&hostmask, id) else {
                return;
            };
            debug!(hostmask = %ban.hostmask, "Temporary ban expired");
            handler(ban).await;
        });
    }

    /// Retire a fired timer, returning the still-stored ban if the timer was current.
    fn take_fired(&self, hostmask: &str, id: u64) -> Option<TemporaryBan> {
        let mut inner = self.inner.write();
        if inner.timers.get(hostmask).map(|t| t.id) != Some(id) {
            return None;
        }
        inner.timers.remove(hostmask);
        inner.bans.iter().find(|b| b.hostmask == hostmask).cloned()
    }

    /// Encode the version tag followed by the ban collection.
    pub fn export_to<W: Write>(&self, mut writer: W) -> Result<(), StoreError> {
        let inner = self.inner.read();
        rmp_serde::encode::write(&mut writer, &EXPORT_VERSION)?;
        rmp_serde::encode::write_named(
            &mut writer,
            &BanExport {
                bans: inner.bans.clone(),
            },
        )?;
        Ok(())
    }

    pub fn export(&self) -> Result<Vec<u8>, StoreError> {
        let mut buf = Vec::new();
        self.export_to(&mut buf)?;
        Ok(buf)
    }

    /// Replace the stored bans with an export, re-arming every timer.
    ///
    /// Returns the number of bans loaded.
    pub fn import_from<R: Read>(self: &Arc<Self>, reader: R) -> Result<usize, StoreError> {
        let mut de = rmp_serde::Deserializer::new(reader);
        let version = u64::deserialize(&mut de)?;
        if version != EXPORT_VERSION {
            return Err(StoreError::UnsupportedVersion(version));
        }
        let export = BanExport::deserialize(&mut de)?;

        let mut inner = self.inner.write();
        for (_, timer) in inner.timers.drain() {
            timer.cancel();
        }
        inner.bans.clear();

        for ban in export.bans {
            if inner.bans.iter().any(|b| b.hostmask == ban.hostmask) {
                continue;
            }
            self.arm(&mut inner, &ban);
            inner.bans.push(ban);
        }

        let count = inner.bans.len();
        info!(count, "Imported temporary bans");
        Ok(count)
    }

    pub fn import(self: &Arc<Self>, bytes: &[u8]) -> Result<usize, StoreError> {
        self.import_from(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::collections::BTreeSet;
    use std::sync::atomic::AtomicUsize;

    fn counting() -> (ExpiryHandler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        let handler: ExpiryHandler = Arc::new(move |_ban: TemporaryBan| {
            let count = Arc::clone(&inner);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        });
        (handler, count)
    }

    fn ban(mask: &str, hours: i64) -> TemporaryBan {
        TemporaryBan::new("", mask, "warden", "test", chrono::Duration::hours(hours))
    }

    #[tokio::test]
    async fn test_duplicate_hostmask_rejected() {
        let store = BanStore::without_expiry();
        store.add(ban("*!*@a", 1)).unwrap();
        assert!(matches!(
            store.add(ban("*!*@a", 2)),
            Err(StoreError::AlreadyBanned(mask)) if mask == "*!*@a"
        ));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_twice_cancels_once() {
        let (handler, fired) = counting();
        let store = BanStore::new(handler);
        store.add(ban("*!*@a", 1)).unwrap();
        assert_eq!(store.pending_timers(), 1);

        assert!(store.remove("*!*@a").is_some());
        assert!(store.remove("*!*@a").is_none());
        assert_eq!(store.pending_timers(), 0);

        tokio::time::sleep(Duration::from_secs(7200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_fires_once_and_keeps_entry() {
        let (handler, fired) = counting();
        let store = BanStore::new(handler);
        store.add(ban("*!*@a", 1)).unwrap();
        store.add(ban("*!*@b", 3)).unwrap();

        tokio::time::sleep(Duration::from_secs(3601)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.pending_timers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_rearms() {
        let (handler, fired) = counting();
        let store = BanStore::new(handler);
        store.add(ban("*!*@a", 1)).unwrap();
        assert!(store.extend("*!*@a", Utc::now() + chrono::Duration::hours(5)));
        assert_eq!(store.pending_timers(), 1);

        tokio::time::sleep(Duration::from_secs(3 * 3600)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(3 * 3600)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fired_copy_goes_stale_on_replace() {
        let fired_bans = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired_bans);
        let handler: ExpiryHandler = Arc::new(move |ban: TemporaryBan| {
            sink.lock().push(ban);
            async {}.boxed()
        });
        let store = BanStore::new(handler);
        store.add(ban("*!*@a", 1)).unwrap();

        tokio::time::sleep(Duration::from_secs(3601)).await;
        let fired = fired_bans.lock().pop().expect("timer fired");
        assert!(store.is_fired(&fired));

        let fresh = ban("*!*@a", 5);
        store.replace(fresh.clone());
        assert!(!store.is_fired(&fired));
        assert!(!store.remove_fired(&fired));
        assert!(!store.extend_fired(&fired, Utc::now()));
        assert_eq!(store.get("*!*@a"), Some(fresh));
        assert_eq!(store.pending_timers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_fired_drops_current_copy() {
        let fired_bans = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired_bans);
        let handler: ExpiryHandler = Arc::new(move |ban: TemporaryBan| {
            sink.lock().push(ban);
            async {}.boxed()
        });
        let store = BanStore::new(handler);
        store.add(ban("*!*@a", 1)).unwrap();

        tokio::time::sleep(Duration::from_secs(3601)).await;
        let fired = fired_bans.lock().pop().expect("timer fired");
        assert!(store.remove_fired(&fired));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_export_import_roundtrip() {
        let a = BanStore::without_expiry();
        a.add(ban("*!*@one", 1)).unwrap();
        a.add(ban("*!*@two", 2)).unwrap();

        let b = BanStore::without_expiry();
        b.add(ban("*!*@two", 2)).unwrap();
        b.add(ban("*!*@one", 1)).unwrap();

        let fresh = BanStore::without_expiry();
        assert_eq!(fresh.import(&a.export().unwrap()).unwrap(), 2);

        let masks = |s: &BanStore| -> BTreeSet<(String, DateTime<Utc>)> {
            s.get_all()
                .into_iter()
                .map(|b| (b.hostmask, b.expiration_time))
                .collect()
        };
        assert_eq!(masks(&fresh), masks(&a));
        assert_eq!(fresh.get_all(), a.get_all());

        let fresh_b = BanStore::without_expiry();
        fresh_b.import(&b.export().unwrap()).unwrap();
        assert_eq!(
            masks(&fresh_b).into_iter().map(|(m, _)| m).collect::<Vec<_>>(),
            vec!["*!*@one".to_string(), "*!*@two".to_string()]
        );
    }

    #[tokio::test]
    async fn test_import_rejects_unknown_version() {
        let mut bytes = Vec::new();
        rmp_serde::encode::write(&mut bytes, &7u64).unwrap();
        let store = BanStore::without_expiry();
        assert!(matches!(
            store.import(&bytes),
            Err(StoreError::UnsupportedVersion(7))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_import_arms_timers_unless_disabled() {
        let source = BanStore::without_expiry();
        source.add(ban("*!*@one", 1)).unwrap();
        let bytes = source.export().unwrap();

        let (handler, fired) = counting();
        let live = BanStore::new(handler);
        live.import(&bytes).unwrap();
        assert_eq!(live.pending_timers(), 1);

        let dump = BanStore::without_expiry();
        dump.import(&bytes).unwrap();
        assert_eq!(dump.pending_timers(), 0);

        tokio::time::sleep(Duration::from_secs(3601)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
