//! Event dispatch substrate.
//!
//! A [`Dispatcher`] owns three handler registries for one event type:
//!
//! - **internal**: state-tracking handlers, run sequentially before anything else;
//! - **foreground**: run concurrently with each other, and [`Dispatcher::dispatch`]
//!   waits for all of them before returning;
//! - **background**: spawned onto the runtime and never awaited.
//!
//! Because `dispatch` only returns once every foreground handler finished, a
//! caller that awaits each dispatch in turn gets the ordering guarantee that
//! all foreground handlers of event N complete before any handler of N+1 starts.
//!
//! Handlers are stored per key in an ordered map indexed by a monotonically
//! increasing registration id, so registration order is preserved and removal
//! does not need to walk the list.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use tracing::trace;

/// An event type that can flow through a [`Dispatcher`].
pub trait Event: Send + Sync + 'static {
    /// The key handlers subscribe to.
    type Key: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static;
}

/// A subscriber for events of type `E`.
#[async_trait]
pub trait Handler<E: Event>: Send + Sync {
    async fn handle(&self, event: Arc<E>);
}

/// Adapts a synchronous closure into a [`Handler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<E, F> Handler<E> for FnHandler<F>
where
    E: Event,
    F: Fn(&E) + Send + Sync,
{
    async fn handle(&self, event: Arc<E>) {
        (self.0)(&event)
    }
}

/// Adapts an async closure into a [`Handler`].
pub struct AsyncFnHandler<F>(pub F);

#[async_trait]
impl<E, F, Fut> Handler<E> for AsyncFnHandler<F>
where
    E: Event,
    F: Fn(Arc<E>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn handle(&self, event: Arc<E>) {
        (self.0)(event).await
    }
}

/// Which registry a handler lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Class {
    Internal,
    Foreground,
    Background,
}

type HandlerList<E> = BTreeMap<u64, Arc<dyn Handler<E>>>;

/// One named-handler registry.
struct HandlerSet<E: Event> {
    lists: RwLock<HashMap<E::Key, HandlerList<E>>>,
}

impl<E: Event> HandlerSet<E> {
    fn new() -> Self {
        Self {
            lists: RwLock::new(HashMap::new()),
        }
    }

    fn add(&self, key: E::Key, id: u64, handler: Arc<dyn Handler<E>>) {
        self.lists.write().entry(key).or_default().insert(id, handler);
    }

    fn remove(&self, key: &E::Key, id: u64) -> bool {
        let mut lists = self.lists.write();
        let Some(list) = lists.get_mut(key) else {
            return false;
        };
        let removed = list.remove(&id).is_some();
        if list.is_empty() {
            lists.remove(key);
        }
        removed
    }

    /// Snapshot the handlers for `key` in registration order.
    ///
    /// The read lock is held only while cloning, so handlers may register or
    /// remove handlers (including themselves) while running.
    fn snapshot(&self, key: &E::Key) -> Vec<Arc<dyn Handler<E>>> {
        self.lists
            .read()
            .get(key)
            .map(|list| list.values().cloned().collect())
            .unwrap_or_default()
    }

    fn count(&self, key: &E::Key) -> usize {
        self.lists.read().get(key).map_or(0, BTreeMap::len)
    }
}

type Remover = Box<dyn FnOnce() -> bool + Send>;

/// A live subscription.
///
/// Dropping the handle leaves the handler registered; call
/// [`HandlerHandle::remove`] to detach it. Removal is idempotent.
pub struct HandlerHandle {
    id: u64,
    remover: Mutex<Option<Remover>>,
}

impl HandlerHandle {
    /// Registration id, unique per dispatcher.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Detach the handler.
    ///
    /// Returns `true` if this call removed it, `false` if it was already
    /// removed or its dispatcher is gone.
    pub fn remove(&self) -> bool {
        match self.remover.lock().take() {
            Some(remover) => remover(),
            None => false,
        }
    }
}

impl fmt::Debug for HandlerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerHandle")
            .field("id", &self.id)
            .field("live", &self.remover.lock().is_some())
            .finish()
    }
}

/// Internal, foreground and background registries for one event type.
pub struct Dispatcher<E: Event> {
    internal: Arc<HandlerSet<E>>,
    foreground: Arc<HandlerSet<E>>,
    background: Arc<HandlerSet<E>>,
    next_id: AtomicU64,
}

impl<E: Event> Default for Dispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> Dispatcher<E> {
    pub fn new() -> Self {
        Self {
            internal: Arc::new(HandlerSet::new()),
            foreground: Arc::new(HandlerSet::new()),
            background: Arc::new(HandlerSet::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn set(&self, class: Class) -> &Arc<HandlerSet<E>> {
        match class {
            Class::Internal => &self.internal,
            Class::Foreground => &self.foreground,
            Class::Background => &self.background,
        }
    }

    /// Register a handler in the given registry.
    pub fn register(
        &self,
        class: Class,
        key: E::Key,
        handler: Arc<dyn Handler<E>>,
    ) -> HandlerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let set = self.set(class);
        set.add(key.clone(), id, handler);

        let weak: Weak<HandlerSet<E>> = Arc::downgrade(set);
        let remover: Remover = Box::new(move || match weak.upgrade() {
            Some(set) => set.remove(&key, id),
            None => false,
        });
        HandlerHandle {
            id,
            remover: Mutex::new(Some(remover)),
        }
    }

    /// Register a synchronous foreground handler.
    pub fn handle<F>(&self, key: E::Key, f: F) -> HandlerHandle
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(Class::Foreground, key, Arc::new(FnHandler(f)))
    }

    /// Register an async foreground handler.
    pub fn handle_async<F, Fut>(&self, key: E::Key, f: F) -> HandlerHandle
    where
        F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(Class::Foreground, key, Arc::new(AsyncFnHandler(f)))
    }

    /// Register a background handler; it runs detached from dispatch.
    pub fn handle_background<F, Fut>(&self, key: E::Key, f: F) -> HandlerHandle
    where
        F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(Class::Background, key, Arc::new(AsyncFnHandler(f)))
    }

    /// Register a state-tracking handler that runs before all others.
    pub fn handle_internal<F>(&self, key: E::Key, f: F) -> HandlerHandle
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(Class::Internal, key, Arc::new(FnHandler(f)))
    }

    /// Number of handlers registered for `key` in one registry.
    pub fn handler_count(&self, class: Class, key: &E::Key) -> usize {
        self.set(class).count(key)
    }

    /// Deliver `event` to every handler registered for `key`.
    pub async fn dispatch(&self, key: &E::Key, event: Arc<E>) {
        trace!(key = ?key, "dispatch");

        for handler in self.internal.snapshot(key) {
            handler.handle(Arc::clone(&event)).await;
        }

        for handler in self.background.snapshot(key) {
            let event = Arc::clone(&event);
            tokio::spawn(async move { handler.handle(event).await });
        }

        let foreground = self.foreground.snapshot(key);
        if !foreground.is_empty() {
            join_all(
                foreground
                    .iter()
                    .map(|handler| handler.handle(Arc::clone(&event))),
            )
            .await;
        }
    }
}
