//! One-shot request/response correlation.
//!
//! A query registers temporary handlers for the replies it expects, sends its
//! request and waits on a [`Request`]. Handlers fill a shared accumulator and
//! signal completion through [`Completion::complete`]; whichever handler fires
//! first wins and later signals are ignored. When the wait ends (completion or
//! timeout) every temporary handler is removed exactly once.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

use crate::dispatch::HandlerHandle;
use crate::error::RequestError;

/// Timeout for identity, ban-list and authentication-status queries.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for confirming our own JOIN.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// A completion signal that fires at most once.
pub struct Completion<T> {
    tx: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> Completion<T> {
    /// Deliver `value`. Returns `false` if the signal already fired.
    pub fn complete(&self, value: T) -> bool {
        match self.tx.lock().take() {
            Some(tx) => {
                // The waiter may have timed out already.
                let _ = tx.send(value);
                true
            }
            None => false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.tx.lock().is_none()
    }
}

/// Removes its handlers exactly once, on [`HandlerGuard::remove_all`] or drop.
#[derive(Debug, Default)]
pub struct HandlerGuard {
    handles: Vec<HandlerHandle>,
}

impl HandlerGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handle: HandlerHandle) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn remove_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.remove();
        }
    }
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        self.remove_all();
    }
}

/// An in-flight correlated request.
pub struct Request<T> {
    completion: Arc<Completion<T>>,
    rx: oneshot::Receiver<T>,
    guard: HandlerGuard,
}

impl<T> Default for Request<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Request<T> {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            completion: Arc::new(Completion {
                tx: Mutex::new(Some(tx)),
            }),
            rx,
            guard: HandlerGuard::new(),
        }
    }

    /// The completion signal to hand to reply handlers.
    pub fn completion(&self) -> Arc<Completion<T>> {
        Arc::clone(&self.completion)
    }

    /// Track a temporary handler so it is removed when the wait ends.
    pub fn track(&mut self, handle: HandlerHandle) {
        self.guard.push(handle);
    }

    /// Wait for completion, then remove every tracked handler.
    pub async fn wait(mut self, timeout: Duration) -> Result<T, RequestError> {
        let result = tokio::time::timeout(timeout, &mut self.rx).await;
        self.guard.remove_all();
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) | Err(_) => {
                trace!(timeout_secs = timeout.as_secs(), "Correlated request timed out");
                Err(RequestError::TimedOut)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Class, Dispatcher, Event};

    struct Reply(&'static str);

    impl Event for Reply {
        type Key = &'static str;
    }

    #[tokio::test]
    async fn test_first_completion_wins_and_handlers_removed() {
        let dispatcher = Dispatcher::<Reply>::new();
        let mut request = Request::<&'static str>::new();

        for key in ["318", "401"] {
            let done = request.completion();
            request.track(dispatcher.handle(key, move |r: &Reply| {
                done.complete(r.0);
            }));
        }

        dispatcher.dispatch(&"401", Arc::new(Reply("missing"))).await;
        dispatcher.dispatch(&"318", Arc::new(Reply("end"))).await;

        assert_eq!(request.wait(QUERY_TIMEOUT).await, Ok("missing"));
        assert_eq!(dispatcher.handler_count(Class::Foreground, &"318"), 0);
        assert_eq!(dispatcher.handler_count(Class::Foreground, &"401"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_handlers() {
        let dispatcher = Dispatcher::<Reply>::new();
        let mut request = Request::<()>::new();
        let done = request.completion();
        request.track(dispatcher.handle("318", move |_| {
            done.complete(());
        }));

        assert_eq!(request.wait(JOIN_TIMEOUT).await, Err(RequestError::TimedOut));
        assert_eq!(dispatcher.handler_count(Class::Foreground, &"318"), 0);
    }

    #[test]
    fn test_completion_fires_once() {
        let request = Request::<u8>::new();
        let done = request.completion();
        assert!(!done.is_done());
        assert!(done.complete(1));
        assert!(!done.complete(2));
        assert!(done.is_done());
    }
}
