//! Subscriber registry and guarded snapshot delivery.
//!
//! Handlers are plain synchronous callbacks. Each invocation runs under
//! `catch_unwind`, so a panicking handler is logged and skipped while the
//! remaining handlers still receive the snapshot.

use crate::snapshot::Snapshot;
use livestate_types::{Schema, SubscriptionId};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// A snapshot consumer.
pub type Handler<S> = Arc<dyn Fn(Arc<Snapshot<S>>) + Send + Sync>;

/// Registered handlers in registration order.
pub struct SubscriberRegistry<S: Schema> {
    handlers: Vec<(SubscriptionId, Handler<S>)>,
}

impl<S: Schema> Default for SubscriberRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Schema> std::fmt::Debug for SubscriberRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl<S: Schema> SubscriberRegistry<S> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn register(&mut self, handler: Handler<S>) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.handlers.push((id, handler));
        id
    }

    /// Returns false if the id was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(registered, _)| *registered != id);
        self.handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Captures the current handlers for delivery of `snapshot`.
    pub fn publication(&self, snapshot: Arc<Snapshot<S>>) -> Publication<S> {
        Publication {
            snapshot,
            handlers: self.handlers.clone(),
        }
    }
}

/// A snapshot paired with the handlers that must see it.
///
/// Built while the engine state is locked and delivered after the lock is
/// released.
#[must_use = "a publication does nothing until delivered"]
pub struct Publication<S: Schema> {
    snapshot: Arc<Snapshot<S>>,
    handlers: Vec<(SubscriptionId, Handler<S>)>,
}

impl<S: Schema> Publication<S> {
    pub fn snapshot(&self) -> &Arc<Snapshot<S>> {
        &self.snapshot
    }

    /// Invokes every handler. Returns how many panicked.
    pub fn deliver(self) -> usize {
        self.handlers
            .iter()
            .filter(|(id, handler)| !invoke(*id, handler, &self.snapshot))
            .count()
    }
}

/// Runs one handler, containing any panic. Returns false if it panicked.
pub fn invoke<S: Schema>(id: SubscriptionId, handler: &Handler<S>, snapshot: &Arc<Snapshot<S>>) -> bool {
    let delivered = catch_unwind(AssertUnwindSafe(|| handler(Arc::clone(snapshot))));
    if delivered.is_err() {
        error!(
            "[{}] subscriber {} panicked on snapshot v{}",
            S::NAME,
            id,
            snapshot.version
        );
    }
    delivered.is_ok()
}
