//! The synchronous heart of an engine.
//!
//! [`SyncCore`] owns the buffer, store, eviction policy and subscriber
//! registry and performs every state mutation without awaiting. Time comes
//! from an injected [`Clock`]. Operations that commit return a
//! [`Publication`] which the caller delivers once it has released whatever
//! lock guards the core.

use crate::buffer::UpdateBuffer;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::DecodeError;
use crate::eviction::EvictionPolicy;
use crate::merger::merge;
use crate::protocol::{decode, BatchUpdate, Envelope, ResetState, Update};
use crate::snapshot::Snapshot;
use crate::store::StateStore;
use crate::subscribers::{Handler, Publication, SubscriberRegistry};
use livestate_types::{Schema, SubscriptionId, Timestamp};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Running counters for one engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub frames_received: u64,
    pub decode_errors: u64,
    pub server_errors: u64,
    pub flushes: u64,
    pub batches_committed: u64,
    pub rejected_relations: u64,
    pub entities_expired: u64,
    pub entities_evicted: u64,
    pub relations_evicted: u64,
    pub reconnect_attempts: u64,
}

pub struct SyncCore<S: Schema> {
    clock: Arc<dyn Clock>,
    buffer: UpdateBuffer<S>,
    store: StateStore<S>,
    eviction: EvictionPolicy,
    registry: SubscriberRegistry<S>,
    current: Arc<Snapshot<S>>,
    version: u64,
    stats: EngineStats,
    snapshot_tx: watch::Sender<Arc<Snapshot<S>>>,
}

impl<S: Schema> SyncCore<S> {
    pub fn new(config: &EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let current = Arc::new(Snapshot::empty());
        let (snapshot_tx, _) = watch::channel(Arc::clone(&current));
        Self {
            clock,
            buffer: UpdateBuffer::new(config),
            store: StateStore::new(),
            eviction: EvictionPolicy::for_schema::<S>(config),
            registry: SubscriberRegistry::new(),
            current,
            version: 0,
            stats: EngineStats::default(),
            snapshot_tx,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Decodes and buffers one raw frame.
    pub fn ingest(&mut self, raw: &str) -> Result<Option<Publication<S>>, DecodeError> {
        self.stats.frames_received += 1;
        match decode::<S>(raw) {
            Ok(envelope) => Ok(self.enqueue(envelope)),
            Err(e) => {
                self.stats.decode_errors += 1;
                Err(e)
            }
        }
    }

    /// Buffers a decoded envelope, committing if a flush is due.
    pub fn enqueue(&mut self, envelope: Envelope<S>) -> Option<Publication<S>> {
        if let Update::ServerError(message) = &envelope.update {
            self.stats.server_errors += 1;
            warn!("[{}] server reported error: {}", S::NAME, message);
            return None;
        }
        let now = self.clock.now();
        let ready = self.buffer.enqueue(envelope, now)?;
        self.commit(ready)
    }

    /// Flushes the buffer if its deadline has passed.
    pub fn poll_timer(&mut self) -> Option<Publication<S>> {
        let now = self.clock.now();
        let ready = self.buffer.poll(now)?;
        self.commit(ready)
    }

    /// When [`poll_timer`](Self::poll_timer) should next be called.
    pub fn flush_deadline(&self) -> Option<Timestamp> {
        self.buffer.deadline()
    }

    /// Merges and applies a set of envelopes.
    pub fn commit(&mut self, envelopes: Vec<Envelope<S>>) -> Option<Publication<S>> {
        self.stats.flushes += 1;
        let count = envelopes.len();
        let batch = merge(envelopes);
        debug!(
            "[{}] flushing {} envelopes as {} ops{}",
            S::NAME,
            count,
            batch.op_count(),
            if batch.reset.is_some() { " (reset)" } else { "" }
        );
        self.apply_batch(&batch)
    }

    /// Applies a batch, enforces the limits and publishes if anything
    /// changed.
    pub fn apply_batch(&mut self, batch: &BatchUpdate<S>) -> Option<Publication<S>> {
        let now = self.clock.now();
        let outcome = self.store.apply(batch, now);
        let report = self.eviction.enforce(&mut self.store, now);

        self.stats.rejected_relations += outcome.rejected_relations as u64;
        self.stats.entities_expired += report.expired as u64;
        self.stats.entities_evicted += report.entities_evicted as u64;
        self.stats.relations_evicted += report.relations_evicted as u64;

        (outcome.changed || !report.is_empty()).then(|| self.publish(now))
    }

    /// Replaces the model, dropping anything buffered. Always publishes.
    pub fn reset(&mut self, state: Option<ResetState<S>>) -> Publication<S> {
        let dropped = self.buffer.clear();
        if dropped > 0 {
            debug!("[{}] reset discarded {} buffered envelopes", S::NAME, dropped);
        }
        let now = self.clock.now();
        let rejected = self.store.reset(&state.unwrap_or_default(), now);
        self.stats.rejected_relations += rejected as u64;
        let report = self.eviction.enforce(&mut self.store, now);
        self.stats.entities_expired += report.expired as u64;
        self.stats.entities_evicted += report.entities_evicted as u64;
        self.stats.relations_evicted += report.relations_evicted as u64;
        self.publish(now)
    }

    pub fn snapshot(&self) -> Arc<Snapshot<S>> {
        Arc::clone(&self.current)
    }

    pub fn watch(&self) -> watch::Receiver<Arc<Snapshot<S>>> {
        self.snapshot_tx.subscribe()
    }

    /// Registers a handler and returns the snapshot it must be replayed.
    pub fn register(&mut self, handler: Handler<S>) -> (SubscriptionId, Arc<Snapshot<S>>) {
        let id = self.registry.register(handler);
        (id, self.snapshot())
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.registry.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    /// Drops buffered envelopes without applying them.
    pub fn discard_pending(&mut self) -> usize {
        self.buffer.clear()
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn record_reconnect_attempt(&mut self) {
        self.stats.reconnect_attempts += 1;
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn store(&self) -> &StateStore<S> {
        &self.store
    }

    fn publish(&mut self, now: Timestamp) -> Publication<S> {
        self.version += 1;
        self.stats.batches_committed += 1;
        let snapshot = Arc::new(self.store.snapshot(self.version, now));
        self.current = Arc::clone(&snapshot);
        self.snapshot_tx.send_replace(Arc::clone(&snapshot));
        self.registry.publication(snapshot)
    }
}
