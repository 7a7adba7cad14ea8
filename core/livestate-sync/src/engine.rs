//! The streaming engine: one instance per live visualization.
//!
//! A [`StreamingEngine`] couples a [`Transport`] to a [`SyncCore`]. A
//! supervisor task owns the connection: it opens it, feeds inbound frames
//! to the core and schedules reconnects. A separate flush timer task fires
//! the buffer's deadline, whether frames arrive over the connection or
//! through [`StreamingEngine::ingest_frame`]. All state lives behind short
//! synchronous critical sections, so the public API can be called from any
//! thread and either task can be aborted at any await point.

use crate::clock::{Clock, TokioClock};
use crate::config::EngineConfig;
use crate::core::{EngineStats, SyncCore};
use crate::error::{EngineError, EngineResult};
use crate::protocol::ResetState;
use crate::snapshot::Snapshot;
use crate::subscribers::{invoke, Handler, Publication};
use crate::transport::{ConnectionState, Transport, TransportEvent};
use crate::websocket::WebSocketTransport;
use livestate_types::{EngineId, Graph, Sankey, Schema, SubscriptionId, Surface, Timestamp};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Engine for live network graphs.
pub type GraphEngine = StreamingEngine<Graph>;
/// Engine for live Sankey diagrams.
pub type SankeyEngine = StreamingEngine<Sankey>;
/// Engine for live 3-D surfaces.
pub type SurfaceEngine = StreamingEngine<Surface>;

type Waiter = oneshot::Sender<Result<(), String>>;

#[derive(Default)]
struct Session {
    /// Bumped by `disconnect`; a supervisor from an older generation may
    /// no longer touch shared state.
    generation: u64,
    task: Option<JoinHandle<()>>,
    waiters: Vec<Waiter>,
    outbound: Option<mpsc::Sender<String>>,
}

struct EngineInner<S: Schema> {
    id: EngineId,
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    core: Mutex<SyncCore<S>>,
    /// Serializes publications so subscribers see versions in order.
    dispatch: Mutex<()>,
    state_tx: watch::Sender<ConnectionState>,
    session: Mutex<Session>,
    retry: Notify,
    /// Wakes the flush timer after the buffer deadline may have moved.
    flush: Notify,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

/// Real-time state-sync engine for schema `S`.
///
/// # Example
///
/// ```no_run
/// use livestate_sync::{EngineConfig, GraphEngine};
/// use livestate_types::Graph;
///
/// # async fn run() -> livestate_sync::EngineResult<()> {
/// let engine = GraphEngine::new(EngineConfig::for_schema::<Graph>("ws://localhost:8080/graph"))?;
/// let subscription = engine.subscribe(|snapshot| {
///     println!("v{}: {} nodes", snapshot.version, snapshot.len());
/// });
/// engine.connect().await?;
/// # subscription.unsubscribe();
/// # Ok(())
/// # }
/// ```
pub struct StreamingEngine<S: Schema> {
    inner: Arc<EngineInner<S>>,
}

/// Handle returned by [`StreamingEngine::subscribe`].
pub struct Subscription<S: Schema> {
    id: SubscriptionId,
    engine: Weak<EngineInner<S>>,
}

impl<S: Schema> std::fmt::Debug for Subscription<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl<S: Schema> Subscription<S> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Removes the handler. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.engine.upgrade() {
            Some(inner) => lock(&inner.core).unsubscribe(self.id),
            None => false,
        }
    }
}

impl<S: Schema> StreamingEngine<S> {
    /// Creates an engine that connects over WebSocket.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        Self::with_transport(config, Arc::new(WebSocketTransport::default()))
    }

    /// Creates an engine over a custom transport.
    pub fn with_transport(config: EngineConfig, transport: Arc<dyn Transport>) -> EngineResult<Self> {
        Self::with_parts(config, transport, Arc::new(TokioClock::new()))
    }

    /// Creates an engine over a custom transport and clock.
    pub fn with_parts(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let id = EngineId::new();
        let core = SyncCore::new(&config, Arc::clone(&clock));
        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        info!("[{}] engine {} created", S::NAME, id);
        Ok(Self {
            inner: Arc::new(EngineInner {
                id,
                config,
                transport,
                clock,
                core: Mutex::new(core),
                dispatch: Mutex::new(()),
                state_tx,
                session: Mutex::new(Session::default()),
                retry: Notify::new(),
                flush: Notify::new(),
                flusher: Mutex::new(None),
            }),
        })
    }

    pub fn id(&self) -> EngineId {
        self.inner.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Opens the connection.
    ///
    /// Resolves once the current attempt settles. Returns immediately if
    /// already open. While a reconnect backoff is pending, the backoff is
    /// cut short and the next attempt starts now.
    pub async fn connect(&self) -> EngineResult<()> {
        if self.inner.config.url.is_empty() {
            return Err(EngineError::Config("no url configured".into()));
        }
        let settled = {
            let mut session = lock(&self.inner.session);
            let state = *self.inner.state_tx.borrow();
            if state == ConnectionState::Open {
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            session.waiters.push(tx);
            let running = session.task.as_ref().is_some_and(|t| !t.is_finished());
            if running {
                if matches!(state, ConnectionState::Closed | ConnectionState::Error) {
                    self.inner.retry.notify_one();
                }
            } else {
                let generation = session.generation;
                session.task = Some(tokio::spawn(supervise(Arc::clone(&self.inner), generation)));
            }
            rx
        };
        settled
            .await
            .map_err(|_| EngineError::ChannelClosed)?
            .map_err(EngineError::Connect)
    }

    /// Closes the connection and stops reconnecting. Buffered updates that
    /// have not been flushed are discarded.
    pub fn disconnect(&self) {
        let task = {
            let mut session = lock(&self.inner.session);
            session.generation += 1;
            session.outbound = None;
            for waiter in session.waiters.drain(..) {
                let _ = waiter.send(Err("disconnected".into()));
            }
            session.task.take()
        };
        let was_running = task.is_some();
        if let Some(task) = task {
            task.abort();
        }
        let dropped = lock(&self.inner.core).discard_pending();
        self.inner.state_tx.send_replace(ConnectionState::Closed);
        if was_running {
            info!(
                "[{}] engine {} disconnected, {} buffered updates discarded",
                S::NAME,
                self.inner.id,
                dropped
            );
        }
    }

    /// Sends a JSON message to the server.
    pub async fn send_message<M: Serialize + ?Sized>(&self, message: &M) -> EngineResult<()> {
        let payload = serde_json::to_string(message)?;
        let outbound = {
            let session = lock(&self.inner.session);
            if *self.inner.state_tx.borrow() != ConnectionState::Open {
                return Err(EngineError::NotConnected);
            }
            session.outbound.clone().ok_or(EngineError::NotConnected)?
        };
        outbound
            .send(payload)
            .await
            .map_err(|_| EngineError::Transport("connection dropped while sending".into()))
    }

    /// Registers a handler. It is invoked right away with the current
    /// snapshot and then once per committed change.
    ///
    /// Handlers run on the thread that committed the change, one publication
    /// at a time. A handler may read the engine (`get_state`, `stats`), but
    /// calling `subscribe`, `reset_state` or `ingest_frame` from inside a
    /// handler deadlocks.
    pub fn subscribe<F>(&self, handler: F) -> Subscription<S>
    where
        F: Fn(Arc<Snapshot<S>>) + Send + Sync + 'static,
    {
        let handler: Handler<S> = Arc::new(handler);
        let _dispatch = lock(&self.inner.dispatch);
        let (id, snapshot) = lock(&self.inner.core).register(Arc::clone(&handler));
        invoke(id, &handler, &snapshot);
        debug!("[{}] subscriber {} registered", S::NAME, id);
        Subscription {
            id,
            engine: Arc::downgrade(&self.inner),
        }
    }

    /// Removes a handler by id.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        lock(&self.inner.core).unsubscribe(id)
    }

    /// A channel that always holds the latest snapshot.
    pub fn watch(&self) -> watch::Receiver<Arc<Snapshot<S>>> {
        lock(&self.inner.core).watch()
    }

    /// Replaces the model with `initial` (or an empty model) and publishes.
    pub fn reset_state(&self, initial: Option<ResetState<S>>) {
        {
            let _dispatch = lock(&self.inner.dispatch);
            let publication = lock(&self.inner.core).reset(initial);
            publication.deliver();
        }
        self.inner.schedule_flush();
    }

    /// The latest committed snapshot.
    pub fn get_state(&self) -> Arc<Snapshot<S>> {
        lock(&self.inner.core).snapshot()
    }

    /// Feeds one raw frame through the pipeline as if it had arrived on
    /// the connection.
    pub fn ingest_frame(&self, raw: &str) -> EngineResult<()> {
        self.inner.ingest(raw)
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn stats(&self) -> EngineStats {
        lock(&self.inner.core).stats()
    }

    /// Buffered envelopes not yet flushed.
    pub fn pending(&self) -> usize {
        lock(&self.inner.core).pending()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.core).subscriber_count()
    }
}

impl<S: Schema> Drop for StreamingEngine<S> {
    fn drop(&mut self) {
        self.disconnect();
        if let Some(flusher) = lock(&self.inner.flusher).take() {
            flusher.abort();
        }
    }
}

impl<S: Schema> EngineInner<S> {
    fn ingest(self: &Arc<Self>, raw: &str) -> EngineResult<()> {
        let result = {
            let _dispatch = lock(&self.dispatch);
            let result = lock(&self.core).ingest(raw);
            result.map(deliver)
        };
        match result {
            Ok(()) => {
                self.schedule_flush();
                Ok(())
            }
            Err(e) => {
                warn!("[{}] dropping frame: {}", S::NAME, e);
                Err(e.into())
            }
        }
    }

    /// Makes sure the flush timer is running and sees the current deadline.
    fn schedule_flush(self: &Arc<Self>) {
        if self.flush_deadline().is_none() {
            return;
        }
        let mut flusher = lock(&self.flusher);
        if flusher.as_ref().is_some_and(|task| !task.is_finished()) {
            self.flush.notify_one();
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => *flusher = Some(runtime.spawn(flush_timer(Arc::clone(self)))),
            Err(_) => warn!(
                "[{}] no tokio runtime, buffered updates wait for a full batch",
                S::NAME
            ),
        }
    }

    fn poll_timer(&self) {
        let _dispatch = lock(&self.dispatch);
        let publication = lock(&self.core).poll_timer();
        deliver(publication);
    }

    fn flush_deadline(&self) -> Option<Timestamp> {
        lock(&self.core).flush_deadline()
    }

    /// Applies a state change only if `generation` is still current.
    fn transition(&self, generation: u64, state: ConnectionState) -> bool {
        let session = lock(&self.session);
        if session.generation != generation {
            return false;
        }
        self.state_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
        true
    }

    fn settle(&self, generation: u64, result: Result<(), String>) {
        let mut session = lock(&self.session);
        if session.generation != generation {
            return;
        }
        for waiter in session.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    fn set_outbound(&self, generation: u64, outbound: Option<mpsc::Sender<String>>) {
        let mut session = lock(&self.session);
        if session.generation == generation {
            session.outbound = outbound;
        }
    }

    /// Called before the supervisor gives up. Returns true if a `connect()`
    /// is waiting, in which case the supervisor starts over instead.
    fn retire(&self, generation: u64) -> bool {
        let mut session = lock(&self.session);
        if session.generation != generation {
            return false;
        }
        if !session.waiters.is_empty() {
            return true;
        }
        session.task = None;
        false
    }

    /// Consumes inbound events until the connection ends. Returns the
    /// failure reason, or `None` on a clean close.
    async fn pump(self: &Arc<Self>, inbound: &mut mpsc::Receiver<TransportEvent>) -> Option<String> {
        loop {
            match inbound.recv().await {
                Some(TransportEvent::Frame(raw)) => {
                    let _ = self.ingest(&raw);
                }
                Some(TransportEvent::Closed) | None => return None,
                Some(TransportEvent::Failed(reason)) => return Some(reason),
            }
        }
    }
}

/// Fires the buffer's flush deadline for the lifetime of the engine.
async fn flush_timer<S: Schema>(inner: Arc<EngineInner<S>>) {
    loop {
        let deadline = inner.flush_deadline();
        let now = inner.clock.now();
        tokio::select! {
            _ = sleep_until(deadline, now) => inner.poll_timer(),
            _ = inner.flush.notified() => {}
        }
    }
}

async fn supervise<S: Schema>(inner: Arc<EngineInner<S>>, generation: u64) {
    let span = info_span!("engine", id = %inner.id, schema = S::NAME);
    async move {
        let reconnect = &inner.config.reconnect;
        let url = inner.config.url.as_str();
        let mut attempt = 0u32;

        loop {
            if !inner.transition(generation, ConnectionState::Connecting) {
                return;
            }
            match inner.transport.open(url).await {
                Ok(mut connection) => {
                    attempt = 0;
                    info!("connected to {}", url);
                    inner.set_outbound(generation, Some(connection.outbound.clone()));
                    inner.transition(generation, ConnectionState::Open);
                    inner.settle(generation, Ok(()));

                    let failure = inner.pump(&mut connection.inbound).await;
                    inner.set_outbound(generation, None);
                    match failure {
                        None => info!("connection to {} closed by server", url),
                        Some(reason) => {
                            warn!("connection to {} failed: {}", url, reason);
                            inner.transition(generation, ConnectionState::Error);
                        }
                    }
                    inner.transition(generation, ConnectionState::Closed);
                }
                Err(e) => {
                    warn!("connect to {} failed: {}", url, e);
                    inner.transition(generation, ConnectionState::Error);
                    inner.settle(generation, Err(e.to_string()));
                    inner.transition(generation, ConnectionState::Closed);
                }
            }

            if !reconnect.auto_reconnect {
                if inner.retire(generation) {
                    continue;
                }
                return;
            }
            attempt += 1;
            if !reconnect.allows(attempt) {
                error!(
                    "giving up on {} after {} reconnect attempts",
                    url,
                    attempt - 1
                );
                inner.transition(generation, ConnectionState::Failed);
                if inner.retire(generation) {
                    attempt = 0;
                    continue;
                }
                return;
            }
            lock(&inner.core).record_reconnect_attempt();
            let delay = reconnect.delay_for(attempt);
            info!(
                "reconnecting to {} in {:?} (attempt {})",
                url, delay, attempt
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = inner.retry.notified() => debug!("reconnect requested early"),
            }
        }
    }
    .instrument(span)
    .await
}

async fn sleep_until(deadline: Option<Timestamp>, now: Timestamp) {
    match deadline {
        Some(deadline) => tokio::time::sleep(deadline.duration_since(now)).await,
        None => std::future::pending().await,
    }
}

fn deliver<S: Schema>(publication: Option<Publication<S>>) {
    if let Some(publication) = publication {
        let version = publication.snapshot().version;
        let failures = publication.deliver();
        if failures > 0 {
            warn!("[{}] {} subscribers failed on v{}", S::NAME, failures, version);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
