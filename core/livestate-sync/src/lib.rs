//! Streaming state-sync engine for live dashboard visualizations.
//!
//! A server pushes incremental mutations (add/update/remove of entities and
//! relations, batches, resets) over a WebSocket. The engine keeps an
//! in-memory model in sync with that stream and publishes immutable
//! snapshots to subscribers.
//!
//! # Architecture
//!
//! ```text
//! Transport -> Decoder -> Buffer -> Merger -> Store -> Eviction -> Subscribers
//! ```
//!
//! - **Transport**: opens the connection ([`WebSocketTransport`], or
//!   [`transport::mock::MockTransport`] in tests)
//! - **Protocol**: decodes JSON frames into typed [`Envelope`]s
//! - **Buffer**: batches envelopes by count and time, with a minimum
//!   spacing between flushes
//! - **Merger**: folds one flush into a single [`BatchUpdate`]
//! - **Store**: the keyed model with insertion order and adjacency indices
//! - **Eviction**: TTL pruning and entity/relation caps
//! - **Subscribers**: replay-on-join and panic-isolated delivery
//!
//! [`SyncCore`] strings the synchronous stages together behind an injected
//! [`Clock`]; [`StreamingEngine`] adds the connection supervisor and the
//! public async API. The engine is generic over a
//! [`Schema`](livestate_types::Schema); [`GraphEngine`], [`SankeyEngine`]
//! and [`SurfaceEngine`] cover the built-in visualizations.
//!
//! # Example
//!
//! ```
//! use livestate_sync::{EngineConfig, GraphEngine};
//! use livestate_sync::transport::mock::MockTransport;
//! use livestate_types::Graph;
//! use std::sync::Arc;
//!
//! let config = EngineConfig {
//!     throttle_updates: false,
//!     ..EngineConfig::for_schema::<Graph>("ws://localhost/graph")
//! };
//! let engine = GraphEngine::with_transport(config, Arc::new(MockTransport::new())).unwrap();
//! engine
//!     .ingest_frame(r#"{"type":"add_node","data":{"id":"A"},"timestamp":1}"#)
//!     .unwrap();
//! assert_eq!(engine.get_state().len(), 1);
//! ```

pub mod buffer;
pub mod clock;
pub mod config;
mod core;
mod engine;
mod error;
pub mod eviction;
pub mod merger;
pub mod protocol;
mod snapshot;
pub mod store;
pub mod subscribers;
pub mod transport;
pub mod websocket;

pub use clock::{Clock, ManualClock, TokioClock};
pub use config::{Backoff, EngineConfig, ReconnectConfig};
pub use crate::core::{EngineStats, SyncCore};
pub use engine::{GraphEngine, SankeyEngine, StreamingEngine, Subscription, SurfaceEngine};
pub use error::{DecodeError, EngineError, EngineResult};
pub use eviction::{EvictionPolicy, EvictionReport};
pub use protocol::{decode, BatchUpdate, EntityPatch, Envelope, ResetState, Update, UpdateKind};
pub use snapshot::Snapshot;
pub use store::{ApplyOutcome, StateStore};
pub use subscribers::{Handler, Publication, SubscriberRegistry};
pub use transport::{Connection, ConnectionState, Transport, TransportEvent};
pub use websocket::WebSocketTransport;
