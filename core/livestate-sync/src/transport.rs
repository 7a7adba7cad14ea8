//! Transport layer abstraction.
//!
//! A transport opens a duplex text channel to a URL. The engine only sees
//! the two ends of that channel, which keeps WebSocket details in
//! [`crate::websocket`] and lets tests substitute [`mock::MockTransport`].

use crate::error::EngineResult;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;

/// Something that happened on an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame.
    Frame(String),
    /// The remote side closed cleanly.
    Closed,
    /// The connection broke.
    Failed(String),
}

/// The engine's ends of an open connection.
///
/// Dropping `outbound` asks the transport to close the connection.
#[derive(Debug)]
pub struct Connection {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Opens connections for the engine.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, url: &str) -> EngineResult<Connection>;
}

/// Lifecycle state of an engine's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
    /// The last attempt or connection failed; a reconnect may follow.
    Error,
    /// Reconnect attempts are exhausted. Only `connect()` leaves this state.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Error => "error",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// An in-memory transport for testing.
pub mod mock {
    use super::*;
    use crate::error::EngineError;
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

    const CHANNEL_CAPACITY: usize = 256;

    #[derive(Debug, Default)]
    struct MockState {
        refuse_opens: usize,
        opens: usize,
        urls: Vec<String>,
        inbound: Option<mpsc::Sender<TransportEvent>>,
        outbound: Option<mpsc::Receiver<String>>,
        sent: Vec<String>,
    }

    /// A scriptable transport. Clones share state, so a test keeps one
    /// handle and gives another to the engine.
    #[derive(Debug, Clone, Default)]
    pub struct MockTransport {
        state: Arc<Mutex<MockState>>,
    }

    impl MockTransport {
        /// Creates a transport that accepts every open.
        pub fn new() -> Self {
            Self::default()
        }

        fn state(&self) -> MutexGuard<'_, MockState> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Makes the next `count` opens fail.
        pub fn refuse_next_opens(&self, count: usize) {
            self.state().refuse_opens = count;
        }

        /// Number of open attempts so far, refused ones included.
        pub fn open_count(&self) -> usize {
            self.state().opens
        }

        /// URLs passed to `open`, in order.
        pub fn urls(&self) -> Vec<String> {
            self.state().urls.clone()
        }

        /// Whether a connection is currently open.
        pub fn is_open(&self) -> bool {
            self.state()
                .inbound
                .as_ref()
                .is_some_and(|tx| !tx.is_closed())
        }

        /// Delivers a text frame. Returns false if no connection is open.
        pub fn push_frame(&self, frame: impl Into<String>) -> bool {
            self.push(TransportEvent::Frame(frame.into()))
        }

        /// Delivers a JSON value as a text frame.
        pub fn push_json(&self, frame: &serde_json::Value) -> bool {
            self.push_frame(frame.to_string())
        }

        /// Closes the connection from the remote side.
        pub fn close_remote(&self) -> bool {
            let sent = self.push(TransportEvent::Closed);
            self.state().inbound = None;
            sent
        }

        /// Breaks the connection.
        pub fn fail_remote(&self, reason: impl Into<String>) -> bool {
            let sent = self.push(TransportEvent::Failed(reason.into()));
            self.state().inbound = None;
            sent
        }

        /// Stops reading what the engine sends, keeping the inbound side
        /// open. Messages already sent are kept.
        pub fn drop_outbound(&self) {
            let mut state = self.state();
            if let Some(mut rx) = state.outbound.take() {
                while let Ok(message) = rx.try_recv() {
                    state.sent.push(message);
                }
            }
        }

        /// Messages the engine has sent, oldest first.
        pub fn sent(&self) -> Vec<String> {
            let mut state = self.state();
            let mut drained = Vec::new();
            if let Some(rx) = state.outbound.as_mut() {
                while let Ok(message) = rx.try_recv() {
                    drained.push(message);
                }
            }
            state.sent.extend(drained);
            state.sent.clone()
        }

        fn push(&self, event: TransportEvent) -> bool {
            let state = self.state();
            match &state.inbound {
                Some(tx) => tx.try_send(event).is_ok(),
                None => false,
            }
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn open(&self, url: &str) -> EngineResult<Connection> {
            let mut state = self.state();
            state.opens += 1;
            state.urls.push(url.to_string());
            if state.refuse_opens > 0 {
                state.refuse_opens -= 1;
                return Err(EngineError::Connect(format!("connection to {url} refused")));
            }

            let (in_tx, in_rx) = mpsc::channel(CHANNEL_CAPACITY);
            let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
            if let Some(mut previous) = state.outbound.replace(out_rx) {
                while let Ok(message) = previous.try_recv() {
                    state.sent.push(message);
                }
            }
            state.inbound = Some(in_tx);
            Ok(Connection {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
    }
}
