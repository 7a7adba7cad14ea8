//! WebSocket transport over tokio-tungstenite.

use crate::error::{EngineError, EngineResult};
use crate::transport::{Connection, Transport, TransportEvent};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects with `ws://` or `wss://` URLs.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    channel_capacity: usize,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames buffered between the socket and the engine in each direction.
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &str) -> EngineResult<Connection> {
        let (socket, response) = connect_async(url)
            .await
            .map_err(|e| EngineError::Connect(e.to_string()))?;
        debug!("WebSocket handshake with {} returned {}", url, response.status());

        let (out_tx, out_rx) = mpsc::channel(self.channel_capacity);
        let (in_tx, in_rx) = mpsc::channel(self.channel_capacity);
        tokio::spawn(pump(socket, out_rx, in_tx));
        Ok(Connection {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Bridges the socket and the engine's channels until either side goes away.
async fn pump(
    socket: Socket,
    mut outbound: mpsc::Receiver<String>,
    inbound: mpsc::Sender<TransportEvent>,
) {
    let (mut write, mut read) = socket.split();
    loop {
        tokio::select! {
            message = outbound.recv() => match message {
                Some(text) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        let _ = inbound.send(TransportEvent::Failed(e.to_string())).await;
                        return;
                    }
                }
                None => {
                    let _ = write.close().await;
                    return;
                }
            },
            frame = read.next() => {
                let event = match frame {
                    Some(Ok(Message::Text(text))) => TransportEvent::Frame(text.as_str().to_owned()),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => TransportEvent::Frame(text),
                        Err(_) => {
                            warn!("dropping non-UTF-8 binary frame ({} bytes)", data.len());
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        let _ = inbound.send(TransportEvent::Closed).await;
                        return;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = inbound.send(TransportEvent::Failed(e.to_string())).await;
                        return;
                    }
                };
                if inbound.send(event).await.is_err() {
                    let _ = write.close().await;
                    return;
                }
            }
        }
    }
}
