/// Socket transport: opens a bidirectional pipe of text frames
use crate::error::{RealtimeError, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

const PIPE_CAPACITY: usize = 64;

/// Both directions of an open socket.
///
/// Dropping every clone of `outbound` closes the socket; `inbound` yields
/// `None` once the remote side is gone.
pub struct SocketPipe {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, url: &str) -> Result<SocketPipe>;
}

/// WebSocket transport over tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &str) -> Result<SocketPipe> {
        let (ws_stream, response) = timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| RealtimeError::Timeout("WebSocket connect timeout".to_string()))?
            .map_err(|e| RealtimeError::Connection(format!("WebSocket connect failed: {}", e)))?;
        debug!("WebSocket connected to {} ({})", url, response.status());

        let (mut sink, mut stream) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(PIPE_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<String>(PIPE_CAPACITY);

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!("WebSocket send failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
            debug!("WebSocket writer stopped");
        });

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        debug!("WebSocket closed by server: {:?}", frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("WebSocket receive failed: {}", e);
                        break;
                    }
                }
            }
            debug!("WebSocket reader stopped");
        });

        Ok(SocketPipe {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
