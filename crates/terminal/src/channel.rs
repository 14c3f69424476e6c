//! Backend channel adapter
//!
//! Owns the duplex WebSocket to the banking backend. Inbound frames become
//! typed `ChannelEvent`s on an mpsc receiver; outbound requests go through
//! `ChannelHandle::send`, which never blocks and never reports delivery.
//! The adapter knows nothing about sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use kiosk_protocol::{decode_server_frame, encode_client_frame, ClientMessage, ServerMessage};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const INBOUND_CAPACITY: usize = 256;

type BackendSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid backend endpoint `{endpoint}`: expected a ws:// or wss:// URL")]
    InvalidEndpoint { endpoint: String },

    #[error("failed to connect to `{endpoint}`: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },
}

/// What the channel reports to the session
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected {
        reason: Option<String>,
    },
    Message(ServerMessage),
    /// A frame that did not decode into a known event.
    Undecodable {
        event: Option<String>,
        error: String,
    },
}

/// Outbound side of the channel (cheap to Clone).
#[derive(Clone)]
pub struct ChannelHandle {
    outbound_tx: mpsc::UnboundedSender<ClientMessage>,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl ChannelHandle {
    /// Enqueue a request (fire-and-forget). Dropped when disconnected.
    pub fn send(&self, msg: ClientMessage) {
        if !self.is_connected() {
            debug!(
                component = "channel",
                event = "channel.send.dropped",
                request = msg.event_name(),
                "Channel disconnected, outbound message dropped"
            );
            return;
        }
        let name = msg.event_name();
        if self.outbound_tx.send(msg).is_err() {
            debug!(
                component = "channel",
                event = "channel.send.closed",
                request = name,
                "Channel writer gone, outbound message dropped"
            );
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Release the channel. The event stream ends with `Disconnected`.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// A handle whose outbound messages land on the returned receiver.
    #[cfg(test)]
    pub fn loopback() -> (Self, mpsc::UnboundedReceiver<ClientMessage>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let handle = Self {
            outbound_tx,
            connected: Arc::new(AtomicBool::new(true)),
            shutdown: CancellationToken::new(),
        };
        (handle, outbound_rx)
    }
}

pub fn validate_endpoint(endpoint: &str) -> Result<(), ChannelError> {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        Ok(())
    } else {
        Err(ChannelError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
        })
    }
}

/// Start the channel. Dialing happens in the background; the first event
/// is `Connected`, or `Disconnected` if the dial fails.
pub fn connect(endpoint: impl Into<String>) -> (ChannelHandle, mpsc::Receiver<ChannelEvent>) {
    let endpoint = endpoint.into();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::channel(INBOUND_CAPACITY);
    let connected = Arc::new(AtomicBool::new(false));
    let shutdown = CancellationToken::new();

    let handle = ChannelHandle {
        outbound_tx,
        connected: connected.clone(),
        shutdown: shutdown.clone(),
    };

    tokio::spawn(run_channel(
        endpoint,
        outbound_rx,
        event_tx,
        connected,
        shutdown,
    ));

    (handle, event_rx)
}

async fn dial(endpoint: &str) -> Result<BackendSocket, ChannelError> {
    validate_endpoint(endpoint)?;
    let (socket, _) = connect_async(endpoint)
        .await
        .map_err(|source| ChannelError::Connect {
            endpoint: endpoint.to_string(),
            source: Box::new(source),
        })?;
    Ok(socket)
}

async fn run_channel(
    endpoint: String,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientMessage>,
    event_tx: mpsc::Sender<ChannelEvent>,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
) {
    let socket = tokio::select! {
        _ = shutdown.cancelled() => {
            let _ = event_tx
                .send(ChannelEvent::Disconnected {
                    reason: Some("closed before connecting".to_string()),
                })
                .await;
            return;
        }
        result = dial(&endpoint) => match result {
            Ok(socket) => socket,
            Err(e) => {
                warn!(
                    component = "channel",
                    event = "channel.connect.failed",
                    endpoint = %endpoint,
                    error = %e,
                    "Backend connection failed"
                );
                let _ = event_tx
                    .send(ChannelEvent::Disconnected {
                        reason: Some(e.to_string()),
                    })
                    .await;
                return;
            }
        },
    };

    connected.store(true, Ordering::Release);
    info!(
        component = "channel",
        event = "channel.connected",
        endpoint = %endpoint,
        "Backend channel connected"
    );
    let _ = event_tx.send(ChannelEvent::Connected).await;

    let (mut ws_tx, mut ws_rx) = socket.split();

    let reason: Option<String> = loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break Some("closed by terminal".to_string());
            }

            Some(msg) = outbound_rx.recv() => {
                let frame = match encode_client_frame(&msg) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!(
                            component = "channel",
                            event = "channel.send.encode_failed",
                            error = %e,
                            "Failed to encode outbound message"
                        );
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(frame.into())).await {
                    break Some(e.to_string());
                }
            }

            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let event = match decode_server_frame(text.as_str()) {
                        Ok(msg) => ChannelEvent::Message(msg),
                        Err(e) => {
                            warn!(
                                component = "channel",
                                event = "channel.frame.undecodable",
                                error = %e,
                                payload_preview = %truncate_for_log(text.as_str(), 240),
                                "Failed to decode backend frame"
                            );
                            ChannelEvent::Undecodable {
                                event: e.event().map(str::to_string),
                                error: e.to_string(),
                            }
                        }
                    };
                    if event_tx.send(event).await.is_err() {
                        // Nobody is listening any more.
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break None;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws_tx.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    break Some(
                        frame
                            .map(|f| f.reason.as_str().to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by backend".to_string()),
                    );
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => break Some(e.to_string()),
                None => break Some("connection ended".to_string()),
            },
        }
    };

    connected.store(false, Ordering::Release);
    info!(
        component = "channel",
        event = "channel.disconnected",
        endpoint = %endpoint,
        reason = reason.as_deref().unwrap_or(""),
        "Backend channel disconnected"
    );
    let _ = event_tx.send(ChannelEvent::Disconnected { reason }).await;
}

fn truncate_for_log(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
