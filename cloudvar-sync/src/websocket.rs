//! WebSocket transport binding.
//!
//! [`connect`] spawns one background task that owns the socket:
//! - connect (and reconnect after the configured interval)
//! - forward engine frames to the socket as text
//! - report socket frames and lifecycle changes as [`TransportEvent`]s
//!
//! Frames the engine queued while the socket was down are discarded on
//! reconnect: the engine has already failed those commands.

use crate::config::Timing;
use crate::connection::Transport;
use crate::error::CloudError;
use crate::protocol::OutgoingMessage;
use crate::session::TransportEvent;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

/// Outgoing half handed to the engine. Cloning shares the same socket.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    outgoing: mpsc::UnboundedSender<OutgoingMessage>,
    close: Arc<watch::Sender<bool>>,
}

impl WebSocketTransport {
    /// Close the socket for good. A `Closed` event follows.
    pub fn close(&self) {
        self.close.send_replace(true);
    }
}

impl Transport for WebSocketTransport {
    fn send(&self, message: OutgoingMessage) -> Result<(), CloudError> {
        self.outgoing
            .send(message)
            .map_err(|_| CloudError::Transport("websocket task has stopped".into()))
    }
}

/// Start connecting to `url`.
///
/// With `reconnect` disabled, the first lost connection is final.
pub fn connect(
    url: impl Into<String>,
    reconnect: Timing,
) -> (WebSocketTransport, mpsc::Receiver<TransportEvent>) {
    let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
    let (close, close_rx) = watch::channel(false);
    let (event_tx, event_rx) = mpsc::channel(256);
    tokio::spawn(drive(url.into(), reconnect, outgoing_rx, close_rx, event_tx));
    (
        WebSocketTransport {
            outgoing,
            close: Arc::new(close),
        },
        event_rx,
    )
}

enum Ended {
    Lost,
    Closed,
}

async fn drive(
    url: String,
    reconnect: Timing,
    mut outgoing: mpsc::UnboundedReceiver<OutgoingMessage>,
    mut close: watch::Receiver<bool>,
    events: mpsc::Sender<TransportEvent>,
) {
    loop {
        match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, _)) => {
                let mut stale = 0;
                while outgoing.try_recv().is_ok() {
                    stale += 1;
                }
                if stale > 0 {
                    log::debug!("discarded {stale} frame(s) queued while disconnected");
                }
                log::info!("connected to {url}");
                if events.send(TransportEvent::Opened).await.is_err() {
                    return;
                }

                let (mut writer, mut reader) = stream.split();
                let ended = loop {
                    tokio::select! {
                        _ = close.changed() => {
                            let _ = writer.send(Message::Close(None)).await;
                            break Ended::Closed;
                        }
                        Some(message) = outgoing.recv() => {
                            let text = match message.encode() {
                                Ok(text) => text,
                                Err(e) => {
                                    log::error!("cannot encode {:?} frame: {e}", message.kind);
                                    continue;
                                }
                            };
                            if writer.send(Message::Text(text.into())).await.is_err() {
                                break Ended::Lost;
                            }
                        }
                        frame = reader.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                let event = TransportEvent::Received(text.as_str().to_owned());
                                if events.send(event).await.is_err() {
                                    return;
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                let _ = writer.send(Message::Pong(data)).await;
                            }
                            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break Ended::Lost,
                            Some(Ok(_)) => {}
                        },
                    }
                };

                if let Ended::Closed = ended {
                    log::info!("closed connection to {url}");
                    let _ = events.send(TransportEvent::Closed).await;
                    return;
                }
                log::warn!("lost connection to {url}");
                if events.send(TransportEvent::Disconnected).await.is_err() {
                    return;
                }
            }
            Err(e) => log::error!("failed to connect to {url}: {e}"),
        }

        let Some(delay) = reconnect.duration() else {
            let _ = events.send(TransportEvent::Closed).await;
            return;
        };
        tokio::select! {
            _ = close.changed() => {
                let _ = events.send(TransportEvent::Closed).await;
                return;
            }
            _ = tokio::time::sleep(delay) => {
                log::info!("reconnecting to {url}");
            }
        }
    }
}
