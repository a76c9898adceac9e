//! Per-connection context shared by every group and item.
//!
//! The engine never opens or closes sockets. A transport binding reports
//! lifecycle changes through `handle_opened`, `handle_disconnected` and
//! `handle_closed`, and the engine sends frames through [`Transport`].

use crate::config::{CloudConfig, ConfigLayer};
use crate::error::CloudError;
use crate::protocol::{OutgoingMessage, SendMessageKind};
use crate::signal::Signal;
use std::cell::Cell;
use std::fmt;
use tokio::sync::{mpsc, Notify};

/// Connection lifecycle as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not yet open for the first time.
    Connecting,
    Open,
    /// Dropped; the transport may reconnect.
    Disconnected,
    /// Terminal.
    Closed,
}

/// Outgoing half of a transport.
pub trait Transport {
    fn send(&self, message: OutgoingMessage) -> Result<(), CloudError>;
}

/// Transport that hands frames to an in-process channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<OutgoingMessage>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutgoingMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, message: OutgoingMessage) -> Result<(), CloudError> {
        self.tx
            .send(message)
            .map_err(|_| CloudError::Transport("outgoing channel closed".into()))
    }
}

pub struct Connection {
    state: Cell<ConnectionState>,
    config: ConfigLayer,
    transport: Box<dyn Transport>,
    timers: Notify,
    pub opened: Signal<()>,
    pub disconnected: Signal<()>,
    pub closed: Signal<()>,
}

impl Connection {
    pub fn new(transport: Box<dyn Transport>, config: &CloudConfig) -> Result<Self, CloudError> {
        config.validate()?;
        Ok(Self {
            state: Cell::new(ConnectionState::Connecting),
            config: ConfigLayer::root(config),
            transport,
            timers: Notify::new(),
            opened: Signal::new(),
            disconnected: Signal::new(),
            closed: Signal::new(),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn is_open(&self) -> bool {
        self.state.get() == ConnectionState::Open
    }

    /// Connection-wide configuration layer.
    pub fn config(&self) -> &ConfigLayer {
        &self.config
    }

    /// Note that some item's timer deadline moved.
    pub fn reschedule(&self) {
        self.timers.notify_one();
    }

    /// Resolves after the next [`reschedule`](Self::reschedule), or at once
    /// if one happened since the last wait.
    pub async fn rescheduled(&self) {
        self.timers.notified().await;
    }

    pub fn send(&self, kind: SendMessageKind, payload: serde_json::Value) -> Result<(), CloudError> {
        match self.state.get() {
            ConnectionState::Open => {}
            ConnectionState::Closed => return Err(CloudError::Closed),
            ConnectionState::Connecting | ConnectionState::Disconnected => {
                return Err(CloudError::Disconnected)
            }
        }
        log::debug!("sending {:?}", kind);
        self.transport.send(OutgoingMessage::new(kind, payload))
    }

    pub fn handle_opened(&self) {
        if matches!(self.state.get(), ConnectionState::Open | ConnectionState::Closed) {
            return;
        }
        log::info!("connection opened");
        self.state.set(ConnectionState::Open);
        self.opened.emit(&());
    }

    pub fn handle_disconnected(&self) {
        if self.state.get() != ConnectionState::Open {
            return;
        }
        log::info!("connection lost");
        self.state.set(ConnectionState::Disconnected);
        self.disconnected.emit(&());
    }

    pub fn handle_closed(&self) {
        if self.state.get() == ConnectionState::Closed {
            return;
        }
        log::info!("connection closed");
        self.state.set(ConnectionState::Closed);
        self.closed.emit(&());
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state.get())
            .finish()
    }
}
