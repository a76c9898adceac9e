//! One connection's worth of engine state.
//!
//! [`CloudSession`] owns the connection context and the three data groups. It
//! turns transport events into engine calls and drives the deadline timers:
//!
//! ```text
//!   transport ──TransportEvent──► CloudSession::handle_event
//!                                   ├─ Opened / Disconnected / Closed ─► Connection signals
//!                                   └─ Received(text) ─► ServerMessage ─► group
//!
//!   run(): select! { next event, sleep_until(next_deadline) ─► poll_timers,
//!                    rescheduled ─► recompute next_deadline }
//! ```

use crate::config::{CloudConfig, ConfigLayer};
use crate::connection::{Connection, ConnectionState, Transport};
use crate::error::CloudError;
use crate::group::{DataGroup, ListGroup, PrivateVariableGroup, PublicVariableGroup};
use crate::protocol::{SendMessageKind, ServerMessage};
use std::fmt;
use std::rc::Rc;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

/// What a transport binding reports to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Received(String),
    Disconnected,
    Closed,
}

pub struct CloudSession {
    connection: Rc<Connection>,
    public_variables: Rc<PublicVariableGroup>,
    private_variables: Rc<PrivateVariableGroup>,
    lists: Rc<ListGroup>,
}

impl CloudSession {
    pub fn new(transport: impl Transport + 'static, config: &CloudConfig) -> Result<Self, CloudError> {
        let connection = Rc::new(Connection::new(Box::new(transport), config)?);
        Ok(Self {
            public_variables: DataGroup::new(connection.clone()),
            private_variables: DataGroup::new(connection.clone()),
            lists: DataGroup::new(connection.clone()),
            connection,
        })
    }

    pub fn connection(&self) -> &Rc<Connection> {
        &self.connection
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Connection-wide configuration, inherited by every group and item.
    pub fn config(&self) -> &ConfigLayer {
        self.connection.config()
    }

    pub fn public_variables(&self) -> &Rc<PublicVariableGroup> {
        &self.public_variables
    }

    pub fn private_variables(&self) -> &Rc<PrivateVariableGroup> {
        &self.private_variables
    }

    pub fn lists(&self) -> &Rc<ListGroup> {
        &self.lists
    }

    pub fn handle_event(&self, event: TransportEvent) -> Result<(), CloudError> {
        match event {
            TransportEvent::Opened => self.connection.handle_opened(),
            TransportEvent::Received(text) => return self.handle_message(&text),
            TransportEvent::Disconnected => self.connection.handle_disconnected(),
            TransportEvent::Closed => self.connection.handle_closed(),
        }
        Ok(())
    }

    /// Decode one server frame and route it to its group.
    pub fn handle_message(&self, text: &str) -> Result<(), CloudError> {
        match ServerMessage::decode(text)? {
            ServerMessage::Snapshot(snapshot) => {
                let errors: Vec<CloudError> = [
                    self.public_variables.update(snapshot.public_variables),
                    self.private_variables.update(snapshot.private_variables),
                    self.lists.update(snapshot.lists),
                ]
                .into_iter()
                .filter_map(Result::err)
                .collect();
                if errors.is_empty() {
                    Ok(())
                } else {
                    Err(CloudError::UpdateErrors {
                        data_type: "snapshot",
                        errors,
                    })
                }
            }
            ServerMessage::PublicVariableUpdate(payload) => {
                self.public_variables.handle_cloud_update(&payload)
            }
            ServerMessage::PrivateVariableUpdate(payload) => {
                self.private_variables.handle_cloud_update(&payload)
            }
            ServerMessage::ListUpdate(payload) => self.lists.handle_cloud_update(&payload),
            ServerMessage::UpdateRejected { kind, reason } => {
                log::warn!("{:?} batch rejected: {}", kind, reason);
                let error = Some(CloudError::Rejected(reason));
                match kind {
                    SendMessageKind::UpdatePublicVariable => {
                        self.public_variables.handle_cloud_update_error(error)
                    }
                    SendMessageKind::UpdatePrivateVariable => {
                        self.private_variables.handle_cloud_update_error(error)
                    }
                    SendMessageKind::UpdateList => self.lists.handle_cloud_update_error(error),
                }
            }
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.public_variables.next_deadline(),
            self.private_variables.next_deadline(),
            self.lists.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub fn poll_timers(&self, now: Instant) {
        self.public_variables.poll_timers(now);
        self.private_variables.poll_timers(now);
        self.lists.poll_timers(now);
    }

    /// Drive the session until the transport closes or `events` ends.
    ///
    /// Runs on the current task; the session is not `Send`.
    pub async fn run(&self, mut events: mpsc::Receiver<TransportEvent>) {
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        self.connection.handle_closed();
                        return;
                    };
                    let closed = event == TransportEvent::Closed;
                    if let Err(e) = self.handle_event(event) {
                        log::warn!("failed to handle server message: {e}");
                    }
                    if closed {
                        return;
                    }
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.poll_timers(Instant::now());
                }
                _ = self.connection.rescheduled() => {}
            }
        }
    }
}

impl fmt::Debug for CloudSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudSession")
            .field("state", &self.connection.state())
            .field("public_variables", &self.public_variables.len())
            .field("private_variables", &self.private_variables.len())
            .field("lists", &self.lists.len())
            .finish()
    }
}
