//! # cloudvar-sync — Client-side sync engine for cloud variables and lists
//!
//! Keeps local copies of server-held variables and lists, applies local edits
//! optimistically, batches them for upload, and reconciles them against the
//! authoritative order the server echoes back.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  TransportEvent   ┌──────────────┐
//! │ websocket    │ ────────────────► │ CloudSession │
//! │ (tokio task) │ ◄──────────────── │ (one thread) │
//! └──────────────┘  OutgoingMessage  └──────┬───────┘
//!                                           │
//!                    ┌──────────────────────┼──────────────────────┐
//!                    ▼                      ▼                      ▼
//!             ┌─────────────┐        ┌─────────────┐        ┌─────────────┐
//!             │ public vars │        │ private vars│        │ lists       │
//!             │ DataGroup   │        │ DataGroup   │        │ DataGroup   │
//!             └──────┬──────┘        └─────────────┘        └─────────────┘
//!                    │ per item
//!                    ▼
//!             ┌─────────────────────────────────────┐
//!             │ UpdateManager                        │
//!             │ unuploaded ─► uploading ─► confirmed │
//!             └─────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`signal`] — Synchronous multi-subscriber events
//! - [`config`] — Layered, inheritable runtime configuration
//! - [`command`] — Reversible commands and ordered command groups
//! - [`update`] — Update commands and the per-item update manager
//! - [`data`] — Cloud variables and cloud lists
//! - [`group`] — Per-kind item collections and upload batching
//! - [`connection`] — Connection lifecycle and the outgoing transport seam
//! - [`protocol`] — JSON wire messages
//! - [`session`] — Event routing and timer driving for one connection
//! - [`websocket`] — tokio-tungstenite transport with reconnect

pub mod command;
pub mod config;
pub mod connection;
pub mod data;
pub mod error;
pub mod group;
pub mod protocol;
pub mod session;
pub mod signal;
pub mod update;
pub mod value;
pub mod websocket;

// Re-exports for convenience
pub use command::{RevocableCommand, RevocableCommandGroup};
pub use config::{CloudConfig, ConfigCell, ConfigChange, ConfigLayer, Limits, Timing};
pub use connection::{ChannelTransport, Connection, ConnectionState, Transport};
pub use data::{
    CloudData, CloudList, CloudVariable, DataId, DataInfo, ListOperation, VariableOperation,
};
pub use error::CloudError;
pub use group::{
    DataGroup, GroupProtocol, ListGroup, PrivateVariableGroup, PublicVariableGroup,
    SnapshotState,
};
pub use protocol::{OutgoingMessage, SendMessageKind, ServerMessage, SnapshotPayload};
pub use session::{CloudSession, TransportEvent};
pub use signal::Signal;
pub use update::{Completion, UpdateCommand, UpdateManager, UpdateOperation, ValueChange};
pub use value::CloudValue;
pub use websocket::WebSocketTransport;
