//! Error taxonomy for the sync engine.
//!
//! Per-command failures never surface as `Err` from the call that queued the
//! command: they are delivered through the command's
//! [`Completion`](crate::update::Completion), wrapped in
//! [`CloudError::CommandFailed`] so the message reads outer-to-inner
//! (`"cloud variable score: set to 5 failed: upload timed out"`).

/// All errors produced by the engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CloudError {
    /// The command violates a structural limit and was never queued.
    #[error("illegal operation")]
    IllegalCommand,

    /// No server echo arrived within the configured upload timeout.
    #[error("upload timed out")]
    UploadTimeout,

    /// The upload was rejected or lost without a more specific cause.
    #[error("upload failed")]
    UploadFailed,

    /// The server refused the whole batch the command was part of.
    #[error("update rejected by server: {0}")]
    Rejected(String),

    /// The transport dropped while the command was in flight.
    #[error("connection lost")]
    Disconnected,

    /// The connection was closed for good.
    #[error("connection closed")]
    Closed,

    #[error("{data_type} {index} does not exist")]
    NotFound {
        data_type: &'static str,
        index: String,
    },

    /// A server message (or one item inside it) could not be parsed.
    #[error("malformed {data_type} update: {reason}")]
    MalformedUpdate {
        data_type: &'static str,
        reason: String,
    },

    /// One error per item that failed to parse inside a batch message.
    #[error("failed to update {data_type}: {} item(s) rejected", .errors.len())]
    UpdateErrors {
        data_type: &'static str,
        errors: Vec<CloudError>,
    },

    /// A queued command failed; `command` describes it.
    #[error("{command} failed: {source}")]
    CommandFailed {
        command: String,
        #[source]
        source: Box<CloudError>,
    },

    /// Success/failure was reported but nothing is awaiting an echo.
    #[error("no update command is uploading")]
    NothingUploading,

    /// A whole-batch failure was reported but no batch is outstanding.
    #[error("no upload batch is outstanding")]
    NoPendingBatch,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// The engine dropped the command without settling it.
    #[error("command was dropped before it settled")]
    Abandoned,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CloudError {
    /// The innermost cause, skipping every `CommandFailed` wrapper.
    pub fn root_cause(&self) -> &CloudError {
        match self {
            CloudError::CommandFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for CloudError {
    fn from(e: serde_json::Error) -> Self {
        CloudError::Protocol(e.to_string())
    }
}
