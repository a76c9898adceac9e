//! Update commands: one intended mutation of one data item.

use crate::command::{RevocableCommand, RevocableCommandGroup};
use crate::config::Limits;
use crate::data::DataId;
use crate::error::CloudError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

/// Where a command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    Local,
    Cloud,
}

impl fmt::Display for UpdateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateSource::Local => f.write_str("local"),
            UpdateSource::Cloud => f.write_str("cloud"),
        }
    }
}

/// The value a command acts on, together with the limits in force.
#[derive(Debug, Clone, PartialEq)]
pub struct DataState<V> {
    pub value: V,
    pub limits: Limits,
}

impl<V> DataState<V> {
    pub fn new(value: V, limits: Limits) -> Self {
        Self { value, limits }
    }
}

/// The concrete mutation carried by an [`UpdateCommand`].
///
/// Two operations compare equal exactly when their wire descriptors do; that
/// equality is what matches a server echo against the command we sent.
pub trait UpdateOperation:
    Clone + PartialEq + fmt::Debug + fmt::Display + Serialize + DeserializeOwned + 'static
{
    type Value: Clone + PartialEq + fmt::Debug + Default + DeserializeOwned + 'static;
    /// Whatever `revert` needs to undo one `apply`.
    type Undo: fmt::Debug;

    /// Noun used in log lines and error messages, e.g. `"cloud list"`.
    const DATA_TYPE_NAME: &'static str;

    fn apply(&self, state: &mut DataState<Self::Value>) -> Self::Undo;
    fn revert(&self, state: &mut DataState<Self::Value>, undo: Self::Undo);

    /// Whether `apply` would change `state`.
    fn would_change(&self, state: &DataState<Self::Value>) -> bool;
    /// Whether the `apply` that produced `undo` changed anything.
    fn changed(&self, undo: &Self::Undo) -> bool;
    /// Structural validity; independent of the current value.
    fn is_legal(&self, limits: &Limits) -> bool;

    /// Operation that overwrites the whole value, used for snapshot refreshes.
    fn replace_all(value: Self::Value) -> Self;
}

type Sender = oneshot::Sender<Result<(), CloudError>>;

/// One queued mutation and its completion promise.
pub struct UpdateCommand<O: UpdateOperation> {
    source: UpdateSource,
    target: Rc<DataId>,
    operation: O,
    undo: Option<O::Undo>,
    completion: Option<Sender>,
}

impl<O: UpdateOperation> UpdateCommand<O> {
    /// A command issued by local code; the returned [`Completion`] settles
    /// once the command is confirmed or has failed.
    pub fn local(target: Rc<DataId>, operation: O) -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();
        let command = Self {
            source: UpdateSource::Local,
            target,
            operation,
            undo: None,
            completion: Some(tx),
        };
        (command, Completion::new(rx))
    }

    /// A command received from the server. Nothing awaits it.
    pub fn cloud(target: Rc<DataId>, operation: O) -> Self {
        Self {
            source: UpdateSource::Cloud,
            target,
            operation,
            undo: None,
            completion: None,
        }
    }

    pub fn source(&self) -> UpdateSource {
        self.source
    }

    pub fn target(&self) -> &DataId {
        &self.target
    }

    pub fn operation(&self) -> &O {
        &self.operation
    }

    /// Whether the command is currently applied to the value.
    pub fn is_executed(&self) -> bool {
        self.undo.is_some()
    }

    pub fn is_legal(&self, limits: &Limits) -> bool {
        self.operation.is_legal(limits)
    }

    /// Whether the command changes (or, if applied, changed) the value.
    pub fn is_effective(&self, state: &DataState<O::Value>) -> bool {
        match &self.undo {
            Some(undo) => self.operation.changed(undo),
            None => self.operation.would_change(state),
        }
    }

    /// Same mutation as `other`, regardless of source.
    pub fn matches(&self, other: &Self) -> bool {
        self.operation == other.operation
    }

    pub fn is_settled(&self) -> bool {
        self.source == UpdateSource::Local && self.completion.is_none()
    }

    pub fn finish(&mut self) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(Ok(()));
        }
    }

    /// Fail the command; the error is prefixed with the command's description.
    pub fn fail(&mut self, error: CloudError) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(Err(CloudError::CommandFailed {
                command: self.to_string(),
                source: Box::new(error),
            }));
        }
    }
}

impl<O: UpdateOperation> RevocableCommand for UpdateCommand<O> {
    type Target = DataState<O::Value>;

    fn execute(&mut self, target: &mut Self::Target) {
        if self.undo.is_none() {
            self.undo = Some(self.operation.apply(target));
        }
    }

    fn revoke(&mut self, target: &mut Self::Target) {
        if let Some(undo) = self.undo.take() {
            self.operation.revert(target, undo);
        }
    }
}

impl<O: UpdateOperation> fmt::Display for UpdateCommand<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {}",
            O::DATA_TYPE_NAME,
            self.target.name,
            self.operation
        )
    }
}

impl<O: UpdateOperation> fmt::Debug for UpdateCommand<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateCommand")
            .field("source", &self.source)
            .field("target", &self.target.cvid)
            .field("operation", &self.operation)
            .field("executed", &self.is_executed())
            .finish()
    }
}

pub type UpdateCommandGroup<O> = RevocableCommandGroup<UpdateCommand<O>>;

impl<O: UpdateOperation> RevocableCommandGroup<UpdateCommand<O>> {
    /// Drop and finish leading commands that no longer change anything.
    pub fn remove_front_ineffective(&mut self, state: &DataState<O::Value>) -> usize {
        let mut count = 0;
        while self.first().is_some_and(|c| !c.is_effective(state)) {
            if let Some(mut command) = self.shift() {
                command.finish();
                count += 1;
            }
        }
        count
    }

    /// Drop and finish trailing commands that no longer change anything.
    pub fn remove_back_ineffective(&mut self, state: &DataState<O::Value>) -> usize {
        let mut count = 0;
        while self.last().is_some_and(|c| !c.is_effective(state)) {
            if let Some(mut command) = self.pop() {
                command.finish();
                count += 1;
            }
        }
        count
    }

    /// Wire descriptors of the legal commands, in order.
    pub fn to_cloud_json(&self, limits: &Limits) -> Result<Vec<serde_json::Value>, CloudError> {
        self.iter()
            .filter(|c| c.is_legal(limits))
            .map(|c| Ok(serde_json::to_value(c.operation())?))
            .collect()
    }
}

/// Resolves when an update command is confirmed or fails.
#[must_use = "a completion does nothing unless awaited or polled"]
pub struct Completion {
    rx: oneshot::Receiver<Result<(), CloudError>>,
    settled: Option<Result<(), CloudError>>,
}

impl Completion {
    fn new(rx: oneshot::Receiver<Result<(), CloudError>>) -> Self {
        Self { rx, settled: None }
    }

    /// The outcome, if the command has already settled.
    pub fn try_result(&mut self) -> Option<Result<(), CloudError>> {
        if self.settled.is_none() {
            self.settled = match self.rx.try_recv() {
                Ok(result) => Some(result),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Closed) => Some(Err(CloudError::Abandoned)),
            };
        }
        self.settled.clone()
    }

    pub fn is_settled(&mut self) -> bool {
        self.try_result().is_some()
    }
}

impl Future for Completion {
    type Output = Result<(), CloudError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(result) = &self.settled {
            return Poll::Ready(result.clone());
        }
        let result = match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => result,
            Poll::Ready(Err(_)) => Err(CloudError::Abandoned),
            Poll::Pending => return Poll::Pending,
        };
        self.settled = Some(result.clone());
        Poll::Ready(result)
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("settled", &self.settled)
            .finish()
    }
}
