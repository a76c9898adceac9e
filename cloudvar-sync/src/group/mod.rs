//! Data groups: the set of items of one kind on one connection.
//!
//! A group batches the pending commands of all of its items into a single
//! frame and routes each server update back to the item it names:
//!
//! ```text
//!            needed_to_upload (any item)
//!                     │
//!                     ▼
//!   ┌─────────────────────────────────┐  one frame   ┌────────┐
//!   │ DataGroup::handle_upload        │ ───────────► │ server │
//!   │   item.upload() for every item  │              └───┬────┘
//!   │   record per-item counts        │                  │ echo / foreign update
//!   └─────────────────────────────────┘                  ▼
//!   ┌─────────────────────────────────┐
//!   │ DataGroup::handle_cloud_update  │ ──► item.apply_cloud(op), item order
//!   └─────────────────────────────────┘
//! ```
//!
//! The recorded counts let a refused batch be unwound exactly: the oldest
//! record says how many commands each item had in it.

pub mod list;
pub mod variable;

use crate::config::{CloudConfig, ConfigLayer};
use crate::connection::Connection;
use crate::data::{CloudData, DataId, DataInfo};
use crate::error::CloudError;
use crate::protocol::SendMessageKind;
use crate::update::UpdateOperation;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};
use tokio::sync::watch;
use tokio::time::Instant;

pub use list::{ListGroup, Lists};
pub use variable::{PrivateVariableGroup, PrivateVariables, PublicVariableGroup, PublicVariables};

/// Per-item commands decoded from one server update, plus whatever could not
/// be decoded.
#[derive(Debug)]
pub struct DecodedUpdate<O> {
    /// `(cvid, operations)` in the order the message lists them.
    pub commands: Vec<(String, Vec<O>)>,
    pub errors: Vec<CloudError>,
}

impl<O> DecodedUpdate<O> {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Append `operation` to the entry for `cvid`, keeping first-seen order.
    pub fn push(&mut self, cvid: &str, operation: O) {
        match self.commands.iter_mut().find(|(id, _)| id == cvid) {
            Some((_, operations)) => operations.push(operation),
            None => self.commands.push((cvid.to_owned(), vec![operation])),
        }
    }
}

impl<O> Default for DecodedUpdate<O> {
    fn default() -> Self {
        Self::new()
    }
}

/// Wire shape and defaults of one kind of group.
pub trait GroupProtocol: 'static {
    type Operation: UpdateOperation;

    const DATA_TYPE_NAME: &'static str;
    const UPLOAD_KIND: SendMessageKind;

    /// Overrides applied at the group layer.
    fn default_config() -> CloudConfig {
        CloudConfig::default()
    }

    /// Build the upload payload from `(cvid, descriptors)` in item order.
    fn encode_upload(batch: Vec<(String, Vec<serde_json::Value>)>) -> serde_json::Value;

    /// Split a server update into per-item operations.
    ///
    /// `Err` means the payload as a whole is unusable; problems with single
    /// entries are reported in [`DecodedUpdate::errors`] instead.
    fn decode_update(
        payload: &serde_json::Value,
    ) -> Result<DecodedUpdate<Self::Operation>, CloudError>;
}

/// Whether the first snapshot has arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotState {
    Pending,
    Ready,
    Closed,
}

type Item<P> = Rc<CloudData<<P as GroupProtocol>::Operation>>;
type ValueOf<P> = <<P as GroupProtocol>::Operation as UpdateOperation>::Value;

pub struct DataGroup<P: GroupProtocol> {
    connection: Rc<Connection>,
    config: ConfigLayer,
    items: RefCell<Vec<Item<P>>>,
    by_cvid: RefCell<HashMap<String, Item<P>>>,
    by_name: RefCell<HashMap<String, Item<P>>>,
    /// Per-item command counts of each batch still awaiting its echo.
    upload_counts: RefCell<VecDeque<Vec<usize>>>,
    snapshot: watch::Sender<SnapshotState>,
    weak_self: Weak<Self>,
}

impl<P: GroupProtocol> DataGroup<P> {
    pub fn new(connection: Rc<Connection>) -> Rc<Self> {
        let group = Rc::new_cyclic(|weak_self: &Weak<Self>| Self {
            config: connection.config().child(&P::default_config()),
            connection: connection.clone(),
            items: RefCell::new(Vec::new()),
            by_cvid: RefCell::new(HashMap::new()),
            by_name: RefCell::new(HashMap::new()),
            upload_counts: RefCell::new(VecDeque::new()),
            snapshot: watch::Sender::new(SnapshotState::Pending),
            weak_self: weak_self.clone(),
        });

        let weak = Rc::downgrade(&group);
        connection.opened.connect(move |_| {
            if let Some(group) = weak.upgrade() {
                group.handle_opened();
            }
        });
        let weak = Rc::downgrade(&group);
        connection.disconnected.connect(move |_| {
            if let Some(group) = weak.upgrade() {
                group.handle_disconnected();
            }
        });
        let weak = Rc::downgrade(&group);
        connection.closed.connect(move |_| {
            if let Some(group) = weak.upgrade() {
                group.handle_closed();
            }
        });
        group
    }

    /// Group-level configuration; unset cells inherit from the connection.
    pub fn config(&self) -> &ConfigLayer {
        &self.config
    }

    pub fn snapshot_state(&self) -> SnapshotState {
        *self.snapshot.borrow()
    }

    /// Look up an item by name or cvid, waiting for the first snapshot.
    pub async fn get(&self, index: &str) -> Result<Item<P>, CloudError> {
        self.wait_snapshot().await?;
        self.try_get(index).ok_or_else(|| CloudError::NotFound {
            data_type: P::DATA_TYPE_NAME,
            index: index.to_owned(),
        })
    }

    /// Every item, in creation order, once the first snapshot has arrived.
    pub async fn get_all(&self) -> Result<Vec<Item<P>>, CloudError> {
        self.wait_snapshot().await?;
        Ok(self.items())
    }

    /// Look up an item without waiting. Cvids take precedence over names.
    pub fn try_get(&self, index: &str) -> Option<Item<P>> {
        if let Some(item) = self.by_cvid.borrow().get(index) {
            return Some(item.clone());
        }
        self.by_name.borrow().get(index).cloned()
    }

    /// Look up an item by name only.
    pub fn try_get_by_name(&self, name: &str) -> Option<Item<P>> {
        self.by_name.borrow().get(name).cloned()
    }

    pub fn items(&self) -> Vec<Item<P>> {
        self.items.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    /// Number of uploaded batches still awaiting a server response.
    pub fn pending_batches(&self) -> usize {
        self.upload_counts.borrow().len()
    }

    async fn wait_snapshot(&self) -> Result<(), CloudError> {
        let mut rx = self.snapshot.subscribe();
        let state = *rx
            .wait_for(|state| *state != SnapshotState::Pending)
            .await
            .map_err(|_| CloudError::Closed)?;
        match state {
            SnapshotState::Ready => Ok(()),
            SnapshotState::Pending | SnapshotState::Closed => Err(CloudError::Closed),
        }
    }

    /// Apply a full snapshot: create unseen items, refresh known ones, and
    /// wake everyone waiting in [`get`](Self::get).
    pub fn update(&self, snapshot: Vec<DataInfo>) -> Result<(), CloudError> {
        let mut errors = Vec::new();
        for info in snapshot {
            let value: ValueOf<P> = match serde_json::from_value(info.value) {
                Ok(value) => value,
                Err(e) => {
                    errors.push(CloudError::MalformedUpdate {
                        data_type: P::DATA_TYPE_NAME,
                        reason: format!("{}: {e}", info.cvid),
                    });
                    continue;
                }
            };
            match self.try_get(&info.cvid) {
                Some(item) => item.apply_snapshot(value),
                None => {
                    self.create_item(DataId::new(info.cvid, info.name), value, true);
                }
            }
        }
        log::info!("{} snapshot: {} item(s)", P::DATA_TYPE_NAME, self.len());
        self.snapshot.send_replace(SnapshotState::Ready);
        into_result(P::DATA_TYPE_NAME, errors)
    }

    /// `named` is false for items only known by cvid; those are not
    /// reachable by name.
    fn create_item(&self, id: DataId, value: ValueOf<P>, named: bool) -> Item<P> {
        let item = Rc::new(CloudData::new(id, &self.config, value));
        let weak = self.weak_self.clone();
        item.manager().needed_to_upload.connect(move |_| {
            if let Some(group) = weak.upgrade() {
                group.handle_upload();
            }
        });
        let weak = self.weak_self.clone();
        item.manager().rescheduled.connect(move |_| {
            if let Some(group) = weak.upgrade() {
                group.connection.reschedule();
            }
        });
        self.items.borrow_mut().push(item.clone());
        self.by_cvid
            .borrow_mut()
            .insert(item.cvid().to_owned(), item.clone());
        if named {
            self.by_name
                .borrow_mut()
                .insert(item.name().to_owned(), item.clone());
        }
        item
    }

    /// Collect every item's pending commands into one frame and send it.
    pub fn handle_upload(&self) {
        if !self.connection.is_open() {
            log::debug!("{}: upload deferred until the connection opens", P::DATA_TYPE_NAME);
            return;
        }
        let items = self.items();
        let mut counts = Vec::with_capacity(items.len());
        let mut batch = Vec::new();
        for item in &items {
            match item.manager().upload() {
                Ok(descriptors) => {
                    counts.push(descriptors.len());
                    if !descriptors.is_empty() {
                        batch.push((item.cvid().to_owned(), descriptors));
                    }
                }
                Err(e) => {
                    log::error!("{} {}: cannot encode upload: {e}", P::DATA_TYPE_NAME, item.id());
                    counts.push(0);
                }
            }
        }
        let total: usize = counts.iter().sum();
        if total == 0 {
            return;
        }
        log::debug!("{}: uploading {} command(s)", P::DATA_TYPE_NAME, total);
        self.upload_counts.borrow_mut().push_back(counts);
        if let Err(e) = self
            .connection
            .send(P::UPLOAD_KIND, P::encode_upload(batch))
        {
            log::error!("{}: upload failed: {e}", P::DATA_TYPE_NAME);
            // Only this batch is affected; older ones may still be echoed.
            let counts = self.upload_counts.borrow_mut().pop_back().unwrap_or_default();
            for (item, count) in items.iter().zip(counts) {
                if count > 0 {
                    item.manager().handle_unsent(count, e.clone());
                }
            }
        }
    }

    /// Route one server update to the items it names.
    pub fn handle_cloud_update(&self, payload: &serde_json::Value) -> Result<(), CloudError> {
        let decoded = match P::decode_update(payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                log::warn!("{}: discarding malformed update: {e}", P::DATA_TYPE_NAME);
                let _ = self.handle_cloud_update_error(None);
                return Err(e);
            }
        };

        let mut by_cvid: HashMap<String, Vec<P::Operation>> = HashMap::new();
        for (cvid, operations) in decoded.commands {
            if self.try_get(&cvid).is_none() {
                self.create_item(
                    DataId::new(cvid.clone(), cvid.clone()),
                    ValueOf::<P>::default(),
                    false,
                );
            }
            by_cvid.entry(cvid).or_default().extend(operations);
        }
        for item in self.items() {
            if let Some(operations) = by_cvid.remove(item.cvid()) {
                for operation in operations {
                    item.manager().apply_cloud(operation);
                }
            }
        }
        self.upload_counts.borrow_mut().pop_front();

        if !decoded.errors.is_empty() {
            log::warn!(
                "{}: {} malformed item(s) in update",
                P::DATA_TYPE_NAME,
                decoded.errors.len()
            );
        }
        into_result(P::DATA_TYPE_NAME, decoded.errors)
    }

    /// The oldest outstanding batch failed as a whole.
    pub fn handle_cloud_update_error(&self, error: Option<CloudError>) -> Result<(), CloudError> {
        let counts = self
            .upload_counts
            .borrow_mut()
            .pop_front()
            .ok_or(CloudError::NoPendingBatch)?;
        for (item, count) in self.items().iter().zip(counts) {
            for _ in 0..count {
                if let Err(e) = item.manager().handle_uploading_error(error.clone()) {
                    log::warn!("{} {}: {e}", P::DATA_TYPE_NAME, item.id());
                    break;
                }
            }
        }
        Ok(())
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.items()
            .iter()
            .filter_map(|item| item.manager().next_deadline())
            .min()
    }

    pub fn poll_timers(&self, now: Instant) {
        for item in self.items() {
            item.manager().poll_timers(now);
        }
    }

    fn handle_opened(&self) {
        for item in self.items() {
            item.manager().handle_opened();
        }
    }

    fn handle_disconnected(&self) {
        self.upload_counts.borrow_mut().clear();
        for item in self.items() {
            item.manager().handle_disconnected();
        }
    }

    fn handle_closed(&self) {
        self.upload_counts.borrow_mut().clear();
        for item in self.items() {
            item.manager().handle_closed();
        }
        self.snapshot.send_if_modified(|state| {
            if *state == SnapshotState::Pending {
                *state = SnapshotState::Closed;
                true
            } else {
                false
            }
        });
    }
}

fn into_result(data_type: &'static str, errors: Vec<CloudError>) -> Result<(), CloudError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(CloudError::UpdateErrors { data_type, errors })
    }
}
