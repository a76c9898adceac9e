//! Per-item update manager.
//!
//! Owns the two command queues of one data item and decides when they move:
//!
//! ```text
//!  local edit ──► unuploaded ──upload()──► uploading ──echo──► finished
//!                     │                        │
//!                     └──── closed ────────────┴── timeout / disconnect ──► failed
//! ```
//!
//! With local pre-update on, queued commands are applied to the value as soon
//! as they arrive. A server update that does not match the head of
//! `uploading` unwinds that speculative state, applies the server's change,
//! and re-applies whatever is still queued.
//!
//! Timers are deadlines: the owner asks for [`UpdateManager::next_deadline`]
//! and calls [`UpdateManager::poll_timers`] once it has passed.

use crate::command::RevocableCommand;
use crate::config::{ConfigChange, ConfigLayer, Schedule, Timing};
use crate::data::DataId;
use crate::error::CloudError;
use crate::signal::Signal;
use crate::update::command::{
    Completion, DataState, UpdateCommand, UpdateCommandGroup, UpdateOperation, UpdateSource,
};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use tokio::time::Instant;

/// Payload of [`UpdateManager::changed`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange<V> {
    pub original: V,
    pub new: V,
}

/// Inputs fixed for the duration of one engine step.
struct Step {
    now: Instant,
    schedule: Schedule,
}

struct ManagerState<O: UpdateOperation> {
    target: Rc<DataId>,
    data: DataState<O::Value>,
    unuploaded: UpdateCommandGroup<O>,
    uploading: UpdateCommandGroup<O>,
    /// Upload instant of each `uploading` command, same order.
    uploading_since: VecDeque<Instant>,
    first_unuploaded_at: Option<Instant>,
    last_upload_at: Option<Instant>,
    upload_at: Option<Instant>,
    upload_requested: bool,
    /// Set once the connection closed; later local commands fail at once.
    closed: bool,
}

pub struct UpdateManager<O: UpdateOperation> {
    target: Rc<DataId>,
    config: Rc<ConfigLayer>,
    state: RefCell<ManagerState<O>>,
    paused: Cell<bool>,
    paused_commands: RefCell<Vec<UpdateCommand<O>>>,
    /// Fired when the pending commands should be collected by [`upload`](Self::upload).
    pub needed_to_upload: Signal<()>,
    /// Fired after any step that changed the local value.
    pub changed: Signal<ValueChange<O::Value>>,
    /// Fired when [`next_deadline`](Self::next_deadline) moved.
    pub rescheduled: Signal<Option<Instant>>,
}

impl<O: UpdateOperation> UpdateManager<O> {
    pub fn new(target: Rc<DataId>, config: Rc<ConfigLayer>, value: O::Value) -> Rc<Self> {
        let manager = Rc::new(Self {
            state: RefCell::new(ManagerState {
                target: target.clone(),
                data: DataState::new(value, config.limits()),
                unuploaded: UpdateCommandGroup::new(),
                uploading: UpdateCommandGroup::new(),
                uploading_since: VecDeque::new(),
                first_unuploaded_at: None,
                last_upload_at: None,
                upload_at: None,
                upload_requested: false,
                closed: false,
            }),
            target,
            config,
            paused: Cell::new(false),
            paused_commands: RefCell::new(Vec::new()),
            needed_to_upload: Signal::new(),
            changed: Signal::new(),
            rescheduled: Signal::new(),
        });

        for cell in [&manager.config.cache_time, &manager.config.upload_interval] {
            let weak = Rc::downgrade(&manager);
            cell.changed.connect(move |_: &ConfigChange<Timing>| {
                if let Some(manager) = weak.upgrade() {
                    manager.handle_schedule_changed();
                }
            });
        }
        let weak = Rc::downgrade(&manager);
        manager
            .config
            .local_preupdate
            .changed
            .connect(move |change: &ConfigChange<bool>| {
                if let Some(manager) = weak.upgrade() {
                    manager.handle_local_preupdate_changed(change.new);
                }
            });
        let weak = Rc::downgrade(&manager);
        manager
            .config
            .upload_timeout
            .changed
            .connect(move |_: &ConfigChange<Timing>| {
                if let Some(manager) = weak.upgrade() {
                    manager.rescheduled.emit(&manager.next_deadline());
                }
            });
        manager
    }

    pub fn target(&self) -> &Rc<DataId> {
        &self.target
    }

    pub fn value(&self) -> O::Value {
        self.state.borrow().data.value.clone()
    }

    /// Borrow the current value without cloning it.
    pub fn read<R>(&self, f: impl FnOnce(&O::Value) -> R) -> R {
        f(&self.state.borrow().data.value)
    }

    pub fn unuploaded_len(&self) -> usize {
        self.state.borrow().unuploaded.len()
    }

    pub fn uploading_len(&self) -> usize {
        self.state.borrow().uploading.len()
    }

    /// Queue a local mutation.
    pub fn submit(&self, operation: O) -> Completion {
        let (command, completion) = UpdateCommand::local(self.target.clone(), operation);
        self.add_command(command);
        completion
    }

    /// Feed one mutation reported by the server.
    pub fn apply_cloud(&self, operation: O) {
        self.add_command(UpdateCommand::cloud(self.target.clone(), operation));
    }

    pub fn add_command(&self, command: UpdateCommand<O>) {
        if self.paused.get() {
            log::trace!("{} buffered while paused: {}", self.target.cvid, command);
            self.paused_commands.borrow_mut().push(command);
            return;
        }
        self.run(|state, step| match command.source() {
            UpdateSource::Local => state.handle_local(step, command),
            UpdateSource::Cloud => state.handle_cloud(step, command),
        });
    }

    /// Move every unuploaded command to `uploading` and return their wire
    /// descriptors, in order.
    pub fn upload(&self) -> Result<Vec<serde_json::Value>, CloudError> {
        self.run(|state, step| state.upload(step))
    }

    /// The server confirmed the oldest uploading command.
    pub fn handle_uploading_success(&self) -> Result<(), CloudError> {
        self.run(|state, step| state.uploading_success(step))
    }

    /// The oldest uploading command failed; `None` reports a generic failure.
    pub fn handle_uploading_error(&self, error: Option<CloudError>) -> Result<(), CloudError> {
        self.run(|state, step| state.uploading_error(step, error))
    }

    /// The last `count` uploaded commands never reached the server.
    pub fn handle_unsent(&self, count: usize, error: CloudError) {
        self.run(|state, step| state.unsent(step, count, error));
    }

    /// Earliest instant at which [`poll_timers`](Self::poll_timers) has work.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.state
            .borrow()
            .deadline(self.config.upload_timeout.value())
    }

    /// Fire the upload timer and expire uploads whose echo is overdue.
    pub fn poll_timers(&self, now: Instant) {
        self.run_at(now, |state, step| {
            if state.upload_at.is_some_and(|at| at <= now) {
                state.upload_at = None;
                state.upload_requested = true;
            }
            if let Some(timeout) = active_timeout(step.schedule.upload_timeout) {
                let expired = state
                    .uploading_since
                    .iter()
                    .take_while(|since| **since + timeout <= now)
                    .count();
                for _ in 0..expired {
                    log::warn!("{}: upload timed out after {:?}", state.describe(), timeout);
                    // `expired` never exceeds the queue length.
                    let _ = state.uploading_error(step, Some(CloudError::UploadTimeout));
                }
            }
        });
    }

    pub fn handle_opened(&self) {
        self.run(|state, step| state.schedule_upload(step));
    }

    /// Fail everything in flight; queued commands wait for the next open.
    pub fn handle_disconnected(&self) {
        self.run(|state, step| {
            state.upload_at = None;
            let preupdate = step.schedule.local_preupdate;
            if preupdate {
                state.revoke_local();
            }
            for mut command in state.uploading.take() {
                command.fail(CloudError::Disconnected);
            }
            state.uploading_since.clear();
            if preupdate {
                state.redo_local();
            }
        });
    }

    /// Fail every command and unwind to the last confirmed value.
    pub fn handle_closed(&self) {
        self.run(|state, step| {
            state.closed = true;
            state.upload_at = None;
            if step.schedule.local_preupdate {
                state.revoke_local();
            }
            for mut command in state.uploading.take() {
                command.fail(CloudError::Closed);
            }
            for mut command in state.unuploaded.take() {
                command.fail(CloudError::Closed);
            }
            state.uploading_since.clear();
            state.first_unuploaded_at = None;
        });
    }

    pub fn handle_schedule_changed(&self) {
        self.run(|state, step| state.schedule_upload(step));
    }

    pub fn handle_local_preupdate_changed(&self, enabled: bool) {
        self.run(|state, _| {
            if enabled {
                state.redo_local();
            } else {
                state.revoke_local();
            }
        });
    }

    fn run<R>(&self, f: impl FnOnce(&mut ManagerState<O>, &Step) -> R) -> R {
        self.run_at(Instant::now(), f)
    }

    /// One engine step: mutate the state, then notify with every borrow
    /// released, then replay commands that arrived in the meantime.
    fn run_at<R>(&self, now: Instant, f: impl FnOnce(&mut ManagerState<O>, &Step) -> R) -> R {
        let step = Step {
            now,
            schedule: self.config.schedule(),
        };
        let outermost = !self.paused.replace(true);

        let (result, change, deadline, upload) = {
            let mut state = self.state.borrow_mut();
            state.data.limits = self.config.limits();
            let original = state.data.value.clone();
            let timeout = step.schedule.upload_timeout;
            let original_deadline = state.deadline(timeout);
            let result = f(&mut state, &step);
            let change = (state.data.value != original).then(|| ValueChange {
                original,
                new: state.data.value.clone(),
            });
            let deadline = state.deadline(timeout);
            let deadline = (deadline != original_deadline).then_some(deadline);
            (result, change, deadline, std::mem::take(&mut state.upload_requested))
        };

        if let Some(change) = change {
            self.changed.emit(&change);
        }
        if let Some(deadline) = deadline {
            self.rescheduled.emit(&deadline);
        }
        if upload {
            self.needed_to_upload.emit(&());
        }

        if outermost {
            self.paused.set(false);
            let buffered = std::mem::take(&mut *self.paused_commands.borrow_mut());
            for command in buffered {
                self.add_command(command);
            }
        }
        result
    }
}

/// Timeout of zero or disabled means "never".
fn active_timeout(timing: Timing) -> Option<std::time::Duration> {
    timing.duration().filter(|d| !d.is_zero())
}

impl<O: UpdateOperation> ManagerState<O> {
    fn describe(&self) -> String {
        format!("{} {}", O::DATA_TYPE_NAME, self.target.name)
    }

    fn deadline(&self, upload_timeout: Timing) -> Option<Instant> {
        let timeout = active_timeout(upload_timeout)
            .and_then(|timeout| self.uploading_since.front().map(|since| *since + timeout));
        match (self.upload_at, timeout) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn handle_local(&mut self, step: &Step, mut command: UpdateCommand<O>) {
        log::trace!("local command: {}", command);
        if self.closed {
            command.fail(CloudError::Closed);
            return;
        }
        if !command.is_legal(&self.data.limits) {
            command.fail(CloudError::IllegalCommand);
            return;
        }
        let preupdate = step.schedule.local_preupdate;
        if preupdate {
            if !command.is_effective(&self.data) {
                command.finish();
                return;
            }
            command.execute(&mut self.data);
        }
        self.unuploaded.push(command);
        if preupdate {
            self.unuploaded.remove_back_ineffective(&self.data);
        }
        if self.first_unuploaded_at.is_none() {
            self.first_unuploaded_at = Some(step.now);
            self.schedule_upload(step);
        }
        self.clear_schedule_if_idle();
    }

    fn handle_cloud(&mut self, step: &Step, mut command: UpdateCommand<O>) {
        log::trace!("cloud command: {}", command);
        let preupdate = step.schedule.local_preupdate;
        let head_matches = self.uploading.first().map(|head| head.matches(&command));
        match head_matches {
            Some(true) => {
                let Some(mut head) = self.uploading.shift() else {
                    return;
                };
                self.uploading_since.pop_front();
                if !preupdate {
                    head.execute(&mut self.data);
                    let pruned = self.uploading.remove_front_ineffective(&self.data);
                    for _ in 0..pruned {
                        self.uploading_since.pop_front();
                    }
                }
                head.finish();
            }
            Some(false) if preupdate => {
                self.revoke_local();
                self.apply_foreign(&mut command);
                self.redo_local();
            }
            // Nothing in flight, but queued edits are applied on top of the
            // confirmed value; rebase them onto the new one.
            None if preupdate && !self.unuploaded.is_empty() => {
                self.revoke_local();
                self.apply_foreign(&mut command);
                self.redo_local();
            }
            _ => self.apply_foreign(&mut command),
        }
    }

    fn apply_foreign(&mut self, command: &mut UpdateCommand<O>) {
        if command.is_legal(&self.data.limits) && command.is_effective(&self.data) {
            command.execute(&mut self.data);
        }
    }

    fn revoke_local(&mut self) {
        self.unuploaded.revoke(&mut self.data);
        self.uploading.revoke(&mut self.data);
    }

    fn redo_local(&mut self) {
        self.uploading.execute(&mut self.data);
        let pruned = self.uploading.remove_back_ineffective(&self.data);
        let keep = self.uploading_since.len().saturating_sub(pruned);
        self.uploading_since.truncate(keep);
        self.unuploaded.execute(&mut self.data);
        self.unuploaded.remove_back_ineffective(&self.data);
        self.clear_schedule_if_idle();
    }

    fn clear_schedule_if_idle(&mut self) {
        if self.unuploaded.is_empty() && self.first_unuploaded_at.is_some() {
            self.first_unuploaded_at = None;
            self.upload_at = None;
            self.upload_requested = false;
        }
    }

    fn schedule_upload(&mut self, step: &Step) {
        self.upload_at = None;
        let Some(first) = self.first_unuploaded_at else {
            return;
        };
        let cache_time = step.schedule.cache_time;
        let upload_interval = step.schedule.upload_interval;
        let cache_deadline = first + cache_time.or_zero();
        let interval_deadline = self
            .last_upload_at
            .map(|last| last + upload_interval.or_zero());
        let interval_elapsed = interval_deadline.map_or(true, |at| at < step.now);

        let immediate = match (cache_time, upload_interval) {
            (Timing::Disabled, Timing::Disabled) => true,
            (Timing::Disabled, _) => interval_elapsed,
            (_, Timing::Disabled) => cache_deadline < step.now,
            _ => false,
        };
        if immediate {
            self.upload_requested = true;
        } else {
            let at = interval_deadline.map_or(cache_deadline, |at| at.max(cache_deadline));
            log::debug!(
                "{}: upload deferred by {:?}",
                self.describe(),
                at.saturating_duration_since(step.now)
            );
            self.upload_at = Some(at);
        }
    }

    fn upload(&mut self, step: &Step) -> Result<Vec<serde_json::Value>, CloudError> {
        let descriptors = self.unuploaded.to_cloud_json(&self.data.limits)?;
        if descriptors.len() != self.unuploaded.len() {
            // Limits were tightened after these commands were queued.
            self.drop_illegal_unuploaded(step);
        }

        self.upload_at = None;
        self.upload_requested = false;
        self.first_unuploaded_at = None;
        self.last_upload_at = Some(step.now);
        let mut batch = self.unuploaded.take();
        self.uploading_since
            .extend(std::iter::repeat(step.now).take(batch.len()));
        self.uploading.append(&mut batch);
        Ok(descriptors)
    }

    fn drop_illegal_unuploaded(&mut self, step: &Step) {
        let preupdate = step.schedule.local_preupdate;
        if preupdate {
            self.revoke_local();
        }
        let limits = self.data.limits;
        let mut kept = UpdateCommandGroup::new();
        for mut command in self.unuploaded.take() {
            if command.is_legal(&limits) {
                kept.push(command);
            } else {
                command.fail(CloudError::IllegalCommand);
            }
        }
        self.unuploaded = kept;
        if preupdate {
            self.redo_local();
        }
    }

    fn uploading_success(&mut self, step: &Step) -> Result<(), CloudError> {
        let mut head = self.uploading.shift().ok_or(CloudError::NothingUploading)?;
        self.uploading_since.pop_front();
        if !step.schedule.local_preupdate {
            head.execute(&mut self.data);
        }
        head.finish();
        Ok(())
    }

    fn unsent(&mut self, step: &Step, count: usize, error: CloudError) {
        let preupdate = step.schedule.local_preupdate;
        if preupdate {
            self.revoke_local();
        }
        let mut unsent = Vec::with_capacity(count);
        for _ in 0..count {
            let Some(command) = self.uploading.pop() else {
                break;
            };
            self.uploading_since.pop_back();
            unsent.push(command);
        }
        if preupdate {
            self.redo_local();
        }
        for mut command in unsent.into_iter().rev() {
            command.fail(error.clone());
        }
    }

    fn uploading_error(&mut self, step: &Step, error: Option<CloudError>) -> Result<(), CloudError> {
        let mut head = self.uploading.shift().ok_or(CloudError::NothingUploading)?;
        self.uploading_since.pop_front();
        if step.schedule.local_preupdate {
            self.revoke_local();
            head.revoke(&mut self.data);
            self.redo_local();
        }
        head.fail(error.unwrap_or(CloudError::UploadFailed));
        Ok(())
    }
}
