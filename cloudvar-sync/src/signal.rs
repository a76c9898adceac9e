//! Minimal typed publish/subscribe.
//!
//! A [`Signal`] holds any number of slots and calls them synchronously, in
//! subscription order, every time it is emitted. The slot list is snapshotted
//! before dispatch, so a slot may connect or disconnect other slots (or
//! itself) while the signal is being emitted.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Handle returned by [`Signal::connect`], used to disconnect a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

type Slot<T> = Rc<dyn Fn(&T)>;

/// Single-threaded signal with synchronous emission.
pub struct Signal<T> {
    slots: RefCell<Vec<(SlotId, Slot<T>)>>,
    next_id: Cell<u64>,
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self {
            slots: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
        }
    }

    /// Subscribe a slot. It stays connected until [`disconnect`](Self::disconnect)
    /// is called or the signal is dropped.
    pub fn connect(&self, slot: impl Fn(&T) + 'static) -> SlotId {
        let id = SlotId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.slots.borrow_mut().push((id, Rc::new(slot)));
        id
    }

    /// Remove a slot. Returns `false` if it was not connected.
    pub fn disconnect(&self, id: SlotId) -> bool {
        let mut slots = self.slots.borrow_mut();
        let before = slots.len();
        slots.retain(|(slot_id, _)| *slot_id != id);
        slots.len() != before
    }

    /// Call every connected slot with `value`.
    pub fn emit(&self, value: &T) {
        let slots: Vec<Slot<T>> = self
            .slots
            .borrow()
            .iter()
            .map(|(_, slot)| slot.clone())
            .collect();
        for slot in slots {
            slot(value);
        }
    }

    /// Number of connected slots.
    pub fn slot_count(&self) -> usize {
        self.slots.borrow().len()
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("slots", &self.slot_count())
            .finish()
    }
}
