//! Layered runtime configuration.
//!
//! Every tunable is a [`ConfigCell`]. A cell either holds an explicit value or
//! falls back to the effective value of the cell above it, so a connection-wide
//! default can be overridden per group and again per item:
//!
//! ```text
//! connection root ──► group layer ──► item layer
//!   (defaults)         (overrides)      (overrides)
//! ```
//!
//! When a cell's effective value changes, its `changed` signal fires with the
//! old and new value. Inherited changes are forwarded to every descendant that
//! has no explicit value of its own.

use crate::error::CloudError;
use crate::signal::{Signal, SlotId};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// Maximum string length the server accepts.
pub const MAX_STRING_LENGTH: usize = 1024;
/// Maximum list length the server accepts.
pub const MAX_LIST_LENGTH: usize = 1000;

/// A duration that may also be switched off entirely.
///
/// On the wire this is a number of milliseconds or `false`; `true` means
/// "enabled with no delay" and reads as zero milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawTiming", into = "RawTiming")]
pub enum Timing {
    Disabled,
    After(Duration),
}

impl Timing {
    pub const fn millis(ms: u64) -> Self {
        Timing::After(Duration::from_millis(ms))
    }

    pub fn duration(self) -> Option<Duration> {
        match self {
            Timing::Disabled => None,
            Timing::After(d) => Some(d),
        }
    }

    pub fn is_disabled(self) -> bool {
        matches!(self, Timing::Disabled)
    }

    /// The duration, reading `Disabled` as zero.
    pub fn or_zero(self) -> Duration {
        self.duration().unwrap_or(Duration::ZERO)
    }
}

impl fmt::Display for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timing::Disabled => f.write_str("disabled"),
            Timing::After(d) => write!(f, "{}ms", d.as_millis()),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawTiming {
    Millis(u64),
    Flag(bool),
}

impl From<RawTiming> for Timing {
    fn from(raw: RawTiming) -> Self {
        match raw {
            RawTiming::Millis(ms) => Timing::millis(ms),
            RawTiming::Flag(true) => Timing::After(Duration::ZERO),
            RawTiming::Flag(false) => Timing::Disabled,
        }
    }
}

impl From<Timing> for RawTiming {
    fn from(timing: Timing) -> Self {
        match timing {
            Timing::Disabled => RawTiming::Flag(false),
            Timing::After(d) => {
                RawTiming::Millis(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            }
        }
    }
}

/// Payload of [`ConfigCell::changed`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigChange<T> {
    pub original: T,
    pub new: T,
}

enum Upper<T> {
    Cell(Rc<ConfigCell<T>>, SlotId),
    Value(T),
}

/// One inheritable configuration value.
pub struct ConfigCell<T> {
    upper: Upper<T>,
    store: RefCell<Option<T>>,
    pub changed: Signal<ConfigChange<T>>,
}

impl<T: Clone + PartialEq + 'static> ConfigCell<T> {
    /// A top-level cell that falls back to a fixed value.
    pub fn root(fallback: T, explicit: Option<T>) -> Rc<Self> {
        Rc::new(Self {
            upper: Upper::Value(fallback),
            store: RefCell::new(explicit),
            changed: Signal::new(),
        })
    }

    /// A cell that inherits from `parent` while it has no explicit value.
    pub fn child(parent: &Rc<ConfigCell<T>>, explicit: Option<T>) -> Rc<Self> {
        Rc::new_cyclic(|weak: &std::rc::Weak<Self>| {
            let me = weak.clone();
            let slot = parent.changed.connect(move |change: &ConfigChange<T>| {
                if let Some(cell) = me.upgrade() {
                    if cell.store.borrow().is_none() {
                        cell.changed.emit(change);
                    }
                }
            });
            Self {
                upper: Upper::Cell(parent.clone(), slot),
                store: RefCell::new(explicit),
                changed: Signal::new(),
            }
        })
    }

    /// Effective value: the explicit one if set, otherwise inherited.
    pub fn value(&self) -> T {
        if let Some(v) = self.store.borrow().as_ref() {
            return v.clone();
        }
        match &self.upper {
            Upper::Cell(parent, _) => parent.value(),
            Upper::Value(v) => v.clone(),
        }
    }

    /// The explicit value, if any.
    pub fn config(&self) -> Option<T> {
        self.store.borrow().clone()
    }

    /// Replace the explicit value (`None` reverts to inheriting).
    pub fn set_config(&self, explicit: Option<T>) {
        let original = self.value();
        *self.store.borrow_mut() = explicit;
        let new = self.value();
        if original != new {
            self.changed.emit(&ConfigChange { original, new });
        }
    }

    pub fn set(&self, value: T) {
        self.set_config(Some(value));
    }

    pub fn reset(&self) {
        self.set_config(None);
    }
}

impl<T> Drop for ConfigCell<T> {
    fn drop(&mut self) {
        if let Upper::Cell(parent, slot) = &self.upper {
            parent.changed.disconnect(*slot);
        }
    }
}

impl<T: fmt::Debug + Clone> fmt::Debug for ConfigCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigCell")
            .field("explicit", &*self.store.borrow())
            .field("inherits", &matches!(self.upper, Upper::Cell(..)))
            .finish()
    }
}

/// Optional overrides for one configuration layer.
///
/// Deserializes from JSON such as
/// `{"cache_time": 1000, "upload_interval": false}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub auto_reconnect_interval: Option<Timing>,
    pub local_preupdate: Option<bool>,
    pub cache_time: Option<Timing>,
    pub upload_interval: Option<Timing>,
    pub upload_timeout: Option<Timing>,
    pub string_length_limit: Option<usize>,
    pub list_length_limit: Option<usize>,
}

impl CloudConfig {
    pub fn validate(&self) -> Result<(), CloudError> {
        if let Some(limit) = self.string_length_limit {
            if limit > MAX_STRING_LENGTH {
                return Err(CloudError::Config(format!(
                    "string_length_limit {limit} exceeds the server maximum of {MAX_STRING_LENGTH}"
                )));
            }
        }
        if let Some(limit) = self.list_length_limit {
            if limit > MAX_LIST_LENGTH {
                return Err(CloudError::Config(format!(
                    "list_length_limit {limit} exceeds the server maximum of {MAX_LIST_LENGTH}"
                )));
            }
        }
        Ok(())
    }
}

/// Structural limits checked by command legality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub string_length: usize,
    pub list_length: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            string_length: MAX_STRING_LENGTH,
            list_length: MAX_LIST_LENGTH,
        }
    }
}

/// Effective scheduling parameters at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub local_preupdate: bool,
    pub cache_time: Timing,
    pub upload_interval: Timing,
    pub upload_timeout: Timing,
}

/// The full set of cells at one level of the hierarchy.
#[derive(Debug)]
pub struct ConfigLayer {
    pub auto_reconnect_interval: Rc<ConfigCell<Timing>>,
    pub local_preupdate: Rc<ConfigCell<bool>>,
    pub cache_time: Rc<ConfigCell<Timing>>,
    pub upload_interval: Rc<ConfigCell<Timing>>,
    pub upload_timeout: Rc<ConfigCell<Timing>>,
    pub string_length_limit: Rc<ConfigCell<usize>>,
    pub list_length_limit: Rc<ConfigCell<usize>>,
}

impl ConfigLayer {
    /// The connection-wide layer, built on the built-in defaults.
    pub fn root(config: &CloudConfig) -> Self {
        Self {
            auto_reconnect_interval: ConfigCell::root(
                Timing::millis(8000),
                config.auto_reconnect_interval,
            ),
            local_preupdate: ConfigCell::root(true, config.local_preupdate),
            cache_time: ConfigCell::root(Timing::millis(0), config.cache_time),
            upload_interval: ConfigCell::root(Timing::millis(0), config.upload_interval),
            upload_timeout: ConfigCell::root(Timing::millis(4000), config.upload_timeout),
            string_length_limit: ConfigCell::root(MAX_STRING_LENGTH, config.string_length_limit),
            list_length_limit: ConfigCell::root(MAX_LIST_LENGTH, config.list_length_limit),
        }
    }

    /// A layer below `self` with the given explicit overrides.
    pub fn child(&self, config: &CloudConfig) -> Self {
        Self {
            auto_reconnect_interval: ConfigCell::child(
                &self.auto_reconnect_interval,
                config.auto_reconnect_interval,
            ),
            local_preupdate: ConfigCell::child(&self.local_preupdate, config.local_preupdate),
            cache_time: ConfigCell::child(&self.cache_time, config.cache_time),
            upload_interval: ConfigCell::child(&self.upload_interval, config.upload_interval),
            upload_timeout: ConfigCell::child(&self.upload_timeout, config.upload_timeout),
            string_length_limit: ConfigCell::child(
                &self.string_length_limit,
                config.string_length_limit,
            ),
            list_length_limit: ConfigCell::child(&self.list_length_limit, config.list_length_limit),
        }
    }

    pub fn limits(&self) -> Limits {
        Limits {
            string_length: self.string_length_limit.value(),
            list_length: self.list_length_limit.value(),
        }
    }

    pub fn schedule(&self) -> Schedule {
        Schedule {
            local_preupdate: self.local_preupdate.value(),
            cache_time: self.cache_time.value(),
            upload_interval: self.upload_interval.value(),
            upload_timeout: self.upload_timeout.value(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_child_inherits_until_overridden() {
        let root = ConfigCell::root(Timing::millis(0), None);
        let child = ConfigCell::child(&root, None);
        assert_eq!(child.value(), Timing::millis(0));

        root.set(Timing::millis(500));
        assert_eq!(child.value(), Timing::millis(500));

        child.set(Timing::Disabled);
        root.set(Timing::millis(700));
        assert_eq!(child.value(), Timing::Disabled);

        child.reset();
        assert_eq!(child.value(), Timing::millis(700));
    }

    #[test]
    fn test_changes_forwarded_only_while_unset() {
        let root = ConfigCell::root(true, None);
        let child = ConfigCell::child(&root, None);
        let grandchild = ConfigCell::child(&child, None);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        grandchild
            .changed
            .connect(move |c: &ConfigChange<bool>| s.borrow_mut().push((c.original, c.new)));

        root.set(false);
        assert_eq!(*seen.borrow(), vec![(true, false)]);

        child.set(true);
        assert_eq!(*seen.borrow(), vec![(true, false), (false, true)]);

        // Shadowed by the child's explicit value.
        root.set(true);
        root.set(false);
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn test_no_event_when_effective_value_unchanged() {
        let root = ConfigCell::root(3usize, None);
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        root.changed.connect(move |_| h.set(h.get() + 1));

        root.set(3);
        root.reset();
        assert_eq!(hits.get(), 0);
        root.set(4);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_dropped_child_disconnects_from_parent() {
        let root = ConfigCell::root(1u8, None);
        let child = ConfigCell::child(&root, None);
        assert_eq!(root.changed.slot_count(), 1);
        drop(child);
        assert_eq!(root.changed.slot_count(), 0);
    }

    #[test]
    fn test_timing_wire_format() {
        let config: CloudConfig = serde_json::from_str(
            r#"{"cache_time": 1000, "upload_interval": false, "upload_timeout": true}"#,
        )
        .unwrap();
        assert_eq!(config.cache_time, Some(Timing::millis(1000)));
        assert_eq!(config.upload_interval, Some(Timing::Disabled));
        assert_eq!(config.upload_timeout, Some(Timing::millis(0)));
        assert_eq!(config.local_preupdate, None);

        let json = serde_json::to_value(Timing::Disabled).unwrap();
        assert_eq!(json, serde_json::json!(false));

        let huge = Timing::After(Duration::MAX);
        assert_eq!(serde_json::to_value(huge).unwrap(), serde_json::json!(u64::MAX));
    }

    #[test]
    fn test_validate_rejects_limits_over_server_caps() {
        let ok = CloudConfig {
            string_length_limit: Some(1024),
            list_length_limit: Some(1000),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let too_long = CloudConfig {
            string_length_limit: Some(1025),
            ..Default::default()
        };
        assert!(matches!(too_long.validate(), Err(CloudError::Config(_))));
    }

    #[test]
    fn test_layer_defaults() {
        let root = ConfigLayer::root(&CloudConfig::default());
        let lists = root.child(&CloudConfig {
            local_preupdate: Some(false),
            ..Default::default()
        });
        let item = lists.child(&CloudConfig::default());

        let schedule = item.schedule();
        assert!(!schedule.local_preupdate);
        assert_eq!(schedule.upload_timeout, Timing::millis(4000));
        assert_eq!(item.auto_reconnect_interval.value(), Timing::millis(8000));
        assert_eq!(item.limits(), Limits::default());
    }
}
