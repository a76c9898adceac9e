//! Data items: one cloud variable or cloud list and its update manager.

pub mod list;
pub mod variable;

use crate::config::{CloudConfig, ConfigLayer};
use crate::signal::Signal;
use crate::update::{Completion, UpdateManager, UpdateOperation, ValueChange};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

pub use list::{CloudList, ListOperation};
pub use variable::{CloudVariable, VariableOperation};

/// Identity of a data item within its group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataId {
    /// Server-assigned identifier, stable for the item's lifetime.
    pub cvid: String,
    /// Human-readable name, unique within the group.
    pub name: String,
}

impl DataId {
    pub fn new(cvid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            cvid: cvid.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.cvid)
    }
}

/// One entry of a snapshot: identity plus the raw value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataInfo {
    pub cvid: String,
    pub name: String,
    pub value: serde_json::Value,
}

/// A synchronized data item.
pub struct CloudData<O: UpdateOperation> {
    id: Rc<DataId>,
    config: Rc<ConfigLayer>,
    manager: Rc<UpdateManager<O>>,
}

impl<O: UpdateOperation> CloudData<O> {
    /// Create an item whose configuration inherits from `group_config`.
    pub fn new(id: DataId, group_config: &ConfigLayer, value: O::Value) -> Self {
        let id = Rc::new(id);
        let config = Rc::new(group_config.child(&CloudConfig::default()));
        let manager = UpdateManager::new(id.clone(), config.clone(), value);
        Self {
            id,
            config,
            manager,
        }
    }

    pub fn id(&self) -> &DataId {
        &self.id
    }

    pub fn cvid(&self) -> &str {
        &self.id.cvid
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// Item-level configuration; unset cells inherit from the group.
    pub fn config(&self) -> &ConfigLayer {
        &self.config
    }

    pub fn manager(&self) -> &Rc<UpdateManager<O>> {
        &self.manager
    }

    /// Current local value, including speculative edits.
    pub fn value(&self) -> O::Value {
        self.manager.value()
    }

    pub fn changed(&self) -> &Signal<ValueChange<O::Value>> {
        &self.manager.changed
    }

    /// Queue a local operation; the completion settles when it is confirmed
    /// or fails.
    pub fn submit(&self, operation: O) -> Completion {
        self.manager.submit(operation)
    }

    /// Overwrite the value with one reported in a snapshot.
    pub fn apply_snapshot(&self, value: O::Value) {
        self.manager.apply_cloud(O::replace_all(value));
    }
}

impl<O: UpdateOperation> fmt::Debug for CloudData<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(O::DATA_TYPE_NAME)
            .field("cvid", &self.id.cvid)
            .field("name", &self.id.name)
            .field("value", &self.value())
            .finish()
    }
}
