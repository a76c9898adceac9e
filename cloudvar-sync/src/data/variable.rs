//! Cloud variables: a single scalar overwritten by `set`.

use crate::config::Limits;
use crate::data::CloudData;
use crate::update::{Completion, DataState, UpdateOperation};
use crate::value::CloudValue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The only mutation a variable supports. Serialized as `{"value": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableOperation {
    pub value: CloudValue,
}

impl VariableOperation {
    pub fn set(value: impl Into<CloudValue>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl fmt::Display for VariableOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "set to {}", self.value)
    }
}

impl UpdateOperation for VariableOperation {
    type Value = CloudValue;
    /// The value before the set.
    type Undo = CloudValue;

    const DATA_TYPE_NAME: &'static str = "cloud variable";

    fn apply(&self, state: &mut DataState<CloudValue>) -> CloudValue {
        std::mem::replace(&mut state.value, self.value.clone())
    }

    fn revert(&self, state: &mut DataState<CloudValue>, undo: CloudValue) {
        state.value = undo;
    }

    fn would_change(&self, state: &DataState<CloudValue>) -> bool {
        state.value != self.value
    }

    fn changed(&self, undo: &CloudValue) -> bool {
        *undo != self.value
    }

    fn is_legal(&self, limits: &Limits) -> bool {
        self.value.fits(limits.string_length)
    }

    fn replace_all(value: CloudValue) -> Self {
        Self { value }
    }
}

pub type CloudVariable = CloudData<VariableOperation>;

impl CloudData<VariableOperation> {
    pub fn get(&self) -> CloudValue {
        self.value()
    }

    pub fn set(&self, value: impl Into<CloudValue>) -> Completion {
        self.submit(VariableOperation::set(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CloudConfig, ConfigLayer, Timing};
    use crate::data::DataId;

    #[test]
    fn test_legality_follows_string_limit() {
        let limits = Limits {
            string_length: 4,
            list_length: 10,
        };
        assert!(VariableOperation::set("four").is_legal(&limits));
        assert!(!VariableOperation::set("fives").is_legal(&limits));
        assert!(!VariableOperation::set(f64::INFINITY).is_legal(&limits));
    }

    #[test]
    fn test_descriptor_shape() {
        let json = serde_json::to_value(VariableOperation::set("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"value": "hi"}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_and_get() {
        let root = ConfigLayer::root(&CloudConfig {
            cache_time: Some(Timing::Disabled),
            upload_interval: Some(Timing::Disabled),
            ..Default::default()
        });
        let variable = CloudVariable::new(DataId::new("1", "score"), &root, CloudValue::from(0));
        let _done = variable.set(42);
        assert_eq!(variable.get(), CloudValue::from(42));
        assert_eq!(variable.manager().unuploaded_len(), 1);
    }
}
