//! The list group. Updates travel as a mapping from cvid to descriptors:
//! `{"c9": [{"action": "push", "value": "x"}, {"action": "pop"}]}`.

use crate::config::CloudConfig;
use crate::data::ListOperation;
use crate::error::CloudError;
use crate::group::{DataGroup, DecodedUpdate, GroupProtocol};
use crate::protocol::SendMessageKind;
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug)]
pub struct Lists;

impl GroupProtocol for Lists {
    type Operation = ListOperation;

    const DATA_TYPE_NAME: &'static str = "cloud list";
    const UPLOAD_KIND: SendMessageKind = SendMessageKind::UpdateList;

    /// List edits are positional, so a speculative edit is only shown once
    /// the server has ordered it.
    fn default_config() -> CloudConfig {
        CloudConfig {
            local_preupdate: Some(false),
            ..Default::default()
        }
    }

    fn encode_upload(batch: Vec<(String, Vec<Value>)>) -> Value {
        let map: Map<String, Value> = batch
            .into_iter()
            .map(|(cvid, descriptors)| (cvid, Value::Array(descriptors)))
            .collect();
        Value::Object(map)
    }

    fn decode_update(payload: &Value) -> Result<DecodedUpdate<ListOperation>, CloudError> {
        let data_type = Self::DATA_TYPE_NAME;
        let entries = payload.as_object().ok_or_else(|| CloudError::MalformedUpdate {
            data_type,
            reason: "expected a map of list updates".into(),
        })?;
        let mut decoded = DecodedUpdate::new();
        for (cvid, descriptors) in entries {
            let Some(descriptors) = descriptors.as_array() else {
                decoded.errors.push(CloudError::MalformedUpdate {
                    data_type,
                    reason: format!("{cvid}: expected an array of operations"),
                });
                continue;
            };
            for descriptor in descriptors {
                match ListOperation::deserialize(descriptor) {
                    Ok(operation) => decoded.push(cvid, operation),
                    Err(e) => decoded.errors.push(CloudError::MalformedUpdate {
                        data_type,
                        reason: format!("{cvid}: {e}"),
                    }),
                }
            }
        }
        Ok(decoded)
    }
}

pub type ListGroup = DataGroup<Lists>;
