//! Public and private variable groups.
//!
//! Both use a flat array on the wire; each entry names its variable:
//! `[{"cvid": "c1", "value": 5}, {"cvid": "c2", "value": "hi"}]`.

use crate::config::{CloudConfig, Timing};
use crate::data::VariableOperation;
use crate::error::CloudError;
use crate::group::{DataGroup, DecodedUpdate, GroupProtocol};
use crate::protocol::SendMessageKind;
use crate::value::CloudValue;
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Deserialize)]
struct VariableDescriptor {
    cvid: String,
    value: CloudValue,
}

fn encode_flat(batch: Vec<(String, Vec<Value>)>) -> Value {
    let mut entries = Vec::new();
    for (cvid, descriptors) in batch {
        for descriptor in descriptors {
            let mut entry = Map::new();
            entry.insert("cvid".into(), Value::String(cvid.clone()));
            if let Value::Object(fields) = descriptor {
                entry.extend(fields);
            }
            entries.push(Value::Object(entry));
        }
    }
    Value::Array(entries)
}

fn decode_flat(
    data_type: &'static str,
    payload: &Value,
) -> Result<DecodedUpdate<VariableOperation>, CloudError> {
    let entries = payload.as_array().ok_or_else(|| CloudError::MalformedUpdate {
        data_type,
        reason: "expected an array of updates".into(),
    })?;
    let mut decoded = DecodedUpdate::new();
    for entry in entries {
        match VariableDescriptor::deserialize(entry) {
            Ok(descriptor) => decoded.push(
                &descriptor.cvid,
                VariableOperation {
                    value: descriptor.value,
                },
            ),
            Err(e) => decoded.errors.push(CloudError::MalformedUpdate {
                data_type,
                reason: format!("{entry}: {e}"),
            }),
        }
    }
    Ok(decoded)
}

/// Variables visible to every user of the work.
#[derive(Debug)]
pub struct PublicVariables;

impl GroupProtocol for PublicVariables {
    type Operation = VariableOperation;

    const DATA_TYPE_NAME: &'static str = "public cloud variable";
    const UPLOAD_KIND: SendMessageKind = SendMessageKind::UpdatePublicVariable;

    fn encode_upload(batch: Vec<(String, Vec<Value>)>) -> Value {
        encode_flat(batch)
    }

    fn decode_update(payload: &Value) -> Result<DecodedUpdate<VariableOperation>, CloudError> {
        decode_flat(Self::DATA_TYPE_NAME, payload)
    }
}

/// Per-user variables. The server rate-limits these, so uploads are spaced.
#[derive(Debug)]
pub struct PrivateVariables;

impl GroupProtocol for PrivateVariables {
    type Operation = VariableOperation;

    const DATA_TYPE_NAME: &'static str = "private cloud variable";
    const UPLOAD_KIND: SendMessageKind = SendMessageKind::UpdatePrivateVariable;

    fn default_config() -> CloudConfig {
        CloudConfig {
            upload_interval: Some(Timing::millis(1500)),
            ..Default::default()
        }
    }

    fn encode_upload(batch: Vec<(String, Vec<Value>)>) -> Value {
        encode_flat(batch)
    }

    fn decode_update(payload: &Value) -> Result<DecodedUpdate<VariableOperation>, CloudError> {
        decode_flat(Self::DATA_TYPE_NAME, payload)
    }
}

pub type PublicVariableGroup = DataGroup<PublicVariables>;
pub type PrivateVariableGroup = DataGroup<PrivateVariables>;
