//! Scalar values stored in cloud variables and list slots.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A cloud scalar: the server only stores numbers and strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CloudValue {
    Number(f64),
    Text(String),
}

impl CloudValue {
    /// Whether the value fits the server's constraints.
    ///
    /// Strings are measured in chars, not bytes; numbers must be finite.
    pub fn fits(&self, string_length_limit: usize) -> bool {
        match self {
            CloudValue::Number(n) => n.is_finite(),
            CloudValue::Text(s) => s.chars().count() <= string_length_limit,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CloudValue::Number(n) => Some(*n),
            CloudValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CloudValue::Text(s) => Some(s),
            CloudValue::Number(_) => None,
        }
    }
}

impl Default for CloudValue {
    fn default() -> Self {
        CloudValue::Number(0.0)
    }
}

impl fmt::Display for CloudValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloudValue::Number(n) => write!(f, "{n}"),
            CloudValue::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<f64> for CloudValue {
    fn from(n: f64) -> Self {
        CloudValue::Number(n)
    }
}

impl From<i32> for CloudValue {
    fn from(n: i32) -> Self {
        CloudValue::Number(f64::from(n))
    }
}

impl From<&str> for CloudValue {
    fn from(s: &str) -> Self {
        CloudValue::Text(s.to_owned())
    }
}

impl From<String> for CloudValue {
    fn from(s: String) -> Self {
        CloudValue::Text(s)
    }
}
