use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::BridgeError;

/// Error reply sent back over the method channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct HostError {
    pub code: String,
    pub message: String,
}

impl HostError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self { code: code.to_string(), message: message.into() }
    }

    pub fn not_implemented(method: &str) -> Self {
        Self::new("NOT_IMPLEMENTED", format!("unknown method '{method}'"))
    }
}

impl From<BridgeError> for HostError {
    fn from(e: BridgeError) -> Self {
        Self { code: e.code().to_string(), message: e.to_string() }
    }
}

fn invalid(message: impl Into<String>) -> BridgeError {
    BridgeError::InvalidArgument(message.into())
}

pub(crate) fn arg_map(args: &Value) -> Result<&Map<String, Value>, BridgeError> {
    args.as_object().ok_or_else(|| invalid("expected a map argument"))
}

pub(crate) fn required_str<'a>(map: &'a Map<String, Value>, key: &str) -> Result<&'a str, BridgeError> {
    map.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(format!("missing string '{key}'")))
}

pub(crate) fn required_bool(map: &Map<String, Value>, key: &str) -> Result<bool, BridgeError> {
    map.get(key)
        .and_then(Value::as_bool)
        .ok_or_else(|| invalid(format!("missing bool '{key}'")))
}

pub(crate) fn required_i64(map: &Map<String, Value>, key: &str) -> Result<i64, BridgeError> {
    map.get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| invalid(format!("missing integer '{key}'")))
}

/// Non-string entries are skipped.
pub(crate) fn required_string_list(map: &Map<String, Value>, key: &str) -> Result<Vec<String>, BridgeError> {
    let list = map
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| invalid(format!("missing list '{key}'")))?;
    Ok(list.iter().filter_map(Value::as_str).map(str::to_string).collect())
}

/// Rect edges; absent or non-integer values count as 0.
pub(crate) fn int_or_zero(map: &Map<String, Value>, key: &str) -> i32 {
    map.get(key)
        .and_then(Value::as_i64)
        .and_then(|v| i32::try_from(v).ok())
        .unwrap_or(0)
}

pub(crate) fn f64_or(map: &Map<String, Value>, key: &str, default: f64) -> f64 {
    map.get(key).and_then(Value::as_f64).unwrap_or(default)
}
