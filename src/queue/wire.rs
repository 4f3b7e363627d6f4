//! Lenient decoding of queue JSON: ids may arrive as numbers or strings,
//! flags as booleans or 0/1.

use serde::de::{Deserializer, Error};
use serde::Deserialize;
use serde_json::Value;

pub(super) fn opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    opaque_id_opt(deserializer)?.ok_or_else(|| D::Error::custom("id must not be null"))
}

pub(super) fn opaque_id_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(D::Error::custom(format!("expected id, got {}", other))),
    }
}

pub(super) fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Ok(n.as_i64().unwrap_or(0) != 0),
        other => Err(D::Error::custom(format!("expected flag, got {}", other))),
    }
}

pub(super) fn enabled_default() -> bool {
    true
}
