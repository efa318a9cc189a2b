//! Environment variable mapping.
//!
//! Values are forwarded to the child as strings. Numbers and booleans are
//! coerced to their canonical text (`5000` becomes `"5000"`); `null`, lists
//! and maps are rejected with the offending key in the message.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// Coerce one raw env value to the string handed to the child process.
pub fn coerce_env_value(key: &str, value: Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Err(format!("env.{}: null is not a valid value", key)),
        Value::Array(_) => Err(format!("env.{}: lists are not valid values", key)),
        Value::Object(_) => Err(format!("env.{}: maps are not valid values", key)),
    }
}

/// Whether `key` is acceptable as an environment variable name.
pub fn is_valid_env_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub mod env_serde {
    use super::*;

    pub fn serialize<S>(env: &BTreeMap<String, String>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        env.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        // `env:` with no entries parses as null in YAML
        let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();

        raw.into_iter()
            .map(|(key, value)| {
                let value = coerce_env_value(&key, value).map_err(serde::de::Error::custom)?;
                Ok((key, value))
            })
            .collect()
    }
}
