//! Configuration payload value object.
//!
//! A configuration value is always a JSON object. Scalars and arrays handed to
//! [`ConfigurationValue::new`] are wrapped as `{"value": <raw>}` so that every
//! stored payload can be merged, diffed and addressed by dotted paths in the
//! same way.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::ConfigError;
use crate::models::history::FieldChange;

/// Default serialized size limit for a single value (1 MiB).
pub const DEFAULT_MAX_VALUE_BYTES: usize = 1_048_576;

/// Key used when wrapping a non-object payload.
pub const WRAPPED_VALUE_KEY: &str = "value";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct ConfigurationValue(Map<String, Value>);

impl ConfigurationValue {
    pub fn new(raw: Value) -> Result<Self, ConfigError> {
        Self::with_max_bytes(raw, DEFAULT_MAX_VALUE_BYTES)
    }

    /// Same as [`ConfigurationValue::new`] with a caller-provided size limit.
    pub fn with_max_bytes(raw: Value, max_bytes: usize) -> Result<Self, ConfigError> {
        let map = match raw {
            Value::Null => {
                return Err(ConfigError::InvalidValue(
                    "configuration value cannot be null".to_string(),
                ))
            }
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert(WRAPPED_VALUE_KEY.to_string(), other);
                map
            }
        };

        let value = Self(map);
        value.ensure_size(max_bytes)?;
        Ok(value)
    }

    /// Serialized size in bytes.
    pub fn size_bytes(&self) -> Result<usize, ConfigError> {
        serde_json::to_vec(&self.0)
            .map(|bytes| bytes.len())
            .map_err(|e| ConfigError::InvalidValue(format!("value is not serializable: {}", e)))
    }

    fn ensure_size(&self, max_bytes: usize) -> Result<(), ConfigError> {
        let size = self.size_bytes()?;
        if size > max_bytes {
            return Err(ConfigError::InvalidValue(format!(
                "value is {} bytes, limit is {} bytes",
                size, max_bytes
            )));
        }
        Ok(())
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn into_json(self) -> Value {
        Value::Object(self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Looks up a dotted path such as `thresholds.max`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next().filter(|s| !s.is_empty())?;
        let mut current = self.0.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Writes a value at a dotted path, creating intermediate objects and
    /// replacing non-object intermediates.
    pub fn set(&mut self, path: &str, value: Value) -> Result<(), ConfigError> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(ConfigError::InvalidValue(format!("invalid value path '{}'", path)));
        }

        let (last, parents) = match segments.split_last() {
            Some(split) => split,
            None => return Err(ConfigError::InvalidValue("empty value path".to_string())),
        };

        let mut current = &mut self.0;
        for segment in parents {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = entry.as_object_mut().ok_or_else(|| {
                ConfigError::InvalidValue(format!("cannot descend into '{}'", segment))
            })?;
        }
        current.insert(last.to_string(), value);
        Ok(())
    }

    /// Removes the value at a dotted path, returning it if present.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let segments: Vec<&str> = path.split('.').collect();
        let (last, parents) = segments.split_last()?;

        let mut current = &mut self.0;
        for segment in parents {
            current = current.get_mut(*segment)?.as_object_mut()?;
        }
        current.remove(*last)
    }

    /// Deep merge where `other` wins. Nested objects merge recursively;
    /// arrays and scalars are replaced.
    pub fn merge(&self, other: &ConfigurationValue) -> ConfigurationValue {
        let mut merged = self.0.clone();
        merge_maps(&mut merged, &other.0);
        ConfigurationValue(merged)
    }

    /// Field-level structural diff keyed by dotted leaf path.
    pub fn diff(&self, other: &ConfigurationValue) -> BTreeMap<String, FieldChange> {
        let mut before = BTreeMap::new();
        let mut after = BTreeMap::new();
        flatten_into(&self.0, "", &mut before);
        flatten_into(&other.0, "", &mut after);

        let mut paths: Vec<&String> = before.keys().chain(after.keys()).collect();
        paths.sort();
        paths.dedup();

        paths
            .into_iter()
            .filter_map(|path| {
                let old = before.get(path);
                let new = after.get(path);
                let unchanged = match (old, new) {
                    (Some(a), Some(b)) => same_leaf(a, b),
                    (None, None) => true,
                    _ => false,
                };
                if unchanged {
                    return None;
                }
                Some((
                    path.clone(),
                    FieldChange {
                        old: old.map(|v| (*v).clone()),
                        new: new.map(|v| (*v).clone()),
                    },
                ))
            })
            .collect()
    }
}

fn merge_maps(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, incoming) in source {
        match (target.get_mut(key), incoming) {
            (Some(Value::Object(existing)), Value::Object(nested)) => merge_maps(existing, nested),
            _ => {
                target.insert(key.clone(), incoming.clone());
            }
        }
    }
}

/// Numbers compare by value, so `19` and `19.0` are the same leaf.
fn same_leaf(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i == j,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

/// Objects are descended into; arrays and primitives are leaves.
fn flatten_into<'a>(map: &'a Map<String, Value>, prefix: &str, out: &mut BTreeMap<String, &'a Value>) {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(nested) => flatten_into(nested, &path, out),
            leaf => {
                out.insert(path, leaf);
            }
        }
    }
}

impl TryFrom<Value> for ConfigurationValue {
    type Error = ConfigError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ConfigurationValue> for Value {
    fn from(value: ConfigurationValue) -> Self {
        value.into_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_rejects_null() {
        assert!(matches!(
            ConfigurationValue::new(Value::Null),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_new_wraps_scalars_and_arrays() {
        let scalar = ConfigurationValue::new(json!(19)).unwrap();
        assert_eq!(scalar.to_json(), json!({"value": 19}));

        let array = ConfigurationValue::new(json!(["a", "b"])).unwrap();
        assert_eq!(array.to_json(), json!({"value": ["a", "b"]}));

        let object = ConfigurationValue::new(json!({"rate": 19})).unwrap();
        assert_eq!(object.to_json(), json!({"rate": 19}));
    }

    #[test]
    fn test_size_limit() {
        let big = json!({"blob": "x".repeat(200)});
        assert!(ConfigurationValue::with_max_bytes(big.clone(), 100).is_err());
        assert!(ConfigurationValue::with_max_bytes(big, 1_000).is_ok());
    }

    #[test]
    fn test_get_set_remove_paths() {
        let mut value = ConfigurationValue::new(json!({"limits": {"max": 10}})).unwrap();
        assert_eq!(value.get("limits.max"), Some(&json!(10)));
        assert_eq!(value.get("limits.min"), None);
        assert_eq!(value.get("limits.max.deeper"), None);
        assert_eq!(value.get(""), None);

        value.set("limits.min", json!(1)).unwrap();
        value.set("alerts.email.enabled", json!(true)).unwrap();
        assert_eq!(value.get("limits.min"), Some(&json!(1)));
        assert_eq!(value.get("alerts.email.enabled"), Some(&json!(true)));

        value.set("limits.max.inner", json!(5)).unwrap();
        assert_eq!(value.get("limits.max"), Some(&json!({"inner": 5})));

        assert_eq!(value.remove("limits.min"), Some(json!(1)));
        assert_eq!(value.remove("limits.min"), None);
        assert!(value.set("bad..path", json!(1)).is_err());
    }

    #[test]
    fn test_deep_merge() {
        let system = ConfigurationValue::new(json!({"a": 1, "b": {"x": 1}})).unwrap();
        let company = ConfigurationValue::new(json!({"b": {"y": 2}, "c": 3})).unwrap();

        let merged = system.merge(&company);
        assert_eq!(merged.to_json(), json!({"a": 1, "b": {"x": 1, "y": 2}, "c": 3}));
    }

    #[test]
    fn test_merge_replaces_arrays_and_scalars() {
        let base = ConfigurationValue::new(json!({"list": [1, 2], "b": {"x": 1}})).unwrap();
        let top = ConfigurationValue::new(json!({"list": [3], "b": 7})).unwrap();
        assert_eq!(base.merge(&top).to_json(), json!({"list": [3], "b": 7}));
    }

    #[test]
    fn test_diff_changed_leaf() {
        let before = ConfigurationValue::new(json!({"rate": 19})).unwrap();
        let after = ConfigurationValue::new(json!({"rate": 21})).unwrap();

        let changes = before.diff(&after);
        assert_eq!(changes.len(), 1);
        assert_eq!(
            changes["rate"],
            FieldChange {
                old: Some(json!(19)),
                new: Some(json!(21))
            }
        );
    }

    #[test]
    fn test_diff_nested_added_and_removed() {
        let before = ConfigurationValue::new(json!({"a": {"x": 1, "y": 2}, "tags": [1]})).unwrap();
        let after = ConfigurationValue::new(json!({"a": {"x": 1, "z": 3}, "tags": [1, 2]})).unwrap();

        let changes = before.diff(&after);
        let paths: Vec<&str> = changes.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["a.y", "a.z", "tags"]);
        assert_eq!(changes["a.y"].new, None);
        assert_eq!(changes["a.z"].old, None);
    }

    #[test]
    fn test_diff_compares_numbers_by_value() {
        let before = ConfigurationValue::new(json!({"rate": 19, "limit": 1.5})).unwrap();
        let after = ConfigurationValue::new(json!({"rate": 19.0, "limit": 2})).unwrap();

        let changes = before.diff(&after);
        let paths: Vec<&str> = changes.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["limit"]);
    }

    #[test]
    fn test_diff_null_leaf_removed() {
        let before = ConfigurationValue::new(json!({"note": null, "rate": 1})).unwrap();
        let after = ConfigurationValue::new(json!({"rate": 1})).unwrap();

        let changes = before.diff(&after);
        assert_eq!(
            changes["note"],
            FieldChange {
                old: Some(Value::Null),
                new: None
            }
        );
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let value = ConfigurationValue::new(json!({"a": {"b": [1, 2]}})).unwrap();
        assert!(value.diff(&value.clone()).is_empty());
    }

    #[test]
    fn test_deserialize_wraps() {
        let value: ConfigurationValue = serde_json::from_value(json!(true)).unwrap();
        assert_eq!(value.get("value"), Some(&json!(true)));
        assert!(serde_json::from_value::<ConfigurationValue>(Value::Null).is_err());
    }
}
