//! The record passed between stages.
//!
//! A [`StageRecord`] is an open mapping from field name to JSON-like value.
//! Stages read a typed view of the fields they need with [`StageRecord::decode`]
//! and write their typed output back with [`StageRecord::merge`]; every other
//! field rides along untouched so the persisted documents keep the full
//! provenance chain.

use crate::error::{PipelineError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageRecord {
    fields: Map<String, Value>,
}

impl StageRecord {
    pub fn new() -> Self {
        Self { fields: Map::new() }
    }

    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Build a record from any serializable struct that renders as a mapping.
    pub fn from_struct<T: Serialize>(value: &T) -> Result<Self> {
        let mut record = Self::new();
        record.merge(value)?;
        Ok(record)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// String field, or `None` when absent, null, non-string, or blank.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Deserialize a typed view of this record. Unknown fields are ignored.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.fields.clone()))
            .map_err(|e| PipelineError::input(format!("record does not match expected shape: {e}")))
    }

    /// Overlay the fields of `output` onto this record.
    pub fn merge<T: Serialize>(&mut self, output: &T) -> Result<()> {
        match serde_json::to_value(output)? {
            Value::Object(map) => {
                self.fields.extend(map);
                Ok(())
            }
            other => Err(PipelineError::Serialization(format!(
                "stage output must serialize to a mapping, got {}",
                value_kind(&other)
            ))),
        }
    }

    pub fn error_key(stage: &str) -> String {
        format!("{stage}_error")
    }

    /// The `<stage>_error` message, if that stage failed.
    pub fn error(&self, stage: &str) -> Option<&str> {
        self.get_str(&Self::error_key(stage))
    }

    pub fn set_error(&mut self, stage: &str, error: Option<String>) {
        let value = error.map(Value::String).unwrap_or(Value::Null);
        self.fields.insert(Self::error_key(stage), value);
    }

    /// Load a record from a persisted YAML document.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            PipelineError::input(format!("cannot read record {}: {e}", path.display()))
        })?;
        let fields: Map<String, Value> = serde_yaml::from_str(&text).map_err(|e| {
            PipelineError::Serialization(format!("{} is not a record mapping: {e}", path.display()))
        })?;
        Ok(Self { fields })
    }

    /// Persist this record as a YAML document, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_yaml(path, &self.fields)
    }
}

impl From<Map<String, Value>> for StageRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

/// Serialize any value to a YAML file, creating parent directories.
pub fn write_yaml<T: Serialize + ?Sized>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let blob = serde_yaml::to_string(value)?;
    fs::write(path, blob)?;
    Ok(())
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}
