//! Per-test-case input parameters (`tcinputs`).

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// Input parameters of a test case, as supplied by its JSON configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TcInputs(Map<String, Value>);

impl TcInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            other => Err(Error::Config(format!(
                "test case inputs must be a JSON object, got {}",
                other
            ))),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_value(serde_json::from_str(&text)?)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        matches!(self.0.get(key), Some(value) if !value.is_null())
    }

    /// Every key must be present and non-null.
    pub fn require<S: AsRef<str>>(&self, keys: &[S]) -> Result<()> {
        match keys.iter().find(|key| !self.contains(key.as_ref())) {
            Some(missing) => Err(Error::MissingInput(missing.as_ref().to_string())),
            None => Ok(()),
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .0
            .get(key)
            .filter(|value| !value.is_null())
            .ok_or_else(|| Error::MissingInput(key.to_string()))?;
        serde_json::from_value(value.clone()).map_err(|err| Error::InvalidInput {
            key: key.to_string(),
            reason: err.to_string(),
        })
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        if self.contains(key) {
            self.get(key)
        } else {
            Ok(default)
        }
    }

    /// String inputs; numbers and booleans are accepted and stringified.
    pub fn get_str(&self, key: &str) -> Result<String> {
        match self.0.get(key) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(v @ (Value::Number(_) | Value::Bool(_))) => Ok(v.to_string()),
            Some(Value::Null) | None => Err(Error::MissingInput(key.to_string())),
            Some(other) => Err(Error::InvalidInput {
                key: key.to_string(),
                reason: format!("expected a string, got {}", other),
            }),
        }
    }

    /// Comma-separated list input, e.g. `"vm1,vm2,vm3"`.
    pub fn get_list(&self, key: &str) -> Result<Vec<String>> {
        match self.0.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => Ok(other.to_string()),
                })
                .collect(),
            _ => Ok(self
                .get_str(key)?
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()),
        }
    }

    /// Deserialize all inputs into a typed, immutable settings struct.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.0.clone())).map_err(|err| Error::InvalidInput {
            key: "<all>".into(),
            reason: err.to_string(),
        })
    }

    /// Inputs of `other` take precedence.
    pub fn merged(mut self, other: &TcInputs) -> Self {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
        self
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}
