use std::collections::HashMap;

use serde::Deserialize;

use crate::extensions::errors::{ExtensionError, ExtensionResult};

const ENABLE: &str = "enable";
const CRITICAL: &str = "critical";

/// Flat string settings of one extension, looked up case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "HashMap<String, String>")]
pub struct ExtensionConfig {
    values: HashMap<String, String>,
}

impl From<HashMap<String, String>> for ExtensionConfig {
    fn from(values: HashMap<String, String>) -> Self {
        Self {
            values: values
                .into_iter()
                .map(|(key, value)| (key.to_ascii_lowercase(), value))
                .collect(),
        }
    }
}

impl ExtensionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_ascii_lowercase(), value.into());
        self
    }

    /// Trimmed value of `key`; blank values count as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(&key.to_ascii_lowercase())
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn get_bool(&self, key: &str) -> ExtensionResult<Option<bool>> {
        self.get(key)
            .map(|value| match value.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" => Ok(false),
                other => Err(ExtensionError::invalid(key, format!("not a boolean: {other}"))),
            })
            .transpose()
    }

    pub fn get_usize(&self, key: &str) -> ExtensionResult<Option<usize>> {
        self.get(key)
            .map(|value| {
                value
                    .parse()
                    .map_err(|e| ExtensionError::invalid(key, format!("{value}: {e}")))
            })
            .transpose()
    }

    pub fn enabled(&self) -> ExtensionResult<bool> {
        Ok(self.get_bool(ENABLE)?.unwrap_or(false))
    }

    pub fn critical(&self) -> ExtensionResult<bool> {
        Ok(self.get_bool(CRITICAL)?.unwrap_or(false))
    }
}
