//! On-disk text formats.
//!
//! JSON, YAML and TOML carry identical semantics; the format only decides
//! how the document is spelled in the file.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use cfgseal_common::{Error, Result};

/// Serialization format of a configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// Pretty-printed JSON with two-space indentation.
    #[default]
    Json,
    Yaml,
    Toml,
}

impl Format {
    /// Pick a format from the file extension, falling back to JSON.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("yaml") | Some("yml") => Format::Yaml,
            Some("toml") => Format::Toml,
            _ => Format::Json,
        }
    }

    /// Canonical file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Yaml => "yaml",
            Format::Toml => "toml",
        }
    }

    /// Render a value in this format.
    pub fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Format::Json => serde_json::to_vec_pretty(value)
                .map_err(|e| Error::SerializeFailed(e.to_string())),
            Format::Yaml => serde_yaml::to_string(value)
                .map(String::into_bytes)
                .map_err(|e| Error::SerializeFailed(e.to_string())),
            Format::Toml => toml::to_string_pretty(value)
                .map(String::into_bytes)
                .map_err(|e| Error::SerializeFailed(e.to_string())),
        }
    }

    /// Parse bytes in this format.
    pub fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Format::Json => {
                serde_json::from_slice(bytes).map_err(|e| Error::DeserializeFailed(e.to_string()))
            }
            Format::Yaml => {
                serde_yaml::from_slice(bytes).map_err(|e| Error::DeserializeFailed(e.to_string()))
            }
            Format::Toml => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| Error::DeserializeFailed(e.to_string()))?;
                toml::from_str(text).map_err(|e| Error::DeserializeFailed(e.to_string()))
            }
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "yaml" | "yml" => Ok(Format::Yaml),
            "toml" => Ok(Format::Toml),
            other => Err(Error::InvalidInput(format!("Unknown format: {}", other))),
        }
    }
}

/// Overlay `file` onto `defaults`: keys present in the file win, keys
/// missing from it keep their default. Objects merge recursively; every
/// other value is replaced wholesale.
pub fn merge_defaults(defaults: &mut Value, file: Value) {
    match (defaults, file) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_defaults(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
