//! Raw key-value settings for ldaprealm
//!
//! The host application resolves its configuration into flat dotted keys
//! (`ldap.url`, `ldap.user.baseDn`, ...). Settings can be assembled in code,
//! or read from a TOML file (nested tables are flattened) or a Java-style
//! `.properties` file.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    properties: BTreeMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn set_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let settings = match path.extension().and_then(|e| e.to_str()) {
            Some("properties") => Self::from_properties_str(&content),
            _ => Self::from_toml_str(&content)?,
        };
        debug!(path = %path.display(), properties = settings.len(), "Loaded settings file");
        Ok(settings)
    }

    /// Parses TOML, flattening nested tables into dotted keys.
    ///
    /// Arrays become comma separated values, so `servers = ["a", "b"]`
    /// reads the same as `servers = "a,b"`.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(content)?;
        let mut settings = Self::new();
        flatten_table(&mut settings, None, &table);
        Ok(settings)
    }

    /// Parses `key=value` (or `key: value`) lines; `#` and `!` start comments.
    pub fn from_properties_str(content: &str) -> Self {
        let mut settings = Self::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let split_at = line.find(['=', ':']);
            if let Some(idx) = split_at {
                let (key, value) = line.split_at(idx);
                settings.insert(key.trim(), value[1..].trim());
            }
        }
        settings
    }

    /// Returns the trimmed value, treating blank values as absent.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn get_string_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get_string(key).unwrap_or(default)
    }

    /// Comma separated list, with blank items dropped.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get_string(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Absent keys read as `default`.
    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool> {
        match self.get_string(key) {
            None => Ok(default),
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(true),
                "false" | "no" | "off" | "0" => Ok(false),
                _ => Err(Error::config(format!(
                    "Property '{}' must be a boolean, got '{}'",
                    key, v
                ))),
            },
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.get_bool_or(key, false)
    }

    pub fn get_u32(&self, key: &str) -> Result<Option<u32>> {
        self.get_string(key)
            .map(|v| {
                v.parse::<u32>().map_err(|_| {
                    Error::config(format!(
                        "Property '{}' must be a non-negative integer, got '{}'",
                        key, v
                    ))
                })
            })
            .transpose()
    }

    /// Durations accept `500ms`, `10s`, `2m`, or a bare number of seconds.
    pub fn get_duration(&self, key: &str) -> Result<Option<Duration>> {
        self.get_string(key)
            .map(|v| {
                parse_duration(v).ok_or_else(|| {
                    Error::config(format!(
                        "Property '{}' must be a duration such as '10s' or '500ms', got '{}'",
                        key, v
                    ))
                })
            })
            .transpose()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get_string(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Settings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut settings = Settings::new();
        for (k, v) in iter {
            settings.insert(k, v);
        }
        settings
    }
}

fn flatten_table(settings: &mut Settings, prefix: Option<&str>, table: &toml::Table) {
    for (key, value) in table {
        let full_key = match prefix {
            Some(p) => format!("{}.{}", p, key),
            None => key.clone(),
        };
        match value {
            toml::Value::Table(inner) => flatten_table(settings, Some(&full_key), inner),
            toml::Value::String(s) => settings.insert(full_key, s.clone()),
            toml::Value::Array(items) => {
                let joined = items
                    .iter()
                    .map(|item| match item {
                        toml::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(",");
                settings.insert(full_key, joined);
            }
            other => settings.insert(full_key, other.to_string()),
        }
    }
}

fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Some(ms) = value.strip_suffix("ms") {
        return ms.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(s) = value.strip_suffix('s') {
        return s.trim().parse::<u64>().ok().map(Duration::from_secs);
    }
    if let Some(m) = value.strip_suffix('m') {
        return m.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60));
    }
    value.parse::<u64>().ok().map(Duration::from_secs)
}
