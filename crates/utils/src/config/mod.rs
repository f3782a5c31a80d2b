/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

pub mod http;
pub mod utils;

use std::collections::BTreeMap;

use ahash::AHashMap;

use self::utils::{AsKey, ParseValue};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Config {
    pub keys: BTreeMap<String, String>,
    pub errors: AHashMap<String, ConfigError>,
    pub warnings: AHashMap<String, ConfigWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Parse { error: String },
    Build { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    Missing,
    Parse { error: String },
}

impl Config {
    pub fn new(toml: impl AsRef<str>) -> Result<Self, String> {
        let table = toml
            .as_ref()
            .parse::<toml::Table>()
            .map_err(|err| format!("Failed to parse TOML configuration: {err}"))?;
        let mut config = Config::default();
        config.flatten_table(String::new(), &table);
        Ok(config)
    }

    fn flatten_table(&mut self, prefix: String, table: &toml::Table) {
        for (key, value) in table {
            let key = if prefix.is_empty() {
                key.to_string()
            } else {
                format!("{prefix}.{key}")
            };
            self.flatten_value(key, value);
        }
    }

    fn flatten_value(&mut self, key: String, value: &toml::Value) {
        match value {
            toml::Value::String(value) => {
                self.keys.insert(key, value.clone());
            }
            toml::Value::Integer(value) => {
                self.keys.insert(key, value.to_string());
            }
            toml::Value::Float(value) => {
                self.keys.insert(key, value.to_string());
            }
            toml::Value::Boolean(value) => {
                self.keys.insert(key, value.to_string());
            }
            toml::Value::Datetime(value) => {
                self.keys.insert(key, value.to_string());
            }
            toml::Value::Array(values) => {
                for (pos, value) in values.iter().enumerate() {
                    self.flatten_value(format!("{key}.{pos:04}"), value);
                }
            }
            toml::Value::Table(table) => {
                self.flatten_table(key, table);
            }
        }
    }

    pub fn value(&self, key: impl AsKey) -> Option<&str> {
        self.keys.get(&key.as_key()).map(|s| s.as_str())
    }

    pub fn contains_key(&self, key: impl AsKey) -> bool {
        self.keys.contains_key(&key.as_key())
    }

    pub fn property<T: ParseValue>(&mut self, key: impl AsKey) -> Option<T> {
        let key = key.as_key();
        let value = self.keys.get(&key)?;
        match T::parse_value(value) {
            Ok(value) => Some(value),
            Err(err) => {
                self.new_parse_error(key, err);
                None
            }
        }
    }

    pub fn property_or_default<T: ParseValue>(
        &mut self,
        key: impl AsKey,
        default: &str,
    ) -> Option<T> {
        let key = key.as_key();
        let value = self.keys.get(&key).map(|s| s.as_str()).unwrap_or(default);
        match T::parse_value(value) {
            Ok(value) => Some(value),
            Err(err) => {
                self.new_parse_error(key, err);
                None
            }
        }
    }

    pub fn property_require<T: ParseValue>(&mut self, key: impl AsKey) -> Option<T> {
        let key = key.as_key();
        if self.keys.contains_key(&key) {
            self.property(key)
        } else {
            self.new_parse_error(key, "Missing property");
            None
        }
    }

    /// Returns the array items stored under `prefix`.
    pub fn values(&self, prefix: impl AsKey) -> impl Iterator<Item = (&str, &str)> {
        let full_prefix = prefix.as_prefix();
        self.keys
            .range(full_prefix.clone()..)
            .take_while(move |(key, _)| key.starts_with(full_prefix.as_str()))
            .filter(|(key, _)| {
                key.rsplit_once('.')
                    .is_some_and(|(_, pos)| pos.len() == 4 && pos.bytes().all(|b| b.is_ascii_digit()))
            })
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Iterates over every key below `prefix`, yielding the remainder of the key.
    pub fn iterate_prefix(&self, prefix: impl AsKey) -> impl Iterator<Item = (&str, &str)> {
        let full_prefix = prefix.as_prefix();
        let prefix_len = full_prefix.len();
        self.keys
            .range(full_prefix.clone()..)
            .take_while(move |(key, _)| key.starts_with(full_prefix.as_str()))
            .map(move |(key, value)| (&key[prefix_len..], value.as_str()))
    }

    pub fn sub_keys(&self, prefix: impl AsKey) -> Vec<String> {
        let mut last_key = "";
        let mut keys = Vec::new();
        for (key, _) in self.iterate_prefix(prefix) {
            let key = key.split_once('.').map_or(key, |(key, _)| key);
            if key != last_key {
                keys.push(key.to_string());
                last_key = key;
            }
        }
        keys
    }

    pub fn new_parse_error(&mut self, key: impl AsKey, details: impl Into<String>) {
        self.errors.insert(
            key.as_key(),
            ConfigError::Parse {
                error: details.into(),
            },
        );
    }

    pub fn new_build_error(&mut self, key: impl AsKey, details: impl Into<String>) {
        self.errors.insert(
            key.as_key(),
            ConfigError::Build {
                error: details.into(),
            },
        );
    }

    pub fn new_parse_warning(&mut self, key: impl AsKey, details: impl Into<String>) {
        self.warnings.insert(
            key.as_key(),
            ConfigWarning::Parse {
                error: details.into(),
            },
        );
    }

    pub fn new_missing_property(&mut self, key: impl AsKey) {
        self.warnings.insert(key.as_key(), ConfigWarning::Missing);
    }

    pub fn log_errors(&self) {
        for (key, err) in &self.errors {
            let (cause, details) = match err {
                ConfigError::Parse { error } => (trc::ConfigEvent::ParseError, error),
                ConfigError::Build { error } => (trc::ConfigEvent::BuildError, error),
            };
            trc::event!(Config(cause), Key = key.clone(), Details = details.clone());
        }
    }

    pub fn log_warnings(&self) {
        for (key, warning) in &self.warnings {
            match warning {
                ConfigWarning::Missing => {
                    trc::event!(Config(trc::ConfigEvent::MissingSetting), Key = key.clone());
                }
                ConfigWarning::Parse { error } => {
                    trc::event!(
                        Config(trc::ConfigEvent::ParseWarning),
                        Key = key.clone(),
                        Details = error.clone()
                    );
                }
            }
        }
    }
}
