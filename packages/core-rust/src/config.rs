//! Broker client configuration and per-registration overrides.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client-tuning options attached to a single registration. Values pass
/// through verbatim to the client collaborator.
pub type ClientOptions = BTreeMap<String, Value>;

/// Well-known configuration keys.
pub mod keys {
    /// Broker connection endpoint(s), e.g. `"localhost:9092"`.
    pub const BOOTSTRAP_SERVERS: &str = "bootstrap_servers";
    /// Where a consumer without committed progress starts: `earliest` or `latest`.
    pub const AUTO_OFFSET_RESET: &str = "auto_offset_reset";
    /// Maximum records returned by one poll.
    pub const MAX_POLL_RECORDS: &str = "max_poll_records";
    /// Maximum number of in-flight buffered records.
    pub const MAX_BUFFER_SIZE: &str = "max_buffer_size";
    /// Consumer group used to commit progress.
    pub const GROUP_ID: &str = "group_id";
    /// Whether progress is committed after every poll.
    pub const ENABLE_AUTO_COMMIT: &str = "enable_auto_commit";
    /// Idle wait between empty polls, in milliseconds.
    pub const POLL_INTERVAL_MS: &str = "poll_interval_ms";
}

/// Errors raised when a configuration value has the wrong shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("config key '{key}' must be {expected}")]
    InvalidValue { key: String, expected: &'static str },
}

/// Offset reset policy for consumers without committed progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    Earliest,
    Latest,
}

impl FromStr for OffsetReset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earliest" => Ok(Self::Earliest),
            "latest" => Ok(Self::Latest),
            _ => Err(ConfigError::InvalidValue {
                key: keys::AUTO_OFFSET_RESET.to_string(),
                expected: "\"earliest\" or \"latest\"",
            }),
        }
    }
}

impl fmt::Display for OffsetReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Earliest => f.write_str("earliest"),
            Self::Latest => f.write_str("latest"),
        }
    }
}

/// Global broker configuration shared by every registration.
///
/// Stored as an ordered key/value map so unknown keys reach the client
/// untouched. [`KafkaConfig::new`] fills in defaults for the recognised keys
/// the caller left out:
///
/// | key                 | default            |
/// |---------------------|--------------------|
/// | `bootstrap_servers` | `"localhost:9092"` |
/// | `auto_offset_reset` | `"earliest"`       |
/// | `max_poll_records`  | `100`              |
/// | `max_buffer_size`   | `100`              |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KafkaConfig {
    entries: ClientOptions,
}

impl KafkaConfig {
    /// Builds a config from `entries`, adding defaults for missing keys.
    #[must_use]
    pub fn new(entries: ClientOptions) -> Self {
        let mut config = Self { entries };
        config.fill_default(keys::BOOTSTRAP_SERVERS, Value::from("localhost:9092"));
        config.fill_default(keys::AUTO_OFFSET_RESET, Value::from("earliest"));
        config.fill_default(keys::MAX_POLL_RECORDS, Value::from(100_u64));
        config.fill_default(keys::MAX_BUFFER_SIZE, Value::from(100_u64));
        config
    }

    /// Builds a config holding exactly `entries`, without defaults.
    #[must_use]
    pub fn from_entries(entries: ClientOptions) -> Self {
        Self { entries }
    }

    fn fill_default(&mut self, key: &str, value: Value) {
        self.entries.entry(key.to_string()).or_insert(value);
    }

    /// Sets `key`, replacing any existing value.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Returns the raw value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Returns all entries.
    #[must_use]
    pub fn entries(&self) -> &ClientOptions {
        &self.entries
    }

    /// Shallow merge: keys in `overrides` replace matching keys here.
    #[must_use]
    pub fn merged_with(&self, overrides: &ClientOptions) -> Self {
        let mut entries = self.entries.clone();
        entries.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { entries }
    }

    /// Config for a producer client: only the connection endpoint is taken
    /// from the global config, the rest comes from the registration.
    #[must_use]
    pub fn producer_config(&self, overrides: &ClientOptions) -> Self {
        let mut entries = ClientOptions::new();
        if let Some(servers) = self.entries.get(keys::BOOTSTRAP_SERVERS) {
            entries.insert(keys::BOOTSTRAP_SERVERS.to_string(), servers.clone());
        }
        Self { entries }.merged_with(overrides)
    }

    /// Returns the string value for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the value is not a string.
    pub fn str_value(&self, key: &str) -> Result<Option<&str>, ConfigError> {
        match self.entries.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(invalid(key, "a string")),
        }
    }

    /// Returns the unsigned integer value for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the value is not a non-negative integer.
    pub fn u64_value(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        match self.entries.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_u64()
                .map(Some)
                .ok_or_else(|| invalid(key, "a non-negative integer")),
        }
    }

    /// Returns the boolean value for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the value is not a boolean.
    pub fn bool_value(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.entries.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(invalid(key, "a boolean")),
        }
    }

    /// Broker connection endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the value is not a string.
    pub fn bootstrap_servers(&self) -> Result<Option<&str>, ConfigError> {
        self.str_value(keys::BOOTSTRAP_SERVERS)
    }

    /// Offset reset policy; `earliest` when unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for anything but `earliest`/`latest`.
    pub fn auto_offset_reset(&self) -> Result<OffsetReset, ConfigError> {
        self.str_value(keys::AUTO_OFFSET_RESET)?
            .map_or(Ok(OffsetReset::Earliest), str::parse)
    }

    /// Maximum records per poll batch.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the value is not an integer.
    pub fn max_poll_records(&self) -> Result<Option<u64>, ConfigError> {
        self.u64_value(keys::MAX_POLL_RECORDS)
    }

    /// Maximum in-flight buffer size.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the value is not an integer.
    pub fn max_buffer_size(&self) -> Result<Option<u64>, ConfigError> {
        self.u64_value(keys::MAX_BUFFER_SIZE)
    }
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self::new(ClientOptions::new())
    }
}

fn invalid(key: &str, expected: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn options(pairs: &[(&str, Value)]) -> ClientOptions {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn defaults_fill_missing_keys() {
        let config = KafkaConfig::default();
        assert_eq!(config.bootstrap_servers().unwrap(), Some("localhost:9092"));
        assert_eq!(config.auto_offset_reset().unwrap(), OffsetReset::Earliest);
        assert_eq!(config.max_poll_records().unwrap(), Some(100));
        assert_eq!(config.max_buffer_size().unwrap(), Some(100));
    }

    #[test]
    fn defaults_do_not_override_caller_values() {
        let config = KafkaConfig::new(options(&[
            ("bootstrap_servers", json!("broker:29092")),
            ("max_poll_records", json!(5)),
        ]));
        assert_eq!(config.bootstrap_servers().unwrap(), Some("broker:29092"));
        assert_eq!(config.max_poll_records().unwrap(), Some(5));
        assert_eq!(config.max_buffer_size().unwrap(), Some(100));
    }

    #[test]
    fn registration_options_win_on_merge() {
        let global = KafkaConfig::default().with("max_poll_records", 100);
        let merged = global.merged_with(&options(&[("max_poll_records", json!(10))]));
        assert_eq!(merged.max_poll_records().unwrap(), Some(10));
        // Untouched keys survive.
        assert_eq!(merged.bootstrap_servers().unwrap(), Some("localhost:9092"));
        // The global config itself is unchanged.
        assert_eq!(global.max_poll_records().unwrap(), Some(100));
    }

    #[test]
    fn merge_passes_unknown_keys_verbatim() {
        let merged = KafkaConfig::default()
            .merged_with(&options(&[("session_timeout_ms", json!({"nested": [1, 2]}))]));
        assert_eq!(
            merged.get("session_timeout_ms"),
            Some(&json!({"nested": [1, 2]}))
        );
    }

    #[test]
    fn producer_config_only_inherits_endpoint() {
        let global = KafkaConfig::default().with("max_poll_records", 7);
        let producer = global.producer_config(&options(&[("acks", json!("all"))]));
        assert_eq!(producer.bootstrap_servers().unwrap(), Some("localhost:9092"));
        assert_eq!(producer.get("acks"), Some(&json!("all")));
        assert!(producer.get("max_poll_records").is_none());
        assert!(producer.get("auto_offset_reset").is_none());
    }

    #[test]
    fn producer_config_endpoint_can_be_overridden() {
        let producer = KafkaConfig::default()
            .producer_config(&options(&[("bootstrap_servers", json!("other:9092"))]));
        assert_eq!(producer.bootstrap_servers().unwrap(), Some("other:9092"));
    }

    #[test]
    fn wrong_value_types_are_reported() {
        let config = KafkaConfig::default()
            .with("max_poll_records", "lots")
            .with("auto_offset_reset", "sometimes");
        assert!(matches!(
            config.max_poll_records(),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(config.auto_offset_reset().is_err());
    }

    #[test]
    fn serializes_as_flat_map() {
        let config = KafkaConfig::from_entries(options(&[("group_id", json!("billing"))]));
        assert_eq!(
            serde_json::to_value(&config).unwrap(),
            json!({"group_id": "billing"})
        );
    }
}
