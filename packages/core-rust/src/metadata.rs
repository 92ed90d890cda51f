//! Service and broker metadata handed to the spec exporter.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Contact details published alongside the service description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub name: String,
    pub url: String,
    pub email: String,
}

impl Default for ContactInfo {
    fn default() -> Self {
        Self {
            name: "author".to_string(),
            url: "https://www.google.com".to_string(),
            email: "noreply@gmail.com".to_string(),
        }
    }
}

/// Description of the service that owns the registered handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub title: String,
    pub version: String,
    pub description: String,
    pub contact: ContactInfo,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            title: "topicflow".to_string(),
            version: "0.1.0".to_string(),
            description: String::new(),
            contact: ContactInfo::default(),
        }
    }
}

/// A single broker endpoint as advertised in generated documentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KafkaBroker {
    pub url: String,
    pub description: String,
    pub port: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "kafka".to_string()
}

impl KafkaBroker {
    /// The local development broker.
    #[must_use]
    pub fn localhost() -> Self {
        Self {
            url: "https://localhost".to_string(),
            description: "Local (dev) Kafka broker".to_string(),
            port: "9092".to_string(),
            protocol: default_protocol(),
        }
    }
}

/// Named broker endpoints, keyed by environment name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KafkaBrokers {
    pub brokers: BTreeMap<String, KafkaBroker>,
}

impl Default for KafkaBrokers {
    fn default() -> Self {
        let mut brokers = BTreeMap::new();
        brokers.insert("localhost".to_string(), KafkaBroker::localhost());
        Self { brokers }
    }
}
