use std::path::PathBuf;
use std::time::Duration;

use topicflow_core::{KafkaBrokers, KafkaConfig, ServiceInfo};

/// Application-level configuration for the orchestrator.
///
/// Holds the global broker config that every registration is merged over,
/// the metadata handed to the spec exporter, and lifecycle tuning.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Global broker configuration. Per-registration options override it.
    pub kafka: KafkaConfig,
    /// Service description published by the spec exporter.
    pub service: ServiceInfo,
    /// Broker endpoints published by the spec exporter.
    pub brokers: KafkaBrokers,
    /// Root directory for generated artifacts. Defaults to the working directory.
    pub root_path: PathBuf,
    pub lifecycle: LifecycleConfig,
}

impl AppConfig {
    /// Directory handed to the spec exporter: `<root_path>/asyncapi`.
    #[must_use]
    pub fn asyncapi_path(&self) -> PathBuf {
        self.root_path.join("asyncapi")
    }
}

/// Tuning for the start/stop sequence.
#[derive(Debug, Clone, Default)]
pub struct LifecycleConfig {
    /// Upper bound on joining consumer tasks during stop. `None` waits
    /// indefinitely; an unresponsive consume loop then blocks shutdown.
    pub join_timeout: Option<Duration>,
}
