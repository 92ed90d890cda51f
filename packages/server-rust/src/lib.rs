//! `topicflow` server: handler registration, produce interception, and
//! lifecycle orchestration of consume loops and producer clients.

pub mod config;
pub mod export;
pub mod host;
pub mod lifecycle;
pub mod memory;
pub mod producer;
pub mod registry;

pub use config::{AppConfig, LifecycleConfig};
pub use export::ManifestExporter;
pub use lifecycle::{Collaborators, LifecycleError, LifecycleState, Orchestrator};
pub use memory::{MemoryBroker, MemoryConsumeLoop, MemoryProducer, MemoryProducerFactory};
pub use producer::{ClientBinding, Producer, ProducerSlot, Readiness};
pub use registry::{
    ConsumeSpec, ConsumerRegistration, ProduceSpec, ProducerRegistration, Registrar, Registry,
};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
