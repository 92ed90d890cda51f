//! `topicflow` core: topic naming, broker configuration, payload codec, and
//! the collaborator traits the orchestrator drives.

pub mod config;
pub mod error;
pub mod metadata;
pub mod naming;
pub mod payload;
pub mod signal;
pub mod traits;

pub use config::{ClientOptions, ConfigError, KafkaConfig, OffsetReset};
pub use error::{
    ClientError, ConsumeLoopError, DispatchError, PublishCause, PublishError, SpecExportError,
};
pub use metadata::{ContactInfo, KafkaBroker, KafkaBrokers, ServiceInfo};
pub use naming::{NamingError, CONSUMER_PREFIX, PRODUCER_PREFIX};
pub use payload::{CodecError, PayloadType};
pub use signal::{CancellationSignal, ShutdownPredicate};
pub use traits::{
    ConsumeLoop, ConsumeRequest, ConsumerCallback, DeliveryAck, ExportRequest, ProducerClient,
    ProducerFactory, SpecExporter,
};
