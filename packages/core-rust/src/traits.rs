use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;

use crate::config::KafkaConfig;
use crate::error::{ClientError, ConsumeLoopError, DispatchError, SpecExportError};
use crate::metadata::{KafkaBrokers, ServiceInfo};
use crate::payload::{self, PayloadType};
use crate::signal::ShutdownPredicate;

// ---------------------------------------------------------------------------
// ConsumerCallback
// ---------------------------------------------------------------------------

type DispatchFn = dyn Fn(Bytes) -> BoxFuture<'static, Result<(), DispatchError>> + Send + Sync;

/// Type-erased consumer handler: decodes raw bytes into the handler's payload
/// type and invokes it.
#[derive(Clone)]
pub struct ConsumerCallback {
    payload_type: PayloadType,
    dispatch: Arc<DispatchFn>,
}

impl ConsumerCallback {
    /// Wraps a typed async handler.
    pub fn new<M, F, Fut>(handler: F) -> Self
    where
        M: DeserializeOwned + Send + 'static,
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let dispatch = move |bytes: Bytes| match payload::decode::<M>(&bytes) {
            Ok(message) => handler(message)
                .map(|result| result.map_err(DispatchError::Handler))
                .boxed(),
            Err(err) => futures_util::future::ready(Err(DispatchError::Decode(err))).boxed(),
        };
        Self {
            payload_type: PayloadType::of::<M>(),
            dispatch: Arc::new(dispatch),
        }
    }

    /// The payload type the handler accepts.
    #[must_use]
    pub fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    /// Decodes `bytes` and runs the handler on the result.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Decode`] for undecodable bytes and
    /// [`DispatchError::Handler`] when the handler itself fails.
    pub async fn dispatch(&self, bytes: Bytes) -> Result<(), DispatchError> {
        (self.dispatch)(bytes).await
    }
}

impl fmt::Debug for ConsumerCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerCallback")
            .field("payload_type", &self.payload_type)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ConsumeLoop
// ---------------------------------------------------------------------------

/// Everything a consume loop needs to serve one registration.
#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    pub topics: BTreeSet<String>,
    pub callback: ConsumerCallback,
    pub payload_type: PayloadType,
    pub shutdown: ShutdownPredicate,
    /// Global config merged with the registration's options.
    pub config: KafkaConfig,
}

/// Wire-level consume loop.
///
/// Polls `topics` until `shutdown` is set, decoding each record into the
/// payload type and handing it to `callback`. Progress is committed per
/// `config`. Returns `Ok` on clean shutdown.
#[async_trait]
pub trait ConsumeLoop: Send + Sync {
    async fn run(&self, request: ConsumeRequest) -> Result<(), ConsumeLoopError>;
}

// ---------------------------------------------------------------------------
// Producer client
// ---------------------------------------------------------------------------

/// Broker acknowledgment for a published record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAck {
    pub topic: String,
    pub partition: i32,
    pub offset: u64,
}

/// A broker producer connection.
#[async_trait]
pub trait ProducerClient: Send + Sync {
    /// Connects to the broker. Calling it on a started client is a no-op.
    async fn start(&self) -> Result<(), ClientError>;

    /// Publishes `payload` and waits for the broker's acknowledgment.
    async fn send(&self, topic: &str, payload: Bytes) -> Result<DeliveryAck, ClientError>;

    /// Flushes pending records and disconnects.
    async fn stop(&self) -> Result<(), ClientError>;
}

/// Creates producer clients for registrations that did not bring their own.
pub trait ProducerFactory: Send + Sync {
    /// Builds an unstarted client from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the configuration is unusable.
    fn create(&self, config: &KafkaConfig) -> Result<Arc<dyn ProducerClient>, ClientError>;
}

// ---------------------------------------------------------------------------
// SpecExporter
// ---------------------------------------------------------------------------

/// Snapshot of the registered topics handed to the exporter at startup.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub consumers: BTreeMap<String, PayloadType>,
    pub producers: BTreeMap<String, PayloadType>,
    pub brokers: KafkaBrokers,
    pub service: ServiceInfo,
    /// Directory the exporter writes its artifacts under.
    pub output_dir: PathBuf,
}

/// Writes documentation artifacts describing the registered topics.
#[async_trait]
pub trait SpecExporter: Send + Sync {
    async fn export(&self, request: &ExportRequest) -> Result<(), SpecExportError>;
}
