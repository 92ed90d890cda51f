//! Error taxonomy shared by the registrar, the interceptor and the collaborators.

use crate::config::ConfigError;
use crate::payload::CodecError;

/// Errors reported by a producer client collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("producer client is not started")]
    NotStarted,
    #[error("broker rejected the record: {0}")]
    Rejected(String),
    #[error("invalid client configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Why a produce call failed.
#[derive(Debug, thiserror::Error)]
pub enum PublishCause {
    #[error(transparent)]
    Encode(#[from] CodecError),
    #[error("no producer client is running for this topic")]
    NotStarted,
    #[error("producer client failed to start: {0}")]
    StartFailed(String),
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Raised from a wrapped produce call when the value could not be published.
/// The handler's result is discarded.
#[derive(Debug, thiserror::Error)]
#[error("failed to publish to topic '{topic}': {cause}")]
pub struct PublishError {
    pub topic: String,
    #[source]
    pub cause: PublishCause,
}

impl PublishError {
    pub fn new(topic: impl Into<String>, cause: impl Into<PublishCause>) -> Self {
        Self {
            topic: topic.into(),
            cause: cause.into(),
        }
    }
}

/// Unrecoverable failure of a consume loop. Surfaced at the next shutdown join.
#[derive(Debug, thiserror::Error)]
pub enum ConsumeLoopError {
    #[error("invalid consumer configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("broker error: {0}")]
    Broker(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure while delivering one message to a consumer handler.
///
/// Consume loops decide what to do with these; they are not fatal by themselves.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Decode(#[from] CodecError),
    #[error("handler failed: {0}")]
    Handler(#[source] anyhow::Error),
}

/// Failure of the spec exporter. Logged, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum SpecExportError {
    #[error("failed to write export artifacts: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to render export artifacts: {0}")]
    Render(#[from] serde_json::Error),
}
