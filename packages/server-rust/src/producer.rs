//! Produce interception: turns a plain handler call into publish-and-acknowledge.
//!
//! Each producer registration owns a [`ProducerSlot`] holding its client
//! binding and readiness. The wrapped [`Producer`] looks its slot up by topic
//! on every call, so a wrapper obtained before a re-registration of the same
//! topic publishes through the replacement.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info_span, warn, Instrument};

use topicflow_core::payload;
use topicflow_core::{
    ClientError, KafkaConfig, ProducerClient, ProducerFactory, PublishCause, PublishError,
};

// ---------------------------------------------------------------------------
// ClientBinding
// ---------------------------------------------------------------------------

/// Whether a producer registration has a client yet.
///
/// Transitions at most once, `Unbound -> Bound`, and never reverts.
#[derive(Clone, Default)]
pub enum ClientBinding {
    #[default]
    Unbound,
    Bound(Arc<dyn ProducerClient>),
}

impl ClientBinding {
    #[must_use]
    pub fn is_bound(&self) -> bool {
        matches!(self, Self::Bound(_))
    }

    #[must_use]
    pub fn client(&self) -> Option<Arc<dyn ProducerClient>> {
        match self {
            Self::Unbound => None,
            Self::Bound(client) => Some(Arc::clone(client)),
        }
    }
}

impl fmt::Debug for ClientBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbound => f.write_str("Unbound"),
            Self::Bound(_) => f.write_str("Bound(..)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Readiness
// ---------------------------------------------------------------------------

/// Start outcome of a producer client, used as a barrier by produce calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Not started (before the first start or after a stop).
    Idle,
    /// Start issued, outcome pending.
    Starting,
    Ready,
    Failed(String),
}

// ---------------------------------------------------------------------------
// ProducerSlot
// ---------------------------------------------------------------------------

/// Runtime state of one producer registration.
pub struct ProducerSlot {
    topic: String,
    binding: RwLock<ClientBinding>,
    readiness: watch::Sender<Readiness>,
}

impl ProducerSlot {
    pub(crate) fn new(topic: String, binding: ClientBinding) -> Self {
        let (readiness, _rx) = watch::channel(Readiness::Idle);
        Self {
            topic,
            binding: RwLock::new(binding),
            readiness,
        }
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn binding(&self) -> ClientBinding {
        self.binding.read().clone()
    }

    #[must_use]
    pub fn readiness(&self) -> Readiness {
        self.readiness.borrow().clone()
    }

    pub(crate) fn set_readiness(&self, readiness: Readiness) {
        self.readiness.send_replace(readiness);
    }

    /// Returns the bound client, creating and binding one from `factory` if
    /// the slot is still unbound.
    pub(crate) fn bind_with(
        &self,
        factory: &dyn ProducerFactory,
        config: &KafkaConfig,
    ) -> Result<Arc<dyn ProducerClient>, ClientError> {
        let mut binding = self.binding.write();
        if let ClientBinding::Bound(client) = &*binding {
            return Ok(Arc::clone(client));
        }
        let client = factory.create(config)?;
        *binding = ClientBinding::Bound(Arc::clone(&client));
        debug!(topic = %self.topic, "bound new producer client");
        Ok(client)
    }

    /// Waits out a pending start, then returns the client if it is ready.
    async fn ready_client(&self) -> Result<Arc<dyn ProducerClient>, PublishCause> {
        let mut rx = self.readiness.subscribe();
        let readiness = rx
            .wait_for(|r| *r != Readiness::Starting)
            .await
            .map(|r| r.clone())
            .map_err(|_| PublishCause::NotStarted)?;

        match readiness {
            Readiness::Ready => self.binding().client().ok_or(PublishCause::NotStarted),
            Readiness::Failed(reason) => Err(PublishCause::StartFailed(reason)),
            Readiness::Idle | Readiness::Starting => Err(PublishCause::NotStarted),
        }
    }
}

impl fmt::Debug for ProducerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerSlot")
            .field("topic", &self.topic)
            .field("binding", &*self.binding.read())
            .field("readiness", &*self.readiness.borrow())
            .finish()
    }
}

/// Topic -> slot table shared by the registry and every [`Producer`].
pub(crate) type ProducerTable = DashMap<String, Arc<ProducerSlot>>;

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

/// Wrapped producer handler returned by registration.
///
/// [`Producer::call`] runs the handler, publishes its JSON-encoded result to
/// the topic, waits for the broker acknowledgment and only then returns the
/// result. If publishing fails the result is dropped and a [`PublishError`]
/// is returned instead.
pub struct Producer<A, M> {
    topic: String,
    handler: Arc<dyn Fn(A) -> M + Send + Sync>,
    table: Arc<ProducerTable>,
    _marker: PhantomData<fn(A) -> M>,
}

impl<A, M> Producer<A, M>
where
    M: Serialize,
{
    pub(crate) fn new(
        topic: String,
        handler: Arc<dyn Fn(A) -> M + Send + Sync>,
        table: Arc<ProducerTable>,
    ) -> Self {
        Self {
            topic,
            handler,
            table,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Invokes the handler and publishes its result.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] if the result cannot be encoded, no client is
    /// ready for the topic, or the broker rejects the record.
    pub async fn call(&self, args: A) -> Result<M, PublishError> {
        let result = (self.handler)(args);
        let span = info_span!("produce", topic = %self.topic);
        async {
            let outcome = self.publish(&result).await;
            match outcome {
                Ok(()) => Ok(result),
                Err(cause) => {
                    warn!(error = %cause, "publish failed");
                    Err(PublishError::new(self.topic.clone(), cause))
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn publish(&self, result: &M) -> Result<(), PublishCause> {
        let bytes = payload::encode(result)?;
        let slot = self
            .table
            .get(&self.topic)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(PublishCause::NotStarted)?;
        let client = slot.ready_client().await?;
        let ack = client.send(&self.topic, bytes).await?;
        debug!(
            partition = ack.partition,
            offset = ack.offset,
            "publish acknowledged"
        );
        Ok(())
    }
}

impl<A, M> Clone for Producer<A, M> {
    fn clone(&self) -> Self {
        Self {
            topic: self.topic.clone(),
            handler: Arc::clone(&self.handler),
            table: Arc::clone(&self.table),
            _marker: PhantomData,
        }
    }
}

impl<A, M> fmt::Debug for Producer<A, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}
