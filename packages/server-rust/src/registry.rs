use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use topicflow_core::naming::{self, NamingError, CONSUMER_PREFIX, PRODUCER_PREFIX};
use topicflow_core::{ClientOptions, ConsumerCallback, PayloadType, ProducerClient};

use crate::producer::{ClientBinding, Producer, ProducerSlot, ProducerTable};

// ---------------------------------------------------------------------------
// Registration specs
// ---------------------------------------------------------------------------

/// How a consumer handler is bound to its topic.
#[derive(Debug, Clone)]
pub struct ConsumeSpec {
    topic: Option<String>,
    prefix: String,
    options: ClientOptions,
}

impl ConsumeSpec {
    /// Infers the topic from the handler identifier with the `on_` prefix.
    #[must_use]
    pub fn new() -> Self {
        Self {
            topic: None,
            prefix: CONSUMER_PREFIX.to_string(),
            options: ClientOptions::new(),
        }
    }

    /// Uses `topic` instead of inferring it.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Prefix stripped from the handler identifier when inferring the topic.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Client option overriding the global config for this registration.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

impl Default for ConsumeSpec {
    fn default() -> Self {
        Self::new()
    }
}

/// How a producer handler is bound to its topic and client.
#[derive(Debug, Clone)]
pub struct ProduceSpec {
    topic: Option<String>,
    prefix: String,
    binding: ClientBinding,
    options: ClientOptions,
}

impl ProduceSpec {
    /// Infers the topic from the handler identifier with the `to_` prefix;
    /// a client is created at startup.
    #[must_use]
    pub fn new() -> Self {
        Self {
            topic: None,
            prefix: PRODUCER_PREFIX.to_string(),
            binding: ClientBinding::Unbound,
            options: ClientOptions::new(),
        }
    }

    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Publishes through `client` instead of creating one at startup.
    #[must_use]
    pub fn client(mut self, client: Arc<dyn ProducerClient>) -> Self {
        self.binding = ClientBinding::Bound(client);
        self
    }

    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

impl Default for ProduceSpec {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Registrations
// ---------------------------------------------------------------------------

/// A consumer handler bound to a topic.
#[derive(Debug, Clone)]
pub struct ConsumerRegistration {
    pub topic: String,
    pub callback: ConsumerCallback,
    pub options: ClientOptions,
}

/// A producer handler bound to a topic.
#[derive(Debug, Clone)]
pub struct ProducerRegistration {
    pub topic: String,
    pub payload_type: PayloadType,
    pub slot: Arc<ProducerSlot>,
    pub options: ClientOptions,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Finished set of registrations, keyed by topic.
///
/// Produced by [`Registrar::finish`] and owned by the orchestrator, which
/// only reads it. Holds exactly one consumer and one producer entry per topic.
#[derive(Debug, Default)]
pub struct Registry {
    consumers: BTreeMap<String, ConsumerRegistration>,
    producers: BTreeMap<String, ProducerRegistration>,
    table: Arc<ProducerTable>,
}

impl Registry {
    pub fn consumers(&self) -> impl Iterator<Item = &ConsumerRegistration> {
        self.consumers.values()
    }

    pub fn producers(&self) -> impl Iterator<Item = &ProducerRegistration> {
        self.producers.values()
    }

    #[must_use]
    pub fn consumer(&self, topic: &str) -> Option<&ConsumerRegistration> {
        self.consumers.get(topic)
    }

    #[must_use]
    pub fn producer(&self, topic: &str) -> Option<&ProducerRegistration> {
        self.producers.get(topic)
    }

    /// Consumer topic -> payload type.
    #[must_use]
    pub fn consumer_topics(&self) -> BTreeMap<String, PayloadType> {
        self.consumers
            .iter()
            .map(|(topic, reg)| (topic.clone(), reg.callback.payload_type()))
            .collect()
    }

    /// Producer topic -> payload type.
    #[must_use]
    pub fn producer_topics(&self) -> BTreeMap<String, PayloadType> {
        self.producers
            .iter()
            .map(|(topic, reg)| (topic.clone(), reg.payload_type))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Registrar
// ---------------------------------------------------------------------------

/// Builder that binds handlers to topics before startup.
///
/// Topic names are resolved eagerly so a naming mistake fails at
/// registration, before any task exists. Registering a topic a second time
/// replaces the earlier registration.
#[derive(Debug, Default)]
pub struct Registrar {
    registry: Registry,
}

impl Registrar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an async consumer handler for messages of type `M`.
    ///
    /// `identifier` is the handler's name, used to infer the topic when
    /// `spec` does not name one. Returns `handler` unchanged; calling it
    /// directly is an ordinary function call.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError`] if no valid topic can be resolved.
    pub fn register_consumer<M, F, Fut>(
        &mut self,
        identifier: &str,
        spec: ConsumeSpec,
        handler: F,
    ) -> Result<F, NamingError>
    where
        M: DeserializeOwned + Send + 'static,
        F: Fn(M) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let topic = naming::resolve_topic(spec.topic.as_deref(), identifier, &spec.prefix)?;
        let callback = ConsumerCallback::new(handler.clone());
        debug!(%topic, identifier, payload = %callback.payload_type(), "registered consumer");
        self.registry.consumers.insert(
            topic.clone(),
            ConsumerRegistration {
                topic,
                callback,
                options: spec.options,
            },
        );
        Ok(handler)
    }

    /// [`Registrar::register_consumer`] with the identifier taken from the
    /// handler's function name.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError`] if no valid topic can be resolved; closures
    /// have no usable name and need an explicit topic.
    pub fn register_consumer_fn<M, F, Fut>(
        &mut self,
        spec: ConsumeSpec,
        handler: F,
    ) -> Result<F, NamingError>
    where
        M: DeserializeOwned + Send + 'static,
        F: Fn(M) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let identifier = naming::identifier_of(&handler);
        self.register_consumer(identifier, spec, handler)
    }

    /// Registers a producer handler whose return value is published.
    ///
    /// Returns the wrapped [`Producer`]; calling it publishes the result and
    /// waits for the broker acknowledgment.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError`] if no valid topic can be resolved.
    pub fn register_producer<A, M, F>(
        &mut self,
        identifier: &str,
        spec: ProduceSpec,
        handler: F,
    ) -> Result<Producer<A, M>, NamingError>
    where
        M: Serialize + 'static,
        A: 'static,
        F: Fn(A) -> M + Send + Sync + 'static,
    {
        let topic = naming::resolve_topic(spec.topic.as_deref(), identifier, &spec.prefix)?;
        let slot = Arc::new(ProducerSlot::new(topic.clone(), spec.binding));
        self.registry
            .table
            .insert(topic.clone(), Arc::clone(&slot));
        debug!(%topic, identifier, bound = slot.binding().is_bound(), "registered producer");
        self.registry.producers.insert(
            topic.clone(),
            ProducerRegistration {
                topic: topic.clone(),
                payload_type: PayloadType::of::<M>(),
                slot,
                options: spec.options,
            },
        );
        Ok(Producer::new(
            topic,
            Arc::new(handler),
            Arc::clone(&self.registry.table),
        ))
    }

    /// [`Registrar::register_producer`] with the identifier taken from the
    /// handler's function name.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError`] if no valid topic can be resolved.
    pub fn register_producer_fn<A, M, F>(
        &mut self,
        spec: ProduceSpec,
        handler: F,
    ) -> Result<Producer<A, M>, NamingError>
    where
        M: Serialize + 'static,
        A: 'static,
        F: Fn(A) -> M + Send + Sync + 'static,
    {
        let identifier = naming::identifier_of(&handler);
        self.register_producer(identifier, spec, handler)
    }

    /// Ends the registration phase.
    #[must_use]
    pub fn finish(self) -> Registry {
        self.registry
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use proptest::prelude::*;
    use serde::Deserialize;
    use topicflow_core::KafkaConfig;

    use super::*;
    use crate::memory::{MemoryBroker, MemoryProducer};

    #[derive(Debug, Deserialize)]
    struct Order {
        id: u64,
    }

    #[derive(Debug, Serialize)]
    struct Receipt {
        id: u64,
    }

    async fn on_orders(_order: Order) -> anyhow::Result<()> {
        Ok(())
    }

    async fn process(_order: Order) -> anyhow::Result<()> {
        Ok(())
    }

    fn to_receipts(id: u64) -> Receipt {
        Receipt { id }
    }

    #[test]
    fn consumer_topic_inferred_from_function_name() {
        let mut registrar = Registrar::new();
        registrar
            .register_consumer_fn(ConsumeSpec::new(), on_orders)
            .unwrap();
        let registry = registrar.finish();
        let reg = registry.consumer("orders").unwrap();
        assert_eq!(reg.topic, "orders");
        assert_eq!(reg.callback.payload_type().short_name(), "Order");
    }

    #[test]
    fn consumer_without_prefix_fails() {
        let mut registrar = Registrar::new();
        let Err(err) = registrar.register_consumer_fn(ConsumeSpec::new(), process) else {
            panic!("identifier without the consumer prefix was accepted");
        };
        assert!(matches!(err, NamingError::MissingPrefix { .. }));
        assert_eq!(registrar.finish().consumers().count(), 0);
    }

    #[test]
    fn explicit_topic_bypasses_prefix() {
        let mut registrar = Registrar::new();
        registrar
            .register_consumer_fn(ConsumeSpec::new().topic("order-events"), process)
            .unwrap();
        assert!(registrar.finish().consumer("order-events").is_some());
    }

    #[test]
    fn custom_prefix() {
        let mut registrar = Registrar::new();
        registrar
            .register_consumer("handle_orders", ConsumeSpec::new().prefix("handle_"), on_orders)
            .unwrap();
        assert!(registrar.finish().consumer("orders").is_some());
    }

    #[test]
    fn closures_need_an_identifier_or_topic() {
        let mut registrar = Registrar::new();
        let closure = |_: Order| async { anyhow::Ok(()) };
        assert!(registrar
            .register_consumer_fn(ConsumeSpec::new(), closure)
            .is_err());
        let _on_orders = registrar
            .register_consumer("on_orders", ConsumeSpec::new(), closure)
            .unwrap();
        assert!(registrar.finish().consumer("orders").is_some());
    }

    #[tokio::test]
    async fn consumer_handler_is_returned_unchanged() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let handler = move |_: Order| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { anyhow::Ok(()) }
        };

        let mut registrar = Registrar::new();
        let returned = registrar
            .register_consumer("on_orders", ConsumeSpec::new(), handler)
            .unwrap();
        returned(Order { id: 1 }).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reregistration_replaces_previous_entry() {
        let mut registrar = Registrar::new();
        registrar
            .register_consumer(
                "on_orders",
                ConsumeSpec::new().option("max_poll_records", 1),
                on_orders,
            )
            .unwrap();
        registrar
            .register_consumer(
                "on_orders",
                ConsumeSpec::new().option("max_poll_records", 2),
                on_orders,
            )
            .unwrap();
        let registry = registrar.finish();

        assert_eq!(registry.consumers().count(), 1);
        assert_eq!(
            registry.consumer("orders").unwrap().options["max_poll_records"],
            serde_json::json!(2)
        );
    }

    #[test]
    fn producer_topic_inferred_and_unbound_by_default() {
        let mut registrar = Registrar::new();
        let producer = registrar
            .register_producer_fn(ProduceSpec::new(), to_receipts)
            .unwrap();
        assert_eq!(producer.topic(), "receipts");

        let registry = registrar.finish();
        let reg = registry.producer("receipts").unwrap();
        assert!(!reg.slot.binding().is_bound());
        assert_eq!(reg.payload_type.short_name(), "Receipt");
        assert_eq!(
            registry.producer_topics().keys().collect::<Vec<_>>(),
            vec!["receipts"]
        );
    }

    #[test]
    fn producer_with_client_is_bound() {
        let client: Arc<dyn ProducerClient> = Arc::new(MemoryProducer::new(
            Arc::new(MemoryBroker::new()),
            KafkaConfig::default(),
        ));
        let mut registrar = Registrar::new();
        registrar
            .register_producer(
                "emit",
                ProduceSpec::new().topic("receipts").client(client),
                to_receipts,
            )
            .unwrap();
        assert!(registrar
            .finish()
            .producer("receipts")
            .unwrap()
            .slot
            .binding()
            .is_bound());
    }

    #[test]
    fn producer_reregistration_replaces_slot_for_existing_wrappers() {
        let mut registrar = Registrar::new();
        let _first = registrar
            .register_producer_fn(ProduceSpec::new(), to_receipts)
            .unwrap();
        registrar
            .register_producer_fn(ProduceSpec::new().option("acks", "all"), to_receipts)
            .unwrap();
        let registry = registrar.finish();

        assert_eq!(registry.producers().count(), 1);
        let reg = registry.producer("receipts").unwrap();
        let current = registry.table.get("receipts").unwrap();
        assert!(Arc::ptr_eq(current.value(), &reg.slot));
    }

    #[test]
    fn invalid_producer_prefix_fails() {
        let mut registrar = Registrar::new();
        assert!(registrar
            .register_producer("emit_receipts", ProduceSpec::new(), to_receipts)
            .is_err());
    }

    proptest! {
        #[test]
        fn last_registration_per_topic_wins(
            limits in proptest::collection::vec(1_u64..1000, 1..8)
        ) {
            let mut registrar = Registrar::new();
            for limit in &limits {
                registrar
                    .register_consumer(
                        "on_orders",
                        ConsumeSpec::new().option("max_poll_records", *limit),
                        on_orders,
                    )
                    .unwrap();
            }
            let registry = registrar.finish();
            prop_assert_eq!(registry.consumers().count(), 1);
            prop_assert_eq!(
                &registry.consumer("orders").unwrap().options["max_poll_records"],
                &serde_json::json!(limits[limits.len() - 1])
            );
        }
    }
}
