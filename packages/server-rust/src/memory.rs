//! In-process broker and client collaborators.
//!
//! `MemoryBroker` keeps an append-only log per topic plus committed offsets
//! per consumer group. [`MemoryConsumeLoop`] and [`MemoryProducer`] speak to
//! it through the same collaborator traits a real broker client implements,
//! which makes them suitable for tests, demos, and local development. Both
//! support fault injection.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use topicflow_core::config::keys;
use topicflow_core::{
    ClientError, ConsumeLoop, ConsumeLoopError, ConsumeRequest, DeliveryAck, KafkaConfig,
    OffsetReset, ProducerClient, ProducerFactory,
};

const DEFAULT_POLL_INTERVAL_MS: u64 = 50;
const DEFAULT_MAX_POLL_RECORDS: u64 = 100;

// ---------------------------------------------------------------------------
// MemoryBroker
// ---------------------------------------------------------------------------

/// In-memory broker with one partition per topic.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    logs: DashMap<String, Arc<Mutex<Vec<Bytes>>>>,
    /// (group, topic) -> next offset to consume.
    committed: DashMap<(String, String), u64>,
    rejected: DashMap<String, String>,
    failing: DashMap<String, String>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self, topic: &str) -> Arc<Mutex<Vec<Bytes>>> {
        Arc::clone(self.logs.entry(topic.to_string()).or_default().value())
    }

    /// Appends a record to `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Rejected`] if the topic was marked with
    /// [`MemoryBroker::reject_topic`].
    pub fn append(&self, topic: &str, payload: Bytes) -> Result<DeliveryAck, ClientError> {
        if let Some(reason) = self.rejected.get(topic) {
            return Err(ClientError::Rejected(reason.value().clone()));
        }
        let log = self.log(topic);
        let mut records = log.lock();
        records.push(payload);
        Ok(DeliveryAck {
            topic: topic.to_string(),
            partition: 0,
            offset: records.len() as u64 - 1,
        })
    }

    /// Returns a copy of every record in `topic`.
    #[must_use]
    pub fn records(&self, topic: &str) -> Vec<Bytes> {
        self.logs
            .get(topic)
            .map(|log| log.value().lock().clone())
            .unwrap_or_default()
    }

    /// Number of records in `topic`.
    #[must_use]
    pub fn end_offset(&self, topic: &str) -> u64 {
        self.logs
            .get(topic)
            .map_or(0, |log| log.value().lock().len() as u64)
    }

    fn fetch(&self, topic: &str, from: u64, max: u64) -> Vec<Bytes> {
        let log = self.log(topic);
        let records = log.lock();
        records
            .iter()
            .skip(usize::try_from(from).unwrap_or(usize::MAX))
            .take(usize::try_from(max).unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Next offset `group` will consume from `topic`, if it has committed.
    #[must_use]
    pub fn committed_offset(&self, group: &str, topic: &str) -> Option<u64> {
        self.committed
            .get(&(group.to_string(), topic.to_string()))
            .map(|offset| *offset.value())
    }

    fn commit(&self, group: &str, topic: &str, offset: u64) {
        self.committed
            .insert((group.to_string(), topic.to_string()), offset);
    }

    /// Makes every subsequent append to `topic` fail with `reason`.
    pub fn reject_topic(&self, topic: &str, reason: &str) {
        self.rejected.insert(topic.to_string(), reason.to_string());
    }

    /// Makes consume loops on `topic` fail with `reason` at their next poll.
    pub fn fail_consumers(&self, topic: &str, reason: &str) {
        self.failing.insert(topic.to_string(), reason.to_string());
    }

    /// Clears injected faults on `topic`.
    pub fn heal(&self, topic: &str) {
        self.rejected.remove(topic);
        self.failing.remove(topic);
    }

    fn consumer_failure(&self, topic: &str) -> Option<String> {
        self.failing.get(topic).map(|reason| reason.value().clone())
    }
}

// ---------------------------------------------------------------------------
// MemoryConsumeLoop
// ---------------------------------------------------------------------------

/// Consume loop backed by a [`MemoryBroker`].
///
/// Honours `auto_offset_reset`, `max_poll_records`, `group_id`,
/// `enable_auto_commit` (default `true`) and `poll_interval_ms`. Handler
/// failures are logged and the record is skipped.
#[derive(Debug, Clone)]
pub struct MemoryConsumeLoop {
    broker: Arc<MemoryBroker>,
}

impl MemoryConsumeLoop {
    #[must_use]
    pub fn new(broker: Arc<MemoryBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl ConsumeLoop for MemoryConsumeLoop {
    async fn run(&self, request: ConsumeRequest) -> Result<(), ConsumeLoopError> {
        let config = &request.config;
        let reset = config.auto_offset_reset()?;
        let batch = config
            .max_poll_records()?
            .unwrap_or(DEFAULT_MAX_POLL_RECORDS)
            .max(1);
        let group = config.str_value(keys::GROUP_ID)?.map(str::to_string);
        let auto_commit = config.bool_value(keys::ENABLE_AUTO_COMMIT)?.unwrap_or(true);
        let poll_interval = Duration::from_millis(
            config
                .u64_value(keys::POLL_INTERVAL_MS)?
                .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
        );

        let mut positions: BTreeMap<String, u64> = request
            .topics
            .iter()
            .map(|topic| {
                let committed = group
                    .as_deref()
                    .and_then(|g| self.broker.committed_offset(g, topic));
                let start = committed.unwrap_or_else(|| match reset {
                    OffsetReset::Earliest => 0,
                    OffsetReset::Latest => self.broker.end_offset(topic),
                });
                (topic.clone(), start)
            })
            .collect();

        let mut shutdown = request.shutdown.clone();
        debug!(topics = ?request.topics, %reset, batch, "consume loop started");

        while !shutdown.is_set() {
            let mut polled = 0_usize;
            for (topic, position) in &mut positions {
                if let Some(reason) = self.broker.consumer_failure(topic) {
                    return Err(ConsumeLoopError::Broker(reason));
                }
                let records = self.broker.fetch(topic, *position, batch);
                for record in records {
                    if let Err(err) = request.callback.dispatch(record).await {
                        warn!(%topic, offset = *position, error = %err, "failed to handle record");
                    }
                    *position += 1;
                    polled += 1;
                }
                if auto_commit {
                    if let Some(group) = &group {
                        self.broker.commit(group, topic, *position);
                    }
                }
            }

            if polled == 0 {
                tokio::select! {
                    () = shutdown.cancelled() => {}
                    () = tokio::time::sleep(poll_interval) => {}
                }
            }
        }

        debug!(topics = ?request.topics, "consume loop stopped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryProducer
// ---------------------------------------------------------------------------

/// Producer client backed by a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryProducer {
    broker: Arc<MemoryBroker>,
    config: KafkaConfig,
    started: AtomicBool,
    start_calls: AtomicU32,
    stop_calls: AtomicU32,
    start_delay: Option<Duration>,
    start_failure: Option<String>,
}

impl MemoryProducer {
    #[must_use]
    pub fn new(broker: Arc<MemoryBroker>, config: KafkaConfig) -> Self {
        Self {
            broker,
            config,
            started: AtomicBool::new(false),
            start_calls: AtomicU32::new(0),
            stop_calls: AtomicU32::new(0),
            start_delay: None,
            start_failure: None,
        }
    }

    /// Delays completion of `start` by `delay`.
    #[must_use]
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = Some(delay);
        self
    }

    /// Makes `start` fail with `reason`.
    #[must_use]
    pub fn with_start_failure(mut self, reason: impl Into<String>) -> Self {
        self.start_failure = Some(reason.into());
        self
    }

    /// The configuration this client was created with.
    #[must_use]
    pub fn config(&self) -> &KafkaConfig {
        &self.config
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn start_calls(&self) -> u32 {
        self.start_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn stop_calls(&self) -> u32 {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProducerClient for MemoryProducer {
    async fn start(&self) -> Result<(), ClientError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.start_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.start_failure {
            return Err(ClientError::Other(anyhow::anyhow!(reason.clone())));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, topic: &str, payload: Bytes) -> Result<DeliveryAck, ClientError> {
        if !self.is_started() {
            return Err(ClientError::NotStarted);
        }
        self.broker.append(topic, payload)
    }

    async fn stop(&self) -> Result<(), ClientError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Creates [`MemoryProducer`]s and remembers them for inspection.
#[derive(Debug)]
pub struct MemoryProducerFactory {
    broker: Arc<MemoryBroker>,
    created: Mutex<Vec<Arc<MemoryProducer>>>,
}

impl MemoryProducerFactory {
    #[must_use]
    pub fn new(broker: Arc<MemoryBroker>) -> Self {
        Self {
            broker,
            created: Mutex::new(Vec::new()),
        }
    }

    /// Every client created so far, in creation order.
    #[must_use]
    pub fn created(&self) -> Vec<Arc<MemoryProducer>> {
        self.created.lock().clone()
    }
}

impl ProducerFactory for MemoryProducerFactory {
    fn create(&self, config: &KafkaConfig) -> Result<Arc<dyn ProducerClient>, ClientError> {
        config.bootstrap_servers()?;
        let producer = Arc::new(MemoryProducer::new(
            Arc::clone(&self.broker),
            config.clone(),
        ));
        self.created.lock().push(Arc::clone(&producer));
        Ok(producer)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde::Deserialize;
    use topicflow_core::{CancellationSignal, ConsumerCallback, PayloadType};

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Order {
        id: u64,
    }

    fn request(
        topic: &str,
        signal: &CancellationSignal,
        config: KafkaConfig,
        seen: Arc<Mutex<Vec<u64>>>,
    ) -> ConsumeRequest {
        let callback = ConsumerCallback::new(move |order: Order| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().push(order.id);
                anyhow::Ok(())
            }
        });
        ConsumeRequest {
            topics: BTreeSet::from([topic.to_string()]),
            payload_type: PayloadType::of::<Order>(),
            callback,
            shutdown: signal.predicate(),
            config,
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    fn fast_config() -> KafkaConfig {
        KafkaConfig::default().with(keys::POLL_INTERVAL_MS, 5)
    }

    #[test]
    fn append_assigns_sequential_offsets() {
        let broker = MemoryBroker::new();
        let first = broker.append("orders", Bytes::from_static(b"1")).unwrap();
        let second = broker.append("orders", Bytes::from_static(b"2")).unwrap();
        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, 1);
        assert_eq!(broker.end_offset("orders"), 2);
    }

    #[test]
    fn rejected_topic_refuses_appends_until_healed() {
        let broker = MemoryBroker::new();
        broker.reject_topic("orders", "quota exceeded");
        assert!(broker.append("orders", Bytes::new()).is_err());
        broker.heal("orders");
        assert!(broker.append("orders", Bytes::new()).is_ok());
    }

    #[tokio::test]
    async fn consume_loop_dispatches_until_shutdown() {
        let broker = Arc::new(MemoryBroker::new());
        broker.append("orders", Bytes::from_static(br#"{"id":1}"#)).unwrap();
        let signal = CancellationSignal::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let consume = MemoryConsumeLoop::new(Arc::clone(&broker));
        let req = request("orders", &signal, fast_config(), Arc::clone(&seen));
        let task = tokio::spawn(async move { consume.run(req).await });

        broker.append("orders", Bytes::from_static(br#"{"id":2}"#)).unwrap();
        wait_until(|| seen.lock().len() == 2).await;

        signal.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn latest_reset_skips_existing_records() {
        let broker = Arc::new(MemoryBroker::new());
        broker.append("orders", Bytes::from_static(br#"{"id":1}"#)).unwrap();
        let signal = CancellationSignal::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let consume = MemoryConsumeLoop::new(Arc::clone(&broker));
        let config = fast_config().with(keys::AUTO_OFFSET_RESET, "latest");
        let req = request("orders", &signal, config, Arc::clone(&seen));
        let task = tokio::spawn(async move { consume.run(req).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.append("orders", Bytes::from_static(br#"{"id":2}"#)).unwrap();
        wait_until(|| !seen.lock().is_empty()).await;

        signal.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(*seen.lock(), vec![2]);
    }

    #[tokio::test]
    async fn group_progress_is_committed_and_resumed() {
        let broker = Arc::new(MemoryBroker::new());
        for id in 0..3 {
            broker
                .append("orders", Bytes::from(format!(r#"{{"id":{id}}}"#)))
                .unwrap();
        }
        let config = fast_config().with(keys::GROUP_ID, "billing");
        let consume = MemoryConsumeLoop::new(Arc::clone(&broker));

        let signal = CancellationSignal::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let req = request("orders", &signal, config.clone(), Arc::clone(&seen));
        let first = tokio::spawn({
            let consume = consume.clone();
            async move { consume.run(req).await }
        });
        wait_until(|| seen.lock().len() == 3).await;
        signal.cancel();
        first.await.unwrap().unwrap();
        assert_eq!(broker.committed_offset("billing", "orders"), Some(3));

        broker.append("orders", Bytes::from_static(br#"{"id":3}"#)).unwrap();
        signal.reset();
        let resumed = Arc::new(Mutex::new(Vec::new()));
        let req = request("orders", &signal, config, Arc::clone(&resumed));
        let second = tokio::spawn(async move { consume.run(req).await });
        wait_until(|| !resumed.lock().is_empty()).await;
        signal.cancel();
        second.await.unwrap().unwrap();
        assert_eq!(*resumed.lock(), vec![3]);
    }

    #[test]
    fn fetch_is_bounded_by_batch_size() {
        let broker = Arc::new(MemoryBroker::new());
        for id in 0..5 {
            broker
                .append("orders", Bytes::from(format!(r#"{{"id":{id}}}"#)))
                .unwrap();
        }
        let records = broker.fetch("orders", 1, 2);
        assert_eq!(records.len(), 2);
        assert_eq!(&records[0][..], br#"{"id":1}"#);
    }

    #[tokio::test]
    async fn undecodable_records_are_skipped() {
        let broker = Arc::new(MemoryBroker::new());
        broker.append("orders", Bytes::from_static(b"garbage")).unwrap();
        broker.append("orders", Bytes::from_static(br#"{"id":5}"#)).unwrap();
        let signal = CancellationSignal::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let consume = MemoryConsumeLoop::new(Arc::clone(&broker));
        let req = request("orders", &signal, fast_config(), Arc::clone(&seen));
        let task = tokio::spawn(async move { consume.run(req).await });

        wait_until(|| !seen.lock().is_empty()).await;
        signal.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(*seen.lock(), vec![5]);
    }

    #[tokio::test]
    async fn injected_failure_ends_the_loop_with_error() {
        let broker = Arc::new(MemoryBroker::new());
        broker.fail_consumers("orders", "partition leader lost");
        let signal = CancellationSignal::new();

        let consume = MemoryConsumeLoop::new(Arc::clone(&broker));
        let req = request("orders", &signal, fast_config(), Arc::new(Mutex::new(Vec::new())));
        let err = consume.run(req).await.unwrap_err();
        assert!(matches!(err, ConsumeLoopError::Broker(ref r) if r == "partition leader lost"));
    }

    #[tokio::test]
    async fn invalid_config_is_a_loop_error() {
        let broker = Arc::new(MemoryBroker::new());
        let signal = CancellationSignal::new();
        let consume = MemoryConsumeLoop::new(broker);
        let config = fast_config().with(keys::AUTO_OFFSET_RESET, "sometimes");
        let req = request("orders", &signal, config, Arc::new(Mutex::new(Vec::new())));
        assert!(matches!(
            consume.run(req).await,
            Err(ConsumeLoopError::Config(_))
        ));
    }

    #[tokio::test]
    async fn producer_requires_start() {
        let broker = Arc::new(MemoryBroker::new());
        let producer = MemoryProducer::new(Arc::clone(&broker), KafkaConfig::default());
        assert!(matches!(
            producer.send("receipts", Bytes::new()).await,
            Err(ClientError::NotStarted)
        ));

        producer.start().await.unwrap();
        let ack = producer.send("receipts", Bytes::new()).await.unwrap();
        assert_eq!(ack.topic, "receipts");

        producer.stop().await.unwrap();
        assert!(!producer.is_started());
        assert_eq!(producer.start_calls(), 1);
        assert_eq!(producer.stop_calls(), 1);
    }

    #[tokio::test]
    async fn producer_start_failure() {
        let producer = MemoryProducer::new(Arc::new(MemoryBroker::new()), KafkaConfig::default())
            .with_start_failure("connection refused");
        assert!(producer.start().await.is_err());
        assert!(!producer.is_started());
    }

    #[test]
    fn factory_records_created_clients() {
        let factory = MemoryProducerFactory::new(Arc::new(MemoryBroker::new()));
        let config = KafkaConfig::default().producer_config(&Default::default());
        factory.create(&config).unwrap();
        let created = factory.created();
        assert_eq!(created.len(), 1);
        assert_eq!(
            created[0].config().bootstrap_servers().unwrap(),
            Some("localhost:9092")
        );
    }
}
