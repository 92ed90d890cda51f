//! Lifecycle orchestration for registered consumers and producers.
//!
//! State machine: `Idle -> Starting -> Running -> Stopping -> Idle`.
//!
//! Starting exports the topic spec, clears the cancellation signal, spawns
//! one consume-loop task per consumer registration and issues a
//! fire-and-forget start for every producer client. Stopping sets the signal,
//! joins every consumer task, stops every bound producer and resets the
//! signal so the cycle can repeat.

use std::collections::BTreeSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use topicflow_core::{
    CancellationSignal, ClientError, ConsumeLoop, ConsumeLoopError, ConsumeRequest,
    ExportRequest, ProducerFactory, SpecExporter,
};

use crate::config::AppConfig;
use crate::producer::Readiness;
use crate::registry::Registry;

// ---------------------------------------------------------------------------
// LifecycleState
// ---------------------------------------------------------------------------

/// Orchestrator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No tasks exist; `start` is allowed.
    Idle,
    /// Spawning consumer tasks and starting producers.
    Starting,
    /// Every spawn and start call has been issued.
    Running,
    /// Cancellation requested; joining tasks and stopping producers.
    Stopping,
}

// ---------------------------------------------------------------------------
// LifecycleError
// ---------------------------------------------------------------------------

/// Errors surfaced by the start and stop hooks.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },
    #[error("consumer for topic '{topic}' failed: {source}")]
    ConsumeLoop {
        topic: String,
        #[source]
        source: ConsumeLoopError,
    },
    #[error("consumer task for topic '{topic}' panicked")]
    TaskPanicked { topic: String },
    #[error("timed out joining tasks for topics {pending:?}")]
    JoinTimeout { pending: Vec<String> },
    #[error("failed to stop producer for topic '{topic}': {source}")]
    ProducerStop {
        topic: String,
        #[source]
        source: ClientError,
    },
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// External services the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub consume_loop: Arc<dyn ConsumeLoop>,
    pub producer_factory: Arc<dyn ProducerFactory>,
    pub exporter: Arc<dyn SpecExporter>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

struct ConsumerTask {
    topic: String,
    handle: JoinHandle<Result<(), ConsumeLoopError>>,
}

struct ProducerStart {
    topic: String,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Tasks {
    consumers: Vec<ConsumerTask>,
    producer_starts: Vec<ProducerStart>,
    /// First failure of a stop that timed out, returned when the stop resumes.
    deferred_error: Option<LifecycleError>,
}

/// Starts, runs and stops every registered consumer and producer.
///
/// [`Orchestrator::start`] and [`Orchestrator::stop`] are the hooks an
/// application host calls on startup and shutdown. Both serialize on an
/// internal lock, so overlapping calls run one after the other.
pub struct Orchestrator {
    registry: Registry,
    config: Arc<AppConfig>,
    collaborators: Collaborators,
    signal: CancellationSignal,
    state: ArcSwap<LifecycleState>,
    tasks: Mutex<Tasks>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(registry: Registry, config: AppConfig, collaborators: Collaborators) -> Self {
        Self {
            registry,
            config: Arc::new(config),
            collaborators,
            signal: CancellationSignal::new(),
            state: ArcSwap::from_pointee(LifecycleState::Idle),
            tasks: Mutex::new(Tasks::default()),
        }
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    fn set_state(&self, state: LifecycleState) {
        debug!(?state, "lifecycle transition");
        self.state.store(Arc::new(state));
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Whether shutdown is currently requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Topics whose consumer task has been spawned and not yet joined.
    pub async fn consumer_tasks(&self) -> Vec<String> {
        self.tasks
            .lock()
            .await
            .consumers
            .iter()
            .map(|task| task.topic.clone())
            .collect()
    }

    /// "On start" hook.
    ///
    /// Returns once every consumer task has been spawned and every producer
    /// start issued; it does not wait for consumption to begin or for
    /// producers to connect. Spec export failures are logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidState`] unless the orchestrator is idle.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        let mut tasks = self.tasks.lock().await;
        let state = self.state();
        if state != LifecycleState::Idle {
            return Err(LifecycleError::InvalidState {
                operation: "start",
                state,
            });
        }
        self.set_state(LifecycleState::Starting);

        self.export_spec().await;
        self.signal.reset();

        // Producers are bound and marked `Starting` before any consumer runs,
        // so a handler that publishes waits on the start instead of failing.
        let mut pending_starts = Vec::new();
        for registration in self.registry.producers() {
            let config = self.config.kafka.producer_config(&registration.options);
            match registration
                .slot
                .bind_with(self.collaborators.producer_factory.as_ref(), &config)
            {
                Ok(client) => {
                    registration.slot.set_readiness(Readiness::Starting);
                    pending_starts.push((registration, client));
                }
                Err(err) => {
                    error!(
                        topic = %registration.topic,
                        error = %err,
                        "failed to create producer client"
                    );
                    registration
                        .slot
                        .set_readiness(Readiness::Failed(err.to_string()));
                }
            }
        }

        for registration in self.registry.consumers() {
            let request = ConsumeRequest {
                topics: BTreeSet::from([registration.topic.clone()]),
                payload_type: registration.callback.payload_type(),
                callback: registration.callback.clone(),
                shutdown: self.signal.predicate(),
                config: self.config.kafka.merged_with(&registration.options),
            };
            let consume_loop = Arc::clone(&self.collaborators.consume_loop);
            let handle = tokio::spawn(async move { consume_loop.run(request).await });
            info!(topic = %registration.topic, "spawned consumer task");
            tasks.consumers.push(ConsumerTask {
                topic: registration.topic.clone(),
                handle,
            });
        }

        for (registration, client) in pending_starts {
            let topic = registration.topic.clone();
            let slot = Arc::clone(&registration.slot);
            let handle = tokio::spawn(async move {
                match client.start().await {
                    Ok(()) => {
                        debug!(%topic, "producer client started");
                        slot.set_readiness(Readiness::Ready);
                    }
                    Err(err) => {
                        warn!(%topic, error = %err, "producer client failed to start");
                        slot.set_readiness(Readiness::Failed(err.to_string()));
                    }
                }
            });
            info!(topic = %registration.topic, "issued producer start");
            tasks.producer_starts.push(ProducerStart {
                topic: registration.topic.clone(),
                handle,
            });
        }

        self.set_state(LifecycleState::Running);
        info!(
            consumers = tasks.consumers.len(),
            producers = tasks.producer_starts.len(),
            "orchestrator running"
        );
        Ok(())
    }

    /// "On stop" hook.
    ///
    /// Requests cooperative shutdown, joins every consumer task, stops every
    /// bound producer and resets the cancellation signal. Calling it while
    /// idle is a no-op.
    ///
    /// Producers are stopped and the signal reset even when a consumer task
    /// failed, so a later `start` begins from a clean state. The first error
    /// encountered is returned.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::ConsumeLoop`] / [`LifecycleError::TaskPanicked`]
    ///   when a consumer task ended abnormally.
    /// - [`LifecycleError::JoinTimeout`] when `join_timeout` is configured and
    ///   expires before every consumer task and pending producer start has
    ///   finished. The orchestrator stays `Stopping` with the signal set;
    ///   calling `stop` again resumes the join with a fresh deadline and
    ///   returns any consumer failure observed before the timeout.
    /// - [`LifecycleError::ProducerStop`] when a producer fails to stop.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        let mut tasks = self.tasks.lock().await;
        if self.state() == LifecycleState::Idle {
            debug!("stop requested while idle");
            return Ok(());
        }
        self.set_state(LifecycleState::Stopping);
        self.signal.cancel();
        info!(consumers = tasks.consumers.len(), "stopping consumers");

        let deadline = self
            .config
            .lifecycle
            .join_timeout
            .map(|timeout| Instant::now() + timeout);
        let mut first_error = Self::join_consumers(&mut tasks, deadline).await?;
        if let Err(timeout) = Self::join_producer_starts(&mut tasks, deadline).await {
            tasks.deferred_error = first_error;
            return Err(timeout);
        }

        for registration in self.registry.producers() {
            let Some(client) = registration.slot.binding().client() else {
                continue;
            };
            if let Err(source) = client.stop().await {
                error!(topic = %registration.topic, error = %source, "failed to stop producer");
                first_error.get_or_insert(LifecycleError::ProducerStop {
                    topic: registration.topic.clone(),
                    source,
                });
            } else {
                debug!(topic = %registration.topic, "producer stopped");
            }
            registration.slot.set_readiness(Readiness::Idle);
        }

        self.signal.reset();
        self.set_state(LifecycleState::Idle);
        info!("orchestrator stopped");

        first_error.map_or(Ok(()), Err)
    }

    /// Joins consumer tasks, keeping the first abnormal exit.
    ///
    /// On timeout the unfinished tasks are put back, the first failure seen so
    /// far is parked in `deferred_error` and the timeout is returned as the
    /// outer error.
    async fn join_consumers(
        tasks: &mut Tasks,
        deadline: Option<Instant>,
    ) -> Result<Option<LifecycleError>, LifecycleError> {
        let mut first_error = tasks.deferred_error.take();
        let mut pending = std::mem::take(&mut tasks.consumers).into_iter();

        while let Some(mut task) = pending.next() {
            let joined = match deadline {
                None => (&mut task.handle).await,
                Some(deadline) => {
                    if let Ok(joined) = timeout_at(deadline, &mut task.handle).await {
                        joined
                    } else {
                        tasks.consumers.push(task);
                        tasks.consumers.extend(pending);
                        tasks.deferred_error = first_error;
                        let topics: Vec<String> =
                            tasks.consumers.iter().map(|t| t.topic.clone()).collect();
                        warn!(?topics, "consumer join timed out");
                        return Err(LifecycleError::JoinTimeout { pending: topics });
                    }
                }
            };

            let failure = match joined {
                Ok(Ok(())) => {
                    debug!(topic = %task.topic, "consumer task finished");
                    None
                }
                Ok(Err(source)) => {
                    error!(topic = %task.topic, error = %source, "consumer task failed");
                    Some(LifecycleError::ConsumeLoop {
                        topic: task.topic,
                        source,
                    })
                }
                Err(join_err) => {
                    error!(topic = %task.topic, error = %join_err, "consumer task panicked");
                    Some(LifecycleError::TaskPanicked { topic: task.topic })
                }
            };
            if first_error.is_none() {
                first_error = failure;
            }
        }

        Ok(first_error)
    }

    /// Waits for producer starts still in flight.
    ///
    /// On timeout the finished starts are dropped and the unfinished ones are
    /// kept for the next attempt.
    async fn join_producer_starts(
        tasks: &mut Tasks,
        deadline: Option<Instant>,
    ) -> Result<(), LifecycleError> {
        let joined = join_all(tasks.producer_starts.iter_mut().map(|start| &mut start.handle));
        let results = match deadline {
            None => joined.await,
            Some(deadline) => {
                let outcome = timeout_at(deadline, joined).await;
                if let Ok(results) = outcome {
                    results
                } else {
                    tasks.producer_starts.retain(|start| !start.handle.is_finished());
                    let topics: Vec<String> = tasks
                        .producer_starts
                        .iter()
                        .map(|start| start.topic.clone())
                        .collect();
                    warn!(?topics, "producer start join timed out");
                    return Err(LifecycleError::JoinTimeout { pending: topics });
                }
            }
        };

        for (start, result) in tasks.producer_starts.iter().zip(results) {
            if result.is_err() {
                warn!(topic = %start.topic, "producer start task panicked");
            }
        }
        tasks.producer_starts.clear();
        Ok(())
    }

    async fn export_spec(&self) {
        let request = ExportRequest {
            consumers: self.registry.consumer_topics(),
            producers: self.registry.producer_topics(),
            brokers: self.config.brokers.clone(),
            service: self.config.service.clone(),
            output_dir: self.config.asyncapi_path(),
        };
        if let Err(err) = self.collaborators.exporter.export(&request).await {
            warn!(error = %err, "spec export failed; continuing startup");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
