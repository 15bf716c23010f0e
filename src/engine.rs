//! Saga engine: the dispatcher in front of the transition executor.
//!
//! `consume` resolves the event's correlation ID, takes the per-instance
//! lock, loads (or creates) the instance, looks up the transition for its
//! current state and runs it. Events for different correlation IDs proceed
//! in parallel; events for the same ID are applied one at a time.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::correlation;
use crate::executor::TransitionExecutor;
use crate::store::{load_or_create, Loaded};
use crate::{
    CorrelationId, EngineConfig, EngineError, EngineStats, EngineStatsSnapshot, Event,
    InstanceStore, KeyedLock, MessageBus, SagaData, SagaDefinition, SagaInstance, SagaObserver,
    Scheduler, StateId, StoreError, TracingObserver,
};

/// Why an event did not apply. None of these are faults.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The definition does not declare the event
    UnknownEvent,
    /// The payload carries no correlation key
    CorrelationMissing,
    /// No instance exists and the event cannot start one
    InstanceNotFound,
    /// No rule for the instance's current state
    NoTransition { state: StateId },
    /// Scheduled delivery superseded by a later arming of the schedule
    StaleToken { schedule: Box<str> },
    /// The rule's guard rejected the event
    GuardRejected,
}

impl std::fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownEvent => f.write_str("unknown event"),
            Self::CorrelationMissing => f.write_str("correlation missing"),
            Self::InstanceNotFound => f.write_str("instance not found"),
            Self::NoTransition { state } => write!(f, "no transition from {state}"),
            Self::StaleToken { schedule } => write!(f, "stale token for schedule {schedule}"),
            Self::GuardRejected => f.write_str("guard rejected"),
        }
    }
}

/// Result of consuming one event
#[derive(Debug)]
pub enum Outcome {
    /// Acknowledge and drop; nothing changed
    Ignored(IgnoreReason),
    /// A transition committed
    Transitioned {
        /// Instance that moved
        correlation_id: CorrelationId,
        /// State after the transition
        state: StateId,
        /// Whether the instance was removed from the store
        finalized: bool,
    },
    /// The transition aborted; the transport may redeliver
    Failed(EngineError),
}

impl Outcome {
    /// Check if the event was ignored
    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored(_))
    }

    /// Check if the transition failed
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// State reached by a committed transition
    pub fn state(&self) -> Option<&StateId> {
        match self {
            Self::Transitioned { state, .. } => Some(state),
            _ => None,
        }
    }
}

/// Orchestrates the instances of one saga definition
pub struct SagaEngine<D> {
    definition: Arc<SagaDefinition<D>>,
    store: Arc<dyn InstanceStore<D>>,
    scheduler: Arc<dyn Scheduler>,
    bus: Arc<dyn MessageBus>,
    config: EngineConfig,
    locks: KeyedLock<CorrelationId>,
    observer: Arc<dyn SagaObserver>,
    stats: Arc<EngineStats>,
}

impl<D: SagaData> SagaEngine<D> {
    /// Register a definition with its collaborators
    pub fn new(
        definition: SagaDefinition<D>,
        store: Arc<dyn InstanceStore<D>>,
        scheduler: Arc<dyn Scheduler>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Self {
            definition: Arc::new(definition),
            store,
            scheduler,
            bus,
            config: EngineConfig::default(),
            locks: KeyedLock::new(),
            observer: Arc::new(TracingObserver),
            stats: Arc::new(EngineStats::new()),
        }
    }

    /// Replace the default configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default tracing observer
    pub fn with_observer(mut self, observer: Arc<dyn SagaObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The registered definition
    pub fn definition(&self) -> &SagaDefinition<D> {
        &self.definition
    }

    /// Counter snapshot
    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Read-only inspection of a stored instance. Takes no lock.
    pub async fn query(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Option<SagaInstance<D>>, StoreError> {
        self.store.load(correlation_id).await
    }

    /// Consume one inbound event
    #[tracing::instrument(
        name = "saga.consume",
        skip_all,
        fields(saga = %self.definition.name(), event = %event.name)
    )]
    pub async fn consume(&self, event: Event) -> Outcome {
        EngineStats::incr(&self.stats.events_received);

        let Some(correlate) = self.definition.correlate(&event.name) else {
            return self.ignored(None, &event, IgnoreReason::UnknownEvent);
        };
        let Some(correlation_id) = correlation::resolve(correlate, &event) else {
            warn!("Event carries no correlation key, dropping");
            return self.ignored(None, &event, IgnoreReason::CorrelationMissing);
        };

        let _guard = self.locks.acquire(correlation_id).await;
        match self.consume_locked(correlation_id, &event).await {
            Outcome::Ignored(reason) => self.ignored(Some(correlation_id), &event, reason),
            Outcome::Failed(error) => {
                EngineStats::incr(&self.stats.failed);
                self.observer
                    .on_failed(self.definition.name(), correlation_id, &event.name, &error);
                Outcome::Failed(error)
            }
            transitioned => transitioned,
        }
    }

    /// Consume events until the channel closes, one task per event.
    ///
    /// Retriable failures are redelivered per `EngineConfig::redelivery`.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::UnboundedReceiver<Event>) {
        info!(saga = %self.definition.name(), "Saga engine consuming");
        while let Some(event) = inbound.recv().await {
            let engine = Arc::clone(&self);
            tokio::spawn(async move {
                engine.deliver(event).await;
            });
        }
        info!(saga = %self.definition.name(), "Inbound channel closed, saga engine stopped");
    }

    /// Consume an event, redelivering it with backoff while it fails retriably
    pub async fn deliver(&self, event: Event) -> Outcome {
        let policy = &self.config.redelivery;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = self.consume(event.clone()).await;
            let Outcome::Failed(error) = &outcome else {
                return outcome;
            };
            if !error.is_retriable() || attempt >= max_attempts {
                error!(
                    saga = %self.definition.name(),
                    event = %event.name,
                    attempts = attempt,
                    error = %error,
                    "Giving up on event"
                );
                return outcome;
            }

            EngineStats::incr(&self.stats.redeliveries);
            warn!(
                saga = %self.definition.name(),
                event = %event.name,
                attempt,
                error = %error,
                "Redelivering failed event"
            );
            let delay = policy.delay_for_attempt(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }

    async fn consume_locked(&self, correlation_id: CorrelationId, event: &Event) -> Outcome {
        let saga = self.definition.name();
        let executor = TransitionExecutor {
            definition: self.definition.as_ref(),
            store: self.store.as_ref(),
            scheduler: self.scheduler.as_ref(),
            bus: self.bus.as_ref(),
            cancellation: self.config.cancellation,
            stats: self.stats.as_ref(),
        };
        let is_start = self.definition.is_start_event(&event.name);
        let policy = &self.config.conflict_retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let (instance, created) =
                match load_or_create(self.store.as_ref(), correlation_id, is_start).await {
                    Ok(Loaded::Existing(instance)) => (instance, false),
                    Ok(Loaded::Created(instance)) => (instance, true),
                    Ok(Loaded::NotFound) => return Outcome::Ignored(IgnoreReason::InstanceNotFound),
                    Err(e) => return Outcome::Failed(e.into()),
                };

            let from = instance.current_state().clone();
            if !self.definition.has_state(&from) {
                return Outcome::Failed(EngineError::UnknownState {
                    correlation_id,
                    state: from,
                });
            }

            let Some(transition) = self.definition.transition(&from, &event.name) else {
                return Outcome::Ignored(IgnoreReason::NoTransition { state: from });
            };
            if let Some(reason) = self.stale_delivery(&instance, event) {
                return Outcome::Ignored(reason);
            }
            if !transition.accepts(&instance, event) {
                return Outcome::Ignored(IgnoreReason::GuardRejected);
            }

            let result = match executor.apply(&instance, event, transition).await {
                Ok(run) => executor.commit(run).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(committed) => {
                    if created {
                        EngineStats::incr(&self.stats.instances_created);
                        self.observer.on_instance_created(saga, correlation_id);
                    }
                    EngineStats::incr(&self.stats.transitioned);
                    self.observer.on_transitioned(
                        saga,
                        correlation_id,
                        &event.name,
                        &from,
                        &committed.state,
                    );
                    if committed.finalized {
                        EngineStats::incr(&self.stats.instances_finalized);
                        self.observer.on_finalized(saga, correlation_id);
                    }
                    return Outcome::Transitioned {
                        correlation_id,
                        state: committed.state,
                        finalized: committed.finalized,
                    };
                }
                Err(EngineError::ConcurrencyConflict { .. }) if attempt < max_attempts => {
                    EngineStats::incr(&self.stats.conflicts_retried);
                    self.observer.on_conflict(saga, correlation_id, attempt);
                    let delay = policy.delay_for_attempt(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(EngineError::ConcurrencyConflict { .. }) => {
                    return Outcome::Failed(EngineError::ConcurrencyConflict {
                        correlation_id,
                        attempts: attempt,
                    });
                }
                Err(e) => return Outcome::Failed(e),
            }
        }
    }

    /// A scheduled delivery whose token is no longer the armed one
    fn stale_delivery(&self, instance: &SagaInstance<D>, event: &Event) -> Option<IgnoreReason> {
        let spec = self.definition.received_schedule(&event.name)?;
        let token = event.token?;
        if spec.accepts_stale() || instance.token(spec.name()) == Some(token) {
            return None;
        }
        Some(IgnoreReason::StaleToken {
            schedule: spec.name().into(),
        })
    }

    fn ignored(
        &self,
        correlation_id: Option<CorrelationId>,
        event: &Event,
        reason: IgnoreReason,
    ) -> Outcome {
        EngineStats::incr(&self.stats.ignored);
        self.observer
            .on_ignored(self.definition.name(), correlation_id, &event.name, &reason);
        Outcome::Ignored(reason)
    }
}
