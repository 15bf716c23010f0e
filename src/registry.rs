//! Explicit registry of saga engines owned by the hosting process

use std::sync::Arc;

use async_trait::async_trait;

use crate::{Event, EventId, Outcome, RegistryError, SagaData, SagaEngine};

/// Type-erased view of a [`SagaEngine`]
#[async_trait]
pub trait EventConsumer: Send + Sync + 'static {
    /// Definition name
    fn saga_name(&self) -> &str;

    /// Check whether the saga declares the event
    fn handles(&self, event: &EventId) -> bool;

    /// Consume one event
    async fn consume(&self, event: Event) -> Outcome;
}

#[async_trait]
impl<D: SagaData> EventConsumer for SagaEngine<D> {
    fn saga_name(&self) -> &str {
        self.definition().name()
    }

    fn handles(&self, event: &EventId) -> bool {
        self.definition().declares_event(event)
    }

    async fn consume(&self, event: Event) -> Outcome {
        SagaEngine::consume(self, event).await
    }
}

/// Sagas known to the host, in registration order
#[derive(Default)]
pub struct SagaRegistry {
    sagas: Vec<Arc<dyn EventConsumer>>,
}

impl SagaRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a saga; names must be unique
    pub fn register(&mut self, saga: Arc<dyn EventConsumer>) -> Result<(), RegistryError> {
        if self.get(saga.saga_name()).is_some() {
            return Err(RegistryError::DuplicateSaga(saga.saga_name().into()));
        }
        tracing::info!(saga = %saga.saga_name(), "Saga registered");
        self.sagas.push(saga);
        Ok(())
    }

    /// Look up a saga by name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn EventConsumer>> {
        self.sagas.iter().find(|saga| saga.saga_name() == name)
    }

    /// Registered saga names
    pub fn names(&self) -> Vec<&str> {
        self.sagas.iter().map(|saga| saga.saga_name()).collect()
    }

    /// Deliver an event to every saga that declares it
    pub async fn dispatch(&self, event: Event) -> Vec<(Box<str>, Outcome)> {
        let mut outcomes = Vec::new();
        for saga in self.sagas.iter().filter(|saga| saga.handles(&event.name)) {
            let outcome = saga.consume(event.clone()).await;
            outcomes.push((saga.saga_name().into(), outcome));
        }
        outcomes
    }
}
