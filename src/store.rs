//! Instance storage with optimistic concurrency

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::{CorrelationId, EngineError, SagaInstance, StoreError};

/// Persistence for saga instances.
///
/// Writes are guarded by a version: a write only lands when the stored
/// version still equals `expected_version` (0 = no stored row). A lost
/// race is reported as `Ok(false)`, never as an error.
#[async_trait]
pub trait InstanceStore<D>: Send + Sync + 'static {
    /// Load an instance, stamped with its stored version
    async fn load(&self, correlation_id: CorrelationId)
        -> Result<Option<SagaInstance<D>>, StoreError>;

    /// Insert or replace an instance; the stored copy gets `expected_version + 1`
    async fn save(&self, instance: &SagaInstance<D>, expected_version: u64)
        -> Result<bool, StoreError>;

    /// Delete an instance.
    ///
    /// With `expected_version` 0 nothing is removed; the call succeeds only
    /// when no row exists.
    async fn delete(&self, correlation_id: CorrelationId, expected_version: u64)
        -> Result<bool, StoreError>;
}

/// Result of [`load_or_create`]
#[derive(Debug)]
pub enum Loaded<D> {
    /// Stored instance
    Existing(SagaInstance<D>),
    /// New instance in "Initial", version 0
    Created(SagaInstance<D>),
    /// No instance and the event cannot start one
    NotFound,
}

/// Load an instance, creating a fresh one for start events
pub async fn load_or_create<D: Default + 'static>(
    store: &dyn InstanceStore<D>,
    correlation_id: CorrelationId,
    is_start_event: bool,
) -> Result<Loaded<D>, StoreError> {
    match store.load(correlation_id).await? {
        Some(instance) => Ok(Loaded::Existing(instance)),
        None if is_start_event => Ok(Loaded::Created(SagaInstance::new(correlation_id))),
        None => Ok(Loaded::NotFound),
    }
}

/// Commit a working copy: save it, or delete the row when finalizing.
///
/// A version mismatch fails with `ConcurrencyConflict` and writes nothing.
pub async fn commit_or_abort<D: 'static>(
    store: &dyn InstanceStore<D>,
    instance: &SagaInstance<D>,
    expected_version: u64,
    finalize: bool,
) -> Result<(), EngineError> {
    let correlation_id = instance.correlation_id();
    let committed = if finalize {
        store.delete(correlation_id, expected_version).await?
    } else {
        store.save(instance, expected_version).await?
    };

    if committed {
        Ok(())
    } else {
        Err(EngineError::ConcurrencyConflict {
            correlation_id,
            attempts: 1,
        })
    }
}

/// In-memory instance store for testing and single-process hosts
pub struct InMemoryInstanceStore<D> {
    instances: DashMap<CorrelationId, SagaInstance<D>>,
}

impl<D> InMemoryInstanceStore<D> {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
        }
    }

    /// Number of live instances
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Check whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl<D> Default for InMemoryInstanceStore<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<D> InstanceStore<D> for InMemoryInstanceStore<D>
where
    D: Clone + Send + Sync + 'static,
{
    async fn load(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Option<SagaInstance<D>>, StoreError> {
        Ok(self
            .instances
            .get(&correlation_id)
            .map(|entry| entry.value().clone()))
    }

    async fn save(
        &self,
        instance: &SagaInstance<D>,
        expected_version: u64,
    ) -> Result<bool, StoreError> {
        let stored = instance.clone().with_version(expected_version + 1);
        match self.instances.entry(instance.correlation_id()) {
            Entry::Occupied(mut entry) => {
                if entry.get().version() != expected_version {
                    return Ok(false);
                }
                entry.insert(stored);
                Ok(true)
            }
            Entry::Vacant(entry) => {
                if expected_version != 0 {
                    return Ok(false);
                }
                entry.insert(stored);
                Ok(true)
            }
        }
    }

    async fn delete(
        &self,
        correlation_id: CorrelationId,
        expected_version: u64,
    ) -> Result<bool, StoreError> {
        if expected_version == 0 {
            return Ok(!self.instances.contains_key(&correlation_id));
        }
        Ok(self
            .instances
            .remove_if(&correlation_id, |_, stored| {
                stored.version() == expected_version
            })
            .is_some())
    }
}
