//! Saga instance state

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{CorrelationId, StateId, TokenId};

/// Bound for instance-specific data carried by a saga
pub trait SagaData: Clone + Default + std::fmt::Debug + Send + Sync + 'static {}

impl<T> SagaData for T where T: Clone + Default + std::fmt::Debug + Send + Sync + 'static {}

/// One saga instance, keyed by correlation ID.
///
/// The store owns the persisted copy. The executor works on a clone and
/// the store commits it atomically against `version`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SagaInstance<D> {
    correlation_id: CorrelationId,
    current_state: StateId,
    /// Schedule name -> currently armed token
    schedule_tokens: BTreeMap<Box<str>, TokenId>,
    version: u64,
    /// Instance-specific data
    pub data: D,
}

impl<D: Default> SagaInstance<D> {
    /// A fresh, never persisted instance in the initial state
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            current_state: StateId::initial(),
            schedule_tokens: BTreeMap::new(),
            version: 0,
            data: D::default(),
        }
    }
}

impl<D> SagaInstance<D> {
    /// Correlation ID (immutable after creation)
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Current state
    pub fn current_state(&self) -> &StateId {
        &self.current_state
    }

    /// Store version this copy was loaded at (0 = never persisted)
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Token currently armed for a schedule
    pub fn token(&self, schedule: &str) -> Option<TokenId> {
        self.schedule_tokens.get(schedule).copied()
    }

    /// All armed tokens by schedule name
    pub fn tokens(&self) -> impl Iterator<Item = (&str, TokenId)> {
        self.schedule_tokens
            .iter()
            .map(|(name, token)| (name.as_ref(), *token))
    }

    /// Stamp the version the store persisted this copy at.
    ///
    /// Intended for `InstanceStore` implementations.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub(crate) fn set_state(&mut self, state: StateId) {
        self.current_state = state;
    }

    /// Arm a token, returning the one it replaces
    pub(crate) fn arm(&mut self, schedule: &str, token: TokenId) -> Option<TokenId> {
        self.schedule_tokens.insert(schedule.into(), token)
    }

    pub(crate) fn disarm(&mut self, schedule: &str) -> Option<TokenId> {
        self.schedule_tokens.remove(schedule)
    }
}
