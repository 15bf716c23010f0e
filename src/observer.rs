//! Saga observer trait

use crate::{CorrelationId, EngineError, EventId, IgnoreReason, StateId};

/// Observer trait for external observability
pub trait SagaObserver: Send + Sync + 'static {
    /// A start event created an instance
    fn on_instance_created(&self, saga: &str, correlation_id: CorrelationId);
    /// A transition committed
    fn on_transitioned(
        &self,
        saga: &str,
        correlation_id: CorrelationId,
        event: &EventId,
        from: &StateId,
        to: &StateId,
    );
    /// A finalized instance was removed
    fn on_finalized(&self, saga: &str, correlation_id: CorrelationId);
    /// An event did not apply
    fn on_ignored(
        &self,
        saga: &str,
        correlation_id: Option<CorrelationId>,
        event: &EventId,
        reason: &IgnoreReason,
    );
    /// A commit lost a version race and will be retried
    fn on_conflict(&self, saga: &str, correlation_id: CorrelationId, attempt: u32);
    /// A transition aborted
    fn on_failed(&self, saga: &str, correlation_id: CorrelationId, event: &EventId, error: &EngineError);
}

/// No-op observer
pub struct NoOpObserver;

impl SagaObserver for NoOpObserver {
    fn on_instance_created(&self, _saga: &str, _correlation_id: CorrelationId) {}
    fn on_transitioned(
        &self,
        _saga: &str,
        _correlation_id: CorrelationId,
        _event: &EventId,
        _from: &StateId,
        _to: &StateId,
    ) {
    }
    fn on_finalized(&self, _saga: &str, _correlation_id: CorrelationId) {}
    fn on_ignored(
        &self,
        _saga: &str,
        _correlation_id: Option<CorrelationId>,
        _event: &EventId,
        _reason: &IgnoreReason,
    ) {
    }
    fn on_conflict(&self, _saga: &str, _correlation_id: CorrelationId, _attempt: u32) {}
    fn on_failed(&self, _saga: &str, _correlation_id: CorrelationId, _event: &EventId, _error: &EngineError) {}
}

/// Tracing-based observer
pub struct TracingObserver;

impl SagaObserver for TracingObserver {
    fn on_instance_created(&self, saga: &str, correlation_id: CorrelationId) {
        tracing::info!(saga = %saga, correlation_id = %correlation_id, "Saga instance created");
    }

    fn on_transitioned(
        &self,
        saga: &str,
        correlation_id: CorrelationId,
        event: &EventId,
        from: &StateId,
        to: &StateId,
    ) {
        tracing::info!(
            saga = %saga,
            correlation_id = %correlation_id,
            event = %event,
            from = %from,
            to = %to,
            "Saga transitioned"
        );
    }

    fn on_finalized(&self, saga: &str, correlation_id: CorrelationId) {
        tracing::info!(saga = %saga, correlation_id = %correlation_id, "Saga finalized");
    }

    fn on_ignored(
        &self,
        saga: &str,
        correlation_id: Option<CorrelationId>,
        event: &EventId,
        reason: &IgnoreReason,
    ) {
        tracing::debug!(
            saga = %saga,
            correlation_id = ?correlation_id,
            event = %event,
            reason = %reason,
            "Event ignored"
        );
    }

    fn on_conflict(&self, saga: &str, correlation_id: CorrelationId, attempt: u32) {
        tracing::warn!(saga = %saga, correlation_id = %correlation_id, attempt, "Concurrency conflict, retrying");
    }

    fn on_failed(&self, saga: &str, correlation_id: CorrelationId, event: &EventId, error: &EngineError) {
        tracing::error!(
            saga = %saga,
            correlation_id = %correlation_id,
            event = %event,
            error = %error,
            "Transition failed"
        );
    }
}
