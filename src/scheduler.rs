//! Delayed delivery

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;

use crate::{Event, ScheduledMessage, SchedulerError, TokenId};

/// Timer service.
///
/// Every scheduled message gets a globally unique token. When the timer
/// fires the message re-enters the engine as an [`Event`] carrying that
/// token. Cancellation is best-effort: `Ok(false)` means the token was
/// unknown or had already fired.
#[async_trait]
pub trait Scheduler: Send + Sync + 'static {
    /// Schedule `message` for delivery after `delay`
    async fn schedule_send(
        &self,
        delay: Duration,
        message: ScheduledMessage,
    ) -> Result<TokenId, SchedulerError>;

    /// Cancel a previously scheduled delivery
    async fn cancel_scheduled_send(&self, token: TokenId) -> Result<bool, SchedulerError>;
}

/// A timer recorded by [`InMemoryScheduler`]
#[derive(Clone, Debug)]
pub struct PendingTimer {
    /// Token issued for the timer
    pub token: TokenId,
    /// Requested delay
    pub delay: Duration,
    /// Message to deliver
    pub message: ScheduledMessage,
}

/// Scheduler that never fires on its own; timers are fired manually
pub struct InMemoryScheduler {
    pending: std::sync::Mutex<Vec<PendingTimer>>,
    cancelled: std::sync::Mutex<Vec<TokenId>>,
}

impl InMemoryScheduler {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self {
            pending: std::sync::Mutex::new(Vec::new()),
            cancelled: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Timers still armed, in scheduling order
    pub fn pending(&self) -> Vec<PendingTimer> {
        self.pending
            .lock()
            .map(|pending| pending.clone())
            .unwrap_or_default()
    }

    /// Tokens still armed, in scheduling order
    pub fn pending_tokens(&self) -> Vec<TokenId> {
        self.pending().into_iter().map(|timer| timer.token).collect()
    }

    /// Tokens cancelled while still armed
    pub fn cancelled_tokens(&self) -> Vec<TokenId> {
        self.cancelled
            .lock()
            .map(|cancelled| cancelled.clone())
            .unwrap_or_default()
    }

    /// Check whether a token is still armed
    pub fn is_armed(&self, token: TokenId) -> bool {
        self.pending_tokens().contains(&token)
    }

    /// Fire a timer now, returning the event to hand to the engine
    pub fn fire(&self, token: TokenId) -> Option<Event> {
        let mut pending = self.pending.lock().ok()?;
        let index = pending.iter().position(|timer| timer.token == token)?;
        let timer = pending.remove(index);
        Some(timer.message.into_event(timer.token))
    }
}

impl Default for InMemoryScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scheduler for InMemoryScheduler {
    async fn schedule_send(
        &self,
        delay: Duration,
        message: ScheduledMessage,
    ) -> Result<TokenId, SchedulerError> {
        let token = TokenId::generate();
        let mut pending = self
            .pending
            .lock()
            .map_err(|e| SchedulerError::Schedule(e.to_string().into()))?;
        pending.push(PendingTimer {
            token,
            delay,
            message,
        });
        Ok(token)
    }

    async fn cancel_scheduled_send(&self, token: TokenId) -> Result<bool, SchedulerError> {
        let mut pending = self.pending.lock().map_err(|e| SchedulerError::Cancel {
            token,
            reason: e.to_string().into(),
        })?;
        let Some(index) = pending.iter().position(|timer| timer.token == token) else {
            return Ok(false);
        };
        pending.remove(index);
        drop(pending);

        if let Ok(mut cancelled) = self.cancelled.lock() {
            cancelled.push(token);
        }
        Ok(true)
    }
}

/// Scheduler backed by tokio timers.
///
/// Each token owns a task that sleeps for the delay and then pushes the
/// delivered event into the engine's inbound channel.
pub struct TokioScheduler {
    inbound: mpsc::UnboundedSender<Event>,
    timers: Arc<DashMap<TokenId, AbortHandle>>,
}

impl TokioScheduler {
    /// Deliver fired timers into `inbound`
    pub fn new(inbound: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            inbound,
            timers: Arc::new(DashMap::new()),
        }
    }

    /// Number of timers still armed
    pub fn pending(&self) -> usize {
        self.timers.len()
    }
}

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn schedule_send(
        &self,
        delay: Duration,
        message: ScheduledMessage,
    ) -> Result<TokenId, SchedulerError> {
        if self.inbound.is_closed() {
            return Err(SchedulerError::Unavailable);
        }

        let token = TokenId::generate();
        let timers = Arc::clone(&self.timers);
        let inbound = self.inbound.clone();
        let (armed_tx, armed_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            // Wait until the abort handle is registered
            if armed_rx.await.is_err() {
                return;
            }
            tokio::time::sleep(delay).await;
            if timers.remove(&token).is_none() {
                return;
            }
            tracing::debug!(%token, correlation_id = %message.correlation_id, "Timer fired");
            if inbound.send(message.into_event(token)).is_err() {
                tracing::warn!(%token, "Inbound channel closed, dropping fired timer");
            }
        });

        self.timers.insert(token, handle.abort_handle());
        let _ = armed_tx.send(());
        Ok(token)
    }

    async fn cancel_scheduled_send(&self, token: TokenId) -> Result<bool, SchedulerError> {
        match self.timers.remove(&token) {
            Some((_, handle)) => {
                handle.abort();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
