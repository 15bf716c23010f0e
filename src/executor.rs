//! Transition execution.
//!
//! Actions run in declared order against a working copy of the instance.
//! Entry actions of a newly entered state run right after the state change.
//! Messages are queued and only handed to the bus after the store commit.
//! Timers armed by a transition that does not commit are cancelled again,
//! so the stored token bookkeeping always matches the armed timers.

use tracing::{debug, error, warn};

use crate::store::commit_or_abort;
use crate::{
    Action, CancellationMode, EngineError, EngineStats, Event, InstanceStore, MessageBus,
    OutboundMessage, SagaDefinition, SagaInstance, ScheduledMessage, Scheduler, SchedulerError,
    StateId, TokenId, Transition,
};

enum Outbound {
    Publish(OutboundMessage),
    Send(Box<str>, OutboundMessage),
}

/// Working state of one transition attempt
pub(crate) struct Applied<D> {
    pub(crate) instance: SagaInstance<D>,
    pub(crate) finalize: bool,
    outbox: Vec<Outbound>,
    /// Tokens armed by this attempt and not cancelled since
    armed: Vec<TokenId>,
    /// Pre-existing tokens to cancel once committed
    deferred_cancels: Vec<TokenId>,
}

/// Result of a committed transition
#[derive(Debug)]
pub(crate) struct Committed {
    pub(crate) state: StateId,
    pub(crate) finalized: bool,
}

pub(crate) struct TransitionExecutor<'a, D> {
    pub(crate) definition: &'a SagaDefinition<D>,
    pub(crate) store: &'a dyn InstanceStore<D>,
    pub(crate) scheduler: &'a dyn Scheduler,
    pub(crate) bus: &'a dyn MessageBus,
    pub(crate) cancellation: CancellationMode,
    pub(crate) stats: &'a EngineStats,
}

impl<'a, D> TransitionExecutor<'a, D>
where
    D: Clone + Send + Sync + 'static,
{
    /// Run a transition's actions against a copy of `instance`.
    ///
    /// On failure every timer armed by the attempt is cancelled and the
    /// stored instance is untouched.
    pub(crate) async fn apply(
        &self,
        instance: &SagaInstance<D>,
        event: &Event,
        transition: &'a Transition<D>,
    ) -> Result<Applied<D>, EngineError> {
        let mut run = Applied {
            instance: instance.clone(),
            finalize: false,
            outbox: Vec::new(),
            armed: Vec::new(),
            deferred_cancels: Vec::new(),
        };

        match self.run_actions(&mut run, event, transition.actions()).await {
            Ok(()) => Ok(run),
            Err(e) => {
                self.compensate(&run.armed).await;
                Err(e)
            }
        }
    }

    /// Persist the working copy, then issue post-commit effects.
    ///
    /// Commit is the last step that can fail the transition.
    pub(crate) async fn commit(&self, run: Applied<D>) -> Result<Committed, EngineError> {
        let expected_version = run.instance.version();
        if let Err(e) =
            commit_or_abort(self.store, &run.instance, expected_version, run.finalize).await
        {
            self.compensate(&run.armed).await;
            return Err(e);
        }

        let correlation_id = run.instance.correlation_id();
        for token in run.deferred_cancels {
            if let Err(e) = self.cancel(token).await {
                warn!(%correlation_id, %token, error = %e, "Deferred timer cancellation failed");
            }
        }

        for outbound in run.outbox {
            let result = match outbound {
                Outbound::Publish(message) => self.bus.publish(message).await,
                Outbound::Send(destination, message) => self.bus.send(&destination, message).await,
            };
            if let Err(e) = result {
                EngineStats::incr(&self.stats.publish_failures);
                error!(%correlation_id, error = %e, "Outbound message dropped after commit");
            }
        }

        Ok(Committed {
            state: run.instance.current_state().clone(),
            finalized: run.finalize,
        })
    }

    async fn run_actions(
        &self,
        run: &mut Applied<D>,
        event: &Event,
        actions: &'a [Action<D>],
    ) -> Result<(), EngineError> {
        let mut stack = vec![actions.iter()];

        loop {
            let next = match stack.last_mut() {
                Some(actions) => actions.next(),
                None => break,
            };
            let Some(action) = next else {
                stack.pop();
                continue;
            };

            match action {
                Action::Assign(assign) => assign(&mut run.instance.data, event)?,
                Action::Schedule(name) => self.schedule(run, event, name).await?,
                Action::Unschedule(name) => {
                    if let Some(token) = run.instance.disarm(name) {
                        self.release(run, token).await?;
                    }
                }
                Action::Publish(builder) => {
                    let message = builder(&run.instance, event);
                    run.outbox.push(Outbound::Publish(message));
                }
                Action::Send {
                    destination,
                    builder,
                } => {
                    let message = builder(&run.instance, event);
                    run.outbox.push(Outbound::Send(destination.clone(), message));
                }
                Action::TransitionTo(state) => {
                    if Self::enter(run, state) {
                        stack.push(self.definition.entry_actions(state).iter());
                    }
                }
                Action::Finalize => {
                    run.finalize = self.definition.complete_on_finalize();
                    let final_state = StateId::final_state();
                    if Self::enter(run, &final_state) {
                        stack.push(self.definition.entry_actions(&final_state).iter());
                    }
                }
            }
        }

        Ok(())
    }

    /// Move to `state`; true when the state actually changed
    fn enter(run: &mut Applied<D>, state: &StateId) -> bool {
        if run.instance.current_state() == state {
            return false;
        }
        run.instance.set_state(state.clone());
        true
    }

    async fn schedule(
        &self,
        run: &mut Applied<D>,
        event: &Event,
        name: &str,
    ) -> Result<(), EngineError> {
        let spec = self
            .definition
            .schedule(name)
            .ok_or_else(|| EngineError::UnknownSchedule(name.into()))?;

        // Re-arming supersedes the outstanding timer
        if let Some(previous) = run.instance.disarm(name) {
            self.release(run, previous).await?;
        }

        let correlation_id = run.instance.correlation_id();
        let message = ScheduledMessage {
            event: spec.received_event(),
            correlation_id,
            payload: spec.build_payload(&run.instance, event),
        };
        let token = self.scheduler.schedule_send(spec.delay(), message).await?;
        EngineStats::incr(&self.stats.timers_scheduled);
        debug!(%correlation_id, schedule = %name, %token, delay = ?spec.delay(), "Timer armed");

        run.armed.push(token);
        run.instance.arm(name, token);
        Ok(())
    }

    /// Cancel a token that is no longer armed on the working copy
    async fn release(&self, run: &mut Applied<D>, token: TokenId) -> Result<(), EngineError> {
        if let Some(index) = run.armed.iter().position(|armed| *armed == token) {
            // Armed by this attempt: nothing stored refers to it, cancel now
            self.cancel(token).await?;
            run.armed.remove(index);
            return Ok(());
        }

        match self.cancellation {
            CancellationMode::Immediate => self.cancel(token).await?,
            CancellationMode::AfterCommit => run.deferred_cancels.push(token),
        }
        Ok(())
    }

    async fn cancel(&self, token: TokenId) -> Result<(), SchedulerError> {
        let cancelled = self.scheduler.cancel_scheduled_send(token).await?;
        if cancelled {
            EngineStats::incr(&self.stats.timers_cancelled);
        }
        debug!(%token, cancelled, "Timer cancelled");
        Ok(())
    }

    async fn compensate(&self, armed: &[TokenId]) {
        for &token in armed {
            match self.cancel(token).await {
                Ok(()) => EngineStats::incr(&self.stats.compensations),
                Err(e) => warn!(%token, error = %e, "Failed to cancel timer of aborted transition"),
            }
        }
    }
}
