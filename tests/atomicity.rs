mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use saga_orchestration::{
    ActionError, CancellationMode, Correlate, CorrelationId, EngineConfig, EngineError, Event,
    IgnoreReason, InMemoryBus, InMemoryInstanceStore, InMemoryScheduler, NoOpObserver,
    OutboundMessage, Outcome, SagaDefinition, SagaEngine, ScheduleSpec, ScheduledMessage,
    Scheduler, SchedulerError, TokenId, TransitionRule,
};
use serde_json::json;

#[derive(Clone, Debug, Default, PartialEq)]
struct Shipment {
    attempts: u32,
    carrier: Option<String>,
}

type Rule = TransitionRule<Shipment>;

/// Grants a fixed number of `schedule_send` calls, then fails
struct RationedScheduler {
    inner: InMemoryScheduler,
    remaining: Mutex<Option<usize>>,
}

impl RationedScheduler {
    fn new() -> Self {
        Self {
            inner: InMemoryScheduler::new(),
            remaining: Mutex::new(None),
        }
    }

    fn allow(&self, calls: usize) {
        *self.remaining.lock().unwrap() = Some(calls);
    }
}

#[async_trait]
impl Scheduler for RationedScheduler {
    async fn schedule_send(
        &self,
        delay: Duration,
        message: ScheduledMessage,
    ) -> Result<TokenId, SchedulerError> {
        {
            let mut remaining = self.remaining.lock().unwrap();
            match remaining.as_mut() {
                Some(0) => return Err(SchedulerError::Schedule("quota exhausted".into())),
                Some(n) => *n -= 1,
                None => {}
            }
        }
        self.inner.schedule_send(delay, message).await
    }

    async fn cancel_scheduled_send(&self, token: TokenId) -> Result<bool, SchedulerError> {
        self.inner.cancel_scheduled_send(token).await
    }
}

fn correlated() -> Correlate {
    Correlate::by_field("correlation_id")
}

/// Book arms a pickup window and a reminder; Retry re-arms both
fn shipment_definition() -> SagaDefinition<Shipment> {
    SagaDefinition::builder("shipment")
        .state("Booked")
        .state("Dispatched")
        .event("Book", correlated())
        .event("Retry", correlated())
        .event("Dispatch", correlated())
        .schedule(ScheduleSpec::new("Pickup", Duration::from_secs(60)).received(correlated()))
        .schedule(ScheduleSpec::new("Reminder", Duration::from_secs(30)).received(correlated()))
        .initially(
            Rule::when("Book")
                .schedule("Pickup")
                .schedule("Reminder")
                .transition_to("Booked"),
        )
        .during(
            "Booked",
            Rule::when("Retry")
                .assign(|data, _| {
                    data.attempts += 1;
                    Ok(())
                })
                .schedule("Pickup")
                .schedule("Reminder"),
        )
        .during(
            "Booked",
            Rule::when("Dispatch")
                .only_if(|_, event| event.str_field("carrier").is_some())
                .assign(|data, event| match event.str_field("carrier") {
                    Some("unknown") => Err(ActionError::new("carrier not recognised")),
                    carrier => {
                        data.carrier = carrier.map(String::from);
                        Ok(())
                    }
                })
                .unschedule("Pickup")
                .unschedule("Reminder")
                .send("carrier-gateway", |instance, _| {
                    OutboundMessage::new(
                        "DispatchRequested",
                        json!({ "carrier": instance.data.carrier }),
                    )
                    .correlated(instance.correlation_id())
                })
                .transition_to("Dispatched"),
        )
        .build()
        .expect("shipment definition is valid")
}

fn event(name: &str, id: CorrelationId) -> Event {
    Event::new(name, json!({ "correlation_id": id.to_string() }))
}

struct Fixture {
    engine: SagaEngine<Shipment>,
    scheduler: Arc<RationedScheduler>,
    bus: Arc<InMemoryBus>,
}

fn fixture(cancellation: CancellationMode) -> Fixture {
    let scheduler = Arc::new(RationedScheduler::new());
    let bus = Arc::new(InMemoryBus::new());
    let engine = SagaEngine::new(
        shipment_definition(),
        Arc::new(InMemoryInstanceStore::new()),
        scheduler.clone(),
        bus.clone(),
    )
    .with_observer(Arc::new(NoOpObserver))
    .with_config(EngineConfig {
        cancellation,
        ..EngineConfig::default()
    });
    Fixture {
        engine,
        scheduler,
        bus,
    }
}

#[tokio::test]
async fn test_scheduling_failure_compensates_new_tokens() {
    common::init_tracing();
    let f = fixture(CancellationMode::Immediate);
    f.scheduler.allow(1);
    let id = CorrelationId::random();

    let outcome = f.engine.consume(event("Book", id)).await;
    assert!(matches!(
        outcome,
        Outcome::Failed(EngineError::SchedulingFailure(SchedulerError::Schedule(_)))
    ));
    assert!(f.engine.query(id).await.unwrap().is_none());
    assert!(f.scheduler.inner.pending().is_empty());
    assert_eq!(f.scheduler.inner.cancelled_tokens().len(), 1);
    assert_eq!(f.engine.stats().compensations, 1);
}

#[tokio::test]
async fn test_failed_retry_keeps_stored_tokens_armed() {
    let f = fixture(CancellationMode::default());
    let id = CorrelationId::random();
    f.engine.consume(event("Book", id)).await;
    let before = f.engine.query(id).await.unwrap().unwrap();
    let pickup = before.token("Pickup").unwrap();
    let reminder = before.token("Reminder").unwrap();

    // Pickup re-arms, Reminder fails
    f.scheduler.allow(1);
    let outcome = f.engine.consume(event("Retry", id)).await;
    assert!(matches!(
        outcome,
        Outcome::Failed(EngineError::SchedulingFailure(_))
    ));

    let after = f.engine.query(id).await.unwrap().unwrap();
    assert_eq!(before, after);
    for (name, token) in after.tokens() {
        assert!(f.scheduler.inner.is_armed(token), "{name} no longer armed");
    }
    assert_eq!(f.scheduler.inner.pending_tokens(), vec![pickup, reminder]);
}

#[tokio::test]
async fn test_after_commit_mode_cancels_superseded_tokens_on_commit() {
    let f = fixture(CancellationMode::AfterCommit);
    let id = CorrelationId::random();
    f.engine.consume(event("Book", id)).await;
    let before = f.engine.query(id).await.unwrap().unwrap();

    let outcome = f.engine.consume(event("Retry", id)).await;
    assert!(matches!(outcome, Outcome::Transitioned { .. }));

    let after = f.engine.query(id).await.unwrap().unwrap();
    assert_eq!(after.data.attempts, 1);
    let armed: Vec<_> = after.tokens().map(|(_, token)| token).collect();
    assert_eq!(armed.len(), 2);
    for (_, token) in after.tokens() {
        assert!(f.scheduler.inner.is_armed(token));
    }
    let cancelled = f.scheduler.inner.cancelled_tokens();
    assert!(cancelled.contains(&before.token("Pickup").unwrap()));
    assert!(cancelled.contains(&before.token("Reminder").unwrap()));
}

#[tokio::test]
async fn test_guard_rejection_and_send_delivery() {
    let f = fixture(CancellationMode::Immediate);
    let id = CorrelationId::random();
    f.engine.consume(event("Book", id)).await;

    let outcome = f.engine.consume(event("Dispatch", id)).await;
    assert!(matches!(
        outcome,
        Outcome::Ignored(IgnoreReason::GuardRejected)
    ));
    assert_eq!(f.scheduler.inner.pending().len(), 2);

    let dispatch = Event::new(
        "Dispatch",
        json!({ "correlation_id": id.to_string(), "carrier": "acme" }),
    );
    let outcome = f.engine.consume(dispatch).await;
    assert_eq!(outcome.state().map(|state| state.as_str()), Some("Dispatched"));
    assert!(f.scheduler.inner.pending().is_empty());

    let deliveries = f.bus.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].destination.as_deref(), Some("carrier-gateway"));
    assert_eq!(deliveries[0].message.payload, json!({ "carrier": "acme" }));

    let instance = f.engine.query(id).await.unwrap().unwrap();
    assert!(instance.tokens().next().is_none());
    assert_eq!(instance.data.carrier.as_deref(), Some("acme"));
}

#[tokio::test]
async fn test_action_error_aborts_transition() {
    let f = fixture(CancellationMode::Immediate);
    let id = CorrelationId::random();
    f.engine.consume(event("Book", id)).await;
    let before = f.engine.query(id).await.unwrap().unwrap();

    let dispatch = Event::new(
        "Dispatch",
        json!({ "correlation_id": id.to_string(), "carrier": "unknown" }),
    );
    let outcome = f.engine.consume(dispatch).await;
    match outcome {
        Outcome::Failed(EngineError::Action(err)) => {
            assert_eq!(&*err.reason, "carrier not recognised");
        }
        other => panic!("expected an action failure, got {other:?}"),
    }

    assert_eq!(f.engine.query(id).await.unwrap().unwrap(), before);
    assert_eq!(f.scheduler.inner.pending().len(), 2);
    assert!(f.bus.deliveries().is_empty());
}
