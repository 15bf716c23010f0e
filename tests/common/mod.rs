//! Shared fixture: a saga that re-arms its "Check" timer every time it fires
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use saga_orchestration::{
    Action, Correlate, CorrelationId, EngineConfig, Event, InMemoryBus, InMemoryInstanceStore,
    InMemoryScheduler, InstanceStore, MessageBus, NoOpObserver, OutboundMessage, SagaDefinition,
    SagaEngine, ScheduleSpec, Scheduler, TransitionRule,
};
use serde_json::json;

pub const CHECK: &str = "Check";
pub const CHECK_DELAY: Duration = Duration::from_secs(2);
pub const RESCHEDULED: &str = "MessageRescheduled";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CheckData {
    pub requested_by: Option<String>,
    pub checks: u32,
}

type Rule = TransitionRule<CheckData>;

fn correlated() -> Correlate {
    Correlate::by_field("correlation_id")
}

/// Start -> Active (arms Check on entry); Check.Received re-arms and
/// announces the new token; Stop disarms and finalizes.
pub fn rescheduling_definition() -> SagaDefinition<CheckData> {
    SagaDefinition::builder("rescheduling")
        .state("Active")
        .event("Start", correlated())
        .event("Stop", correlated())
        .schedule(ScheduleSpec::new(CHECK, CHECK_DELAY).received(correlated()))
        .initially(
            Rule::when("Start")
                .assign(|data, event| {
                    data.requested_by = event.str_field("requested_by").map(String::from);
                    Ok(())
                })
                .transition_to("Active"),
        )
        .when_enter("Active", [Action::schedule(CHECK)])
        .during(
            "Active",
            Rule::when_received(CHECK)
                .assign(|data, _| {
                    data.checks += 1;
                    Ok(())
                })
                .schedule(CHECK)
                .publish(|instance, _| {
                    OutboundMessage::new(
                        RESCHEDULED,
                        json!({
                            "correlation_id": instance.correlation_id().to_string(),
                            "token": instance.token(CHECK).map(|token| token.to_string()),
                        }),
                    )
                    .correlated(instance.correlation_id())
                }),
        )
        .during("Active", Rule::when("Stop").unschedule(CHECK).finalize())
        .complete_when_finalized()
        .build()
        .expect("fixture definition is valid")
}

pub fn start(id: CorrelationId) -> Event {
    Event::new(
        "Start",
        json!({ "correlation_id": id.to_string(), "requested_by": "ops" }),
    )
}

pub fn stop(id: CorrelationId) -> Event {
    Event::new("Stop", json!({ "correlation_id": id.to_string() }))
}

pub struct Harness {
    pub engine: SagaEngine<CheckData>,
    pub store: Arc<InMemoryInstanceStore<CheckData>>,
    pub scheduler: Arc<InMemoryScheduler>,
    pub bus: Arc<InMemoryBus>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(InMemoryInstanceStore::new());
        let scheduler = Arc::new(InMemoryScheduler::new());
        let bus = Arc::new(InMemoryBus::new());
        let engine = engine_with(
            rescheduling_definition(),
            store.clone(),
            scheduler.clone(),
            bus.clone(),
        )
        .with_config(config);
        Self {
            engine,
            store,
            scheduler,
            bus,
        }
    }
}

pub fn engine_with(
    definition: SagaDefinition<CheckData>,
    store: Arc<dyn InstanceStore<CheckData>>,
    scheduler: Arc<dyn Scheduler>,
    bus: Arc<dyn MessageBus>,
) -> SagaEngine<CheckData> {
    SagaEngine::new(definition, store, scheduler, bus).with_observer(Arc::new(NoOpObserver))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
