//! Orchestration-Based SAGA State Machines
//!
//! A saga is a long-running process driven by events. Each saga instance is
//! identified by a correlation ID, sits in exactly one named state, carries
//! application data and may own outstanding timers. A [`SagaDefinition`]
//! declares the states, events, schedules and transition rules; a
//! [`SagaEngine`] routes inbound events to instances and runs the matching
//! transition atomically against the [`InstanceStore`].
//!
//! # Quick Start
//!
//! ```rust,ignore
//! // 1. Declare the saga
//! let definition = SagaDefinition::<OrderData>::builder("orders")
//!     .state("AwaitingPayment")
//!     .event("OrderPlaced", Correlate::by_field("order_id"))
//!     .event("PaymentReceived", Correlate::by_field("order_id"))
//!     .schedule(ScheduleSpec::new("PaymentTimeout", Duration::from_secs(600))
//!         .received(Correlate::by_field("correlation_id")))
//!     .initially(TransitionRule::when("OrderPlaced")
//!         .schedule("PaymentTimeout")
//!         .transition_to("AwaitingPayment"))
//!     .during("AwaitingPayment", TransitionRule::when("PaymentReceived")
//!         .unschedule("PaymentTimeout")
//!         .finalize())
//!     .build()?;
//!
//! // 2. Wire the engine to its collaborators
//! let engine = SagaEngine::new(definition, store, scheduler, bus);
//!
//! // 3. Feed it events
//! match engine.consume(event).await {
//!     Outcome::Transitioned { state, .. } => { /* committed */ }
//!     Outcome::Ignored(reason) => { /* acknowledge and drop */ }
//!     Outcome::Failed(error) => { /* let the transport redeliver */ }
//! }
//! ```

#![warn(missing_docs)]

// === Core Types ===
mod context;
mod errors;
mod events;
mod state;

// === Definition ===
mod correlation;
mod definition;

// === Collaborators ===
mod bus;
mod scheduler;
mod store;

// === Dispatch ===
mod engine;
mod executor;
mod lock;
mod registry;

// === Configuration ===
mod config;

// === Observability ===
mod observer;
mod stats;

// === Re-exports ===

// Types
pub use context::{CorrelationId, EventId, StateId, TokenId};
pub use state::{SagaData, SagaInstance};

// Events
pub use events::{Event, OutboundMessage, ScheduledMessage};

// Errors
pub use errors::{
    ActionError, BuildError, BusError, DefinitionIssue, EngineError, RegistryError,
    SchedulerError, StoreError,
};

// Definition
pub use correlation::{resolve as resolve_correlation, Correlate};
pub use definition::{
    Action, Assign, DefinitionBuilder, Guard, MessageBuilder, PayloadBuilder, SagaDefinition,
    ScheduleSpec, Transition, TransitionRule,
};

// Collaborators
pub use bus::{Delivery, InMemoryBus, MessageBus};
pub use scheduler::{InMemoryScheduler, PendingTimer, Scheduler, TokioScheduler};
pub use store::{commit_or_abort, load_or_create, InMemoryInstanceStore, InstanceStore, Loaded};

// Dispatch
pub use engine::{IgnoreReason, Outcome, SagaEngine};
pub use lock::{KeyGuard, KeyedLock};
pub use registry::{EventConsumer, SagaRegistry};

// Configuration
pub use config::{CancellationMode, EngineConfig, RetryPolicy};

// Observability
pub use observer::{NoOpObserver, SagaObserver, TracingObserver};
pub use stats::{EngineStats, EngineStatsSnapshot};
