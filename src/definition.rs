//! Saga definitions: states, events, schedules and the transition table.
//!
//! A definition is assembled with [`DefinitionBuilder`] and validated once
//! by [`DefinitionBuilder::build`], which reports every inconsistency it
//! finds. The resulting [`SagaDefinition`] is immutable and shared by all
//! instances of the saga.
//!
//! ```rust,ignore
//! let definition = SagaDefinition::<Order>::builder("orders")
//!     .state("Active")
//!     .event("Start", Correlate::by_field("correlation_id"))
//!     .event("Stop", Correlate::by_field("correlation_id"))
//!     .schedule(ScheduleSpec::new("Check", Duration::from_secs(2))
//!         .received(Correlate::by_field("correlation_id")))
//!     .initially(TransitionRule::when("Start").transition_to("Active"))
//!     .when_enter("Active", [Action::schedule("Check")])
//!     .during("Active", TransitionRule::when("Stop").unschedule("Check").finalize())
//!     .complete_when_finalized()
//!     .build()?;
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::{
    ActionError, BuildError, Correlate, DefinitionIssue, Event, EventId, OutboundMessage,
    SagaInstance, StateId,
};

/// Mutates instance data from the inbound event
pub type Assign<D> = Arc<dyn Fn(&mut D, &Event) -> Result<(), ActionError> + Send + Sync>;

/// Builds an outbound message from the working copy
pub type MessageBuilder<D> = Arc<dyn Fn(&SagaInstance<D>, &Event) -> OutboundMessage + Send + Sync>;

/// Builds the payload of a scheduled message
pub type PayloadBuilder<D> = Arc<dyn Fn(&SagaInstance<D>, &Event) -> Value + Send + Sync>;

/// Decides whether a rule applies
pub type Guard<D> = Arc<dyn Fn(&SagaInstance<D>, &Event) -> bool + Send + Sync>;

/// One step of a transition, applied by the executor in declared order
pub enum Action<D> {
    /// Mutate instance data
    Assign(Assign<D>),
    /// Arm the named schedule, superseding any armed token
    Schedule(Box<str>),
    /// Cancel the named schedule's armed token, if any
    Unschedule(Box<str>),
    /// Publish a message once the transition commits
    Publish(MessageBuilder<D>),
    /// Send a message to a destination once the transition commits
    Send {
        /// Destination address
        destination: Box<str>,
        /// Message builder
        builder: MessageBuilder<D>,
    },
    /// Change the current state
    TransitionTo(StateId),
    /// Move to "Final", removing the instance if the definition completes on finalize
    Finalize,
}

impl<D> Action<D> {
    /// Mutate instance data from the event
    pub fn assign<F>(f: F) -> Self
    where
        F: Fn(&mut D, &Event) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        Self::Assign(Arc::new(f))
    }

    /// Arm a schedule
    pub fn schedule(name: &str) -> Self {
        Self::Schedule(name.into())
    }

    /// Disarm a schedule
    pub fn unschedule(name: &str) -> Self {
        Self::Unschedule(name.into())
    }

    /// Publish a message
    pub fn publish<F>(f: F) -> Self
    where
        F: Fn(&SagaInstance<D>, &Event) -> OutboundMessage + Send + Sync + 'static,
    {
        Self::Publish(Arc::new(f))
    }

    /// Send a message to a destination
    pub fn send<F>(destination: &str, f: F) -> Self
    where
        F: Fn(&SagaInstance<D>, &Event) -> OutboundMessage + Send + Sync + 'static,
    {
        Self::Send {
            destination: destination.into(),
            builder: Arc::new(f),
        }
    }

    /// Change state
    pub fn transition_to(state: &str) -> Self {
        Self::TransitionTo(StateId::new(state))
    }

    /// Finalize the instance
    pub fn finalize() -> Self {
        Self::Finalize
    }

    /// The state this action moves to, if it changes state
    pub fn target(&self) -> Option<StateId> {
        match self {
            Self::TransitionTo(state) => Some(state.clone()),
            Self::Finalize => Some(StateId::final_state()),
            _ => None,
        }
    }

    fn schedule_ref(&self) -> Option<&str> {
        match self {
            Self::Schedule(name) | Self::Unschedule(name) => Some(&**name),
            _ => None,
        }
    }
}

impl<D> std::fmt::Debug for Action<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Assign(_) => f.write_str("Assign"),
            Self::Schedule(name) => write!(f, "Schedule({name})"),
            Self::Unschedule(name) => write!(f, "Unschedule({name})"),
            Self::Publish(_) => f.write_str("Publish"),
            Self::Send { destination, .. } => write!(f, "Send({destination})"),
            Self::TransitionTo(state) => write!(f, "TransitionTo({state})"),
            Self::Finalize => f.write_str("Finalize"),
        }
    }
}

/// Named timer specification
pub struct ScheduleSpec<D> {
    name: Box<str>,
    delay: Duration,
    payload: PayloadBuilder<D>,
    received: Option<Correlate>,
    accept_stale: bool,
}

impl<D: 'static> ScheduleSpec<D> {
    /// A schedule firing `delay` after it is armed.
    ///
    /// The default payload carries the instance's correlation ID under
    /// `correlation_id`.
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            payload: Arc::new(|instance: &SagaInstance<D>, _: &Event| {
                json!({ "correlation_id": instance.correlation_id().to_string() })
            }),
            received: None,
            accept_stale: false,
        }
    }
}

impl<D> ScheduleSpec<D> {
    /// Build the scheduled payload from the working copy
    pub fn payload<F>(mut self, f: F) -> Self
    where
        F: Fn(&SagaInstance<D>, &Event) -> Value + Send + Sync + 'static,
    {
        self.payload = Arc::new(f);
        self
    }

    /// Correlation for the received event
    pub fn received(mut self, correlate: Correlate) -> Self {
        self.received = Some(correlate);
        self
    }

    /// Process deliveries even when their token is no longer the armed one
    pub fn accept_stale(mut self) -> Self {
        self.accept_stale = true;
        self
    }

    /// Schedule name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Delay between arming and delivery
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Event raised when the timer fires
    pub fn received_event(&self) -> EventId {
        EventId::received(&self.name)
    }

    /// Whether superseded deliveries are still processed
    pub fn accepts_stale(&self) -> bool {
        self.accept_stale
    }

    pub(crate) fn build_payload(&self, instance: &SagaInstance<D>, event: &Event) -> Value {
        (self.payload)(instance, event)
    }
}

/// A rule as written: the event it reacts to plus its actions.
///
/// The shorthand methods append actions in call order.
pub struct TransitionRule<D> {
    event: EventId,
    guard: Option<Guard<D>>,
    actions: Vec<Action<D>>,
}

impl<D> TransitionRule<D> {
    /// React to an event
    pub fn when(event: &str) -> Self {
        Self {
            event: EventId::new(event),
            guard: None,
            actions: Vec::new(),
        }
    }

    /// React to a schedule firing
    pub fn when_received(schedule: &str) -> Self {
        Self {
            event: EventId::received(schedule),
            guard: None,
            actions: Vec::new(),
        }
    }

    /// Only apply the rule when the guard passes
    pub fn only_if<F>(mut self, guard: F) -> Self
    where
        F: Fn(&SagaInstance<D>, &Event) -> bool + Send + Sync + 'static,
    {
        self.guard = Some(Arc::new(guard));
        self
    }

    /// Append an action
    pub fn then(mut self, action: Action<D>) -> Self {
        self.actions.push(action);
        self
    }

    /// Append an `Assign`
    pub fn assign<F>(self, f: F) -> Self
    where
        F: Fn(&mut D, &Event) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        self.then(Action::assign(f))
    }

    /// Append a `Schedule`
    pub fn schedule(self, name: &str) -> Self {
        self.then(Action::schedule(name))
    }

    /// Append an `Unschedule`
    pub fn unschedule(self, name: &str) -> Self {
        self.then(Action::unschedule(name))
    }

    /// Append a `Publish`
    pub fn publish<F>(self, f: F) -> Self
    where
        F: Fn(&SagaInstance<D>, &Event) -> OutboundMessage + Send + Sync + 'static,
    {
        self.then(Action::publish(f))
    }

    /// Append a `Send`
    pub fn send<F>(self, destination: &str, f: F) -> Self
    where
        F: Fn(&SagaInstance<D>, &Event) -> OutboundMessage + Send + Sync + 'static,
    {
        self.then(Action::send(destination, f))
    }

    /// Append a `TransitionTo`
    pub fn transition_to(self, state: &str) -> Self {
        self.then(Action::transition_to(state))
    }

    /// Append a `Finalize`
    pub fn finalize(self) -> Self {
        self.then(Action::finalize())
    }
}

/// A validated entry of the transition table
pub struct Transition<D> {
    guard: Option<Guard<D>>,
    actions: Vec<Action<D>>,
    target: Option<StateId>,
}

impl<D> Transition<D> {
    /// Actions in execution order
    pub fn actions(&self) -> &[Action<D>] {
        &self.actions
    }

    /// State the rule moves to, if any
    pub fn target(&self) -> Option<&StateId> {
        self.target.as_ref()
    }

    /// Evaluate the rule's guard
    pub fn accepts(&self, instance: &SagaInstance<D>, event: &Event) -> bool {
        self.guard
            .as_ref()
            .map(|guard| guard(instance, event))
            .unwrap_or(true)
    }
}

/// Immutable saga definition
pub struct SagaDefinition<D> {
    name: Box<str>,
    states: HashSet<StateId>,
    events: HashMap<EventId, Correlate>,
    schedules: HashMap<Box<str>, ScheduleSpec<D>>,
    transitions: HashMap<(StateId, EventId), Transition<D>>,
    entry_actions: HashMap<StateId, Vec<Action<D>>>,
    complete_on_finalize: bool,
}

impl<D> SagaDefinition<D> {
    /// Start building a definition
    pub fn builder(name: &str) -> DefinitionBuilder<D> {
        DefinitionBuilder::new(name)
    }

    /// Definition name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check whether a state is declared (including the implicit ones)
    pub fn has_state(&self, state: &StateId) -> bool {
        self.states.contains(state)
    }

    /// Declared states
    pub fn states(&self) -> impl Iterator<Item = &StateId> {
        self.states.iter()
    }

    /// Check whether an event is declared
    pub fn declares_event(&self, event: &EventId) -> bool {
        self.events.contains_key(event)
    }

    /// Correlation extractor of an event
    pub fn correlate(&self, event: &EventId) -> Option<&Correlate> {
        self.events.get(event)
    }

    /// An event is a start event when a rule reacts to it in "Initial"
    pub fn is_start_event(&self, event: &EventId) -> bool {
        self.transitions
            .contains_key(&(StateId::initial(), event.clone()))
    }

    /// Look up the transition for (state, event)
    pub fn transition(&self, state: &StateId, event: &EventId) -> Option<&Transition<D>> {
        self.transitions.get(&(state.clone(), event.clone()))
    }

    /// Look up a schedule
    pub fn schedule(&self, name: &str) -> Option<&ScheduleSpec<D>> {
        self.schedules.get(name)
    }

    /// The schedule whose timer raises this event
    pub fn received_schedule(&self, event: &EventId) -> Option<&ScheduleSpec<D>> {
        event.schedule_name().and_then(|name| self.schedules.get(name))
    }

    /// Actions run when entering a state
    pub fn entry_actions(&self, state: &StateId) -> &[Action<D>] {
        self.entry_actions
            .get(state)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether finalized instances are removed from the store
    pub fn complete_on_finalize(&self) -> bool {
        self.complete_on_finalize
    }
}

impl<D> std::fmt::Debug for SagaDefinition<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaDefinition")
            .field("name", &self.name)
            .field("states", &self.states.len())
            .field("events", &self.events.len())
            .field("schedules", &self.schedules.len())
            .field("transitions", &self.transitions.len())
            .field("complete_on_finalize", &self.complete_on_finalize)
            .finish()
    }
}

/// Collects declarations for a [`SagaDefinition`]
pub struct DefinitionBuilder<D> {
    name: Box<str>,
    states: Vec<StateId>,
    events: Vec<(EventId, Correlate)>,
    schedules: Vec<ScheduleSpec<D>>,
    rules: Vec<(StateId, TransitionRule<D>)>,
    entry_actions: Vec<(StateId, Vec<Action<D>>)>,
    complete_on_finalize: bool,
}

impl<D> DefinitionBuilder<D> {
    fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            states: Vec::new(),
            events: Vec::new(),
            schedules: Vec::new(),
            rules: Vec::new(),
            entry_actions: Vec::new(),
            complete_on_finalize: false,
        }
    }

    /// Declare a state
    pub fn state(mut self, name: &str) -> Self {
        self.states.push(StateId::new(name));
        self
    }

    /// Declare an event with its correlation
    pub fn event(mut self, name: &str, correlate: Correlate) -> Self {
        self.events.push((EventId::new(name), correlate));
        self
    }

    /// Declare a schedule (and its received event)
    pub fn schedule(mut self, spec: ScheduleSpec<D>) -> Self {
        self.schedules.push(spec);
        self
    }

    /// Rule applied to new instances
    pub fn initially(self, rule: TransitionRule<D>) -> Self {
        self.during(StateId::INITIAL, rule)
    }

    /// Rule applied while in `state`
    pub fn during(mut self, state: &str, rule: TransitionRule<D>) -> Self {
        self.rules.push((StateId::new(state), rule));
        self
    }

    /// Actions run whenever an instance enters `state`
    pub fn when_enter(mut self, state: &str, actions: impl IntoIterator<Item = Action<D>>) -> Self {
        self.entry_actions
            .push((StateId::new(state), actions.into_iter().collect()));
        self
    }

    /// Remove instances from the store once they finalize
    pub fn complete_when_finalized(mut self) -> Self {
        self.complete_on_finalize = true;
        self
    }

    /// Validate and freeze the definition
    pub fn build(self) -> Result<SagaDefinition<D>, BuildError> {
        let mut issues = Vec::new();

        let mut states: HashSet<StateId> = [StateId::initial(), StateId::final_state()]
            .into_iter()
            .collect();
        for state in self.states {
            if !states.insert(state.clone()) {
                issues.push(DefinitionIssue::DuplicateState(state));
            }
        }

        let mut events: HashMap<EventId, Correlate> = HashMap::new();
        let mut declared_events: HashSet<EventId> = HashSet::new();
        for (event, correlate) in self.events {
            if !declared_events.insert(event.clone()) {
                issues.push(DefinitionIssue::DuplicateEvent(event));
                continue;
            }
            events.insert(event, correlate);
        }

        let mut schedules: HashMap<Box<str>, ScheduleSpec<D>> = HashMap::new();
        for spec in self.schedules {
            if schedules.contains_key(spec.name()) {
                issues.push(DefinitionIssue::DuplicateSchedule(spec.name.clone()));
                continue;
            }
            let received = spec.received_event();
            if !declared_events.insert(received.clone()) {
                issues.push(DefinitionIssue::DuplicateEvent(received.clone()));
            }
            match &spec.received {
                Some(correlate) => {
                    events.insert(received, correlate.clone());
                }
                None => issues.push(DefinitionIssue::MissingReceivedCorrelation(
                    spec.name.clone(),
                )),
            }
            schedules.insert(spec.name.clone(), spec);
        }

        let check_actions = |actions: &[Action<D>], referenced_by: &str, issues: &mut Vec<_>| {
            for action in actions {
                if let Some(schedule) = action.schedule_ref() {
                    if !schedules.contains_key(schedule) {
                        issues.push(DefinitionIssue::UndeclaredSchedule {
                            schedule: schedule.into(),
                            referenced_by: referenced_by.into(),
                        });
                    }
                }
                if let Action::TransitionTo(target) = action {
                    if !states.contains(target) || target.as_str() == StateId::INITIAL {
                        issues.push(DefinitionIssue::UndeclaredState {
                            state: target.clone(),
                            referenced_by: referenced_by.into(),
                        });
                    }
                }
            }
        };

        let mut transitions = HashMap::new();
        for (state, rule) in self.rules {
            let referenced_by = format!("rule ({state}, {})", rule.event);

            if !states.contains(&state) {
                issues.push(DefinitionIssue::UndeclaredState {
                    state: state.clone(),
                    referenced_by: referenced_by.clone().into_boxed_str(),
                });
            }
            if state.as_str() == StateId::FINAL {
                issues.push(DefinitionIssue::TransitionFromFinal(rule.event.clone()));
            }
            if !declared_events.contains(&rule.event) {
                issues.push(DefinitionIssue::UndeclaredEvent {
                    event: rule.event.clone(),
                    referenced_by: referenced_by.clone().into_boxed_str(),
                });
            }

            check_actions(&rule.actions, &referenced_by, &mut issues);

            let mut targets = rule.actions.iter().filter_map(Action::target);
            let target = targets.next();
            if targets.next().is_some() {
                issues.push(DefinitionIssue::ConflictingTargets {
                    state: state.clone(),
                    event: rule.event.clone(),
                });
            }

            let key = (state, rule.event);
            if transitions.contains_key(&key) {
                issues.push(DefinitionIssue::DuplicateTransition {
                    state: key.0,
                    event: key.1,
                });
                continue;
            }
            transitions.insert(
                key,
                Transition {
                    guard: rule.guard,
                    actions: rule.actions,
                    target,
                },
            );
        }

        let mut entry_actions: HashMap<StateId, Vec<Action<D>>> = HashMap::new();
        for (state, actions) in self.entry_actions {
            let referenced_by = format!("entry actions of {state}");
            if !states.contains(&state) {
                issues.push(DefinitionIssue::UndeclaredState {
                    state: state.clone(),
                    referenced_by: referenced_by.clone().into_boxed_str(),
                });
            }
            if actions.iter().any(|action| action.target().is_some()) {
                issues.push(DefinitionIssue::EntryActionChangesState(state.clone()));
            }
            check_actions(&actions, &referenced_by, &mut issues);
            entry_actions.entry(state).or_default().extend(actions);
        }

        if !issues.is_empty() {
            return Err(BuildError {
                saga: self.name,
                issues,
            });
        }

        Ok(SagaDefinition {
            name: self.name,
            states,
            events,
            schedules,
            transitions,
            entry_actions,
            complete_on_finalize: self.complete_on_finalize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn correlated() -> Correlate {
        Correlate::by_field("correlation_id")
    }

    #[test]
    fn test_build_valid_definition() {
        let definition = SagaDefinition::<()>::builder("reschedule")
            .state("Active")
            .event("Start", correlated())
            .event("Stop", correlated())
            .schedule(ScheduleSpec::new("Check", Duration::from_secs(2)).received(correlated()))
            .initially(TransitionRule::when("Start").transition_to("Active"))
            .when_enter("Active", [Action::schedule("Check")])
            .during("Active", TransitionRule::when_received("Check").schedule("Check"))
            .during("Active", TransitionRule::when("Stop").unschedule("Check").finalize())
            .complete_when_finalized()
            .build()
            .expect("definition is consistent");

        let start = EventId::new("Start");
        let stop = EventId::new("Stop");
        assert!(definition.is_start_event(&start));
        assert!(!definition.is_start_event(&stop));
        assert!(definition.declares_event(&EventId::received("Check")));
        assert_eq!(
            definition
                .transition(&StateId::initial(), &start)
                .and_then(Transition::target),
            Some(&StateId::new("Active"))
        );
        assert_eq!(
            definition
                .transition(&StateId::new("Active"), &stop)
                .and_then(Transition::target),
            Some(&StateId::final_state())
        );
        assert_eq!(definition.entry_actions(&StateId::new("Active")).len(), 1);
        assert!(definition.complete_on_finalize());
        assert_eq!(
            definition
                .received_schedule(&EventId::received("Check"))
                .map(ScheduleSpec::name),
            Some("Check")
        );
    }

    #[test]
    fn test_build_reports_every_issue() {
        let err = SagaDefinition::<()>::builder("broken")
            .state("Active")
            .state("Active")
            .event("Start", correlated())
            .schedule(ScheduleSpec::new("Check", Duration::from_secs(1)))
            .initially(TransitionRule::when("Start").transition_to("Missing"))
            .during("Active", TransitionRule::when("Unknown").schedule("Nope"))
            .during(
                "Active",
                TransitionRule::when("Start")
                    .transition_to("Active")
                    .finalize(),
            )
            .when_enter("Active", [Action::finalize()])
            .build()
            .expect_err("definition is inconsistent");

        let issues = err.issues;
        assert!(issues.contains(&DefinitionIssue::DuplicateState(StateId::new("Active"))));
        assert!(issues.contains(&DefinitionIssue::MissingReceivedCorrelation("Check".into())));
        assert!(issues.contains(&DefinitionIssue::UndeclaredState {
            state: StateId::new("Missing"),
            referenced_by: "rule (Initial, Start)".into(),
        }));
        assert!(issues.contains(&DefinitionIssue::UndeclaredEvent {
            event: EventId::new("Unknown"),
            referenced_by: "rule (Active, Unknown)".into(),
        }));
        assert!(issues.contains(&DefinitionIssue::UndeclaredSchedule {
            schedule: "Nope".into(),
            referenced_by: "rule (Active, Unknown)".into(),
        }));
        assert!(issues.contains(&DefinitionIssue::ConflictingTargets {
            state: StateId::new("Active"),
            event: EventId::new("Start"),
        }));
        assert!(issues.contains(&DefinitionIssue::EntryActionChangesState(StateId::new(
            "Active"
        ))));
        assert_eq!(issues.len(), 7);
    }

    #[test]
    fn test_duplicate_rule_and_final_source() {
        let err = SagaDefinition::<()>::builder("dupes")
            .state("Active")
            .event("Start", correlated())
            .initially(TransitionRule::when("Start").transition_to("Active"))
            .initially(TransitionRule::when("Start"))
            .during(StateId::FINAL, TransitionRule::when("Start"))
            .build()
            .expect_err("definition is inconsistent");

        assert_eq!(
            err.issues,
            vec![
                DefinitionIssue::DuplicateTransition {
                    state: StateId::initial(),
                    event: EventId::new("Start"),
                },
                DefinitionIssue::TransitionFromFinal(EventId::new("Start")),
            ]
        );
    }
}
