//! Error types for definition building and transition execution

use crate::{CorrelationId, EventId, StateId, TokenId};

/// Error raised by a programmer-supplied `Assign` mutator
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct ActionError {
    /// Error description
    pub reason: Box<str>,
}

impl ActionError {
    /// Create an action error
    pub fn new(reason: impl Into<Box<str>>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Instance store failure (other than a lost version race)
#[derive(Clone, Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(Box<str>),
    #[error("Serialization error: {0}")]
    Serialization(Box<str>),
}

/// Scheduler failure
#[derive(Clone, Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Failed to schedule message: {0}")]
    Schedule(Box<str>),
    #[error("Failed to cancel token {token}: {reason}")]
    Cancel { token: TokenId, reason: Box<str> },
    #[error("Scheduler unavailable")]
    Unavailable,
}

/// Outbound bus failure
#[derive(Clone, Debug, thiserror::Error)]
pub enum BusError {
    #[error("Publish failed: {0}")]
    Publish(Box<str>),
    #[error("Send to {destination} failed: {reason}")]
    Send {
        destination: Box<str>,
        reason: Box<str>,
    },
}

/// Failure of a transition, surfaced as `Outcome::Failed`.
///
/// The instance is never persisted when one of these is returned, and any
/// timers armed during the failed attempt have been cancelled.
#[derive(Clone, Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Scheduling failure: {0}")]
    SchedulingFailure(#[from] SchedulerError),
    #[error("Concurrency conflict on {correlation_id} after {attempts} attempts")]
    ConcurrencyConflict {
        correlation_id: CorrelationId,
        attempts: u32,
    },
    #[error("Action failed: {0}")]
    Action(#[from] ActionError),
    #[error("Store failure: {0}")]
    Store(#[from] StoreError),
    #[error("Instance {correlation_id} is in undeclared state {state}")]
    UnknownState {
        correlation_id: CorrelationId,
        state: StateId,
    },
    #[error("Undeclared schedule: {0}")]
    UnknownSchedule(Box<str>),
}

impl EngineError {
    /// Check if the transport should redeliver the event
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::SchedulingFailure(_) | Self::ConcurrencyConflict { .. } | Self::Store(_)
        )
    }
}

/// One inconsistency found while building a definition
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DefinitionIssue {
    /// State declared more than once, or a reserved name redeclared
    DuplicateState(StateId),
    /// Event declared more than once (including a schedule's received event)
    DuplicateEvent(EventId),
    /// Schedule declared more than once
    DuplicateSchedule(Box<str>),
    /// A rule or action references a state that was never declared
    UndeclaredState { state: StateId, referenced_by: Box<str> },
    /// A rule references an event that was never declared
    UndeclaredEvent { event: EventId, referenced_by: Box<str> },
    /// An action references a schedule that was never declared
    UndeclaredSchedule { schedule: Box<str>, referenced_by: Box<str> },
    /// A schedule has no correlation extractor for its received event
    MissingReceivedCorrelation(Box<str>),
    /// Two rules for the same (state, event) pair
    DuplicateTransition { state: StateId, event: EventId },
    /// A rule declares more than one target state
    ConflictingTargets { state: StateId, event: EventId },
    /// Entry actions may not change state
    EntryActionChangesState(StateId),
    /// Rules cannot start from the final state
    TransitionFromFinal(EventId),
}

impl std::fmt::Display for DefinitionIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateState(state) => write!(f, "state {state} declared more than once"),
            Self::DuplicateEvent(event) => write!(f, "event {event} declared more than once"),
            Self::DuplicateSchedule(name) => write!(f, "schedule {name} declared more than once"),
            Self::UndeclaredState {
                state,
                referenced_by,
            } => write!(f, "undeclared state {state} referenced by {referenced_by}"),
            Self::UndeclaredEvent {
                event,
                referenced_by,
            } => write!(f, "undeclared event {event} referenced by {referenced_by}"),
            Self::UndeclaredSchedule {
                schedule,
                referenced_by,
            } => write!(f, "undeclared schedule {schedule} referenced by {referenced_by}"),
            Self::MissingReceivedCorrelation(name) => {
                write!(f, "schedule {name} has no correlation for its received event")
            }
            Self::DuplicateTransition { state, event } => {
                write!(f, "more than one rule for ({state}, {event})")
            }
            Self::ConflictingTargets { state, event } => {
                write!(f, "rule for ({state}, {event}) declares more than one target state")
            }
            Self::EntryActionChangesState(state) => {
                write!(f, "entry actions of {state} change state")
            }
            Self::TransitionFromFinal(event) => {
                write!(f, "rule for {event} starts from the final state")
            }
        }
    }
}

/// Definition inconsistencies, reported exhaustively
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid saga definition {saga}: {}", render_issues(.issues))]
pub struct BuildError {
    /// Definition name
    pub saga: Box<str>,
    /// Every inconsistency found
    pub issues: Vec<DefinitionIssue>,
}

fn render_issues(issues: &[DefinitionIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Registry setup error
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Saga {0} already registered")]
    DuplicateSaga(Box<str>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_error_lists_every_issue() {
        let err = BuildError {
            saga: "orders".into(),
            issues: vec![
                DefinitionIssue::DuplicateState(StateId::new("Active")),
                DefinitionIssue::MissingReceivedCorrelation("Check".into()),
            ],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("state Active declared more than once"));
        assert!(rendered.contains("schedule Check has no correlation"));
    }

    #[test]
    fn test_retriable_failures() {
        assert!(EngineError::SchedulingFailure(SchedulerError::Unavailable).is_retriable());
        assert!(!EngineError::Action(ActionError::new("bad input")).is_retriable());
    }
}
