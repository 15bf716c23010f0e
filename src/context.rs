//! Saga identity types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable key identifying which saga instance an event belongs to
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    /// Create a correlation ID from a UUID
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a fresh random correlation ID
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a correlation ID from its hyphenated string form
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// Get the raw UUID
    pub fn get(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Debug for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CorrelationId({})", self.0)
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token issued by the scheduler for one armed timer
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub Uuid);

impl TokenId {
    /// Generate a new globally unique token
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the raw UUID
    pub fn get(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Debug for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TokenId({})", self.0)
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a state declared by a saga definition.
///
/// Two states exist in every definition: [`StateId::initial`], held only
/// by freshly created instances, and [`StateId::final_state`], entered by
/// a `Finalize` action.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(Box<str>);

impl StateId {
    /// Name of the implicit initial state
    pub const INITIAL: &'static str = "Initial";
    /// Name of the implicit final state
    pub const FINAL: &'static str = "Final";

    /// Create a state identifier
    pub fn new(name: impl Into<Box<str>>) -> Self {
        Self(name.into())
    }

    /// The implicit initial state
    pub fn initial() -> Self {
        Self::new(Self::INITIAL)
    }

    /// The implicit final state
    pub fn final_state() -> Self {
        Self::new(Self::FINAL)
    }

    /// Check whether this is one of the two implicit states
    pub fn is_implicit(&self) -> bool {
        self.as_str() == Self::INITIAL || self.as_str() == Self::FINAL
    }

    /// Get the state name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for StateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StateId({})", self.0)
    }
}

impl std::fmt::Display for StateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for StateId {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for StateId {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl From<&str> for StateId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Identifier of an event declared by a saga definition
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Box<str>);

impl EventId {
    const RECEIVED_SUFFIX: &'static str = ".Received";

    /// Create an event identifier
    pub fn new(name: impl Into<Box<str>>) -> Self {
        Self(name.into())
    }

    /// The event raised when the timer of schedule `schedule` fires
    pub fn received(schedule: &str) -> Self {
        Self(format!("{schedule}{}", Self::RECEIVED_SUFFIX).into_boxed_str())
    }

    /// Name of the schedule this event belongs to, if it is a received event
    pub fn schedule_name(&self) -> Option<&str> {
        self.0.strip_suffix(Self::RECEIVED_SUFFIX)
    }

    /// Get the event name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventId({})", self.0)
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_received_event_round_trips_schedule_name() {
        let event = EventId::received("Check");
        assert_eq!(event.as_str(), "Check.Received");
        assert_eq!(event.schedule_name(), Some("Check"));
        assert_eq!(EventId::new("Start").schedule_name(), None);
    }

    #[test]
    fn test_implicit_states() {
        assert!(StateId::initial().is_implicit());
        assert!(StateId::final_state().is_implicit());
        assert!(!StateId::new("Active").is_implicit());
        assert_eq!(StateId::new("Active"), "Active");
    }

    #[test]
    fn test_correlation_id_parse() {
        let id = CorrelationId::random();
        assert_eq!(CorrelationId::parse(&id.to_string()), Some(id));
        assert_eq!(CorrelationId::parse("not-a-uuid"), None);
    }
}
