//! Inbound events and outbound messages

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CorrelationId, EventId, TokenId};

/// Event delivered to the engine by the hosting layer
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    /// Which declared event this is
    pub name: EventId,
    /// Message body
    pub payload: Value,
    /// Scheduler token, present on scheduled deliveries
    pub token: Option<TokenId>,
    /// Correlation supplied by the transport, used when the payload has no key
    pub correlation_hint: Option<CorrelationId>,
}

impl Event {
    /// Create an event with a payload
    pub fn new(name: impl Into<EventId>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
            token: None,
            correlation_hint: None,
        }
    }

    /// Attach a transport-level correlation hint
    pub fn with_correlation_hint(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_hint = Some(correlation_id);
        self
    }

    /// Attach a scheduler token
    pub fn with_token(mut self, token: TokenId) -> Self {
        self.token = Some(token);
        self
    }

    /// Read a string field from the payload
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }
}

/// Message handed to the bus by `Publish` and `Send` actions
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Message type name (e.g. "MessageRescheduled")
    pub message_type: Box<str>,
    /// Saga that produced the message
    pub correlation_id: Option<CorrelationId>,
    /// Message body
    pub payload: Value,
}

impl OutboundMessage {
    /// Create a message of the given type
    pub fn new(message_type: impl Into<Box<str>>, payload: Value) -> Self {
        Self {
            message_type: message_type.into(),
            correlation_id: None,
            payload,
        }
    }

    /// Tag the message with the producing saga
    pub fn correlated(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// Message handed to the scheduler for delayed delivery
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduledMessage {
    /// Event raised on delivery (`<schedule>.Received`)
    pub event: EventId,
    /// Saga that armed the timer
    pub correlation_id: CorrelationId,
    /// Body built by the schedule's payload builder
    pub payload: Value,
}

impl ScheduledMessage {
    /// Turn the message into the event the engine receives when the timer fires
    pub fn into_event(self, token: TokenId) -> Event {
        Event {
            name: self.event,
            payload: self.payload,
            token: Some(token),
            correlation_hint: Some(self.correlation_id),
        }
    }
}
