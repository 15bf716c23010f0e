//! Correlation extraction

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CorrelationId, Event};

/// Rule for reading a correlation ID out of an event payload
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Correlate {
    /// Payload field holding a UUID string. A leading `/` selects a JSON pointer.
    Field(Box<str>),
    /// Custom extractor
    #[serde(skip)]
    With(fn(&Value) -> Option<CorrelationId>),
}

impl Correlate {
    /// Correlate by a top-level field or JSON pointer
    pub fn by_field(field: impl Into<Box<str>>) -> Self {
        Self::Field(field.into())
    }

    /// Apply the extractor to a payload
    pub fn extract(&self, payload: &Value) -> Option<CorrelationId> {
        match self {
            Self::Field(field) => {
                let value = if field.starts_with('/') {
                    payload.pointer(field)
                } else {
                    payload.get(&**field)
                };
                value.and_then(Value::as_str).and_then(CorrelationId::parse)
            }
            Self::With(extract) => extract(payload),
        }
    }
}

/// Resolve an event's correlation ID.
///
/// The extractor wins; the transport hint is the fallback.
pub fn resolve(correlate: &Correlate, event: &Event) -> Option<CorrelationId> {
    correlate
        .extract(&event.payload)
        .or(event.correlation_hint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_and_pointer() {
        let id = CorrelationId::random();
        let flat = json!({ "correlation_id": id.to_string() });
        let nested = json!({ "order": { "id": id.to_string() } });

        assert_eq!(Correlate::by_field("correlation_id").extract(&flat), Some(id));
        assert_eq!(Correlate::by_field("/order/id").extract(&nested), Some(id));
        assert_eq!(Correlate::by_field("missing").extract(&flat), None);
    }

    #[test]
    fn test_hint_is_fallback() {
        let hinted = CorrelationId::random();
        let event = Event::new("Stop", json!({})).with_correlation_hint(hinted);
        assert_eq!(resolve(&Correlate::by_field("correlation_id"), &event), Some(hinted));

        let id = CorrelationId::random();
        let event = Event::new("Stop", json!({ "correlation_id": id.to_string() }))
            .with_correlation_hint(hinted);
        assert_eq!(resolve(&Correlate::by_field("correlation_id"), &event), Some(id));
    }

    #[test]
    fn test_custom_extractor() {
        fn from_number(payload: &Value) -> Option<CorrelationId> {
            payload
                .get("n")
                .and_then(Value::as_u64)
                .map(|n| CorrelationId::new(uuid::Uuid::from_u128(n as u128)))
        }

        let correlate = Correlate::With(from_number);
        assert_eq!(
            correlate.extract(&json!({ "n": 7 })),
            Some(CorrelationId::new(uuid::Uuid::from_u128(7)))
        );
    }
}
