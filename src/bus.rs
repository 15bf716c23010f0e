//! Outbound message delivery

use async_trait::async_trait;

use crate::{BusError, OutboundMessage};

/// Fire-and-forget outbound delivery
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Publish to all subscribers of the message type
    async fn publish(&self, message: OutboundMessage) -> Result<(), BusError>;

    /// Send to one destination
    async fn send(&self, destination: &str, message: OutboundMessage) -> Result<(), BusError>;
}

/// A message recorded by [`InMemoryBus`]
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    /// `None` for published messages
    pub destination: Option<Box<str>>,
    /// The message
    pub message: OutboundMessage,
}

/// In-memory bus that records every delivery
pub struct InMemoryBus {
    deliveries: std::sync::RwLock<Vec<Delivery>>,
}

impl InMemoryBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            deliveries: std::sync::RwLock::new(Vec::new()),
        }
    }

    /// Everything delivered so far
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries
            .read()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    /// Published messages of one type
    pub fn published(&self, message_type: &str) -> Vec<OutboundMessage> {
        self.deliveries()
            .into_iter()
            .filter(|d| d.destination.is_none() && &*d.message.message_type == message_type)
            .map(|d| d.message)
            .collect()
    }

    fn record(&self, destination: Option<Box<str>>, message: OutboundMessage) -> Result<(), BusError> {
        let mut deliveries = self
            .deliveries
            .write()
            .map_err(|e| BusError::Publish(e.to_string().into()))?;
        deliveries.push(Delivery {
            destination,
            message,
        });
        Ok(())
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, message: OutboundMessage) -> Result<(), BusError> {
        self.record(None, message)
    }

    async fn send(&self, destination: &str, message: OutboundMessage) -> Result<(), BusError> {
        self.record(Some(destination.into()), message)
    }
}
