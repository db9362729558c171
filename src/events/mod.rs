//! Domain event emission.
//!
//! Every state-changing operation publishes exactly one [`DomainEvent`]
//! after its backing write has durably committed. Delivery is best-effort
//! at-least-once: a publish failure is logged and swallowed, never rolled
//! back, because undoing a durable write for a downstream delivery failure
//! would violate at-least-once semantics. Consumers are assumed idempotent.
//!
//! The transport behind a sink is out of scope here; the default sink
//! serializes events onto the structured log stream under the
//! `custody_kernel::events` target, where a log-based forwarder can pick
//! them up.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::types::DomainEvent;

/// Error raised by a sink that could not publish.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EventError {
    /// The event bus is unreachable.
    #[error("event bus unavailable: {0}")]
    Unavailable(String),
}

/// Destination for domain events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish one event. Implementations may block on the transport.
    async fn publish(&self, event: &DomainEvent) -> Result<(), EventError>;
}

/// Publish an event, logging and swallowing any failure.
///
/// This is the only publication path the services use, so a broken bus can
/// never fail a caller whose write already committed.
pub async fn emit(sink: &dyn EventSink, event: DomainEvent) {
    if let Err(e) = sink.publish(&event).await {
        tracing::warn!(
            target: "custody_kernel::events",
            event_type = event.kind(),
            error = %e,
            "event publish failed, dropping"
        );
    }
}

/// Sink that serializes events onto the structured log stream.
#[derive(Debug, Clone, Default)]
pub struct TracingEventSink;

impl TracingEventSink {
    /// Create a new tracing sink.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventSink for TracingEventSink {
    async fn publish(&self, event: &DomainEvent) -> Result<(), EventError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| EventError::Unavailable(e.to_string()))?;
        tracing::info!(
            target: "custody_kernel::events",
            event_type = event.kind(),
            payload = %payload,
            "domain_event"
        );
        Ok(())
    }
}

/// Sink that captures events in memory for tests.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl MemoryEventSink {
    /// Create a new empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far.
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().clone()
    }

    /// Drain captured events.
    pub fn take(&self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events.lock())
    }

    /// Number of captured events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether nothing has been published.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn publish(&self, event: &DomainEvent) -> Result<(), EventError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
