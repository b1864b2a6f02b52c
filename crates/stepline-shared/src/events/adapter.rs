//! Event sink adapters.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::info;

use super::payloads::EventEnvelope;

#[derive(Debug, Error)]
#[error("event adapter {adapter} failed: {reason}")]
pub struct AdapterError {
    pub adapter: String,
    pub reason: String,
}

/// Object-safe sink interface. Implementations must not assume delivery
/// order across sibling steps and must tolerate duplicate delivery.
#[async_trait]
pub trait EventAdapter: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    async fn record(&self, event: &EventEnvelope) -> Result<(), AdapterError>;
}

/// Adapter that forwards events to the structured log stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventAdapter;

#[async_trait]
impl EventAdapter for TracingEventAdapter {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn record(&self, event: &EventEnvelope) -> Result<(), AdapterError> {
        info!(
            event_type = %event.event_type,
            correlation_id = %event.correlation_id,
            payload = %event.payload,
            "domain event"
        );
        Ok(())
    }
}

/// Adapter that retains every envelope in memory. Test suites assert
/// against its captured stream.
#[derive(Debug, Clone, Default)]
pub struct CapturingEventAdapter {
    events: Arc<Mutex<Vec<EventEnvelope>>>,
}

impl CapturingEventAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn captured(&self) -> Vec<EventEnvelope> {
        self.events.lock().expect("event capture poisoned").clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.captured().into_iter().map(|e| e.event_type).collect()
    }

    pub fn count_of(&self, event_type: &str) -> usize {
        self.captured()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

#[async_trait]
impl EventAdapter for CapturingEventAdapter {
    fn name(&self) -> &'static str {
        "capturing"
    }

    async fn record(&self, event: &EventEnvelope) -> Result<(), AdapterError> {
        self.events
            .lock()
            .map_err(|_| AdapterError {
                adapter: "capturing".to_string(),
                reason: "capture buffer poisoned".to_string(),
            })?
            .push(event.clone());
        Ok(())
    }
}
