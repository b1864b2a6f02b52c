//! # Event Publishing
//!
//! One-way sink for lifecycle and boundary events. The publisher builds
//! payloads internally (consumers never assemble them), stamps
//! `event_type`, `timestamp`, and `correlation_id`, and fans out to zero or
//! more adapters. Adapter failures are swallowed with a warn log so
//! observability can never break state progression.

pub mod adapter;
pub mod payloads;
pub mod publisher;

pub use adapter::{AdapterError, CapturingEventAdapter, EventAdapter, TracingEventAdapter};
pub use payloads::EventEnvelope;
pub use publisher::EventPublisher;
