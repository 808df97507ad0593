//! Outbox module
//!
//! Moves committed `outbox_events` rows onto the outbound stream. Delivery is
//! at-least-once; downstream consumers dedupe on the event id.

mod publisher;

pub use publisher::{CycleReport, OutboxPublisher, OutboxPublisherConfig};
