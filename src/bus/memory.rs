//! In-memory bus for tests/dev.
//!
//! - Outbound messages are collected in order and can be inspected
//! - Inbound messages stay in flight until acknowledged; unacknowledged ones
//!   are handed out again on the next `receive`
//! - Publishing can be switched off to simulate an unreachable broker

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{BusError, Delivery, EventPublisher, MessageSource};

#[derive(Debug, Default)]
struct BusState {
    published: Vec<(String, Vec<u8>)>,
    queued: VecDeque<Delivery>,
    in_flight: Vec<Delivery>,
    dead_letters: Vec<(Delivery, String)>,
}

/// In-memory publisher and message source
#[derive(Debug, Default)]
pub struct InMemoryBus {
    state: Mutex<BusState>,
    publish_unavailable: AtomicBool,
    next_id: AtomicU64,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, BusState>, BusError> {
        self.state
            .lock()
            .map_err(|_| BusError::Unavailable("in-memory bus lock poisoned".into()))
    }

    /// Make every publish fail until switched back
    pub fn set_publish_unavailable(&self, unavailable: bool) {
        self.publish_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Enqueue an inbound message; returns its message id
    pub fn push(&self, payload: impl Into<Vec<u8>>) -> String {
        let message_id = format!("{}-0", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        if let Ok(mut state) = self.state.lock() {
            state.queued.push_back(Delivery {
                message_id: message_id.clone(),
                payload: payload.into(),
            });
        }
        message_id
    }

    /// Everything published so far as `(key, payload)`
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.state
            .lock()
            .map(|s| s.published.clone())
            .unwrap_or_default()
    }

    /// Messages parked by `dead_letter`, with their reasons
    pub fn dead_letters(&self) -> Vec<(Delivery, String)> {
        self.state
            .lock()
            .map(|s| s.dead_letters.clone())
            .unwrap_or_default()
    }

    /// Messages delivered but not yet acknowledged
    pub fn unacknowledged(&self) -> usize {
        self.state.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    /// Messages not yet delivered
    pub fn queued(&self) -> usize {
        self.state.lock().map(|s| s.queued.len()).unwrap_or(0)
    }
}

#[async_trait]
impl EventPublisher for InMemoryBus {
    async fn publish(&self, key: &str, payload: &[u8]) -> Result<(), BusError> {
        if self.publish_unavailable.load(Ordering::SeqCst) {
            return Err(BusError::Unavailable("broker unreachable".into()));
        }
        self.state()?
            .published
            .push((key.to_string(), payload.to_vec()));
        Ok(())
    }
}

#[async_trait]
impl MessageSource for InMemoryBus {
    async fn receive(&self, max: usize, wait: Duration) -> Result<Vec<Delivery>, BusError> {
        {
            let mut state = self.state()?;

            if !state.in_flight.is_empty() {
                return Ok(state.in_flight.iter().take(max).cloned().collect());
            }

            if !state.queued.is_empty() {
                let take = max.min(state.queued.len());
                let batch: Vec<Delivery> = state.queued.drain(..take).collect();
                state.in_flight.extend(batch.iter().cloned());
                return Ok(batch);
            }
        }

        // Nothing ready: behave like a blocking read that timed out.
        tokio::time::sleep(wait.min(Duration::from_millis(10))).await;
        Ok(Vec::new())
    }

    async fn acknowledge(&self, message_id: &str) -> Result<(), BusError> {
        self.state()?
            .in_flight
            .retain(|d| d.message_id != message_id);
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), BusError> {
        self.state()?
            .dead_letters
            .push((delivery.clone(), reason.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unacknowledged_messages_are_redelivered() {
        let bus = InMemoryBus::new();
        let id = bus.push(b"one".to_vec());

        let first = bus.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].message_id, id);

        let again = bus.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(again, first);

        bus.acknowledge(&id).await.unwrap();
        assert!(bus.receive(10, Duration::ZERO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_receive_respects_max() {
        let bus = InMemoryBus::new();
        for i in 0..5 {
            bus.push(format!("m{}", i).into_bytes());
        }

        let batch = bus.receive(2, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(bus.queued(), 3);
    }

    #[tokio::test]
    async fn test_publish_can_be_made_unavailable() {
        let bus = InMemoryBus::new();
        bus.set_publish_unavailable(true);
        assert!(bus.publish("k", b"v").await.is_err());

        bus.set_publish_unavailable(false);
        bus.publish("k", b"v").await.unwrap();
        assert_eq!(bus.published(), vec![("k".to_string(), b"v".to_vec())]);
    }
}
