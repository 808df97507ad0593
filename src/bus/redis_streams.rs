//! Redis Streams adapter
//!
//! - **Outbound**: `XADD <outbound_stream> * key <key> payload <bytes>`
//! - **Inbound**: `XREADGROUP` on the payment stream through a consumer group.
//!   This consumer's own pending entries (`0`) are read before new ones (`>`),
//!   so anything delivered but never acknowledged is retried after a restart.
//! - **Dead letters**: `XADD <dead_letter_stream>` with the original id and
//!   the reason, after which the caller acknowledges the original.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamReadReply};
use tracing::{debug, info, warn};

use super::{BusError, Delivery, EventPublisher, MessageSource};

/// Connection and stream names
#[derive(Debug, Clone)]
pub struct RedisStreamsConfig {
    pub url: String,
    /// Stream the outbox publisher appends ledger events to
    pub outbound_stream: String,
    /// Stream the payment consumer reads from
    pub inbound_stream: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub dead_letter_stream: String,
}

/// Redis Streams publisher and message source
#[derive(Clone)]
pub struct RedisStreamsBus {
    conn: ConnectionManager,
    config: RedisStreamsConfig,
}

impl std::fmt::Debug for RedisStreamsBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamsBus")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisStreamsBus {
    /// Connect and make sure the inbound consumer group exists
    pub async fn connect(config: RedisStreamsConfig) -> Result<Self, BusError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| BusError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;

        let bus = Self { conn, config };
        bus.ensure_consumer_group().await?;

        info!(
            inbound = %bus.config.inbound_stream,
            outbound = %bus.config.outbound_stream,
            group = %bus.config.consumer_group,
            consumer = %bus.config.consumer_name,
            "Connected to Redis Streams"
        );

        Ok(bus)
    }

    /// `XGROUP CREATE ... MKSTREAM`; an existing group is fine
    async fn ensure_consumer_group(&self) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.inbound_stream)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_group(
        &self,
        start_id: &str,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<Delivery>, BusError> {
        let mut conn = self.conn.clone();

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg("COUNT")
            .arg(count);
        if let Some(block) = block {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("STREAMS")
            .arg(&self.config.inbound_stream)
            .arg(start_id);

        // A BLOCK that times out replies with nil
        let reply: Option<StreamReadReply> = cmd.query_async(&mut conn).await?;

        Ok(reply
            .map(|r| {
                r.keys
                    .into_iter()
                    .flat_map(|k| k.ids)
                    .map(delivery_from_entry)
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn delivery_from_entry(entry: StreamId) -> Delivery {
    let payload = entry.get::<Vec<u8>>("payload").unwrap_or_default();

    Delivery {
        message_id: entry.id,
        payload,
    }
}

#[async_trait]
impl EventPublisher for RedisStreamsBus {
    async fn publish(&self, key: &str, payload: &[u8]) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let id: String = redis::cmd("XADD")
            .arg(&self.config.outbound_stream)
            .arg("*")
            .arg("key")
            .arg(key)
            .arg("payload")
            .arg(payload)
            .query_async(&mut conn)
            .await?;

        debug!(stream = %self.config.outbound_stream, key = key, stream_id = %id, "Appended event");
        Ok(())
    }
}

#[async_trait]
impl MessageSource for RedisStreamsBus {
    async fn receive(&self, max: usize, wait: Duration) -> Result<Vec<Delivery>, BusError> {
        let pending = self.read_group("0", max, None).await?;
        if !pending.is_empty() {
            debug!(count = pending.len(), "Redelivering pending payment messages");
            return Ok(pending);
        }

        self.read_group(">", max, Some(wait)).await
    }

    async fn acknowledge(&self, message_id: &str) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let _: u64 = redis::cmd("XACK")
            .arg(&self.config.inbound_stream)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("XADD")
            .arg(&self.config.dead_letter_stream)
            .arg("*")
            .arg("original_message_id")
            .arg(&delivery.message_id)
            .arg("reason")
            .arg(reason)
            .arg("failed_at")
            .arg(chrono::Utc::now().to_rfc3339())
            .arg("payload")
            .arg(delivery.payload.as_slice())
            .query_async(&mut conn)
            .await?;

        warn!(
            message_id = %delivery.message_id,
            dead_letter_stream = %self.config.dead_letter_stream,
            reason = reason,
            "Message sent to dead-letter stream"
        );
        Ok(())
    }
}
