//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use uuid::Uuid;

use crate::bus::RedisStreamsConfig;
use crate::consumer::PaymentConsumerConfig;
use crate::domain::SYSTEM_CLEARING_ACCOUNT_ID;
use crate::outbox::OutboxPublisherConfig;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Redis connection URL for the event streams
    pub redis_url: String,

    /// Inbound payment stream
    pub payment_stream: String,
    pub payment_consumer_group: String,
    pub consumer_name: String,
    pub payment_dead_letter_stream: String,

    /// Outbound stream for ledger events
    pub ledger_event_stream: String,

    pub outbox_poll_interval: Duration,
    pub outbox_batch_size: i64,
    pub outbox_claim_lease: Duration,
    pub publisher_instance_id: String,

    /// Account debited for inbound payments
    pub clearing_account_id: Uuid,

    /// Consecutive consumer failures before an alert is logged
    pub consumer_alert_after_failures: u32,
}

fn var_or(name: &'static str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    var_or(name, default)
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name))
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_or("DATABASE_MAX_CONNECTIONS", "10")?;
        let host = var_or("HOST", "127.0.0.1");
        let port = parse_or("PORT", "3000")?;
        let environment = var_or("ENVIRONMENT", "development");

        let redis_url = var_or("REDIS_URL", "redis://127.0.0.1:6379");
        let payment_stream = var_or("PAYMENT_STREAM", "payments");
        let payment_consumer_group = var_or("PAYMENT_CONSUMER_GROUP", "ledger-group");
        let consumer_name = env::var("CONSUMER_NAME")
            .unwrap_or_else(|_| format!("ledger-{}", Uuid::new_v4()));
        let payment_dead_letter_stream = env::var("PAYMENT_DEAD_LETTER_STREAM")
            .unwrap_or_else(|_| format!("{}:dlq", payment_stream));
        let ledger_event_stream = var_or("LEDGER_EVENT_STREAM", "ledger-events");

        let outbox_poll_interval =
            Duration::from_millis(parse_or("OUTBOX_POLL_INTERVAL_MS", "2000")?);
        let outbox_batch_size: i64 = parse_or("OUTBOX_BATCH_SIZE", "100")?;
        if outbox_batch_size <= 0 {
            return Err(ConfigError::InvalidValue("OUTBOX_BATCH_SIZE"));
        }
        let outbox_claim_lease = Duration::from_secs(parse_or("OUTBOX_CLAIM_LEASE_SECS", "30")?);
        let publisher_instance_id = env::var("PUBLISHER_INSTANCE_ID")
            .unwrap_or_else(|_| format!("publisher-{}", Uuid::new_v4()));

        let clearing_account_id = parse_or("CLEARING_ACCOUNT_ID", SYSTEM_CLEARING_ACCOUNT_ID)?;
        let consumer_alert_after_failures = parse_or("CONSUMER_ALERT_AFTER_FAILURES", "5")?;

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            redis_url,
            payment_stream,
            payment_consumer_group,
            consumer_name,
            payment_dead_letter_stream,
            ledger_event_stream,
            outbox_poll_interval,
            outbox_batch_size,
            outbox_claim_lease,
            publisher_instance_id,
            clearing_account_id,
            consumer_alert_after_failures,
        })
    }

    pub fn redis_streams(&self) -> RedisStreamsConfig {
        RedisStreamsConfig {
            url: self.redis_url.clone(),
            outbound_stream: self.ledger_event_stream.clone(),
            inbound_stream: self.payment_stream.clone(),
            consumer_group: self.payment_consumer_group.clone(),
            consumer_name: self.consumer_name.clone(),
            dead_letter_stream: self.payment_dead_letter_stream.clone(),
        }
    }

    pub fn outbox_publisher(&self) -> OutboxPublisherConfig {
        OutboxPublisherConfig {
            poll_interval: self.outbox_poll_interval,
            batch_size: self.outbox_batch_size,
            lease: self.outbox_claim_lease,
            instance_id: self.publisher_instance_id.clone(),
        }
    }

    pub fn payment_consumer(&self) -> PaymentConsumerConfig {
        PaymentConsumerConfig {
            alert_after_failures: self.consumer_alert_after_failures,
            clearing_account_id: self.clearing_account_id,
            ..PaymentConsumerConfig::default()
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
