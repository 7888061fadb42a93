use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub bus_url: String,
    pub bus_type: BusType,
    pub host: String,
    pub port: u16,

    pub idempotency_scope: String,
    pub idempotency_stale_in_progress_after: Duration,

    pub outbox_batch_size: i64,
    pub outbox_publish_interval: Duration,
    pub outbox_send_timeout: Duration,
    pub outbox_max_attempts: i32,
    pub outbox_base_backoff: Duration,
    pub outbox_max_backoff: Duration,
    pub outbox_topic: String,

    pub response_cache_ttl: Duration,
    pub response_cache_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusType {
    Inmemory,
    Nats,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let bus_type = match env::var("BUS_TYPE").unwrap_or_else(|_| "inmemory".to_string()).as_str() {
            "nats" => BusType::Nats,
            _ => BusType::Inmemory,
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL")?,
            bus_url: env::var("BUS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            bus_type,

            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT").unwrap_or_else(|_| "8080".to_string()).parse()?,

            idempotency_scope: env::var("IDEMPOTENCY_SCOPE")
                .unwrap_or_else(|_| "payments:charge".to_string()),
            idempotency_stale_in_progress_after: Duration::from_secs(
                env::var("IDEMPOTENCY_STALE_IN_PROGRESS_AFTER_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()?,
            ),

            outbox_batch_size: env::var("OUTBOX_BATCH_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
            outbox_publish_interval: Duration::from_millis(
                env::var("OUTBOX_PUBLISH_INTERVAL_MS")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()?,
            ),
            outbox_send_timeout: Duration::from_secs(
                env::var("OUTBOX_SEND_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()?,
            ),
            outbox_max_attempts: env::var("OUTBOX_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            outbox_base_backoff: Duration::from_secs(
                env::var("OUTBOX_BASE_BACKOFF_SECS")
                    .unwrap_or_else(|_| "1".to_string())
                    .parse()?,
            ),
            outbox_max_backoff: Duration::from_secs(
                env::var("OUTBOX_MAX_BACKOFF_SECS")
                    .unwrap_or_else(|_| "120".to_string())
                    .parse()?,
            ),
            outbox_topic: env::var("OUTBOX_TOPIC").unwrap_or_else(|_| "payments-events".to_string()),

            response_cache_ttl: Duration::from_secs(
                env::var("RESPONSE_CACHE_TTL_SECS")
                    .unwrap_or_else(|_| "1800".to_string())
                    .parse()?,
            ),
            response_cache_enabled: env::var("RESPONSE_CACHE_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,
        })
    }
}
