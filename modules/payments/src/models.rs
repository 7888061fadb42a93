use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// The business fact of a charge. Created exactly once per accepted payment;
/// never updated or deleted by this core.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub idempotency_key: String,
    pub customer_id: String,
    pub amount: i64,
    pub currency: String,
    pub payment_method_token: String,
    pub description: Option<String>,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum PaymentStatus {
    Authorized,
    Captured,
    Failed,
}

/// The idempotency coordinator's state for one `(scope, key)` pair.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IdempotencyRecord {
    pub id: Uuid,
    pub scope: String,
    pub idempotency_key: String,
    pub request_hash: String,
    pub status: IdempotencyStatus,
    pub http_status: Option<i32>,
    pub response_body: Option<JsonValue>,
    pub payment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum IdempotencyStatus {
    InProgress,
    Completed,
}

impl IdempotencyRecord {
    /// True iff this record is still `InProgress` and hasn't been touched
    /// within `max_age` — i.e. it is safe for a later caller holding the
    /// advisory lock to treat the original requester as crashed.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        if self.status != IdempotencyStatus::InProgress {
            return false;
        }
        let last_touched = self.updated_at.max(self.created_at);
        now - last_touched > max_age
    }
}

/// One pending (or terminal) delivery to the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub event_key: String,
    pub payload: Vec<u8>,
    pub status: OutboxStatus,
    pub attempt_count: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum OutboxStatus {
    New,
    Retry,
    Sent,
    Dead,
}

// ============================================================================
// HTTP request / response bodies
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeRequest {
    pub customer_id: String,
    pub amount: i64,
    pub currency: String,
    pub payment_method_token: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub amount: i64,
    pub currency: String,
    pub customer_id: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Payment> for PaymentResponse {
    fn from(p: Payment) -> Self {
        Self {
            payment_id: p.id,
            status: p.status,
            amount: p.amount,
            currency: p.currency,
            customer_id: p.customer_id,
            description: p.description,
            created_at: p.created_at,
        }
    }
}

/// `payments.payment.charged` event payload, published through the outbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentChargedPayload {
    pub payment_id: Uuid,
    pub idempotency_key: String,
    pub customer_id: String,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}
