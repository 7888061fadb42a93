use std::time::Duration;
use uuid::Uuid;

use crate::models::ChargeRequest;

/// Outcome of a processor authorization call.
#[derive(Debug, Clone)]
pub struct ProcessorResult {
    pub processor_payment_id: String,
}

/// Stand-in for the external payment processor. Always succeeds after a
/// short simulated round trip; a real integration would call out over HTTP
/// and must be idempotent on the idempotency key itself.
pub struct StubProcessor;

impl StubProcessor {
    pub fn new() -> Self {
        Self
    }

    pub async fn authorize(&self, _request: &ChargeRequest) -> ProcessorResult {
        tokio::time::sleep(Duration::from_millis(100)).await;
        ProcessorResult {
            processor_payment_id: format!("proc_{}", Uuid::new_v4()),
        }
    }
}

impl Default for StubProcessor {
    fn default() -> Self {
        Self::new()
    }
}
