use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use event_bus::EventBus;
use rand::Rng;
use sqlx::PgPool;

use crate::config::Config;
use crate::error::{DispatchError, StoreError};
use crate::metrics::Metrics;
use crate::models::OutboxStatus;
use crate::outbox_store;

/// Periodically claims and publishes outbox events. Safe to run more than
/// one instance against the same table: `outbox_store::claim_batch` uses
/// `FOR UPDATE SKIP LOCKED`, so two instances never claim the same row.
pub struct Dispatcher {
    pool: PgPool,
    bus: Arc<dyn EventBus>,
    config: Config,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    pub fn new(pool: PgPool, bus: Arc<dyn EventBus>, config: Config, metrics: Arc<Metrics>) -> Self {
        Self {
            pool,
            bus,
            config,
            metrics,
        }
    }

    /// Runs `publish_batch` on the configured interval until the process
    /// shuts down. Intended to be spawned as its own Tokio task.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.config.outbox_publish_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.publish_batch().await {
                tracing::error!(error = %err, "outbox publish batch failed");
            }
        }
    }

    /// Claims a batch, publishes each event sequentially within the claiming
    /// transaction, and persists the resulting status transitions.
    pub async fn publish_batch(&self) -> Result<(), DispatchError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;

        let now = Utc::now();
        let batch = outbox_store::claim_batch(&mut tx, now, self.config.outbox_batch_size).await?;

        if batch.is_empty() {
            tx.rollback().await.ok();
            return Ok(());
        }

        for event in &batch {
            let subject = format!("{}.{}", self.config.outbox_topic, event.event_key);

            let publish = tokio::time::timeout(
                self.config.outbox_send_timeout,
                self.bus.publish(&subject, event.payload.clone()),
            );

            match publish.await {
                Ok(Ok(())) => {
                    outbox_store::mark_sent(&mut tx, event.id, Utc::now()).await?;
                    self.metrics.outbox_outcomes_total.with_label_values(&["sent"]).inc();
                    tracing::info!(event_id = %event.id, subject, "outbox event published");
                }
                Ok(Err(bus_err)) => {
                    self.record_failure(&mut tx, event, &bus_err.to_string()).await?;
                }
                Err(_) => {
                    self.record_failure(&mut tx, event, "publish timed out").await?;
                }
            }
        }

        tx.commit().await.map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    async fn record_failure(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        event: &crate::models::OutboxEvent,
        error: &str,
    ) -> Result<(), StoreError> {
        let attempt_count = event.attempt_count + 1;
        let truncated: String = error.chars().take(2000).collect();

        if attempt_count >= self.config.outbox_max_attempts {
            tracing::error!(event_id = %event.id, attempt_count, "outbox event dead-lettered");
            outbox_store::mark_failed(tx, event.id, attempt_count, None, OutboxStatus::Dead, &truncated)
                .await?;
            self.metrics.outbox_outcomes_total.with_label_values(&["dead"]).inc();
        } else {
            let delay = backoff(
                attempt_count,
                self.config.outbox_base_backoff,
                self.config.outbox_max_backoff,
            );
            let next_attempt_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
            tracing::warn!(event_id = %event.id, attempt_count, "outbox event publish failed, retrying");
            outbox_store::mark_failed(
                tx,
                event.id,
                attempt_count,
                Some(next_attempt_at),
                OutboxStatus::Retry,
                &truncated,
            )
            .await?;
            self.metrics.outbox_outcomes_total.with_label_values(&["retry"]).inc();
        }
        Ok(())
    }
}

/// `base * 2^(attempt-1) * jitter`, clamped to `[base, max]`, with `jitter`
/// drawn uniformly from `[0.5, 1.5]`. Pure and deterministic apart from the
/// jitter source, so the clamp bounds are always respected regardless of it.
pub fn backoff(attempt: i32, base: StdDuration, max: StdDuration) -> StdDuration {
    let exponent = (attempt - 1).max(0) as u32;
    let multiplier = 2f64.powi(exponent as i32);
    let jitter = rand::thread_rng().gen_range(0.5..=1.5);
    let scaled = base.as_secs_f64() * multiplier * jitter;
    let clamped = scaled.clamp(base.as_secs_f64(), max.as_secs_f64());
    StdDuration::from_secs_f64(clamped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_never_exceeds_max() {
        let base = StdDuration::from_secs(1);
        let max = StdDuration::from_secs(120);
        for attempt in 1..20 {
            let delay = backoff(attempt, base, max);
            assert!(delay <= max);
            assert!(delay >= base);
        }
    }

    #[test]
    fn backoff_grows_with_attempt_before_clamping() {
        let base = StdDuration::from_secs(1);
        let max = StdDuration::from_secs(3600);
        // With jitter in [0.5, 1.5], attempt 5's lower bound (0.5x) still
        // exceeds attempt 1's upper bound (1.5x) once the exponent dominates.
        let low_attempt_upper_bound = base.as_secs_f64() * 2f64.powi(0) * 1.5;
        let high_attempt_lower_bound = base.as_secs_f64() * 2f64.powi(4) * 0.5;
        assert!(high_attempt_lower_bound > low_attempt_upper_bound);
    }

    #[test]
    fn backoff_respects_base_floor_on_first_attempt() {
        let base = StdDuration::from_secs(1);
        let max = StdDuration::from_secs(120);
        let delay = backoff(1, base, max);
        assert!(delay >= base);
    }
}
