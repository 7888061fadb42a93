use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{OutboxEvent, OutboxStatus};

/// Inserts a new outbox row inside the caller's business transaction.
pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    aggregate_type: &str,
    aggregate_id: &str,
    event_type: &str,
    event_key: &str,
    payload: &[u8],
) -> Result<OutboxEvent, StoreError> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query_as::<_, OutboxEvent>(
        r#"
        INSERT INTO outbox_events
            (id, aggregate_type, aggregate_id, event_type, event_key, payload,
             status, attempt_count, next_attempt_at, last_error,
             created_at, updated_at, sent_at)
        VALUES ($1, $2, $3, $4, $5, $6, 'new', 0, NULL, NULL, $7, $7, NULL)
        RETURNING id, aggregate_type, aggregate_id, event_type, event_key, payload,
                  status, attempt_count, next_attempt_at, last_error,
                  created_at, updated_at, sent_at
        "#,
    )
    .bind(id)
    .bind(aggregate_type)
    .bind(aggregate_id)
    .bind(event_type)
    .bind(event_key)
    .bind(payload)
    .bind(now)
    .fetch_one(&mut **tx)
    .await
    .map_err(StoreError::from_sqlx)
}

/// Claims up to `limit` deliverable events (`status` in `New`/`Retry`, due
/// now), skipping rows another dispatcher already has locked, and holds a
/// row lock on the returned rows for the lifetime of `tx`. This is the
/// primitive that lets multiple dispatcher instances drain the same table
/// without double-delivering the same row.
pub async fn claim_batch(
    tx: &mut Transaction<'_, Postgres>,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<OutboxEvent>, StoreError> {
    sqlx::query_as::<_, OutboxEvent>(
        r#"
        WITH to_claim AS (
            SELECT id
            FROM outbox_events
            WHERE status IN ('new', 'retry')
              AND (next_attempt_at IS NULL OR next_attempt_at <= $1)
            ORDER BY created_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
        )
        SELECT e.id, e.aggregate_type, e.aggregate_id, e.event_type, e.event_key, e.payload,
               e.status, e.attempt_count, e.next_attempt_at, e.last_error,
               e.created_at, e.updated_at, e.sent_at
        FROM outbox_events e
        JOIN to_claim ON to_claim.id = e.id
        ORDER BY e.created_at ASC
        "#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(&mut **tx)
    .await
    .map_err(StoreError::from_sqlx)
}

/// Marks `event_id` as successfully delivered.
pub async fn mark_sent(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    sent_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE outbox_events
        SET status = 'sent', sent_at = $2, next_attempt_at = NULL,
            last_error = NULL, updated_at = $2
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(sent_at)
    .execute(&mut **tx)
    .await
    .map_err(StoreError::from_sqlx)?;
    Ok(())
}

/// Records a failed publish attempt, scheduling a retry or dead-lettering
/// the event once `attempt_count` reaches `max_attempts`.
pub async fn mark_failed(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    attempt_count: i32,
    next_attempt_at: Option<DateTime<Utc>>,
    status: OutboxStatus,
    error: &str,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE outbox_events
        SET status = $2, attempt_count = $3, next_attempt_at = $4,
            last_error = $5, updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(status)
    .bind(attempt_count)
    .bind(next_attempt_at)
    .bind(error)
    .execute(&mut **tx)
    .await
    .map_err(StoreError::from_sqlx)?;
    Ok(())
}
