use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::IdempotencyRecord;

/// Loads the idempotency row for `(scope, key)`, if any, taking a row-level
/// write lock on it for the lifetime of `tx`. A miss takes no lock, since
/// there is no row to lock — callers rely on the advisory lock for that
/// window instead.
pub async fn find_for_update(
    tx: &mut Transaction<'_, Postgres>,
    scope: &str,
    key: &str,
) -> Result<Option<IdempotencyRecord>, StoreError> {
    sqlx::query_as::<_, IdempotencyRecord>(
        r#"
        SELECT id, scope, idempotency_key, request_hash, status, http_status,
               response_body, payment_id, created_at, updated_at
        FROM idempotency_records
        WHERE scope = $1 AND idempotency_key = $2
        FOR UPDATE
        "#,
    )
    .bind(scope)
    .bind(key)
    .fetch_optional(&mut **tx)
    .await
    .map_err(StoreError::from_sqlx)
}

/// Inserts a new `InProgress` record. Fails with `StoreError::UniqueViolation`
/// if `(scope, key)` already exists — the caller should treat that as a
/// concurrent winner and re-read via `find_for_update`.
pub async fn insert_in_progress(
    tx: &mut Transaction<'_, Postgres>,
    scope: &str,
    key: &str,
    request_hash: &str,
) -> Result<IdempotencyRecord, StoreError> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query_as::<_, IdempotencyRecord>(
        r#"
        INSERT INTO idempotency_records
            (id, scope, idempotency_key, request_hash, status, http_status,
             response_body, payment_id, created_at, updated_at)
        VALUES ($1, $2, $3, $4, 'in_progress', NULL, NULL, NULL, $5, $5)
        RETURNING id, scope, idempotency_key, request_hash, status, http_status,
                  response_body, payment_id, created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(scope)
    .bind(key)
    .bind(request_hash)
    .bind(now)
    .fetch_one(&mut **tx)
    .await
    .map_err(StoreError::from_sqlx)
}

/// Transitions a record from `InProgress` to `Completed`, attaching the
/// response to replay and the payment it resulted in.
pub async fn mark_completed(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    http_status: i32,
    response_body: &JsonValue,
    payment_id: Uuid,
) -> Result<IdempotencyRecord, StoreError> {
    sqlx::query_as::<_, IdempotencyRecord>(
        r#"
        UPDATE idempotency_records
        SET status = 'completed', http_status = $2, response_body = $3,
            payment_id = $4, updated_at = now()
        WHERE id = $1
        RETURNING id, scope, idempotency_key, request_hash, status, http_status,
                  response_body, payment_id, created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(http_status)
    .bind(response_body)
    .bind(payment_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(StoreError::from_sqlx)
}

/// Bumps `updated_at` only — used when a caller observes a stale
/// `InProgress` record and is about to take over completing it.
pub async fn touch(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<(), StoreError> {
    sqlx::query("UPDATE idempotency_records SET updated_at = now() WHERE id = $1")
        .bind(id)
        .execute(&mut **tx)
        .await
        .map_err(StoreError::from_sqlx)?;
    Ok(())
}
