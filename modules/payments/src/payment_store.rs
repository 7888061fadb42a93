use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{ChargeRequest, Payment, PaymentStatus};

/// Looks up a payment already created for `idempotency_key`, used when a
/// concurrent insert wins the unique-constraint race and this transaction
/// needs to fall back to a replay.
pub async fn find_by_idempotency_key(
    tx: &mut Transaction<'_, Postgres>,
    idempotency_key: &str,
) -> Result<Option<Payment>, StoreError> {
    sqlx::query_as::<_, Payment>(
        r#"
        SELECT id, idempotency_key, customer_id, amount, currency,
               payment_method_token, description, status, created_at
        FROM payments
        WHERE idempotency_key = $1
        "#,
    )
    .bind(idempotency_key)
    .fetch_optional(&mut **tx)
    .await
    .map_err(StoreError::from_sqlx)
}

/// Inserts the business fact of a charge. Fails with
/// `StoreError::UniqueViolation` if `idempotency_key` already has a row.
pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    idempotency_key: &str,
    request: &ChargeRequest,
) -> Result<Payment, StoreError> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments
            (id, idempotency_key, customer_id, amount, currency,
             payment_method_token, description, status, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id, idempotency_key, customer_id, amount, currency,
                  payment_method_token, description, status, created_at
        "#,
    )
    .bind(id)
    .bind(idempotency_key)
    .bind(&request.customer_id)
    .bind(request.amount)
    .bind(&request.currency)
    .bind(&request.payment_method_token)
    .bind(&request.description)
    .bind(PaymentStatus::Authorized)
    .bind(now)
    .fetch_one(&mut **tx)
    .await
    .map_err(StoreError::from_sqlx)
}

/// Backs `GET /api/payments/{id}`; runs outside any business transaction.
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Payment>, StoreError> {
    sqlx::query_as::<_, Payment>(
        r#"
        SELECT id, idempotency_key, customer_id, amount, currency,
               payment_method_token, description, status, created_at
        FROM payments
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(StoreError::from_sqlx)
}
