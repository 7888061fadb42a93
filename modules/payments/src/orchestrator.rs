use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ChargeError, StoreError};
use crate::models::{ChargeRequest, PaymentChargedPayload, PaymentResponse};
use crate::response_cache::{CachedResponse, ResponseCache};
use crate::{advisory_lock, idempotency_store, outbox_store, payment_store};
use crate::config::Config;
use crate::processor::StubProcessor;

/// Result of a charge attempt: the response to send back, and whether it is
/// a replay of a previous success rather than a fresh one.
pub struct ChargeOutcome {
    pub http_status: u16,
    pub body: JsonValue,
    pub replayed: bool,
}

pub struct Orchestrator {
    pool: PgPool,
    config: Config,
    cache: Arc<ResponseCache>,
    processor: StubProcessor,
}

impl Orchestrator {
    pub fn new(pool: PgPool, config: Config, cache: Arc<ResponseCache>) -> Self {
        Self {
            pool,
            config,
            cache,
            processor: StubProcessor::new(),
        }
    }

    /// Consults the response cache for a `(scope, key)` hit, without ever
    /// touching the database. `Ok` means the cached response can be replayed
    /// as-is; `Err(HashConflict)` means the cache already knows this key was
    /// used with a different body. A miss (`None`) is not meaningful by
    /// itself — the caller must fall back to `charge`, which consults the
    /// authoritative idempotency store.
    pub async fn check_cache(
        &self,
        key: &str,
        request_hash: &str,
    ) -> Option<Result<ChargeOutcome, ChargeError>> {
        let scope = self.config.idempotency_scope.as_str();
        let cached = self.cache.get(scope, key).await?;
        if cached.request_hash != request_hash {
            return Some(Err(ChargeError::HashConflict));
        }
        Some(Ok(ChargeOutcome {
            http_status: cached.http_status,
            body: cached.response_body,
            replayed: true,
        }))
    }

    /// Executes the charge algorithm for one `(key, request_hash, request)`
    /// inside a single database transaction. See the module-level docs in
    /// `idempotency_store`/`payment_store`/`outbox_store` for the primitives
    /// this composes.
    pub async fn charge(
        &self,
        key: &str,
        request_hash: &str,
        request: &ChargeRequest,
    ) -> Result<ChargeOutcome, ChargeError> {
        let scope = self.config.idempotency_scope.as_str();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ChargeError::Store(StoreError::from_sqlx(e)))?;

        advisory_lock::acquire(&mut tx, scope, key)
            .await
            .map_err(|e| ChargeError::Store(StoreError::from_sqlx(e)))?;

        let mut existing = idempotency_store::find_for_update(&mut tx, scope, key)
            .await
            .map_err(ChargeError::Store)?;

        let (record, resume_as_completion) = loop {
            match existing {
                Some(rec) if rec.request_hash != request_hash => {
                    tx.rollback().await.ok();
                    tracing::warn!(scope, idempotency_key = key, "idempotency conflict: request hash mismatch");
                    return Err(ChargeError::HashConflict);
                }
                Some(rec) if rec.status == crate::models::IdempotencyStatus::Completed => {
                    let body = rec.response_body.clone().unwrap_or(JsonValue::Null);
                    let status = rec.http_status.unwrap_or(201);
                    tx.commit().await.map_err(|e| ChargeError::Store(StoreError::from_sqlx(e)))?;
                    self.cache
                        .put(
                            scope,
                            key,
                            CachedResponse {
                                request_hash: request_hash.to_string(),
                                http_status: status as u16,
                                response_body: body.clone(),
                            },
                        )
                        .await;
                    tracing::info!(
                        scope,
                        idempotency_key = key,
                        payment_id = ?rec.payment_id,
                        "idempotency replay served from completed record"
                    );
                    return Ok(ChargeOutcome {
                        http_status: status as u16,
                        body,
                        replayed: true,
                    });
                }
                Some(rec) => {
                    if rec.is_stale(Utc::now(), self.stale_max_age()) {
                        idempotency_store::touch(&mut tx, rec.id)
                            .await
                            .map_err(ChargeError::Store)?;
                        tracing::warn!(
                            scope,
                            idempotency_key = key,
                            record_id = %rec.id,
                            "resuming stale in-progress idempotency record"
                        );
                        break (rec, true);
                    } else {
                        tx.rollback().await.ok();
                        tracing::warn!(scope, idempotency_key = key, "idempotency conflict: request already in progress");
                        return Err(ChargeError::InProgressConflict);
                    }
                }
                None => {
                    match idempotency_store::insert_in_progress(&mut tx, scope, key, request_hash).await {
                        Ok(rec) => {
                            tracing::info!(scope, idempotency_key = key, record_id = %rec.id, "idempotency record created");
                            break (rec, false);
                        }
                        Err(StoreError::UniqueViolation) => {
                            tracing::warn!(
                                scope,
                                idempotency_key = key,
                                "idempotency record insert raced with a concurrent winner, retrying"
                            );
                            existing = idempotency_store::find_for_update(&mut tx, scope, key)
                                .await
                                .map_err(ChargeError::Store)?;
                        }
                        Err(e) => return Err(ChargeError::Store(e)),
                    }
                }
            }
        };

        if resume_as_completion {
            if let Some(existing_payment) =
                payment_store::find_by_idempotency_key(&mut tx, key)
                    .await
                    .map_err(ChargeError::Store)?
            {
                let body = serde_json::to_value(PaymentResponse::from(existing_payment.clone()))
                    .expect("PaymentResponse serializes");
                let completed = idempotency_store::mark_completed(
                    &mut tx,
                    record.id,
                    201,
                    &body,
                    existing_payment.id,
                )
                .await
                .map_err(ChargeError::Store)?;
                tx.commit().await.map_err(|e| ChargeError::Store(StoreError::from_sqlx(e)))?;
                self.cache
                    .put(
                        scope,
                        key,
                        CachedResponse {
                            request_hash: request_hash.to_string(),
                            http_status: completed.http_status.unwrap_or(201) as u16,
                            response_body: body.clone(),
                        },
                    )
                    .await;
                tracing::info!(
                    scope,
                    idempotency_key = key,
                    payment_id = %existing_payment.id,
                    "idempotency replay served after resuming a stale record"
                );
                return Ok(ChargeOutcome {
                    http_status: 201,
                    body,
                    replayed: true,
                });
            }
        }

        self.processor.authorize(request).await;

        let payment = match payment_store::insert(&mut tx, key, request).await {
            Ok(p) => p,
            Err(StoreError::UniqueViolation) => {
                tracing::warn!(
                    scope,
                    idempotency_key = key,
                    "payment insert raced with a concurrent winner, re-reading"
                );
                let existing_payment = payment_store::find_by_idempotency_key(&mut tx, key)
                    .await
                    .map_err(ChargeError::Store)?
                    .ok_or_else(|| {
                        ChargeError::Store(StoreError::Database(sqlx::Error::RowNotFound))
                    })?;
                existing_payment
            }
            Err(e) => return Err(ChargeError::Store(e)),
        };

        let payload = PaymentChargedPayload {
            payment_id: payment.id,
            idempotency_key: payment.idempotency_key.clone(),
            customer_id: payment.customer_id.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            status: payment.status,
            created_at: payment.created_at,
        };
        let payload_bytes = serde_json::to_vec(&payload).expect("PaymentChargedPayload serializes");

        outbox_store::insert(
            &mut tx,
            "payment",
            &payment.id.to_string(),
            "payments.payment.charged",
            &payment.id.to_string(),
            &payload_bytes,
        )
        .await
        .map_err(ChargeError::Store)?;

        let body = serde_json::to_value(PaymentResponse::from(payment.clone()))
            .expect("PaymentResponse serializes");

        idempotency_store::mark_completed(&mut tx, record.id, 201, &body, payment.id)
            .await
            .map_err(ChargeError::Store)?;

        tx.commit()
            .await
            .map_err(|e| ChargeError::Store(StoreError::from_sqlx(e)))?;

        self.cache
            .put(
                scope,
                key,
                CachedResponse {
                    request_hash: request_hash.to_string(),
                    http_status: 201,
                    response_body: body.clone(),
                },
            )
            .await;

        tracing::info!(scope, idempotency_key = key, payment_id = %payment.id, "charge accepted");

        Ok(ChargeOutcome {
            http_status: 201,
            body,
            replayed: false,
        })
    }

    fn stale_max_age(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.idempotency_stale_in_progress_after)
            .unwrap_or_else(|_| chrono::Duration::seconds(30))
    }

    pub async fn find_payment(&self, id: Uuid) -> Result<Option<PaymentResponse>, StoreError> {
        let payment = payment_store::find_by_id(&self.pool, id).await?;
        Ok(payment.map(PaymentResponse::from))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
