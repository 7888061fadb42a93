use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

use crate::error::ChargeError;
use crate::hashing::canonical_request_hash;
use crate::models::{ChargeRequest, ErrorBody};
use crate::state::AppState;

const IDEMPOTENCY_KEY_HEADER: &str = "x-idempotency-key";

static IDEMPOTENCY_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._:-]{1,128}$").expect("valid regex"));

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/payments/charges", post(create_charge))
        .route("/api/payments/{id}", get(get_payment))
        .route("/api/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn create_charge(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChargeRequest>,
) -> Response {
    let key = match extract_idempotency_key(&headers) {
        Ok(key) => key,
        Err(err) => return err.into_response(),
    };

    if let Err(err) = validate(&request) {
        return err.into_response();
    }

    let request_hash = match canonical_request_hash(&request) {
        Ok(hash) => hash,
        Err(e) => {
            tracing::error!(error = %e, "failed to hash charge request");
            return ChargeError::Validation("malformed request body".to_string()).into_response();
        }
    };

    if let Some(cached) = state.orchestrator.check_cache(&key, &request_hash).await {
        return match cached {
            Ok(outcome) => {
                let mut resp = (
                    StatusCode::from_u16(outcome.http_status).unwrap_or(StatusCode::OK),
                    Json(outcome.body),
                )
                    .into_response();
                resp.headers_mut()
                    .insert("x-idempotency-replayed", HeaderValue::from_static("true"));
                state.metrics.replays_total.with_label_values(&["payments:charge"]).inc();
                resp
            }
            Err(err) => err.into_response(),
        };
    }

    match state.orchestrator.charge(&key, &request_hash, &request).await {
        Ok(outcome) => {
            let status = StatusCode::from_u16(outcome.http_status).unwrap_or(StatusCode::OK);
            let location = outcome
                .body
                .get("paymentId")
                .and_then(|v| v.as_str())
                .map(|id| format!("/api/payments/{id}"));
            let mut resp = (status, Json(outcome.body)).into_response();
            if let Some(location) = location {
                resp.headers_mut().insert("location", header_value(&location));
            }
            resp.headers_mut()
                .insert("x-idempotency-request-hash", header_value(&request_hash));
            resp.headers_mut().insert("x-idempotency-key", header_value(&key));
            if outcome.replayed {
                resp.headers_mut()
                    .insert("x-idempotency-replayed", HeaderValue::from_static("true"));
                state.metrics.replays_total.with_label_values(&["payments:charge"]).inc();
            } else {
                state.metrics.charges_total.with_label_values(&["accepted"]).inc();
            }
            resp
        }
        Err(err) => {
            match &err {
                ChargeError::HashConflict => state
                    .metrics
                    .conflicts_total
                    .with_label_values(&["hash_conflict"])
                    .inc(),
                ChargeError::InProgressConflict => state
                    .metrics
                    .conflicts_total
                    .with_label_values(&["in_progress_conflict"])
                    .inc(),
                _ => state.metrics.charges_total.with_label_values(&["error"]).inc(),
            }
            err.into_response()
        }
    }
}

async fn get_payment(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.orchestrator.find_payment(id).await {
        Ok(Some(payment)) => Json(payment).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody::new("not_found", "no payment with that id")),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, payment_id = %id, "failed to load payment");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody::new("internal_error", "the request could not be completed")),
            )
                .into_response()
        }
    }
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    database: &'static str,
}

async fn health(State(state): State<AppState>) -> Response {
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => Json(HealthBody {
            status: "ok",
            database: "up",
        })
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "health check database probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthBody {
                    status: "degraded",
                    database: "down",
                }),
            )
                .into_response()
        }
    }
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn extract_idempotency_key(headers: &HeaderMap) -> Result<String, ChargeError> {
    let raw = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .ok_or_else(|| ChargeError::Validation("missing X-Idempotency-Key header".to_string()))?;
    let key = raw
        .to_str()
        .map_err(|_| ChargeError::Validation("X-Idempotency-Key header is not valid UTF-8".to_string()))?;
    if !IDEMPOTENCY_KEY_PATTERN.is_match(key) {
        return Err(ChargeError::Validation(
            "X-Idempotency-Key does not match the required pattern".to_string(),
        ));
    }
    Ok(key.to_string())
}

fn validate(request: &ChargeRequest) -> Result<(), ChargeError> {
    if request.customer_id.trim().is_empty() {
        return Err(ChargeError::Validation("customerId must not be empty".to_string()));
    }
    if request.amount <= 0 {
        return Err(ChargeError::Validation("amount must be greater than zero".to_string()));
    }
    if request.currency.trim().is_empty() {
        return Err(ChargeError::Validation("currency must not be empty".to_string()));
    }
    if request.payment_method_token.trim().is_empty() {
        return Err(ChargeError::Validation(
            "paymentMethodToken must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn header_value(s: &str) -> HeaderValue {
    HeaderValue::from_str(s).unwrap_or_else(|_| HeaderValue::from_static(""))
}
