//! Operator endpoints for inspecting and clearing counters.
//!
//! Mounted only when an admin token is configured. Every route requires
//! `Authorization: Bearer <token>`.

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::error::ApiError;
use crate::ratelimit::{Bucket, CounterSnapshot, RateLimiter};

#[derive(Clone)]
struct AdminState {
    limiter: RateLimiter,
    token: Arc<str>,
}

#[derive(Debug, Serialize)]
struct CounterView {
    bucket: Bucket,
    identity: String,
    #[serde(flatten)]
    snapshot: CounterSnapshot,
}

/// Admin routes under `/admin/rate-limits/{bucket}/{identity}`.
pub fn admin_router(limiter: RateLimiter, token: &str) -> Router {
    let state = AdminState {
        limiter,
        token: Arc::from(token),
    };

    Router::new()
        .route(
            "/admin/rate-limits/{bucket}/{identity}",
            get(inspect_counter).delete(reset_counter),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin))
        .with_state(state)
}

async fn reset_counter(
    State(state): State<AdminState>,
    Path((bucket, identity)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    state.limiter.reset_rate_limit(&identity, &bucket).await?;
    Ok(Json(json!({ "success": true })))
}

async fn inspect_counter(
    State(state): State<AdminState>,
    Path((bucket, identity)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let bucket = Bucket::from_name(&bucket);
    let snapshot = state
        .limiter
        .inspect(bucket, &identity)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No active {} counter for {}", bucket, identity)))?;

    let view = CounterView {
        bucket,
        identity,
        snapshot,
    };
    Ok(Json(json!({ "success": true, "data": view })))
}

async fn require_admin(
    State(state): State<AdminState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    match presented {
        Some(token) if tokens_match(token, &state.token) => Ok(next.run(request).await),
        Some(_) => {
            warn!(uri = %request.uri(), "Rejected admin request with invalid token");
            Err(ApiError::unauthorized("Invalid token"))
        }
        None => Err(ApiError::unauthorized("Access token required")),
    }
}

/// Compare SHA-256 digests in constant time, so neither the token length
/// nor the matching prefix shows up in response timing.
fn tokens_match(presented: &str, expected: &str) -> bool {
    let presented = Sha256::digest(presented.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    presented.ct_eq(&expected).into()
}
