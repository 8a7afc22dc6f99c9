pub mod admin;
pub mod payments;
pub mod wallet;
pub mod webhook;

use crate::error::AppError;
use crate::AppState;
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, State},
    http::{header, request::Parts, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Set by the web application after it authenticated the user.
pub const USER_ID_HEADER: &str = "x-user-id";

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

/// The authenticated user making the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Caller(v.to_string()))
            .ok_or_else(|| AppError::Unauthorized(format!("missing {} header", USER_ID_HEADER)))
    }
}

#[derive(Debug, Default, Deserialize, ToSchema, IntoParams)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Healthy or degraded", body = crate::health::HealthResponse),
        (status = 503, description = "Every dependency is down", body = crate::health::HealthResponse)
    ),
    tag = "Health"
)]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health.check_all().await;
    let status_code = match report.status.as_str() {
        "healthy" | "degraded" => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(report))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReadinessResponse {
    pub status: String,
    pub draining: bool,
}

/// Readiness check: 200 when accepting traffic, 503 while starting or draining.
#[utoipa::path(
    get,
    path = "/ready",
    responses(
        (status = 200, body = ReadinessResponse),
        (status = 503, body = ReadinessResponse)
    ),
    tag = "Health"
)]
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.readiness.is_ready();
    let response = ReadinessResponse {
        status: if ready { "ready" } else { "not_ready" }.to_string(),
        draining: state.readiness.is_draining(),
    };
    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(response))
}

pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::metrics::render(),
    )
}
