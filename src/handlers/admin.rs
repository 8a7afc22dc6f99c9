//! Operator endpoints. Mounted under `/admin`, reachable only from the internal network.

use crate::domain::PaymentIntent;
use crate::error::AppError;
use crate::handlers::{Caller, Pagination};
use crate::services::{LedgerAuditReport, SweepReport};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use uuid::Uuid;

/// Refunds a paid intent. The caller is recorded as the approving actor.
#[utoipa::path(
    post,
    path = "/admin/payments/{id}/refund",
    params(("id" = Uuid, Path, description = "Payment intent id")),
    responses(
        (status = 200, body = PaymentIntent),
        (status = 409, description = "Payment is not paid"),
        (status = 422, description = "Deposit already spent")
    ),
    tag = "Admin"
)]
pub async fn refund_payment(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentIntent>, AppError> {
    tracing::info!(payment_id = %id, actor = %caller.0, "Refund requested");
    Ok(Json(state.coordinator.refund(id, &caller.0).await?))
}

/// Compares materialized balances with the ledger sums.
#[utoipa::path(
    get,
    path = "/admin/ledger/audit",
    responses((status = 200, body = LedgerAuditReport)),
    tag = "Admin"
)]
pub async fn ledger_audit(State(state): State<AppState>) -> Result<Json<LedgerAuditReport>, AppError> {
    Ok(Json(state.coordinator.ledger().audit().await?))
}

/// Runs one expiry and repair pass now instead of waiting for the background task.
#[utoipa::path(
    post,
    path = "/admin/sweep",
    responses((status = 200, body = SweepReport)),
    tag = "Admin"
)]
pub async fn run_sweep(State(state): State<AppState>) -> Result<Json<SweepReport>, AppError> {
    Ok(Json(state.coordinator.sweep(Utc::now()).await?))
}

/// Re-runs the side effects of a terminal intent, including one parked after
/// repeated failures. 202 when they still did not all go through.
#[utoipa::path(
    post,
    path = "/admin/payments/{id}/settle",
    params(("id" = Uuid, Path, description = "Payment intent id")),
    responses(
        (status = 200, description = "Side effects applied", body = PaymentIntent),
        (status = 202, description = "Still unsettled, see settle_error", body = PaymentIntent),
        (status = 400, description = "Payment is not terminal yet")
    ),
    tag = "Admin"
)]
pub async fn retry_settlement(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<PaymentIntent>), AppError> {
    let intent = state.coordinator.retry_settlement(id, &caller.0).await?;
    let status = if intent.settled_at.is_some() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(intent)))
}

/// Terminal intents the sweep stopped retrying.
#[utoipa::path(
    get,
    path = "/admin/settlements/parked",
    params(Pagination),
    responses((status = 200, body = [PaymentIntent])),
    tag = "Admin"
)]
pub async fn parked_settlements(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<PaymentIntent>>, AppError> {
    Ok(Json(state.coordinator.parked_settlements(page.limit()).await?))
}
