use crate::domain::PaymentIntent;
use crate::error::AppError;
use crate::handlers::{Caller, Pagination};
use crate::schemas::{
    CampaignPaymentRequest, CheckoutResponse, DepositRequest, PaymentListResponse, RetryRequest,
};
use crate::services::{
    CampaignCheckout, CheckoutOutcome, CoordinatorError, StatusSnapshot, WalletDeposit,
};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

fn ensure_owner(intent: &PaymentIntent, caller: &Caller) -> Result<(), AppError> {
    if intent.owner_id == caller.0 {
        Ok(())
    } else {
        Err(CoordinatorError::Forbidden(format!("payment {} belongs to another user", intent.id)).into())
    }
}

/// 201 for a new intent, 200 when an open one was returned, 202 while the gateway
/// leg still has to be retried.
fn checkout_status(outcome: &CheckoutOutcome) -> StatusCode {
    if outcome.retry_pending {
        StatusCode::ACCEPTED
    } else if outcome.reused {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    }
}

/// Pay a campaign's publication fee with wallet credit, a gateway, or both.
#[utoipa::path(
    post,
    path = "/campaigns/{id}/payments",
    params(("id" = String, Path, description = "Campaign id")),
    request_body = CampaignPaymentRequest,
    responses(
        (status = 201, description = "Payment intent created", body = CheckoutResponse),
        (status = 200, description = "Open intent for this campaign returned", body = CheckoutResponse),
        (status = 202, description = "Created, gateway dispatch pending retry", body = CheckoutResponse),
        (status = 409, description = "Campaign not payable or already paid"),
        (status = 422, description = "Insufficient wallet balance")
    ),
    tag = "Payments"
)]
pub async fn create_campaign_payment(
    State(state): State<AppState>,
    caller: Caller,
    Path(campaign_id): Path<String>,
    Json(req): Json<CampaignPaymentRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), AppError> {
    let outcome = state
        .coordinator
        .initiate_campaign_payment(CampaignCheckout {
            campaign_id,
            owner_id: caller.0,
            use_wallet: req.use_wallet,
            wallet_amount_cents: req.wallet_amount_cents,
            method: req.method,
            metadata: req.metadata,
            expected_amount_cents: req.expected_amount_cents,
        })
        .await?;

    Ok((checkout_status(&outcome), Json(outcome.into())))
}

/// Top up the caller's wallet through a gateway.
#[utoipa::path(
    post,
    path = "/wallets/deposits",
    request_body = DepositRequest,
    responses(
        (status = 201, description = "Deposit intent created", body = CheckoutResponse),
        (status = 202, description = "Created, gateway dispatch pending retry", body = CheckoutResponse),
        (status = 400, description = "Invalid amount or method")
    ),
    tag = "Payments"
)]
pub async fn create_deposit(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<DepositRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), AppError> {
    let outcome = state
        .coordinator
        .initiate_wallet_deposit(WalletDeposit {
            owner_id: caller.0,
            amount_cents: req.amount_cents,
            method: req.method,
            metadata: req.metadata,
        })
        .await?;

    Ok((checkout_status(&outcome), Json(outcome.into())))
}

#[utoipa::path(
    get,
    path = "/payments",
    params(Pagination),
    responses((status = 200, body = PaymentListResponse)),
    tag = "Payments"
)]
pub async fn list_payments(
    State(state): State<AppState>,
    caller: Caller,
    Query(page): Query<Pagination>,
) -> Result<Json<PaymentListResponse>, AppError> {
    let (limit, offset) = (page.limit(), page.offset());
    let payments = state
        .coordinator
        .list_for_owner(&caller.0, limit, offset)
        .await?;
    Ok(Json(PaymentListResponse {
        payments,
        limit,
        offset,
    }))
}

#[utoipa::path(
    get,
    path = "/payments/{id}",
    params(("id" = Uuid, Path, description = "Payment intent id")),
    responses(
        (status = 200, body = PaymentIntent),
        (status = 404, description = "Payment not found")
    ),
    tag = "Payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentIntent>, AppError> {
    let intent = state.coordinator.get(id).await?;
    ensure_owner(&intent, &caller)?;
    Ok(Json(intent))
}

/// Checks with the gateway when the payment is still open, then reports whether it is paid.
#[utoipa::path(
    get,
    path = "/payments/{id}/status",
    params(("id" = Uuid, Path, description = "Payment intent id")),
    responses(
        (status = 200, body = StatusSnapshot),
        (status = 404, description = "Payment not found")
    ),
    tag = "Payments"
)]
pub async fn payment_status(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusSnapshot>, AppError> {
    let intent = state.coordinator.get(id).await?;
    ensure_owner(&intent, &caller)?;
    Ok(Json(state.coordinator.status(id).await?))
}

#[utoipa::path(
    post,
    path = "/payments/{id}/cancel",
    params(("id" = Uuid, Path, description = "Payment intent id")),
    responses(
        (status = 200, body = PaymentIntent),
        (status = 409, description = "Payment already resolved")
    ),
    tag = "Payments"
)]
pub async fn cancel_payment(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentIntent>, AppError> {
    Ok(Json(state.coordinator.cancel(id, &caller.0).await?))
}

/// Sends the charge again for an intent whose gateway dispatch failed.
#[utoipa::path(
    post,
    path = "/payments/{id}/retry",
    params(("id" = Uuid, Path, description = "Payment intent id")),
    request_body = RetryRequest,
    responses(
        (status = 200, body = CheckoutResponse),
        (status = 503, description = "Gateway still unavailable")
    ),
    tag = "Payments"
)]
pub async fn retry_payment(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    body: Option<Json<RetryRequest>>,
) -> Result<(StatusCode, Json<CheckoutResponse>), AppError> {
    let metadata = body.and_then(|Json(req)| req.metadata);
    let outcome = state
        .coordinator
        .retry_gateway(id, &caller.0, metadata)
        .await?;

    let status = if outcome.retry_pending {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.into())))
}
