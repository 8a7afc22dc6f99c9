use crate::error::AppError;
use crate::handlers::{Caller, Pagination};
use crate::schemas::{BalanceResponse, LedgerEntriesResponse};
use crate::services::CoordinatorError;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};

fn ensure_self(owner_id: &str, caller: &Caller) -> Result<(), AppError> {
    if owner_id == caller.0 {
        Ok(())
    } else {
        Err(CoordinatorError::Forbidden("wallet belongs to another user".to_string()).into())
    }
}

/// Current balance, derived from the ledger. Unknown owners have a zero balance.
#[utoipa::path(
    get,
    path = "/wallets/{owner_id}/balance",
    params(("owner_id" = String, Path, description = "Wallet owner")),
    responses(
        (status = 200, body = BalanceResponse),
        (status = 403, description = "Not the caller's wallet")
    ),
    tag = "Wallet"
)]
pub async fn get_balance(
    State(state): State<AppState>,
    caller: Caller,
    Path(owner_id): Path<String>,
) -> Result<Json<BalanceResponse>, AppError> {
    ensure_self(&owner_id, &caller)?;
    let currency = state.coordinator.settings().currency.clone();
    let balance_cents = state
        .coordinator
        .ledger()
        .balance_for_owner(&owner_id, &currency)
        .await?;

    Ok(Json(BalanceResponse {
        owner_id,
        currency,
        balance_cents,
    }))
}

/// Ledger history, newest first.
#[utoipa::path(
    get,
    path = "/wallets/{owner_id}/entries",
    params(
        ("owner_id" = String, Path, description = "Wallet owner"),
        Pagination
    ),
    responses(
        (status = 200, body = LedgerEntriesResponse),
        (status = 403, description = "Not the caller's wallet")
    ),
    tag = "Wallet"
)]
pub async fn list_entries(
    State(state): State<AppState>,
    caller: Caller,
    Path(owner_id): Path<String>,
    Query(page): Query<Pagination>,
) -> Result<Json<LedgerEntriesResponse>, AppError> {
    ensure_self(&owner_id, &caller)?;
    let (limit, offset) = (page.limit(), page.offset());
    let ledger = state.coordinator.ledger();
    let currency = &state.coordinator.settings().currency;

    let entries = match ledger.find_account(&owner_id, currency).await? {
        Some(wallet) => ledger.entries(wallet.id, limit, offset).await?,
        None => Vec::new(),
    };

    Ok(Json(LedgerEntriesResponse {
        entries,
        limit,
        offset,
    }))
}
