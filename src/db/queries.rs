use crate::db::models::{LedgerEntryRow, PaymentIntentRow, WalletAccountRow};
use crate::domain::{LedgerEntry, PaymentIntent, PaymentStatus};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgExecutor;
use sqlx::Result;
use uuid::Uuid;

const OPEN_STATUSES: &str = "('created', 'awaiting_gateway', 'processing')";
const TERMINAL_STATUSES: &str = "('paid', 'failed', 'canceled', 'refunded')";

pub async fn upsert_wallet_account<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
    owner_id: &str,
    currency: &str,
) -> Result<WalletAccountRow> {
    // The no-op update makes RETURNING yield the existing row on conflict.
    sqlx::query_as::<_, WalletAccountRow>(
        r#"
        INSERT INTO wallet_accounts (id, owner_id, currency, balance_cents, created_at)
        VALUES ($1, $2, $3, 0, NOW())
        ON CONFLICT (owner_id, currency) DO UPDATE SET owner_id = EXCLUDED.owner_id
        RETURNING id, owner_id, currency, balance_cents, created_at
        "#,
    )
    .bind(id)
    .bind(owner_id)
    .bind(currency)
    .fetch_one(executor)
    .await
}

pub async fn find_wallet_account<'e, E: PgExecutor<'e>>(
    executor: E,
    owner_id: &str,
    currency: &str,
) -> Result<Option<WalletAccountRow>> {
    sqlx::query_as::<_, WalletAccountRow>(
        "SELECT id, owner_id, currency, balance_cents, created_at FROM wallet_accounts WHERE owner_id = $1 AND currency = $2",
    )
    .bind(owner_id)
    .bind(currency)
    .fetch_optional(executor)
    .await
}

pub async fn get_wallet_account<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
) -> Result<Option<WalletAccountRow>> {
    sqlx::query_as::<_, WalletAccountRow>(
        "SELECT id, owner_id, currency, balance_cents, created_at FROM wallet_accounts WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(executor)
    .await
}

/// Locks the wallet row for the rest of the surrounding transaction.
pub async fn lock_wallet_balance<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> Result<i64> {
    sqlx::query_scalar::<_, i64>("SELECT balance_cents FROM wallet_accounts WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_one(executor)
        .await
}

pub async fn set_wallet_balance<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
    balance_cents: i64,
) -> Result<()> {
    sqlx::query("UPDATE wallet_accounts SET balance_cents = $2 WHERE id = $1")
        .bind(id)
        .bind(balance_cents)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn list_wallet_accounts<'e, E: PgExecutor<'e>>(
    executor: E,
) -> Result<Vec<WalletAccountRow>> {
    sqlx::query_as::<_, WalletAccountRow>(
        "SELECT id, owner_id, currency, balance_cents, created_at FROM wallet_accounts ORDER BY created_at",
    )
    .fetch_all(executor)
    .await
}

/// Inserts an entry unless its idempotency key exists. `None` means a conflicting
/// row was already there.
pub async fn insert_ledger_entry<'e, E: PgExecutor<'e>>(
    executor: E,
    entry: &LedgerEntry,
) -> Result<Option<LedgerEntryRow>> {
    sqlx::query_as::<_, LedgerEntryRow>(
        r#"
        INSERT INTO ledger_entries (
            id, wallet_account_id, signed_amount_cents, reason,
            related_payment_intent_id, idempotency_key, balance_after_cents, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (idempotency_key) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(entry.id)
    .bind(entry.wallet_account_id)
    .bind(entry.signed_amount_cents)
    .bind(entry.reason.as_str())
    .bind(entry.related_payment_intent_id)
    .bind(&entry.idempotency_key)
    .bind(entry.balance_after_cents)
    .bind(entry.created_at)
    .fetch_optional(executor)
    .await
}

pub async fn find_ledger_entry_by_key<'e, E: PgExecutor<'e>>(
    executor: E,
    idempotency_key: &str,
) -> Result<Option<LedgerEntryRow>> {
    sqlx::query_as::<_, LedgerEntryRow>("SELECT * FROM ledger_entries WHERE idempotency_key = $1")
        .bind(idempotency_key)
        .fetch_optional(executor)
        .await
}

pub async fn sum_ledger_entries<'e, E: PgExecutor<'e>>(executor: E, wallet_id: Uuid) -> Result<i64> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COALESCE(SUM(signed_amount_cents), 0)::BIGINT FROM ledger_entries WHERE wallet_account_id = $1",
    )
    .bind(wallet_id)
    .fetch_one(executor)
    .await
}

pub async fn list_ledger_entries<'e, E: PgExecutor<'e>>(
    executor: E,
    wallet_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<LedgerEntryRow>> {
    sqlx::query_as::<_, LedgerEntryRow>(
        "SELECT * FROM ledger_entries WHERE wallet_account_id = $1 ORDER BY created_at DESC, id LIMIT $2 OFFSET $3",
    )
    .bind(wallet_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(executor)
    .await
}

pub async fn insert_payment_intent<'e, E: PgExecutor<'e>>(
    executor: E,
    intent: &PaymentIntent,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO payment_intents (
            id, owner_id, purpose, subject_id, currency, requested_amount_cents,
            wallet_applied_cents, gateway_amount_cents, method, status, gateway_reference,
            qr_payload, expires_at, failure_reason, created_at, updated_at, resolved_at, settled_at,
            settle_attempts, next_settle_at, settle_error
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18,
            $19, $20, $21
        )
        "#,
    )
    .bind(intent.id)
    .bind(&intent.owner_id)
    .bind(intent.purpose.as_str())
    .bind(&intent.subject_id)
    .bind(&intent.currency)
    .bind(intent.requested_amount_cents)
    .bind(intent.wallet_applied_cents)
    .bind(intent.gateway_amount_cents)
    .bind(intent.method.as_str())
    .bind(intent.status.as_str())
    .bind(&intent.gateway_reference)
    .bind(&intent.qr_payload)
    .bind(intent.expires_at)
    .bind(&intent.failure_reason)
    .bind(intent.created_at)
    .bind(intent.updated_at)
    .bind(intent.resolved_at)
    .bind(intent.settled_at)
    .bind(intent.settle_attempts)
    .bind(intent.next_settle_at)
    .bind(&intent.settle_error)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn get_payment_intent<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
) -> Result<Option<PaymentIntentRow>> {
    sqlx::query_as::<_, PaymentIntentRow>("SELECT * FROM payment_intents WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub async fn find_payment_intent_by_reference<'e, E: PgExecutor<'e>>(
    executor: E,
    method: &str,
    reference: &str,
) -> Result<Option<PaymentIntentRow>> {
    sqlx::query_as::<_, PaymentIntentRow>(
        "SELECT * FROM payment_intents WHERE method = $1 AND gateway_reference = $2",
    )
    .bind(method)
    .bind(reference)
    .fetch_optional(executor)
    .await
}

pub async fn find_payment_intents_for_subject<'e, E: PgExecutor<'e>>(
    executor: E,
    purpose: &str,
    subject_id: &str,
) -> Result<Vec<PaymentIntentRow>> {
    sqlx::query_as::<_, PaymentIntentRow>(
        "SELECT * FROM payment_intents WHERE purpose = $1 AND subject_id = $2 ORDER BY created_at DESC",
    )
    .bind(purpose)
    .bind(subject_id)
    .fetch_all(executor)
    .await
}

/// Compare-and-swap on `status`. Returns the number of rows written (0 or 1).
pub async fn update_payment_intent_if_status<'e, E: PgExecutor<'e>>(
    executor: E,
    intent: &PaymentIntent,
    expected: PaymentStatus,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE payment_intents
        SET status = $3, gateway_reference = $4, qr_payload = $5, expires_at = $6,
            failure_reason = $7, updated_at = $8, resolved_at = $9, settled_at = $10,
            settle_attempts = $11, next_settle_at = $12, settle_error = $13
        WHERE id = $1 AND status = $2
        "#,
    )
    .bind(intent.id)
    .bind(expected.as_str())
    .bind(intent.status.as_str())
    .bind(&intent.gateway_reference)
    .bind(&intent.qr_payload)
    .bind(intent.expires_at)
    .bind(&intent.failure_reason)
    .bind(intent.updated_at)
    .bind(intent.resolved_at)
    .bind(intent.settled_at)
    .bind(intent.settle_attempts)
    .bind(intent.next_settle_at)
    .bind(&intent.settle_error)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

pub async fn list_stale_payment_intents<'e, E: PgExecutor<'e>>(
    executor: E,
    now: DateTime<Utc>,
    created_before: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<PaymentIntentRow>> {
    let sql = format!(
        "SELECT * FROM payment_intents WHERE status IN {} AND (expires_at <= $1 OR created_at <= $2) ORDER BY created_at ASC LIMIT $3",
        OPEN_STATUSES
    );
    sqlx::query_as::<_, PaymentIntentRow>(&sql)
        .bind(now)
        .bind(created_before)
        .bind(limit)
        .fetch_all(executor)
        .await
}

pub async fn list_unsettled_payment_intents<'e, E: PgExecutor<'e>>(
    executor: E,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<PaymentIntentRow>> {
    let sql = format!(
        "SELECT * FROM payment_intents WHERE status IN {} AND settled_at IS NULL \
         AND (settle_attempts = 0 OR next_settle_at <= $1) \
         ORDER BY COALESCE(next_settle_at, updated_at) ASC, updated_at ASC LIMIT $2",
        TERMINAL_STATUSES
    );
    sqlx::query_as::<_, PaymentIntentRow>(&sql)
        .bind(now)
        .bind(limit)
        .fetch_all(executor)
        .await
}

pub async fn record_payment_intent_settle_failure<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
    status: PaymentStatus,
    attempts: i32,
    next_settle_at: Option<DateTime<Utc>>,
    error: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE payment_intents
        SET settle_attempts = $3, next_settle_at = $4, settle_error = $5
        WHERE id = $1 AND status = $2 AND settled_at IS NULL
        "#,
    )
    .bind(id)
    .bind(status.as_str())
    .bind(attempts)
    .bind(next_settle_at)
    .bind(error)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn list_parked_payment_intents<'e, E: PgExecutor<'e>>(
    executor: E,
    limit: i64,
) -> Result<Vec<PaymentIntentRow>> {
    let sql = format!(
        "SELECT * FROM payment_intents WHERE status IN {} AND settled_at IS NULL \
         AND settle_attempts > 0 AND next_settle_at IS NULL ORDER BY updated_at ASC LIMIT $1",
        TERMINAL_STATUSES
    );
    sqlx::query_as::<_, PaymentIntentRow>(&sql)
        .bind(limit)
        .fetch_all(executor)
        .await
}

pub async fn mark_payment_intent_settled<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
    status: PaymentStatus,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE payment_intents SET settled_at = $3 WHERE id = $1 AND status = $2")
        .bind(id)
        .bind(status.as_str())
        .bind(at)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn list_payment_intents_for_owner<'e, E: PgExecutor<'e>>(
    executor: E,
    owner_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<PaymentIntentRow>> {
    sqlx::query_as::<_, PaymentIntentRow>(
        "SELECT * FROM payment_intents WHERE owner_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
    )
    .bind(owner_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(executor)
    .await
}
