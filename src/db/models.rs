//! Row types as stored in Postgres. Enum columns are plain TEXT and are parsed
//! into domain types on the way out.

use crate::domain::{LedgerEntry, PaymentIntent, WalletAccount};
use crate::ports::RepositoryError;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WalletAccountRow {
    pub id: Uuid,
    pub owner_id: String,
    pub currency: String,
    pub balance_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl From<WalletAccountRow> for WalletAccount {
    fn from(row: WalletAccountRow) -> Self {
        WalletAccount {
            id: row.id,
            owner_id: row.owner_id,
            currency: row.currency,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LedgerEntryRow {
    pub id: Uuid,
    pub wallet_account_id: Uuid,
    pub signed_amount_cents: i64,
    pub reason: String,
    pub related_payment_intent_id: Option<Uuid>,
    pub idempotency_key: String,
    pub balance_after_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<LedgerEntryRow> for LedgerEntry {
    type Error = RepositoryError;

    fn try_from(row: LedgerEntryRow) -> Result<Self, Self::Error> {
        Ok(LedgerEntry {
            id: row.id,
            wallet_account_id: row.wallet_account_id,
            signed_amount_cents: row.signed_amount_cents,
            reason: row
                .reason
                .parse()
                .map_err(|e: crate::domain::UnknownVariant| RepositoryError::Corrupt(e.to_string()))?,
            related_payment_intent_id: row.related_payment_intent_id,
            idempotency_key: row.idempotency_key,
            balance_after_cents: row.balance_after_cents,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentIntentRow {
    pub id: Uuid,
    pub owner_id: String,
    pub purpose: String,
    pub subject_id: Option<String>,
    pub currency: String,
    pub requested_amount_cents: i64,
    pub wallet_applied_cents: i64,
    pub gateway_amount_cents: i64,
    pub method: String,
    pub status: String,
    pub gateway_reference: Option<String>,
    pub qr_payload: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    pub settle_attempts: i32,
    pub next_settle_at: Option<DateTime<Utc>>,
    pub settle_error: Option<String>,
}

impl TryFrom<PaymentIntentRow> for PaymentIntent {
    type Error = RepositoryError;

    fn try_from(row: PaymentIntentRow) -> Result<Self, Self::Error> {
        let corrupt = |e: crate::domain::UnknownVariant| RepositoryError::Corrupt(e.to_string());
        Ok(PaymentIntent {
            id: row.id,
            owner_id: row.owner_id,
            purpose: row.purpose.parse().map_err(corrupt)?,
            subject_id: row.subject_id,
            currency: row.currency,
            requested_amount_cents: row.requested_amount_cents,
            wallet_applied_cents: row.wallet_applied_cents,
            gateway_amount_cents: row.gateway_amount_cents,
            method: row.method.parse().map_err(corrupt)?,
            status: row.status.parse().map_err(corrupt)?,
            gateway_reference: row.gateway_reference,
            qr_payload: row.qr_payload,
            expires_at: row.expires_at,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
            resolved_at: row.resolved_at,
            settled_at: row.settled_at,
            settle_attempts: row.settle_attempts,
            next_settle_at: row.next_settle_at,
            settle_error: row.settle_error,
        })
    }
}
