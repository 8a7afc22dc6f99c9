//! Wallet ledger records.
//!
//! The ledger is append-only: entries are never updated or deleted, and a wallet's
//! balance is always the sum of its entries' signed amounts.

use super::UnknownVariant;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// A user's stored credit. The balance is derived from [`LedgerEntry`] rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WalletAccount {
    pub id: Uuid,
    pub owner_id: String,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl WalletAccount {
    pub fn new(owner_id: &str, currency: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            currency: currency.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntryReason {
    Deposit,
    CampaignPayment,
    Refund,
    Withdrawal,
}

impl EntryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::CampaignPayment => "campaign_payment",
            Self::Refund => "refund",
            Self::Withdrawal => "withdrawal",
        }
    }
}

impl fmt::Display for EntryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryReason {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(Self::Deposit),
            "campaign_payment" => Ok(Self::CampaignPayment),
            "refund" => Ok(Self::Refund),
            "withdrawal" => Ok(Self::Withdrawal),
            other => Err(UnknownVariant::new("entry reason", other)),
        }
    }
}

/// Immutable balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub wallet_account_id: Uuid,
    /// Positive for credits, negative for debits.
    pub signed_amount_cents: i64,
    pub reason: EntryReason,
    pub related_payment_intent_id: Option<Uuid>,
    pub idempotency_key: String,
    /// Running balance of the wallet immediately after this entry.
    pub balance_after_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn is_credit(&self) -> bool {
        self.signed_amount_cents > 0
    }
}

/// An entry about to be appended. The store assigns the running balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLedgerEntry {
    pub wallet_account_id: Uuid,
    pub signed_amount_cents: i64,
    pub reason: EntryReason,
    pub related_payment_intent_id: Option<Uuid>,
    pub idempotency_key: String,
}

impl NewLedgerEntry {
    pub fn into_entry(self, balance_after_cents: i64) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            wallet_account_id: self.wallet_account_id,
            signed_amount_cents: self.signed_amount_cents,
            reason: self.reason,
            related_payment_intent_id: self.related_payment_intent_id,
            idempotency_key: self.idempotency_key,
            balance_after_cents,
            created_at: Utc::now(),
        }
    }
}

/// Idempotency keys for the ledger effects of a payment intent.
///
/// Each effect an intent can have on a wallet gets exactly one key, so a retried
/// side effect collapses onto the entry written the first time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyKey {
    WalletDebit(Uuid),
    WalletRelease(Uuid),
    Refund(Uuid),
    Deposit(Uuid),
    DepositReversal(Uuid),
}

impl IdempotencyKey {
    pub fn as_string(&self) -> String {
        let (id, purpose) = match self {
            Self::WalletDebit(id) => (id, "wallet_debit"),
            Self::WalletRelease(id) => (id, "wallet_release"),
            Self::Refund(id) => (id, "refund"),
            Self::Deposit(id) => (id, "deposit"),
            Self::DepositReversal(id) => (id, "deposit_reversal"),
        };
        format!("payment:{}:{}", id, purpose)
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_reason_round_trips_through_str() {
        for reason in [
            EntryReason::Deposit,
            EntryReason::CampaignPayment,
            EntryReason::Refund,
            EntryReason::Withdrawal,
        ] {
            assert_eq!(reason.as_str().parse::<EntryReason>().unwrap(), reason);
        }
        assert!("bonus".parse::<EntryReason>().is_err());
    }

    #[test]
    fn test_idempotency_keys_are_distinct_per_effect() {
        let id = Uuid::new_v4();
        let debit = IdempotencyKey::WalletDebit(id).as_string();
        let release = IdempotencyKey::WalletRelease(id).as_string();

        assert_ne!(debit, release);
        assert_eq!(debit, format!("payment:{}:wallet_debit", id));
    }

    #[test]
    fn test_new_entry_keeps_fields() {
        let wallet = Uuid::new_v4();
        let entry = NewLedgerEntry {
            wallet_account_id: wallet,
            signed_amount_cents: -250,
            reason: EntryReason::CampaignPayment,
            related_payment_intent_id: None,
            idempotency_key: "k".to_string(),
        }
        .into_entry(750);

        assert_eq!(entry.wallet_account_id, wallet);
        assert_eq!(entry.balance_after_cents, 750);
        assert!(!entry.is_credit());
    }
}
