//! Wallet ledger service: the only writer of balance changes.

use crate::domain::{EntryReason, LedgerEntry, NewLedgerEntry, WalletAccount};
use crate::metrics;
use crate::ports::{AppendOutcome, LedgerStore, RepositoryError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The idempotency key is already recorded. Carries the original entry; callers
    /// retrying an operation treat this as success.
    #[error("Duplicate ledger entry for key {}", .0.idempotency_key)]
    DuplicateEntry(LedgerEntry),
    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: i64, requested: i64 },
    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),
    #[error("Crediting {amount} would overflow wallet {wallet_id} (balance {balance})")]
    BalanceOverflow {
        wallet_id: Uuid,
        balance: i64,
        amount: i64,
    },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BalanceDiscrepancy {
    pub wallet_id: Uuid,
    pub owner_id: String,
    pub currency: String,
    pub cached_balance_cents: Option<i64>,
    pub computed_balance_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LedgerAuditReport {
    pub generated_at: DateTime<Utc>,
    pub wallets_checked: usize,
    pub discrepancies: Vec<BalanceDiscrepancy>,
}

impl LedgerAuditReport {
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Get-or-create; accounts come into existence on the first balance-affecting event.
    pub async fn open_account(
        &self,
        owner_id: &str,
        currency: &str,
    ) -> Result<WalletAccount, LedgerError> {
        Ok(self.store.get_or_create_account(owner_id, currency).await?)
    }

    pub async fn find_account(
        &self,
        owner_id: &str,
        currency: &str,
    ) -> Result<Option<WalletAccount>, LedgerError> {
        Ok(self.store.find_account(owner_id, currency).await?)
    }

    pub async fn credit(
        &self,
        wallet_id: Uuid,
        amount_cents: i64,
        reason: EntryReason,
        idempotency_key: &str,
        related_payment_intent_id: Option<Uuid>,
    ) -> Result<LedgerEntry, LedgerError> {
        self.append(
            wallet_id,
            amount_cents,
            amount_cents,
            reason,
            idempotency_key,
            related_payment_intent_id,
        )
        .await
    }

    pub async fn debit(
        &self,
        wallet_id: Uuid,
        amount_cents: i64,
        reason: EntryReason,
        idempotency_key: &str,
        related_payment_intent_id: Option<Uuid>,
    ) -> Result<LedgerEntry, LedgerError> {
        self.append(
            wallet_id,
            amount_cents,
            -amount_cents,
            reason,
            idempotency_key,
            related_payment_intent_id,
        )
        .await
    }

    async fn append(
        &self,
        wallet_id: Uuid,
        amount_cents: i64,
        signed_amount_cents: i64,
        reason: EntryReason,
        idempotency_key: &str,
        related_payment_intent_id: Option<Uuid>,
    ) -> Result<LedgerEntry, LedgerError> {
        if amount_cents <= 0 {
            return Err(LedgerError::InvalidAmount(amount_cents));
        }

        let outcome = self
            .store
            .append(NewLedgerEntry {
                wallet_account_id: wallet_id,
                signed_amount_cents,
                reason,
                related_payment_intent_id,
                idempotency_key: idempotency_key.to_string(),
            })
            .await?;

        match outcome {
            AppendOutcome::Appended(entry) => {
                metrics::record_ledger_entry(reason);
                info!(
                    wallet_id = %wallet_id,
                    amount_cents = signed_amount_cents,
                    reason = %reason,
                    idempotency_key = %idempotency_key,
                    balance_after = entry.balance_after_cents,
                    "Ledger entry appended"
                );
                Ok(entry)
            }
            AppendOutcome::Duplicate(existing) => {
                debug!(
                    wallet_id = %wallet_id,
                    idempotency_key = %idempotency_key,
                    "Ledger entry already recorded"
                );
                Err(LedgerError::DuplicateEntry(existing))
            }
            AppendOutcome::InsufficientBalance { available } => {
                Err(LedgerError::InsufficientBalance {
                    available,
                    requested: amount_cents,
                })
            }
            AppendOutcome::BalanceOverflow { balance } => {
                warn!(
                    wallet_id = %wallet_id,
                    balance,
                    amount_cents,
                    idempotency_key = %idempotency_key,
                    "Ledger entry refused, balance would overflow"
                );
                Err(LedgerError::BalanceOverflow {
                    wallet_id,
                    balance,
                    amount: amount_cents,
                })
            }
        }
    }

    /// Current balance. Served from the materialized running balance; on a cache
    /// miss it is recomputed from the entries.
    pub async fn balance(&self, wallet_id: Uuid) -> Result<i64, LedgerError> {
        match self.store.cached_balance(wallet_id).await? {
            Some(balance) => Ok(balance),
            None => self.recompute_balance(wallet_id).await,
        }
    }

    pub async fn recompute_balance(&self, wallet_id: Uuid) -> Result<i64, LedgerError> {
        Ok(self.store.sum_entries(wallet_id).await?)
    }

    /// Zero for owners who never had a balance-affecting event.
    pub async fn balance_for_owner(&self, owner_id: &str, currency: &str) -> Result<i64, LedgerError> {
        match self.store.find_account(owner_id, currency).await? {
            Some(account) => self.balance(account.id).await,
            None => Ok(0),
        }
    }

    pub async fn entries(
        &self,
        wallet_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.store.list_entries(wallet_id, limit, offset).await?)
    }

    pub async fn find_entry(&self, idempotency_key: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        Ok(self.store.find_by_key(idempotency_key).await?)
    }

    /// Compares every wallet's materialized balance with the sum of its entries.
    pub async fn audit(&self) -> Result<LedgerAuditReport, LedgerError> {
        let accounts = self.store.list_accounts().await?;
        info!("Auditing {} wallet(s)", accounts.len());

        let mut discrepancies = Vec::new();
        for account in &accounts {
            let cached = self.store.cached_balance(account.id).await?;
            let computed = self.store.sum_entries(account.id).await?;

            if cached != Some(computed) || computed < 0 {
                warn!(
                    wallet_id = %account.id,
                    cached = ?cached,
                    computed,
                    "Wallet balance discrepancy"
                );
                discrepancies.push(BalanceDiscrepancy {
                    wallet_id: account.id,
                    owner_id: account.owner_id.clone(),
                    currency: account.currency.clone(),
                    cached_balance_cents: cached,
                    computed_balance_cents: computed,
                });
            }
        }

        Ok(LedgerAuditReport {
            generated_at: Utc::now(),
            wallets_checked: accounts.len(),
            discrepancies,
        })
    }
}
