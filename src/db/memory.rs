//! In-process storage adapters. Used by the test suite and by local runs
//! without a database; each store serializes its writers behind one mutex.

use crate::domain::{
    LedgerEntry, NewLedgerEntry, PaymentIntent, PaymentMethod, PaymentPurpose, PaymentStatus,
    WalletAccount,
};
use crate::ports::{AppendOutcome, LedgerStore, PaymentIntentRepository, RepositoryError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<Uuid, WalletAccount>,
    balances: HashMap<Uuid, i64>,
    entries: Vec<LedgerEntry>,
    by_key: HashMap<String, usize>,
}

#[derive(Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<LedgerState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LedgerState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Database("ledger state poisoned".to_string()))
    }

    /// Drops the materialized balance of a wallet, forcing the next read to sum entries.
    pub fn evict_cached_balance(&self, wallet_id: Uuid) {
        if let Ok(mut state) = self.state.lock() {
            state.balances.remove(&wallet_id);
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn get_or_create_account(
        &self,
        owner_id: &str,
        currency: &str,
    ) -> Result<WalletAccount, RepositoryError> {
        let mut state = self.lock()?;
        if let Some(existing) = state
            .accounts
            .values()
            .find(|a| a.owner_id == owner_id && a.currency == currency)
        {
            return Ok(existing.clone());
        }

        let account = WalletAccount::new(owner_id, currency);
        state.balances.insert(account.id, 0);
        state.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn find_account(
        &self,
        owner_id: &str,
        currency: &str,
    ) -> Result<Option<WalletAccount>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .accounts
            .values()
            .find(|a| a.owner_id == owner_id && a.currency == currency)
            .cloned())
    }

    async fn get_account(&self, wallet_id: Uuid) -> Result<Option<WalletAccount>, RepositoryError> {
        Ok(self.lock()?.accounts.get(&wallet_id).cloned())
    }

    async fn list_accounts(&self) -> Result<Vec<WalletAccount>, RepositoryError> {
        let mut accounts: Vec<_> = self.lock()?.accounts.values().cloned().collect();
        accounts.sort_by_key(|a| a.created_at);
        Ok(accounts)
    }

    async fn append(&self, entry: NewLedgerEntry) -> Result<AppendOutcome, RepositoryError> {
        let mut state = self.lock()?;

        if !state.accounts.contains_key(&entry.wallet_account_id) {
            return Err(RepositoryError::NotFound(format!(
                "Wallet {} not found",
                entry.wallet_account_id
            )));
        }

        if let Some(&idx) = state.by_key.get(&entry.idempotency_key) {
            return Ok(AppendOutcome::Duplicate(state.entries[idx].clone()));
        }

        let wallet_id = entry.wallet_account_id;
        let balance = match state.balances.get(&wallet_id) {
            Some(b) => *b,
            None => state
                .entries
                .iter()
                .filter(|e| e.wallet_account_id == wallet_id)
                .map(|e| e.signed_amount_cents)
                .sum(),
        };

        let Some(balance_after) = balance.checked_add(entry.signed_amount_cents) else {
            return Ok(AppendOutcome::BalanceOverflow { balance });
        };
        if balance_after < 0 {
            return Ok(AppendOutcome::InsufficientBalance { available: balance });
        }

        let record = entry.into_entry(balance_after);
        let idx = state.entries.len();
        state.by_key.insert(record.idempotency_key.clone(), idx);
        state.entries.push(record.clone());
        state.balances.insert(wallet_id, balance_after);
        Ok(AppendOutcome::Appended(record))
    }

    async fn find_by_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<LedgerEntry>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .by_key
            .get(idempotency_key)
            .map(|&idx| state.entries[idx].clone()))
    }

    async fn cached_balance(&self, wallet_id: Uuid) -> Result<Option<i64>, RepositoryError> {
        Ok(self.lock()?.balances.get(&wallet_id).copied())
    }

    async fn sum_entries(&self, wallet_id: Uuid) -> Result<i64, RepositoryError> {
        Ok(self
            .lock()?
            .entries
            .iter()
            .filter(|e| e.wallet_account_id == wallet_id)
            .map(|e| e.signed_amount_cents)
            .sum())
    }

    async fn list_entries(
        &self,
        wallet_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerEntry>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .entries
            .iter()
            .rev()
            .filter(|e| e.wallet_account_id == wallet_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryPaymentIntentRepository {
    intents: Mutex<HashMap<Uuid, PaymentIntent>>,
}

impl InMemoryPaymentIntentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, PaymentIntent>>, RepositoryError> {
        self.intents
            .lock()
            .map_err(|_| RepositoryError::Database("intent state poisoned".to_string()))
    }

    fn sorted(mut intents: Vec<PaymentIntent>, newest_first: bool) -> Vec<PaymentIntent> {
        intents.sort_by_key(|i| i.created_at);
        if newest_first {
            intents.reverse();
        }
        intents
    }
}

#[async_trait]
impl PaymentIntentRepository for InMemoryPaymentIntentRepository {
    async fn insert(&self, intent: &PaymentIntent) -> Result<(), RepositoryError> {
        let mut intents = self.lock()?;
        if intents.contains_key(&intent.id) {
            return Err(RepositoryError::Database(format!(
                "duplicate payment intent {}",
                intent.id
            )));
        }
        let live = |i: &PaymentIntent| !i.status.is_terminal() || i.status == PaymentStatus::Paid;
        if intent.purpose == PaymentPurpose::CampaignPublicationFee
            && live(intent)
            && intents.values().any(|other| {
                other.purpose == intent.purpose && other.subject_id == intent.subject_id && live(other)
            })
        {
            return Err(RepositoryError::Database(format!(
                "campaign {} already has a live payment intent",
                intent.subject_id.as_deref().unwrap_or_default()
            )));
        }
        intents.insert(intent.id, intent.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PaymentIntent>, RepositoryError> {
        Ok(self.lock()?.get(&id).cloned())
    }

    async fn find_by_gateway_reference(
        &self,
        method: PaymentMethod,
        reference: &str,
    ) -> Result<Option<PaymentIntent>, RepositoryError> {
        Ok(self
            .lock()?
            .values()
            .find(|i| i.method == method && i.gateway_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn find_for_subject(
        &self,
        purpose: PaymentPurpose,
        subject_id: &str,
    ) -> Result<Vec<PaymentIntent>, RepositoryError> {
        let matching = self
            .lock()?
            .values()
            .filter(|i| i.purpose == purpose && i.subject_id.as_deref() == Some(subject_id))
            .cloned()
            .collect();
        Ok(Self::sorted(matching, true))
    }

    async fn update_if_status(
        &self,
        intent: &PaymentIntent,
        expected: PaymentStatus,
    ) -> Result<bool, RepositoryError> {
        let mut intents = self.lock()?;
        match intents.get_mut(&intent.id) {
            Some(stored) if stored.status == expected => {
                *stored = intent.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound(format!(
                "Payment intent {} not found",
                intent.id
            ))),
        }
    }

    async fn list_stale(
        &self,
        now: DateTime<Utc>,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentIntent>, RepositoryError> {
        let stale = self
            .lock()?
            .values()
            .filter(|i| !i.status.is_terminal())
            .filter(|i| i.is_expired(now) || i.created_at <= created_before)
            .cloned()
            .collect();
        Ok(Self::sorted(stale, false)
            .into_iter()
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn list_unsettled(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentIntent>, RepositoryError> {
        let mut unsettled: Vec<_> = self
            .lock()?
            .values()
            .filter(|i| i.settlement_due(now))
            .cloned()
            .collect();
        unsettled.sort_by_key(|i| (i.next_settle_at.unwrap_or(i.updated_at), i.updated_at));
        Ok(unsettled.into_iter().take(limit.max(0) as usize).collect())
    }

    async fn record_settle_failure(
        &self,
        id: Uuid,
        status: PaymentStatus,
        attempts: i32,
        next_settle_at: Option<DateTime<Utc>>,
        error: &str,
    ) -> Result<(), RepositoryError> {
        match self.lock()?.get_mut(&id) {
            Some(intent) => {
                if intent.status == status && intent.settled_at.is_none() {
                    intent.settle_attempts = attempts;
                    intent.next_settle_at = next_settle_at;
                    intent.settle_error = Some(error.to_string());
                }
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!(
                "Payment intent {} not found",
                id
            ))),
        }
    }

    async fn list_parked(&self, limit: i64) -> Result<Vec<PaymentIntent>, RepositoryError> {
        let mut parked: Vec<_> = self
            .lock()?
            .values()
            .filter(|i| i.status.is_terminal() && i.is_settlement_parked())
            .cloned()
            .collect();
        parked.sort_by_key(|i| i.updated_at);
        Ok(parked.into_iter().take(limit.max(0) as usize).collect())
    }

    async fn mark_settled(
        &self,
        id: Uuid,
        status: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        match self.lock()?.get_mut(&id) {
            Some(intent) => {
                if intent.status == status {
                    intent.settled_at = Some(at);
                }
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!(
                "Payment intent {} not found",
                id
            ))),
        }
    }

    async fn list_for_owner(
        &self,
        owner_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PaymentIntent>, RepositoryError> {
        let owned = self
            .lock()?
            .values()
            .filter(|i| i.owner_id == owner_id)
            .cloned()
            .collect();
        Ok(Self::sorted(owned, true)
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{compute_split, EntryReason, SplitRequest};

    fn new_entry(wallet: Uuid, amount: i64, key: &str) -> NewLedgerEntry {
        NewLedgerEntry {
            wallet_account_id: wallet,
            signed_amount_cents: amount,
            reason: EntryReason::Deposit,
            related_payment_intent_id: None,
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_append_rejects_overdraft_without_writing() {
        let store = InMemoryLedgerStore::new();
        let wallet = store.get_or_create_account("u1", "BRL").await.unwrap();

        store.append(new_entry(wallet.id, 500, "a")).await.unwrap();
        let outcome = store.append(new_entry(wallet.id, -600, "b")).await.unwrap();

        assert_eq!(outcome, AppendOutcome::InsufficientBalance { available: 500 });
        assert!(store.find_by_key("b").await.unwrap().is_none());
        assert_eq!(store.sum_entries(wallet.id).await.unwrap(), 500);
    }

    #[tokio::test]
    async fn test_evicted_cache_falls_back_to_entries() {
        let store = InMemoryLedgerStore::new();
        let wallet = store.get_or_create_account("u1", "BRL").await.unwrap();
        store.append(new_entry(wallet.id, 300, "a")).await.unwrap();

        store.evict_cached_balance(wallet.id);
        assert_eq!(store.cached_balance(wallet.id).await.unwrap(), None);

        let outcome = store.append(new_entry(wallet.id, -100, "b")).await.unwrap();
        match outcome {
            AppendOutcome::Appended(entry) => assert_eq!(entry.balance_after_cents, 200),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_append_overflow_is_reported_without_poisoning() {
        let store = InMemoryLedgerStore::new();
        let wallet = store.get_or_create_account("u1", "BRL").await.unwrap();
        store.append(new_entry(wallet.id, i64::MAX, "a")).await.unwrap();

        let outcome = store.append(new_entry(wallet.id, 1, "b")).await.unwrap();

        assert_eq!(outcome, AppendOutcome::BalanceOverflow { balance: i64::MAX });
        assert!(store.find_by_key("b").await.unwrap().is_none());
        assert_eq!(store.cached_balance(wallet.id).await.unwrap(), Some(i64::MAX));
    }

    #[tokio::test]
    async fn test_append_to_unknown_wallet_fails() {
        let store = InMemoryLedgerStore::new();
        let result = store.append(new_entry(Uuid::new_v4(), 100, "a")).await;
        assert!(matches!(result, Err(RepositoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_compare_and_swap_rejects_stale_status() {
        let repo = InMemoryPaymentIntentRepository::new();
        let split = compute_split(&SplitRequest {
            requested_amount_cents: 100,
            available_balance_cents: 0,
            use_wallet: false,
            wallet_cap_cents: None,
            method: PaymentMethod::Pix,
        });
        let mut intent =
            PaymentIntent::new("u1", PaymentPurpose::WalletDeposit, None, "BRL", &split);
        repo.insert(&intent).await.unwrap();

        intent
            .transition(PaymentStatus::AwaitingGateway, Utc::now())
            .unwrap();
        assert!(repo
            .update_if_status(&intent, PaymentStatus::Created)
            .await
            .unwrap());
        assert!(!repo
            .update_if_status(&intent, PaymentStatus::Created)
            .await
            .unwrap());
    }
}
