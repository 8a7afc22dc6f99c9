//! Postgres-backed implementations of the storage ports.

use crate::db::queries;
use crate::domain::{
    LedgerEntry, NewLedgerEntry, PaymentIntent, PaymentMethod, PaymentPurpose, PaymentStatus,
    WalletAccount,
};
use crate::ports::{AppendOutcome, LedgerStore, PaymentIntentRepository, RepositoryError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn get_or_create_account(
        &self,
        owner_id: &str,
        currency: &str,
    ) -> Result<WalletAccount, RepositoryError> {
        let row =
            queries::upsert_wallet_account(&self.pool, Uuid::new_v4(), owner_id, currency).await?;
        Ok(row.into())
    }

    async fn find_account(
        &self,
        owner_id: &str,
        currency: &str,
    ) -> Result<Option<WalletAccount>, RepositoryError> {
        let row = queries::find_wallet_account(&self.pool, owner_id, currency).await?;
        Ok(row.map(Into::into))
    }

    async fn get_account(&self, wallet_id: Uuid) -> Result<Option<WalletAccount>, RepositoryError> {
        let row = queries::get_wallet_account(&self.pool, wallet_id).await?;
        Ok(row.map(Into::into))
    }

    async fn list_accounts(&self) -> Result<Vec<WalletAccount>, RepositoryError> {
        let rows = queries::list_wallet_accounts(&self.pool).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn append(&self, entry: NewLedgerEntry) -> Result<AppendOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Serializes every writer of this wallet until commit.
        let balance = queries::lock_wallet_balance(&mut *tx, entry.wallet_account_id)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => RepositoryError::NotFound(format!(
                    "Wallet {} not found",
                    entry.wallet_account_id
                )),
                other => other.into(),
            })?;

        if let Some(existing) =
            queries::find_ledger_entry_by_key(&mut *tx, &entry.idempotency_key).await?
        {
            tx.rollback().await?;
            return Ok(AppendOutcome::Duplicate(existing.try_into()?));
        }

        let Some(balance_after) = balance.checked_add(entry.signed_amount_cents) else {
            tx.rollback().await?;
            return Ok(AppendOutcome::BalanceOverflow { balance });
        };
        if balance_after < 0 {
            tx.rollback().await?;
            return Ok(AppendOutcome::InsufficientBalance { available: balance });
        }

        let key = entry.idempotency_key.clone();
        let record = entry.into_entry(balance_after);
        let inserted = queries::insert_ledger_entry(&mut *tx, &record).await?;

        match inserted {
            Some(row) => {
                queries::set_wallet_balance(&mut *tx, record.wallet_account_id, balance_after)
                    .await?;
                tx.commit().await?;
                Ok(AppendOutcome::Appended(row.try_into()?))
            }
            None => {
                // Same key written for another wallet between our check and insert.
                tx.rollback().await?;
                let existing = queries::find_ledger_entry_by_key(&self.pool, &key)
                    .await?
                    .ok_or_else(|| RepositoryError::NotFound(key.clone()))?;
                Ok(AppendOutcome::Duplicate(existing.try_into()?))
            }
        }
    }

    async fn find_by_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<LedgerEntry>, RepositoryError> {
        queries::find_ledger_entry_by_key(&self.pool, idempotency_key)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn cached_balance(&self, wallet_id: Uuid) -> Result<Option<i64>, RepositoryError> {
        let row = queries::get_wallet_account(&self.pool, wallet_id).await?;
        Ok(row.map(|r| r.balance_cents))
    }

    async fn sum_entries(&self, wallet_id: Uuid) -> Result<i64, RepositoryError> {
        Ok(queries::sum_ledger_entries(&self.pool, wallet_id).await?)
    }

    async fn list_entries(
        &self,
        wallet_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerEntry>, RepositoryError> {
        queries::list_ledger_entries(&self.pool, wallet_id, limit, offset)
            .await?
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }
}

#[derive(Clone)]
pub struct PgPaymentIntentRepository {
    pool: PgPool,
}

impl PgPaymentIntentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentIntentRepository for PgPaymentIntentRepository {
    async fn insert(&self, intent: &PaymentIntent) -> Result<(), RepositoryError> {
        Ok(queries::insert_payment_intent(&self.pool, intent).await?)
    }

    async fn get(&self, id: Uuid) -> Result<Option<PaymentIntent>, RepositoryError> {
        queries::get_payment_intent(&self.pool, id)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn find_by_gateway_reference(
        &self,
        method: PaymentMethod,
        reference: &str,
    ) -> Result<Option<PaymentIntent>, RepositoryError> {
        queries::find_payment_intent_by_reference(&self.pool, method.as_str(), reference)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn find_for_subject(
        &self,
        purpose: PaymentPurpose,
        subject_id: &str,
    ) -> Result<Vec<PaymentIntent>, RepositoryError> {
        queries::find_payment_intents_for_subject(&self.pool, purpose.as_str(), subject_id)
            .await?
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }

    async fn update_if_status(
        &self,
        intent: &PaymentIntent,
        expected: PaymentStatus,
    ) -> Result<bool, RepositoryError> {
        let rows = queries::update_payment_intent_if_status(&self.pool, intent, expected).await?;
        Ok(rows == 1)
    }

    async fn list_stale(
        &self,
        now: DateTime<Utc>,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentIntent>, RepositoryError> {
        queries::list_stale_payment_intents(&self.pool, now, created_before, limit)
            .await?
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }

    async fn list_unsettled(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentIntent>, RepositoryError> {
        queries::list_unsettled_payment_intents(&self.pool, now, limit)
            .await?
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }

    async fn record_settle_failure(
        &self,
        id: Uuid,
        status: PaymentStatus,
        attempts: i32,
        next_settle_at: Option<DateTime<Utc>>,
        error: &str,
    ) -> Result<(), RepositoryError> {
        Ok(queries::record_payment_intent_settle_failure(
            &self.pool,
            id,
            status,
            attempts,
            next_settle_at,
            error,
        )
        .await?)
    }

    async fn list_parked(&self, limit: i64) -> Result<Vec<PaymentIntent>, RepositoryError> {
        queries::list_parked_payment_intents(&self.pool, limit)
            .await?
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }

    async fn mark_settled(
        &self,
        id: Uuid,
        status: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        Ok(queries::mark_payment_intent_settled(&self.pool, id, status, at).await?)
    }

    async fn list_for_owner(
        &self,
        owner_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PaymentIntent>, RepositoryError> {
        queries::list_payment_intents_for_owner(&self.pool, owner_id, limit, offset)
            .await?
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }
}
