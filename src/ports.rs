//! Boundaries of the checkout core.
//!
//! Storage and the external collaborators are reached only through these traits, so the
//! coordinator can run against Postgres in production and in-memory adapters in tests.

use crate::domain::{
    CampaignSnapshot, LedgerEntry, NewLedgerEntry, PaymentIntent, PaymentMethod, PaymentPurpose,
    PaymentStatus, WalletAccount,
};
use crate::events::PaymentResolved;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("row not found".to_string()),
            other => RepositoryError::Database(other.to_string()),
        }
    }
}

/// Result of appending to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended(LedgerEntry),
    /// The idempotency key was already recorded; nothing was written.
    Duplicate(LedgerEntry),
    /// A debit would take the balance below zero; nothing was written.
    InsufficientBalance { available: i64 },
    /// A credit would push the balance past `i64::MAX`; nothing was written.
    BalanceOverflow { balance: i64 },
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_or_create_account(
        &self,
        owner_id: &str,
        currency: &str,
    ) -> Result<WalletAccount, RepositoryError>;

    async fn find_account(
        &self,
        owner_id: &str,
        currency: &str,
    ) -> Result<Option<WalletAccount>, RepositoryError>;

    async fn get_account(&self, wallet_id: Uuid) -> Result<Option<WalletAccount>, RepositoryError>;

    async fn list_accounts(&self) -> Result<Vec<WalletAccount>, RepositoryError>;

    /// Appends one entry. The idempotency check, the funds check for debits, the
    /// insert and the cached-balance update happen atomically.
    async fn append(&self, entry: NewLedgerEntry) -> Result<AppendOutcome, RepositoryError>;

    async fn find_by_key(&self, idempotency_key: &str)
        -> Result<Option<LedgerEntry>, RepositoryError>;

    /// Materialized running balance, if one is stored for the wallet.
    async fn cached_balance(&self, wallet_id: Uuid) -> Result<Option<i64>, RepositoryError>;

    async fn sum_entries(&self, wallet_id: Uuid) -> Result<i64, RepositoryError>;

    async fn list_entries(
        &self,
        wallet_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerEntry>, RepositoryError>;
}

#[async_trait]
pub trait PaymentIntentRepository: Send + Sync {
    async fn insert(&self, intent: &PaymentIntent) -> Result<(), RepositoryError>;

    async fn get(&self, id: Uuid) -> Result<Option<PaymentIntent>, RepositoryError>;

    async fn find_by_gateway_reference(
        &self,
        method: PaymentMethod,
        reference: &str,
    ) -> Result<Option<PaymentIntent>, RepositoryError>;

    /// Intents for one subject (campaign), newest first.
    async fn find_for_subject(
        &self,
        purpose: PaymentPurpose,
        subject_id: &str,
    ) -> Result<Vec<PaymentIntent>, RepositoryError>;

    /// Compare-and-swap: writes `intent` only if the stored status is still `expected`.
    /// Returns `false` when another writer got there first.
    async fn update_if_status(
        &self,
        intent: &PaymentIntent,
        expected: PaymentStatus,
    ) -> Result<bool, RepositoryError>;

    /// Non-terminal intents whose `expires_at` has passed or that were created
    /// before `created_before`.
    async fn list_stale(
        &self,
        now: DateTime<Utc>,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentIntent>, RepositoryError>;

    /// Terminal intents whose side effects are due at `now`: never attempted, or
    /// past their retry time. Ordered by retry time, then age. Parked intents are
    /// left out.
    async fn list_unsettled(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentIntent>, RepositoryError>;

    /// Records a failed settlement attempt for `status`. `next_settle_at: None`
    /// parks the intent. A no-op if the intent has moved on or settled since.
    async fn record_settle_failure(
        &self,
        id: Uuid,
        status: PaymentStatus,
        attempts: i32,
        next_settle_at: Option<DateTime<Utc>>,
        error: &str,
    ) -> Result<(), RepositoryError>;

    /// Intents whose side effects were given up on, oldest first.
    async fn list_parked(&self, limit: i64) -> Result<Vec<PaymentIntent>, RepositoryError>;

    /// Records that the side effects of `status` were applied. A no-op if the intent
    /// has moved on to another status since.
    async fn mark_settled(
        &self,
        id: Uuid,
        status: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn list_for_owner(
        &self,
        owner_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PaymentIntent>, RepositoryError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Campaign not found: {0}")]
    NotFound(String),
    #[error("Campaign service unavailable: {0}")]
    Unavailable(String),
    #[error("Campaign service rejected the request: {0}")]
    Rejected(String),
}

/// The web application's campaign module, reached through a narrow interface.
#[async_trait]
pub trait CampaignDirectory: Send + Sync {
    async fn get_campaign(&self, campaign_id: &str) -> Result<CampaignSnapshot, CollaboratorError>;

    async fn get_publication_fee(&self, campaign_id: &str) -> Result<i64, CollaboratorError> {
        Ok(self.get_campaign(campaign_id).await?.publication_fee_cents)
    }

    /// Idempotent: marking an already-pending-review campaign succeeds.
    async fn mark_pending_review(&self, campaign_id: &str) -> Result<(), CollaboratorError>;

    async fn revert_to_draft(&self, campaign_id: &str) -> Result<(), CollaboratorError>;
}

/// Fire-and-forget sink for user-facing payment notifications.
pub trait NotificationSink: Send + Sync {
    fn payment_resolved(&self, event: PaymentResolved);
}
