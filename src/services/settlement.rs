//! Side effects of terminal payment states.
//!
//! Every effect is keyed by the intent id, so running [`Settlement::apply`] twice for
//! the same intent and status changes nothing the second time. The coordinator runs
//! it right after a transition commits and the sweeper re-runs it for intents whose
//! effects did not all go through.

use crate::domain::{
    EntryReason, IdempotencyKey, LedgerEntry, PaymentIntent, PaymentPurpose, PaymentStatus,
};
use crate::ports::{CampaignDirectory, CollaboratorError};
use crate::services::ledger::{Ledger, LedgerError};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Campaign(#[from] CollaboratorError),
    #[error("Payment intent {0} has no campaign attached")]
    MissingSubject(Uuid),
}

impl SettlementError {
    /// Errors that retrying will not fix without someone stepping in.
    pub fn is_permanent(&self) -> bool {
        match self {
            SettlementError::Ledger(
                LedgerError::Repository(_) | LedgerError::InsufficientBalance { .. },
            ) => false,
            SettlementError::Campaign(CollaboratorError::Unavailable(_)) => false,
            _ => true,
        }
    }
}

#[derive(Clone)]
pub struct Settlement {
    ledger: Ledger,
    campaigns: Arc<dyn CampaignDirectory>,
}

/// A replayed ledger write is as good as the first one.
fn already_applied(result: Result<LedgerEntry, LedgerError>) -> Result<LedgerEntry, LedgerError> {
    match result {
        Ok(entry) | Err(LedgerError::DuplicateEntry(entry)) => Ok(entry),
        Err(err) => Err(err),
    }
}

impl Settlement {
    pub fn new(ledger: Ledger, campaigns: Arc<dyn CampaignDirectory>) -> Self {
        Self { ledger, campaigns }
    }

    pub async fn apply(&self, intent: &PaymentIntent) -> Result<(), SettlementError> {
        match (intent.status, intent.purpose) {
            (PaymentStatus::Paid, PaymentPurpose::CampaignPublicationFee) => {
                let campaign_id = subject(intent)?;
                self.campaigns.mark_pending_review(campaign_id).await?;
                info!(payment_id = %intent.id, campaign_id, "Campaign submitted for review");
            }
            (PaymentStatus::Paid, PaymentPurpose::WalletDeposit) => {
                self.credit_deposit(intent).await?;
            }
            (PaymentStatus::Failed | PaymentStatus::Canceled, _) => {
                self.release_reservation(intent).await?;
            }
            (PaymentStatus::Refunded, PaymentPurpose::CampaignPublicationFee) => {
                self.refund_wallet_portion(intent).await?;
                let campaign_id = subject(intent)?;
                self.campaigns.revert_to_draft(campaign_id).await?;
                info!(payment_id = %intent.id, campaign_id, "Campaign reverted to draft");
            }
            (PaymentStatus::Refunded, PaymentPurpose::WalletDeposit) => {
                self.reverse_deposit(intent).await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Debits the wallet portion of a checkout. Safe to call again for the same intent.
    pub async fn reserve_wallet(&self, intent: &PaymentIntent) -> Result<LedgerEntry, LedgerError> {
        let wallet = self
            .ledger
            .open_account(&intent.owner_id, &intent.currency)
            .await?;
        let key = IdempotencyKey::WalletDebit(intent.id).as_string();
        already_applied(
            self.ledger
                .debit(
                    wallet.id,
                    intent.wallet_applied_cents,
                    EntryReason::CampaignPayment,
                    &key,
                    Some(intent.id),
                )
                .await,
        )
    }

    /// Returns the reserved wallet amount of a payment that did not complete.
    /// Nothing happens when no reservation was ever recorded.
    pub async fn release_reservation(
        &self,
        intent: &PaymentIntent,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        self.compensate_debit(intent, IdempotencyKey::WalletRelease(intent.id))
            .await
    }

    pub async fn refund_wallet_portion(
        &self,
        intent: &PaymentIntent,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        self.compensate_debit(intent, IdempotencyKey::Refund(intent.id))
            .await
    }

    async fn compensate_debit(
        &self,
        intent: &PaymentIntent,
        key: IdempotencyKey,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        let debit_key = IdempotencyKey::WalletDebit(intent.id).as_string();
        let Some(debit) = self.ledger.find_entry(&debit_key).await? else {
            debug!(payment_id = %intent.id, "No wallet reservation to compensate");
            return Ok(None);
        };

        let entry = already_applied(
            self.ledger
                .credit(
                    debit.wallet_account_id,
                    -debit.signed_amount_cents,
                    EntryReason::Refund,
                    &key.as_string(),
                    Some(intent.id),
                )
                .await,
        )?;
        Ok(Some(entry))
    }

    pub async fn credit_deposit(&self, intent: &PaymentIntent) -> Result<LedgerEntry, LedgerError> {
        let wallet = self
            .ledger
            .open_account(&intent.owner_id, &intent.currency)
            .await?;
        let key = IdempotencyKey::Deposit(intent.id).as_string();
        already_applied(
            self.ledger
                .credit(
                    wallet.id,
                    intent.gateway_amount_cents,
                    EntryReason::Deposit,
                    &key,
                    Some(intent.id),
                )
                .await,
        )
    }

    /// Checks that a deposit could be taken back out of the wallet right now.
    /// Passes when the deposit was never credited or is already reversed.
    pub async fn ensure_deposit_reversible(&self, intent: &PaymentIntent) -> Result<(), LedgerError> {
        let deposit_key = IdempotencyKey::Deposit(intent.id).as_string();
        let Some(deposit) = self.ledger.find_entry(&deposit_key).await? else {
            return Ok(());
        };
        let reversal_key = IdempotencyKey::DepositReversal(intent.id).as_string();
        if self.ledger.find_entry(&reversal_key).await?.is_some() {
            return Ok(());
        }

        let available = self.ledger.balance(deposit.wallet_account_id).await?;
        if available < deposit.signed_amount_cents {
            return Err(LedgerError::InsufficientBalance {
                available,
                requested: deposit.signed_amount_cents,
            });
        }
        Ok(())
    }

    /// Takes a refunded deposit back out of the wallet. Fails with
    /// `InsufficientBalance` if the money has already been spent.
    pub async fn reverse_deposit(
        &self,
        intent: &PaymentIntent,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        let deposit_key = IdempotencyKey::Deposit(intent.id).as_string();
        let Some(deposit) = self.ledger.find_entry(&deposit_key).await? else {
            return Ok(None);
        };

        let key = IdempotencyKey::DepositReversal(intent.id).as_string();
        let entry = already_applied(
            self.ledger
                .debit(
                    deposit.wallet_account_id,
                    deposit.signed_amount_cents,
                    EntryReason::Withdrawal,
                    &key,
                    Some(intent.id),
                )
                .await,
        )?;
        Ok(Some(entry))
    }
}

fn subject(intent: &PaymentIntent) -> Result<&str, SettlementError> {
    intent
        .subject_id
        .as_deref()
        .ok_or(SettlementError::MissingSubject(intent.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaigns::InMemoryCampaigns;
    use crate::db::InMemoryLedgerStore;
    use crate::domain::{compute_split, CampaignStatus, PaymentMethod, SplitRequest};
    use crate::ports::RepositoryError;
    use chrono::Utc;

    fn setup() -> (Settlement, Ledger, Arc<InMemoryCampaigns>) {
        let ledger = Ledger::new(Arc::new(InMemoryLedgerStore::new()));
        let campaigns = Arc::new(InMemoryCampaigns::new());
        (
            Settlement::new(ledger.clone(), campaigns.clone()),
            ledger,
            campaigns,
        )
    }

    fn fee_intent(balance: i64, fee: i64) -> PaymentIntent {
        let split = compute_split(&SplitRequest {
            requested_amount_cents: fee,
            available_balance_cents: balance,
            use_wallet: true,
            wallet_cap_cents: None,
            method: PaymentMethod::Pix,
        });
        PaymentIntent::new(
            "creator-1",
            PaymentPurpose::CampaignPublicationFee,
            Some("42".to_string()),
            "BRL",
            &split,
        )
    }

    async fn fund(ledger: &Ledger, amount: i64) {
        let wallet = ledger.open_account("creator-1", "BRL").await.unwrap();
        ledger
            .credit(wallet.id, amount, EntryReason::Deposit, "seed", None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_release_returns_reserved_amount_once() {
        let (settlement, ledger, _) = setup();
        fund(&ledger, 1000).await;
        let mut intent = fee_intent(1000, 1500);

        settlement.reserve_wallet(&intent).await.unwrap();
        assert_eq!(ledger.balance_for_owner("creator-1", "BRL").await.unwrap(), 0);

        intent.fail("declined", Utc::now()).unwrap();
        settlement.apply(&intent).await.unwrap();
        settlement.apply(&intent).await.unwrap();

        assert_eq!(
            ledger.balance_for_owner("creator-1", "BRL").await.unwrap(),
            1000
        );
    }

    #[tokio::test]
    async fn test_release_without_reservation_is_noop() {
        let (settlement, ledger, _) = setup();
        let intent = fee_intent(0, 1500);

        assert!(settlement.release_reservation(&intent).await.unwrap().is_none());
        assert!(ledger.find_account("creator-1", "BRL").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_paid_fee_marks_campaign_for_review() {
        let (settlement, _, campaigns) = setup();
        campaigns.insert("42", "creator-1", CampaignStatus::Draft, 1500);
        let mut intent = fee_intent(0, 1500);
        intent
            .transition(PaymentStatus::Paid, Utc::now())
            .unwrap();

        settlement.apply(&intent).await.unwrap();

        assert_eq!(
            campaigns.status("42"),
            Some(CampaignStatus::PendingReview)
        );
    }

    #[tokio::test]
    async fn test_deposit_reversal_requires_funds() {
        let (settlement, ledger, _) = setup();
        let split = compute_split(&SplitRequest {
            requested_amount_cents: 800,
            available_balance_cents: 0,
            use_wallet: false,
            wallet_cap_cents: None,
            method: PaymentMethod::Pix,
        });
        let intent = PaymentIntent::new(
            "creator-1",
            PaymentPurpose::WalletDeposit,
            None,
            "BRL",
            &split,
        );

        let credit = settlement.credit_deposit(&intent).await.unwrap();
        ledger
            .debit(
                credit.wallet_account_id,
                500,
                EntryReason::CampaignPayment,
                "spend",
                None,
            )
            .await
            .unwrap();

        let err = settlement.ensure_deposit_reversible(&intent).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                available: 300,
                requested: 800
            }
        ));
        let err = settlement.reverse_deposit(&intent).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                available: 300,
                requested: 800
            }
        ));
    }

    #[test]
    fn test_outages_are_retryable_rejections_are_not() {
        let outage = SettlementError::Campaign(CollaboratorError::Unavailable("503".into()));
        let store = SettlementError::Ledger(LedgerError::Repository(
            RepositoryError::Database("connection reset".into()),
        ));
        let rejected = SettlementError::Campaign(CollaboratorError::Rejected("archived".into()));
        let missing = SettlementError::MissingSubject(Uuid::new_v4());

        assert!(!outage.is_permanent());
        assert!(!store.is_permanent());
        assert!(rejected.is_permanent());
        assert!(missing.is_permanent());
    }
}
