//! Reconciliation coordinator.
//!
//! The only component that moves payment intents between states. It ties the wallet
//! ledger, the gateways and the campaign module together so that a caller never
//! observes money moved without the matching state change, or the reverse.
//!
//! Ordering rule for every transition: the status compare-and-swap commits first,
//! then the side effects of the new status run. Side effects are idempotent and
//! tracked through `settled_at`, so a crash between the two is repaired by the sweep.
//! Failed side effects are retried with exponential backoff; permanent failures and
//! intents out of attempts are parked until an operator calls `retry_settlement`.

use crate::domain::{
    compute_split, GatewayKind, InvalidTransition, PaymentIntent, PaymentMethod,
    PaymentPurpose, PaymentSplit, PaymentStatus, SplitRequest, MAX_PAYMENT_CENTS,
};
use crate::events::PaymentResolved;
use crate::gateway::{
    ChargeRequest, GatewayAdapter, GatewayError, GatewayRegistry, GatewayStatus, MethodMetadata,
    WebhookNotification,
};
use crate::metrics;
use crate::ports::{
    CampaignDirectory, CollaboratorError, NotificationSink, PaymentIntentRepository,
    RepositoryError,
};
use crate::services::intent_locks::KeyedLocks;
use crate::services::ledger::{Ledger, LedgerError};
use crate::services::settlement::{Settlement, SettlementError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Insufficient wallet balance: available {available}, requested {requested}")]
    InsufficientBalance { available: i64, requested: i64 },
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("Payment declined: {0}")]
    GatewayRejected(String),
    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),
    #[error("No gateway configured for {0}")]
    GatewayNotConfigured(GatewayKind),
    #[error("Invalid webhook signature")]
    WebhookSignatureInvalid,
    #[error("Malformed webhook: {0}")]
    MalformedWebhook(String),
    #[error("Amount mismatch: expected {expected}, received {received}")]
    AmountMismatch { expected: i64, received: i64 },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Campaign {campaign_id} cannot be paid while {status}")]
    CampaignNotPayable {
        campaign_id: String,
        status: &'static str,
    },
    #[error("Campaign {0} is already paid")]
    AlreadyPaid(String),
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Payment intent {0} was modified concurrently")]
    Conflict(Uuid),
    #[error("Campaign service error: {0}")]
    Campaign(CollaboratorError),
    #[error(transparent)]
    Ledger(LedgerError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl CoordinatorError {
    /// Whether the same request may succeed if simply sent again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::GatewayUnavailable(_) | Self::Conflict(_) => true,
            Self::Campaign(CollaboratorError::Unavailable(_)) => true,
            Self::Repository(RepositoryError::Database(_)) => true,
            _ => false,
        }
    }
}

impl From<LedgerError> for CoordinatorError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientBalance {
                available,
                requested,
            } => Self::InsufficientBalance {
                available,
                requested,
            },
            LedgerError::Repository(e) => Self::Repository(e),
            other => Self::Ledger(other),
        }
    }
}

impl From<CollaboratorError> for CoordinatorError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::NotFound(id) => Self::NotFound(format!("Campaign {}", id)),
            other => Self::Campaign(other),
        }
    }
}

impl From<GatewayError> for CoordinatorError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable(reason) => Self::GatewayUnavailable(reason),
            GatewayError::Rejected(reason) => Self::GatewayRejected(reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub currency: String,
    /// Any non-terminal intent older than this is expired by the sweep.
    pub intent_ttl: chrono::Duration,
    pub gateway_timeout: Duration,
    pub sweep_batch_size: i64,
    /// Largest fee or deposit accepted in one payment.
    pub max_payment_cents: i64,
    /// Delay before the first settlement retry; doubles on every further failure.
    pub settle_retry_base: chrono::Duration,
    pub settle_retry_max: chrono::Duration,
    /// Failed settlements after which an intent is parked for an operator.
    pub max_settle_attempts: i32,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            currency: "BRL".to_string(),
            intent_ttl: chrono::Duration::hours(24),
            gateway_timeout: Duration::from_secs(10),
            sweep_batch_size: 100,
            max_payment_cents: MAX_PAYMENT_CENTS,
            settle_retry_base: chrono::Duration::seconds(30),
            settle_retry_max: chrono::Duration::hours(1),
            max_settle_attempts: 10,
        }
    }
}

impl CoordinatorSettings {
    /// Wait before retry number `attempts + 1`.
    pub fn settle_backoff(&self, attempts: i32) -> chrono::Duration {
        let exponent = attempts.saturating_sub(1).clamp(0, 20) as u32;
        let secs = self
            .settle_retry_base
            .num_seconds()
            .saturating_mul(1i64 << exponent)
            .min(self.settle_retry_max.num_seconds());
        chrono::Duration::seconds(secs)
    }
}

#[derive(Debug, Clone)]
pub struct CampaignCheckout {
    pub campaign_id: String,
    pub owner_id: String,
    pub use_wallet: bool,
    /// Upper bound on the wallet portion chosen by the user.
    pub wallet_amount_cents: Option<i64>,
    pub method: PaymentMethod,
    pub metadata: Option<MethodMetadata>,
    /// Fee the user was shown; rejected if the plan price changed since.
    pub expected_amount_cents: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct WalletDeposit {
    pub owner_id: String,
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub metadata: Option<MethodMetadata>,
}

#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub intent: PaymentIntent,
    /// Card challenge redirect, when the provider asks for one.
    pub action_url: Option<String>,
    /// The gateway could not be reached; the intent waits for `retry_gateway`.
    pub retry_pending: bool,
    /// An open intent for the same campaign was returned instead of a new one.
    pub reused: bool,
}

impl CheckoutOutcome {
    fn new(intent: PaymentIntent) -> Self {
        Self {
            intent,
            action_url: None,
            retry_pending: false,
            reused: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookOutcome {
    pub intent: PaymentIntent,
    /// `false` for replays and informational notifications.
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct StatusSnapshot {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub is_paid: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SweepReport {
    pub expired: usize,
    pub recovered_paid: usize,
    pub settled: usize,
    /// Settlements given up on during this sweep.
    pub parked: usize,
    pub errors: usize,
}

enum Expiry {
    Skipped,
    Expired,
    Paid,
}

pub struct ReconciliationCoordinator {
    ledger: Ledger,
    intents: Arc<dyn PaymentIntentRepository>,
    gateways: GatewayRegistry,
    campaigns: Arc<dyn CampaignDirectory>,
    notifier: Arc<dyn NotificationSink>,
    settlement: Settlement,
    locks: KeyedLocks,
    settings: CoordinatorSettings,
}

impl ReconciliationCoordinator {
    pub fn new(
        ledger: Ledger,
        intents: Arc<dyn PaymentIntentRepository>,
        gateways: GatewayRegistry,
        campaigns: Arc<dyn CampaignDirectory>,
        notifier: Arc<dyn NotificationSink>,
        settings: CoordinatorSettings,
    ) -> Self {
        let settlement = Settlement::new(ledger.clone(), campaigns.clone());
        Self {
            ledger,
            intents,
            gateways,
            campaigns,
            notifier,
            settlement,
            locks: KeyedLocks::new(),
            settings,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn gateways(&self) -> &GatewayRegistry {
        &self.gateways
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub async fn initiate_campaign_payment(
        &self,
        checkout: CampaignCheckout,
    ) -> Result<CheckoutOutcome, CoordinatorError> {
        if checkout.wallet_amount_cents.map(|c| c < 0).unwrap_or(false) {
            return Err(CoordinatorError::Validation(
                "wallet_amount_cents cannot be negative".to_string(),
            ));
        }
        if checkout
            .wallet_amount_cents
            .map(|c| c > self.settings.max_payment_cents)
            .unwrap_or(false)
        {
            return Err(CoordinatorError::Validation(format!(
                "wallet_amount_cents cannot exceed {}",
                self.settings.max_payment_cents
            )));
        }

        let campaign = self.campaigns.get_campaign(&checkout.campaign_id).await?;
        if campaign.owner_id != checkout.owner_id {
            return Err(CoordinatorError::Forbidden(format!(
                "campaign {} belongs to another user",
                campaign.id
            )));
        }

        let _subject = self.locks.acquire_subject(&campaign.id).await;

        let existing = self
            .intents
            .find_for_subject(PaymentPurpose::CampaignPublicationFee, &campaign.id)
            .await?;
        if existing.iter().any(PaymentIntent::is_paid) {
            return Err(CoordinatorError::AlreadyPaid(campaign.id));
        }
        if let Some(open) = existing.into_iter().find(|i| !i.status.is_terminal()) {
            info!(
                payment_id = %open.id,
                campaign_id = %campaign.id,
                "Returning open payment intent for campaign"
            );
            let retry_pending =
                open.status == PaymentStatus::AwaitingGateway && open.gateway_reference.is_none();
            return Ok(CheckoutOutcome {
                intent: open,
                action_url: None,
                retry_pending,
                reused: true,
            });
        }

        if !campaign.status.accepts_payment() {
            return Err(CoordinatorError::CampaignNotPayable {
                campaign_id: campaign.id,
                status: campaign.status.as_str(),
            });
        }

        let fee = campaign.publication_fee_cents;
        if fee < 0 {
            return Err(CoordinatorError::Validation(format!(
                "campaign {} has a negative publication fee",
                campaign.id
            )));
        }
        if fee > self.settings.max_payment_cents {
            return Err(CoordinatorError::Validation(format!(
                "campaign {} publication fee exceeds the {} limit",
                campaign.id, self.settings.max_payment_cents
            )));
        }
        if let Some(expected) = checkout.expected_amount_cents {
            if expected != fee {
                return Err(CoordinatorError::AmountMismatch {
                    expected: fee,
                    received: expected,
                });
            }
        }

        let use_wallet = checkout.use_wallet || checkout.method == PaymentMethod::WalletOnly;
        let available = if use_wallet {
            self.ledger
                .balance_for_owner(&checkout.owner_id, &self.settings.currency)
                .await?
        } else {
            0
        };

        let split = compute_split(&SplitRequest {
            requested_amount_cents: fee,
            available_balance_cents: available,
            use_wallet,
            wallet_cap_cents: checkout.wallet_amount_cents,
            method: checkout.method,
        });
        if split.method == PaymentMethod::WalletOnly && split.gateway_amount_cents > 0 {
            return Err(CoordinatorError::InsufficientBalance {
                available,
                requested: fee,
            });
        }

        self.open_intent(
            PaymentPurpose::CampaignPublicationFee,
            Some(campaign.id),
            &checkout.owner_id,
            split,
            checkout.metadata,
        )
        .await
    }

    pub async fn initiate_wallet_deposit(
        &self,
        deposit: WalletDeposit,
    ) -> Result<CheckoutOutcome, CoordinatorError> {
        if deposit.amount_cents <= 0 {
            return Err(CoordinatorError::Validation(
                "deposit amount must be positive".to_string(),
            ));
        }
        if deposit.amount_cents > self.settings.max_payment_cents {
            return Err(CoordinatorError::Validation(format!(
                "deposit amount cannot exceed {}",
                self.settings.max_payment_cents
            )));
        }
        if deposit.method == PaymentMethod::WalletOnly {
            return Err(CoordinatorError::Validation(
                "deposits must be paid through pix or card".to_string(),
            ));
        }

        let split = compute_split(&SplitRequest {
            requested_amount_cents: deposit.amount_cents,
            available_balance_cents: 0,
            use_wallet: false,
            wallet_cap_cents: None,
            method: deposit.method,
        });

        self.open_intent(
            PaymentPurpose::WalletDeposit,
            None,
            &deposit.owner_id,
            split,
            deposit.metadata,
        )
        .await
    }

    async fn open_intent(
        &self,
        purpose: PaymentPurpose,
        subject_id: Option<String>,
        owner_id: &str,
        split: PaymentSplit,
        metadata: Option<MethodMetadata>,
    ) -> Result<CheckoutOutcome, CoordinatorError> {
        // Resolve the gateway leg before anything is persisted.
        let gateway = match split.method.gateway() {
            Some(kind) if split.gateway_amount_cents > 0 => {
                Some((self.adapter(kind)?, charge_metadata(kind, metadata)?))
            }
            _ => None,
        };

        let mut intent =
            PaymentIntent::new(owner_id, purpose, subject_id, &self.settings.currency, &split);
        self.intents.insert(&intent).await?;
        metrics::record_intent_created(purpose, intent.method);
        info!(
            payment_id = %intent.id,
            owner_id,
            purpose = purpose.as_str(),
            method = intent.method.as_str(),
            requested_cents = intent.requested_amount_cents,
            wallet_cents = intent.wallet_applied_cents,
            gateway_cents = intent.gateway_amount_cents,
            "Payment intent created"
        );

        let _guard = self.locks.acquire_intent(intent.id).await;

        if split.auto_resolve {
            self.commit(&mut intent, PaymentStatus::Paid, None).await?;
            return Ok(CheckoutOutcome::new(intent));
        }

        if intent.wallet_applied_cents > 0 {
            if let Err(err) = self.settlement.reserve_wallet(&intent).await {
                let err = CoordinatorError::from(err);
                let reason = match err {
                    CoordinatorError::InsufficientBalance { .. } => "insufficient wallet balance",
                    _ => "wallet reservation failed",
                };
                if let Err(commit_err) = self
                    .commit(&mut intent, PaymentStatus::Failed, Some(reason))
                    .await
                {
                    error!(payment_id = %intent.id, error = %commit_err, "Could not fail intent");
                }
                return Err(err);
            }
        }

        match gateway {
            None => {
                self.commit(&mut intent, PaymentStatus::Paid, None).await?;
                Ok(CheckoutOutcome::new(intent))
            }
            Some((adapter, metadata)) => {
                self.dispatch_charge(intent, adapter.as_ref(), metadata)
                    .await
            }
        }
    }

    /// Sends the gateway leg of an intent. Caller holds the intent lock.
    async fn dispatch_charge(
        &self,
        mut intent: PaymentIntent,
        adapter: &dyn GatewayAdapter,
        metadata: MethodMetadata,
    ) -> Result<CheckoutOutcome, CoordinatorError> {
        if intent.status == PaymentStatus::Created {
            self.commit(&mut intent, PaymentStatus::AwaitingGateway, None)
                .await?;
        }

        let request = ChargeRequest {
            intent_id: intent.id,
            amount_cents: intent.gateway_amount_cents,
            currency: intent.currency.clone(),
            description: charge_description(&intent),
            metadata,
        };

        match self.call_gateway(adapter.create_charge(&request)).await {
            Ok(charge) => {
                intent.gateway_reference = Some(charge.reference.clone());
                intent.qr_payload = charge.qr_payload.clone();
                intent.expires_at = charge.expires_at;
                intent.failure_reason = None;
                intent.updated_at = Utc::now();
                self.persist(&intent).await?;
                info!(
                    payment_id = %intent.id,
                    gateway = %adapter.kind(),
                    reference = %charge.reference,
                    status = %charge.status,
                    "Gateway charge created"
                );

                self.apply_gateway_status(&mut intent, charge.status)
                    .await?;
                Ok(CheckoutOutcome {
                    intent,
                    action_url: charge.action_url,
                    retry_pending: false,
                    reused: false,
                })
            }
            Err(GatewayError::Rejected(reason)) => {
                warn!(payment_id = %intent.id, gateway = %adapter.kind(), reason = %reason, "Gateway rejected charge");
                self.commit(&mut intent, PaymentStatus::Failed, Some(reason.as_str()))
                    .await?;
                Err(CoordinatorError::GatewayRejected(reason))
            }
            Err(GatewayError::Unavailable(reason)) => {
                warn!(
                    payment_id = %intent.id,
                    gateway = %adapter.kind(),
                    reason = %reason,
                    "Gateway unavailable, intent left awaiting retry"
                );
                intent.failure_reason = Some(reason);
                intent.updated_at = Utc::now();
                self.persist(&intent).await?;
                Ok(CheckoutOutcome {
                    intent,
                    action_url: None,
                    retry_pending: true,
                    reused: false,
                })
            }
        }
    }

    /// Re-sends the charge of an intent whose first dispatch never reached the gateway.
    pub async fn retry_gateway(
        &self,
        id: Uuid,
        owner_id: &str,
        metadata: Option<MethodMetadata>,
    ) -> Result<CheckoutOutcome, CoordinatorError> {
        let _guard = self.locks.acquire_intent(id).await;
        let intent = self.load(id).await?;
        if intent.owner_id != owner_id {
            return Err(CoordinatorError::Forbidden(format!(
                "payment {} belongs to another user",
                id
            )));
        }

        if intent.status.is_terminal() {
            return Err(self
                .reject_transition(&intent, PaymentStatus::AwaitingGateway)
                .into());
        }
        if intent.gateway_reference.is_some() {
            debug!(payment_id = %id, "Charge already dispatched");
            return Ok(CheckoutOutcome {
                intent,
                action_url: None,
                retry_pending: false,
                reused: true,
            });
        }

        let kind = intent.method.gateway().ok_or_else(|| {
            CoordinatorError::Validation("wallet-only payments have no gateway leg".to_string())
        })?;
        let adapter = self.adapter(kind)?;
        let metadata = charge_metadata(kind, metadata)?;

        if intent.status == PaymentStatus::Created && intent.wallet_applied_cents > 0 {
            self.settlement.reserve_wallet(&intent).await?;
        }

        info!(payment_id = %id, gateway = %kind, "Retrying gateway dispatch");
        self.dispatch_charge(intent, adapter.as_ref(), metadata)
            .await
    }

    pub async fn handle_webhook(
        &self,
        kind: GatewayKind,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, CoordinatorError> {
        let adapter = self.adapter(kind)?;

        let verified = signature
            .map(|s| adapter.verify_webhook_signature(payload, s))
            .unwrap_or(false);
        if !verified {
            metrics::record_webhook_rejected(kind.as_str(), "signature");
            warn!(gateway = %kind, signature_present = signature.is_some(), "Webhook signature verification failed");
            return Err(CoordinatorError::WebhookSignatureInvalid);
        }

        let notification = WebhookNotification::parse(payload).map_err(|e| {
            metrics::record_webhook_rejected(kind.as_str(), "malformed");
            CoordinatorError::MalformedWebhook(e.to_string())
        })?;
        let status = notification.gateway_status().ok_or_else(|| {
            metrics::record_webhook_rejected(kind.as_str(), "malformed");
            CoordinatorError::MalformedWebhook(format!("unknown status {}", notification.status))
        })?;

        let found = self
            .intents
            .find_by_gateway_reference(PaymentMethod::from(kind), &notification.reference)
            .await?
            .ok_or_else(|| {
                metrics::record_webhook_rejected(kind.as_str(), "unknown_reference");
                CoordinatorError::NotFound(format!(
                    "No {} payment with reference {}",
                    kind, notification.reference
                ))
            })?;

        let _guard = self.locks.acquire_intent(found.id).await;
        let mut intent = self.load(found.id).await?;

        if notification.amount != intent.gateway_amount_cents {
            metrics::record_webhook_rejected(kind.as_str(), "amount_mismatch");
            warn!(
                payment_id = %intent.id,
                expected = intent.gateway_amount_cents,
                received = notification.amount,
                "Webhook amount does not match the gateway portion"
            );
            return Err(CoordinatorError::AmountMismatch {
                expected: intent.gateway_amount_cents,
                received: notification.amount,
            });
        }

        let changed = self.apply_gateway_status(&mut intent, status).await?;
        if !changed {
            debug!(payment_id = %intent.id, gateway_status = %status, "Webhook caused no state change");
        }
        Ok(WebhookOutcome { intent, changed })
    }

    /// Polling fallback for missed webhooks. Gateway errors are logged and the stored
    /// state is returned unchanged.
    pub async fn refresh_status(&self, id: Uuid) -> Result<PaymentIntent, CoordinatorError> {
        let _guard = self.locks.acquire_intent(id).await;
        let mut intent = self.load(id).await?;
        if intent.status.is_terminal() {
            return Ok(intent);
        }

        let (Some(reference), Some(kind)) =
            (intent.gateway_reference.clone(), intent.method.gateway())
        else {
            return Ok(intent);
        };
        let adapter = self.adapter(kind)?;

        match self.call_gateway(adapter.poll_status(&reference)).await {
            Ok(status) => {
                if let Err(err) = self.apply_gateway_status(&mut intent, status).await {
                    warn!(payment_id = %id, error = %err, "Could not apply polled status");
                }
            }
            Err(err) => {
                warn!(payment_id = %id, gateway = %kind, error = %err, "Gateway poll failed");
            }
        }
        Ok(intent)
    }

    pub async fn status(&self, id: Uuid) -> Result<StatusSnapshot, CoordinatorError> {
        let intent = self.refresh_status(id).await?;
        Ok(StatusSnapshot {
            payment_id: intent.id,
            status: intent.status,
            is_paid: intent.is_paid(),
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<PaymentIntent, CoordinatorError> {
        self.load(id).await
    }

    pub async fn list_for_owner(
        &self,
        owner_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PaymentIntent>, CoordinatorError> {
        Ok(self.intents.list_for_owner(owner_id, limit, offset).await?)
    }

    /// User abort. The gateway is asked once more first; a charge that turns out to
    /// be paid is recorded as paid and the cancel is refused.
    pub async fn cancel(&self, id: Uuid, owner_id: &str) -> Result<PaymentIntent, CoordinatorError> {
        let _guard = self.locks.acquire_intent(id).await;
        let mut intent = self.load(id).await?;
        if intent.owner_id != owner_id {
            return Err(CoordinatorError::Forbidden(format!(
                "payment {} belongs to another user",
                id
            )));
        }
        if intent.status == PaymentStatus::Canceled {
            return Ok(intent);
        }
        if !intent.status.can_transition_to(PaymentStatus::Canceled) {
            return Err(self
                .reject_transition(&intent, PaymentStatus::Canceled)
                .into());
        }

        if let (Some(reference), Some(kind)) =
            (intent.gateway_reference.clone(), intent.method.gateway())
        {
            let adapter = self.adapter(kind)?;
            if let Ok(GatewayStatus::Paid) = self.call_gateway(adapter.poll_status(&reference)).await
            {
                self.commit(&mut intent, PaymentStatus::Paid, None).await?;
                return Err(self
                    .reject_transition(&intent, PaymentStatus::Canceled)
                    .into());
            }
            if let Err(err) = self.call_gateway(adapter.cancel_charge(&reference)).await {
                warn!(payment_id = %id, error = %err, "Gateway cancel failed");
            }
        }

        self.commit(&mut intent, PaymentStatus::Canceled, Some("canceled by user"))
            .await?;
        Ok(intent)
    }

    /// Admin refund of a paid intent. Money going back to the payer's card or bank
    /// account is handled with the provider directly; this records the wallet side.
    /// Wallet entries are written by the settlement of the committed `Refunded` status.
    pub async fn refund(&self, id: Uuid, actor: &str) -> Result<PaymentIntent, CoordinatorError> {
        let _guard = self.locks.acquire_intent(id).await;
        let mut intent = self.load(id).await?;
        if intent.status == PaymentStatus::Refunded {
            return Ok(intent);
        }
        if !intent.status.can_transition_to(PaymentStatus::Refunded) {
            return Err(self
                .reject_transition(&intent, PaymentStatus::Refunded)
                .into());
        }

        if intent.purpose == PaymentPurpose::WalletDeposit {
            self.settlement.ensure_deposit_reversible(&intent).await?;
        }

        info!(payment_id = %id, actor, "Refund approved");
        self.commit(&mut intent, PaymentStatus::Refunded, None).await?;
        Ok(intent)
    }

    /// Expires stale intents, then re-applies side effects that did not complete.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, CoordinatorError> {
        let mut report = SweepReport::default();
        let batch = self.settings.sweep_batch_size;

        let stale = self
            .intents
            .list_stale(now, now - self.settings.intent_ttl, batch)
            .await?;
        for candidate in stale {
            match self.expire(candidate.id, now).await {
                Ok(Expiry::Expired) => report.expired += 1,
                Ok(Expiry::Paid) => report.recovered_paid += 1,
                Ok(Expiry::Skipped) => {}
                Err(err) => {
                    report.errors += 1;
                    warn!(payment_id = %candidate.id, error = %err, "Could not expire payment intent");
                }
            }
        }

        let unsettled = self.intents.list_unsettled(now, batch).await?;
        for candidate in unsettled {
            let _guard = self.locks.acquire_intent(candidate.id).await;
            let mut intent = match self.load(candidate.id).await {
                Ok(intent) => intent,
                Err(err) => {
                    report.errors += 1;
                    warn!(payment_id = %candidate.id, error = %err, "Could not reload payment intent");
                    continue;
                }
            };
            if !intent.settlement_due(now) {
                continue;
            }
            if self.settle(&mut intent, now).await {
                report.settled += 1;
            } else if intent.is_settlement_parked() {
                report.parked += 1;
            } else {
                report.errors += 1;
            }
        }

        if report != SweepReport::default() {
            info!(
                expired = report.expired,
                recovered_paid = report.recovered_paid,
                settled = report.settled,
                parked = report.parked,
                errors = report.errors,
                "Sweep finished"
            );
        }
        Ok(report)
    }

    async fn expire(&self, id: Uuid, now: DateTime<Utc>) -> Result<Expiry, CoordinatorError> {
        let _guard = self.locks.acquire_intent(id).await;
        let mut intent = self.load(id).await?;
        if intent.status.is_terminal() {
            return Ok(Expiry::Skipped);
        }
        let too_old = intent.created_at <= now - self.settings.intent_ttl;
        if !intent.is_expired(now) && !too_old {
            return Ok(Expiry::Skipped);
        }

        if let (Some(reference), Some(kind)) =
            (intent.gateway_reference.clone(), intent.method.gateway())
        {
            let adapter = self.adapter(kind)?;
            match self.call_gateway(adapter.poll_status(&reference)).await {
                Ok(GatewayStatus::Paid) => {
                    info!(payment_id = %id, "Expiring intent was paid at the gateway");
                    self.commit(&mut intent, PaymentStatus::Paid, None).await?;
                    return Ok(Expiry::Paid);
                }
                Ok(_) | Err(GatewayError::Rejected(_)) => {}
                // Without an answer the charge may still be captured; try next sweep.
                Err(err @ GatewayError::Unavailable(_)) => return Err(err.into()),
            }
            if let Err(err) = self.call_gateway(adapter.cancel_charge(&reference)).await {
                warn!(payment_id = %id, error = %err, "Gateway cancel failed during expiry");
            }
        }

        self.commit(&mut intent, PaymentStatus::Failed, Some("payment window expired"))
            .await?;
        Ok(Expiry::Expired)
    }

    /// Maps a gateway status onto the intent. Returns whether the intent changed.
    async fn apply_gateway_status(
        &self,
        intent: &mut PaymentIntent,
        status: GatewayStatus,
    ) -> Result<bool, CoordinatorError> {
        use PaymentStatus::*;

        let target = match (status, intent.status) {
            (GatewayStatus::Pending, _) => return Ok(false),
            (GatewayStatus::Processing, AwaitingGateway) => Processing,
            (GatewayStatus::Processing, _) => return Ok(false),
            (GatewayStatus::Paid, Paid | Refunded) => return Ok(false),
            (GatewayStatus::Paid, _) => Paid,
            (GatewayStatus::Failed, Failed | Canceled) => return Ok(false),
            (GatewayStatus::Failed, _) => Failed,
        };

        if target == Paid && matches!(intent.status, Failed | Canceled) {
            error!(
                payment_id = %intent.id,
                status = %intent.status,
                reference = ?intent.gateway_reference,
                "Gateway captured a payment for a closed intent, manual refund required"
            );
        }

        let reason = (target == Failed).then_some("gateway reported the charge as failed");
        self.commit(intent, target, reason).await?;
        Ok(true)
    }

    /// Moves `intent` to `next` with a compare-and-swap, then runs the side effects
    /// and the notification of a terminal status. Caller holds the intent lock.
    async fn commit(
        &self,
        intent: &mut PaymentIntent,
        next: PaymentStatus,
        failure_reason: Option<&str>,
    ) -> Result<(), CoordinatorError> {
        let previous = intent.status;
        let mut updated = intent.clone();
        if updated.transition(next, Utc::now()).is_err() {
            return Err(self.reject_transition(intent, next).into());
        }
        if let Some(reason) = failure_reason {
            updated.failure_reason = Some(reason.to_string());
        }

        if !self.intents.update_if_status(&updated, previous).await? {
            *intent = self.load(intent.id).await?;
            warn!(
                payment_id = %intent.id,
                expected = %previous,
                found = %intent.status,
                "Payment intent changed by another writer"
            );
            return Err(CoordinatorError::Conflict(intent.id));
        }
        *intent = updated;
        info!(payment_id = %intent.id, from = %previous, to = %next, "Payment intent transitioned");

        if next.is_terminal() {
            metrics::record_intent_resolved(next);
            self.settle(intent, Utc::now()).await;
            self.notifier
                .payment_resolved(PaymentResolved::from_intent(intent));
        }
        Ok(())
    }

    /// Operator retry of a terminal intent's side effects, parked or not. Returns
    /// the intent with `settled_at` set when they all went through.
    pub async fn retry_settlement(
        &self,
        id: Uuid,
        actor: &str,
    ) -> Result<PaymentIntent, CoordinatorError> {
        let _guard = self.locks.acquire_intent(id).await;
        let mut intent = self.load(id).await?;
        if !intent.status.is_terminal() {
            return Err(CoordinatorError::Validation(format!(
                "payment {} is still {}",
                id, intent.status
            )));
        }
        if intent.settled_at.is_some() {
            return Ok(intent);
        }

        info!(
            payment_id = %id,
            actor,
            attempts = intent.settle_attempts,
            "Settlement retry requested"
        );
        intent.settle_attempts = 0;
        intent.next_settle_at = None;
        self.settle(&mut intent, Utc::now()).await;
        Ok(intent)
    }

    /// Intents whose side effects were given up on, oldest first.
    pub async fn parked_settlements(&self, limit: i64) -> Result<Vec<PaymentIntent>, CoordinatorError> {
        Ok(self.intents.list_parked(limit).await?)
    }

    /// Applies the side effects of the current terminal status. On failure the intent
    /// stays unsettled and is scheduled for a retry, or parked.
    async fn settle(&self, intent: &mut PaymentIntent, now: DateTime<Utc>) -> bool {
        if let Err(err) = self.settlement.apply(intent).await {
            error!(
                payment_id = %intent.id,
                status = %intent.status,
                error = %err,
                "Payment side effects incomplete"
            );
            self.defer_settlement(intent, &err, now).await;
            return false;
        }

        let now = Utc::now();
        match self.intents.mark_settled(intent.id, intent.status, now).await {
            Ok(()) => {
                intent.settled_at = Some(now);
                true
            }
            Err(err) => {
                warn!(payment_id = %intent.id, error = %err, "Could not mark intent settled");
                false
            }
        }
    }

    async fn defer_settlement(
        &self,
        intent: &mut PaymentIntent,
        err: &SettlementError,
        now: DateTime<Utc>,
    ) {
        let attempts = intent.settle_attempts.saturating_add(1);
        let next_settle_at = if err.is_permanent() || attempts >= self.settings.max_settle_attempts
        {
            metrics::record_settlement_parked(intent.status);
            error!(
                payment_id = %intent.id,
                status = %intent.status,
                attempts,
                permanent = err.is_permanent(),
                "Settlement parked, operator action required"
            );
            None
        } else {
            Some(now + self.settings.settle_backoff(attempts))
        };

        let message = err.to_string();
        match self
            .intents
            .record_settle_failure(intent.id, intent.status, attempts, next_settle_at, &message)
            .await
        {
            Ok(()) => {
                intent.settle_attempts = attempts;
                intent.next_settle_at = next_settle_at;
                intent.settle_error = Some(message);
            }
            Err(store_err) => {
                warn!(payment_id = %intent.id, error = %store_err, "Could not record settlement failure");
            }
        }
    }

    fn reject_transition(&self, intent: &PaymentIntent, next: PaymentStatus) -> InvalidTransition {
        metrics::record_invalid_transition(intent.status, next);
        warn!(
            payment_id = %intent.id,
            from = %intent.status,
            to = %next,
            "Rejected payment transition"
        );
        InvalidTransition {
            from: intent.status,
            to: next,
        }
    }

    /// Writes non-status fields; the status itself serves as the compare value.
    async fn persist(&self, intent: &PaymentIntent) -> Result<(), CoordinatorError> {
        if self.intents.update_if_status(intent, intent.status).await? {
            Ok(())
        } else {
            Err(CoordinatorError::Conflict(intent.id))
        }
    }

    async fn load(&self, id: Uuid) -> Result<PaymentIntent, CoordinatorError> {
        self.intents
            .get(id)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound(format!("Payment {}", id)))
    }

    fn adapter(&self, kind: GatewayKind) -> Result<Arc<dyn GatewayAdapter>, CoordinatorError> {
        self.gateways
            .get(kind)
            .ok_or(CoordinatorError::GatewayNotConfigured(kind))
    }

    async fn call_gateway<T, F>(&self, call: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        match tokio::time::timeout(self.settings.gateway_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Unavailable(format!(
                "no answer within {}s",
                self.settings.gateway_timeout.as_secs()
            ))),
        }
    }
}

fn charge_metadata(
    kind: GatewayKind,
    metadata: Option<MethodMetadata>,
) -> Result<MethodMetadata, CoordinatorError> {
    match metadata {
        Some(m) if m.kind() == kind => Ok(m),
        Some(m) => Err(CoordinatorError::Validation(format!(
            "{} details supplied for a {} payment",
            m.kind(),
            kind
        ))),
        None if kind == GatewayKind::Pix => Ok(MethodMetadata::empty_pix()),
        None => Err(CoordinatorError::Validation(
            "card payments require a card_token".to_string(),
        )),
    }
}

fn charge_description(intent: &PaymentIntent) -> String {
    match (intent.purpose, intent.subject_id.as_deref()) {
        (PaymentPurpose::CampaignPublicationFee, Some(campaign_id)) => {
            format!("Publication fee for campaign {}", campaign_id)
        }
        (PaymentPurpose::CampaignPublicationFee, None) => "Campaign publication fee".to_string(),
        (PaymentPurpose::WalletDeposit, _) => "Wallet deposit".to_string(),
    }
}
