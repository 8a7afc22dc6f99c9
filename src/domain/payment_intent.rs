//! Payment intent entity and its lifecycle.

use super::split::PaymentSplit;
use super::UnknownVariant;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Created,
    AwaitingGateway,
    Processing,
    Paid,
    Failed,
    Canceled,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AwaitingGateway => "awaiting_gateway",
            Self::Processing => "processing",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Refunded => "refunded",
        }
    }

    /// Paid counts as terminal: the only way out of it is an explicit refund.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Paid | Self::Failed | Self::Canceled | Self::Refunded
        )
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Created, AwaitingGateway)
                | (AwaitingGateway, Processing)
                | (Created | AwaitingGateway | Processing, Paid)
                | (Created | AwaitingGateway | Processing, Failed)
                | (Created | AwaitingGateway | Processing, Canceled)
                | (Paid, Refunded)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "awaiting_gateway" => Ok(Self::AwaitingGateway),
            "processing" => Ok(Self::Processing),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            "refunded" => Ok(Self::Refunded),
            other => Err(UnknownVariant::new("payment status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPurpose {
    WalletDeposit,
    CampaignPublicationFee,
}

impl PaymentPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WalletDeposit => "wallet_deposit",
            Self::CampaignPublicationFee => "campaign_publication_fee",
        }
    }
}

impl FromStr for PaymentPurpose {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wallet_deposit" => Ok(Self::WalletDeposit),
            "campaign_publication_fee" => Ok(Self::CampaignPublicationFee),
            other => Err(UnknownVariant::new("payment purpose", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Pix,
    Card,
    WalletOnly,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pix => "pix",
            Self::Card => "card",
            Self::WalletOnly => "wallet_only",
        }
    }

    /// The gateway that settles this method, if any.
    pub fn gateway(&self) -> Option<GatewayKind> {
        match self {
            Self::Pix => Some(GatewayKind::Pix),
            Self::Card => Some(GatewayKind::Card),
            Self::WalletOnly => None,
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pix" => Ok(Self::Pix),
            "card" => Ok(Self::Card),
            "wallet_only" | "wallet" => Ok(Self::WalletOnly),
            other => Err(UnknownVariant::new("payment method", other)),
        }
    }
}

impl From<GatewayKind> for PaymentMethod {
    fn from(kind: GatewayKind) -> Self {
        match kind {
            GatewayKind::Pix => Self::Pix,
            GatewayKind::Card => Self::Card,
        }
    }
}

/// External payment rails. Wallet-only payments never reach a gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    Pix,
    Card,
}

impl GatewayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pix => "pix",
            Self::Card => "card",
        }
    }
}

impl fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GatewayKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pix" => Ok(Self::Pix),
            "card" => Ok(Self::Card),
            other => Err(UnknownVariant::new("gateway", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid payment transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: PaymentStatus,
    pub to: PaymentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PaymentIntent {
    pub id: Uuid,
    pub owner_id: String,
    pub purpose: PaymentPurpose,
    /// Campaign id for publication fees, `None` for deposits.
    pub subject_id: Option<String>,
    pub currency: String,
    pub requested_amount_cents: i64,
    pub wallet_applied_cents: i64,
    pub gateway_amount_cents: i64,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub gateway_reference: Option<String>,
    /// PIX copy-paste payload shown to the payer.
    pub qr_payload: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Set once every side effect of the current terminal status has been applied.
    pub settled_at: Option<DateTime<Utc>>,
    /// Failed attempts at applying the side effects of the current status.
    pub settle_attempts: i32,
    /// Earliest time the sweep retries the side effects. `None` after a failure
    /// means the intent is parked until an operator retries it.
    pub next_settle_at: Option<DateTime<Utc>>,
    pub settle_error: Option<String>,
}

impl PaymentIntent {
    /// Builds a fresh intent from a computed split. The split guarantees
    /// `wallet_applied + gateway_amount == requested`.
    pub fn new(
        owner_id: &str,
        purpose: PaymentPurpose,
        subject_id: Option<String>,
        currency: &str,
        split: &PaymentSplit,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            purpose,
            subject_id,
            currency: currency.to_string(),
            requested_amount_cents: split.requested_amount_cents,
            wallet_applied_cents: split.wallet_applied_cents,
            gateway_amount_cents: split.gateway_amount_cents,
            method: split.method,
            status: PaymentStatus::Created,
            gateway_reference: None,
            qr_payload: None,
            expires_at: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
            settled_at: None,
            settle_attempts: 0,
            next_settle_at: None,
            settle_error: None,
        }
    }

    pub fn is_paid(&self) -> bool {
        self.status == PaymentStatus::Paid
    }

    /// Side effects failed for good and wait for an operator.
    pub fn is_settlement_parked(&self) -> bool {
        self.settled_at.is_none() && self.settle_attempts > 0 && self.next_settle_at.is_none()
    }

    /// Whether the side effects of a terminal status should be (re)applied at `now`.
    pub fn settlement_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_terminal()
            && self.settled_at.is_none()
            && (self.settle_attempts == 0
                || self.next_settle_at.map(|at| at <= now).unwrap_or(false))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    /// Moves the intent to `next`, refusing anything the lifecycle does not allow.
    pub fn transition(
        &mut self,
        next: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        self.status = next;
        self.updated_at = now;
        self.settled_at = None;
        self.settle_attempts = 0;
        self.next_settle_at = None;
        self.settle_error = None;
        if matches!(
            next,
            PaymentStatus::Paid | PaymentStatus::Failed | PaymentStatus::Canceled
        ) && self.resolved_at.is_none()
        {
            self.resolved_at = Some(now);
        }
        Ok(())
    }

    pub fn fail(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(PaymentStatus::Failed, now)?;
        self.failure_reason = Some(reason.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::split::{compute_split, SplitRequest};

    fn intent(requested: i64) -> PaymentIntent {
        let split = compute_split(&SplitRequest {
            requested_amount_cents: requested,
            available_balance_cents: 0,
            use_wallet: false,
            wallet_cap_cents: None,
            method: PaymentMethod::Pix,
        });
        PaymentIntent::new(
            "owner-1",
            PaymentPurpose::CampaignPublicationFee,
            Some("42".to_string()),
            "BRL",
            &split,
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut i = intent(1500);
        let now = Utc::now();

        i.transition(PaymentStatus::AwaitingGateway, now).unwrap();
        i.transition(PaymentStatus::Processing, now).unwrap();
        i.transition(PaymentStatus::Paid, now).unwrap();

        assert!(i.is_paid());
        assert_eq!(i.resolved_at, Some(now));
    }

    #[test]
    fn test_settlement_due_follows_backoff_and_parking() {
        let mut i = intent(1500);
        let now = Utc::now();
        assert!(!i.settlement_due(now));

        i.transition(PaymentStatus::Paid, now).unwrap();
        assert!(i.settlement_due(now));

        i.settle_attempts = 1;
        i.next_settle_at = Some(now + chrono::Duration::seconds(30));
        assert!(!i.settlement_due(now));
        assert!(i.settlement_due(now + chrono::Duration::seconds(30)));
        assert!(!i.is_settlement_parked());

        i.next_settle_at = None;
        assert!(i.is_settlement_parked());
        assert!(!i.settlement_due(now + chrono::Duration::days(1)));

        i.transition(PaymentStatus::Refunded, now).unwrap();
        assert_eq!(i.settle_attempts, 0);
        assert!(i.settlement_due(now));
    }

    #[test]
    fn test_failed_cannot_become_paid() {
        let mut i = intent(1500);
        i.fail("declined", Utc::now()).unwrap();

        let err = i.transition(PaymentStatus::Paid, Utc::now()).unwrap_err();
        assert_eq!(err.from, PaymentStatus::Failed);
        assert_eq!(err.to, PaymentStatus::Paid);
        assert_eq!(i.status, PaymentStatus::Failed);
    }

    #[test]
    fn test_paid_only_allows_refund() {
        let all = [
            PaymentStatus::Created,
            PaymentStatus::AwaitingGateway,
            PaymentStatus::Processing,
            PaymentStatus::Paid,
            PaymentStatus::Failed,
            PaymentStatus::Canceled,
            PaymentStatus::Refunded,
        ];
        for next in all {
            assert_eq!(
                PaymentStatus::Paid.can_transition_to(next),
                next == PaymentStatus::Refunded
            );
        }
    }

    #[test]
    fn test_other_terminal_states_are_final() {
        for terminal in [
            PaymentStatus::Failed,
            PaymentStatus::Canceled,
            PaymentStatus::Refunded,
        ] {
            assert!(terminal.is_terminal());
            for next in [
                PaymentStatus::Created,
                PaymentStatus::AwaitingGateway,
                PaymentStatus::Processing,
                PaymentStatus::Paid,
                PaymentStatus::Failed,
                PaymentStatus::Canceled,
                PaymentStatus::Refunded,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_processing_requires_awaiting_gateway() {
        assert!(!PaymentStatus::Created.can_transition_to(PaymentStatus::Processing));
        assert!(PaymentStatus::AwaitingGateway.can_transition_to(PaymentStatus::Processing));
    }

    #[test]
    fn test_refund_keeps_original_resolution_time() {
        let mut i = intent(100);
        let paid_at = Utc::now();
        i.transition(PaymentStatus::Paid, paid_at).unwrap();
        i.transition(PaymentStatus::Refunded, paid_at + chrono::Duration::hours(1))
            .unwrap();

        assert_eq!(i.resolved_at, Some(paid_at));
        assert_eq!(i.status, PaymentStatus::Refunded);
    }

    #[test]
    fn test_expiry_only_for_open_intents() {
        let mut i = intent(100);
        let now = Utc::now();
        i.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(i.is_expired(now));

        i.transition(PaymentStatus::Paid, now).unwrap();
        assert!(!i.is_expired(now));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(
            "awaiting_gateway".parse::<PaymentStatus>().unwrap(),
            PaymentStatus::AwaitingGateway
        );
        assert!("settled".parse::<PaymentStatus>().is_err());
        assert_eq!(
            "wallet".parse::<PaymentMethod>().unwrap(),
            PaymentMethod::WalletOnly
        );
    }
}
