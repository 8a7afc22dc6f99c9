//! Request and response bodies of the HTTP API.

use crate::domain::{LedgerEntry, PaymentIntent, PaymentMethod, PaymentStatus};
use crate::gateway::MethodMetadata;
use crate::services::{CheckoutOutcome, WebhookOutcome};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CampaignPaymentRequest {
    #[serde(default)]
    pub use_wallet: bool,
    /// Caps the wallet portion below the full balance.
    #[serde(default)]
    pub wallet_amount_cents: Option<i64>,
    pub method: PaymentMethod,
    #[serde(default)]
    pub metadata: Option<MethodMetadata>,
    /// Fee shown to the user; the checkout is refused if the plan price moved.
    #[serde(default)]
    pub expected_amount_cents: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DepositRequest {
    pub amount_cents: i64,
    pub method: PaymentMethod,
    #[serde(default)]
    pub metadata: Option<MethodMetadata>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RetryRequest {
    #[serde(default)]
    pub metadata: Option<MethodMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutResponse {
    pub payment: PaymentIntent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    pub retry_pending: bool,
    pub reused: bool,
}

impl From<CheckoutOutcome> for CheckoutResponse {
    fn from(outcome: CheckoutOutcome) -> Self {
        Self {
            payment: outcome.intent,
            action_url: outcome.action_url,
            retry_pending: outcome.retry_pending,
            reused: outcome.reused,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentListResponse {
    pub payments: Vec<PaymentIntent>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub changed: bool,
}

impl From<WebhookOutcome> for WebhookAck {
    fn from(outcome: WebhookOutcome) -> Self {
        Self {
            payment_id: outcome.intent.id,
            status: outcome.intent.status,
            changed: outcome.changed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub owner_id: String,
    pub currency: String,
    pub balance_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LedgerEntriesResponse {
    pub entries: Vec<LedgerEntry>,
    pub limit: i64,
    pub offset: i64,
}
