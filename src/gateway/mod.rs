//! Payment gateway boundary.
//!
//! Every external rail (PIX, card) is reached through [`GatewayAdapter`]. Wallet-only
//! payments are settled inside the coordinator and never get here.

pub mod card;
mod http;
pub mod pix;
pub mod sandbox;
pub mod signature;

pub use card::CardGatewayAdapter;
pub use pix::PixGatewayAdapter;
pub use sandbox::SandboxGateway;

use crate::domain::GatewayKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Timeouts, 5xx, throttling, open circuit. Safe to retry later.
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
    /// The provider refused the charge (invalid card, declined). Final.
    #[error("Gateway rejected the charge: {0}")]
    Rejected(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Pending,
    /// Acknowledged but not settled, e.g. card 3DS challenge outstanding.
    Processing,
    Paid,
    Failed,
}

impl GatewayStatus {
    /// Maps provider vocabulary onto our four states.
    pub fn from_provider(status: &str) -> Option<Self> {
        match status.to_ascii_lowercase().as_str() {
            "pending" | "created" | "waiting_payment" => Some(Self::Pending),
            "processing" | "authorized" | "requires_action" => Some(Self::Processing),
            "paid" | "succeeded" | "captured" | "completed" => Some(Self::Paid),
            "failed" | "declined" | "expired" | "canceled" | "cancelled" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Paid => "paid",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Method-specific data supplied by the payer at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MethodMetadata {
    Pix {
        #[serde(default)]
        payer_name: Option<String>,
        #[serde(default)]
        payer_document: Option<String>,
    },
    Card {
        /// Tokenized card from the provider's client-side SDK.
        card_token: String,
        #[serde(default = "default_installments")]
        installments: u32,
    },
}

fn default_installments() -> u32 {
    1
}

impl MethodMetadata {
    pub fn kind(&self) -> GatewayKind {
        match self {
            Self::Pix { .. } => GatewayKind::Pix,
            Self::Card { .. } => GatewayKind::Card,
        }
    }

    pub fn empty_pix() -> Self {
        Self::Pix {
            payer_name: None,
            payer_document: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub intent_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub description: String,
    pub metadata: MethodMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayChargeResult {
    pub reference: String,
    pub status: GatewayStatus,
    pub qr_payload: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Redirect for a pending card challenge.
    pub action_url: Option<String>,
}

/// Body of a provider webhook, after its signature has been verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookNotification {
    pub reference: String,
    pub status: String,
    pub amount: i64,
}

impl WebhookNotification {
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn gateway_status(&self) -> Option<GatewayStatus> {
        GatewayStatus::from_provider(&self.status)
    }
}

#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    fn kind(&self) -> GatewayKind;

    async fn create_charge(
        &self,
        request: &ChargeRequest,
    ) -> Result<GatewayChargeResult, GatewayError>;

    /// Safe to call repeatedly.
    async fn poll_status(&self, reference: &str) -> Result<GatewayStatus, GatewayError>;

    /// Must return `false` on anything it cannot positively verify.
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool;

    async fn cancel_charge(&self, reference: &str) -> Result<(), GatewayError>;
}

#[derive(Clone, Default)]
pub struct GatewayRegistry {
    adapters: HashMap<GatewayKind, Arc<dyn GatewayAdapter>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn GatewayAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    pub fn get(&self, kind: GatewayKind) -> Option<Arc<dyn GatewayAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<GatewayKind> {
        let mut kinds: Vec<_> = self.adapters.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_status_mapping() {
        assert_eq!(GatewayStatus::from_provider("PAID"), Some(GatewayStatus::Paid));
        assert_eq!(
            GatewayStatus::from_provider("requires_action"),
            Some(GatewayStatus::Processing)
        );
        assert_eq!(
            GatewayStatus::from_provider("expired"),
            Some(GatewayStatus::Failed)
        );
        assert_eq!(GatewayStatus::from_provider("mystery"), None);
    }

    #[test]
    fn test_method_metadata_deserializes_tagged() {
        let card: MethodMetadata =
            serde_json::from_str(r#"{"type":"card","card_token":"tok_1"}"#).unwrap();
        assert_eq!(
            card,
            MethodMetadata::Card {
                card_token: "tok_1".to_string(),
                installments: 1
            }
        );
        assert_eq!(card.kind(), GatewayKind::Card);

        let pix: MethodMetadata = serde_json::from_str(r#"{"type":"pix"}"#).unwrap();
        assert_eq!(pix, MethodMetadata::empty_pix());
    }

    #[test]
    fn test_webhook_notification_parse() {
        let n = WebhookNotification::parse(br#"{"reference":"ch_1","status":"paid","amount":500}"#)
            .unwrap();
        assert_eq!(n.reference, "ch_1");
        assert_eq!(n.gateway_status(), Some(GatewayStatus::Paid));
        assert!(WebhookNotification::parse(b"not json").is_err());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = GatewayRegistry::new()
            .with_adapter(Arc::new(SandboxGateway::new(GatewayKind::Pix, "secret")));
        assert!(registry.get(GatewayKind::Pix).is_some());
        assert!(registry.get(GatewayKind::Card).is_none());
        assert_eq!(registry.kinds(), vec![GatewayKind::Pix]);
    }
}
