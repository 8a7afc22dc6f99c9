use super::http::GatewayHttp;
use super::{
    signature, ChargeRequest, GatewayAdapter, GatewayChargeResult, GatewayError, GatewayStatus,
    MethodMetadata,
};
use crate::domain::GatewayKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct CreateCardCharge<'a> {
    external_id: String,
    amount_cents: i64,
    currency: &'a str,
    description: &'a str,
    card_token: &'a str,
    installments: u32,
    capture: bool,
}

#[derive(Debug, Deserialize)]
struct CardChargeResponse {
    id: String,
    status: String,
    #[serde(default)]
    action_url: Option<String>,
    #[serde(default)]
    decline_reason: Option<String>,
}

/// Card acquirer client. Charges are auto-captured; a 3DS challenge leaves the
/// charge in `processing` until the acquirer confirms it.
#[derive(Clone)]
pub struct CardGatewayAdapter {
    http: GatewayHttp,
    webhook_secret: String,
}

impl CardGatewayAdapter {
    pub fn new(base_url: String, api_key: String, webhook_secret: String, timeout: Duration) -> Self {
        Self {
            http: GatewayHttp::new(base_url, api_key, timeout),
            webhook_secret,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.http.base_url
    }
}

fn parse_status(status: &str) -> Result<GatewayStatus, GatewayError> {
    GatewayStatus::from_provider(status).ok_or_else(|| {
        GatewayError::Unavailable(format!("unrecognized card charge status: {}", status))
    })
}

#[async_trait]
impl GatewayAdapter for CardGatewayAdapter {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Card
    }

    async fn create_charge(
        &self,
        request: &ChargeRequest,
    ) -> Result<GatewayChargeResult, GatewayError> {
        let (card_token, installments) = match &request.metadata {
            MethodMetadata::Card {
                card_token,
                installments,
            } => (card_token.as_str(), *installments),
            MethodMetadata::Pix { .. } => {
                return Err(GatewayError::Rejected(
                    "card token is required for card payments".to_string(),
                ))
            }
        };

        let body = CreateCardCharge {
            external_id: request.intent_id.to_string(),
            amount_cents: request.amount_cents,
            currency: &request.currency,
            description: &request.description,
            card_token,
            installments: installments.max(1),
            capture: true,
        };

        tracing::info!(
            intent_id = %request.intent_id,
            amount_cents = request.amount_cents,
            installments = body.installments,
            "Submitting card authorization"
        );

        let response: CardChargeResponse = self.http.post_json("/v1/card/charges", &body).await?;
        let status = parse_status(&response.status)?;
        if status == GatewayStatus::Failed {
            let reason = response
                .decline_reason
                .unwrap_or_else(|| "card declined".to_string());
            return Err(GatewayError::Rejected(reason));
        }

        Ok(GatewayChargeResult {
            reference: response.id,
            status,
            qr_payload: None,
            expires_at: None,
            action_url: response.action_url,
        })
    }

    async fn poll_status(&self, reference: &str) -> Result<GatewayStatus, GatewayError> {
        let response: CardChargeResponse = self
            .http
            .get_json(&format!("/v1/card/charges/{}", reference))
            .await?;
        parse_status(&response.status)
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        signature::verify_now(&self.webhook_secret, payload, signature)
    }

    async fn cancel_charge(&self, reference: &str) -> Result<(), GatewayError> {
        let _: CardChargeResponse = self
            .http
            .post_json(
                &format!("/v1/card/charges/{}/void", reference),
                &serde_json::json!({}),
            )
            .await?;
        Ok(())
    }
}
