use super::http::GatewayHttp;
use super::{
    signature, ChargeRequest, GatewayAdapter, GatewayChargeResult, GatewayError, GatewayStatus,
    MethodMetadata,
};
use crate::domain::GatewayKind;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct CreatePixCharge<'a> {
    external_id: String,
    amount_cents: i64,
    currency: &'a str,
    description: &'a str,
    expires_in_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    payer_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payer_document: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PixChargeResponse {
    id: String,
    status: String,
    #[serde(default)]
    qr_code: Option<String>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

/// PIX provider client: dynamic QR charges with a bounded lifetime.
#[derive(Clone)]
pub struct PixGatewayAdapter {
    http: GatewayHttp,
    webhook_secret: String,
    charge_ttl: ChronoDuration,
}

impl PixGatewayAdapter {
    pub fn new(
        base_url: String,
        api_key: String,
        webhook_secret: String,
        timeout: Duration,
        charge_ttl_secs: i64,
    ) -> Self {
        Self {
            http: GatewayHttp::new(base_url, api_key, timeout),
            webhook_secret,
            charge_ttl: ChronoDuration::seconds(charge_ttl_secs),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.http.base_url
    }
}

fn parse_status(status: &str) -> Result<GatewayStatus, GatewayError> {
    GatewayStatus::from_provider(status).ok_or_else(|| {
        GatewayError::Unavailable(format!("unrecognized PIX charge status: {}", status))
    })
}

#[async_trait]
impl GatewayAdapter for PixGatewayAdapter {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Pix
    }

    async fn create_charge(
        &self,
        request: &ChargeRequest,
    ) -> Result<GatewayChargeResult, GatewayError> {
        let (payer_name, payer_document) = match &request.metadata {
            MethodMetadata::Pix {
                payer_name,
                payer_document,
            } => (payer_name.as_deref(), payer_document.as_deref()),
            MethodMetadata::Card { .. } => {
                return Err(GatewayError::Rejected(
                    "card details sent to the PIX gateway".to_string(),
                ))
            }
        };

        let body = CreatePixCharge {
            external_id: request.intent_id.to_string(),
            amount_cents: request.amount_cents,
            currency: &request.currency,
            description: &request.description,
            expires_in_seconds: self.charge_ttl.num_seconds(),
            payer_name,
            payer_document,
        };

        tracing::info!(
            intent_id = %request.intent_id,
            amount_cents = request.amount_cents,
            "Creating PIX charge"
        );

        let response: PixChargeResponse = self.http.post_json("/v1/pix/charges", &body).await?;
        let status = parse_status(&response.status)?;
        if status == GatewayStatus::Failed {
            return Err(GatewayError::Rejected(format!(
                "PIX charge {} created in failed state",
                response.id
            )));
        }

        Ok(GatewayChargeResult {
            reference: response.id,
            status,
            qr_payload: response.qr_code,
            expires_at: Some(
                response
                    .expires_at
                    .unwrap_or_else(|| Utc::now() + self.charge_ttl),
            ),
            action_url: None,
        })
    }

    async fn poll_status(&self, reference: &str) -> Result<GatewayStatus, GatewayError> {
        let response: PixChargeResponse = self
            .http
            .get_json(&format!("/v1/pix/charges/{}", reference))
            .await?;
        parse_status(&response.status)
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        signature::verify_now(&self.webhook_secret, payload, signature)
    }

    async fn cancel_charge(&self, reference: &str) -> Result<(), GatewayError> {
        let _: serde_json::Value = self
            .http
            .post_json(
                &format!("/v1/pix/charges/{}/cancel", reference),
                &serde_json::json!({}),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn adapter(url: String) -> PixGatewayAdapter {
        PixGatewayAdapter::new(
            url,
            "pix_key".to_string(),
            "pix_secret".to_string(),
            Duration::from_secs(5),
            900,
        )
    }

    fn charge(amount: i64) -> ChargeRequest {
        ChargeRequest {
            intent_id: Uuid::new_v4(),
            amount_cents: amount,
            currency: "BRL".to_string(),
            description: "Campaign publication fee".to_string(),
            metadata: MethodMetadata::empty_pix(),
        }
    }

    #[tokio::test]
    async fn test_create_charge_returns_qr_and_expiry() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/pix/charges")
            .match_header("authorization", "Bearer pix_key")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"id":"pix_123","status":"pending","qr_code":"00020126...","expires_at":"2030-01-01T00:15:00Z"}"#,
            )
            .create_async()
            .await;

        let result = adapter(server.url()).create_charge(&charge(500)).await.unwrap();

        assert_eq!(result.reference, "pix_123");
        assert_eq!(result.status, GatewayStatus::Pending);
        assert_eq!(result.qr_payload.as_deref(), Some("00020126..."));
        assert!(result.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/pix/charges")
            .with_status(503)
            .create_async()
            .await;

        let err = adapter(server.url())
            .create_charge(&charge(500))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_client_error_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/pix/charges")
            .with_status(422)
            .with_body(r#"{"error":"invalid payer document"}"#)
            .create_async()
            .await;

        let err = adapter(server.url())
            .create_charge(&charge(500))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_poll_status_maps_provider_vocabulary() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/pix/charges/pix_123")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"pix_123","status":"completed"}"#)
            .create_async()
            .await;

        let status = adapter(server.url()).poll_status("pix_123").await.unwrap();
        assert_eq!(status, GatewayStatus::Paid);
    }

    #[tokio::test]
    async fn test_card_metadata_is_refused() {
        let mut request = charge(500);
        request.metadata = MethodMetadata::Card {
            card_token: "tok".to_string(),
            installments: 1,
        };
        let err = adapter("http://127.0.0.1:9".to_string())
            .create_charge(&request)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(_)));
    }

    #[test]
    fn test_webhook_signature_uses_configured_secret() {
        let adapter = adapter("http://localhost".to_string());
        let body = br#"{"reference":"pix_123","status":"paid","amount":500}"#;
        let good = signature::sign("pix_secret", body, Utc::now().timestamp());
        let bad = signature::sign("card_secret", body, Utc::now().timestamp());

        assert!(adapter.verify_webhook_signature(body, &good));
        assert!(!adapter.verify_webhook_signature(body, &bad));
    }
}
