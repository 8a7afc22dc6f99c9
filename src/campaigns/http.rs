use crate::domain::{CampaignSnapshot, CampaignStatus};
use crate::ports::{CampaignDirectory, CollaboratorError};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct CampaignResponse {
    id: String,
    owner_id: String,
    status: String,
    #[serde(default)]
    publication_plan: Option<String>,
    publication_fee_cents: i64,
}

/// Talks to the web application's internal campaign API with a service token.
#[derive(Clone)]
pub struct HttpCampaignClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpCampaignClient {
    pub fn new(base_url: String, token: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, campaign_id: &str, suffix: &str) -> String {
        format!("{}/internal/campaigns/{}{}", self.base_url, campaign_id, suffix)
    }

    async fn post_action(&self, campaign_id: &str, action: &str) -> Result<(), CollaboratorError> {
        let response = self
            .client
            .post(self.url(campaign_id, action))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;
        check(campaign_id, response).await.map(|_| ())
    }
}

async fn check(campaign_id: &str, response: Response) -> Result<Response, CollaboratorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND => Err(CollaboratorError::NotFound(campaign_id.to_string())),
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            Err(CollaboratorError::Unavailable(format!("{}: {}", s, body)))
        }
        s => Err(CollaboratorError::Rejected(format!("{}: {}", s, body))),
    }
}

#[async_trait]
impl CampaignDirectory for HttpCampaignClient {
    async fn get_campaign(&self, campaign_id: &str) -> Result<CampaignSnapshot, CollaboratorError> {
        let response = self
            .client
            .get(self.url(campaign_id, ""))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;
        let body: CampaignResponse = check(campaign_id, response)
            .await?
            .json()
            .await
            .map_err(|e| CollaboratorError::Unavailable(format!("invalid campaign payload: {}", e)))?;

        let status: CampaignStatus = body
            .status
            .parse()
            .map_err(|e| CollaboratorError::Rejected(format!("{}", e)))?;
        debug!(campaign_id, status = status.as_str(), "Fetched campaign");

        Ok(CampaignSnapshot {
            id: body.id,
            owner_id: body.owner_id,
            status,
            publication_plan: body.publication_plan,
            publication_fee_cents: body.publication_fee_cents,
        })
    }

    async fn mark_pending_review(&self, campaign_id: &str) -> Result<(), CollaboratorError> {
        self.post_action(campaign_id, "/pending-review").await
    }

    async fn revert_to_draft(&self, campaign_id: &str) -> Result<(), CollaboratorError> {
        self.post_action(campaign_id, "/revert-to-draft").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn client(server: &Server) -> HttpCampaignClient {
        HttpCampaignClient::new(server.url(), "svc-token".to_string(), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_get_campaign_parses_snapshot() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/internal/campaigns/42")
            .match_header("authorization", "Bearer svc-token")
            .with_status(200)
            .with_body(
                r#"{"id":"42","owner_id":"creator-1","status":"pending_payment","publication_plan":"featured","publication_fee_cents":1500}"#,
            )
            .create_async()
            .await;

        let campaign = client(&server).get_campaign("42").await.unwrap();

        mock.assert_async().await;
        assert_eq!(campaign.status, CampaignStatus::PendingPayment);
        assert_eq!(campaign.publication_fee_cents, 1500);
        assert_eq!(campaign.publication_plan.as_deref(), Some("featured"));
    }

    #[tokio::test]
    async fn test_missing_campaign_maps_to_not_found() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/internal/campaigns/7")
            .with_status(404)
            .create_async()
            .await;

        let err = client(&server).get_campaign("7").await.unwrap_err();
        assert!(matches!(err, CollaboratorError::NotFound(id) if id == "7"));
    }

    #[tokio::test]
    async fn test_mark_pending_review_server_error_is_unavailable() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/internal/campaigns/42/pending-review")
            .with_status(502)
            .create_async()
            .await;

        let err = client(&server).mark_pending_review("42").await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_revert_to_draft_posts_action() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/internal/campaigns/42/revert-to-draft")
            .with_status(204)
            .create_async()
            .await;

        client(&server).revert_to_draft("42").await.unwrap();
        mock.assert_async().await;
    }
}
