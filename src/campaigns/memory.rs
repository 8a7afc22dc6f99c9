use crate::domain::{CampaignSnapshot, CampaignStatus};
use crate::ports::{CampaignDirectory, CollaboratorError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct CampaignState {
    campaigns: HashMap<String, CampaignSnapshot>,
    unavailable: bool,
    review_requests: usize,
}

/// Campaign directory held in memory, for tests and sandbox runs.
#[derive(Default)]
pub struct InMemoryCampaigns {
    state: Mutex<CampaignState>,
}

impl InMemoryCampaigns {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CampaignState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn insert(&self, id: &str, owner_id: &str, status: CampaignStatus, fee_cents: i64) {
        self.state().campaigns.insert(
            id.to_string(),
            CampaignSnapshot {
                id: id.to_string(),
                owner_id: owner_id.to_string(),
                status,
                publication_plan: None,
                publication_fee_cents: fee_cents,
            },
        );
    }

    pub fn status(&self, id: &str) -> Option<CampaignStatus> {
        self.state().campaigns.get(id).map(|c| c.status)
    }

    /// While set, every call fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    pub fn review_requests(&self) -> usize {
        self.state().review_requests
    }

    fn with_campaign<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut CampaignSnapshot) -> Result<T, CollaboratorError>,
    ) -> Result<T, CollaboratorError> {
        let mut state = self.state();
        if state.unavailable {
            return Err(CollaboratorError::Unavailable(
                "campaign service offline".to_string(),
            ));
        }
        match state.campaigns.get_mut(id) {
            Some(campaign) => f(campaign),
            None => Err(CollaboratorError::NotFound(id.to_string())),
        }
    }
}

#[async_trait]
impl CampaignDirectory for InMemoryCampaigns {
    async fn get_campaign(&self, campaign_id: &str) -> Result<CampaignSnapshot, CollaboratorError> {
        self.with_campaign(campaign_id, |c| Ok(c.clone()))
    }

    async fn mark_pending_review(&self, campaign_id: &str) -> Result<(), CollaboratorError> {
        let result = self.with_campaign(campaign_id, |c| {
            let current = c.status;
            match current {
                CampaignStatus::PendingReview => Ok(()),
                s if s.accepts_payment() => {
                    c.status = CampaignStatus::PendingReview;
                    Ok(())
                }
                s => Err(CollaboratorError::Rejected(format!(
                    "campaign {} is {}",
                    c.id,
                    s.as_str()
                ))),
            }
        });
        if result.is_ok() {
            self.state().review_requests += 1;
        }
        result
    }

    async fn revert_to_draft(&self, campaign_id: &str) -> Result<(), CollaboratorError> {
        self.with_campaign(campaign_id, |c| {
            c.status = CampaignStatus::Draft;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mark_pending_review_transitions() {
        let campaigns = InMemoryCampaigns::new();
        campaigns.insert("draft", "u1", CampaignStatus::Draft, 100);
        campaigns.insert("archived", "u1", CampaignStatus::Archived, 100);

        campaigns.mark_pending_review("draft").await.unwrap();
        campaigns.mark_pending_review("draft").await.unwrap();
        assert_eq!(campaigns.status("draft"), Some(CampaignStatus::PendingReview));
        assert_eq!(campaigns.review_requests(), 2);

        let err = campaigns.mark_pending_review("archived").await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Rejected(_)));
        assert_eq!(campaigns.status("archived"), Some(CampaignStatus::Archived));

        let err = campaigns.mark_pending_review("missing").await.unwrap_err();
        assert!(matches!(err, CollaboratorError::NotFound(_)));
    }
}
