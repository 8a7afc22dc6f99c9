//! The slice of the campaign entity the checkout core reads.

use super::UnknownVariant;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    PendingPayment,
    PendingReview,
    Active,
    Rejected,
    Archived,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingPayment => "pending_payment",
            Self::PendingReview => "pending_review",
            Self::Active => "active",
            Self::Rejected => "rejected",
            Self::Archived => "archived",
        }
    }

    /// Whether a publication fee may still be charged for a campaign in this state.
    pub fn accepts_payment(&self) -> bool {
        matches!(self, Self::Draft | Self::PendingPayment)
    }
}

impl FromStr for CampaignStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "pending_payment" => Ok(Self::PendingPayment),
            "pending_review" => Ok(Self::PendingReview),
            "active" => Ok(Self::Active),
            "rejected" => Ok(Self::Rejected),
            "archived" => Ok(Self::Archived),
            other => Err(UnknownVariant::new("campaign status", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CampaignSnapshot {
    pub id: String,
    pub owner_id: String,
    pub status: CampaignStatus,
    pub publication_plan: Option<String>,
    pub publication_fee_cents: i64,
}
