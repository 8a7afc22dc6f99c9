//! Framework-agnostic checkout domain: ledger records, payment intents and the
//! wallet/gateway split.

pub mod campaign;
pub mod ledger;
pub mod payment_intent;
pub mod split;

pub use campaign::{CampaignSnapshot, CampaignStatus};
pub use ledger::{EntryReason, IdempotencyKey, LedgerEntry, NewLedgerEntry, WalletAccount};
pub use payment_intent::{
    GatewayKind, InvalidTransition, PaymentIntent, PaymentMethod, PaymentPurpose, PaymentStatus,
};
pub use split::{compute_split, PaymentSplit, SplitRequest, MAX_PAYMENT_CENTS};

/// Error returned when a stored enum column holds a value this build does not know.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
