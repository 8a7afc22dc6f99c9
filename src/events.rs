//! Payment state change events and the sinks that carry them out of the core.

use crate::domain::{PaymentIntent, PaymentPurpose, PaymentStatus};
use crate::ports::NotificationSink;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use utoipa::ToSchema;
use uuid::Uuid;

/// `payment.resolved`: emitted once per terminal transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PaymentResolved {
    pub payment_id: Uuid,
    pub owner_id: String,
    pub purpose: PaymentPurpose,
    pub subject_id: Option<String>,
    pub status: PaymentStatus,
    pub occurred_at: DateTime<Utc>,
}

impl PaymentResolved {
    pub const NAME: &'static str = "payment.resolved";

    pub fn from_intent(intent: &PaymentIntent) -> Self {
        Self {
            payment_id: intent.id,
            owner_id: intent.owner_id.clone(),
            purpose: intent.purpose,
            subject_id: intent.subject_id.clone(),
            status: intent.status,
            occurred_at: intent.updated_at,
        }
    }
}

/// Publishes events on a tokio broadcast channel the UI layer subscribes to.
#[derive(Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<PaymentResolved>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PaymentResolved> {
        self.sender.subscribe()
    }
}

impl NotificationSink for BroadcastNotifier {
    fn payment_resolved(&self, event: PaymentResolved) {
        tracing::debug!(
            event = PaymentResolved::NAME,
            payment_id = %event.payment_id,
            status = %event.status,
            "Publishing payment event"
        );
        // No subscribers is fine: delivery is best effort.
        let _ = self.sender.send(event);
    }
}

/// Writes events to the log only. Used by CLI one-shots.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn payment_resolved(&self, event: PaymentResolved) {
        tracing::info!(
            event = PaymentResolved::NAME,
            payment_id = %event.payment_id,
            owner_id = %event.owner_id,
            status = %event.status,
            "Payment resolved"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{compute_split, PaymentMethod, SplitRequest};

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscribers() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();

        let split = compute_split(&SplitRequest {
            requested_amount_cents: 100,
            available_balance_cents: 0,
            use_wallet: false,
            wallet_cap_cents: None,
            method: PaymentMethod::Card,
        });
        let intent = PaymentIntent::new("u1", PaymentPurpose::WalletDeposit, None, "BRL", &split);
        notifier.payment_resolved(PaymentResolved::from_intent(&intent));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.payment_id, intent.id);
        assert_eq!(received.purpose, PaymentPurpose::WalletDeposit);
    }

    #[test]
    fn test_broadcast_without_subscribers_does_not_panic() {
        let notifier = BroadcastNotifier::new(1);
        let split = compute_split(&SplitRequest {
            requested_amount_cents: 0,
            available_balance_cents: 0,
            use_wallet: false,
            wallet_cap_cents: None,
            method: PaymentMethod::Pix,
        });
        let intent = PaymentIntent::new("u1", PaymentPurpose::WalletDeposit, None, "BRL", &split);
        notifier.payment_resolved(PaymentResolved::from_intent(&intent));
    }
}
