//! In-process gateway for local development and tests. Charges live in memory
//! and their outcome is driven by hand.

use super::{
    signature, ChargeRequest, GatewayAdapter, GatewayChargeResult, GatewayError, GatewayStatus,
};
use crate::domain::GatewayKind;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
pub struct SandboxCharge {
    pub reference: String,
    pub amount_cents: i64,
    pub status: GatewayStatus,
    pub canceled: bool,
}

#[derive(Default)]
struct SandboxState {
    charges: HashMap<String, SandboxCharge>,
    create_failures: VecDeque<GatewayError>,
    poll_failure: Option<GatewayError>,
    initial_status: Option<GatewayStatus>,
    create_calls: usize,
    poll_calls: usize,
    cancel_calls: usize,
    sequence: u64,
}

pub struct SandboxGateway {
    kind: GatewayKind,
    webhook_secret: String,
    state: Mutex<SandboxState>,
}

impl SandboxGateway {
    pub fn new(kind: GatewayKind, webhook_secret: &str) -> Self {
        Self {
            kind,
            webhook_secret: webhook_secret.to_string(),
            state: Mutex::new(SandboxState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SandboxState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The next `create_charge` call fails with `err`. Queued failures are consumed in order.
    pub fn fail_next_create(&self, err: GatewayError) {
        self.state().create_failures.push_back(err);
    }

    /// Every `poll_status` call fails with `err` until cleared with `None`.
    pub fn fail_polls(&self, err: Option<GatewayError>) {
        self.state().poll_failure = err;
    }

    /// Status reported for newly created charges (default `pending`).
    pub fn set_initial_status(&self, status: GatewayStatus) {
        self.state().initial_status = Some(status);
    }

    /// Settles or fails a charge as the provider would.
    pub fn set_status(&self, reference: &str, status: GatewayStatus) -> bool {
        match self.state().charges.get_mut(reference) {
            Some(charge) => {
                charge.status = status;
                true
            }
            None => false,
        }
    }

    pub fn charge(&self, reference: &str) -> Option<SandboxCharge> {
        self.state().charges.get(reference).cloned()
    }

    pub fn last_reference(&self) -> Option<String> {
        match self.state().sequence {
            0 => None,
            seq => Some(format!("sbx_{}_{}", self.kind.as_str(), seq)),
        }
    }

    pub fn create_calls(&self) -> usize {
        self.state().create_calls
    }

    pub fn poll_calls(&self) -> usize {
        self.state().poll_calls
    }

    pub fn cancel_calls(&self) -> usize {
        self.state().cancel_calls
    }

    /// Builds a signed webhook body the way the provider would deliver it.
    pub fn signed_webhook(&self, reference: &str, status: &str, amount: i64) -> (Vec<u8>, String) {
        let body = serde_json::json!({
            "reference": reference,
            "status": status,
            "amount": amount,
        })
        .to_string()
        .into_bytes();
        let header = signature::sign(&self.webhook_secret, &body, Utc::now().timestamp());
        (body, header)
    }
}

#[async_trait]
impl GatewayAdapter for SandboxGateway {
    fn kind(&self) -> GatewayKind {
        self.kind
    }

    async fn create_charge(
        &self,
        request: &ChargeRequest,
    ) -> Result<GatewayChargeResult, GatewayError> {
        let mut state = self.state();
        state.create_calls += 1;

        if let Some(err) = state.create_failures.pop_front() {
            return Err(err);
        }

        state.sequence += 1;
        let reference = format!("sbx_{}_{}", self.kind.as_str(), state.sequence);
        let status = state.initial_status.unwrap_or(GatewayStatus::Pending);
        state.charges.insert(
            reference.clone(),
            SandboxCharge {
                reference: reference.clone(),
                amount_cents: request.amount_cents,
                status,
                canceled: false,
            },
        );

        let (qr_payload, expires_at) = match self.kind {
            GatewayKind::Pix => (
                Some(format!("00020126sandbox{}", request.intent_id.simple())),
                Some(Utc::now() + Duration::minutes(15)),
            ),
            GatewayKind::Card => (None, None),
        };

        Ok(GatewayChargeResult {
            reference,
            status,
            qr_payload,
            expires_at,
            action_url: None,
        })
    }

    async fn poll_status(&self, reference: &str) -> Result<GatewayStatus, GatewayError> {
        let mut state = self.state();
        state.poll_calls += 1;
        if let Some(err) = state.poll_failure.clone() {
            return Err(err);
        }
        state
            .charges
            .get(reference)
            .map(|c| c.status)
            .ok_or_else(|| GatewayError::Rejected(format!("unknown charge {}", reference)))
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        signature::verify_now(&self.webhook_secret, payload, signature)
    }

    async fn cancel_charge(&self, reference: &str) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.cancel_calls += 1;
        match state.charges.get_mut(reference) {
            Some(charge) => {
                charge.canceled = true;
                if charge.status != GatewayStatus::Paid {
                    charge.status = GatewayStatus::Failed;
                }
                Ok(())
            }
            None => Err(GatewayError::Rejected(format!("unknown charge {}", reference))),
        }
    }
}
