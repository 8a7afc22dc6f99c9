#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use creatorpay_core::campaigns::InMemoryCampaigns;
use creatorpay_core::db::{InMemoryLedgerStore, InMemoryPaymentIntentRepository};
use creatorpay_core::domain::{EntryReason, GatewayKind};
use creatorpay_core::events::BroadcastNotifier;
use creatorpay_core::gateway::{GatewayRegistry, SandboxGateway};
use creatorpay_core::health::HealthChecker;
use creatorpay_core::services::{CoordinatorSettings, Ledger, ReconciliationCoordinator};
use creatorpay_core::{create_app, AppState};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub const WEBHOOK_SECRET: &str = "whsec_integration";
pub const OWNER: &str = "creator-1";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub ledger: Ledger,
    pub pix: Arc<SandboxGateway>,
    pub card: Arc<SandboxGateway>,
    pub campaigns: Arc<InMemoryCampaigns>,
    pub notifier: BroadcastNotifier,
}

pub fn spawn_app() -> TestApp {
    let ledger = Ledger::new(Arc::new(InMemoryLedgerStore::new()));
    let pix = Arc::new(SandboxGateway::new(GatewayKind::Pix, WEBHOOK_SECRET));
    let card = Arc::new(SandboxGateway::new(GatewayKind::Card, WEBHOOK_SECRET));
    let campaigns = Arc::new(InMemoryCampaigns::new());
    let notifier = BroadcastNotifier::new(64);

    let coordinator = Arc::new(ReconciliationCoordinator::new(
        ledger.clone(),
        Arc::new(InMemoryPaymentIntentRepository::new()),
        GatewayRegistry::new()
            .with_adapter(pix.clone())
            .with_adapter(card.clone()),
        campaigns.clone(),
        Arc::new(notifier.clone()),
        CoordinatorSettings::default(),
    ));

    let state = AppState::new(coordinator, HealthChecker::new());
    TestApp {
        router: create_app(state.clone()),
        state,
        ledger,
        pix,
        card,
        campaigns,
        notifier,
    }
}

impl TestApp {
    pub async fn fund(&self, owner: &str, amount: i64) {
        let wallet = self.ledger.open_account(owner, "BRL").await.unwrap();
        self.ledger
            .credit(
                wallet.id,
                amount,
                EntryReason::Deposit,
                &format!("seed:{}:{}", owner, amount),
                None,
            )
            .await
            .unwrap();
    }

    pub async fn balance(&self, owner: &str) -> i64 {
        self.ledger.balance_for_owner(owner, "BRL").await.unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))
        };
        (status, body)
    }

    pub async fn get(&self, uri: &str, user: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(&self, uri: &str, user: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    pub async fn post_webhook(
        &self,
        provider: &str,
        body: Vec<u8>,
        signature: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(format!("/webhooks/{}", provider))
            .header("content-type", "application/json");
        if let Some(sig) = signature {
            builder = builder.header("x-gateway-signature", sig);
        }
        self.send(builder.body(Body::from(body)).unwrap()).await
    }
}
