pub mod campaigns;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod middleware;
pub mod ports;
pub mod readiness;
pub mod schemas;
pub mod services;
pub mod startup;

use crate::health::HealthChecker;
use crate::middleware::request_logger::request_logger_middleware;
use crate::services::ReconciliationCoordinator;
use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;

pub use crate::readiness::ReadinessState;

/// OpenAPI schema for the checkout API
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::ready,
        handlers::payments::create_campaign_payment,
        handlers::payments::create_deposit,
        handlers::payments::list_payments,
        handlers::payments::get_payment,
        handlers::payments::payment_status,
        handlers::payments::cancel_payment,
        handlers::payments::retry_payment,
        handlers::webhook::gateway_webhook,
        handlers::wallet::get_balance,
        handlers::wallet::list_entries,
        handlers::admin::refund_payment,
        handlers::admin::ledger_audit,
        handlers::admin::run_sweep,
        handlers::admin::retry_settlement,
        handlers::admin::parked_settlements,
    ),
    components(
        schemas(
            domain::PaymentIntent,
            domain::PaymentStatus,
            domain::PaymentPurpose,
            domain::PaymentMethod,
            domain::GatewayKind,
            domain::LedgerEntry,
            domain::EntryReason,
            gateway::MethodMetadata,
            schemas::CampaignPaymentRequest,
            schemas::DepositRequest,
            schemas::RetryRequest,
            schemas::CheckoutResponse,
            schemas::PaymentListResponse,
            schemas::WebhookAck,
            schemas::BalanceResponse,
            schemas::LedgerEntriesResponse,
            services::StatusSnapshot,
            services::SweepReport,
            services::LedgerAuditReport,
            services::ledger::BalanceDiscrepancy,
            health::HealthResponse,
            health::DependencyStatus,
            handlers::ReadinessResponse,
            handlers::Pagination,
        )
    ),
    info(
        title = "CreatorPay Core API",
        version = "0.1.0",
        description = "Campaign checkout, wallet ledger and payment gateway reconciliation"
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Payments", description = "Checkout and payment intents"),
        (name = "Wallet", description = "Wallet balance and ledger history"),
        (name = "Webhooks", description = "Payment gateway callbacks"),
        (name = "Admin", description = "Operator endpoints"),
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ReconciliationCoordinator>,
    pub health: Arc<HealthChecker>,
    pub readiness: ReadinessState,
}

impl AppState {
    pub fn new(coordinator: Arc<ReconciliationCoordinator>, health: HealthChecker) -> Self {
        Self {
            coordinator,
            health: Arc::new(health),
            readiness: ReadinessState::new(),
        }
    }
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn create_app(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/metrics", get(handlers::metrics))
        .route("/api-docs/openapi.json", get(openapi_json))
        .route(
            "/campaigns/:id/payments",
            post(handlers::payments::create_campaign_payment),
        )
        .route("/wallets/deposits", post(handlers::payments::create_deposit))
        .route("/wallets/:owner_id/balance", get(handlers::wallet::get_balance))
        .route("/wallets/:owner_id/entries", get(handlers::wallet::list_entries))
        .route("/payments", get(handlers::payments::list_payments))
        .route("/payments/:id", get(handlers::payments::get_payment))
        .route("/payments/:id/status", get(handlers::payments::payment_status))
        .route("/payments/:id/cancel", post(handlers::payments::cancel_payment))
        .route("/payments/:id/retry", post(handlers::payments::retry_payment))
        .route("/webhooks/:provider", post(handlers::webhook::gateway_webhook))
        .route(
            "/admin/payments/:id/refund",
            post(handlers::admin::refund_payment),
        )
        .route("/admin/ledger/audit", get(handlers::admin::ledger_audit))
        .route("/admin/sweep", post(handlers::admin::run_sweep))
        .route(
            "/admin/payments/:id/settle",
            post(handlers::admin::retry_settlement),
        )
        .route(
            "/admin/settlements/parked",
            get(handlers::admin::parked_settlements),
        )
        .layer(axum::middleware::from_fn(request_logger_middleware))
        .with_state(app_state)
}

/// CORS for the browser checkout. `None` or `*` allows any origin.
pub fn cors_layer(allowed_origins: Option<&str>) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    match allowed_origins.map(str::trim) {
        None | Some("") | Some("*") => layer.allow_origin(Any),
        Some(list) => {
            let origins: Vec<HeaderValue> = list
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .filter_map(|o| match o.parse() {
                    Ok(v) => Some(v),
                    Err(_) => {
                        tracing::warn!(origin = o, "Ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            layer.allow_origin(origins)
        }
    }
}
