//! Wires storage, gateways and the campaign client from [`Config`].

use crate::campaigns::{HttpCampaignClient, InMemoryCampaigns};
use crate::config::profiles::GatewayMode;
use crate::config::Config;
use crate::db::{
    self, InMemoryLedgerStore, InMemoryPaymentIntentRepository, PgLedgerStore,
    PgPaymentIntentRepository,
};
use crate::domain::GatewayKind;
use crate::events::{BroadcastNotifier, LogNotifier};
use crate::gateway::{CardGatewayAdapter, GatewayRegistry, PixGatewayAdapter, SandboxGateway};
use crate::health::{HealthChecker, HttpServiceChecker, PostgresChecker};
use crate::ports::{CampaignDirectory, LedgerStore, NotificationSink, PaymentIntentRepository};
use crate::services::{CoordinatorSettings, Ledger, ReconciliationCoordinator};
use sqlx::PgPool;
use std::sync::Arc;

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct Services {
    pub coordinator: Arc<ReconciliationCoordinator>,
    pub notifier: BroadcastNotifier,
    pub health: HealthChecker,
    pub pool: Option<PgPool>,
}

pub fn coordinator_settings(config: &Config) -> CoordinatorSettings {
    CoordinatorSettings {
        currency: config.currency.clone(),
        intent_ttl: config.intent_ttl(),
        gateway_timeout: config.gateway_timeout(),
        max_payment_cents: config.max_payment_cents,
        max_settle_attempts: config.max_settle_attempts,
        ..CoordinatorSettings::default()
    }
}

pub fn gateway_registry(config: &Config) -> GatewayRegistry {
    match config.gateway_mode {
        GatewayMode::Sandbox => GatewayRegistry::new()
            .with_adapter(Arc::new(SandboxGateway::new(
                GatewayKind::Pix,
                &config.pix_webhook_secret,
            )))
            .with_adapter(Arc::new(SandboxGateway::new(
                GatewayKind::Card,
                &config.card_webhook_secret,
            ))),
        GatewayMode::Live => GatewayRegistry::new()
            .with_adapter(Arc::new(PixGatewayAdapter::new(
                config.pix_gateway_url.clone(),
                config.pix_api_key.clone(),
                config.pix_webhook_secret.clone(),
                config.gateway_timeout(),
                config.pix_ttl_secs,
            )))
            .with_adapter(Arc::new(CardGatewayAdapter::new(
                config.card_gateway_url.clone(),
                config.card_api_key.clone(),
                config.card_webhook_secret.clone(),
                config.gateway_timeout(),
            ))),
    }
}

fn campaign_directory(config: &Config) -> anyhow::Result<Arc<dyn CampaignDirectory>> {
    match (&config.campaign_api_url, config.gateway_mode) {
        (Some(url), _) => Ok(Arc::new(HttpCampaignClient::new(
            url.clone(),
            config.campaign_api_token.clone(),
            config.gateway_timeout(),
        ))),
        (None, GatewayMode::Sandbox) => {
            tracing::warn!("CAMPAIGN_API_URL not set, using an empty in-memory campaign directory");
            Ok(Arc::new(InMemoryCampaigns::new()))
        }
        (None, GatewayMode::Live) => anyhow::bail!("CAMPAIGN_API_URL is required in live mode"),
    }
}

/// Builds the coordinator and its collaborators for the server. Payment events go
/// out on the broadcast channel. Does not run migrations.
pub async fn build_services(config: &Config) -> anyhow::Result<Services> {
    build(config, None).await
}

/// Same wiring for CLI one-shots, which have no subscribers: events are logged.
pub async fn build_cli_services(config: &Config) -> anyhow::Result<Services> {
    build(config, Some(Arc::new(LogNotifier))).await
}

async fn build(
    config: &Config,
    sink: Option<Arc<dyn NotificationSink>>,
) -> anyhow::Result<Services> {
    let pool = match &config.database_url {
        Some(url) => Some(db::create_pool(url, config.database_max_connections).await?),
        None => None,
    };

    let (ledger_store, intents): (Arc<dyn LedgerStore>, Arc<dyn PaymentIntentRepository>) =
        match &pool {
            Some(pool) => (
                Arc::new(PgLedgerStore::new(pool.clone())),
                Arc::new(PgPaymentIntentRepository::new(pool.clone())),
            ),
            None => {
                tracing::warn!("DATABASE_URL not set, payments and ledger are kept in memory");
                (
                    Arc::new(InMemoryLedgerStore::new()),
                    Arc::new(InMemoryPaymentIntentRepository::new()),
                )
            }
        };

    let notifier = BroadcastNotifier::new(EVENT_CHANNEL_CAPACITY);
    let sink = sink.unwrap_or_else(|| Arc::new(notifier.clone()));

    let coordinator = Arc::new(ReconciliationCoordinator::new(
        Ledger::new(ledger_store),
        intents,
        gateway_registry(config),
        campaign_directory(config)?,
        sink,
        coordinator_settings(config),
    ));

    let mut health = HealthChecker::new();
    if let Some(pool) = &pool {
        health = health.add_checker(Box::new(PostgresChecker::new(pool.clone())));
    }
    if config.gateway_mode == GatewayMode::Live {
        health = health
            .add_checker(Box::new(HttpServiceChecker::new(
                "pix_gateway",
                config.pix_gateway_url.clone(),
            )))
            .add_checker(Box::new(HttpServiceChecker::new(
                "card_gateway",
                config.card_gateway_url.clone(),
            )));
    }
    if let Some(url) = &config.campaign_api_url {
        health = health.add_checker(Box::new(HttpServiceChecker::new("campaigns", url.clone())));
    }

    tracing::info!(
        gateway_mode = ?config.gateway_mode,
        gateways = ?coordinator.gateways().kinds(),
        persistent = pool.is_some(),
        "Payment services ready"
    );

    Ok(Services {
        coordinator,
        notifier,
        health,
        pool,
    })
}
