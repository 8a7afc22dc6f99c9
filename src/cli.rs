use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use creatorpay_core::config::{Config, ConfigInfo};
use creatorpay_core::services::LedgerAuditReport;
use creatorpay_core::startup::{build_cli_services, Services};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "creatorpay-core")]
#[command(about = "CreatorPay Core - campaign checkout and wallet reconciliation", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Print the effective configuration and validate it
    Config,

    /// Payment intent maintenance
    #[command(subcommand)]
    Payments(PaymentCommands),

    /// Wallet ledger commands
    #[command(subcommand)]
    Wallet(WalletCommands),
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum PaymentCommands {
    /// Run one expiry and repair pass
    Sweep,

    /// Refund a paid payment intent
    Refund {
        /// Payment intent UUID
        #[arg(value_name = "PAYMENT_ID")]
        payment_id: Uuid,

        /// Recorded as the approving operator
        #[arg(long, default_value = "cli")]
        actor: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum WalletCommands {
    /// Compare every wallet's balance with its ledger entries
    Audit {
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

fn require_database(config: &Config) -> anyhow::Result<&str> {
    config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set for this command"))
}

async fn persistent_services(config: &Config) -> anyhow::Result<Services> {
    require_database(config)?;
    build_cli_services(config).await
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let url = require_database(config)?;
    let pool = creatorpay_core::db::create_pool(url, config.database_max_connections).await?;

    tracing::info!("Running database migrations...");
    creatorpay_core::db::run_migrations(&pool).await?;
    println!("✓ Database migrations completed");

    Ok(())
}

pub fn handle_config_validate(info: &ConfigInfo) -> anyhow::Result<()> {
    let config = &info.config;
    tracing::info!("Validating configuration...");

    println!("Profile: {}", info.profile.as_str());
    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!(
        "  Database URL: {}",
        config
            .database_url
            .as_deref()
            .map(mask_password)
            .unwrap_or_else(|| "(in-memory)".to_string())
    );
    println!("  Gateway Mode: {:?}", config.gateway_mode);
    println!("  PIX Gateway URL: {}", config.pix_gateway_url);
    println!("  Card Gateway URL: {}", config.card_gateway_url);
    println!(
        "  Campaign API URL: {}",
        config.campaign_api_url.as_deref().unwrap_or("(in-memory)")
    );
    println!("  Currency: {}", config.currency);
    println!("  Intent TTL: {}s", config.intent_ttl_secs);
    println!("  Sweep Interval: {}s", config.sweep_interval_secs);

    if info.overrides.is_empty() {
        println!("Overrides: none");
    } else {
        println!("Overrides: {}", info.overrides.join(", "));
    }

    println!("✓ Configuration is valid");
    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}

pub async fn handle_payments_sweep(config: &Config) -> anyhow::Result<()> {
    let services = persistent_services(config).await?;
    let report = services.coordinator.sweep(Utc::now()).await?;

    println!("Expired: {}", report.expired);
    println!("Recovered as paid: {}", report.recovered_paid);
    println!("Side effects repaired: {}", report.settled);
    println!("Parked for operator: {}", report.parked);
    println!("Errors: {}", report.errors);

    if report.errors > 0 {
        anyhow::bail!("sweep finished with {} error(s)", report.errors);
    }
    Ok(())
}

pub async fn handle_payments_refund(
    config: &Config,
    payment_id: Uuid,
    actor: &str,
) -> anyhow::Result<()> {
    let services = persistent_services(config).await?;
    let intent = services.coordinator.refund(payment_id, actor).await?;

    println!("✓ Payment {} is now {}", intent.id, intent.status);
    Ok(())
}

pub async fn handle_wallet_audit(config: &Config, format: OutputFormat) -> anyhow::Result<()> {
    let services = persistent_services(config).await?;
    let report = services.coordinator.ledger().audit().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_audit(&report),
    }

    if !report.is_clean() {
        anyhow::bail!("{} wallet(s) out of balance", report.discrepancies.len());
    }
    Ok(())
}

fn print_audit(report: &LedgerAuditReport) {
    println!("\n=== Ledger Audit ===");
    println!("Generated: {}", report.generated_at);
    println!("Wallets checked: {}", report.wallets_checked);

    if report.discrepancies.is_empty() {
        println!("\n✓ No discrepancies found");
        return;
    }

    println!("\n⚠️  Discrepancies:");
    for d in &report.discrepancies {
        println!(
            "  - {} | owner {} | {} | cached: {:?} | ledger: {}",
            d.wallet_id, d.owner_id, d.currency, d.cached_balance_cents, d.computed_balance_cents
        );
    }
}
