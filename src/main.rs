mod cli;

use clap::Parser;
use cli::{Cli, Commands, DbCommands, PaymentCommands, WalletCommands};
use creatorpay_core::config::profiles::LogFormat;
use creatorpay_core::config::{Config, ConfigInfo};
use creatorpay_core::services::run_sweeper;
use creatorpay_core::startup::build_services;
use creatorpay_core::{cors_layer, create_app, AppState};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing(format: LogFormat) {
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_info = Config::from_env()?;
    init_tracing(config_info.config.log_format);
    tracing::info!(
        profile = config_info.profile.as_str(),
        overrides = ?config_info.overrides,
        "Configuration loaded"
    );

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config_info).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config_info.config).await,
        Commands::Config => cli::handle_config_validate(&config_info),
        Commands::Payments(PaymentCommands::Sweep) => {
            cli::handle_payments_sweep(&config_info.config).await
        }
        Commands::Payments(PaymentCommands::Refund { payment_id, actor }) => {
            cli::handle_payments_refund(&config_info.config, payment_id, &actor).await
        }
        Commands::Wallet(WalletCommands::Audit { format }) => {
            cli::handle_wallet_audit(&config_info.config, format).await
        }
    }
}

async fn serve(config_info: ConfigInfo) -> anyhow::Result<()> {
    let config = config_info.config;
    let services = build_services(&config).await?;

    if let Some(pool) = &services.pool {
        creatorpay_core::db::run_migrations(pool).await?;
    }

    let sweeper = tokio::spawn(run_sweeper(
        services.coordinator.clone(),
        config.sweep_interval(),
    ));

    let state = AppState::new(services.coordinator.clone(), services.health);
    let readiness = state.readiness.clone();
    let app = create_app(state).layer(cors_layer(config.cors_allowed_origins.as_deref()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);
    readiness.mark_ready();

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(readiness))
        .await?;

    sweeper.abort();
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(readiness: creatorpay_core::ReadinessState) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    readiness.start_draining();
    tracing::info!("Shutdown signal received, draining connections");
}
