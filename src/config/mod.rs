pub mod profiles;

use crate::domain::MAX_PAYMENT_CENTS;
use dotenvy::dotenv;
use profiles::{GatewayMode, LogFormat, Profile, ProfileDefaults};
use serde::Serialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Serialize, Clone)]
pub struct Config {
    pub server_port: u16,
    /// `None` runs on in-memory storage; only accepted in development.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub gateway_mode: GatewayMode,
    pub pix_gateway_url: String,
    #[serde(skip_serializing)]
    pub pix_api_key: String,
    #[serde(skip_serializing)]
    pub pix_webhook_secret: String,
    pub card_gateway_url: String,
    #[serde(skip_serializing)]
    pub card_api_key: String,
    #[serde(skip_serializing)]
    pub card_webhook_secret: String,
    pub campaign_api_url: Option<String>,
    #[serde(skip_serializing)]
    pub campaign_api_token: String,
    pub gateway_timeout_secs: u64,
    pub pix_ttl_secs: i64,
    pub intent_ttl_secs: i64,
    pub sweep_interval_secs: u64,
    pub currency: String,
    /// Ceiling on a single fee or deposit, in cents.
    pub max_payment_cents: i64,
    pub max_settle_attempts: i32,
    pub cors_allowed_origins: Option<String>,
    pub log_format: LogFormat,
}

pub struct ConfigInfo {
    pub config: Config,
    pub profile: Profile,
    pub overrides: Vec<String>,
}

/// Reads `key`, parsing it into `T`, and records it as an override when present.
/// Unparseable values fall back to the profile default.
fn env_or<T: FromStr>(key: &str, default: T, overrides: &mut Vec<String>) -> T {
    match env::var(key) {
        Ok(raw) => {
            overrides.push(key.to_string());
            raw.parse().unwrap_or(default)
        }
        Err(_) => default,
    }
}

fn env_opt(key: &str, default: Option<String>, overrides: &mut Vec<String>) -> Option<String> {
    match env::var(key) {
        Ok(v) => {
            overrides.push(key.to_string());
            Some(v)
        }
        Err(_) => default,
    }
}

const DEV_WEBHOOK_SECRET: &str = "dev-webhook-secret";

impl Config {
    pub fn from_env() -> anyhow::Result<ConfigInfo> {
        dotenv().ok();

        let profile = Profile::from_env();
        let defaults = ProfileDefaults::for_profile(profile);
        let mut overrides = Vec::new();
        let o = &mut overrides;

        let config = Config {
            server_port: env_or("SERVER_PORT", defaults.server_port, o),
            database_url: env_opt("DATABASE_URL", defaults.database_url, o),
            database_max_connections: env_or(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
                o,
            ),
            gateway_mode: env_or("GATEWAY_MODE", defaults.gateway_mode, o),
            pix_gateway_url: env_or("PIX_GATEWAY_URL", defaults.pix_gateway_url, o),
            pix_api_key: env_or("PIX_API_KEY", String::new(), o),
            pix_webhook_secret: env_or("PIX_WEBHOOK_SECRET", DEV_WEBHOOK_SECRET.to_string(), o),
            card_gateway_url: env_or("CARD_GATEWAY_URL", defaults.card_gateway_url, o),
            card_api_key: env_or("CARD_API_KEY", String::new(), o),
            card_webhook_secret: env_or("CARD_WEBHOOK_SECRET", DEV_WEBHOOK_SECRET.to_string(), o),
            campaign_api_url: env_opt("CAMPAIGN_API_URL", defaults.campaign_api_url, o),
            campaign_api_token: env_or("CAMPAIGN_API_TOKEN", String::new(), o),
            gateway_timeout_secs: env_or("GATEWAY_TIMEOUT_SECS", defaults.gateway_timeout_secs, o),
            pix_ttl_secs: env_or("PIX_TTL_SECS", defaults.pix_ttl_secs, o),
            intent_ttl_secs: env_or("INTENT_TTL_SECS", defaults.intent_ttl_secs, o),
            sweep_interval_secs: env_or("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs, o),
            currency: env_or("CURRENCY", defaults.currency, o),
            max_payment_cents: env_or("MAX_PAYMENT_CENTS", MAX_PAYMENT_CENTS, o),
            max_settle_attempts: env_or("MAX_SETTLE_ATTEMPTS", 10, o),
            cors_allowed_origins: env_opt("CORS_ALLOWED_ORIGINS", defaults.cors_allowed_origins, o),
            log_format: env_or("LOG_FORMAT", defaults.log_format, o),
        };

        config.validate(profile)?;

        Ok(ConfigInfo {
            config,
            profile,
            overrides,
        })
    }

    /// Refuses settings that would be unsafe outside a developer machine.
    pub fn validate(&self, profile: Profile) -> anyhow::Result<()> {
        if profile != Profile::Development && self.database_url.is_none() {
            anyhow::bail!("DATABASE_URL must be set for the {} profile", profile.as_str());
        }

        if self.gateway_mode == GatewayMode::Live {
            let required = [
                ("PIX_API_KEY", self.pix_api_key.as_str()),
                ("CARD_API_KEY", self.card_api_key.as_str()),
                ("CAMPAIGN_API_TOKEN", self.campaign_api_token.as_str()),
            ];
            for (key, value) in required {
                if value.is_empty() {
                    anyhow::bail!("{} must be set when GATEWAY_MODE=live", key);
                }
            }
            for (key, secret) in [
                ("PIX_WEBHOOK_SECRET", &self.pix_webhook_secret),
                ("CARD_WEBHOOK_SECRET", &self.card_webhook_secret),
            ] {
                if secret == DEV_WEBHOOK_SECRET {
                    anyhow::bail!("{} must be set when GATEWAY_MODE=live", key);
                }
            }
            if self.campaign_api_url.is_none() {
                anyhow::bail!("CAMPAIGN_API_URL must be set when GATEWAY_MODE=live");
            }
        }

        if self.max_payment_cents <= 0 {
            anyhow::bail!("MAX_PAYMENT_CENTS must be positive");
        }
        if self.max_settle_attempts < 1 {
            anyhow::bail!("MAX_SETTLE_ATTEMPTS must be at least 1");
        }

        if self.currency.len() != 3 {
            anyhow::bail!("CURRENCY must be an ISO 4217 code, got {:?}", self.currency);
        }
        Ok(())
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn intent_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.intent_ttl_secs)
    }
}
