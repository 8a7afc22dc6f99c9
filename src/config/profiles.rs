use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Profile {
    Development,
    Staging,
    Production,
}

impl Profile {
    pub fn from_env() -> Self {
        std::env::var("APP_PROFILE")
            .ok()
            .and_then(|s| Self::parse(&s))
            .unwrap_or(Self::Development)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "staging" | "stage" => Some(Self::Staging),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

/// Whether gateways are real provider clients or the in-process sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayMode {
    Sandbox,
    Live,
}

impl std::str::FromStr for GatewayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sandbox" => Ok(Self::Sandbox),
            "live" => Ok(Self::Live),
            other => Err(format!("unknown gateway mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProfileDefaults {
    pub server_port: u16,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub gateway_mode: GatewayMode,
    pub pix_gateway_url: String,
    pub card_gateway_url: String,
    pub campaign_api_url: Option<String>,
    pub gateway_timeout_secs: u64,
    pub pix_ttl_secs: i64,
    pub intent_ttl_secs: i64,
    pub sweep_interval_secs: u64,
    pub currency: String,
    pub cors_allowed_origins: Option<String>,
    pub log_format: LogFormat,
}

impl ProfileDefaults {
    pub fn for_profile(profile: Profile) -> Self {
        match profile {
            Profile::Development => Self {
                server_port: 3000,
                database_url: None,
                database_max_connections: 5,
                gateway_mode: GatewayMode::Sandbox,
                pix_gateway_url: "http://localhost:4010".to_string(),
                card_gateway_url: "http://localhost:4020".to_string(),
                campaign_api_url: None,
                gateway_timeout_secs: 10,
                pix_ttl_secs: 900,
                intent_ttl_secs: 86_400,
                sweep_interval_secs: 30,
                currency: "BRL".to_string(),
                cors_allowed_origins: None,
                log_format: LogFormat::Pretty,
            },
            Profile::Staging => Self {
                server_port: 8080,
                database_url: None,
                database_max_connections: 10,
                gateway_mode: GatewayMode::Live,
                pix_gateway_url: "https://sandbox.pix-provider.example.com".to_string(),
                card_gateway_url: "https://sandbox.card-provider.example.com".to_string(),
                campaign_api_url: Some("http://web:8000".to_string()),
                gateway_timeout_secs: 10,
                pix_ttl_secs: 900,
                intent_ttl_secs: 86_400,
                sweep_interval_secs: 60,
                currency: "BRL".to_string(),
                cors_allowed_origins: Some("https://staging.example.com".to_string()),
                log_format: LogFormat::Json,
            },
            Profile::Production => Self {
                server_port: 8080,
                database_url: None,
                database_max_connections: 20,
                gateway_mode: GatewayMode::Live,
                pix_gateway_url: "https://api.pix-provider.example.com".to_string(),
                card_gateway_url: "https://api.card-provider.example.com".to_string(),
                campaign_api_url: Some("http://web:8000".to_string()),
                gateway_timeout_secs: 10,
                pix_ttl_secs: 900,
                intent_ttl_secs: 86_400,
                sweep_interval_secs: 60,
                currency: "BRL".to_string(),
                cors_allowed_origins: Some("https://app.example.com".to_string()),
                log_format: LogFormat::Json,
            },
        }
    }
}
