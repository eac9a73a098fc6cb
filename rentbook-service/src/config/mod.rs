use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub gateway: GatewayConfig,
    pub messaging: MessagingConfig,
    pub payments: PaymentsConfig,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Mongo,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(StoreBackend::Mongo),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(anyhow!("unknown STORE_BACKEND '{}'", other)),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database: Option<DatabaseConfig>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub db_name: String,
}

/// Mobile-money provider settings. Credentials are never compiled in.
#[derive(Deserialize, Clone, Debug)]
pub struct GatewayConfig {
    pub base_url: String,
    pub merchant: String,
    pub token: Secret<String>,
    pub callback_url: String,
    pub callback_token: Option<Secret<String>>,
    pub timeout_secs: u64,
    pub verify_delay_secs: u64,
}

#[derive(Deserialize, Clone, Debug)]
pub struct MessagingConfig {
    pub enabled: bool,
    pub api_base_url: String,
    pub phone_number_id: String,
    pub access_token: Secret<String>,
    pub receipt_template: String,
    pub template_language: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct PaymentsConfig {
    pub public_manual_payments_enabled: bool,
    pub default_country_code: String,
    pub receipt_max_attempts: u32,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid {}: {}", key, e)),
        Err(_) => Ok(default),
    }
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = var_or("RENTBOOK_SERVICE_HOST", "0.0.0.0");
        let port = parse_var("RENTBOOK_SERVICE_PORT", 3010u16)?;

        let backend: StoreBackend = parse_var("STORE_BACKEND", StoreBackend::Mongo)?;
        let database = match backend {
            StoreBackend::Mongo => {
                let url = env::var("RENTBOOK_DATABASE_URL")
                    .context("RENTBOOK_DATABASE_URL must be set when STORE_BACKEND=mongo")?;
                Some(DatabaseConfig {
                    url: Secret::new(url),
                    db_name: var_or("RENTBOOK_DATABASE_NAME", "rentbook_db"),
                })
            }
            StoreBackend::Memory => None,
        };

        let gateway = GatewayConfig {
            base_url: var_or("GATEWAY_BASE_URL", ""),
            merchant: var_or("GATEWAY_MERCHANT", ""),
            token: Secret::new(var_or("GATEWAY_TOKEN", "")),
            callback_url: var_or(
                "GATEWAY_CALLBACK_URL",
                "http://localhost:3010/payments/callback",
            ),
            callback_token: optional_var("GATEWAY_CALLBACK_TOKEN").map(Secret::new),
            timeout_secs: parse_var("GATEWAY_TIMEOUT_SECS", 30u64)?,
            verify_delay_secs: parse_var("GATEWAY_VERIFY_DELAY_SECS", 300u64)?,
        };

        let messaging = MessagingConfig {
            enabled: parse_var("WHATSAPP_ENABLED", false)?,
            api_base_url: var_or("WHATSAPP_API_BASE_URL", "https://graph.facebook.com/v19.0"),
            phone_number_id: var_or("WHATSAPP_PHONE_NUMBER_ID", ""),
            access_token: Secret::new(var_or("WHATSAPP_ACCESS_TOKEN", "")),
            receipt_template: var_or("WHATSAPP_RECEIPT_TEMPLATE", "payment_receipt"),
            template_language: var_or("WHATSAPP_TEMPLATE_LANGUAGE", "fr"),
        };

        let payments = PaymentsConfig {
            public_manual_payments_enabled: parse_var("PUBLIC_MANUAL_PAYMENTS_ENABLED", true)?,
            default_country_code: var_or("DEFAULT_COUNTRY_CODE", "243"),
            receipt_max_attempts: parse_var("RECEIPT_MAX_ATTEMPTS", 5u32)?,
        };

        Ok(Self {
            server: ServerConfig { host, port },
            store: StoreConfig { backend, database },
            gateway,
            messaging,
            payments,
            service_name: "rentbook-service".to_string(),
            log_level: var_or("RUST_LOG", "info,rentbook_service=debug"),
            otlp_endpoint: optional_var("OTLP_ENDPOINT"),
        })
    }

    /// In-process configuration with the memory store and no provider
    /// credentials, bound to an ephemeral port.
    pub fn for_local() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            store: StoreConfig {
                backend: StoreBackend::Memory,
                database: None,
            },
            gateway: GatewayConfig {
                base_url: String::new(),
                merchant: String::new(),
                token: Secret::new(String::new()),
                callback_url: "http://localhost/payments/callback".to_string(),
                callback_token: None,
                timeout_secs: 30,
                verify_delay_secs: 300,
            },
            messaging: MessagingConfig {
                enabled: false,
                api_base_url: String::new(),
                phone_number_id: String::new(),
                access_token: Secret::new(String::new()),
                receipt_template: "payment_receipt".to_string(),
                template_language: "fr".to_string(),
            },
            payments: PaymentsConfig {
                public_manual_payments_enabled: true,
                default_country_code: "243".to_string(),
                receipt_max_attempts: 5,
            },
            service_name: "rentbook-service".to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
        }
    }
}
