// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded once from the environment at startup into a typed
//! [`Settings`]. Invalid values fail startup with a [`ConfigError`] naming the
//! variable.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `APP_ENV` | `production`, `staging` or `development` | `development` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory of the ledger database | `./data` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `PROVIDER_API_BASE_URL` | Provider REST base URL | sandbox |
//! | `PROVIDER_API_KEY` | Provider API key | Required |
//! | `PROVIDER_REQUEST_TIMEOUT_SECS` | Per-call HTTP timeout | `30` |
//! | `WEBHOOK_PUBLIC_KEY` | PEM or base64 key for webhook signatures | Required in production |
//! | `WEBHOOK_MAX_AGE_SECS` | Webhook replay window | `600` |
//! | `WALLET_CHAIN` | Custody wallet chain | `base` |
//! | `PROVISION_CURRENCIES` | Comma-separated currencies to provision | `usd,eur` |
//! | `ENDORSEMENT_POLL_ATTEMPTS` | Endorsement poll budget | `10` |
//! | `ENDORSEMENT_POLL_INTERVAL_MS` | Delay between endorsement polls | `3000` |
//! | `WALLET_CREATE_TIMEOUT_SECS` | Wallet creation timeout | `15` |
//! | `ACCOUNT_CREATE_TIMEOUT_SECS` | Virtual account creation timeout | `15` |
//! | `PROVISIONING_SUCCESS_POLICY` | `lenient` or `strict` | `lenient` |
//! | `AUTH_JWT_SECRET` | HS256 secret for bearer tokens | Unset: development decode |
//! | `AUTH_ISSUER` | Expected JWT issuer claim | Optional |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM certificate chain and key | Unset: plain HTTP |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::models::Currency;
use crate::provisioning::SuccessPolicy;

pub const DATA_DIR_ENV: &str = "DATA_DIR";

const DEFAULT_PROVIDER_BASE_URL: &str = "https://api.sandbox.provider.test";
const DEFAULT_DATA_DIR: &str = "./data";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Staging,
    Production,
}

impl AppEnv {
    /// Staging and production enforce webhook signatures.
    pub fn is_production_like(&self) -> bool {
        matches!(self, AppEnv::Staging | AppEnv::Production)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppEnv::Development => "development",
            AppEnv::Staging => "staging",
            AppEnv::Production => "production",
        }
    }
}

impl FromStr for AppEnv {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" | "test" => Ok(AppEnv::Development),
            "staging" => Ok(AppEnv::Staging),
            "production" | "prod" => Ok(AppEnv::Production),
            other => Err(format!("unknown environment `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: Url,
    pub api_key: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Raw key material; `None` means verification is not configured.
    pub public_key: Option<String>,
    pub max_age: Duration,
}

#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    pub chain: String,
    pub currencies: Vec<Currency>,
    pub poll_attempts: u32,
    pub poll_interval: Duration,
    pub wallet_timeout: Duration,
    pub account_timeout: Duration,
    pub success_policy: SuccessPolicy,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            chain: "base".to_string(),
            currencies: vec![Currency::Usd, Currency::Eur],
            poll_attempts: 10,
            poll_interval: Duration::from_millis(3000),
            wallet_timeout: Duration::from_secs(15),
            account_timeout: Duration::from_secs(15),
            success_policy: SuccessPolicy::Lenient,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuthSettings {
    pub jwt_secret: Option<String>,
    pub issuer: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub app_env: AppEnv,
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub log_format: LogFormat,
    pub provider: ProviderConfig,
    pub webhook: WebhookConfig,
    pub provisioning: ProvisioningConfig,
    pub auth: AuthSettings,
    pub tls: Option<TlsSettings>,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let app_env = parse_or("APP_ENV", get("APP_ENV"), AppEnv::Development)?;
        let port = parse_or("PORT", get("PORT"), 8080u16)?;
        let log_format = match get("LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "LOG_FORMAT",
                    reason: format!("expected `json` or `pretty`, got `{other}`"),
                })
            }
        };

        let base_url = get("PROVIDER_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_PROVIDER_BASE_URL.to_string());
        let base_url = Url::parse(&base_url).map_err(|e| ConfigError::Invalid {
            name: "PROVIDER_API_BASE_URL",
            reason: e.to_string(),
        })?;
        let provider = ProviderConfig {
            base_url,
            api_key: get("PROVIDER_API_KEY").ok_or(ConfigError::Missing("PROVIDER_API_KEY"))?,
            request_timeout: Duration::from_secs(parse_or(
                "PROVIDER_REQUEST_TIMEOUT_SECS",
                get("PROVIDER_REQUEST_TIMEOUT_SECS"),
                crate::providers::client::DEFAULT_REQUEST_TIMEOUT.as_secs(),
            )?),
        };

        let webhook = WebhookConfig {
            public_key: get("WEBHOOK_PUBLIC_KEY"),
            max_age: Duration::from_secs(parse_or(
                "WEBHOOK_MAX_AGE_SECS",
                get("WEBHOOK_MAX_AGE_SECS"),
                600u64,
            )?),
        };

        let defaults = ProvisioningConfig::default();
        let currencies = match get("PROVISION_CURRENCIES") {
            Some(raw) => parse_currencies(&raw)?,
            None => defaults.currencies,
        };
        let provisioning = ProvisioningConfig {
            chain: get("WALLET_CHAIN").unwrap_or(defaults.chain),
            currencies,
            poll_attempts: parse_or(
                "ENDORSEMENT_POLL_ATTEMPTS",
                get("ENDORSEMENT_POLL_ATTEMPTS"),
                defaults.poll_attempts,
            )?,
            poll_interval: Duration::from_millis(parse_or(
                "ENDORSEMENT_POLL_INTERVAL_MS",
                get("ENDORSEMENT_POLL_INTERVAL_MS"),
                3000u64,
            )?),
            wallet_timeout: Duration::from_secs(parse_or(
                "WALLET_CREATE_TIMEOUT_SECS",
                get("WALLET_CREATE_TIMEOUT_SECS"),
                15u64,
            )?),
            account_timeout: Duration::from_secs(parse_or(
                "ACCOUNT_CREATE_TIMEOUT_SECS",
                get("ACCOUNT_CREATE_TIMEOUT_SECS"),
                15u64,
            )?),
            success_policy: parse_or(
                "PROVISIONING_SUCCESS_POLICY",
                get("PROVISIONING_SUCCESS_POLICY"),
                SuccessPolicy::Lenient,
            )?,
        };

        let tls = match (get("TLS_CERT_PATH"), get("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsSettings {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("TLS_KEY_PATH")),
            (None, Some(_)) => return Err(ConfigError::Missing("TLS_CERT_PATH")),
        };

        Ok(Self {
            app_env,
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            data_dir: PathBuf::from(get(DATA_DIR_ENV).unwrap_or_else(|| DEFAULT_DATA_DIR.to_string())),
            log_format,
            provider,
            webhook,
            provisioning,
            auth: AuthSettings {
                jwt_secret: get("AUTH_JWT_SECRET"),
                issuer: get("AUTH_ISSUER"),
            },
            tls,
        })
    }
}

fn parse_or<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_currencies(raw: &str) -> Result<Vec<Currency>, ConfigError> {
    let mut currencies = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let currency = part.parse::<Currency>().map_err(|reason| ConfigError::Invalid {
            name: "PROVISION_CURRENCIES",
            reason,
        })?;
        if !currencies.contains(&currency) {
            currencies.push(currency);
        }
    }
    if currencies.is_empty() {
        return Err(ConfigError::Invalid {
            name: "PROVISION_CURRENCIES",
            reason: "at least one currency is required".to_string(),
        });
    }
    Ok(currencies)
}
