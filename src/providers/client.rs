// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Provider REST integration: customers, consent links, custody wallets,
//! virtual accounts and the canonical activity/transfer listings.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use crate::config::ProviderConfig;
use crate::models::{Currency, CustomerSnapshot};
use crate::storage::RoutingDetails;

const API_KEY_HEADER: &str = "Api-Key";
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
/// Stablecoin every virtual account settles into.
const DESTINATION_CURRENCY: &str = "usdc";

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider configuration missing: {0}")]
    MissingConfig(String),

    #[error("Provider resource not found: {0}")]
    NotFound(String),

    /// The Provider already holds a resource with the same identity.
    #[error("Provider resource already exists: {0}")]
    Duplicate(String),

    #[error("Provider request timed out: {0}")]
    Timeout(String),

    #[error("Provider request failed: {0}")]
    Request(String),

    #[error("Provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Provider response was invalid: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Network failures, timeouts and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Timeout(_) | ProviderError::Request(_) => true,
            ProviderError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// A custody wallet as returned by the Provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderWallet {
    pub wallet_id: String,
    pub chain: String,
    pub address: String,
    pub status: String,
}

/// A virtual account as returned by the Provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderVirtualAccount {
    pub account_id: String,
    pub currency: Currency,
    pub routing_details: RoutingDetails,
    pub status: String,
}

/// The Provider operations this service depends on.
///
/// Every call is network I/O and may fail or time out.
#[async_trait]
pub trait ProviderApi: Send + Sync {
    async fn get_customer(&self, customer_id: &str) -> Result<CustomerSnapshot, ProviderError>;

    /// Create a customer. `idempotency_key` must be stable per user.
    async fn create_customer(
        &self,
        payload: &Value,
        idempotency_key: &str,
    ) -> Result<CustomerSnapshot, ProviderError>;

    async fn update_customer(
        &self,
        customer_id: &str,
        patch: &Value,
    ) -> Result<CustomerSnapshot, ProviderError>;

    async fn list_customers_by_email(
        &self,
        email: &str,
    ) -> Result<Vec<CustomerSnapshot>, ProviderError>;

    /// Hosted terms-of-service link the user must accept.
    async fn get_tos_link(&self, email: &str, customer_type: &str)
        -> Result<String, ProviderError>;

    async fn create_wallet(
        &self,
        customer_id: &str,
        chain: &str,
    ) -> Result<ProviderWallet, ProviderError>;

    async fn create_virtual_account(
        &self,
        customer_id: &str,
        currency: Currency,
        wallet_id: Option<&str>,
    ) -> Result<ProviderVirtualAccount, ProviderError>;

    /// Canonical activity history of one virtual account, raw.
    async fn list_virtual_account_activity(
        &self,
        customer_id: &str,
        account_id: &str,
    ) -> Result<Vec<Value>, ProviderError>;

    /// Canonical transfers of a customer, raw.
    async fn list_transfers(&self, customer_id: &str) -> Result<Vec<Value>, ProviderError>;
}

// =============================================================================
// HTTP client
// =============================================================================

#[derive(Debug, Clone)]
pub struct HttpProviderClient {
    base_url: String,
    api_key: String,
    http: Client,
}

impl HttpProviderClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::MissingConfig("PROVIDER_API_KEY".to_string()));
        }
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.base_url.as_str().trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json(&self, path: &str) -> Result<Value, ProviderError> {
        let response = self
            .http
            .get(self.url(path))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| transport_error("GET", path, e))?;
        read_json("GET", path, response).await
    }

    async fn send_json(
        &self,
        method: reqwest::Method,
        path: &str,
        payload: &Value,
        idempotency_key: Option<&str>,
    ) -> Result<Value, ProviderError> {
        let label = method.to_string();
        let mut request = self
            .http
            .request(method, self.url(path))
            .header(API_KEY_HEADER, &self.api_key)
            .json(payload);
        if let Some(key) = idempotency_key {
            request = request.header(IDEMPOTENCY_HEADER, key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(&label, path, e))?;
        read_json(&label, path, response).await
    }
}

#[async_trait]
impl ProviderApi for HttpProviderClient {
    async fn get_customer(&self, customer_id: &str) -> Result<CustomerSnapshot, ProviderError> {
        let path = format!("/v0/customers/{customer_id}");
        let response = self.get_json(&path).await?;
        parse_customer(&response)
    }

    async fn create_customer(
        &self,
        payload: &Value,
        idempotency_key: &str,
    ) -> Result<CustomerSnapshot, ProviderError> {
        let response = self
            .send_json(
                reqwest::Method::POST,
                "/v0/customers",
                payload,
                Some(idempotency_key),
            )
            .await?;
        parse_customer(&response)
    }

    async fn update_customer(
        &self,
        customer_id: &str,
        patch: &Value,
    ) -> Result<CustomerSnapshot, ProviderError> {
        let path = format!("/v0/customers/{customer_id}");
        let response = self
            .send_json(reqwest::Method::PUT, &path, patch, None)
            .await?;
        parse_customer(&response)
    }

    async fn list_customers_by_email(
        &self,
        email: &str,
    ) -> Result<Vec<CustomerSnapshot>, ProviderError> {
        let url = Url::parse_with_params(&self.url("/v0/customers"), &[("email", email)])
            .map_err(|e| ProviderError::MissingConfig(format!("invalid base URL: {e}")))?;
        let path = format!("/v0/customers?{}", url.query().unwrap_or_default());
        let response = self.get_json(&path).await?;
        Ok(list_items(&response)
            .iter()
            .filter_map(CustomerSnapshot::from_value)
            .collect())
    }

    async fn get_tos_link(
        &self,
        email: &str,
        customer_type: &str,
    ) -> Result<String, ProviderError> {
        let payload = json!({ "email": email, "type": customer_type });
        let key = uuid::Uuid::new_v4().to_string();
        let response = self
            .send_json(
                reqwest::Method::POST,
                "/v0/customers/tos_links",
                &payload,
                Some(&key),
            )
            .await?;
        response
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::InvalidResponse("missing url in TOS link".to_string()))
    }

    async fn create_wallet(
        &self,
        customer_id: &str,
        chain: &str,
    ) -> Result<ProviderWallet, ProviderError> {
        let path = format!("/v0/customers/{customer_id}/wallets");
        let key = format!("wallet-{customer_id}-{chain}");
        let response = self
            .send_json(
                reqwest::Method::POST,
                &path,
                &json!({ "chain": chain }),
                Some(&key),
            )
            .await?;
        parse_wallet(&response, chain)
    }

    async fn create_virtual_account(
        &self,
        customer_id: &str,
        currency: Currency,
        wallet_id: Option<&str>,
    ) -> Result<ProviderVirtualAccount, ProviderError> {
        let path = format!("/v0/customers/{customer_id}/virtual_accounts");
        let key = format!("va-{customer_id}-{currency}");
        let mut destination = json!({ "currency": DESTINATION_CURRENCY });
        if let Some(wallet_id) = wallet_id {
            destination["wallet_id"] = Value::String(wallet_id.to_string());
        }
        let payload = json!({
            "source": { "currency": currency.as_str() },
            "destination": destination,
        });

        let response = self
            .send_json(reqwest::Method::POST, &path, &payload, Some(&key))
            .await?;
        parse_virtual_account(&response, currency)
    }

    async fn list_virtual_account_activity(
        &self,
        customer_id: &str,
        account_id: &str,
    ) -> Result<Vec<Value>, ProviderError> {
        let path = format!("/v0/customers/{customer_id}/virtual_accounts/{account_id}/history");
        let response = self.get_json(&path).await?;
        Ok(list_items(&response))
    }

    async fn list_transfers(&self, customer_id: &str) -> Result<Vec<Value>, ProviderError> {
        let path = format!("/v0/customers/{customer_id}/transfers");
        let response = self.get_json(&path).await?;
        Ok(list_items(&response))
    }
}

// =============================================================================
// Response handling
// =============================================================================

fn transport_error(method: &str, path: &str, error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout(format!("{method} {path}"))
    } else {
        ProviderError::Request(format!("{method} {path} failed: {error}"))
    }
}

async fn read_json(
    method: &str,
    path: &str,
    response: reqwest::Response,
) -> Result<Value, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let error = classify_status(status, &body);
        warn!(%method, %path, status = status.as_u16(), error = %error, "Provider call failed");
        return Err(error);
    }
    debug!(%method, %path, status = status.as_u16(), "Provider call succeeded");

    response
        .json()
        .await
        .map_err(|e| ProviderError::InvalidResponse(format!("{method} {path} invalid JSON: {e}")))
}

/// Map a non-success Provider response to an error.
///
/// The Provider reports duplicates either as 409 or as a 400 whose body
/// mentions an existing resource.
pub fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let lowered = body.to_ascii_lowercase();
    match status {
        StatusCode::NOT_FOUND => ProviderError::NotFound(body.to_string()),
        StatusCode::CONFLICT => ProviderError::Duplicate(body.to_string()),
        StatusCode::BAD_REQUEST
            if lowered.contains("already exists") || lowered.contains("duplicate") =>
        {
            ProviderError::Duplicate(body.to_string())
        }
        StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => {
            ProviderError::Timeout(format!("status {}", status.as_u16()))
        }
        _ => ProviderError::Status {
            status: status.as_u16(),
            body: body.to_string(),
        },
    }
}

/// Items of a list response (`{"data": [...]}` or a bare array).
fn list_items(response: &Value) -> Vec<Value> {
    response
        .get("data")
        .and_then(Value::as_array)
        .or_else(|| response.as_array())
        .cloned()
        .unwrap_or_default()
}

fn parse_customer(response: &Value) -> Result<CustomerSnapshot, ProviderError> {
    CustomerSnapshot::from_value(response)
        .ok_or_else(|| ProviderError::InvalidResponse("missing customer id".to_string()))
}

fn parse_wallet(response: &Value, chain: &str) -> Result<ProviderWallet, ProviderError> {
    let wallet_id = response
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::InvalidResponse("missing wallet id".to_string()))?;
    let address = response
        .get("address")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::InvalidResponse("missing wallet address".to_string()))?;

    Ok(ProviderWallet {
        wallet_id: wallet_id.to_string(),
        chain: response
            .get("chain")
            .and_then(Value::as_str)
            .unwrap_or(chain)
            .to_string(),
        address: address.to_string(),
        status: response
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("active")
            .to_string(),
    })
}

/// Parse a created virtual account, including its deposit instructions.
pub fn parse_virtual_account(
    response: &Value,
    currency: Currency,
) -> Result<ProviderVirtualAccount, ProviderError> {
    let account_id = response
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::InvalidResponse("missing virtual account id".to_string()))?;
    let instructions = response
        .get("source_deposit_instructions")
        .ok_or_else(|| {
            ProviderError::InvalidResponse("missing source_deposit_instructions".to_string())
        })?;

    let field = |name: &str| {
        instructions
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let routing_details = if let Some(iban) = field("iban") {
        RoutingDetails::Iban {
            iban,
            bic: field("bic"),
            account_holder_name: field("account_holder_name"),
        }
    } else {
        match (field("bank_account_number"), field("bank_routing_number")) {
            (Some(account_number), Some(routing_number)) => RoutingDetails::Ach {
                account_number,
                routing_number,
                bank_name: field("bank_name"),
            },
            _ => {
                return Err(ProviderError::InvalidResponse(
                    "deposit instructions carry neither IBAN nor ACH details".to_string(),
                ))
            }
        }
    };

    Ok(ProviderVirtualAccount {
        account_id: account_id.to_string(),
        currency,
        routing_details,
        status: response
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("activated")
            .to_string(),
    })
}

/// Default per-call timeout when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
