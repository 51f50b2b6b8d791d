// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared test fixtures: an in-memory Provider, signed webhooks and an
//! application state over a temporary ledger.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use ring::rand::SystemRandom;
use ring::signature::{RsaKeyPair, RSA_PKCS1_SHA256};
use serde_json::{json, Map, Value};

use crate::config::ProvisioningConfig;
use crate::models::{Currency, CustomerSnapshot, Endorsement, EndorsementStatus};
use crate::providers::{
    ComplianceSubmission, ProviderApi, ProviderError, ProviderVirtualAccount, ProviderWallet,
    SubmissionKind, SubmissionStatus,
};
use crate::state::AppState;
use crate::storage::ledger_db::temp_db;
use crate::storage::{LedgerDatabase, RoutingDetails};

pub const WEBHOOK_PUBLIC_KEY_SPKI: &str =
    include_str!("../tests/fixtures/webhook_public_key_spki.pem");
pub const WEBHOOK_PUBLIC_KEY_PKCS1: &str =
    include_str!("../tests/fixtures/webhook_public_key_pkcs1.pem");
const WEBHOOK_SIGNING_KEY: &str = include_str!("../tests/fixtures/webhook_signing_key.pem");

/// Produce a `t=<ms>,v0=<base64>` header for `body` signed at `timestamp_ms`.
pub fn sign_webhook(body: &[u8], timestamp_ms: i64) -> String {
    let der = pem::parse(WEBHOOK_SIGNING_KEY).unwrap().into_contents();
    let key = RsaKeyPair::from_pkcs8(&der).unwrap();

    let mut message = format!("{timestamp_ms}.").into_bytes();
    message.extend_from_slice(body);

    let mut signature = vec![0u8; key.public().modulus_len()];
    key.sign(&RSA_PKCS1_SHA256, &SystemRandom::new(), &message, &mut signature)
        .unwrap();
    format!("t={timestamp_ms},v0={}", STANDARD.encode(signature))
}

/// A structurally valid JWT with a fake signature, for development-mode auth.
pub fn unsigned_jwt(user_id: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#);
    let claims = json!({
        "sub": user_id,
        "iat": 1_700_000_000,
        "exp": 9_999_999_999i64,
        "iss": "test",
        "sid": "sess_123",
        "email": "a@example.com",
    });
    let claims = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{claims}.fake_signature")
}

/// An active customer with the given `(endorsement, status)` pairs.
pub fn customer(customer_id: &str, endorsements: &[(&str, &str)]) -> CustomerSnapshot {
    CustomerSnapshot {
        customer_id: customer_id.to_string(),
        kyc_status: Some("active".to_string()),
        email: None,
        signed_agreement_id: None,
        endorsements: endorsements
            .iter()
            .map(|(name, status)| Endorsement {
                name: name.to_string(),
                status: EndorsementStatus::from_provider(status),
                missing_requirements: Vec::new(),
            })
            .collect(),
    }
}

pub fn submission(kind: &str, status: &str) -> ComplianceSubmission {
    serde_json::from_value(json!({ "type": kind, "status": status })).unwrap()
}

fn approved(kind: SubmissionKind, fields: Value) -> ComplianceSubmission {
    let fields: Map<String, Value> = serde_json::from_value(fields).unwrap();
    ComplianceSubmission {
        kind,
        status: SubmissionStatus::Approved,
        fields,
    }
}

/// Approved identity and address submissions for Ada Lovelace.
pub fn approved_submissions() -> Vec<ComplianceSubmission> {
    vec![
        approved(
            SubmissionKind::Identity,
            json!({
                "first_name": "Ada",
                "last_name": "Lovelace",
                "birth_date": "1990-12-10",
                "phone": "+351910000000",
                "id_number": "123-45-6789",
                "country": "usa"
            }),
        ),
        approved(
            SubmissionKind::Address,
            json!({
                "street_line_1": "Rua Augusta 1",
                "city": "Lisbon",
                "postal_code": "1100-053",
                "country": "PRT"
            }),
        ),
    ]
}

// =============================================================================
// In-memory Provider
// =============================================================================

/// Number of calls made to each [`ProviderApi`] operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get_customer: usize,
    pub create_customer: usize,
    pub update_customer: usize,
    pub list_customers_by_email: usize,
    pub get_tos_link: usize,
    pub create_wallet: usize,
    pub create_virtual_account: usize,
    pub list_activity: usize,
    pub list_transfers: usize,
}

#[derive(Default)]
struct FakeState {
    customers: HashMap<String, CustomerSnapshot>,
    /// Endorsement statuses served by successive `get_customer` calls; the
    /// last entry repeats.
    scripts: HashMap<(String, String), VecDeque<EndorsementStatus>>,
    next_create_error: Option<ProviderError>,
    wallet_delay: Option<Duration>,
    activity: HashMap<String, Vec<Value>>,
    transfers: HashMap<String, Vec<Value>>,
    patches: Vec<(String, Value)>,
    create_keys: Vec<String>,
    calls: CallCounts,
    created: usize,
}

/// Deterministic in-memory stand-in for the Provider.
#[derive(Default)]
pub struct FakeProvider {
    state: Mutex<FakeState>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn insert_customer(&self, snapshot: CustomerSnapshot) {
        self.with_state(|s| {
            s.customers.insert(snapshot.customer_id.clone(), snapshot);
        });
    }

    pub fn script_endorsement(&self, customer_id: &str, name: &str, statuses: &[EndorsementStatus]) {
        self.with_state(|s| {
            s.scripts.insert(
                (customer_id.to_string(), name.to_string()),
                statuses.iter().copied().collect(),
            );
        });
    }

    pub fn fail_next_create_customer(&self, error: ProviderError) {
        self.with_state(|s| s.next_create_error = Some(error));
    }

    pub fn set_wallet_delay(&self, delay: Duration) {
        self.with_state(|s| s.wallet_delay = Some(delay));
    }

    pub fn set_activity(&self, account_id: &str, items: Vec<Value>) {
        self.with_state(|s| {
            s.activity.insert(account_id.to_string(), items);
        });
    }

    pub fn set_transfers(&self, customer_id: &str, items: Vec<Value>) {
        self.with_state(|s| {
            s.transfers.insert(customer_id.to_string(), items);
        });
    }

    pub fn calls(&self) -> CallCounts {
        self.with_state(|s| s.calls)
    }

    pub fn patches(&self) -> Vec<(String, Value)> {
        self.with_state(|s| s.patches.clone())
    }

    /// Idempotency keys passed to `create_customer`, in call order.
    pub fn create_customer_keys(&self) -> Vec<String> {
        self.with_state(|s| s.create_keys.clone())
    }
}

fn set_endorsement(snapshot: &mut CustomerSnapshot, name: &str, status: EndorsementStatus) {
    match snapshot.endorsements.iter_mut().find(|e| e.name == name) {
        Some(endorsement) => endorsement.status = status,
        None => snapshot.endorsements.push(Endorsement {
            name: name.to_string(),
            status,
            missing_requirements: Vec::new(),
        }),
    }
}

#[async_trait]
impl ProviderApi for FakeProvider {
    async fn get_customer(&self, customer_id: &str) -> Result<CustomerSnapshot, ProviderError> {
        self.with_state(|s| {
            s.calls.get_customer += 1;

            let mut scripted = Vec::new();
            for ((id, name), statuses) in s.scripts.iter_mut() {
                if id != customer_id {
                    continue;
                }
                let status = if statuses.len() > 1 {
                    statuses.pop_front()
                } else {
                    statuses.front().copied()
                };
                if let Some(status) = status {
                    scripted.push((name.clone(), status));
                }
            }

            let snapshot = s
                .customers
                .get_mut(customer_id)
                .ok_or_else(|| ProviderError::NotFound(format!("customer {customer_id}")))?;
            for (name, status) in scripted {
                set_endorsement(snapshot, &name, status);
            }
            Ok(snapshot.clone())
        })
    }

    async fn create_customer(
        &self,
        payload: &Value,
        idempotency_key: &str,
    ) -> Result<CustomerSnapshot, ProviderError> {
        self.with_state(|s| {
            s.calls.create_customer += 1;
            s.create_keys.push(idempotency_key.to_string());
            if let Some(error) = s.next_create_error.take() {
                return Err(error);
            }

            s.created += 1;
            let mut snapshot = customer(
                &format!("cust_new_{}", s.created),
                &[("base", "approved"), ("sepa", "approved")],
            );
            snapshot.email = payload["email"].as_str().map(str::to_string);
            snapshot.signed_agreement_id =
                payload["signed_agreement_id"].as_str().map(str::to_string);
            s.customers
                .insert(snapshot.customer_id.clone(), snapshot.clone());
            Ok(snapshot)
        })
    }

    async fn update_customer(
        &self,
        customer_id: &str,
        patch: &Value,
    ) -> Result<CustomerSnapshot, ProviderError> {
        self.with_state(|s| {
            s.calls.update_customer += 1;
            s.patches.push((customer_id.to_string(), patch.clone()));
            s.customers
                .get(customer_id)
                .cloned()
                .ok_or_else(|| ProviderError::NotFound(format!("customer {customer_id}")))
        })
    }

    async fn list_customers_by_email(
        &self,
        email: &str,
    ) -> Result<Vec<CustomerSnapshot>, ProviderError> {
        self.with_state(|s| {
            s.calls.list_customers_by_email += 1;
            Ok(s.customers
                .values()
                .filter(|c| c.email.as_deref() == Some(email))
                .cloned()
                .collect())
        })
    }

    async fn get_tos_link(
        &self,
        email: &str,
        customer_type: &str,
    ) -> Result<String, ProviderError> {
        self.with_state(|s| s.calls.get_tos_link += 1);
        Ok(format!(
            "https://provider.test/accept-terms?email={email}&type={customer_type}"
        ))
    }

    async fn create_wallet(
        &self,
        customer_id: &str,
        chain: &str,
    ) -> Result<ProviderWallet, ProviderError> {
        let delay = self.with_state(|s| {
            s.calls.create_wallet += 1;
            s.wallet_delay
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(ProviderWallet {
            wallet_id: format!("wal_{customer_id}_{chain}"),
            chain: chain.to_string(),
            address: format!("0x{}", hex::encode(customer_id.as_bytes())),
            status: "active".to_string(),
        })
    }

    async fn create_virtual_account(
        &self,
        customer_id: &str,
        currency: Currency,
        _wallet_id: Option<&str>,
    ) -> Result<ProviderVirtualAccount, ProviderError> {
        self.with_state(|s| s.calls.create_virtual_account += 1);
        let routing_details = match currency {
            Currency::Usd => RoutingDetails::Ach {
                account_number: "900000001".to_string(),
                routing_number: "101019644".to_string(),
                bank_name: Some("Lead Bank".to_string()),
            },
            Currency::Eur => RoutingDetails::Iban {
                iban: "IE29AIBK93115212345678".to_string(),
                bic: Some("AIBKIE2D".to_string()),
                account_holder_name: None,
            },
        };
        Ok(ProviderVirtualAccount {
            account_id: format!("va_{customer_id}_{}", currency.as_str()),
            currency,
            routing_details,
            status: "activated".to_string(),
        })
    }

    async fn list_virtual_account_activity(
        &self,
        _customer_id: &str,
        account_id: &str,
    ) -> Result<Vec<Value>, ProviderError> {
        self.with_state(|s| {
            s.calls.list_activity += 1;
            Ok(s.activity.get(account_id).cloned().unwrap_or_default())
        })
    }

    async fn list_transfers(&self, customer_id: &str) -> Result<Vec<Value>, ProviderError> {
        self.with_state(|s| {
            s.calls.list_transfers += 1;
            Ok(s.transfers.get(customer_id).cloned().unwrap_or_default())
        })
    }
}

// =============================================================================
// Application state
// =============================================================================

pub struct TestApp {
    pub state: AppState,
    pub db: Arc<LedgerDatabase>,
    pub provider: Arc<FakeProvider>,
    _dir: tempfile::TempDir,
}

/// Development-mode state without a webhook key, backed by a fresh ledger.
pub fn test_app() -> TestApp {
    let (db, dir) = temp_db();
    let db = Arc::new(db);
    let provider = Arc::new(FakeProvider::new());
    let state = AppState::new(
        db.clone(),
        provider.clone(),
        db.clone(),
        ProvisioningConfig {
            poll_attempts: 2,
            poll_interval: Duration::from_millis(5),
            ..ProvisioningConfig::default()
        },
        None,
    );
    TestApp {
        state,
        db,
        provider,
        _dir: dir,
    }
}
