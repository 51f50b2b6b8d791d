// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Account Provisioning Orchestrator
//!
//! Drives a user from "no Provider customer" to "wallet plus one receiving
//! account per currency":
//!
//! ```text
//! NoCustomer -> CustomerPendingAgreement -> CustomerCreated
//!            -> EndorsementPending -> EndorsementApproved
//!            -> WalletProvisioned -> AccountsProvisioned
//! ```
//!
//! Every step is skipped when already satisfied, so the whole run may be
//! repeated at will and may run twice concurrently for the same user (a
//! direct request and a webhook-triggered run). Each create is preceded by
//! an existence check against the ledger store, and losing the final insert
//! race is reported as `already_existed`.
//!
//! The cached customer id is a hint: it is re-verified against the Provider
//! on entry and dropped when the Provider no longer knows it.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument, warn};

use super::payload::{build_customer_payload, missing_fields_patch, ApprovedSubmissions};
use super::poller::{EndorsementPoller, PollOutcome};
use super::report::{AccountOutcome, EndorsementIssue, ProvisioningReport, ResourceOutcome};
use crate::config::ProvisioningConfig;
use crate::models::{Currency, CustomerSnapshot};
use crate::providers::{ComplianceError, ComplianceSource, ProviderApi, ProviderError};
use crate::storage::{
    CustomerProfile, LedgerDatabase, LedgerDbError, VirtualAccountRecord, WalletRecord,
};

const CUSTOMER_TYPE: &str = "individual";

#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    /// No signed agreement on file; the user must accept the terms first.
    #[error("terms of service must be accepted before provisioning")]
    ConsentRequired { tos_link: String },

    #[error("compliance submissions incomplete: {}", missing.join("; "))]
    SubmissionsIncomplete { missing: Vec<String> },

    #[error("no email on file for this user")]
    MissingEmail,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Compliance(#[from] ComplianceError),

    #[error(transparent)]
    Ledger(#[from] LedgerDbError),
}

/// One provisioning run.
#[derive(Debug, Clone, Default)]
pub struct ProvisionRequest {
    pub user_id: String,
    /// Stored on the profile when none is on file yet.
    pub email: Option<String>,
    /// Agreement id returned by the hosted terms-of-service flow.
    pub signed_agreement_id: Option<String>,
    /// Defaults to the configured currencies when empty.
    pub currencies: Vec<Currency>,
}

impl ProvisionRequest {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }
}

pub struct ProvisioningOrchestrator {
    db: Arc<LedgerDatabase>,
    provider: Arc<dyn ProviderApi>,
    compliance: Arc<dyn ComplianceSource>,
    config: ProvisioningConfig,
    poller: EndorsementPoller,
}

impl ProvisioningOrchestrator {
    pub fn new(
        db: Arc<LedgerDatabase>,
        provider: Arc<dyn ProviderApi>,
        compliance: Arc<dyn ComplianceSource>,
        config: ProvisioningConfig,
    ) -> Self {
        let poller = EndorsementPoller::new(config.poll_attempts, config.poll_interval);
        Self {
            db,
            provider,
            compliance,
            config,
            poller,
        }
    }

    pub fn config(&self) -> &ProvisioningConfig {
        &self.config
    }

    /// True while the user lacks the wallet or any configured account.
    pub fn needs_provisioning(&self, user_id: &str) -> Result<bool, LedgerDbError> {
        if self.db.get_wallet(user_id, &self.config.chain)?.is_none() {
            return Ok(true);
        }
        for currency in &self.config.currencies {
            if self.db.get_virtual_account(user_id, *currency)?.is_none() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Run the state machine for one user.
    ///
    /// Hard failures (consent, submissions, Provider errors while
    /// establishing the customer, store errors) abort with an error. Once the
    /// customer exists, per-resource problems are recorded in the report.
    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn provision(
        &self,
        request: ProvisionRequest,
    ) -> Result<ProvisioningReport, ProvisioningError> {
        let user_id = request.user_id.as_str();
        let mut currencies = if request.currencies.is_empty() {
            self.config.currencies.clone()
        } else {
            request.currencies.clone()
        };
        currencies.sort();
        currencies.dedup();

        let profile = self.db.update_profile(
            user_id,
            || CustomerProfile::new(user_id, request.email.clone()),
            |profile| {
                if profile.email.is_none() {
                    profile.email = request.email.clone();
                }
                if let Some(agreement) = &request.signed_agreement_id {
                    profile.signed_agreement_id = Some(agreement.clone());
                }
            },
        )?;

        let (customer_outcome, mut customer) = self.establish_customer(&profile).await?;
        self.sync_customer(user_id, &customer)?;

        let mut issues = Vec::new();
        let needed: BTreeSet<&'static str> = currencies
            .iter()
            .map(Currency::required_endorsement)
            .collect();
        for endorsement in needed {
            if customer.is_endorsed(endorsement) {
                continue;
            }
            self.self_heal(user_id, &customer, endorsement).await;
            let last = match self
                .poller
                .wait_for(self.provider.as_ref(), &customer.customer_id, endorsement)
                .await
            {
                PollOutcome::Approved(snapshot) => {
                    customer = snapshot;
                    continue;
                }
                PollOutcome::Rejected(snapshot) => Some(snapshot),
                PollOutcome::Exhausted { last } => last,
            };
            if let Some(snapshot) = last {
                customer = snapshot;
            }
            let issue = EndorsementIssue {
                endorsement: endorsement.to_string(),
                status: customer.endorsement_status(endorsement),
                missing_requirements: customer
                    .endorsement(endorsement)
                    .map(|e| e.missing_requirements.clone())
                    .unwrap_or_default(),
            };
            warn!(
                customer_id = %customer.customer_id,
                endorsement,
                status = issue.status.as_str(),
                missing = ?issue.missing_requirements,
                attempts = self.poller.attempts(),
                "Endorsement not approved"
            );
            issues.push(issue);
        }
        self.sync_customer(user_id, &customer)?;

        let wallet = self.provision_wallet(user_id, &customer, &currencies).await;
        let wallet_id = wallet.id().map(str::to_string);

        let mut accounts = Vec::with_capacity(currencies.len());
        for currency in currencies {
            let outcome = self
                .provision_account(user_id, &customer, currency, wallet_id.as_deref())
                .await;
            accounts.push(AccountOutcome { currency, outcome });
        }

        let report = ProvisioningReport::build(
            user_id.to_string(),
            customer.customer_id.clone(),
            customer_outcome,
            wallet,
            accounts,
            issues,
            self.config.success_policy,
        );
        info!(
            customer_id = %report.customer_id,
            state = ?report.state,
            success = report.success,
            partial = report.partial,
            "Provisioning run finished"
        );
        Ok(report)
    }

    // -------------------------------------------------------------------------
    // Customer
    // -------------------------------------------------------------------------

    async fn establish_customer(
        &self,
        profile: &CustomerProfile,
    ) -> Result<(ResourceOutcome, CustomerSnapshot), ProvisioningError> {
        let user_id = profile.user_id.as_str();

        let mut stale = None;
        if let Some(cached) = profile.customer_id.as_deref() {
            match self.provider.get_customer(cached).await {
                Ok(snapshot) => {
                    return Ok((
                        ResourceOutcome::AlreadyExisted {
                            id: snapshot.customer_id.clone(),
                        },
                        snapshot,
                    ))
                }
                Err(ProviderError::NotFound(_)) => {
                    warn!(
                        customer_id = %cached,
                        "Cached customer id unknown to the Provider, starting over"
                    );
                    self.db.clear_customer_id(user_id, cached)?;
                    stale = Some(cached);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let email = profile
            .email
            .clone()
            .ok_or(ProvisioningError::MissingEmail)?;

        let Some(agreement) = profile.signed_agreement_id.clone() else {
            let tos_link = self.provider.get_tos_link(&email, CUSTOMER_TYPE).await?;
            info!("Signed agreement missing, returning consent link");
            return Err(ProvisioningError::ConsentRequired { tos_link });
        };

        let submissions = self.compliance.get_submissions_by_user(user_id).await?;
        let approved = ApprovedSubmissions::select(&submissions)
            .map_err(|missing| ProvisioningError::SubmissionsIncomplete { missing })?;
        let payload = build_customer_payload(&email, &agreement, &approved);

        // A replaced customer must not replay the Provider's cached create.
        let idempotency_key = match stale {
            Some(stale) => format!("customer-{user_id}-{stale}"),
            None => format!("customer-{user_id}"),
        };
        match self
            .provider
            .create_customer(&payload, &idempotency_key)
            .await
        {
            Ok(snapshot) => {
                let stored = self.db.claim_customer_id(user_id, &snapshot.customer_id)?;
                if stored == snapshot.customer_id {
                    info!(customer_id = %stored, "Provider customer created");
                    Ok((ResourceOutcome::Created { id: stored }, snapshot))
                } else {
                    self.adopt(stored).await
                }
            }
            Err(ProviderError::Duplicate(detail)) => {
                info!(detail = %detail, "Provider reports customer exists, recovering");
                self.recover_duplicate(user_id, &email, detail).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Recover from a duplicate-customer error: prefer an id a concurrent
    /// run stored locally, then search the Provider by email.
    async fn recover_duplicate(
        &self,
        user_id: &str,
        email: &str,
        detail: String,
    ) -> Result<(ResourceOutcome, CustomerSnapshot), ProvisioningError> {
        if let Some(id) = self.db.get_profile(user_id)?.and_then(|p| p.customer_id) {
            return self.adopt(id).await;
        }

        let Some(found) = self
            .provider
            .list_customers_by_email(email)
            .await?
            .into_iter()
            .next()
        else {
            return Err(ProviderError::Duplicate(detail).into());
        };
        let stored = self.db.claim_customer_id(user_id, &found.customer_id)?;
        info!(customer_id = %stored, "Adopted existing Provider customer");
        if stored == found.customer_id {
            Ok((ResourceOutcome::AlreadyExisted { id: stored }, found))
        } else {
            self.adopt(stored).await
        }
    }

    async fn adopt(
        &self,
        customer_id: String,
    ) -> Result<(ResourceOutcome, CustomerSnapshot), ProvisioningError> {
        let snapshot = self.provider.get_customer(&customer_id).await?;
        Ok((ResourceOutcome::AlreadyExisted { id: customer_id }, snapshot))
    }

    fn sync_customer(&self, user_id: &str, customer: &CustomerSnapshot) -> Result<(), LedgerDbError> {
        self.db.update_profile(
            user_id,
            || CustomerProfile::new(user_id, customer.email.clone()),
            |profile| {
                profile.kyc_status = customer.kyc_status.clone();
                profile.endorsements = customer.endorsements.clone();
                if profile.signed_agreement_id.is_none() {
                    profile.signed_agreement_id = customer.signed_agreement_id.clone();
                }
            },
        )?;
        Ok(())
    }

    /// Patch the customer with fields the Provider reports missing when
    /// review has not started. Best effort.
    async fn self_heal(&self, user_id: &str, customer: &CustomerSnapshot, endorsement: &str) {
        if !customer.kyc_not_started() {
            return;
        }
        let Some(missing) = customer
            .endorsement(endorsement)
            .map(|e| e.missing_requirements.as_slice())
            .filter(|m| !m.is_empty())
        else {
            return;
        };
        let submissions = match self.compliance.get_submissions_by_user(user_id).await {
            Ok(submissions) => submissions,
            Err(e) => {
                warn!(error = %e, "Cannot load submissions for customer patch");
                return;
            }
        };
        let Some(patch) = missing_fields_patch(missing, &submissions) else {
            return;
        };
        match self
            .provider
            .update_customer(&customer.customer_id, &patch)
            .await
        {
            Ok(_) => info!(
                customer_id = %customer.customer_id,
                endorsement,
                "Patched customer with missing compliance fields"
            ),
            Err(e) => warn!(
                customer_id = %customer.customer_id,
                endorsement,
                error = %e,
                "Customer patch failed"
            ),
        }
    }

    // -------------------------------------------------------------------------
    // Wallet & accounts
    // -------------------------------------------------------------------------

    async fn provision_wallet(
        &self,
        user_id: &str,
        customer: &CustomerSnapshot,
        currencies: &[Currency],
    ) -> ResourceOutcome {
        let chain = self.config.chain.as_str();
        match self.db.get_wallet(user_id, chain) {
            Ok(Some(existing)) => {
                return ResourceOutcome::AlreadyExisted {
                    id: existing.wallet_id,
                }
            }
            Ok(None) => {}
            Err(e) => return failed("wallet lookup", e),
        }

        if !currencies
            .iter()
            .any(|c| customer.is_endorsed(c.required_endorsement()))
        {
            return ResourceOutcome::Skipped {
                reason: "no required endorsement is approved".to_string(),
            };
        }

        let created = match with_timeout(
            self.config.wallet_timeout,
            self.provider.create_wallet(&customer.customer_id, chain),
        )
        .await
        {
            Ok(wallet) => wallet,
            Err(reason) => {
                warn!(chain, reason = %reason, "Wallet creation failed");
                return ResourceOutcome::Failed { reason };
            }
        };

        let record = WalletRecord {
            wallet_id: created.wallet_id.clone(),
            user_id: user_id.to_string(),
            chain: chain.to_string(),
            address: created.address,
            status: created.status,
            created_at: Utc::now(),
        };
        match self.db.insert_wallet(&record) {
            Ok(()) => {
                info!(wallet_id = %record.wallet_id, chain, "Wallet provisioned");
                ResourceOutcome::Created {
                    id: record.wallet_id,
                }
            }
            Err(e) if e.is_conflict() => match self.db.get_wallet(user_id, chain) {
                Ok(Some(existing)) => ResourceOutcome::AlreadyExisted {
                    id: existing.wallet_id,
                },
                Ok(None) => failed("wallet persist", e),
                Err(e) => failed("wallet lookup", e),
            },
            Err(e) => failed("wallet persist", e),
        }
    }

    async fn provision_account(
        &self,
        user_id: &str,
        customer: &CustomerSnapshot,
        currency: Currency,
        wallet_id: Option<&str>,
    ) -> ResourceOutcome {
        match self.db.get_virtual_account(user_id, currency) {
            Ok(Some(existing)) => {
                return ResourceOutcome::AlreadyExisted {
                    id: existing.account_id,
                }
            }
            Ok(None) => {}
            Err(e) => return failed("account lookup", e),
        }

        let endorsement = currency.required_endorsement();
        if !customer.is_endorsed(endorsement) {
            let status = customer.endorsement_status(endorsement);
            info!(currency = %currency, endorsement, status = status.as_str(), "Account skipped");
            return ResourceOutcome::Skipped {
                reason: format!(
                    "{endorsement} endorsement not approved (status: {})",
                    status.as_str()
                ),
            };
        }

        let created = match with_timeout(
            self.config.account_timeout,
            self.provider
                .create_virtual_account(&customer.customer_id, currency, wallet_id),
        )
        .await
        {
            Ok(account) => account,
            Err(reason) => {
                warn!(currency = %currency, reason = %reason, "Virtual account creation failed");
                return ResourceOutcome::Failed { reason };
            }
        };

        let record = VirtualAccountRecord {
            account_id: created.account_id,
            user_id: user_id.to_string(),
            customer_id: customer.customer_id.clone(),
            wallet_id: wallet_id.map(str::to_string),
            currency,
            routing_details: created.routing_details,
            status: created.status,
            created_at: Utc::now(),
        };
        match self.db.insert_virtual_account(&record) {
            Ok(()) => {
                info!(account_id = %record.account_id, currency = %currency, "Virtual account provisioned");
                ResourceOutcome::Created {
                    id: record.account_id,
                }
            }
            Err(e) if e.is_conflict() => match self.db.get_virtual_account(user_id, currency) {
                Ok(Some(existing)) => ResourceOutcome::AlreadyExisted {
                    id: existing.account_id,
                },
                Ok(None) => failed("account persist", e),
                Err(e) => failed("account lookup", e),
            },
            Err(e) => failed("account persist", e),
        }
    }
}

async fn with_timeout<T>(
    limit: Duration,
    call: impl std::future::Future<Output = Result<T, ProviderError>>,
) -> Result<T, String> {
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {}s", limit.as_secs())),
    }
}

fn failed(step: &str, error: LedgerDbError) -> ResourceOutcome {
    warn!(step, error = %error, "Ledger store error during provisioning");
    ResourceOutcome::Failed {
        reason: format!("{step} failed: {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Endorsement, EndorsementStatus};
    use crate::provisioning::{ProvisioningState, SuccessPolicy};
    use crate::storage::ledger_db::temp_db;
    use crate::storage::RoutingDetails;
    use crate::testing::{approved_submissions, customer, submission, FakeProvider};

    struct Harness {
        db: Arc<LedgerDatabase>,
        provider: Arc<FakeProvider>,
        orchestrator: ProvisioningOrchestrator,
        _dir: tempfile::TempDir,
    }

    fn harness(config: ProvisioningConfig) -> Harness {
        let (db, dir) = temp_db();
        let db = Arc::new(db);
        let provider = Arc::new(FakeProvider::new());
        let orchestrator =
            ProvisioningOrchestrator::new(db.clone(), provider.clone(), db.clone(), config);
        Harness {
            db,
            provider,
            orchestrator,
            _dir: dir,
        }
    }

    fn fast_config() -> ProvisioningConfig {
        ProvisioningConfig {
            poll_attempts: 3,
            poll_interval: Duration::from_millis(50),
            ..ProvisioningConfig::default()
        }
    }

    fn seed_profile(db: &LedgerDatabase, customer_id: Option<&str>, agreement: Option<&str>) {
        let mut profile = CustomerProfile::new("user-1", Some("a@example.com".to_string()));
        profile.customer_id = customer_id.map(str::to_string);
        profile.signed_agreement_id = agreement.map(str::to_string);
        db.put_profile(&profile).unwrap();
        db.put_submissions("user-1", &approved_submissions()).unwrap();
    }

    fn seed_resources(db: &LedgerDatabase) {
        db.insert_wallet(&WalletRecord {
            wallet_id: "wal_1".to_string(),
            user_id: "user-1".to_string(),
            chain: "base".to_string(),
            address: "0xabc".to_string(),
            status: "active".to_string(),
            created_at: Utc::now(),
        })
        .unwrap();
        for (currency, id) in [(Currency::Usd, "va_usd"), (Currency::Eur, "va_eur")] {
            db.insert_virtual_account(&VirtualAccountRecord {
                account_id: id.to_string(),
                user_id: "user-1".to_string(),
                customer_id: "cust_1".to_string(),
                wallet_id: Some("wal_1".to_string()),
                currency,
                routing_details: RoutingDetails::Iban {
                    iban: "PT50000201231234567890154".to_string(),
                    bic: None,
                    account_holder_name: None,
                },
                status: "activated".to_string(),
                created_at: Utc::now(),
            })
            .unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn missing_agreement_returns_consent_link_and_creates_nothing() {
        let h = harness(fast_config());
        seed_profile(&h.db, None, None);

        let err = h
            .orchestrator
            .provision(ProvisionRequest::for_user("user-1"))
            .await
            .unwrap_err();
        match err {
            ProvisioningError::ConsentRequired { tos_link } => {
                assert!(tos_link.contains("a@example.com"))
            }
            other => panic!("unexpected {other:?}"),
        }
        let calls = h.provider.calls();
        assert_eq!(calls.get_tos_link, 1);
        assert_eq!(calls.create_customer, 0);
        assert!(h.db.get_profile("user-1").unwrap().unwrap().customer_id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_sepa_endorsement_skips_eur_only() {
        let h = harness(fast_config());
        seed_profile(&h.db, Some("cust_1"), Some("sa_1"));
        h.provider
            .insert_customer(customer("cust_1", &[("base", "approved"), ("sepa", "incomplete")]));

        let report = h
            .orchestrator
            .provision(ProvisionRequest::for_user("user-1"))
            .await
            .unwrap();

        assert!(matches!(report.customer, ResourceOutcome::AlreadyExisted { .. }));
        assert!(matches!(report.wallet, ResourceOutcome::Created { .. }));
        assert!(matches!(
            report.account(Currency::Usd),
            Some(ResourceOutcome::Created { .. })
        ));
        match report.account(Currency::Eur) {
            Some(ResourceOutcome::Skipped { reason }) => assert!(reason.contains("not approved")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(report.success);
        assert!(report.partial);
        assert_eq!(report.endorsement_issues.len(), 1);
        assert_eq!(report.endorsement_issues[0].endorsement, "sepa");
        assert_eq!(report.state, ProvisioningState::WalletProvisioned);
        // one entry check plus the poll budget
        assert_eq!(h.provider.calls().get_customer, 1 + 3);
        assert!(h.db.get_virtual_account("user-1", Currency::Eur).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn strict_policy_fails_the_same_run() {
        let h = harness(ProvisioningConfig {
            success_policy: SuccessPolicy::Strict,
            ..fast_config()
        });
        seed_profile(&h.db, Some("cust_1"), Some("sa_1"));
        h.provider
            .insert_customer(customer("cust_1", &[("base", "approved"), ("sepa", "pending")]));

        let report = h
            .orchestrator
            .provision(ProvisionRequest::for_user("user-1"))
            .await
            .unwrap();
        assert!(!report.success);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_runs_report_already_existed_everywhere() {
        let h = harness(fast_config());
        seed_profile(&h.db, Some("cust_1"), Some("sa_1"));
        seed_resources(&h.db);
        h.provider
            .insert_customer(customer("cust_1", &[("base", "approved"), ("sepa", "approved")]));

        for _ in 0..2 {
            let report = h
                .orchestrator
                .provision(ProvisionRequest::for_user("user-1"))
                .await
                .unwrap();
            assert!(matches!(report.customer, ResourceOutcome::AlreadyExisted { .. }));
            assert_eq!(report.wallet, ResourceOutcome::AlreadyExisted { id: "wal_1".to_string() });
            for account in &report.accounts {
                assert!(matches!(account.outcome, ResourceOutcome::AlreadyExisted { .. }));
            }
            assert!(report.success);
            assert!(!report.partial);
            assert_eq!(report.state, ProvisioningState::AccountsProvisioned);
        }

        let calls = h.provider.calls();
        assert_eq!(calls.create_wallet, 0);
        assert_eq!(calls.create_virtual_account, 0);
        assert_eq!(h.db.list_virtual_accounts("user-1").unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_cached_customer_is_replaced() {
        let h = harness(fast_config());
        seed_profile(&h.db, Some("cust_gone"), Some("sa_1"));

        let report = h
            .orchestrator
            .provision(ProvisionRequest::for_user("user-1"))
            .await
            .unwrap();

        let ResourceOutcome::Created { id } = &report.customer else {
            panic!("expected a new customer, got {:?}", report.customer);
        };
        let profile = h.db.get_profile("user-1").unwrap().unwrap();
        assert_eq!(profile.customer_id.as_deref(), Some(id.as_str()));
        assert!(h.db.find_user_by_customer("cust_gone").unwrap().is_none());
        assert_eq!(h.provider.calls().create_customer, 1);
        assert_eq!(h.provider.create_customer_keys(), vec!["customer-user-1-cust_gone"]);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_customer_is_adopted_by_email() {
        let h = harness(fast_config());
        seed_profile(&h.db, None, Some("sa_1"));
        let mut existing = customer("cust_old", &[("base", "approved"), ("sepa", "approved")]);
        existing.email = Some("a@example.com".to_string());
        h.provider.insert_customer(existing);
        h.provider
            .fail_next_create_customer(ProviderError::Duplicate("email taken".to_string()));

        let report = h
            .orchestrator
            .provision(ProvisionRequest::for_user("user-1"))
            .await
            .unwrap();

        assert_eq!(
            report.customer,
            ResourceOutcome::AlreadyExisted { id: "cust_old".to_string() }
        );
        assert_eq!(h.provider.calls().list_customers_by_email, 1);
        assert_eq!(
            h.db.find_user_by_customer("cust_old").unwrap().as_deref(),
            Some("user-1")
        );
        assert!(report.accounts.iter().all(|a| a.outcome.is_ok()));
    }

    #[tokio::test(start_paused = true)]
    async fn unapproved_submissions_halt_before_creation() {
        let h = harness(fast_config());
        seed_profile(&h.db, None, Some("sa_1"));
        h.db.put_submissions("user-1", &[submission("identity", "approved")])
            .unwrap();

        let err = h
            .orchestrator
            .provision(ProvisionRequest::for_user("user-1"))
            .await
            .unwrap_err();
        match err {
            ProvisioningError::SubmissionsIncomplete { missing } => {
                assert_eq!(missing, vec!["address submission is missing".to_string()])
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(h.provider.calls().create_customer, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wallet_timeout_is_a_per_resource_failure() {
        let h = harness(fast_config());
        seed_profile(&h.db, Some("cust_1"), Some("sa_1"));
        h.provider
            .insert_customer(customer("cust_1", &[("base", "approved"), ("sepa", "approved")]));
        h.provider.set_wallet_delay(Duration::from_secs(60));

        let report = h
            .orchestrator
            .provision(ProvisionRequest::for_user("user-1"))
            .await
            .unwrap();
        match &report.wallet {
            ResourceOutcome::Failed { reason } => assert!(reason.contains("timed out")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(report.accounts.iter().all(|a| a.outcome.is_ok()));
        assert!(report.success);
        assert!(report.partial);
        assert!(h.db.get_wallet("user-1", "base").unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn not_started_customer_is_patched_then_polled() {
        let h = harness(fast_config());
        seed_profile(&h.db, Some("cust_1"), Some("sa_1"));
        let mut snapshot = customer("cust_1", &[("base", "incomplete")]);
        snapshot.kyc_status = Some("not_started".to_string());
        snapshot.endorsements = vec![Endorsement {
            name: "base".to_string(),
            status: EndorsementStatus::Incomplete,
            missing_requirements: vec!["proof_of_address".to_string()],
        }];
        h.provider.insert_customer(snapshot);
        h.provider
            .script_endorsement(
                "cust_1",
                "base",
                &[EndorsementStatus::Incomplete, EndorsementStatus::Approved],
            );

        let report = h
            .orchestrator
            .provision(ProvisionRequest {
                currencies: vec![Currency::Usd],
                ..ProvisionRequest::for_user("user-1")
            })
            .await
            .unwrap();

        let patches = h.provider.patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].0, "cust_1");
        assert!(patches[0].1.get("residential_address").is_some());
        assert!(matches!(
            report.account(Currency::Usd),
            Some(ResourceOutcome::Created { .. })
        ));
        assert!(report.account(Currency::Eur).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_runs_create_one_wallet() {
        let h = harness(fast_config());
        seed_profile(&h.db, Some("cust_1"), Some("sa_1"));
        h.provider
            .insert_customer(customer("cust_1", &[("base", "approved"), ("sepa", "approved")]));

        let (a, b) = tokio::join!(
            h.orchestrator.provision(ProvisionRequest::for_user("user-1")),
            h.orchestrator.provision(ProvisionRequest::for_user("user-1")),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        let created = [&a.wallet, &b.wallet]
            .iter()
            .filter(|w| matches!(w, ResourceOutcome::Created { .. }))
            .count();
        assert_eq!(created, 1);
        assert_eq!(a.wallet.id(), b.wallet.id());
        assert_eq!(h.db.list_virtual_accounts("user-1").unwrap().len(), 2);
    }
}
