// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Structured partial-success result of a provisioning run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{Currency, EndorsementStatus};

/// Furthest state reached by a provisioning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    NoCustomer,
    CustomerPendingAgreement,
    CustomerCreated,
    EndorsementPending,
    EndorsementApproved,
    WalletProvisioned,
    AccountsProvisioned,
}

/// Outcome of one provisioned resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResourceOutcome {
    Created { id: String },
    AlreadyExisted { id: String },
    Skipped { reason: String },
    Failed { reason: String },
}

impl ResourceOutcome {
    /// Created or already present.
    pub fn is_ok(&self) -> bool {
        matches!(
            self,
            ResourceOutcome::Created { .. } | ResourceOutcome::AlreadyExisted { .. }
        )
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            ResourceOutcome::Created { id } | ResourceOutcome::AlreadyExisted { id } => Some(id),
            _ => None,
        }
    }
}

/// How a report with skipped or failed resources is judged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SuccessPolicy {
    /// Success unless a hard failure aborted the run; an established
    /// customer counts as progress even when every other step was skipped.
    #[default]
    Lenient,
    /// Success only when every requested resource exists.
    Strict,
}

impl FromStr for SuccessPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(SuccessPolicy::Lenient),
            "strict" => Ok(SuccessPolicy::Strict),
            other => Err(format!("expected `lenient` or `strict`, got `{other}`")),
        }
    }
}

impl fmt::Display for SuccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SuccessPolicy::Lenient => "lenient",
            SuccessPolicy::Strict => "strict",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AccountOutcome {
    pub currency: Currency,
    #[serde(flatten)]
    pub outcome: ResourceOutcome,
}

/// Endorsement that did not reach approval within the poll budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EndorsementIssue {
    pub endorsement: String,
    pub status: EndorsementStatus,
    pub missing_requirements: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProvisioningReport {
    pub user_id: String,
    pub customer_id: String,
    pub state: ProvisioningState,
    pub customer: ResourceOutcome,
    pub wallet: ResourceOutcome,
    pub accounts: Vec<AccountOutcome>,
    /// Non-fatal endorsement problems.
    pub endorsement_issues: Vec<EndorsementIssue>,
    pub policy: SuccessPolicy,
    pub success: bool,
    /// True when the run succeeded but some resource was skipped or failed.
    pub partial: bool,
}

impl ProvisioningReport {
    /// Assemble a report and evaluate it under `policy`.
    pub fn build(
        user_id: String,
        customer_id: String,
        customer: ResourceOutcome,
        wallet: ResourceOutcome,
        accounts: Vec<AccountOutcome>,
        endorsement_issues: Vec<EndorsementIssue>,
        policy: SuccessPolicy,
    ) -> Self {
        let all_ok = wallet.is_ok() && accounts.iter().all(|a| a.outcome.is_ok());
        let success = match policy {
            SuccessPolicy::Lenient => customer.is_ok(),
            SuccessPolicy::Strict => customer.is_ok() && all_ok,
        };
        let state = if !wallet.is_ok() {
            if endorsement_issues.is_empty() {
                ProvisioningState::EndorsementApproved
            } else {
                ProvisioningState::EndorsementPending
            }
        } else if !accounts.is_empty() && accounts.iter().all(|a| a.outcome.is_ok()) {
            ProvisioningState::AccountsProvisioned
        } else {
            ProvisioningState::WalletProvisioned
        };

        Self {
            user_id,
            customer_id,
            state,
            customer,
            wallet,
            accounts,
            endorsement_issues,
            policy,
            success,
            partial: success && !all_ok,
        }
    }

    pub fn account(&self, currency: Currency) -> Option<&ResourceOutcome> {
        self.accounts
            .iter()
            .find(|a| a.currency == currency)
            .map(|a| &a.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(id: &str) -> ResourceOutcome {
        ResourceOutcome::Created { id: id.to_string() }
    }

    fn report(policy: SuccessPolicy, eur: ResourceOutcome) -> ProvisioningReport {
        ProvisioningReport::build(
            "user-1".to_string(),
            "cust_1".to_string(),
            ResourceOutcome::AlreadyExisted { id: "cust_1".to_string() },
            created("wal_1"),
            vec![
                AccountOutcome { currency: Currency::Usd, outcome: created("va_usd") },
                AccountOutcome { currency: Currency::Eur, outcome: eur },
            ],
            Vec::new(),
            policy,
        )
    }

    #[test]
    fn lenient_policy_reports_partial_success() {
        let r = report(
            SuccessPolicy::Lenient,
            ResourceOutcome::Skipped { reason: "sepa not approved".to_string() },
        );
        assert!(r.success);
        assert!(r.partial);
        assert_eq!(r.state, ProvisioningState::WalletProvisioned);
    }

    #[test]
    fn strict_policy_requires_every_resource() {
        let r = report(
            SuccessPolicy::Strict,
            ResourceOutcome::Failed { reason: "timed out".to_string() },
        );
        assert!(!r.success);
        assert!(!r.partial);

        let ok = report(SuccessPolicy::Strict, created("va_eur"));
        assert!(ok.success);
        assert!(!ok.partial);
        assert_eq!(ok.state, ProvisioningState::AccountsProvisioned);
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let json = serde_json::to_value(AccountOutcome {
            currency: Currency::Eur,
            outcome: ResourceOutcome::Skipped { reason: "x".to_string() },
        })
        .unwrap();
        assert_eq!(json["currency"], "eur");
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["reason"], "x");
    }

    #[test]
    fn policy_parses() {
        assert_eq!("STRICT".parse::<SuccessPolicy>().unwrap(), SuccessPolicy::Strict);
        assert!("maybe".parse::<SuccessPolicy>().is_err());
    }
}
