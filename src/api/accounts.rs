// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Account provisioning endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::{
    auth::Auth,
    error::ApiError,
    models::{Currency, Endorsement},
    provisioning::{ProvisionRequest, ProvisioningReport},
    state::AppState,
    storage::{VirtualAccountRecord, WalletRecord},
};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request to provision the caller's accounts.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ProvisionAccountsRequest {
    /// Currencies to provision; defaults to the configured set.
    #[serde(default)]
    pub currencies: Vec<Currency>,
    /// Overrides the email from the bearer token.
    #[serde(default)]
    pub email: Option<String>,
    /// Agreement id returned by the hosted terms-of-service flow.
    #[serde(default)]
    pub signed_agreement_id: Option<String>,
}

/// The caller's Customer and provisioned resources.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AccountsSummary {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kyc_status: Option<String>,
    pub endorsements: Vec<Endorsement>,
    /// Whether terms of service have been accepted.
    pub terms_accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet: Option<WalletRecord>,
    pub virtual_accounts: Vec<VirtualAccountRecord>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Provision the caller's customer, wallet and virtual accounts.
///
/// Returns 200 when every resource is in place and 207 when the run
/// completed with skipped or failed resources.
#[utoipa::path(
    post,
    path = "/v1/accounts/provision",
    tag = "Accounts",
    request_body = ProvisionAccountsRequest,
    security(("bearer" = [])),
    responses(
        (status = 200, description = "All resources provisioned", body = ProvisioningReport),
        (status = 207, description = "Some resources were skipped or failed", body = ProvisioningReport),
        (status = 400, description = "Consent or compliance submissions missing"),
        (status = 401, description = "Unauthorized"),
        (status = 502, description = "Provider request failed")
    )
)]
pub async fn provision_accounts(
    Auth(user): Auth,
    State(state): State<AppState>,
    body: Option<Json<ProvisionAccountsRequest>>,
) -> Result<(StatusCode, Json<ProvisioningReport>), ApiError> {
    let Json(body) = body.unwrap_or_default();

    let report = state
        .orchestrator
        .provision(ProvisionRequest {
            user_id: user.user_id.clone(),
            email: body.email.or(user.email),
            signed_agreement_id: body.signed_agreement_id,
            currencies: body.currencies,
        })
        .await?;

    info!(
        user_id = %user.user_id,
        state = ?report.state,
        success = report.success,
        partial = report.partial,
        "Provisioning run finished"
    );

    let status = if report.success && !report.partial {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(report)))
}

/// Summarise the caller's Customer, wallet and virtual accounts.
#[utoipa::path(
    get,
    path = "/v1/accounts",
    tag = "Accounts",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Account summary", body = AccountsSummary),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "User has never been provisioned")
    )
)]
pub async fn get_accounts(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<AccountsSummary>, ApiError> {
    let profile = state
        .db
        .get_profile(&user.user_id)?
        .ok_or_else(|| ApiError::not_found("no accounts provisioned for this user"))?;
    let chain = &state.orchestrator.config().chain;

    Ok(Json(AccountsSummary {
        wallet: state.db.get_wallet(&user.user_id, chain)?,
        virtual_accounts: state.db.list_virtual_accounts(&user.user_id)?,
        user_id: profile.user_id,
        customer_id: profile.customer_id,
        kyc_status: profile.kyc_status,
        endorsements: profile.endorsements,
        terms_accepted: profile.signed_agreement_id.is_some(),
    }))
}
