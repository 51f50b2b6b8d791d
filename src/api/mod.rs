// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    models::{Currency, CustomerSnapshot, Endorsement, EndorsementStatus},
    provisioning::{
        AccountOutcome, EndorsementIssue, ProvisioningReport, ProvisioningState, ResourceOutcome,
        SuccessPolicy,
    },
    state::AppState,
    storage::{
        CustomerProfile, Receipt, RoutingDetails, StoredTransaction, TransactionStatus,
        VirtualAccountRecord, WalletRecord,
    },
};

pub mod accounts;
pub mod health;
pub mod transactions;
pub mod webhooks;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/accounts", get(accounts::get_accounts))
        .route("/accounts/provision", post(accounts::provision_accounts))
        .route("/transactions", get(transactions::list_transactions))
        .route(
            "/transactions/{transaction_id}",
            get(transactions::get_transaction),
        )
        .with_state(state.clone());

    Router::new()
        .route(
            "/webhooks/provider",
            post(webhooks::receive_webhook).get(webhooks::webhook_challenge),
        )
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state)
        .nest("/v1", v1_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        webhooks::receive_webhook,
        webhooks::webhook_challenge,
        accounts::provision_accounts,
        accounts::get_accounts,
        transactions::list_transactions,
        transactions::get_transaction,
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            Currency,
            CustomerSnapshot,
            Endorsement,
            EndorsementStatus,
            ProvisioningReport,
            ProvisioningState,
            ResourceOutcome,
            AccountOutcome,
            EndorsementIssue,
            SuccessPolicy,
            CustomerProfile,
            WalletRecord,
            VirtualAccountRecord,
            RoutingDetails,
            StoredTransaction,
            TransactionStatus,
            Receipt,
            webhooks::WebhookAck,
            webhooks::ChallengeResponse,
            accounts::ProvisionAccountsRequest,
            accounts::AccountsSummary,
            transactions::TransactionListResponse,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    tags(
        (name = "Webhooks", description = "Provider event ingestion"),
        (name = "Accounts", description = "Customer, wallet and virtual account provisioning"),
        (name = "Transactions", description = "Reconciled ledger"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
struct ApiDoc;
