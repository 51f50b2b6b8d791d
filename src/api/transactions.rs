// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger read endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    auth::Auth,
    error::ApiError,
    state::AppState,
    storage::{StoredTransaction, TransactionStatus},
};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

/// Query parameters for transaction list.
#[derive(Debug, Deserialize, IntoParams)]
pub struct TransactionListQuery {
    /// Only return transactions in this status.
    pub status: Option<TransactionStatus>,
    /// Maximum number of results (default: 50)
    #[param(default = 50)]
    pub limit: Option<usize>,
}

/// Transaction list response.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TransactionListResponse {
    /// Newest first.
    pub transactions: Vec<StoredTransaction>,
}

/// List the caller's ledger entries, newest first.
#[utoipa::path(
    get,
    path = "/v1/transactions",
    tag = "Transactions",
    params(TransactionListQuery),
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Transaction list", body = TransactionListResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn list_transactions(
    Auth(user): Auth,
    State(state): State<AppState>,
    Query(query): Query<TransactionListQuery>,
) -> Result<Json<TransactionListResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let mut transactions = state.db.list_transactions_for_user(&user.user_id)?;
    if let Some(status) = query.status {
        transactions.retain(|tx| tx.status == status);
    }
    transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    transactions.truncate(limit);

    Ok(Json(TransactionListResponse { transactions }))
}

/// Fetch one of the caller's ledger entries.
#[utoipa::path(
    get,
    path = "/v1/transactions/{transaction_id}",
    tag = "Transactions",
    params(
        ("transaction_id" = String, Path, description = "Local transaction ID")
    ),
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Transaction", body = StoredTransaction),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Transaction not found")
    )
)]
pub async fn get_transaction(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<StoredTransaction>, ApiError> {
    // Other users' records are reported as missing
    state
        .db
        .get_transaction(&transaction_id)?
        .filter(|tx| tx.user_id == user.user_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Transaction not found"))
}
