// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};
use tracing::error;

use crate::provisioning::ProvisioningError;
use crate::storage::LedgerDbError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    /// Extra fields merged into the JSON body next to `error`.
    pub details: Option<Map<String, Value>>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value.into());
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = self.details.unwrap_or_default();
        body.insert("error".to_string(), json!(self.message));
        (self.status, Json(Value::Object(body))).into_response()
    }
}

impl From<LedgerDbError> for ApiError {
    fn from(e: LedgerDbError) -> Self {
        match e {
            LedgerDbError::NotFound(what) => ApiError::not_found(format!("{what} not found")),
            LedgerDbError::Conflict(what) => ApiError::conflict(format!("{what} already exists")),
            other => {
                error!(error = %other, "Ledger store error");
                ApiError::internal("ledger store unavailable")
            }
        }
    }
}

impl From<ProvisioningError> for ApiError {
    fn from(e: ProvisioningError) -> Self {
        let message = e.to_string();
        match e {
            ProvisioningError::ConsentRequired { tos_link } => {
                ApiError::bad_request(message).with_detail("consent_link", tos_link)
            }
            ProvisioningError::SubmissionsIncomplete { missing } => {
                ApiError::bad_request("compliance submissions are incomplete")
                    .with_detail("missing", missing)
            }
            ProvisioningError::MissingEmail => ApiError::bad_request(message),
            ProvisioningError::Provider(e) => {
                error!(error = %e, "Provider call failed during provisioning");
                ApiError::bad_gateway(format!("provider request failed: {e}"))
            }
            ProvisioningError::Compliance(e) => {
                error!(error = %e, "Compliance source failed during provisioning");
                ApiError::bad_gateway(e.to_string())
            }
            ProvisioningError::Ledger(e) => e.into(),
        }
    }
}
