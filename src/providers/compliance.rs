// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Source of the user's compliance submissions (identity, address).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::storage::LedgerDatabase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
    Identity,
    Address,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Approved,
    Pending,
    Rejected,
    #[serde(other)]
    Unknown,
}

/// One compliance submission with its collected fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceSubmission {
    #[serde(rename = "type")]
    pub kind: SubmissionKind,
    pub status: SubmissionStatus,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ComplianceSubmission {
    pub fn is_approved(&self) -> bool {
        self.status == SubmissionStatus::Approved
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ComplianceError {
    #[error("compliance submissions unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ComplianceSource: Send + Sync {
    async fn get_submissions_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ComplianceSubmission>, ComplianceError>;
}

#[async_trait]
impl ComplianceSource for LedgerDatabase {
    async fn get_submissions_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ComplianceSubmission>, ComplianceError> {
        self.get_submissions(user_id)
            .map_err(|e| ComplianceError::Unavailable(e.to_string()))
    }
}
