// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWT claims and authenticated user representation.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Minimal claims read from a bearer token.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct JwtClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Expiration timestamp
    #[serde(default)]
    pub exp: i64,
    #[serde(default)]
    pub iss: String,
    /// Session ID
    #[serde(default)]
    pub sid: Option<String>,
    /// Used as the Provider customer email when none is on file.
    #[serde(default)]
    pub email: Option<String>,
}

/// Authenticated user information extracted from JWT.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthenticatedUser {
    /// Canonical user ID (`sub` claim)
    pub user_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(skip)]
    pub issuer: String,

    /// Token expiration (Unix timestamp)
    #[serde(skip)]
    pub expires_at: i64,
}

impl AuthenticatedUser {
    pub(crate) fn from_claims(claims: JwtClaims) -> Self {
        Self {
            user_id: claims.sub,
            email: claims.email.filter(|e| !e.trim().is_empty()),
            session_id: claims.sid,
            issuer: claims.iss,
            expires_at: claims.exp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_email_claim_is_dropped() {
        let claims: JwtClaims =
            serde_json::from_str(r#"{"sub":"user_1","exp":10,"iss":"test","email":"  "}"#).unwrap();
        let user = AuthenticatedUser::from_claims(claims);
        assert_eq!(user.user_id, "user_1");
        assert!(user.email.is_none());
        assert!(user.session_id.is_none());
    }
}
