// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Bearer JWT authentication for the account and ledger endpoints.
//!
//! ## Auth Flow
//!
//! 1. The frontend authenticates the user with the identity provider
//! 2. The frontend sends `Authorization: Bearer <JWT>`
//! 3. The server verifies the token and extracts `sub` as the canonical
//!    `user_id` (and `email`, used when provisioning a Provider customer)
//!
//! ## Security
//!
//! - The webhook and health endpoints are unauthenticated; everything under
//!   `/v1` requires a token
//! - Clock skew tolerance is 60 seconds

pub mod claims;
pub mod error;
pub mod extractor;

pub use claims::AuthenticatedUser;
pub use error::AuthError;
pub use extractor::Auth;
