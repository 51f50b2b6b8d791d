// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Remittance settlement server.
//!
//! Ingests Provider webhooks into a local transaction ledger and provisions
//! compliance customers, custody wallets and currency receiving accounts.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Bearer JWT authentication
//! - `providers` - Provider REST client and compliance submission source
//! - `provisioning` - Account provisioning state machine
//! - `storage` - Embedded ledger database (redb)
//! - `webhooks` - Signature verification, idempotency, routing and reconciliation

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod providers;
pub mod provisioning;
pub mod state;
pub mod storage;
pub mod webhooks;

#[cfg(test)]
pub mod testing;
