// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Ledger Storage
//!
//! The embedded database is the single source of truth for idempotency,
//! the transaction ledger and per-user provisioning state.
//!
//! ## Storage Layout
//!
//! ```text
//! $DATA_DIR/
//!   ledger.redb     # all tables, see `ledger_db`
//! ```
//!
//! Uniqueness is enforced inside write transactions, so "create if absent"
//! callers see [`LedgerDbError::Conflict`] when they lose a race and are
//! expected to re-read and adopt the winner.

pub mod events;
pub mod ledger_db;
pub mod profiles;
pub mod transactions;

pub use events::ProcessedEvent;
pub use ledger_db::{LedgerDatabase, LedgerDbError, LedgerResult};
pub use profiles::{CustomerProfile, RoutingDetails, VirtualAccountRecord, WalletRecord};
pub use transactions::{Receipt, StoredTransaction, TransactionStatus};

/// File name of the ledger database inside `DATA_DIR`.
pub const LEDGER_DB_FILE: &str = "ledger.redb";
