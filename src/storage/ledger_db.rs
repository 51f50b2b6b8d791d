// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded ledger database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `processed_events`: record_id → serialized ProcessedEvent
//! - `event_id_index`: Provider event id → record_id (unique)
//! - `fingerprint_index`: content fingerprint → record_id (unique)
//! - `transactions`: transaction_id → serialized StoredTransaction
//! - `activity_index`: provider activity id → transaction_id (unique)
//! - `deposit_index`: `deposit_id|user_id|direction` → transaction_id (unique)
//! - `profiles`: user_id → serialized CustomerProfile
//! - `customer_index`: Provider customer id → user_id
//! - `wallets`: `user_id|chain` → serialized WalletRecord
//! - `virtual_accounts`: `user_id|currency` → serialized VirtualAccountRecord
//! - `compliance_submissions`: user_id → serialized submissions
//! - `meta`: key → bytes (health probe)
//!
//! Every "create if absent" runs its existence check and its insert inside
//! one write transaction. redb serializes write transactions, so the check
//! cannot be raced; a taken key surfaces as [`LedgerDbError::Conflict`].

use std::path::Path;

use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition,
    WriteTransaction,
};
use serde::de::DeserializeOwned;

// =============================================================================
// Table Definitions
// =============================================================================

pub(super) const PROCESSED_EVENTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("processed_events");
pub(super) const EVENT_ID_INDEX: TableDefinition<&str, &str> =
    TableDefinition::new("event_id_index");
pub(super) const FINGERPRINT_INDEX: TableDefinition<&str, &str> =
    TableDefinition::new("fingerprint_index");

pub(super) const TRANSACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("transactions");
pub(super) const ACTIVITY_INDEX: TableDefinition<&str, &str> =
    TableDefinition::new("activity_index");
pub(super) const DEPOSIT_INDEX: TableDefinition<&str, &str> = TableDefinition::new("deposit_index");

pub(super) const PROFILES: TableDefinition<&str, &[u8]> = TableDefinition::new("profiles");
pub(super) const CUSTOMER_INDEX: TableDefinition<&str, &str> =
    TableDefinition::new("customer_index");
pub(super) const WALLETS: TableDefinition<&str, &[u8]> = TableDefinition::new("wallets");
pub(super) const VIRTUAL_ACCOUNTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("virtual_accounts");
pub(super) const COMPLIANCE_SUBMISSIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("compliance_submissions");

const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LedgerDbError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    /// A unique key is already taken by another record.
    #[error("already exists: {0}")]
    Conflict(String),
}

impl LedgerDbError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, LedgerDbError::Conflict(_))
    }
}

pub type LedgerResult<T> = Result<T, LedgerDbError>;

// =============================================================================
// LedgerDatabase
// =============================================================================

/// Embedded ACID store for idempotency, ledger and provisioning state.
pub struct LedgerDatabase {
    db: Database,
}

impl std::fmt::Debug for LedgerDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerDatabase").finish_non_exhaustive()
    }
}

impl LedgerDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(PROCESSED_EVENTS)?;
            let _ = write_txn.open_table(EVENT_ID_INDEX)?;
            let _ = write_txn.open_table(FINGERPRINT_INDEX)?;
            let _ = write_txn.open_table(TRANSACTIONS)?;
            let _ = write_txn.open_table(ACTIVITY_INDEX)?;
            let _ = write_txn.open_table(DEPOSIT_INDEX)?;
            let _ = write_txn.open_table(PROFILES)?;
            let _ = write_txn.open_table(CUSTOMER_INDEX)?;
            let _ = write_txn.open_table(WALLETS)?;
            let _ = write_txn.open_table(VIRTUAL_ACCOUNTS)?;
            let _ = write_txn.open_table(COMPLIANCE_SUBMISSIONS)?;
            let _ = write_txn.open_table(META)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Run `f` inside a write transaction; commit on `Ok`, abort on `Err`.
    pub(super) fn write<R>(
        &self,
        f: impl FnOnce(&WriteTransaction) -> LedgerResult<R>,
    ) -> LedgerResult<R> {
        let txn = self.db.begin_write()?;
        match f(&txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                txn.abort()?;
                Err(e)
            }
        }
    }

    /// Run `f` inside a read transaction.
    pub(super) fn read<R>(
        &self,
        f: impl FnOnce(&ReadTransaction) -> LedgerResult<R>,
    ) -> LedgerResult<R> {
        let txn = self.db.begin_read()?;
        f(&txn)
    }

    /// Write-read probe used by the readiness endpoint.
    pub fn health_check(&self) -> LedgerResult<()> {
        let probe = chrono::Utc::now().timestamp_millis().to_be_bytes();
        self.write(|txn| {
            let mut table = txn.open_table(META)?;
            table.insert("health_probe", probe.as_slice())?;
            Ok(())
        })?;

        let stored = self.read(|txn| {
            let table = txn.open_table(META)?;
            Ok(table.get("health_probe")?.map(|v| v.value().to_vec()))
        })?;

        match stored {
            Some(bytes) if bytes == probe => Ok(()),
            _ => Err(LedgerDbError::NotFound("health probe".to_string())),
        }
    }
}

// =============================================================================
// Row helpers
// =============================================================================

pub(super) fn read_json<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> LedgerResult<Option<T>> {
    match table.get(key)? {
        Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
        None => Ok(None),
    }
}

pub(super) fn read_index(
    table: &impl ReadableTable<&'static str, &'static str>,
    key: &str,
) -> LedgerResult<Option<String>> {
    Ok(table.get(key)?.map(|value| value.value().to_string()))
}

/// Range bounds covering every `owner|...` composite key.
///
/// `}` sorts directly after `|`, so `owner}` is an exclusive upper bound.
pub(super) fn owner_range(owner: &str) -> (String, String) {
    (format!("{owner}|"), format!("{owner}}}"))
}

#[cfg(test)]
pub(crate) fn temp_db() -> (LedgerDatabase, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = LedgerDatabase::open(&dir.path().join("ledger.redb")).unwrap();
    (db, dir)
}
