// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Local ledger of money movement reported by the Provider.
//!
//! A transaction is unique by `(deposit_id, user_id, direction)` when a
//! deposit id is known, and by every provider activity id ever applied to it.
//! The local `transaction_id` never changes once created.

use chrono::{DateTime, Utc};
use redb::ReadableTable;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::ledger_db::{
    read_index, read_json, LedgerDatabase, LedgerDbError, LedgerResult, ACTIVITY_INDEX,
    DEPOSIT_INDEX, TRANSACTIONS,
};
use crate::models::Direction;

/// User-visible lifecycle of a transaction, ordered by rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Funds reached the Provider (any non-final Provider status).
    FundsReceived,
    /// Funds were delivered to their destination.
    PaymentProcessed,
}

impl TransactionStatus {
    /// Map a raw Provider status into the ledger lifecycle.
    ///
    /// Only `payment_processed` is a distinct step; every other Provider
    /// status is reflected as "received".
    pub fn from_provider(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "payment_processed" => TransactionStatus::PaymentProcessed,
            _ => TransactionStatus::FundsReceived,
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            TransactionStatus::FundsReceived => 1,
            TransactionStatus::PaymentProcessed => 2,
        }
    }

    /// True when `next` may replace `self` (strictly higher rank).
    pub fn can_advance_to(&self, next: TransactionStatus) -> bool {
        next.rank() > self.rank()
    }
}

/// Settlement details that arrive piecemeal over a transaction's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Receipt {
    /// Final amount delivered after fees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_amount: Option<Decimal>,
    /// On-chain hash of the delivery to the destination wallet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_tx_hash: Option<String>,
    /// Bank trace number (ACH trace / wire IMAD / SEPA reference).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_number: Option<String>,
}

impl Receipt {
    /// Copy every field that is missing here but present in `incoming`.
    ///
    /// Returns whether anything was filled in. Known fields are never
    /// overwritten.
    pub fn fill_from(&mut self, incoming: &Receipt) -> bool {
        let mut changed = false;
        if self.final_amount.is_none() && incoming.final_amount.is_some() {
            self.final_amount = incoming.final_amount;
            changed = true;
        }
        if self.destination_tx_hash.is_none() && incoming.destination_tx_hash.is_some() {
            self.destination_tx_hash = incoming.destination_tx_hash.clone();
            changed = true;
        }
        if self.trace_number.is_none() && incoming.trace_number.is_some() {
            self.trace_number = incoming.trace_number.clone();
            changed = true;
        }
        changed
    }
}

/// Stored ledger record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StoredTransaction {
    /// Local identity, stable for the life of the record.
    pub transaction_id: String,
    /// Id of the most recently applied Provider activity.
    pub provider_activity_id: String,
    /// Stable Provider grouping key, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit_id: Option<String>,
    pub user_id: String,
    pub direction: Direction,
    pub amount: Decimal,
    pub currency: String,
    pub status: TransactionStatus,
    /// Raw Provider status that produced `status`.
    pub provider_status: String,
    #[serde(default)]
    pub receipt: Receipt,
    /// Last raw event payload applied.
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

fn deposit_key(deposit_id: &str, user_id: &str, direction: Direction) -> String {
    format!("{deposit_id}|{user_id}|{}", direction.as_str())
}

impl LedgerDatabase {
    pub fn get_transaction(&self, transaction_id: &str) -> LedgerResult<Option<StoredTransaction>> {
        self.read(|txn| {
            let table = txn.open_table(TRANSACTIONS)?;
            read_json(&table, transaction_id)
        })
    }

    /// Look up a transaction by any provider activity id ever applied to it.
    pub fn find_transaction_by_activity(
        &self,
        activity_id: &str,
    ) -> LedgerResult<Option<StoredTransaction>> {
        self.read(|txn| {
            let index = txn.open_table(ACTIVITY_INDEX)?;
            let table = txn.open_table(TRANSACTIONS)?;
            match read_index(&index, activity_id)? {
                Some(id) => read_json(&table, &id),
                None => Ok(None),
            }
        })
    }

    pub fn find_transaction_by_deposit(
        &self,
        deposit_id: &str,
        user_id: &str,
        direction: Direction,
    ) -> LedgerResult<Option<StoredTransaction>> {
        let key = deposit_key(deposit_id, user_id, direction);
        self.read(|txn| {
            let index = txn.open_table(DEPOSIT_INDEX)?;
            let table = txn.open_table(TRANSACTIONS)?;
            match read_index(&index, &key)? {
                Some(id) => read_json(&table, &id),
                None => Ok(None),
            }
        })
    }

    /// Insert a new transaction.
    ///
    /// Fails with [`LedgerDbError::Conflict`] if its deposit key or activity
    /// id already belongs to another record.
    pub fn insert_transaction(&self, tx: &StoredTransaction) -> LedgerResult<()> {
        let json = serde_json::to_vec(tx)?;
        self.write(|txn| {
            let mut table = txn.open_table(TRANSACTIONS)?;
            let mut activity_index = txn.open_table(ACTIVITY_INDEX)?;
            let mut deposit_index = txn.open_table(DEPOSIT_INDEX)?;

            let deposit = tx
                .deposit_id
                .as_deref()
                .map(|d| deposit_key(d, &tx.user_id, tx.direction));

            if let Some(key) = deposit.as_deref() {
                if deposit_index.get(key)?.is_some() {
                    return Err(LedgerDbError::Conflict(format!("deposit {key}")));
                }
            }
            if activity_index.get(tx.provider_activity_id.as_str())?.is_some() {
                return Err(LedgerDbError::Conflict(format!(
                    "activity {}",
                    tx.provider_activity_id
                )));
            }
            if table.get(tx.transaction_id.as_str())?.is_some() {
                return Err(LedgerDbError::Conflict(format!(
                    "transaction {}",
                    tx.transaction_id
                )));
            }

            table.insert(tx.transaction_id.as_str(), json.as_slice())?;
            activity_index.insert(tx.provider_activity_id.as_str(), tx.transaction_id.as_str())?;
            if let Some(key) = deposit.as_deref() {
                deposit_index.insert(key, tx.transaction_id.as_str())?;
            }
            Ok(())
        })
    }

    /// Atomically read-modify-write a transaction.
    ///
    /// `apply` returns whether it changed the record; unchanged records are
    /// not written and `Ok(None)` is returned. New activity ids and a newly
    /// learned deposit id are added to the indexes; old activity ids keep
    /// pointing at the record.
    pub fn update_transaction_with(
        &self,
        transaction_id: &str,
        apply: impl FnOnce(&mut StoredTransaction) -> bool,
    ) -> LedgerResult<Option<StoredTransaction>> {
        self.write(|txn| {
            let mut table = txn.open_table(TRANSACTIONS)?;
            let mut activity_index = txn.open_table(ACTIVITY_INDEX)?;
            let mut deposit_index = txn.open_table(DEPOSIT_INDEX)?;

            let mut tx: StoredTransaction = read_json(&table, transaction_id)?
                .ok_or_else(|| LedgerDbError::NotFound(format!("transaction {transaction_id}")))?;

            if !apply(&mut tx) {
                return Ok(None);
            }
            tx.updated_at = Utc::now();

            if activity_index.get(tx.provider_activity_id.as_str())?.is_none() {
                activity_index
                    .insert(tx.provider_activity_id.as_str(), tx.transaction_id.as_str())?;
            }
            if let Some(deposit_id) = tx.deposit_id.as_deref() {
                let key = deposit_key(deposit_id, &tx.user_id, tx.direction);
                if deposit_index.get(key.as_str())?.is_none() {
                    deposit_index.insert(key.as_str(), tx.transaction_id.as_str())?;
                }
            }

            let json = serde_json::to_vec(&tx)?;
            table.insert(tx.transaction_id.as_str(), json.as_slice())?;
            Ok(Some(tx))
        })
    }

    /// Overwrite a row with bytes that do not deserialize.
    #[cfg(test)]
    pub(crate) fn corrupt_transaction(&self, transaction_id: &str) -> LedgerResult<()> {
        self.write(|txn| {
            let mut table = txn.open_table(TRANSACTIONS)?;
            table.insert(transaction_id, b"not json".as_slice())?;
            Ok(())
        })
    }

    /// All transactions of a user, newest first.
    pub fn list_transactions_for_user(&self, user_id: &str) -> LedgerResult<Vec<StoredTransaction>> {
        let mut transactions: Vec<StoredTransaction> = self.read(|txn| {
            let table = txn.open_table(TRANSACTIONS)?;
            let mut out = Vec::new();
            for entry in table.iter()? {
                let (_, value) = entry?;
                let tx: StoredTransaction = serde_json::from_slice(value.value())?;
                if tx.user_id == user_id {
                    out.push(tx);
                }
            }
            Ok(out)
        })?;
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(transactions)
    }

    /// Transaction ids indexed under deposit keys for one deposit id.
    #[cfg(test)]
    pub(crate) fn deposit_rows(&self, deposit_id: &str) -> LedgerResult<Vec<String>> {
        let (start, end) = super::ledger_db::owner_range(deposit_id);
        self.read(|txn| {
            let index = txn.open_table(DEPOSIT_INDEX)?;
            let mut out = Vec::new();
            for entry in index.range(start.as_str()..end.as_str())? {
                let (_, value) = entry?;
                out.push(value.value().to_string());
            }
            Ok(out)
        })
    }
}
