// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Applies normalized activities to the transaction ledger.
//!
//! Rows are grouped by `(deposit_id, user_id, direction)` when a deposit id is
//! known and by provider activity id otherwise. Status only moves forward;
//! receipt fields are filled in whenever they first appear.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::events::Activity;
use super::sweep::SweepHandle;
use crate::storage::{LedgerDatabase, LedgerDbError, StoredTransaction, TransactionStatus};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("ledger write failed: {0}")]
    Ledger(#[from] LedgerDbError),
}

impl ReconcileError {
    /// A unique key was taken by another row.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Ledger(e) if e.is_conflict())
    }
}

/// What applying one activity did to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Created(StoredTransaction),
    Updated(StoredTransaction),
    /// Matched an existing row but nothing advanced.
    Unchanged { transaction_id: String },
    /// Never touches the ledger.
    Filtered { reason: &'static str },
}

impl ReconcileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Created(_) => "created",
            ReconcileOutcome::Updated(_) => "updated",
            ReconcileOutcome::Unchanged { .. } => "unchanged",
            ReconcileOutcome::Filtered { .. } => "filtered",
        }
    }
}

pub struct TransactionReconciler {
    db: Arc<LedgerDatabase>,
    fallback: Option<SweepHandle>,
}

impl TransactionReconciler {
    pub fn new(db: Arc<LedgerDatabase>) -> Self {
        Self { db, fallback: None }
    }

    /// Request an out-of-band sweep for the user whenever a ledger write
    /// fails for a reason other than a lost race.
    pub fn with_fallback(mut self, sweep: SweepHandle) -> Self {
        self.fallback = Some(sweep);
        self
    }

    pub fn apply(
        &self,
        user_id: &str,
        activity: &Activity,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        match self.try_apply(user_id, activity) {
            Ok(outcome) => {
                debug!(
                    user_id = %user_id,
                    activity_id = %activity.activity_id,
                    outcome = outcome.label(),
                    "Activity reconciled"
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!(
                    user_id = %user_id,
                    activity_id = %activity.activity_id,
                    error = %e,
                    "Ledger reconciliation failed"
                );
                if !e.is_conflict() {
                    if let Some(sweep) = &self.fallback {
                        sweep.request(user_id);
                    }
                }
                Err(e)
            }
        }
    }

    fn try_apply(
        &self,
        user_id: &str,
        activity: &Activity,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if let Some(reason) = activity.filter_reason() {
            debug!(activity_id = %activity.activity_id, reason, "Activity filtered");
            return Ok(ReconcileOutcome::Filtered { reason });
        }

        if let Some(existing) = self.lookup(user_id, activity)? {
            return self.merge(&existing.transaction_id, activity);
        }

        // A competitor may have inserted the same deposit since the lookup.
        if let Some(deposit_id) = activity.deposit_id.as_deref() {
            if let Some(existing) =
                self.db
                    .find_transaction_by_deposit(deposit_id, user_id, activity.direction)?
            {
                return self.merge(&existing.transaction_id, activity);
            }
        }

        let transaction = new_transaction(user_id, activity);
        match self.db.insert_transaction(&transaction) {
            Ok(()) => {
                info!(
                    user_id = %user_id,
                    transaction_id = %transaction.transaction_id,
                    activity_id = %activity.activity_id,
                    status = ?transaction.status,
                    "Ledger transaction created"
                );
                Ok(ReconcileOutcome::Created(transaction))
            }
            Err(e) if e.is_conflict() => {
                debug!(
                    activity_id = %activity.activity_id,
                    "Lost insert race, merging into existing transaction"
                );
                match self.lookup(user_id, activity)? {
                    Some(existing) => self.merge(&existing.transaction_id, activity),
                    None => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Deposit key first, then provider activity id.
    fn lookup(
        &self,
        user_id: &str,
        activity: &Activity,
    ) -> Result<Option<StoredTransaction>, ReconcileError> {
        if let Some(deposit_id) = activity.deposit_id.as_deref() {
            if let Some(found) =
                self.db
                    .find_transaction_by_deposit(deposit_id, user_id, activity.direction)?
            {
                return Ok(Some(found));
            }
        }
        Ok(self
            .db
            .find_transaction_by_activity(&activity.activity_id)?
            .filter(|tx| tx.user_id == user_id))
    }

    fn merge(
        &self,
        transaction_id: &str,
        activity: &Activity,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let already_applied = self
            .db
            .find_transaction_by_activity(&activity.activity_id)?
            .is_some_and(|tx| tx.transaction_id == transaction_id);

        let updated = self.db.update_transaction_with(transaction_id, |tx| {
            merge_activity(tx, activity, !already_applied)
        })?;

        Ok(match updated {
            Some(tx) => {
                info!(
                    transaction_id = %tx.transaction_id,
                    activity_id = %tx.provider_activity_id,
                    status = ?tx.status,
                    "Ledger transaction updated"
                );
                ReconcileOutcome::Updated(tx)
            }
            None => ReconcileOutcome::Unchanged {
                transaction_id: transaction_id.to_string(),
            },
        })
    }
}

fn new_transaction(user_id: &str, activity: &Activity) -> StoredTransaction {
    let now = Utc::now();
    let status = TransactionStatus::from_provider(&activity.status);
    StoredTransaction {
        transaction_id: uuid::Uuid::new_v4().to_string(),
        provider_activity_id: activity.activity_id.clone(),
        deposit_id: activity.deposit_id.clone(),
        user_id: user_id.to_string(),
        direction: activity.direction,
        amount: activity.amount,
        currency: activity.currency.clone(),
        status,
        provider_status: activity.status.clone(),
        receipt: activity.receipt.clone(),
        metadata: activity.raw.clone(),
        created_at: now,
        updated_at: now,
        completed_at: (status == TransactionStatus::PaymentProcessed).then_some(now),
    }
}

/// Fold an activity into a stored row. Returns whether anything changed.
///
/// The "latest id" pointer moves to the incoming activity whenever the row
/// changes or the activity id is new to it; a pure replay leaves it alone.
pub fn merge_activity(tx: &mut StoredTransaction, activity: &Activity, new_activity: bool) -> bool {
    let mut changed = false;

    let incoming = TransactionStatus::from_provider(&activity.status);
    if tx.status.can_advance_to(incoming) {
        tx.status = incoming;
        tx.provider_status = activity.status.clone();
        if incoming == TransactionStatus::PaymentProcessed && tx.completed_at.is_none() {
            tx.completed_at = Some(Utc::now());
        }
        changed = true;
    }

    if tx.receipt.fill_from(&activity.receipt) {
        changed = true;
    }

    if tx.deposit_id.is_none() && activity.deposit_id.is_some() {
        tx.deposit_id = activity.deposit_id.clone();
        changed = true;
    }

    if (changed || new_activity) && tx.provider_activity_id != activity.activity_id {
        tx.provider_activity_id = activity.activity_id.clone();
        changed = true;
    }

    if changed {
        tx.metadata = activity.raw.clone();
    }
    changed
}
