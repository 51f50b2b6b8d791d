// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Reconciliation Sweeper
//!
//! Background task that re-derives a user's ledger from the Provider's
//! canonical listings after a webhook could not be applied.
//!
//! ## Strategy
//!
//! Sweeps are requested through a [`SweepHandle`] (fire-and-forget). For each
//! requested user the sweeper:
//! 1. Resolves the cached Provider customer id.
//! 2. Lists the activity of every virtual account the user owns and the
//!    customer's transfers.
//! 3. Replays each item through [`TransactionReconciler`], which is idempotent.
//!
//! Requests that pile up while a sweep runs are coalesced per user.
//!
//! ## Shutdown
//!
//! Runs until the `CancellationToken` fires or every handle is dropped.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::events::Activity;
use super::reconciler::{ReconcileOutcome, TransactionReconciler};
use crate::providers::{ProviderApi, ProviderError};
use crate::storage::{LedgerDatabase, LedgerDbError};

/// Cheap, cloneable sender for sweep requests.
#[derive(Debug, Clone)]
pub struct SweepHandle {
    tx: mpsc::UnboundedSender<String>,
}

impl SweepHandle {
    /// Queue a sweep for `user_id`. Never blocks; dropped if the sweeper
    /// has stopped.
    pub fn request(&self, user_id: &str) {
        if self.tx.send(user_id.to_string()).is_err() {
            warn!(user_id = %user_id, "Reconciliation sweeper is not running; request dropped");
        }
    }
}

#[cfg(test)]
impl SweepHandle {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error(transparent)]
    Ledger(#[from] LedgerDbError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Counts of what one sweep did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SweepSummary {
    fn count(&mut self, outcome: &ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Created(_) => self.created += 1,
            ReconcileOutcome::Updated(_) => self.updated += 1,
            ReconcileOutcome::Unchanged { .. } => self.unchanged += 1,
            ReconcileOutcome::Filtered { .. } => self.skipped += 1,
        }
    }
}

pub struct ReconciliationSweeper {
    db: Arc<LedgerDatabase>,
    provider: Arc<dyn ProviderApi>,
    reconciler: TransactionReconciler,
    rx: mpsc::UnboundedReceiver<String>,
}

impl ReconciliationSweeper {
    /// Create the sweeper and the handle used to feed it.
    pub fn new(db: Arc<LedgerDatabase>, provider: Arc<dyn ProviderApi>) -> (Self, SweepHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sweeper = Self {
            reconciler: TransactionReconciler::new(db.clone()),
            db,
            provider,
            rx,
        };
        (sweeper, SweepHandle { tx })
    }

    /// Run until cancelled.
    ///
    /// ```rust,ignore
    /// tokio::spawn(sweeper.run(shutdown.clone()));
    /// ```
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Reconciliation sweeper starting");

        loop {
            let first = tokio::select! {
                next = self.rx.recv() => next,
                _ = shutdown.cancelled() => None,
            };
            let Some(first) = first else {
                info!("Reconciliation sweeper shutting down");
                return;
            };

            let mut users = BTreeSet::from([first]);
            while let Ok(more) = self.rx.try_recv() {
                users.insert(more);
            }

            for user_id in users {
                if shutdown.is_cancelled() {
                    info!("Reconciliation sweeper shutting down");
                    return;
                }
                match self.sweep_user(&user_id).await {
                    Ok(summary) => info!(
                        user_id = %user_id,
                        created = summary.created,
                        updated = summary.updated,
                        unchanged = summary.unchanged,
                        skipped = summary.skipped,
                        failed = summary.failed,
                        "Reconciliation sweep finished"
                    ),
                    Err(e) => warn!(
                        user_id = %user_id,
                        error = %e,
                        "Reconciliation sweep failed"
                    ),
                }
            }
        }
    }

    /// Replay the Provider's canonical history for one user.
    pub async fn sweep_user(&self, user_id: &str) -> Result<SweepSummary, SweepError> {
        let mut summary = SweepSummary::default();
        let Some(customer_id) = self
            .db
            .get_profile(user_id)?
            .and_then(|profile| profile.customer_id)
        else {
            return Ok(summary);
        };

        for account in self.db.list_virtual_accounts(user_id)? {
            let items = self
                .provider
                .list_virtual_account_activity(&customer_id, &account.account_id)
                .await?;
            self.replay(user_id, &items, Activity::from_virtual_account_activity, &mut summary);
        }

        let transfers = self.provider.list_transfers(&customer_id).await?;
        self.replay(user_id, &transfers, Activity::from_transfer, &mut summary);

        Ok(summary)
    }

    fn replay(
        &self,
        user_id: &str,
        items: &[Value],
        project: fn(&Value) -> Result<Activity, String>,
        summary: &mut SweepSummary,
    ) {
        for item in items {
            let activity = match project(item) {
                Ok(activity) => activity,
                Err(reason) => {
                    warn!(user_id = %user_id, reason = %reason, "Skipping unreadable Provider item");
                    summary.skipped += 1;
                    continue;
                }
            };
            match self.reconciler.apply(user_id, &activity) {
                Ok(outcome) => summary.count(&outcome),
                Err(_) => summary.failed += 1,
            }
        }
    }
}
