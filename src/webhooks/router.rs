// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Routes a verified, de-duplicated webhook to its handler.
//!
//! Every dispatch ends by recording the event as processed, whatever the
//! handler decided, so retried deliveries of uninteresting or unusable
//! events short-circuit at the idempotency check.

use std::sync::Arc;

use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use super::events::{Activity, KycLinkUpdate, ProviderEvent, WebhookEvent};
use super::idempotency::IdempotencyGuard;
use super::reconciler::{ReconcileOutcome, TransactionReconciler};
use crate::models::CustomerSnapshot;
use crate::provisioning::{ProvisionRequest, ProvisioningOrchestrator};
use crate::storage::{CustomerProfile, LedgerDatabase};

/// What one dispatch did.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Reconciled(ReconcileOutcome),
    CustomerSynced {
        user_id: String,
        provisioning_started: bool,
    },
    Ignored {
        reason: String,
    },
    Failed {
        reason: String,
    },
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Reconciled(outcome) => outcome.label(),
            DispatchOutcome::CustomerSynced { .. } => "customer_synced",
            DispatchOutcome::Ignored { .. } => "ignored",
            DispatchOutcome::Failed { .. } => "failed",
        }
    }

    fn ignored(reason: impl Into<String>) -> Self {
        DispatchOutcome::Ignored {
            reason: reason.into(),
        }
    }
}

pub struct EventRouter {
    db: Arc<LedgerDatabase>,
    guard: Arc<IdempotencyGuard>,
    reconciler: TransactionReconciler,
    orchestrator: Arc<ProvisioningOrchestrator>,
    tasks: TaskTracker,
}

impl EventRouter {
    pub fn new(
        db: Arc<LedgerDatabase>,
        guard: Arc<IdempotencyGuard>,
        reconciler: TransactionReconciler,
        orchestrator: Arc<ProvisioningOrchestrator>,
        tasks: TaskTracker,
    ) -> Self {
        Self {
            db,
            guard,
            reconciler,
            orchestrator,
            tasks,
        }
    }

    /// Handle one event and record it as processed.
    ///
    /// Blocking: ledger I/O runs inline. Must be called inside a Tokio
    /// runtime because customer updates may spawn provisioning.
    pub fn dispatch(&self, event: &WebhookEvent) -> DispatchOutcome {
        let customer_id = event.customer_id().map(str::to_string);
        let user_id = match customer_id.as_deref() {
            Some(customer_id) => match self.db.find_user_by_customer(customer_id) {
                Ok(user_id) => user_id,
                Err(e) => {
                    warn!(customer_id, error = %e, "Customer lookup failed");
                    None
                }
            },
            None => None,
        };

        let outcome = match ProviderEvent::from_webhook(event) {
            ProviderEvent::VirtualAccountActivity(activity)
            | ProviderEvent::LiquidationDrain(activity)
            | ProviderEvent::Transfer(activity) => {
                self.on_activity(user_id.as_deref(), &activity)
            }
            ProviderEvent::CustomerUpdated(snapshot) => {
                self.on_customer(user_id.as_deref(), &snapshot)
            }
            ProviderEvent::KycLinkUpdated(update) => self.on_kyc_link(user_id.as_deref(), &update),
            ProviderEvent::Malformed { reason } => DispatchOutcome::Failed { reason },
            ProviderEvent::Unknown => DispatchOutcome::ignored("unhandled event type"),
        };

        if let Err(e) = self
            .guard
            .record(event, customer_id.as_deref(), user_id.as_deref())
        {
            warn!(
                event_id = ?event.event_id,
                event_type = %event.event_type,
                error = %e,
                "Failed to record processed event"
            );
        }

        info!(
            event_id = ?event.event_id,
            event_type = %event.event_type,
            customer_id = ?customer_id,
            user_id = ?user_id,
            outcome = outcome.label(),
            "Webhook dispatched"
        );
        outcome
    }

    fn on_activity(&self, user_id: Option<&str>, activity: &Activity) -> DispatchOutcome {
        let Some(user_id) = user_id else {
            return DispatchOutcome::ignored("activity for an unknown customer");
        };
        match self.reconciler.apply(user_id, activity) {
            Ok(outcome) => DispatchOutcome::Reconciled(outcome),
            Err(e) => DispatchOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }

    fn on_customer(&self, user_id: Option<&str>, snapshot: &CustomerSnapshot) -> DispatchOutcome {
        let Some(user_id) = user_id else {
            return DispatchOutcome::ignored("customer not linked to a user");
        };

        let previous = match self.db.get_profile(user_id) {
            Ok(profile) => profile,
            Err(e) => return DispatchOutcome::Failed { reason: e.to_string() },
        };
        let newly_approved: Vec<&str> = snapshot
            .endorsements
            .iter()
            .filter(|e| e.is_approved())
            .filter(|e| {
                !previous
                    .as_ref()
                    .is_some_and(|p| p.endorsements.iter().any(|old| old.name == e.name && old.is_approved()))
            })
            .map(|e| e.name.as_str())
            .collect();

        let updated = self.db.update_profile(
            user_id,
            || CustomerProfile::new(user_id, snapshot.email.clone()),
            |profile| {
                profile.kyc_status = snapshot.kyc_status.clone();
                profile.endorsements = snapshot.endorsements.clone();
                if profile.email.is_none() {
                    profile.email = snapshot.email.clone();
                }
                if snapshot.signed_agreement_id.is_some() {
                    profile.signed_agreement_id = snapshot.signed_agreement_id.clone();
                }
            },
        );
        if let Err(e) = updated {
            return DispatchOutcome::Failed { reason: e.to_string() };
        }

        let provisioning_started = !newly_approved.is_empty() && self.spawn_provisioning(user_id);
        if !newly_approved.is_empty() {
            info!(
                user_id,
                endorsements = ?newly_approved,
                provisioning_started,
                "Endorsement approved by webhook"
            );
        }
        DispatchOutcome::CustomerSynced {
            user_id: user_id.to_string(),
            provisioning_started,
        }
    }

    fn on_kyc_link(&self, user_id: Option<&str>, update: &KycLinkUpdate) -> DispatchOutcome {
        let Some(user_id) = user_id else {
            return DispatchOutcome::ignored("kyc link not linked to a user");
        };
        let updated = self.db.update_profile(
            user_id,
            || CustomerProfile::new(user_id, None),
            |profile| {
                if update.kyc_status.is_some() {
                    profile.kyc_status = update.kyc_status.clone();
                }
                if update.signed_agreement_id.is_some() {
                    profile.signed_agreement_id = update.signed_agreement_id.clone();
                }
            },
        );
        match updated {
            Ok(_) => DispatchOutcome::CustomerSynced {
                user_id: user_id.to_string(),
                provisioning_started: false,
            },
            Err(e) => DispatchOutcome::Failed { reason: e.to_string() },
        }
    }

    /// Start a background provisioning run when resources are still missing.
    fn spawn_provisioning(&self, user_id: &str) -> bool {
        match self.orchestrator.needs_provisioning(user_id) {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                warn!(user_id, error = %e, "Cannot check provisioning state");
                return false;
            }
        }

        let orchestrator = self.orchestrator.clone();
        let request = ProvisionRequest::for_user(user_id);
        self.tasks.spawn(async move {
            let user_id = request.user_id.clone();
            match orchestrator.provision(request).await {
                Ok(report) => info!(
                    user_id = %user_id,
                    success = report.success,
                    partial = report.partial,
                    "Webhook-triggered provisioning finished"
                ),
                Err(e) => warn!(
                    user_id = %user_id,
                    error = %e,
                    "Webhook-triggered provisioning failed"
                ),
            }
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvisioningConfig;
    use crate::models::Currency;
    use crate::storage::ledger_db::temp_db;
    use crate::storage::TransactionStatus;
    use crate::testing::{customer, FakeProvider};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        db: Arc<LedgerDatabase>,
        provider: Arc<FakeProvider>,
        router: EventRouter,
        tasks: TaskTracker,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let (db, dir) = temp_db();
        let db = Arc::new(db);
        let provider = Arc::new(FakeProvider::new());
        let orchestrator = Arc::new(ProvisioningOrchestrator::new(
            db.clone(),
            provider.clone(),
            db.clone(),
            ProvisioningConfig {
                currencies: vec![Currency::Usd],
                poll_attempts: 1,
                poll_interval: Duration::from_millis(1),
                ..ProvisioningConfig::default()
            },
        ));
        let tasks = TaskTracker::new();
        let router = EventRouter::new(
            db.clone(),
            Arc::new(IdempotencyGuard::new(db.clone())),
            TransactionReconciler::new(db.clone()),
            orchestrator,
            tasks.clone(),
        );

        let mut profile = CustomerProfile::new("user-1", Some("a@example.com".to_string()));
        profile.customer_id = Some("cust_1".to_string());
        profile.signed_agreement_id = Some("sa_1".to_string());
        db.put_profile(&profile).unwrap();

        Harness {
            db,
            provider,
            router,
            tasks,
            _dir: dir,
        }
    }

    fn event(body: serde_json::Value) -> WebhookEvent {
        WebhookEvent::parse(body.to_string().as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn activity_is_reconciled_and_recorded() {
        let h = harness();
        let e = event(json!({
            "event_id": "wh_1",
            "event_type": "virtual_account.activity.created",
            "event_object": {
                "id": "act_1", "customer_id": "cust_1", "type": "funds_received",
                "deposit_id": "dep_1", "amount": "25.00", "currency": "usd"
            }
        }));

        let outcome = h.router.dispatch(&e);
        assert!(matches!(outcome, DispatchOutcome::Reconciled(ReconcileOutcome::Created(_))));

        let rows = h.db.list_transactions_for_user("user-1").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, TransactionStatus::FundsReceived);

        let recorded = h.db.find_processed_event(Some("wh_1"), "").unwrap().unwrap();
        assert_eq!(recorded.user_id.as_deref(), Some("user-1"));
        assert_eq!(recorded.customer_id.as_deref(), Some("cust_1"));
    }

    #[tokio::test]
    async fn skipped_events_are_still_recorded() {
        let h = harness();
        let unknown = event(json!({
            "event_id": "wh_u", "event_type": "static_memo.activity", "event_object": { "id": "x" }
        }));
        let stranger = event(json!({
            "event_id": "wh_s",
            "event_type": "virtual_account.activity.created",
            "event_object": { "id": "act_9", "customer_id": "cust_other", "type": "funds_received", "amount": "5", "currency": "usd" }
        }));
        let filtered = event(json!({
            "event_id": "wh_f",
            "event_type": "virtual_account.activity.created",
            "event_object": { "id": "act_m", "customer_id": "cust_1", "type": "microdeposit", "amount": "0.01", "currency": "usd" }
        }));
        let malformed = event(json!({
            "event_id": "wh_m", "event_type": "transfer.updated", "event_object": { "state": "x" }
        }));

        assert!(matches!(h.router.dispatch(&unknown), DispatchOutcome::Ignored { .. }));
        assert!(matches!(h.router.dispatch(&stranger), DispatchOutcome::Ignored { .. }));
        assert!(matches!(
            h.router.dispatch(&filtered),
            DispatchOutcome::Reconciled(ReconcileOutcome::Filtered { .. })
        ));
        assert!(matches!(h.router.dispatch(&malformed), DispatchOutcome::Failed { .. }));

        assert_eq!(h.db.count_processed_events().unwrap(), 4);
        assert!(h.db.list_transactions_for_user("user-1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn endorsement_approval_triggers_provisioning() {
        let h = harness();
        h.provider
            .insert_customer(customer("cust_1", &[("base", "approved")]));

        let e = event(json!({
            "event_id": "wh_c",
            "event_type": "customer.updated",
            "event_object": {
                "id": "cust_1", "status": "active",
                "endorsements": [{ "name": "base", "status": "approved" }]
            }
        }));
        let outcome = h.router.dispatch(&e);
        assert_eq!(
            outcome,
            DispatchOutcome::CustomerSynced {
                user_id: "user-1".to_string(),
                provisioning_started: true
            }
        );

        h.tasks.close();
        h.tasks.wait().await;

        assert!(h.db.get_wallet("user-1", "base").unwrap().is_some());
        assert!(h.db.get_virtual_account("user-1", Currency::Usd).unwrap().is_some());
        let profile = h.db.get_profile("user-1").unwrap().unwrap();
        assert_eq!(profile.kyc_status.as_deref(), Some("active"));

        // Already approved: a replayed update does not start another run.
        let again = event(json!({
            "event_id": "wh_c2",
            "event_type": "customer.updated",
            "event_object": {
                "id": "cust_1", "status": "active",
                "endorsements": [{ "name": "base", "status": "approved" }]
            }
        }));
        assert_eq!(
            h.router.dispatch(&again),
            DispatchOutcome::CustomerSynced {
                user_id: "user-1".to_string(),
                provisioning_started: false
            }
        );
    }

    #[tokio::test]
    async fn kyc_link_update_stores_agreement() {
        let h = harness();
        let e = event(json!({
            "event_type": "kyc_link.updated",
            "event_object": { "customer_id": "cust_1", "kyc_status": "approved", "signed_agreement_id": "sa_2" }
        }));
        assert!(matches!(h.router.dispatch(&e), DispatchOutcome::CustomerSynced { .. }));
        let profile = h.db.get_profile("user-1").unwrap().unwrap();
        assert_eq!(profile.signed_agreement_id.as_deref(), Some("sa_2"));
        assert_eq!(profile.kyc_status.as_deref(), Some("approved"));
    }
}
