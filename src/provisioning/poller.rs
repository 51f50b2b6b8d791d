// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bounded polling for asynchronous endorsement approval.

use std::time::Duration;

use tracing::{debug, warn};

use crate::models::{CustomerSnapshot, EndorsementStatus};
use crate::providers::ProviderApi;

/// Result of waiting for one endorsement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// First snapshot in which the endorsement was approved.
    Approved(CustomerSnapshot),
    /// The Provider rejected the endorsement; polling stops early.
    Rejected(CustomerSnapshot),
    /// The attempt budget ran out; carries the last snapshot observed, if
    /// any call succeeded.
    Exhausted { last: Option<CustomerSnapshot> },
}

/// Fixed-interval poller with an attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndorsementPoller {
    attempts: u32,
    interval: Duration,
}

impl EndorsementPoller {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            interval,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Poll the customer until `endorsement` is approved or rejected, or the
    /// budget is spent. Provider errors count as attempts.
    pub async fn wait_for(
        &self,
        provider: &dyn ProviderApi,
        customer_id: &str,
        endorsement: &str,
    ) -> PollOutcome {
        let mut last = None;
        for attempt in 1..=self.attempts {
            match provider.get_customer(customer_id).await {
                Ok(snapshot) if snapshot.is_endorsed(endorsement) => {
                    debug!(customer_id, endorsement, attempt, "Endorsement approved");
                    return PollOutcome::Approved(snapshot);
                }
                Ok(snapshot)
                    if snapshot.endorsement_status(endorsement) == EndorsementStatus::Rejected =>
                {
                    debug!(customer_id, endorsement, attempt, "Endorsement rejected");
                    return PollOutcome::Rejected(snapshot);
                }
                Ok(snapshot) => {
                    debug!(
                        customer_id,
                        endorsement,
                        attempt,
                        status = snapshot.endorsement_status(endorsement).as_str(),
                        "Endorsement not approved yet"
                    );
                    last = Some(snapshot);
                }
                Err(e) => {
                    warn!(customer_id, endorsement, attempt, error = %e, "Endorsement poll failed");
                }
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        PollOutcome::Exhausted { last }
    }
}
