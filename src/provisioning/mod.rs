// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Account provisioning: Provider customer, endorsement wait, custody wallet
//! and per-currency receiving accounts.

pub mod orchestrator;
pub mod payload;
pub mod poller;
pub mod report;

pub use orchestrator::{ProvisionRequest, ProvisioningError, ProvisioningOrchestrator};
pub use poller::{EndorsementPoller, PollOutcome};
pub use report::{
    AccountOutcome, EndorsementIssue, ProvisioningReport, ProvisioningState, ResourceOutcome,
    SuccessPolicy,
};
