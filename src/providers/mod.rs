// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! External collaborators: the Provider REST API and the compliance
//! submission source.

pub mod client;
pub mod compliance;

pub use client::{
    HttpProviderClient, ProviderApi, ProviderError, ProviderVirtualAccount, ProviderWallet,
};
pub use compliance::{
    ComplianceError, ComplianceSource, ComplianceSubmission, SubmissionKind, SubmissionStatus,
};
