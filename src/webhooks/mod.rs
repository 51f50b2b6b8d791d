// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Provider webhook pipeline.
//!
//! ```text
//! raw body -> SignatureVerifier -> WebhookEvent (fingerprint)
//!          -> IdempotencyGuard::seen -> EventRouter::dispatch
//!          -> TransactionReconciler | profile sync (+ provisioning)
//!          -> IdempotencyGuard::record
//! ```
//!
//! Ledger write failures queue a [`sweep::ReconciliationSweeper`] run for the
//! affected user.

pub mod events;
pub mod idempotency;
pub mod reconciler;
pub mod router;
pub mod signature;
pub mod sweep;

pub use events::{
    content_fingerprint, Activity, EnvelopeError, EventKind, KycLinkUpdate, ProviderEvent,
    WebhookEvent,
};
pub use idempotency::IdempotencyGuard;
pub use reconciler::{merge_activity, ReconcileError, ReconcileOutcome, TransactionReconciler};
pub use router::{DispatchOutcome, EventRouter};
pub use signature::{
    SignatureError, SignatureHeader, SignatureVerifier, LEGACY_SIGNATURE_HEADER, SIGNATURE_HEADER,
};
pub use sweep::{ReconciliationSweeper, SweepError, SweepHandle, SweepSummary};
