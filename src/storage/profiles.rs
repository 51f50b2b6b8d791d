// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-user provisioning state: cached Customer profile, custody wallets,
//! receiving accounts and compliance submissions.
//!
//! The cached `customer_id` is a hint; the orchestrator re-verifies it
//! against the Provider before reuse.

use chrono::{DateTime, Utc};
use redb::ReadableTable;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::ledger_db::{
    owner_range, read_index, read_json, LedgerDatabase, LedgerDbError, LedgerResult,
    COMPLIANCE_SUBMISSIONS, CUSTOMER_INDEX, PROFILES, VIRTUAL_ACCOUNTS, WALLETS,
};
use crate::models::{Currency, Endorsement};
use crate::providers::ComplianceSubmission;

// =============================================================================
// Records
// =============================================================================

/// Local view of a user's Provider Customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CustomerProfile {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Provider customer id; `None` until created (or after being found stale).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kyc_status: Option<String>,
    #[serde(default)]
    pub endorsements: Vec<Endorsement>,
    /// Id of the signed terms-of-service agreement, once consent is given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_agreement_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CustomerProfile {
    pub fn new(user_id: impl Into<String>, email: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            email,
            customer_id: None,
            kyc_status: None,
            endorsements: Vec::new(),
            signed_agreement_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Custody wallet, one per `(user, chain)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WalletRecord {
    pub wallet_id: String,
    pub user_id: String,
    pub chain: String,
    pub address: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Bank-specific deposit instructions of a virtual account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoutingDetails {
    Ach {
        account_number: String,
        routing_number: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        bank_name: Option<String>,
    },
    Iban {
        iban: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        bic: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        account_holder_name: Option<String>,
    },
}

/// Currency-specific receiving account, at most one per `(user, currency)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct VirtualAccountRecord {
    pub account_id: String,
    pub user_id: String,
    pub customer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<String>,
    pub currency: Currency,
    pub routing_details: RoutingDetails,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

fn wallet_key(user_id: &str, chain: &str) -> String {
    format!("{user_id}|{chain}")
}

fn account_key(user_id: &str, currency: Currency) -> String {
    format!("{user_id}|{}", currency.as_str())
}

// =============================================================================
// Profile operations
// =============================================================================

impl LedgerDatabase {
    pub fn get_profile(&self, user_id: &str) -> LedgerResult<Option<CustomerProfile>> {
        self.read(|txn| {
            let table = txn.open_table(PROFILES)?;
            read_json(&table, user_id)
        })
    }

    /// Insert or replace a profile, keeping the customer index in sync.
    pub fn put_profile(&self, profile: &CustomerProfile) -> LedgerResult<()> {
        self.write(|txn| {
            let mut table = txn.open_table(PROFILES)?;
            let mut index = txn.open_table(CUSTOMER_INDEX)?;
            let previous: Option<CustomerProfile> = read_json(&table, &profile.user_id)?;
            write_profile(&mut table, &mut index, previous.as_ref(), profile)
        })
    }

    /// Atomically read-modify-write a profile, creating it from `seed` when
    /// absent. Returns the stored value.
    pub fn update_profile(
        &self,
        user_id: &str,
        seed: impl FnOnce() -> CustomerProfile,
        apply: impl FnOnce(&mut CustomerProfile),
    ) -> LedgerResult<CustomerProfile> {
        self.write(|txn| {
            let mut table = txn.open_table(PROFILES)?;
            let mut index = txn.open_table(CUSTOMER_INDEX)?;
            let previous: Option<CustomerProfile> = read_json(&table, user_id)?;
            let mut profile = previous.clone().unwrap_or_else(seed);
            apply(&mut profile);
            profile.updated_at = Utc::now();
            write_profile(&mut table, &mut index, previous.as_ref(), &profile)?;
            Ok(profile)
        })
    }

    /// Bind a Provider customer id to a user unless one is already bound.
    ///
    /// First writer wins: returns the id that ends up stored, which is the
    /// competitor's when another caller got there first.
    pub fn claim_customer_id(&self, user_id: &str, customer_id: &str) -> LedgerResult<String> {
        self.write(|txn| {
            let mut table = txn.open_table(PROFILES)?;
            let mut index = txn.open_table(CUSTOMER_INDEX)?;
            let previous: CustomerProfile = read_json(&table, user_id)?
                .ok_or_else(|| LedgerDbError::NotFound(format!("profile {user_id}")))?;

            if let Some(existing) = previous.customer_id.clone() {
                return Ok(existing);
            }
            let mut profile = previous.clone();
            profile.customer_id = Some(customer_id.to_string());
            profile.updated_at = Utc::now();
            write_profile(&mut table, &mut index, Some(&previous), &profile)?;
            Ok(customer_id.to_string())
        })
    }

    /// Drop a cached customer id the Provider no longer knows.
    ///
    /// Only clears when the stored id still equals `stale`, so a fresh id
    /// written concurrently is kept.
    pub fn clear_customer_id(&self, user_id: &str, stale: &str) -> LedgerResult<bool> {
        self.write(|txn| {
            let mut table = txn.open_table(PROFILES)?;
            let mut index = txn.open_table(CUSTOMER_INDEX)?;
            let Some(previous) = read_json::<CustomerProfile>(&table, user_id)? else {
                return Ok(false);
            };
            if previous.customer_id.as_deref() != Some(stale) {
                return Ok(false);
            }
            let mut profile = previous.clone();
            profile.customer_id = None;
            profile.kyc_status = None;
            profile.endorsements.clear();
            profile.updated_at = Utc::now();
            write_profile(&mut table, &mut index, Some(&previous), &profile)?;
            Ok(true)
        })
    }

    /// Resolve the user owning a Provider customer id.
    pub fn find_user_by_customer(&self, customer_id: &str) -> LedgerResult<Option<String>> {
        self.read(|txn| {
            let index = txn.open_table(CUSTOMER_INDEX)?;
            read_index(&index, customer_id)
        })
    }
}

fn write_profile(
    table: &mut redb::Table<'_, &'static str, &'static [u8]>,
    index: &mut redb::Table<'_, &'static str, &'static str>,
    previous: Option<&CustomerProfile>,
    profile: &CustomerProfile,
) -> LedgerResult<()> {
    let json = serde_json::to_vec(profile)?;
    table.insert(profile.user_id.as_str(), json.as_slice())?;

    let old_id = previous.and_then(|p| p.customer_id.as_deref());
    let new_id = profile.customer_id.as_deref();
    if old_id != new_id {
        if let Some(old_id) = old_id {
            index.remove(old_id)?;
        }
    }
    if let Some(new_id) = new_id {
        index.insert(new_id, profile.user_id.as_str())?;
    }
    Ok(())
}

// =============================================================================
// Wallets & virtual accounts
// =============================================================================

impl LedgerDatabase {
    pub fn get_wallet(&self, user_id: &str, chain: &str) -> LedgerResult<Option<WalletRecord>> {
        let key = wallet_key(user_id, chain);
        self.read(|txn| {
            let table = txn.open_table(WALLETS)?;
            read_json(&table, &key)
        })
    }

    /// Persist a wallet (id and address together). Conflict if one exists.
    pub fn insert_wallet(&self, wallet: &WalletRecord) -> LedgerResult<()> {
        let key = wallet_key(&wallet.user_id, &wallet.chain);
        let json = serde_json::to_vec(wallet)?;
        self.write(|txn| {
            let mut table = txn.open_table(WALLETS)?;
            if table.get(key.as_str())?.is_some() {
                return Err(LedgerDbError::Conflict(format!("wallet {key}")));
            }
            table.insert(key.as_str(), json.as_slice())?;
            Ok(())
        })
    }

    pub fn get_virtual_account(
        &self,
        user_id: &str,
        currency: Currency,
    ) -> LedgerResult<Option<VirtualAccountRecord>> {
        let key = account_key(user_id, currency);
        self.read(|txn| {
            let table = txn.open_table(VIRTUAL_ACCOUNTS)?;
            read_json(&table, &key)
        })
    }

    /// Persist a virtual account. Conflict if the user already has one in
    /// that currency.
    pub fn insert_virtual_account(&self, account: &VirtualAccountRecord) -> LedgerResult<()> {
        let key = account_key(&account.user_id, account.currency);
        let json = serde_json::to_vec(account)?;
        self.write(|txn| {
            let mut table = txn.open_table(VIRTUAL_ACCOUNTS)?;
            if table.get(key.as_str())?.is_some() {
                return Err(LedgerDbError::Conflict(format!("virtual account {key}")));
            }
            table.insert(key.as_str(), json.as_slice())?;
            Ok(())
        })
    }

    pub fn list_virtual_accounts(&self, user_id: &str) -> LedgerResult<Vec<VirtualAccountRecord>> {
        let (start, end) = owner_range(user_id);
        self.read(|txn| {
            let table = txn.open_table(VIRTUAL_ACCOUNTS)?;
            let mut out = Vec::new();
            for entry in table.range(start.as_str()..end.as_str())? {
                let (_, value) = entry?;
                out.push(serde_json::from_slice(value.value())?);
            }
            Ok(out)
        })
    }

    // -------------------------------------------------------------------------
    // Compliance submissions
    // -------------------------------------------------------------------------

    pub fn put_submissions(
        &self,
        user_id: &str,
        submissions: &[ComplianceSubmission],
    ) -> LedgerResult<()> {
        let json = serde_json::to_vec(submissions)?;
        self.write(|txn| {
            let mut table = txn.open_table(COMPLIANCE_SUBMISSIONS)?;
            table.insert(user_id, json.as_slice())?;
            Ok(())
        })
    }

    pub fn get_submissions(&self, user_id: &str) -> LedgerResult<Vec<ComplianceSubmission>> {
        self.read(|txn| {
            let table = txn.open_table(COMPLIANCE_SUBMISSIONS)?;
            Ok(read_json(&table, user_id)?.unwrap_or_default())
        })
    }
}
