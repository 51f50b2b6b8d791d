// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Domain types shared by the webhook pipeline, the provisioning
//! orchestrator and the Provider client.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Currency of a receiving account.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    /// US dollar, settled over ACH/wire.
    Usd,
    /// Euro, settled over SEPA.
    Eur,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Usd => "usd",
            Currency::Eur => "eur",
        }
    }

    /// Endorsement that must be approved before an account in this
    /// currency can be created.
    pub fn required_endorsement(&self) -> &'static str {
        match self {
            Currency::Usd => BASE_ENDORSEMENT,
            Currency::Eur => SEPA_ENDORSEMENT,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "usd" => Ok(Currency::Usd),
            "eur" => Ok(Currency::Eur),
            other => Err(format!("unsupported currency `{other}`")),
        }
    }
}

/// Endorsement gating the USD rails.
pub const BASE_ENDORSEMENT: &str = "base";
/// Endorsement gating the EUR (SEPA) rail.
pub const SEPA_ENDORSEMENT: &str = "sepa";

/// Direction of a ledger transaction from the user's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Send,
    Receive,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Send => "send",
            Direction::Receive => "receive",
        }
    }
}

/// Approval state of an endorsement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EndorsementStatus {
    Incomplete,
    Pending,
    Approved,
    Rejected,
}

impl EndorsementStatus {
    pub fn from_provider(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "approved" => EndorsementStatus::Approved,
            "pending" | "under_review" | "in_review" => EndorsementStatus::Pending,
            "rejected" | "revoked" => EndorsementStatus::Rejected,
            _ => EndorsementStatus::Incomplete,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EndorsementStatus::Incomplete => "incomplete",
            EndorsementStatus::Pending => "pending",
            EndorsementStatus::Approved => "approved",
            EndorsementStatus::Rejected => "rejected",
        }
    }
}

/// A named capability grant on a Customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Endorsement {
    /// Capability name (`base`, `sepa`, ...).
    pub name: String,
    /// Current approval state.
    pub status: EndorsementStatus,
    /// Requirements the Provider still reports as missing.
    #[serde(default)]
    pub missing_requirements: Vec<String>,
}

impl Endorsement {
    /// Parse a Provider endorsement object.
    ///
    /// `requirements.missing` is either a flat list of names or a nested
    /// `all_of`/`any_of` tree; every string leaf is collected.
    pub fn from_value(value: &Value) -> Option<Self> {
        let name = value.get("name").and_then(Value::as_str)?.to_string();
        let status = value
            .get("status")
            .and_then(Value::as_str)
            .map(EndorsementStatus::from_provider)
            .unwrap_or(EndorsementStatus::Incomplete);

        let mut missing_requirements = Vec::new();
        if let Some(missing) = value.pointer("/requirements/missing") {
            collect_string_leaves(missing, &mut missing_requirements);
        }
        missing_requirements.sort();
        missing_requirements.dedup();

        Some(Self {
            name,
            status,
            missing_requirements,
        })
    }

    pub fn is_approved(&self) -> bool {
        self.status == EndorsementStatus::Approved
    }
}

fn collect_string_leaves(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|item| collect_string_leaves(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_string_leaves(item, out)),
        _ => {}
    }
}

/// Snapshot of a Customer as reported by the Provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CustomerSnapshot {
    /// Provider-assigned customer id.
    pub customer_id: String,
    /// KYC status string (`not_started`, `incomplete`, `active`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kyc_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_agreement_id: Option<String>,
    #[serde(default)]
    pub endorsements: Vec<Endorsement>,
}

impl CustomerSnapshot {
    /// Project a Provider customer object (API response or webhook
    /// `event_object`) into a snapshot.
    pub fn from_value(value: &Value) -> Option<Self> {
        let customer_id = value
            .get("id")
            .or_else(|| value.get("customer_id"))
            .and_then(Value::as_str)?
            .to_string();

        let kyc_status = value
            .get("status")
            .or_else(|| value.get("kyc_status"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let endorsements = value
            .get("endorsements")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Endorsement::from_value).collect())
            .unwrap_or_default();

        Some(Self {
            customer_id,
            kyc_status,
            email: value.get("email").and_then(Value::as_str).map(str::to_string),
            signed_agreement_id: value
                .get("signed_agreement_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            endorsements,
        })
    }

    pub fn endorsement(&self, name: &str) -> Option<&Endorsement> {
        self.endorsements.iter().find(|e| e.name == name)
    }

    pub fn endorsement_status(&self, name: &str) -> EndorsementStatus {
        self.endorsement(name)
            .map(|e| e.status)
            .unwrap_or(EndorsementStatus::Incomplete)
    }

    pub fn is_endorsed(&self, name: &str) -> bool {
        self.endorsement_status(name) == EndorsementStatus::Approved
    }

    /// True while the Provider has not started reviewing the customer.
    pub fn kyc_not_started(&self) -> bool {
        matches!(
            self.kyc_status.as_deref(),
            None | Some("not_started") | Some("incomplete")
        )
    }
}
