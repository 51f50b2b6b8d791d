// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Webhook envelopes and the typed events routed from them.
//!
//! Every rail-specific payload (virtual-account activity, liquidation drains,
//! transfers) is projected into one normalized [`Activity`] before it reaches
//! the ledger.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::models::{CustomerSnapshot, Direction};
use crate::storage::Receipt;

/// Activity subtypes that never move money.
const NON_MONETARY_SUBTYPES: [&str; 4] =
    ["microdeposit", "account_update", "activation", "deactivation"];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("webhook body is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("webhook body is missing `{0}`")]
    MissingField(&'static str),
}

/// SHA-256 hex digest of the canonical JSON encoding of an event object.
///
/// `serde_json::Value` objects keep their keys sorted, so two payloads with
/// the same content hash identically regardless of key order on the wire.
pub fn content_fingerprint(event_object: &Value) -> String {
    let encoded = serde_json::to_vec(event_object).unwrap_or_default();
    hex::encode(Sha256::digest(&encoded))
}

/// One verified inbound webhook. Never mutated after parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub event_id: Option<String>,
    pub event_type: String,
    pub event_category: Option<String>,
    pub event_object: Value,
    pub event_object_changes: Option<Value>,
    pub event_created_at: Option<String>,
    pub content_fingerprint: String,
}

impl WebhookEvent {
    /// Parse either the current envelope
    /// (`event_type`/`event_object`/`event_id`) or the legacy one
    /// (`type`/`data`/`id`).
    pub fn parse(raw: &[u8]) -> Result<Self, EnvelopeError> {
        let body: Value =
            serde_json::from_slice(raw).map_err(|e| EnvelopeError::InvalidJson(e.to_string()))?;
        let text = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);

        let (event_type, event_object, event_id) = if body.get("event_type").is_some() {
            (
                text("event_type").ok_or(EnvelopeError::MissingField("event_type"))?,
                body.get("event_object")
                    .filter(|v| !v.is_null())
                    .cloned()
                    .ok_or(EnvelopeError::MissingField("event_object"))?,
                text("event_id"),
            )
        } else if body.get("type").is_some() {
            (
                text("type").ok_or(EnvelopeError::MissingField("type"))?,
                body.get("data")
                    .filter(|v| !v.is_null())
                    .cloned()
                    .ok_or(EnvelopeError::MissingField("data"))?,
                text("id"),
            )
        } else {
            return Err(EnvelopeError::MissingField("event_type"));
        };

        Ok(Self {
            content_fingerprint: content_fingerprint(&event_object),
            event_id: event_id.filter(|id| !id.is_empty()),
            event_category: text("event_category"),
            event_object_changes: body.get("event_object_changes").cloned(),
            event_created_at: text("event_created_at"),
            event_type,
            event_object,
        })
    }

    /// Customer the event concerns, when the payload names one.
    pub fn customer_id(&self) -> Option<&str> {
        let object = &self.event_object;
        object
            .get("customer_id")
            .or_else(|| object.get("on_behalf_of"))
            .and_then(Value::as_str)
            .or_else(|| match self.kind() {
                EventKind::Customer => object.get("id").and_then(Value::as_str),
                _ => None,
            })
    }

    /// Classify by category, falling back to the `event_type` prefix.
    pub fn kind(&self) -> EventKind {
        let key = self
            .event_category
            .as_deref()
            .unwrap_or(self.event_type.as_str());
        if key.starts_with("virtual_account.activity") {
            EventKind::VirtualAccountActivity
        } else if key.starts_with("liquidation_address.drain") {
            EventKind::LiquidationDrain
        } else if key.starts_with("transfer") {
            EventKind::Transfer
        } else if key.starts_with("customer") {
            EventKind::Customer
        } else if key.starts_with("kyc_link") {
            EventKind::KycLink
        } else {
            EventKind::Unknown
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    VirtualAccountActivity,
    LiquidationDrain,
    Transfer,
    Customer,
    KycLink,
    Unknown,
}

/// Consent and KYC progress reported on a hosted KYC link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KycLinkUpdate {
    pub customer_id: Option<String>,
    pub kyc_status: Option<String>,
    pub tos_status: Option<String>,
    pub signed_agreement_id: Option<String>,
}

/// Typed view of a webhook.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    VirtualAccountActivity(Activity),
    LiquidationDrain(Activity),
    Transfer(Activity),
    CustomerUpdated(CustomerSnapshot),
    KycLinkUpdated(KycLinkUpdate),
    /// A known kind whose payload could not be projected.
    Malformed { reason: String },
    Unknown,
}

impl ProviderEvent {
    pub fn from_webhook(event: &WebhookEvent) -> Self {
        let object = &event.event_object;
        let projected = match event.kind() {
            EventKind::VirtualAccountActivity => {
                Activity::from_virtual_account_activity(object).map(Self::VirtualAccountActivity)
            }
            EventKind::LiquidationDrain => {
                Activity::from_liquidation_drain(object).map(Self::LiquidationDrain)
            }
            EventKind::Transfer => Activity::from_transfer(object).map(Self::Transfer),
            EventKind::Customer => CustomerSnapshot::from_value(object)
                .map(Self::CustomerUpdated)
                .ok_or_else(|| "customer payload has no id".to_string()),
            EventKind::KycLink => Ok(Self::KycLinkUpdated(KycLinkUpdate {
                customer_id: string_at(object, &["/customer_id"]),
                kyc_status: string_at(object, &["/kyc_status"]),
                tos_status: string_at(object, &["/tos_status"]),
                signed_agreement_id: string_at(object, &["/signed_agreement_id"]),
            })),
            EventKind::Unknown => Ok(Self::Unknown),
        };
        projected.unwrap_or_else(|reason| Self::Malformed { reason })
    }
}

/// Normalized deposit/transfer shape applied to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub activity_id: String,
    pub deposit_id: Option<String>,
    pub customer_id: Option<String>,
    pub direction: Direction,
    /// Provider subtype (`funds_received`, `microdeposit`, `transfer`, ...).
    pub subtype: String,
    pub amount: Decimal,
    pub currency: String,
    /// Raw Provider status.
    pub status: String,
    pub receipt: Receipt,
    pub raw: Value,
}

impl Activity {
    /// Virtual-account activity: the subtype doubles as the status.
    pub fn from_virtual_account_activity(object: &Value) -> Result<Self, String> {
        let subtype = string_at(object, &["/type"]).ok_or("activity has no type")?;
        Ok(Self {
            activity_id: string_at(object, &["/id"]).ok_or("activity has no id")?,
            deposit_id: string_at(object, &["/deposit_id"]),
            customer_id: string_at(object, &["/customer_id"]),
            direction: Direction::Receive,
            status: subtype.clone(),
            amount: amount_at(object, &["/amount"]).unwrap_or(Decimal::ZERO),
            currency: currency_at(object),
            receipt: receipt_from(object),
            raw: object.clone(),
            subtype,
        })
    }

    /// Crypto deposit drained from a liquidation address into the wallet.
    pub fn from_liquidation_drain(object: &Value) -> Result<Self, String> {
        Ok(Self {
            activity_id: string_at(object, &["/id"]).ok_or("drain has no id")?,
            deposit_id: string_at(object, &["/deposit_id", "/deposit_tx_hash"]),
            customer_id: string_at(object, &["/customer_id"]),
            direction: Direction::Receive,
            subtype: "liquidation_drain".to_string(),
            amount: amount_at(object, &["/amount"]).ok_or("drain has no amount")?,
            currency: currency_at(object),
            status: string_at(object, &["/state", "/status"]).unwrap_or_default(),
            receipt: receipt_from(object),
            raw: object.clone(),
        })
    }

    /// Outbound transfer initiated on behalf of the customer.
    pub fn from_transfer(object: &Value) -> Result<Self, String> {
        Ok(Self {
            activity_id: string_at(object, &["/id"]).ok_or("transfer has no id")?,
            deposit_id: None,
            customer_id: string_at(object, &["/on_behalf_of", "/customer_id"]),
            direction: Direction::Send,
            subtype: "transfer".to_string(),
            amount: amount_at(object, &["/amount", "/receipt/initial_amount"])
                .ok_or("transfer has no amount")?,
            currency: currency_at(object),
            status: string_at(object, &["/state", "/status"]).unwrap_or_default(),
            receipt: receipt_from(object),
            raw: object.clone(),
        })
    }

    /// Why this activity must not touch the ledger, if anything.
    pub fn filter_reason(&self) -> Option<&'static str> {
        if NON_MONETARY_SUBTYPES.contains(&self.subtype.as_str()) {
            return Some("non-monetary activity");
        }
        if self.amount <= Decimal::ZERO {
            return Some("non-positive amount");
        }
        None
    }
}

fn string_at(object: &Value, pointers: &[&str]) -> Option<String> {
    pointers.iter().find_map(|p| match object.pointer(p)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn amount_at(object: &Value, pointers: &[&str]) -> Option<Decimal> {
    string_at(object, pointers).and_then(|raw| Decimal::from_str(raw.trim()).ok())
}

fn currency_at(object: &Value) -> String {
    string_at(object, &["/currency", "/source/currency"])
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn receipt_from(object: &Value) -> Receipt {
    Receipt {
        final_amount: amount_at(object, &["/receipt/final_amount"]),
        destination_tx_hash: string_at(
            object,
            &["/receipt/destination_tx_hash", "/destination_tx_hash"],
        ),
        trace_number: string_at(
            object,
            &[
                "/source/trace_number",
                "/source/imad",
                "/source/sepa_reference",
                "/receipt/trace_number",
            ],
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_current_envelope() {
        let raw = json!({
            "event_id": "wh_1",
            "event_category": "virtual_account.activity",
            "event_type": "virtual_account.activity.created",
            "event_object": { "id": "act_1", "customer_id": "cust_1" },
            "event_created_at": "2026-01-01T00:00:00Z"
        });
        let event = WebhookEvent::parse(raw.to_string().as_bytes()).unwrap();
        assert_eq!(event.event_id.as_deref(), Some("wh_1"));
        assert_eq!(event.kind(), EventKind::VirtualAccountActivity);
        assert_eq!(event.customer_id(), Some("cust_1"));
        assert_eq!(event.content_fingerprint.len(), 64);
    }

    #[test]
    fn parses_legacy_envelope() {
        let raw = json!({ "id": "evt_9", "type": "customer.updated", "data": { "id": "cust_7" } });
        let event = WebhookEvent::parse(raw.to_string().as_bytes()).unwrap();
        assert_eq!(event.event_id.as_deref(), Some("evt_9"));
        assert_eq!(event.kind(), EventKind::Customer);
        assert_eq!(event.customer_id(), Some("cust_7"));
    }

    #[test]
    fn missing_fields_are_reported() {
        assert_eq!(
            WebhookEvent::parse(br#"{"event_type":"customer.updated"}"#).unwrap_err(),
            EnvelopeError::MissingField("event_object")
        );
        assert_eq!(
            WebhookEvent::parse(br#"{"hello":"world"}"#).unwrap_err(),
            EnvelopeError::MissingField("event_type")
        );
        assert!(matches!(
            WebhookEvent::parse(b"not json").unwrap_err(),
            EnvelopeError::InvalidJson(_)
        ));
    }

    #[test]
    fn fingerprint_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":{"c":2,"d":3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b":{"d":3,"c":2},"a":1}"#).unwrap();
        assert_eq!(content_fingerprint(&a), content_fingerprint(&b));
        assert_ne!(content_fingerprint(&a), content_fingerprint(&json!({"a": 2})));
    }

    #[test]
    fn virtual_account_activity_projects_receipt_fields() {
        let object = json!({
            "id": "act_1",
            "type": "payment_processed",
            "customer_id": "cust_1",
            "deposit_id": "dep_1",
            "amount": "100.00",
            "currency": "USD",
            "source": { "payment_rail": "ach_push", "trace_number": "021000021234567" },
            "receipt": { "final_amount": "99.50", "destination_tx_hash": "0xabc" }
        });
        let activity = Activity::from_virtual_account_activity(&object).unwrap();
        assert_eq!(activity.status, "payment_processed");
        assert_eq!(activity.currency, "usd");
        assert_eq!(activity.amount, Decimal::from_str("100.00").unwrap());
        assert_eq!(activity.receipt.final_amount, Some(Decimal::from_str("99.50").unwrap()));
        assert_eq!(activity.receipt.trace_number.as_deref(), Some("021000021234567"));
        assert!(activity.filter_reason().is_none());
    }

    #[test]
    fn non_monetary_and_non_positive_activities_are_filtered() {
        let micro = Activity::from_virtual_account_activity(&json!({
            "id": "act_2", "type": "microdeposit", "amount": "0.01", "currency": "usd"
        }))
        .unwrap();
        assert_eq!(micro.filter_reason(), Some("non-monetary activity"));

        let zero = Activity::from_virtual_account_activity(&json!({
            "id": "act_3", "type": "funds_received", "amount": "0", "currency": "usd"
        }))
        .unwrap();
        assert_eq!(zero.filter_reason(), Some("non-positive amount"));
    }

    #[test]
    fn transfer_is_outbound_and_keyed_by_on_behalf_of() {
        let event = WebhookEvent::parse(
            json!({
                "event_id": "wh_t",
                "event_type": "transfer.updated",
                "event_object": {
                    "id": "tr_1",
                    "state": "payment_processed",
                    "on_behalf_of": "cust_1",
                    "amount": 15,
                    "source": { "currency": "usdc" }
                }
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap();
        assert_eq!(event.customer_id(), Some("cust_1"));
        match ProviderEvent::from_webhook(&event) {
            ProviderEvent::Transfer(activity) => {
                assert_eq!(activity.direction, Direction::Send);
                assert_eq!(activity.currency, "usdc");
                assert_eq!(activity.amount, Decimal::from(15));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_and_malformed_events_are_distinguished() {
        let unknown = WebhookEvent::parse(
            br#"{"event_type":"static_memo.activity","event_object":{"id":"m1"}}"#,
        )
        .unwrap();
        assert_eq!(ProviderEvent::from_webhook(&unknown), ProviderEvent::Unknown);

        let malformed = WebhookEvent::parse(
            br#"{"event_type":"transfer.created","event_object":{"state":"awaiting_funds"}}"#,
        )
        .unwrap();
        assert!(matches!(
            ProviderEvent::from_webhook(&malformed),
            ProviderEvent::Malformed { .. }
        ));
    }
}
