// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Provider-facing customer payloads built from compliance submissions.

use serde_json::{json, Map, Value};

use crate::providers::{ComplianceSubmission, SubmissionKind, SubmissionStatus};

/// Identity and address submissions, both approved.
#[derive(Debug, Clone, Copy)]
pub struct ApprovedSubmissions<'a> {
    pub identity: &'a ComplianceSubmission,
    pub address: &'a ComplianceSubmission,
}

impl<'a> ApprovedSubmissions<'a> {
    /// Pick the approved identity and address submissions.
    ///
    /// On failure returns one message per missing or unapproved kind.
    pub fn select(submissions: &'a [ComplianceSubmission]) -> Result<Self, Vec<String>> {
        let identity = pick(submissions, SubmissionKind::Identity, "identity");
        let address = pick(submissions, SubmissionKind::Address, "address");
        match (identity, address) {
            (Ok(identity), Ok(address)) => Ok(Self { identity, address }),
            (identity, address) => Err([identity.err(), address.err()]
                .into_iter()
                .flatten()
                .collect()),
        }
    }
}

fn pick<'a>(
    submissions: &'a [ComplianceSubmission],
    kind: SubmissionKind,
    label: &str,
) -> Result<&'a ComplianceSubmission, String> {
    if let Some(approved) = submissions
        .iter()
        .find(|s| s.kind == kind && s.is_approved())
    {
        return Ok(approved);
    }
    match submissions.iter().find(|s| s.kind == kind) {
        Some(s) => Err(format!(
            "{label} submission is {}",
            match s.status {
                SubmissionStatus::Pending => "pending review",
                SubmissionStatus::Rejected => "rejected",
                _ => "not approved",
            }
        )),
        None => Err(format!("{label} submission is missing")),
    }
}

/// Build the create-customer payload.
pub fn build_customer_payload(
    email: &str,
    signed_agreement_id: &str,
    submissions: &ApprovedSubmissions<'_>,
) -> Value {
    let identity = submissions.identity;
    let mut payload = Map::new();
    payload.insert("type".to_string(), json!("individual"));
    payload.insert("email".to_string(), json!(email));
    payload.insert("signed_agreement_id".to_string(), json!(signed_agreement_id));
    for (target, source) in [
        ("first_name", "first_name"),
        ("last_name", "last_name"),
        ("birth_date", "birth_date"),
        ("phone", "phone"),
    ] {
        if let Some(value) = identity.field(source) {
            payload.insert(target.to_string(), json!(value));
        }
    }
    payload.insert(
        "residential_address".to_string(),
        residential_address(submissions.address),
    );
    if let Some(info) = identifying_information(identity) {
        payload.insert("identifying_information".to_string(), json!([info]));
    }
    Value::Object(payload)
}

/// Patch for the requirements the Provider reports missing, restricted to
/// what the submissions can supply. `None` when nothing can be filled in.
pub fn missing_fields_patch(
    missing: &[String],
    submissions: &[ComplianceSubmission],
) -> Option<Value> {
    let identity = submissions
        .iter()
        .find(|s| s.kind == SubmissionKind::Identity && s.is_approved());
    let address = submissions
        .iter()
        .find(|s| s.kind == SubmissionKind::Address && s.is_approved());

    let mut patch = Map::new();
    for requirement in missing {
        match requirement.as_str() {
            "address_of_residence" | "proof_of_address" => {
                if let Some(address) = address {
                    patch.insert(
                        "residential_address".to_string(),
                        residential_address(address),
                    );
                }
            }
            "tax_identification_number" | "government_id" => {
                if let Some(info) = identity.and_then(identifying_information) {
                    patch.insert("identifying_information".to_string(), json!([info]));
                }
            }
            "date_of_birth" | "birth_date" => {
                if let Some(v) = identity.and_then(|s| s.field("birth_date")) {
                    patch.insert("birth_date".to_string(), json!(v));
                }
            }
            "phone" | "phone_number" => {
                if let Some(v) = identity.and_then(|s| s.field("phone")) {
                    patch.insert("phone".to_string(), json!(v));
                }
            }
            "first_name" | "last_name" => {
                if let Some(v) = identity.and_then(|s| s.field(requirement)) {
                    patch.insert(requirement.clone(), json!(v));
                }
            }
            _ => {}
        }
    }
    (!patch.is_empty()).then_some(Value::Object(patch))
}

fn residential_address(address: &ComplianceSubmission) -> Value {
    let mut out = Map::new();
    for key in [
        "street_line_1",
        "street_line_2",
        "city",
        "subdivision",
        "postal_code",
        "country",
    ] {
        if let Some(value) = address.field(key) {
            out.insert(key.to_string(), json!(value));
        }
    }
    Value::Object(out)
}

fn identifying_information(identity: &ComplianceSubmission) -> Option<Value> {
    let number = identity.field("id_number")?;
    Some(json!({
        "type": identity.field("id_type").unwrap_or("ssn"),
        "issuing_country": identity.field("country").unwrap_or("usa"),
        "number": number,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{approved_submissions, submission};

    #[test]
    fn payload_combines_identity_and_address() {
        let submissions = approved_submissions();
        let selected = ApprovedSubmissions::select(&submissions).unwrap();
        let payload = build_customer_payload("a@example.com", "sa_1", &selected);

        assert_eq!(payload["type"], "individual");
        assert_eq!(payload["first_name"], "Ada");
        assert_eq!(payload["signed_agreement_id"], "sa_1");
        assert_eq!(payload["residential_address"]["city"], "Lisbon");
        assert_eq!(payload["identifying_information"][0]["number"], "123-45-6789");
    }

    #[test]
    fn select_names_every_missing_or_unapproved_kind() {
        let only_pending = vec![submission("identity", "pending")];
        let errors = ApprovedSubmissions::select(&only_pending).unwrap_err();
        assert_eq!(
            errors,
            vec![
                "identity submission is pending review".to_string(),
                "address submission is missing".to_string(),
            ]
        );
    }

    #[test]
    fn approved_submission_wins_over_older_rejected_one() {
        let mut submissions = vec![submission("identity", "rejected")];
        submissions.extend(approved_submissions());
        assert!(ApprovedSubmissions::select(&submissions).is_ok());
    }

    #[test]
    fn patch_only_carries_fields_we_can_supply() {
        let submissions = approved_submissions();
        let patch = missing_fields_patch(
            &["proof_of_address".to_string(), "source_of_funds".to_string()],
            &submissions,
        )
        .unwrap();
        assert_eq!(patch["residential_address"]["country"], "PRT");
        assert!(patch.get("source_of_funds").is_none());

        assert!(missing_fields_patch(&["source_of_funds".to_string()], &submissions).is_none());
    }
}
