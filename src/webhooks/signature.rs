// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Webhook signature verification.
//!
//! The Provider sends `x-webhook-signature: t=<unix-ms>,v0=<base64>` where the
//! signature is RSA PKCS#1 v1.5 / SHA-256 over `"<t>.<raw body>"`. Keys are
//! distributed either as SPKI (`PUBLIC KEY`) or PKCS#1 (`RSA PUBLIC KEY`),
//! PEM-armoured or bare base64, and some senders sign the SHA-256 digest of
//! the message rather than the message itself. Every combination is tried
//! before a signature is rejected.

use std::time::Duration;

use base64ct::{Base64, Encoding};
use ring::signature::{UnparsedPublicKey, RSA_PKCS1_2048_8192_SHA256};
use sha2::{Digest, Sha256};

/// Primary signature header.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
/// Header name used by older Provider deliveries.
pub const LEGACY_SIGNATURE_HEADER: &str = "x-signature";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header is missing the timestamp")]
    MissingTimestamp,

    #[error("signature header is missing the v0 signature")]
    MissingSignature,

    #[error("signature header timestamp is not a number")]
    InvalidTimestamp,

    #[error("signature is not valid base64")]
    InvalidEncoding,

    #[error("signature is {age_ms}ms old, outside the replay window")]
    Stale { age_ms: i64 },

    #[error("signature does not match payload")]
    Mismatch,

    #[error("webhook public key is invalid: {0}")]
    InvalidKey(String),
}

/// Parsed `t=...,v0=...` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp_ms: i64,
    pub signature: Vec<u8>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self, SignatureError> {
        let mut timestamp = None;
        let mut signature = None;
        for part in header.split(',') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            match key.trim() {
                "t" => timestamp = Some(value.trim()),
                "v0" => signature = Some(value.trim()),
                _ => {}
            }
        }

        let timestamp_ms = timestamp
            .filter(|t| !t.is_empty())
            .ok_or(SignatureError::MissingTimestamp)?
            .parse::<i64>()
            .ok()
            .filter(|t| *t > 0)
            .ok_or(SignatureError::InvalidTimestamp)?;
        let signature = signature
            .filter(|s| !s.is_empty())
            .ok_or(SignatureError::MissingSignature)?;
        let signature =
            Base64::decode_vec(signature).map_err(|_| SignatureError::InvalidEncoding)?;

        Ok(Self {
            timestamp_ms,
            signature,
        })
    }
}

/// Verifies webhook authenticity and freshness against a configured key.
#[derive(Clone)]
pub struct SignatureVerifier {
    /// Candidate PKCS#1 `RSAPublicKey` DER encodings of the configured key.
    candidates: Vec<Vec<u8>>,
    max_age: Duration,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("candidates", &self.candidates.len())
            .field("max_age", &self.max_age)
            .finish()
    }
}

impl SignatureVerifier {
    /// Build a verifier from PEM or bare-base64 key material.
    ///
    /// Literal `\n` sequences (as found in env files) are accepted.
    pub fn from_key_material(raw: &str, max_age: Duration) -> Result<Self, SignatureError> {
        let normalized = raw.trim().replace("\\n", "\n");
        let der = if normalized.contains("-----BEGIN") {
            pem::parse(normalized.as_bytes())
                .map_err(|e| SignatureError::InvalidKey(e.to_string()))?
                .into_contents()
        } else {
            let compact: String = normalized.split_whitespace().collect();
            Base64::decode_vec(&compact)
                .map_err(|_| SignatureError::InvalidKey("key is neither PEM nor base64".into()))?
        };

        let mut candidates = Vec::with_capacity(2);
        if let Some(inner) = spki_to_pkcs1(&der) {
            candidates.push(inner.to_vec());
        }
        candidates.push(der);

        Ok(Self {
            candidates,
            max_age,
        })
    }

    /// Fail-closed predicate over the raw body and signature header.
    pub fn verify(&self, raw_payload: &[u8], signature_header: &str) -> bool {
        self.check(raw_payload, signature_header, now_ms()).is_ok()
    }

    /// Like [`verify`](Self::verify) but reporting why a signature failed,
    /// evaluated at `now_ms`.
    pub fn check(
        &self,
        raw_payload: &[u8],
        signature_header: &str,
        now_ms: i64,
    ) -> Result<(), SignatureError> {
        let header = SignatureHeader::parse(signature_header)?;

        let age_ms = now_ms
            .checked_sub(header.timestamp_ms)
            .ok_or(SignatureError::InvalidTimestamp)?;
        if age_ms > self.max_age.as_millis() as i64 {
            return Err(SignatureError::Stale { age_ms });
        }

        let mut message = Vec::with_capacity(raw_payload.len() + 16);
        message.extend_from_slice(header.timestamp_ms.to_string().as_bytes());
        message.push(b'.');
        message.extend_from_slice(raw_payload);
        let digest = Sha256::digest(&message);

        for key in &self.candidates {
            let key = UnparsedPublicKey::new(&RSA_PKCS1_2048_8192_SHA256, key);
            if key.verify(&message, &header.signature).is_ok()
                || key.verify(digest.as_slice(), &header.signature).is_ok()
            {
                return Ok(());
            }
        }
        Err(SignatureError::Mismatch)
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Extract the `RSAPublicKey` from a `SubjectPublicKeyInfo` DER blob.
///
/// Returns `None` when the input is not SPKI-shaped (for instance when it
/// already is a bare PKCS#1 key).
fn spki_to_pkcs1(der: &[u8]) -> Option<&[u8]> {
    let (tag, spki, _) = read_tlv(der)?;
    if tag != 0x30 {
        return None;
    }
    let (tag, _algorithm, rest) = read_tlv(spki)?;
    if tag != 0x30 {
        return None;
    }
    let (tag, bit_string, _) = read_tlv(rest)?;
    if tag != 0x03 {
        return None;
    }
    match bit_string.split_first() {
        Some((0, key)) => Some(key),
        _ => None,
    }
}

/// Read one DER TLV, returning `(tag, contents, remainder)`.
fn read_tlv(input: &[u8]) -> Option<(u8, &[u8], &[u8])> {
    let (&tag, rest) = input.split_first()?;
    let (&first, rest) = rest.split_first()?;
    let (len, rest) = if first < 0x80 {
        (first as usize, rest)
    } else {
        let count = (first & 0x7f) as usize;
        if count == 0 || count > 4 || rest.len() < count {
            return None;
        }
        let len = rest[..count]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize);
        (len, &rest[count..])
    };
    if rest.len() < len {
        return None;
    }
    Some((tag, &rest[..len], &rest[len..]))
}
