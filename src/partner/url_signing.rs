// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signed entry URLs and signed redirect callbacks.
//!
//! ## Outbound
//!
//! Entry parameters are serialized as a canonical query string: keys in
//! ascending byte order, values form-urlencoded, pairs joined by `&`. That
//! exact string is signed with our Ed25519 key and the signature is appended
//! last:
//!
//! ```text
//! <entry base>/v1/survey/entry?bid_id=..&panelist_id=..&qualifications=..
//!     &session_metadata=..&supplier_id=..&signature=<urlencoded base64>
//! ```
//!
//! ## Inbound
//!
//! The partner signs `interview_cost`, `session_metadata`, `status`,
//! `status_detail_id` and `status_id` (in that order, present keys only)
//! with raw values. Verification uses the partner's public key.

use std::collections::BTreeMap;

use secrecy::SecretString;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::crypto::{self, SigningError};

pub const ENTRY_PATH: &str = "/v1/survey/entry";

/// Parameters of a partner entry URL.
#[derive(Debug, Clone)]
pub struct EntryUrlParams {
    pub bid_id: String,
    pub panelist_id: String,
    pub supplier_id: String,
    /// Our session id, echoed back by the partner.
    pub session_metadata: String,
    /// `age,<n>,gender,<M|F|O>`
    pub qualifications: String,
}

impl EntryUrlParams {
    fn to_map(&self) -> BTreeMap<&'static str, &str> {
        BTreeMap::from([
            ("bid_id", self.bid_id.as_str()),
            ("panelist_id", self.panelist_id.as_str()),
            ("qualifications", self.qualifications.as_str()),
            ("session_metadata", self.session_metadata.as_str()),
            ("supplier_id", self.supplier_id.as_str()),
        ])
    }
}

/// Serialize parameters in ascending key order with encoded values.
pub fn canonical_query<K: AsRef<str> + Ord, V: AsRef<str>>(params: &BTreeMap<K, V>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k.as_ref()), encode(v.as_ref())))
        .collect::<Vec<_>>()
        .join("&")
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Build a signed entry URL on `entry_base_url`.
pub fn build_signed_entry_url(
    params: &EntryUrlParams,
    private_key: &SecretString,
    entry_base_url: &str,
) -> Result<String, SigningError> {
    let query = canonical_query(&params.to_map());
    let signature = crypto::sign(&query, private_key)?;

    Ok(format!(
        "{}{ENTRY_PATH}?{query}&signature={}",
        entry_base_url.trim().trim_end_matches('/'),
        encode(&signature)
    ))
}

/// Query parameters of the partner's redirect callback.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RedirectParams {
    /// Outcome: complete, screenout, over_quota, quality_term or timeout.
    pub status: String,
    /// Our session id.
    pub session: String,
    /// Payout in cents, signed as `interview_cost`.
    #[serde(default)]
    pub payout: Option<String>,
    #[serde(default)]
    pub status_id: Option<String>,
    #[serde(default)]
    pub status_detail_id: Option<String>,
    /// Base64 Ed25519 signature.
    #[serde(default)]
    pub signature: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Message the partner signed for this callback.
pub fn redirect_message(params: &RedirectParams) -> String {
    let mut parts = Vec::with_capacity(5);
    if let Some(payout) = present(&params.payout) {
        parts.push(format!("interview_cost={payout}"));
    }
    parts.push(format!("session_metadata={}", params.session));
    parts.push(format!("status={}", params.status));
    if let Some(detail) = present(&params.status_detail_id) {
        parts.push(format!("status_detail_id={detail}"));
    }
    if let Some(status_id) = present(&params.status_id) {
        parts.push(format!("status_id={status_id}"));
    }
    parts.join("&")
}

/// Verify a callback against the partner's base64 public key.
///
/// A missing signature verifies false.
pub fn verify_redirect_signature(params: &RedirectParams, partner_public_key: &str) -> bool {
    let Some(signature) = present(&params.signature) else {
        return false;
    };
    // Query decoding turns an unescaped '+' into a space
    let signature = signature.replace(' ', "+");
    crypto::verify(&redirect_message(params), &signature, partner_public_key)
}
