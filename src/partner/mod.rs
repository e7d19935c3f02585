// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Partner survey marketplace integration.

pub mod client;
#[cfg(test)]
pub mod fake;
pub mod key_cache;
pub mod provisioning;
pub mod types;
pub mod url_signing;

pub use client::{
    fetch_all_bids, HttpPartnerConnector, PartnerApi, PartnerConnector, PartnerError,
};
pub use key_cache::PartnerKeyCache;
pub use provisioning::{ProviderProvisioning, ProvisioningError, REDIRECT_OUTCOMES};
pub use types::{BidQuery, EligibleBid, GenderCode, UserQualifications};
pub use url_signing::{build_signed_entry_url, verify_redirect_signature, EntryUrlParams, RedirectParams};
