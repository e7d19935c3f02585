// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Survey marketplace provider records.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::database::{
    all_docs, get_doc, index_get, put_doc, PartnerDatabase, StorageError, StorageResult,
    PROVIDERS, PROVIDER_BY_SLUG,
};
use crate::storage::ports::ProviderStore;

/// Default minimum CPI (cents) a survey must pay to be offered.
pub const DEFAULT_MIN_CPI_CENTS: i64 = 200;
/// Default share of the CPI passed on to the user.
pub const DEFAULT_USER_PAYOUT_PCT: u32 = 50;
/// Default eligibility cache lifetime.
pub const DEFAULT_ELIGIBILITY_TTL_SECS: i64 = 60;

/// Persisted provider configuration.
///
/// `signing_private_key_encrypted` and `api_credential_encrypted` hold vault
/// blobs only. They are never returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub api_base_url: Option<String>,
    pub api_credential_encrypted: Option<String>,
    pub supplier_id: Option<String>,
    /// Base URL of the partner's entry/prescreener host.
    pub prescreener_url: Option<String>,
    pub signing_private_key_encrypted: Option<String>,
    /// Base64 Ed25519 public key matching the stored private key.
    pub signing_public_key: Option<String>,
    pub min_cpi_cents: i64,
    /// Percentage (0-100) of the CPI credited to the user.
    pub user_payout_pct: u32,
    pub eligibility_cache_ttl_secs: i64,
    /// Callback URL per outcome (`default`, `complete`, ...).
    #[serde(default)]
    pub redirect_urls: BTreeMap<String, String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Provider {
    /// Construct a new active provider with default thresholds.
    pub fn new(name: String, slug: String) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            slug,
            api_base_url: None,
            api_credential_encrypted: None,
            supplier_id: None,
            prescreener_url: None,
            signing_private_key_encrypted: None,
            signing_public_key: None,
            min_cpi_cents: DEFAULT_MIN_CPI_CENTS,
            user_payout_pct: DEFAULT_USER_PAYOUT_PCT,
            eligibility_cache_ttl_secs: DEFAULT_ELIGIBILITY_TTL_SECS,
            redirect_urls: BTreeMap::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Entry host for signed URLs, falling back to the API host.
    pub fn entry_base_url(&self) -> Option<&str> {
        self.prescreener_url
            .as_deref()
            .or(self.api_base_url.as_deref())
            .filter(|url| !url.trim().is_empty())
    }
}

/// Provider view safe to return over the API.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProviderResponse {
    pub id: String,
    pub name: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supplier_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prescreener_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_public_key: Option<String>,
    pub has_api_credential: bool,
    pub has_signing_key: bool,
    pub min_cpi_cents: i64,
    pub user_payout_pct: u32,
    pub eligibility_cache_ttl_secs: i64,
    pub redirect_urls: BTreeMap<String, String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Provider> for ProviderResponse {
    fn from(p: &Provider) -> Self {
        Self {
            id: p.id.clone(),
            name: p.name.clone(),
            slug: p.slug.clone(),
            api_base_url: p.api_base_url.clone(),
            supplier_id: p.supplier_id.clone(),
            prescreener_url: p.prescreener_url.clone(),
            signing_public_key: p.signing_public_key.clone(),
            has_api_credential: p.api_credential_encrypted.is_some(),
            has_signing_key: p.signing_private_key_encrypted.is_some(),
            min_cpi_cents: p.min_cpi_cents,
            user_payout_pct: p.user_payout_pct,
            eligibility_cache_ttl_secs: p.eligibility_cache_ttl_secs,
            redirect_urls: p.redirect_urls.clone(),
            is_active: p.is_active,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

/// redb-backed provider repository.
#[derive(Clone)]
pub struct ProviderRepository {
    db: Arc<PartnerDatabase>,
}

impl ProviderRepository {
    pub fn new(db: Arc<PartnerDatabase>) -> Self {
        Self { db }
    }
}

impl ProviderStore for ProviderRepository {
    fn list(&self) -> StorageResult<Vec<Provider>> {
        let txn = self.db.read()?;
        let table = txn.open_table(PROVIDERS)?;
        let mut providers: Vec<Provider> = all_docs(&table)?;
        providers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(providers)
    }

    fn list_active(&self) -> StorageResult<Vec<Provider>> {
        Ok(self.list()?.into_iter().filter(|p| p.is_active).collect())
    }

    fn get(&self, provider_id: &str) -> StorageResult<Option<Provider>> {
        let txn = self.db.read()?;
        let table = txn.open_table(PROVIDERS)?;
        get_doc(&table, provider_id)
    }

    fn find_by_slug(&self, slug: &str) -> StorageResult<Option<Provider>> {
        let txn = self.db.read()?;
        let index = txn.open_table(PROVIDER_BY_SLUG)?;
        let Some(provider_id) = index_get(&index, slug)? else {
            return Ok(None);
        };
        let table = txn.open_table(PROVIDERS)?;
        get_doc(&table, &provider_id)
    }

    fn create(&self, provider: &Provider) -> StorageResult<()> {
        let txn = self.db.write()?;
        {
            let mut index = txn.open_table(PROVIDER_BY_SLUG)?;
            if index_get(&index, &provider.slug)?.is_some() {
                return Err(StorageError::AlreadyExists(format!(
                    "Provider slug {}",
                    provider.slug
                )));
            }
            let mut table = txn.open_table(PROVIDERS)?;
            if get_doc::<Provider>(&table, &provider.id)?.is_some() {
                return Err(StorageError::AlreadyExists(format!("Provider {}", provider.id)));
            }
            put_doc(&mut table, &provider.id, provider)?;
            index.insert(provider.slug.as_str(), provider.id.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn update(&self, provider: &Provider) -> StorageResult<()> {
        let txn = self.db.write()?;
        {
            let mut table = txn.open_table(PROVIDERS)?;
            let existing: Provider = get_doc(&table, &provider.id)?
                .ok_or_else(|| StorageError::NotFound(format!("Provider {}", provider.id)))?;

            let mut index = txn.open_table(PROVIDER_BY_SLUG)?;
            if existing.slug != provider.slug {
                if let Some(owner) = index_get(&index, &provider.slug)? {
                    if owner != provider.id {
                        return Err(StorageError::AlreadyExists(format!(
                            "Provider slug {}",
                            provider.slug
                        )));
                    }
                }
                index.remove(existing.slug.as_str())?;
                index.insert(provider.slug.as_str(), provider.id.as_str())?;
            }

            let mut updated = provider.clone();
            updated.created_at = existing.created_at;
            updated.updated_at = Utc::now();
            put_doc(&mut table, &provider.id, &updated)?;
        }
        txn.commit()?;
        Ok(())
    }
}
