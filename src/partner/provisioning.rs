// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Administrative provider provisioning.
//!
//! - Rotate our entry-URL signing key (private key sealed by the vault,
//!   public key stored in the same update)
//! - Register our public key with the partner
//! - Configure the partner's per-outcome callback URLs

use std::collections::BTreeMap;
use std::sync::Arc;

use secrecy::ExposeSecret;
use tracing::info;

use super::client::{PartnerConnector, PartnerError};
use crate::crypto::{generate_key_pair, CredentialVault, VaultError};
use crate::storage::{Provider, ProviderStore, StorageError};

/// Outcomes the partner accepts a callback URL for.
pub const REDIRECT_OUTCOMES: &[&str] = &[
    "default",
    "complete",
    "screenout",
    "over_quota",
    "quality_term",
    "timeout",
];

#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error("provider {0} not found")]
    ProviderNotFound(String),

    #[error("provider {0} has no public key yet")]
    NoPublicKey(String),

    #[error("unknown redirect outcome: {0}")]
    UnknownOutcome(String),

    #[error("redirect URL for {0} is empty")]
    EmptyRedirectUrl(String),

    #[error(transparent)]
    Partner(#[from] PartnerError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Provisioning actions over stored providers.
#[derive(Clone)]
pub struct ProviderProvisioning {
    providers: Arc<dyn ProviderStore>,
    vault: Arc<CredentialVault>,
    connector: Arc<dyn PartnerConnector>,
}

impl ProviderProvisioning {
    pub fn new(
        providers: Arc<dyn ProviderStore>,
        vault: Arc<CredentialVault>,
        connector: Arc<dyn PartnerConnector>,
    ) -> Self {
        Self {
            providers,
            vault,
            connector,
        }
    }

    fn load(&self, provider_id: &str) -> Result<Provider, ProvisioningError> {
        self.providers
            .get(provider_id)?
            .ok_or_else(|| ProvisioningError::ProviderNotFound(provider_id.to_string()))
    }

    /// Generate and store a fresh signing key pair. Returns the public key.
    pub fn rotate_signing_key(&self, provider_id: &str) -> Result<String, ProvisioningError> {
        let mut provider = self.load(provider_id)?;

        let pair = generate_key_pair();
        provider.signing_private_key_encrypted =
            Some(self.vault.encrypt(pair.private_key.expose_secret())?);
        provider.signing_public_key = Some(pair.public_key.clone());
        self.providers.update(&provider)?;

        info!(provider_id = %provider.id, "Rotated provider signing key");
        Ok(pair.public_key)
    }

    /// Register the stored public key with the partner.
    pub async fn register_public_key(&self, provider_id: &str) -> Result<(), ProvisioningError> {
        let provider = self.load(provider_id)?;
        let public_key = provider
            .signing_public_key
            .clone()
            .ok_or_else(|| ProvisioningError::NoPublicKey(provider.id.clone()))?;

        let api = self.connector.connect(&provider)?;
        api.register_public_key(&public_key).await?;

        info!(provider_id = %provider.id, "Registered public key with partner");
        Ok(())
    }

    /// Push callback URLs to the partner and persist them on the provider.
    ///
    /// Only the supplied outcomes are configured. Nothing is persisted when
    /// any partner call fails.
    pub async fn configure_redirects(
        &self,
        provider_id: &str,
        redirects: BTreeMap<String, String>,
    ) -> Result<Provider, ProvisioningError> {
        for (outcome, url) in &redirects {
            if !REDIRECT_OUTCOMES.contains(&outcome.as_str()) {
                return Err(ProvisioningError::UnknownOutcome(outcome.clone()));
            }
            if url.trim().is_empty() {
                return Err(ProvisioningError::EmptyRedirectUrl(outcome.clone()));
            }
        }

        let mut provider = self.load(provider_id)?;
        let api = self.connector.connect(&provider)?;

        // Partner applies `default` first, then the specific outcomes
        let ordered = REDIRECT_OUTCOMES
            .iter()
            .filter_map(|outcome| redirects.get(*outcome).map(|url| (*outcome, url)));
        for (outcome, url) in ordered {
            api.set_redirect_url(outcome, url.trim()).await?;
        }

        provider
            .redirect_urls
            .extend(redirects.into_iter().map(|(k, v)| (k, v.trim().to_string())));
        self.providers.update(&provider)?;

        info!(
            provider_id = %provider.id,
            outcomes = provider.redirect_urls.len(),
            "Configured partner redirect URLs"
        );
        Ok(provider)
    }
}
