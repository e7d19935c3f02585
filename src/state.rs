// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;
use std::time::Duration;

use crate::crypto::CredentialVault;
use crate::partner::{PartnerConnector, PartnerKeyCache, ProviderProvisioning};
use crate::storage::{
    PartnerDatabase, ProviderRepository, ProviderStore, SurveyRepository, SurveyStore,
    SyncRepository, SyncStore, UserRepository, UserStore,
};
use crate::surveys::{EligibilityCache, InventorySyncEngine, SessionOrchestrator};

/// Shared handles used by the HTTP handlers and the scheduler.
#[derive(Clone)]
pub struct AppState {
    pub providers: Arc<dyn ProviderStore>,
    pub surveys: Arc<dyn SurveyStore>,
    pub sync_jobs: Arc<dyn SyncStore>,
    pub users: Arc<dyn UserStore>,
    /// Seals provider credentials written through the admin API.
    pub vault: Arc<CredentialVault>,
    pub connector: Arc<dyn PartnerConnector>,
    pub provisioning: ProviderProvisioning,
    pub sync_engine: InventorySyncEngine,
    pub eligibility: EligibilityCache,
    pub sessions: SessionOrchestrator,
    /// Landing-page base for redirect callbacks.
    pub frontend_url: String,
}

/// Inputs for [`AppState::new`].
pub struct StateSettings {
    pub frontend_url: String,
    pub partner_key_cache_capacity: usize,
    pub partner_key_cache_ttl: Duration,
    pub sync_claim_ttl: chrono::Duration,
}

impl AppState {
    /// Wire the redb repositories, vault and partner connector together.
    pub fn new(
        db: Arc<PartnerDatabase>,
        vault: Arc<CredentialVault>,
        connector: Arc<dyn PartnerConnector>,
        settings: StateSettings,
    ) -> Self {
        let providers: Arc<dyn ProviderStore> = Arc::new(ProviderRepository::new(db.clone()));
        let surveys: Arc<dyn SurveyStore> = Arc::new(SurveyRepository::new(db.clone()));
        let sync_jobs: Arc<dyn SyncStore> = Arc::new(SyncRepository::new(db.clone()));
        let users: Arc<dyn UserStore> = Arc::new(UserRepository::new(db));
        let partner_keys = Arc::new(PartnerKeyCache::new(
            settings.partner_key_cache_capacity,
            settings.partner_key_cache_ttl,
        ));

        Self {
            provisioning: ProviderProvisioning::new(
                providers.clone(),
                vault.clone(),
                connector.clone(),
            ),
            sync_engine: InventorySyncEngine::new(
                providers.clone(),
                surveys.clone(),
                sync_jobs.clone(),
                connector.clone(),
            )
            .with_claim_ttl(settings.sync_claim_ttl),
            eligibility: EligibilityCache::new(
                providers.clone(),
                surveys.clone(),
                users.clone(),
                connector.clone(),
            ),
            sessions: SessionOrchestrator::new(
                providers.clone(),
                surveys.clone(),
                users.clone(),
                vault.clone(),
                connector.clone(),
                partner_keys,
            ),
            providers,
            surveys,
            sync_jobs,
            users,
            vault,
            connector,
            frontend_url: settings.frontend_url,
        }
    }
}
