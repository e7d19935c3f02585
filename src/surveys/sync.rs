// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Inventory Sync
//!
//! Pulls the partner's bid listing for every active provider and reconciles
//! it with the local inventory.
//!
//! ## Per-provider run
//!
//! 1. Take the provider's sync claim (skip the provider if another worker
//!    holds a live claim).
//! 2. Open a `running` job log.
//! 3. Page through the bid listing and upsert surveys, quotas, legend
//!    entries and qualifications.
//! 4. Deactivate every previously active bid that was not fetched.
//! 5. Close the job log as `success` or `failed` and release the claim.
//!
//! A failure for one provider is logged on its job row and never stops the
//! remaining providers. Runs are sequential so the sweep sees a complete
//! fetched set.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::partner::client::{fetch_all_bids, PartnerConnector, PartnerError};
use crate::partner::types::{BidQuery, EligibleBid};
use crate::storage::{
    Provider, ProviderStore, QuotaUpsert, StorageError, SurveyStore, SurveyUpsert, SyncStatus,
    SyncStore,
};

/// Default lifetime of a provider sync claim.
pub const DEFAULT_CLAIM_TTL_SECS: i64 = 900;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Partner(#[from] PartnerError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Totals of one `sync_inventory` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SyncSummary {
    pub providers_synced: usize,
    pub providers_failed: usize,
    /// Providers whose claim was held by another worker.
    pub providers_skipped: usize,
    pub items_processed: u64,
    pub items_modified: u64,
}

/// Counters of one successful provider run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ProviderCounts {
    bids_fetched: u64,
    surveys: u64,
    quotas: u64,
    deactivated: u64,
}

impl ProviderCounts {
    fn modified(&self) -> u64 {
        self.surveys + self.quotas + self.deactivated
    }
}

enum ProviderRun {
    Synced(ProviderCounts),
    Failed,
    Skipped,
}

/// Reconciles local inventory with the partner's bid listing.
#[derive(Clone)]
pub struct InventorySyncEngine {
    providers: Arc<dyn ProviderStore>,
    surveys: Arc<dyn SurveyStore>,
    sync: Arc<dyn SyncStore>,
    connector: Arc<dyn PartnerConnector>,
    worker_id: String,
    claim_ttl: Duration,
}

impl InventorySyncEngine {
    pub fn new(
        providers: Arc<dyn ProviderStore>,
        surveys: Arc<dyn SurveyStore>,
        sync: Arc<dyn SyncStore>,
        connector: Arc<dyn PartnerConnector>,
    ) -> Self {
        Self {
            providers,
            surveys,
            sync,
            connector,
            worker_id: uuid::Uuid::new_v4().to_string(),
            claim_ttl: Duration::seconds(DEFAULT_CLAIM_TTL_SECS),
        }
    }

    /// Override the claim lifetime.
    pub fn with_claim_ttl(mut self, claim_ttl: Duration) -> Self {
        self.claim_ttl = claim_ttl;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Sync every active provider. Safe to re-run.
    ///
    /// Only a failure to list providers is returned as an error; provider
    /// failures are counted in the summary and recorded on their job rows.
    pub async fn sync_inventory(&self) -> Result<SyncSummary, SyncError> {
        let providers = self.providers.list_active()?;
        let mut summary = SyncSummary::default();

        for provider in &providers {
            match self.sync_provider(provider).await {
                ProviderRun::Synced(counts) => {
                    summary.providers_synced += 1;
                    summary.items_processed += counts.bids_fetched;
                    summary.items_modified += counts.modified();
                }
                ProviderRun::Failed => summary.providers_failed += 1,
                ProviderRun::Skipped => summary.providers_skipped += 1,
            }
        }

        info!(
            synced = summary.providers_synced,
            failed = summary.providers_failed,
            skipped = summary.providers_skipped,
            items_processed = summary.items_processed,
            items_modified = summary.items_modified,
            "Inventory sync pass finished"
        );
        Ok(summary)
    }

    async fn sync_provider(&self, provider: &Provider) -> ProviderRun {
        match self
            .sync
            .try_claim(&provider.id, &self.worker_id, self.claim_ttl)
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    provider_id = %provider.id,
                    "Sync claim held by another worker, skipping provider"
                );
                return ProviderRun::Skipped;
            }
            Err(e) => {
                error!(provider_id = %provider.id, error = %e, "Failed to take sync claim");
                return ProviderRun::Failed;
            }
        }

        let run = self.run_with_job_log(provider).await;

        if let Err(e) = self.sync.release_claim(&provider.id, &self.worker_id) {
            warn!(provider_id = %provider.id, error = %e, "Failed to release sync claim");
        }
        run
    }

    async fn run_with_job_log(&self, provider: &Provider) -> ProviderRun {
        let job = match self.sync.create_job(Some(&provider.id)) {
            Ok(job) => job,
            Err(e) => {
                error!(provider_id = %provider.id, error = %e, "Failed to open sync job log");
                return ProviderRun::Failed;
            }
        };

        let result = self.reconcile(provider).await;

        let (status, message, processed, modified) = match &result {
            Ok(counts) => (
                SyncStatus::Success,
                Some(format!(
                    "Synced {} bids, deactivated {}",
                    counts.bids_fetched, counts.deactivated
                )),
                counts.bids_fetched,
                counts.modified(),
            ),
            Err(e) => (SyncStatus::Failed, Some(e.to_string()), 0, 0),
        };
        if let Err(e) = self
            .sync
            .finish_job(&job.id, status, message, processed, modified)
        {
            error!(job_id = %job.id, error = %e, "Failed to close sync job log");
        }

        match result {
            Ok(counts) => {
                info!(
                    provider_id = %provider.id,
                    job_id = %job.id,
                    bids = counts.bids_fetched,
                    modified = counts.modified(),
                    deactivated = counts.deactivated,
                    "Provider inventory synced"
                );
                ProviderRun::Synced(counts)
            }
            Err(e) => {
                error!(
                    provider_id = %provider.id,
                    job_id = %job.id,
                    error = %e,
                    "Provider inventory sync failed"
                );
                ProviderRun::Failed
            }
        }
    }

    async fn reconcile(&self, provider: &Provider) -> Result<ProviderCounts, SyncError> {
        let api = self.connector.connect(provider)?;
        let bids = fetch_all_bids(api.as_ref(), &BidQuery::default()).await?;

        let previously_active = self.surveys.active_bid_ids(&provider.id)?;
        let mut counts = ProviderCounts {
            bids_fetched: bids.len() as u64,
            ..Default::default()
        };
        let mut fetched = HashSet::new();

        for bid in bids.iter().filter(|b| !b.bid_id.is_empty()) {
            fetched.insert(bid.bid_id.as_str());
            counts.quotas += self.upsert_bid(provider, bid)?;
            counts.surveys += 1;
        }

        let missing: Vec<String> = previously_active
            .into_iter()
            .filter(|id| !fetched.contains(id.as_str()))
            .collect();
        if !missing.is_empty() {
            counts.deactivated = self.surveys.deactivate(&provider.id, &missing)? as u64;
        }

        Ok(counts)
    }

    /// Upsert a bid with its quotas and qualifications. Returns quotas touched.
    fn upsert_bid(&self, provider: &Provider, bid: &EligibleBid) -> Result<u64, SyncError> {
        let survey = self.surveys.upsert_survey(&SurveyUpsert {
            provider_id: provider.id.clone(),
            external_bid_id: bid.bid_id.clone(),
            name: Some(bid.name.clone()).filter(|n| !n.is_empty()),
            country: Some(bid.country.clone()).filter(|c| !c.is_empty()),
            languages: bid.language_ids.clone(),
            cpi_cents: bid.max_cpi(),
            loi_minutes: loi_minutes(bid.max_loi()),
            is_active: bid.is_active(),
        })?;

        let mut quotas = 0;
        for quota in bid.quotas.iter().filter(|q| !q.quota_id.is_empty()) {
            let stored = self.surveys.upsert_quota(&QuotaUpsert {
                survey_id: survey.id.clone(),
                external_quota_id: quota.quota_id.clone(),
                cpi_cents: quota.cpi,
                loi_minutes: loi_minutes(quota.loi),
                required_completes: quota.num_available,
                current_completes: quota.num_completes,
                is_open: quota.is_open,
            })?;
            quotas += 1;

            for criterion in quota
                .qualifications
                .iter()
                .filter(|c| !c.question_id.is_empty())
            {
                self.sync.ensure_legend(&provider.id, &criterion.question_id)?;
                self.surveys
                    .upsert_qualification(&stored.id, &criterion.question_id, &criterion.answers)?;
            }
        }
        Ok(quotas)
    }
}

/// Seconds to whole minutes, rounded up. `None` for an unknown LOI.
pub fn loi_minutes(loi_seconds: i64) -> Option<i64> {
    (loi_seconds > 0).then(|| (loi_seconds + 59) / 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partner::fake::{bid, FakeConnector, FakePartner};
    use crate::storage::database::tests::temp_db;
    use crate::storage::{ProviderRepository, SurveyRepository, SyncRepository};

    struct Fixture {
        engine: InventorySyncEngine,
        providers: Arc<ProviderRepository>,
        surveys: Arc<SurveyRepository>,
        sync: Arc<SyncRepository>,
        connector: Arc<FakeConnector>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let (db, dir) = temp_db();
        let providers = Arc::new(ProviderRepository::new(db.clone()));
        let surveys = Arc::new(SurveyRepository::new(db.clone()));
        let sync = Arc::new(SyncRepository::new(db));
        let connector = Arc::new(FakeConnector::new());
        let engine = InventorySyncEngine::new(
            providers.clone(),
            surveys.clone(),
            sync.clone(),
            connector.clone(),
        );
        Fixture {
            engine,
            providers,
            surveys,
            sync,
            connector,
            _dir: dir,
        }
    }

    impl Fixture {
        fn provider(&self, slug: &str, partner: Arc<FakePartner>) -> Provider {
            let provider = Provider::new(slug.to_uppercase(), slug.into());
            self.providers.create(&provider).unwrap();
            self.connector.insert(&provider.id, partner);
            provider
        }
    }

    #[test]
    fn loi_rounds_up_to_minutes() {
        assert_eq!(loi_minutes(610), Some(11));
        assert_eq!(loi_minutes(600), Some(10));
        assert_eq!(loi_minutes(1), Some(1));
        assert_eq!(loi_minutes(0), None);
    }

    #[tokio::test]
    async fn sync_upserts_surveys_quotas_and_qualifications() {
        let f = fixture();
        let partner = Arc::new(FakePartner::new());
        partner.set_inventory(vec![bid("A", &[150, 400, 320])]);
        let provider = f.provider("mc", partner);

        let summary = f.engine.sync_inventory().await.unwrap();
        assert_eq!(summary.providers_synced, 1);
        assert_eq!(summary.items_processed, 1);
        assert_eq!(summary.items_modified, 1 + 3);

        let survey = f.surveys.find_by_bid(&provider.id, "A").unwrap().unwrap();
        assert_eq!(survey.cpi_cents, 400);
        assert_eq!(survey.loi_minutes, Some(11));
        assert!(survey.is_active);

        let quotas = f.surveys.list_quotas(&survey.id).unwrap();
        assert_eq!(quotas.len(), 3);
        let quals = f.surveys.list_qualifications(&quotas[0].id).unwrap();
        assert_eq!(quals.len(), 2);

        let legend = f.sync.list_legend(&provider.id).unwrap();
        let mut questions: Vec<_> = legend.iter().map(|l| l.question_id.as_str()).collect();
        questions.sort();
        assert_eq!(questions, vec!["age", "gender"]);

        let jobs = f.sync.list_jobs(10).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, SyncStatus::Success);
        assert_eq!(jobs[0].items_processed, 1);
        assert_eq!(jobs[0].items_modified, 4);
    }

    #[tokio::test]
    async fn sweep_deactivates_bids_missing_from_the_fetch() {
        let f = fixture();
        let partner = Arc::new(FakePartner::new());
        partner.set_inventory(vec![bid("A", &[300]), bid("B", &[300]), bid("C", &[300])]);
        let provider = f.provider("mc", partner.clone());
        f.engine.sync_inventory().await.unwrap();

        partner.set_inventory(vec![bid("A", &[500]), bid("C", &[300])]);
        let summary = f.engine.sync_inventory().await.unwrap();
        // 2 surveys + 2 quotas + 1 deactivated
        assert_eq!(summary.items_modified, 5);

        let a = f.surveys.find_by_bid(&provider.id, "A").unwrap().unwrap();
        let b = f.surveys.find_by_bid(&provider.id, "B").unwrap().unwrap();
        let c = f.surveys.find_by_bid(&provider.id, "C").unwrap().unwrap();
        assert!(a.is_active && c.is_active);
        assert!(!b.is_active);
        assert_eq!(a.cpi_cents, 500);

        let mut active = f.surveys.active_bid_ids(&provider.id).unwrap();
        active.sort();
        assert_eq!(active, vec!["A", "C"]);
    }

    #[tokio::test]
    async fn rerun_with_same_inventory_is_stable() {
        let f = fixture();
        let partner = Arc::new(FakePartner::new());
        partner.set_inventory(vec![bid("A", &[300]), bid("B", &[250])]);
        let provider = f.provider("mc", partner);

        f.engine.sync_inventory().await.unwrap();
        let first = f.surveys.find_by_bid(&provider.id, "A").unwrap().unwrap();
        f.engine.sync_inventory().await.unwrap();
        let second = f.surveys.find_by_bid(&provider.id, "A").unwrap().unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(f.surveys.list_quotas(&second.id).unwrap().len(), 1);
        assert_eq!(f.surveys.active_bid_ids(&provider.id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn inactive_bid_state_is_stored_inactive() {
        let f = fixture();
        let partner = Arc::new(FakePartner::new());
        let mut paused = bid("P", &[300]);
        paused.state = "paused".into();
        partner.set_inventory(vec![paused, bid("", &[300])]);
        let provider = f.provider("mc", partner);

        let summary = f.engine.sync_inventory().await.unwrap();
        assert_eq!(summary.items_processed, 2);

        let stored = f.surveys.find_by_bid(&provider.id, "P").unwrap().unwrap();
        assert!(!stored.is_active);
        assert!(f.surveys.find_by_bid(&provider.id, "").unwrap().is_none());
    }

    #[tokio::test]
    async fn pagination_is_followed_to_the_last_page() {
        let f = fixture();
        let partner = Arc::new(FakePartner::with_inventory(45));
        let provider = f.provider("mc", partner.clone());

        let summary = f.engine.sync_inventory().await.unwrap();
        assert_eq!(summary.items_processed, 45);
        assert_eq!(partner.bid_page_calls(), 3);
        assert!(partner
            .bid_queries()
            .iter()
            .all(|q| q.page_size == Some(20)));
        assert_eq!(f.surveys.active_bid_ids(&provider.id).unwrap().len(), 45);
    }

    #[tokio::test]
    async fn one_failing_provider_does_not_stop_the_others() {
        let f = fixture();
        let broken = Arc::new(FakePartner::with_inventory(2));
        broken.fail_with(502);
        let healthy = Arc::new(FakePartner::with_inventory(3));
        f.provider("broken", broken);
        let ok = f.provider("healthy", healthy);

        let summary = f.engine.sync_inventory().await.unwrap();
        assert_eq!(summary.providers_failed, 1);
        assert_eq!(summary.providers_synced, 1);
        assert_eq!(f.surveys.active_bid_ids(&ok.id).unwrap().len(), 3);

        let jobs = f.sync.list_jobs(10).unwrap();
        assert_eq!(jobs.len(), 2);
        let failed = jobs
            .iter()
            .find(|j| j.status == SyncStatus::Failed)
            .unwrap();
        assert!(failed.message.as_deref().unwrap().contains("502"));
        assert!(failed.completed_at.is_some());
    }

    #[tokio::test]
    async fn failed_fetch_leaves_inventory_untouched() {
        let f = fixture();
        let partner = Arc::new(FakePartner::with_inventory(2));
        let provider = f.provider("mc", partner.clone());
        f.engine.sync_inventory().await.unwrap();

        partner.fail_with(500);
        f.engine.sync_inventory().await.unwrap();
        assert_eq!(f.surveys.active_bid_ids(&provider.id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn provider_without_partner_config_fails_its_job() {
        let f = fixture();
        let provider = Provider::new("Bare".into(), "bare".into());
        f.providers.create(&provider).unwrap();

        let summary = f.engine.sync_inventory().await.unwrap();
        assert_eq!(summary.providers_failed, 1);
        let jobs = f.sync.list_jobs(10).unwrap();
        assert_eq!(jobs[0].status, SyncStatus::Failed);
        assert_eq!(jobs[0].provider_id.as_deref(), Some(provider.id.as_str()));
    }

    #[tokio::test]
    async fn held_claim_skips_the_provider() {
        let f = fixture();
        let partner = Arc::new(FakePartner::with_inventory(1));
        let provider = f.provider("mc", partner.clone());
        assert!(f
            .sync
            .try_claim(&provider.id, "other-worker", Duration::minutes(5))
            .unwrap());

        let summary = f.engine.sync_inventory().await.unwrap();
        assert_eq!(summary.providers_skipped, 1);
        assert_eq!(partner.bid_page_calls(), 0);
        assert!(f.sync.list_jobs(10).unwrap().is_empty());

        f.sync.release_claim(&provider.id, "other-worker").unwrap();
        let summary = f.engine.sync_inventory().await.unwrap();
        assert_eq!(summary.providers_synced, 1);
    }

    #[tokio::test]
    async fn claim_is_released_after_a_run() {
        let f = fixture();
        let partner = Arc::new(FakePartner::with_inventory(1));
        let provider = f.provider("mc", partner);

        f.engine.sync_inventory().await.unwrap();
        assert!(f
            .sync
            .try_claim(&provider.id, "other-worker", Duration::minutes(5))
            .unwrap());
    }

    #[tokio::test]
    async fn inactive_providers_are_not_synced() {
        let f = fixture();
        let partner = Arc::new(FakePartner::with_inventory(1));
        let mut provider = f.provider("mc", partner.clone());
        provider.is_active = false;
        f.providers.update(&provider).unwrap();

        let summary = f.engine.sync_inventory().await.unwrap();
        assert_eq!(summary, SyncSummary::default());
        assert_eq!(partner.bid_page_calls(), 0);
    }
}
