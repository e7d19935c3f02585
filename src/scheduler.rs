// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Sync Scheduler
//!
//! Background task that drives the inventory sync on a fixed interval when
//! `SYNC_INTERVAL_SECS` is set. Deployments with an external cron leave it
//! unset and call `POST /v1/admin/sync` instead.
//!
//! ## Strategy
//!
//! Every `interval` the scheduler:
//! 1. Runs one `sync_inventory` pass (provider claims prevent overlap with
//!    other workers).
//! 2. Warns about `running` job logs older than the stall threshold. It never
//!    rewrites their status.
//! 3. Purges terminal job logs older than the retention window.
//! 4. Credits completed sessions whose payout never reached the ledger.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::storage::SyncStore;
use crate::surveys::{InventorySyncEngine, SessionOrchestrator};

/// Scheduler timings.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub stall_after: chrono::Duration,
    pub job_retention: chrono::Duration,
}

/// Periodic sync, job-log housekeeping and credit backfill.
pub struct SyncScheduler {
    engine: InventorySyncEngine,
    sessions: SessionOrchestrator,
    sync: Arc<dyn SyncStore>,
    settings: SchedulerSettings,
}

impl SyncScheduler {
    pub fn new(
        engine: InventorySyncEngine,
        sessions: SessionOrchestrator,
        sync: Arc<dyn SyncStore>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            engine,
            sessions,
            sync,
            settings,
        }
    }

    /// Run the scheduler loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(scheduler.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.settings.interval.as_secs(),
            worker_id = %self.engine.worker_id(),
            "Sync scheduler starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Sync scheduler shutting down");
                return;
            }

            self.tick().await;

            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Sync scheduler shutting down");
                    return;
                }
            }
        }
    }

    /// Execute one scheduler pass.
    pub async fn tick(&self) {
        if let Err(e) = self.engine.sync_inventory().await {
            warn!(error = %e, "Scheduled inventory sync failed");
        }

        self.report_stalled_jobs();
        self.purge_old_jobs();

        match self.sessions.backfill_credits() {
            Ok(0) => {}
            Ok(count) => info!(count, "Backfilled wallet credits"),
            Err(e) => warn!(error = %e, "Wallet credit backfill failed"),
        }
    }

    fn report_stalled_jobs(&self) {
        let cutoff = Utc::now() - self.settings.stall_after;
        match self.sync.stalled_jobs(cutoff) {
            Ok(jobs) => {
                for job in jobs {
                    warn!(
                        job_id = %job.id,
                        provider_id = ?job.provider_id,
                        started_at = %job.started_at,
                        "Sync job still running past the stall threshold"
                    );
                }
            }
            Err(e) => warn!(error = %e, "Failed to list stalled sync jobs"),
        }
    }

    fn purge_old_jobs(&self) {
        let cutoff = Utc::now() - self.settings.job_retention;
        match self.sync.purge_jobs(cutoff) {
            Ok(0) => {}
            Ok(purged) => info!(purged, "Purged old sync job logs"),
            Err(e) => warn!(error = %e, "Failed to purge sync job logs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CredentialVault;
    use crate::partner::fake::{FakeConnector, FakePartner};
    use crate::partner::PartnerKeyCache;
    use crate::storage::database::tests::temp_db;
    use crate::storage::{
        Provider, ProviderRepository, ProviderStore, SurveyRepository, SurveyStore,
        SyncRepository, SyncStatus, UserRepository,
    };

    struct Fixture {
        scheduler: SyncScheduler,
        surveys: Arc<SurveyRepository>,
        sync: Arc<SyncRepository>,
        provider: Provider,
        _dir: tempfile::TempDir,
    }

    fn fixture(settings: SchedulerSettings) -> Fixture {
        let (db, dir) = temp_db();
        let providers = Arc::new(ProviderRepository::new(db.clone()));
        let surveys = Arc::new(SurveyRepository::new(db.clone()));
        let sync = Arc::new(SyncRepository::new(db.clone()));
        let users = Arc::new(UserRepository::new(db));
        let connector = Arc::new(FakeConnector::new());
        let vault = Arc::new(CredentialVault::from_secret("operator secret").unwrap());

        let provider = Provider::new("Partner".into(), "partner".into());
        providers.create(&provider).unwrap();
        connector.insert(&provider.id, Arc::new(FakePartner::with_inventory(3)));

        let engine = InventorySyncEngine::new(
            providers.clone(),
            surveys.clone(),
            sync.clone(),
            connector.clone(),
        );
        let sessions = SessionOrchestrator::new(
            providers,
            surveys.clone(),
            users,
            vault,
            connector,
            Arc::new(PartnerKeyCache::new(4, Duration::from_secs(60))),
        );

        Fixture {
            scheduler: SyncScheduler::new(engine, sessions, sync.clone(), settings),
            surveys,
            sync,
            provider,
            _dir: dir,
        }
    }

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            interval: Duration::from_millis(10),
            stall_after: chrono::Duration::minutes(30),
            job_retention: chrono::Duration::days(7),
        }
    }

    #[tokio::test]
    async fn tick_runs_a_sync_pass() {
        let f = fixture(settings());
        f.scheduler.tick().await;

        assert_eq!(f.surveys.active_bid_ids(&f.provider.id).unwrap().len(), 3);
        let jobs = f.sync.list_jobs(10).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, SyncStatus::Success);
    }

    #[tokio::test]
    async fn tick_purges_jobs_past_retention() {
        let f = fixture(SchedulerSettings {
            job_retention: chrono::Duration::seconds(-60),
            ..settings()
        });
        let old = f.sync.create_job(None).unwrap();
        f.sync
            .finish_job(&old.id, SyncStatus::Failed, None, 0, 0)
            .unwrap();

        f.scheduler.tick().await;
        // Cutoff is in the future, so both the old job and this pass's job go
        assert!(f.sync.list_jobs(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let f = fixture(settings());
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(f.scheduler.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();

        assert!(!f.sync.list_jobs(10).unwrap().is_empty());
    }
}
