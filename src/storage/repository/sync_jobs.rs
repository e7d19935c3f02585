// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Sync bookkeeping: job logs, the qualification legend and per-provider
//! sync claims.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::database::{
    all_docs, composite_key, composite_prefix, docs_with_prefix, get_doc, put_doc,
    PartnerDatabase, StorageError, StorageResult, LEGEND, SYNC_CLAIMS, SYNC_JOBS,
};
use crate::storage::ports::SyncStore;

/// Sync job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Running,
    Success,
    Failed,
}

/// One sync attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SyncJobLog {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub items_processed: u64,
    pub items_modified: u64,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Human-readable description of a partner question id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QualificationLegend {
    pub id: String,
    pub provider_id: String,
    pub question_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub answer_labels: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// Advisory lock held by a worker while it syncs one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SyncClaim {
    owner: String,
    expires_at: DateTime<Utc>,
}

/// redb-backed sync bookkeeping repository.
#[derive(Clone)]
pub struct SyncRepository {
    db: Arc<PartnerDatabase>,
}

impl SyncRepository {
    pub fn new(db: Arc<PartnerDatabase>) -> Self {
        Self { db }
    }

    fn all_jobs(&self) -> StorageResult<Vec<SyncJobLog>> {
        let txn = self.db.read()?;
        let table = txn.open_table(SYNC_JOBS)?;
        all_docs(&table)
    }
}

impl SyncStore for SyncRepository {
    fn create_job(&self, provider_id: Option<&str>) -> StorageResult<SyncJobLog> {
        let job = SyncJobLog {
            id: uuid::Uuid::new_v4().to_string(),
            provider_id: provider_id.map(str::to_string),
            status: SyncStatus::Running,
            message: None,
            items_processed: 0,
            items_modified: 0,
            started_at: Utc::now(),
            completed_at: None,
        };

        let txn = self.db.write()?;
        {
            let mut table = txn.open_table(SYNC_JOBS)?;
            put_doc(&mut table, &job.id, &job)?;
        }
        txn.commit()?;
        Ok(job)
    }

    fn finish_job(
        &self,
        job_id: &str,
        status: SyncStatus,
        message: Option<String>,
        items_processed: u64,
        items_modified: u64,
    ) -> StorageResult<SyncJobLog> {
        let txn = self.db.write()?;
        let job = {
            let mut table = txn.open_table(SYNC_JOBS)?;
            let mut job: SyncJobLog = get_doc(&table, job_id)?
                .ok_or_else(|| StorageError::NotFound(format!("Sync job {job_id}")))?;
            job.status = status;
            job.message = message;
            job.items_processed = items_processed;
            job.items_modified = items_modified;
            job.completed_at = Some(Utc::now());
            put_doc(&mut table, job_id, &job)?;
            job
        };
        txn.commit()?;
        Ok(job)
    }

    fn list_jobs(&self, limit: usize) -> StorageResult<Vec<SyncJobLog>> {
        let mut jobs = self.all_jobs()?;
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    fn stalled_jobs(&self, started_before: DateTime<Utc>) -> StorageResult<Vec<SyncJobLog>> {
        Ok(self
            .all_jobs()?
            .into_iter()
            .filter(|j| j.status == SyncStatus::Running && j.started_at < started_before)
            .collect())
    }

    fn purge_jobs(&self, completed_before: DateTime<Utc>) -> StorageResult<usize> {
        let txn = self.db.write()?;
        let removed = {
            let mut table = txn.open_table(SYNC_JOBS)?;
            // Collect keys first, then mutate
            let expired: Vec<String> = all_docs::<SyncJobLog>(&table)?
                .into_iter()
                .filter(|j| {
                    j.status != SyncStatus::Running
                        && j.completed_at.is_some_and(|at| at < completed_before)
                })
                .map(|j| j.id)
                .collect();
            for id in &expired {
                table.remove(id.as_str())?;
            }
            expired.len()
        };
        txn.commit()?;
        Ok(removed)
    }

    fn ensure_legend(&self, provider_id: &str, question_id: &str) -> StorageResult<bool> {
        let key = composite_key(provider_id, question_id);

        let txn = self.db.write()?;
        let inserted = {
            let mut table = txn.open_table(LEGEND)?;
            if get_doc::<QualificationLegend>(&table, &key)?.is_some() {
                false
            } else {
                let entry = QualificationLegend {
                    id: uuid::Uuid::new_v4().to_string(),
                    provider_id: provider_id.to_string(),
                    question_id: question_id.to_string(),
                    text: None,
                    answer_labels: BTreeMap::new(),
                    created_at: Utc::now(),
                };
                put_doc(&mut table, &key, &entry)?;
                true
            }
        };
        txn.commit()?;
        Ok(inserted)
    }

    fn list_legend(&self, provider_id: &str) -> StorageResult<Vec<QualificationLegend>> {
        let txn = self.db.read()?;
        let table = txn.open_table(LEGEND)?;
        docs_with_prefix(&table, &composite_prefix(provider_id))
    }

    fn try_claim(&self, provider_id: &str, owner: &str, ttl: Duration) -> StorageResult<bool> {
        let now = Utc::now();

        let txn = self.db.write()?;
        let acquired = {
            let mut table = txn.open_table(SYNC_CLAIMS)?;
            let held_by_other = get_doc::<SyncClaim>(&table, provider_id)?
                .is_some_and(|claim| claim.owner != owner && claim.expires_at > now);
            if held_by_other {
                false
            } else {
                let claim = SyncClaim {
                    owner: owner.to_string(),
                    expires_at: now + ttl,
                };
                put_doc(&mut table, provider_id, &claim)?;
                true
            }
        };
        txn.commit()?;
        Ok(acquired)
    }

    fn release_claim(&self, provider_id: &str, owner: &str) -> StorageResult<()> {
        let txn = self.db.write()?;
        {
            let mut table = txn.open_table(SYNC_CLAIMS)?;
            let ours = get_doc::<SyncClaim>(&table, provider_id)?
                .is_some_and(|claim| claim.owner == owner);
            if ours {
                table.remove(provider_id)?;
            }
        }
        txn.commit()?;
        Ok(())
    }
}
