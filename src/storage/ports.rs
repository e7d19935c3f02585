// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Storage ports, one per aggregate.
//!
//! The sync, eligibility and session engines depend only on these traits.
//! The redb repositories in [`super::repository`] are the shipped adapters.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use super::database::StorageResult;
use super::repository::{
    ExternalSurvey, Provider, QualificationLegend, QuotaQualification, QuotaUpsert,
    SessionOutcome, Settlement, SurveyQuota, SurveySession, SurveyUpsert, SyncJobLog, SyncStatus,
    UserProfile, UserSurveyEligibility, WalletTransaction,
};

/// Provider configuration records.
pub trait ProviderStore: Send + Sync {
    fn list(&self) -> StorageResult<Vec<Provider>>;
    fn list_active(&self) -> StorageResult<Vec<Provider>>;
    fn get(&self, provider_id: &str) -> StorageResult<Option<Provider>>;
    fn find_by_slug(&self, slug: &str) -> StorageResult<Option<Provider>>;
    fn create(&self, provider: &Provider) -> StorageResult<()>;
    fn update(&self, provider: &Provider) -> StorageResult<()>;
}

/// Synced survey inventory.
pub trait SurveyStore: Send + Sync {
    /// External bid ids currently marked active for a provider.
    fn active_bid_ids(&self, provider_id: &str) -> StorageResult<Vec<String>>;
    fn upsert_survey(&self, input: &SurveyUpsert) -> StorageResult<ExternalSurvey>;
    fn upsert_quota(&self, input: &QuotaUpsert) -> StorageResult<SurveyQuota>;
    fn upsert_qualification(
        &self,
        quota_id: &str,
        question_id: &str,
        answers: &[String],
    ) -> StorageResult<QuotaQualification>;
    /// Mark the given bids inactive in one write. Returns rows changed.
    fn deactivate(&self, provider_id: &str, external_bid_ids: &[String]) -> StorageResult<usize>;
    fn find_by_bid(
        &self,
        provider_id: &str,
        external_bid_id: &str,
    ) -> StorageResult<Option<ExternalSurvey>>;
    fn list_active_with_min_cpi(
        &self,
        provider_id: &str,
        min_cpi_cents: i64,
    ) -> StorageResult<Vec<ExternalSurvey>>;
    fn list_quotas(&self, survey_id: &str) -> StorageResult<Vec<SurveyQuota>>;
    fn list_qualifications(&self, quota_id: &str) -> StorageResult<Vec<QuotaQualification>>;
}

/// Sync job logs, qualification legend and sync claims.
pub trait SyncStore: Send + Sync {
    fn create_job(&self, provider_id: Option<&str>) -> StorageResult<SyncJobLog>;
    fn finish_job(
        &self,
        job_id: &str,
        status: SyncStatus,
        message: Option<String>,
        items_processed: u64,
        items_modified: u64,
    ) -> StorageResult<SyncJobLog>;
    /// Newest first.
    fn list_jobs(&self, limit: usize) -> StorageResult<Vec<SyncJobLog>>;
    fn stalled_jobs(&self, started_before: DateTime<Utc>) -> StorageResult<Vec<SyncJobLog>>;
    /// Delete terminal jobs completed before the cutoff.
    fn purge_jobs(&self, completed_before: DateTime<Utc>) -> StorageResult<usize>;
    /// Insert a legend entry if absent. Returns `true` when inserted.
    fn ensure_legend(&self, provider_id: &str, question_id: &str) -> StorageResult<bool>;
    fn list_legend(&self, provider_id: &str) -> StorageResult<Vec<QualificationLegend>>;
    /// Check-and-set the provider's sync claim.
    fn try_claim(&self, provider_id: &str, owner: &str, ttl: Duration) -> StorageResult<bool>;
    fn release_claim(&self, provider_id: &str, owner: &str) -> StorageResult<()>;
}

/// Profiles, sessions, eligibility cache rows and the wallet ledger.
pub trait UserStore: Send + Sync {
    fn get_profile(&self, user_id: &str) -> StorageResult<Option<UserProfile>>;
    fn upsert_profile(
        &self,
        user_id: &str,
        date_of_birth: Option<NaiveDate>,
        gender: Option<String>,
    ) -> StorageResult<UserProfile>;

    fn create_session(&self, session: &SurveySession) -> StorageResult<()>;
    fn get_session(&self, session_id: &str) -> StorageResult<Option<SurveySession>>;
    /// Record the outcome and credit the wallet atomically.
    fn settle_session(
        &self,
        session_id: &str,
        outcome: &SessionOutcome,
        credit: Option<&WalletTransaction>,
    ) -> StorageResult<Settlement>;
    /// Record the outcome without touching the wallet.
    fn record_outcome(
        &self,
        session_id: &str,
        outcome: &SessionOutcome,
    ) -> StorageResult<SurveySession>;
    /// Append a ledger entry unless the session was already credited.
    fn credit_wallet(&self, entry: &WalletTransaction) -> StorageResult<bool>;
    /// Completed sessions with a payout and no ledger entry.
    fn uncredited_completions(&self) -> StorageResult<Vec<SurveySession>>;

    fn get_eligibility(
        &self,
        user_id: &str,
        provider_id: &str,
    ) -> StorageResult<Option<UserSurveyEligibility>>;
    fn upsert_eligibility(&self, row: &UserSurveyEligibility) -> StorageResult<()>;

    /// Newest first.
    fn list_wallet_transactions(&self, user_id: &str) -> StorageResult<Vec<WalletTransaction>>;
}
