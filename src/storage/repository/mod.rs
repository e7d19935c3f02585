// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Repository layer providing typed access to the partner database.
//!
//! Each repository implements one storage port for a single aggregate,
//! using the shared [`PartnerDatabase`](super::PartnerDatabase).

pub mod providers;
pub mod surveys;
pub mod sync_jobs;
pub mod users;

pub use providers::{Provider, ProviderRepository, ProviderResponse};
pub use surveys::{
    ExternalSurvey, QuotaQualification, QuotaUpsert, SurveyQuota, SurveyRepository, SurveyUpsert,
};
pub use sync_jobs::{QualificationLegend, SyncJobLog, SyncRepository, SyncStatus};
pub use users::{
    BestBid, SessionOutcome, SessionStatus, Settlement, SurveySession, UserProfile,
    UserRepository, UserSurveyEligibility, WalletTransaction,
};
