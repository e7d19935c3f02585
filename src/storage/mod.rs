// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Persistence for the partner integration engine.
//!
//! The engines are written against the per-aggregate ports in [`ports`].
//! The shipped adapter keeps every aggregate in a single embedded redb
//! database file under `DATA_DIR`:
//!
//! ```text
//! $DATA_DIR/
//!   partner.redb   # providers, inventory, sync jobs, users, sessions, ledger
//! ```
//!
//! ## Important Notes
//!
//! - Provider private keys and API credentials are stored as vault blobs only
//! - Multi-row mutations run in a single redb write transaction
//! - Rows are never deleted, except terminal sync job logs past retention

pub mod database;
pub mod ports;
pub mod repository;

pub use database::{PartnerDatabase, StorageError, StorageResult};
pub use ports::{ProviderStore, SurveyStore, SyncStore, UserStore};
pub use repository::{
    BestBid, ExternalSurvey, Provider, ProviderRepository, ProviderResponse, QualificationLegend,
    QuotaQualification, QuotaUpsert, SessionOutcome, SessionStatus, Settlement, SurveyQuota,
    SurveyRepository, SurveySession, SurveyUpsert, SyncJobLog, SyncRepository, SyncStatus,
    UserProfile, UserRepository, UserSurveyEligibility, WalletTransaction,
};

/// File name of the database inside `DATA_DIR`.
pub const DATABASE_FILE: &str = "partner.redb";
