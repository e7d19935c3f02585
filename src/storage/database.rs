// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded partner-integration database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! Documents are stored as JSON bytes. Composite keys use `|` as separator
//! and double as the uniqueness constraints of the data model.
//!
//! - `providers`: provider_id → Provider
//! - `provider_by_slug`: slug → provider_id
//! - `surveys`: survey_id → ExternalSurvey
//! - `survey_by_bid`: `provider_id|external_bid_id` → survey_id
//! - `quotas`: quota_id → SurveyQuota
//! - `quota_by_external`: `survey_id|external_quota_id` → quota_id
//! - `qualifications`: `quota_id|question_id` → QuotaQualification
//! - `qualification_legend`: `provider_id|question_id` → QualificationLegend
//! - `sync_jobs`: job_id → SyncJobLog
//! - `sync_claims`: provider_id → SyncClaim
//! - `users`: user_id → UserProfile
//! - `sessions`: session_id → SurveySession
//! - `sessions_awaiting_credit`: session_id → session_id (paid completions without a ledger entry)
//! - `eligibility`: `user_id|provider_id` → UserSurveyEligibility
//! - `wallet_txs`: tx_id → WalletTransaction
//! - `wallet_tx_by_session`: session_id → tx_id

use std::path::Path;

use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, Table, TableDefinition,
    WriteTransaction,
};
use serde::{de::DeserializeOwned, Serialize};

// =============================================================================
// Table Definitions
// =============================================================================

pub(crate) const PROVIDERS: TableDefinition<&str, &[u8]> = TableDefinition::new("providers");
pub(crate) const PROVIDER_BY_SLUG: TableDefinition<&str, &str> =
    TableDefinition::new("provider_by_slug");

pub(crate) const SURVEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("surveys");
pub(crate) const SURVEY_BY_BID: TableDefinition<&str, &str> = TableDefinition::new("survey_by_bid");

pub(crate) const QUOTAS: TableDefinition<&str, &[u8]> = TableDefinition::new("quotas");
pub(crate) const QUOTA_BY_EXTERNAL: TableDefinition<&str, &str> =
    TableDefinition::new("quota_by_external");

pub(crate) const QUALIFICATIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("qualifications");
pub(crate) const LEGEND: TableDefinition<&str, &[u8]> =
    TableDefinition::new("qualification_legend");

pub(crate) const SYNC_JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("sync_jobs");
pub(crate) const SYNC_CLAIMS: TableDefinition<&str, &[u8]> = TableDefinition::new("sync_claims");

pub(crate) const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
pub(crate) const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");
pub(crate) const SESSIONS_AWAITING_CREDIT: TableDefinition<&str, &str> =
    TableDefinition::new("sessions_awaiting_credit");
pub(crate) const ELIGIBILITY: TableDefinition<&str, &[u8]> = TableDefinition::new("eligibility");

pub(crate) const WALLET_TXS: TableDefinition<&str, &[u8]> = TableDefinition::new("wallet_txs");
pub(crate) const WALLET_TX_BY_SESSION: TableDefinition<&str, &str> =
    TableDefinition::new("wallet_tx_by_session");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

// =============================================================================
// Key Helpers
// =============================================================================

/// Build a `a|b` composite key.
pub(crate) fn composite_key(a: &str, b: &str) -> String {
    format!("{a}|{b}")
}

/// Prefix matching every composite key that starts with `a|`.
pub(crate) fn composite_prefix(a: &str) -> String {
    format!("{a}|")
}

// =============================================================================
// Document Helpers
// =============================================================================

/// Read and decode one JSON document.
pub(crate) fn get_doc<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> StorageResult<Option<T>> {
    match table.get(key)? {
        Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
        None => Ok(None),
    }
}

/// Encode and write one JSON document.
pub(crate) fn put_doc<T: Serialize>(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    key: &str,
    doc: &T,
) -> StorageResult<()> {
    let json = serde_json::to_vec(doc)?;
    table.insert(key, json.as_slice())?;
    Ok(())
}

/// Decode every document in the table.
pub(crate) fn all_docs<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
) -> StorageResult<Vec<T>> {
    let mut docs = Vec::new();
    for entry in table.iter()? {
        let (_, value) = entry?;
        docs.push(serde_json::from_slice(value.value())?);
    }
    Ok(docs)
}

/// Decode every document whose key starts with `prefix`.
pub(crate) fn docs_with_prefix<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    prefix: &str,
) -> StorageResult<Vec<T>> {
    let mut docs = Vec::new();
    for entry in table.range(prefix..)? {
        let (key, value) = entry?;
        if !key.value().starts_with(prefix) {
            break;
        }
        docs.push(serde_json::from_slice(value.value())?);
    }
    Ok(docs)
}

/// Collect `(key, value)` pairs of a string index whose key starts with `prefix`.
pub(crate) fn index_with_prefix(
    table: &impl ReadableTable<&'static str, &'static str>,
    prefix: &str,
) -> StorageResult<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    for entry in table.range(prefix..)? {
        let (key, value) = entry?;
        let key = key.value();
        if !key.starts_with(prefix) {
            break;
        }
        pairs.push((key.to_string(), value.value().to_string()));
    }
    Ok(pairs)
}

/// Look up a single string index entry.
pub(crate) fn index_get(
    table: &impl ReadableTable<&'static str, &'static str>,
    key: &str,
) -> StorageResult<Option<String>> {
    Ok(table.get(key)?.map(|v| v.value().to_string()))
}

// =============================================================================
// PartnerDatabase
// =============================================================================

/// Embedded ACID store shared by every repository.
pub struct PartnerDatabase {
    db: Database,
}

impl PartnerDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(PROVIDERS)?;
            let _ = write_txn.open_table(PROVIDER_BY_SLUG)?;
            let _ = write_txn.open_table(SURVEYS)?;
            let _ = write_txn.open_table(SURVEY_BY_BID)?;
            let _ = write_txn.open_table(QUOTAS)?;
            let _ = write_txn.open_table(QUOTA_BY_EXTERNAL)?;
            let _ = write_txn.open_table(QUALIFICATIONS)?;
            let _ = write_txn.open_table(LEGEND)?;
            let _ = write_txn.open_table(SYNC_JOBS)?;
            let _ = write_txn.open_table(SYNC_CLAIMS)?;
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(SESSIONS)?;
            let _ = write_txn.open_table(SESSIONS_AWAITING_CREDIT)?;
            let _ = write_txn.open_table(ELIGIBILITY)?;
            let _ = write_txn.open_table(WALLET_TXS)?;
            let _ = write_txn.open_table(WALLET_TX_BY_SESSION)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    pub(crate) fn read(&self) -> StorageResult<ReadTransaction> {
        Ok(self.db.begin_read()?)
    }

    pub(crate) fn write(&self) -> StorageResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde::Deserialize;

    pub(crate) fn temp_db() -> (std::sync::Arc<PartnerDatabase>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = PartnerDatabase::open(&dir.path().join("test.redb")).unwrap();
        (std::sync::Arc::new(db), dir)
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
    }

    #[test]
    fn prefix_scan_stops_at_prefix_boundary() {
        let (db, _dir) = temp_db();
        let txn = db.write().unwrap();
        {
            let mut table = txn.open_table(QUALIFICATIONS).unwrap();
            for key in ["q1|age", "q1|gender", "q10|age", "q2|age"] {
                put_doc(&mut table, key, &Doc { name: key.to_string() }).unwrap();
            }
        }
        txn.commit().unwrap();

        let txn = db.read().unwrap();
        let table = txn.open_table(QUALIFICATIONS).unwrap();
        let docs: Vec<Doc> = docs_with_prefix(&table, &composite_prefix("q1")).unwrap();
        let names: Vec<&str> = docs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["q1|age", "q1|gender"]);
    }

    #[test]
    fn reopening_keeps_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("partner.redb");
        {
            let db = PartnerDatabase::open(&path).unwrap();
            let txn = db.write().unwrap();
            {
                let mut table = txn.open_table(USERS).unwrap();
                put_doc(&mut table, "u1", &Doc { name: "ada".into() }).unwrap();
            }
            txn.commit().unwrap();
        }

        let db = PartnerDatabase::open(&path).unwrap();
        let txn = db.read().unwrap();
        let table = txn.open_table(USERS).unwrap();
        let doc: Option<Doc> = get_doc(&table, "u1").unwrap();
        assert_eq!(doc, Some(Doc { name: "ada".into() }));
    }

    #[test]
    fn index_lookup_returns_owned_values() {
        let (db, _dir) = temp_db();
        let txn = db.write().unwrap();
        {
            let mut table = txn.open_table(SURVEY_BY_BID).unwrap();
            table.insert(composite_key("p1", "b1").as_str(), "s1").unwrap();
            table.insert(composite_key("p1", "b2").as_str(), "s2").unwrap();
            table.insert(composite_key("p2", "b1").as_str(), "s3").unwrap();
        }
        txn.commit().unwrap();

        let txn = db.read().unwrap();
        let table = txn.open_table(SURVEY_BY_BID).unwrap();
        assert_eq!(index_get(&table, "p2|b1").unwrap(), Some("s3".to_string()));
        let pairs = index_with_prefix(&table, &composite_prefix("p1")).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1], ("p1|b2".to_string(), "s2".to_string()));
    }
}
