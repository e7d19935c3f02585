// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User-facing records: profiles, survey sessions, eligibility cache rows and
//! the wallet ledger.
//!
//! ## Settlement
//!
//! A session moves from `pending` to a terminal status exactly once. The
//! status update, balance change and ledger entry are written in one redb
//! transaction by [`UserStore::settle_session`]. The ledger is indexed by
//! session id so crediting the same session twice is a no-op.
//!
//! Paid completions are listed in `sessions_awaiting_credit` until their
//! ledger entry is written, so the credit backfill never scans the full
//! session table.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use redb::{ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::partner::types::EligibleBid;
use crate::storage::database::{
    all_docs, composite_key, get_doc, index_get, put_doc, PartnerDatabase, StorageError,
    StorageResult, ELIGIBILITY, SESSIONS, SESSIONS_AWAITING_CREDIT, USERS, WALLET_TXS,
    WALLET_TX_BY_SESSION,
};
use crate::storage::ports::UserStore;

// =============================================================================
// Types
// =============================================================================

/// Demographics and wallet balance of an end user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub wallet_balance_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(user_id: String) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            date_of_birth: None,
            gender: None,
            wallet_balance_cents: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Survey session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Complete,
    Screenout,
    OverQuota,
    QualityTerm,
    Timeout,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Complete => "complete",
            SessionStatus::Screenout => "screenout",
            SessionStatus::OverQuota => "over_quota",
            SessionStatus::QualityTerm => "quality_term",
            SessionStatus::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Pending)
    }
}

impl SurveySession {
    /// Complete with a positive payout.
    pub fn is_payable(&self) -> bool {
        self.status == SessionStatus::Complete && self.actual_payout_cents.is_some_and(|c| c > 0)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SessionStatus::Pending),
            "complete" => Ok(SessionStatus::Complete),
            "screenout" => Ok(SessionStatus::Screenout),
            "over_quota" => Ok(SessionStatus::OverQuota),
            "quality_term" => Ok(SessionStatus::QualityTerm),
            "timeout" => Ok(SessionStatus::Timeout),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// One survey attempt by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SurveySession {
    pub id: String,
    pub user_id: String,
    pub provider_id: String,
    pub bid_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota_id: Option<String>,
    /// CPI of the survey when the user clicked, in cents.
    pub cpi_at_click_cents: i64,
    pub expected_payout_cents: i64,
    pub actual_payout_cents: Option<i64>,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_detail: Option<String>,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Terminal outcome reported by a verified partner callback.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub status: SessionStatus,
    pub status_detail: Option<String>,
    pub actual_payout_cents: Option<i64>,
    pub completed_at: DateTime<Utc>,
}

/// Result of an atomic settlement.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub session: SurveySession,
    /// Whether a new ledger entry was written.
    pub credited: bool,
}

/// Highest-paying quota across a user's eligible bids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BestBid {
    pub bid_id: String,
    pub quota_id: String,
    pub cpi_cents: i64,
    pub payout_cents: i64,
    pub estimated_minutes: i64,
}

/// Cached partner eligibility for one `(user, provider)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserSurveyEligibility {
    pub id: String,
    pub user_id: String,
    pub provider_id: String,
    pub eligible_bids: Vec<EligibleBid>,
    pub best_bid: Option<BestBid>,
    pub fetched_at: DateTime<Utc>,
}

/// Wallet ledger entry. Appended, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WalletTransaction {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Signed amount in cents.
    pub amount_cents: i64,
    /// Signed amount in currency units, e.g. `"2.50"`.
    pub amount: String,
    #[serde(rename = "type")]
    pub tx_type: String,
    pub description: String,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Repository
// =============================================================================

/// redb-backed user, session and wallet repository.
#[derive(Clone)]
pub struct UserRepository {
    db: Arc<PartnerDatabase>,
}

impl UserRepository {
    pub fn new(db: Arc<PartnerDatabase>) -> Self {
        Self { db }
    }
}

/// Move a pending session to its terminal outcome inside `txn`.
fn apply_outcome(
    txn: &WriteTransaction,
    session_id: &str,
    outcome: &SessionOutcome,
) -> StorageResult<SurveySession> {
    let mut table = txn.open_table(SESSIONS)?;
    let mut session: SurveySession = get_doc(&table, session_id)?
        .ok_or_else(|| StorageError::NotFound(format!("Session {session_id}")))?;

    if session.status != SessionStatus::Pending {
        return Err(StorageError::Conflict(format!(
            "Session {session_id} already settled as {}",
            session.status
        )));
    }

    session.status = outcome.status;
    session.status_detail = outcome.status_detail.clone();
    session.actual_payout_cents = outcome.actual_payout_cents;
    session.completed_at = Some(outcome.completed_at);
    put_doc(&mut table, session_id, &session)?;

    if session.is_payable() {
        let mut awaiting = txn.open_table(SESSIONS_AWAITING_CREDIT)?;
        awaiting.insert(session_id, session_id)?;
    }
    Ok(session)
}

/// Append a ledger entry and adjust the balance inside `txn`.
///
/// Returns `false` when the session already has a ledger entry.
fn apply_credit(txn: &WriteTransaction, entry: &WalletTransaction) -> StorageResult<bool> {
    let mut by_session = txn.open_table(WALLET_TX_BY_SESSION)?;
    if let Some(session_id) = entry.session_id.as_deref() {
        let mut awaiting = txn.open_table(SESSIONS_AWAITING_CREDIT)?;
        awaiting.remove(session_id)?;
        if index_get(&by_session, session_id)?.is_some() {
            return Ok(false);
        }
        by_session.insert(session_id, entry.id.as_str())?;
    }

    let mut ledger = txn.open_table(WALLET_TXS)?;
    put_doc(&mut ledger, &entry.id, entry)?;

    let mut users = txn.open_table(USERS)?;
    let mut profile: UserProfile = get_doc(&users, &entry.user_id)?
        .unwrap_or_else(|| UserProfile::new(entry.user_id.clone()));
    profile.wallet_balance_cents += entry.amount_cents;
    profile.updated_at = Utc::now();
    put_doc(&mut users, &entry.user_id, &profile)?;

    Ok(true)
}

impl UserStore for UserRepository {
    fn get_profile(&self, user_id: &str) -> StorageResult<Option<UserProfile>> {
        let txn = self.db.read()?;
        let table = txn.open_table(USERS)?;
        get_doc(&table, user_id)
    }

    fn upsert_profile(
        &self,
        user_id: &str,
        date_of_birth: Option<NaiveDate>,
        gender: Option<String>,
    ) -> StorageResult<UserProfile> {
        let txn = self.db.write()?;
        let profile = {
            let mut table = txn.open_table(USERS)?;
            let mut profile: UserProfile = get_doc(&table, user_id)?
                .unwrap_or_else(|| UserProfile::new(user_id.to_string()));
            if date_of_birth.is_some() {
                profile.date_of_birth = date_of_birth;
            }
            if gender.is_some() {
                profile.gender = gender;
            }
            profile.updated_at = Utc::now();
            put_doc(&mut table, user_id, &profile)?;
            profile
        };
        txn.commit()?;
        Ok(profile)
    }

    fn create_session(&self, session: &SurveySession) -> StorageResult<()> {
        let txn = self.db.write()?;
        {
            let mut table = txn.open_table(SESSIONS)?;
            if get_doc::<SurveySession>(&table, &session.id)?.is_some() {
                return Err(StorageError::AlreadyExists(format!("Session {}", session.id)));
            }
            put_doc(&mut table, &session.id, session)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn get_session(&self, session_id: &str) -> StorageResult<Option<SurveySession>> {
        let txn = self.db.read()?;
        let table = txn.open_table(SESSIONS)?;
        get_doc(&table, session_id)
    }

    fn settle_session(
        &self,
        session_id: &str,
        outcome: &SessionOutcome,
        credit: Option<&WalletTransaction>,
    ) -> StorageResult<Settlement> {
        let txn = self.db.write()?;
        let session = apply_outcome(&txn, session_id, outcome)?;
        let credited = match credit {
            Some(entry) => apply_credit(&txn, entry)?,
            None => false,
        };
        txn.commit()?;
        Ok(Settlement { session, credited })
    }

    fn record_outcome(
        &self,
        session_id: &str,
        outcome: &SessionOutcome,
    ) -> StorageResult<SurveySession> {
        let txn = self.db.write()?;
        let session = apply_outcome(&txn, session_id, outcome)?;
        txn.commit()?;
        Ok(session)
    }

    fn credit_wallet(&self, entry: &WalletTransaction) -> StorageResult<bool> {
        let txn = self.db.write()?;
        let credited = apply_credit(&txn, entry)?;
        txn.commit()?;
        Ok(credited)
    }

    fn uncredited_completions(&self) -> StorageResult<Vec<SurveySession>> {
        let txn = self.db.read()?;
        let awaiting = txn.open_table(SESSIONS_AWAITING_CREDIT)?;
        let sessions = txn.open_table(SESSIONS)?;
        let by_session = txn.open_table(WALLET_TX_BY_SESSION)?;

        let mut pending_credit = Vec::new();
        for entry in awaiting.iter()? {
            let (key, _) = entry?;
            let session_id = key.value();
            if index_get(&by_session, session_id)?.is_some() {
                continue;
            }
            if let Some(session) = get_doc::<SurveySession>(&sessions, session_id)? {
                if session.is_payable() {
                    pending_credit.push(session);
                }
            }
        }
        Ok(pending_credit)
    }

    fn get_eligibility(
        &self,
        user_id: &str,
        provider_id: &str,
    ) -> StorageResult<Option<UserSurveyEligibility>> {
        let txn = self.db.read()?;
        let table = txn.open_table(ELIGIBILITY)?;
        get_doc(&table, &composite_key(user_id, provider_id))
    }

    fn upsert_eligibility(&self, row: &UserSurveyEligibility) -> StorageResult<()> {
        let key = composite_key(&row.user_id, &row.provider_id);
        let txn = self.db.write()?;
        {
            let mut table = txn.open_table(ELIGIBILITY)?;
            let mut row = row.clone();
            if let Some(existing) = get_doc::<UserSurveyEligibility>(&table, &key)? {
                row.id = existing.id;
            }
            put_doc(&mut table, &key, &row)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn list_wallet_transactions(&self, user_id: &str) -> StorageResult<Vec<WalletTransaction>> {
        let txn = self.db.read()?;
        let table = txn.open_table(WALLET_TXS)?;
        let mut entries: Vec<WalletTransaction> = all_docs::<WalletTransaction>(&table)?
            .into_iter()
            .filter(|tx| tx.user_id == user_id)
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }
}
