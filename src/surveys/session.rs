// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Survey Sessions
//!
//! Session lifecycle from the user's click to wallet settlement.
//!
//! ## Start
//!
//! The provider's sealed signing key is decrypted and the signed entry URL
//! is built before the `pending` row is written, so a broken key never leaves
//! an orphan session behind. Sessions expire 24 hours after the click.
//!
//! ## Completion
//!
//! The partner's redirect callback is verified against the partner's public
//! key (cached per provider, refetched once when a cached key rejects the
//! signature). A verified callback settles the session exactly once: status,
//! balance and ledger entry are written in one transaction. If that write
//! fails for a storage reason the outcome is recorded alone and the credit
//! is left to [`SessionOrchestrator::backfill_credits`].

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use super::eligibility::{qualifications_for, user_payout};
use crate::crypto::{CredentialVault, SigningError, VaultError};
use crate::partner::client::{PartnerConnector, PartnerError};
use crate::partner::key_cache::PartnerKeyCache;
use crate::partner::url_signing::{
    build_signed_entry_url, verify_redirect_signature, EntryUrlParams, RedirectParams,
};
use crate::storage::{
    Provider, ProviderStore, SessionOutcome, SessionStatus, StorageError, SurveySession,
    SurveyStore, UserStore, WalletTransaction,
};

/// Lifetime of a survey session.
pub const SESSION_TTL_HOURS: i64 = 24;

/// Ledger type of survey payouts.
pub const PAYOUT_TX_TYPE: &str = "survey_payout";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("provider {0} not found")]
    ProviderNotFound(String),

    #[error("survey {0} not found")]
    SurveyNotFound(String),

    #[error("quota {0} not found")]
    QuotaNotFound(String),

    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("user {0} has no date of birth or gender on file")]
    ProfileIncomplete(String),

    #[error("provider configuration incomplete: {0}")]
    MissingConfig(String),

    #[error("invalid redirect status: {0}")]
    InvalidStatus(String),

    #[error("invalid payout: {0}")]
    InvalidPayout(String),

    #[error("invalid redirect signature for session {0}")]
    InvalidSignature(String),

    #[error("session {0} is already settled")]
    AlreadySettled(String),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Partner(#[from] PartnerError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A freshly started session.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StartedSession {
    pub session_id: String,
    pub entry_url: String,
    pub expires_at: DateTime<Utc>,
    pub expected_payout_cents: i64,
}

/// A settled session.
#[derive(Debug, Clone)]
pub struct CompletedSession {
    pub session: SurveySession,
    /// Whether the wallet was credited by this callback.
    pub credited: bool,
}

/// Format cents as a signed currency amount, e.g. `250 -> "2.50"`.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

fn payout_entry(session: &SurveySession, payout_cents: i64) -> WalletTransaction {
    WalletTransaction {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: session.user_id.clone(),
        session_id: Some(session.id.clone()),
        amount_cents: payout_cents,
        amount: format_cents(payout_cents),
        tx_type: PAYOUT_TX_TYPE.to_string(),
        description: "Partner survey completion".to_string(),
        metadata: json!({
            "bid_id": session.bid_id,
            "external_payout_cents": payout_cents,
        }),
        created_at: Utc::now(),
    }
}

fn parse_status(raw: &str) -> Result<SessionStatus, SessionError> {
    match raw.parse::<SessionStatus>() {
        Ok(status) if status.is_terminal() => Ok(status),
        _ => Err(SessionError::InvalidStatus(raw.to_string())),
    }
}

fn parse_payout(raw: Option<&str>) -> Result<Option<i64>, SessionError> {
    match raw.map(str::trim).filter(|p| !p.is_empty()) {
        None => Ok(None),
        Some(p) => match p.parse::<i64>() {
            Ok(cents) if cents >= 0 => Ok(Some(cents)),
            _ => Err(SessionError::InvalidPayout(p.to_string())),
        },
    }
}

fn required<'a>(
    value: Option<&'a str>,
    what: &str,
    provider: &Provider,
) -> Result<&'a str, SessionError> {
    value.filter(|v| !v.trim().is_empty()).ok_or_else(|| {
        SessionError::MissingConfig(format!("provider {} has no {what}", provider.slug))
    })
}

/// Survey session workflow.
#[derive(Clone)]
pub struct SessionOrchestrator {
    providers: Arc<dyn ProviderStore>,
    surveys: Arc<dyn SurveyStore>,
    users: Arc<dyn UserStore>,
    vault: Arc<CredentialVault>,
    connector: Arc<dyn PartnerConnector>,
    partner_keys: Arc<PartnerKeyCache>,
}

impl SessionOrchestrator {
    pub fn new(
        providers: Arc<dyn ProviderStore>,
        surveys: Arc<dyn SurveyStore>,
        users: Arc<dyn UserStore>,
        vault: Arc<CredentialVault>,
        connector: Arc<dyn PartnerConnector>,
        partner_keys: Arc<PartnerKeyCache>,
    ) -> Self {
        Self {
            providers,
            surveys,
            users,
            vault,
            connector,
            partner_keys,
        }
    }

    /// Open a pending session and return its signed entry URL.
    pub fn start_session(
        &self,
        user_id: &str,
        provider_id: &str,
        bid_id: &str,
        quota_id: Option<&str>,
    ) -> Result<StartedSession, SessionError> {
        let provider = self
            .providers
            .get(provider_id)?
            .filter(|p| p.is_active)
            .ok_or_else(|| SessionError::ProviderNotFound(provider_id.to_string()))?;

        let now = Utc::now();
        let qualifications = self
            .users
            .get_profile(user_id)?
            .as_ref()
            .and_then(|p| qualifications_for(p, now.date_naive()))
            .ok_or_else(|| SessionError::ProfileIncomplete(user_id.to_string()))?;

        let survey = self
            .surveys
            .find_by_bid(provider_id, bid_id)?
            .filter(|s| s.is_active)
            .ok_or_else(|| SessionError::SurveyNotFound(bid_id.to_string()))?;

        let cpi_at_click_cents = match quota_id {
            Some(quota_id) => {
                self.surveys
                    .list_quotas(&survey.id)?
                    .into_iter()
                    .find(|q| q.external_quota_id == quota_id)
                    .ok_or_else(|| SessionError::QuotaNotFound(quota_id.to_string()))?
                    .cpi_cents
            }
            None => survey.cpi_cents,
        };

        let supplier_id = required(provider.supplier_id.as_deref(), "supplier id", &provider)?;
        let entry_base_url = required(provider.entry_base_url(), "entry URL", &provider)?;
        let sealed_key = required(
            provider.signing_private_key_encrypted.as_deref(),
            "signing key",
            &provider,
        )?;
        let private_key = self.vault.decrypt(sealed_key)?;

        let session_id = uuid::Uuid::new_v4().to_string();
        let entry_url = build_signed_entry_url(
            &EntryUrlParams {
                bid_id: bid_id.to_string(),
                panelist_id: user_id.to_string(),
                supplier_id: supplier_id.to_string(),
                session_metadata: session_id.clone(),
                qualifications: qualifications.to_entry_string(),
            },
            &private_key,
            entry_base_url,
        )?;

        let session = SurveySession {
            id: session_id.clone(),
            user_id: user_id.to_string(),
            provider_id: provider_id.to_string(),
            bid_id: bid_id.to_string(),
            quota_id: quota_id.map(str::to_string),
            cpi_at_click_cents,
            expected_payout_cents: user_payout(cpi_at_click_cents, provider.user_payout_pct),
            actual_payout_cents: None,
            status: SessionStatus::Pending,
            status_detail: None,
            started_at: now,
            expires_at: now + Duration::hours(SESSION_TTL_HOURS),
            completed_at: None,
        };
        self.users.create_session(&session)?;

        info!(
            session_id = %session.id,
            user_id,
            provider_id,
            bid_id,
            cpi_cents = cpi_at_click_cents,
            "Started survey session"
        );

        Ok(StartedSession {
            session_id,
            entry_url,
            expires_at: session.expires_at,
            expected_payout_cents: session.expected_payout_cents,
        })
    }

    /// Verify a partner callback and settle its session.
    pub async fn complete_session(
        &self,
        params: &RedirectParams,
    ) -> Result<CompletedSession, SessionError> {
        let status = parse_status(&params.status)?;
        let payout = parse_payout(params.payout.as_deref())?;

        let session = self
            .users
            .get_session(&params.session)?
            .ok_or_else(|| SessionError::SessionNotFound(params.session.clone()))?;
        let provider = self
            .providers
            .get(&session.provider_id)?
            .ok_or_else(|| SessionError::ProviderNotFound(session.provider_id.clone()))?;

        if !self.verify_callback(&provider, params).await? {
            warn!(
                session_id = %session.id,
                provider_id = %provider.id,
                status = %params.status,
                "Rejected redirect with invalid signature"
            );
            return Err(SessionError::InvalidSignature(session.id));
        }

        if session.status.is_terminal() {
            return Err(SessionError::AlreadySettled(session.id));
        }

        let outcome = SessionOutcome {
            status,
            status_detail: params
                .status_detail_id
                .clone()
                .filter(|d| !d.is_empty()),
            actual_payout_cents: payout,
            completed_at: Utc::now(),
        };
        let credit = match payout {
            Some(cents) if status == SessionStatus::Complete && cents > 0 => {
                Some(payout_entry(&session, cents))
            }
            _ => None,
        };

        let completed = match self
            .users
            .settle_session(&session.id, &outcome, credit.as_ref())
        {
            Ok(settlement) => CompletedSession {
                session: settlement.session,
                credited: settlement.credited,
            },
            Err(StorageError::Conflict(_)) => return Err(SessionError::AlreadySettled(session.id)),
            Err(StorageError::NotFound(_)) => return Err(SessionError::SessionNotFound(session.id)),
            Err(e) if credit.is_some() => {
                error!(
                    session_id = %session.id,
                    error = %e,
                    "Settlement with wallet credit failed, recording outcome alone"
                );
                let session = match self.users.record_outcome(&session.id, &outcome) {
                    Ok(session) => session,
                    Err(StorageError::Conflict(_)) => {
                        return Err(SessionError::AlreadySettled(session.id))
                    }
                    Err(e) => return Err(e.into()),
                };
                CompletedSession {
                    session,
                    credited: false,
                }
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            session_id = %completed.session.id,
            user_id = %completed.session.user_id,
            status = %completed.session.status,
            payout_cents = ?completed.session.actual_payout_cents,
            credited = completed.credited,
            "Settled survey session"
        );
        Ok(completed)
    }

    /// Verify against the cached partner key. A rejection refetches the key
    /// at most once per refetch interval.
    async fn verify_callback(
        &self,
        provider: &Provider,
        params: &RedirectParams,
    ) -> Result<bool, SessionError> {
        if params.signature.as_deref().is_none_or(str::is_empty) {
            return Ok(false);
        }

        if let Some(cached) = self.partner_keys.get(&provider.id) {
            if verify_redirect_signature(params, &cached) {
                return Ok(true);
            }
            if !self.partner_keys.try_begin_refetch(&provider.id) {
                debug!(provider_id = %provider.id, "Partner key refetched recently, rejecting signature");
                return Ok(false);
            }
            debug!(provider_id = %provider.id, "Cached partner key rejected signature, refetching");
            self.partner_keys.invalidate(&provider.id);
        }

        let api = self.connector.connect(provider)?;
        let public_key = api.fetch_public_key().await?;
        self.partner_keys.put(&provider.id, public_key.clone());
        Ok(verify_redirect_signature(params, &public_key))
    }

    /// Credit completed sessions whose payout never reached the ledger.
    ///
    /// Returns the number of sessions credited.
    pub fn backfill_credits(&self) -> Result<usize, SessionError> {
        let mut credited = 0;
        for session in self.users.uncredited_completions()? {
            let Some(payout) = session.actual_payout_cents else {
                continue;
            };
            match self.users.credit_wallet(&payout_entry(&session, payout)) {
                Ok(true) => {
                    credited += 1;
                    info!(session_id = %session.id, payout_cents = payout, "Backfilled wallet credit");
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(session_id = %session.id, error = %e, "Wallet credit backfill failed");
                }
            }
        }
        Ok(credited)
    }
}
