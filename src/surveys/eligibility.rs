// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-user eligibility lookups with a stored TTL cache.
//!
//! A cached row for `(user, provider)` is served while
//! `now - fetched_at < eligibility_cache_ttl_secs`. Otherwise the partner's
//! eligibility endpoint is called with the user's age and gender and the
//! provider's active surveys at or above its minimum CPI, and the row is
//! replaced. Freshness lives entirely in the stored `fetched_at`.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info};
use utoipa::ToSchema;

use super::sync::loi_minutes;
use crate::partner::client::{PartnerConnector, PartnerError};
use crate::partner::types::{EligibleBid, EligibleQuota, GenderCode, UserQualifications};
use crate::storage::{
    BestBid, ProviderStore, StorageError, SurveyStore, UserProfile, UserStore,
    UserSurveyEligibility,
};

#[derive(Debug, thiserror::Error)]
pub enum EligibilityError {
    #[error("provider {0} not found")]
    ProviderNotFound(String),

    #[error(transparent)]
    Partner(#[from] PartnerError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Summary of one eligible bid.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct BidSummary {
    pub bid_id: String,
    /// Highest quota CPI in cents.
    pub cpi_cents: i64,
    /// Longest quota LOI in minutes.
    pub loi_minutes: Option<i64>,
}

/// Eligibility of a user for one provider's surveys.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct EligibilityResult {
    pub provider_id: String,
    pub has_eligible_surveys: bool,
    pub surveys: Vec<BidSummary>,
    pub best_bid: Option<BestBid>,
    /// When the partner was last asked. Absent if it was not asked.
    pub fetched_at: Option<DateTime<Utc>>,
    pub from_cache: bool,
}

impl EligibilityResult {
    fn empty(provider_id: &str) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            has_eligible_surveys: false,
            surveys: Vec::new(),
            best_bid: None,
            fetched_at: None,
            from_cache: false,
        }
    }

    fn from_row(row: &UserSurveyEligibility, from_cache: bool) -> Self {
        Self {
            provider_id: row.provider_id.clone(),
            has_eligible_surveys: !row.eligible_bids.is_empty(),
            surveys: row.eligible_bids.iter().map(summarize).collect(),
            best_bid: row.best_bid.clone(),
            fetched_at: Some(row.fetched_at),
            from_cache,
        }
    }
}

fn summarize(bid: &EligibleBid) -> BidSummary {
    BidSummary {
        bid_id: bid.bid_id.clone(),
        cpi_cents: bid.max_cpi(),
        loi_minutes: loi_minutes(bid.max_loi()),
    }
}

/// Whole years between `date_of_birth` and `today`.
pub fn calculate_age(date_of_birth: NaiveDate, today: NaiveDate) -> u32 {
    let mut age = today.year() - date_of_birth.year();
    if (today.month(), today.day()) < (date_of_birth.month(), date_of_birth.day()) {
        age -= 1;
    }
    age.max(0) as u32
}

/// Map a free-form gender to the partner's code.
pub fn map_gender(gender: &str) -> GenderCode {
    let gender = gender.trim();
    if gender.eq_ignore_ascii_case("male") || gender.eq_ignore_ascii_case("m") {
        GenderCode::M
    } else if gender.eq_ignore_ascii_case("female") || gender.eq_ignore_ascii_case("f") {
        GenderCode::F
    } else {
        GenderCode::O
    }
}

/// Demographics of a profile, if both date of birth and gender are known.
pub fn qualifications_for(profile: &UserProfile, today: NaiveDate) -> Option<UserQualifications> {
    let date_of_birth = profile.date_of_birth?;
    let gender = profile.gender.as_deref().filter(|g| !g.trim().is_empty())?;
    Some(UserQualifications {
        age: calculate_age(date_of_birth, today),
        gender: map_gender(gender),
    })
}

/// User share of a CPI, rounded down.
pub fn user_payout(cpi_cents: i64, payout_pct: u32) -> i64 {
    (cpi_cents * i64::from(payout_pct)).div_euclid(100)
}

/// Highest-CPI quota across all bids. Ties keep the first quota seen.
pub fn find_best_bid(bids: &[EligibleBid], payout_pct: u32) -> Option<BestBid> {
    let mut best: Option<(&EligibleBid, &EligibleQuota)> = None;
    for bid in bids {
        for quota in &bid.quotas {
            if best.is_none_or(|(_, top)| quota.cpi > top.cpi) {
                best = Some((bid, quota));
            }
        }
    }

    best.map(|(bid, quota)| BestBid {
        bid_id: bid.bid_id.clone(),
        quota_id: quota.quota_id.clone(),
        cpi_cents: quota.cpi,
        payout_cents: user_payout(quota.cpi, payout_pct),
        estimated_minutes: loi_minutes(quota.loi).unwrap_or(0),
    })
}

/// `true` while the row is younger than the TTL. A TTL beyond the
/// representable range never expires.
pub fn is_cache_fresh(fetched_at: DateTime<Utc>, ttl_secs: i64, now: DateTime<Utc>) -> bool {
    match Duration::try_seconds(ttl_secs) {
        Some(ttl) => now - fetched_at < ttl,
        None => true,
    }
}

/// Eligibility lookups backed by the stored cache rows.
#[derive(Clone)]
pub struct EligibilityCache {
    providers: Arc<dyn ProviderStore>,
    surveys: Arc<dyn SurveyStore>,
    users: Arc<dyn UserStore>,
    connector: Arc<dyn PartnerConnector>,
}

impl EligibilityCache {
    pub fn new(
        providers: Arc<dyn ProviderStore>,
        surveys: Arc<dyn SurveyStore>,
        users: Arc<dyn UserStore>,
        connector: Arc<dyn PartnerConnector>,
    ) -> Self {
        Self {
            providers,
            surveys,
            users,
            connector,
        }
    }

    pub async fn get_eligibility(
        &self,
        user_id: &str,
        provider_id: &str,
        force_refresh: bool,
    ) -> Result<EligibilityResult, EligibilityError> {
        let provider = self
            .providers
            .get(provider_id)?
            .filter(|p| p.is_active)
            .ok_or_else(|| EligibilityError::ProviderNotFound(provider_id.to_string()))?;

        let now = Utc::now();
        if !force_refresh {
            if let Some(row) = self.users.get_eligibility(user_id, provider_id)? {
                if is_cache_fresh(row.fetched_at, provider.eligibility_cache_ttl_secs, now) {
                    debug!(user_id, provider_id, "Serving cached eligibility");
                    return Ok(EligibilityResult::from_row(&row, true));
                }
            }
        }

        let profile = self.users.get_profile(user_id)?;
        let Some(qualifications) = profile
            .as_ref()
            .and_then(|p| qualifications_for(p, now.date_naive()))
        else {
            debug!(user_id, "Profile lacks date of birth or gender");
            return Ok(EligibilityResult::empty(provider_id));
        };

        let candidates: Vec<String> = self
            .surveys
            .list_active_with_min_cpi(provider_id, provider.min_cpi_cents)?
            .into_iter()
            .map(|s| s.external_bid_id)
            .collect();
        if candidates.is_empty() {
            debug!(provider_id, "No active surveys above the minimum CPI");
            return Ok(EligibilityResult::empty(provider_id));
        }

        let api = self.connector.connect(&provider)?;
        let eligible_bids = api.check_eligibility(&qualifications, &candidates).await?;
        let best_bid = find_best_bid(&eligible_bids, provider.user_payout_pct);

        let row = UserSurveyEligibility {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            provider_id: provider_id.to_string(),
            eligible_bids,
            best_bid,
            fetched_at: now,
        };
        self.users.upsert_eligibility(&row)?;

        info!(
            user_id,
            provider_id,
            candidates = candidates.len(),
            eligible = row.eligible_bids.len(),
            "Refreshed eligibility"
        );
        Ok(EligibilityResult::from_row(&row, false))
    }
}
