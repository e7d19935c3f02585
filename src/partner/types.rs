// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Partner marketplace payloads.
//!
//! `Api*` types mirror the partner's JSON. Missing or `null` fields default
//! instead of failing the whole page. [`EligibleBid`] is the normalized shape
//! the rest of the service works with, for both the bid listing and the
//! eligibility endpoint.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Largest `page_size` the partner accepts on the bid listing.
pub const MAX_PAGE_SIZE: u32 = 20;

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiQuotaQualification {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub response_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiQuotaStatistics {
    #[serde(default)]
    pub length_of_interview: Option<i64>,
    #[serde(default)]
    pub num_available: Option<i64>,
    #[serde(default)]
    pub num_completes: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiQuota {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub cost_per_interview: Option<i64>,
    #[serde(default)]
    pub qualifications: Option<Vec<ApiQuotaQualification>>,
    #[serde(default)]
    pub statistics: Option<ApiQuotaStatistics>,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiBidStatistics {
    #[serde(default)]
    pub length_of_interview: Option<i64>,
    #[serde(default)]
    pub num_available: Option<i64>,
    #[serde(default)]
    pub incidence_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiBid {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub country_id: Option<String>,
    #[serde(default)]
    pub language_ids: Option<Vec<String>>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub survey_type: Option<String>,
    #[serde(default)]
    pub quotas: Option<Vec<ApiQuota>>,
    #[serde(default)]
    pub statistics: Option<ApiBidStatistics>,
}

/// `GET /v1/supplier/bids` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiBidsResponse {
    #[serde(default)]
    pub bids: Option<Vec<ApiBid>>,
    #[serde(default)]
    pub pagination_token: Option<String>,
}

/// `POST /v1/supplier/eligibility` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiEligibilityResponse {
    #[serde(default)]
    pub eligible_bids: Option<Vec<ApiBid>>,
}

/// `GET /v1/lookup/public-key` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiPublicKeyResponse {
    #[serde(default)]
    pub public_key: Option<String>,
}

/// One `{question_id, answers}` pair of an eligibility request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiQualificationAnswer {
    pub question_id: String,
    pub answers: Vec<String>,
}

/// `POST /v1/supplier/eligibility` request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiEligibilityRequest {
    pub qualifications: Vec<ApiQualificationAnswer>,
    pub bid_ids: Vec<String>,
}

// =============================================================================
// Normalized types
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BidStatistics {
    /// Length of interview in seconds.
    pub loi: i64,
    pub num_available: i64,
    pub incidence_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QuotaCriterion {
    pub question_id: String,
    pub answers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EligibleQuota {
    pub quota_id: String,
    /// Cost per interview in cents.
    pub cpi: i64,
    /// Length of interview in seconds.
    pub loi: i64,
    pub num_available: i64,
    pub num_completes: i64,
    pub is_open: bool,
    pub qualifications: Vec<QuotaCriterion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EligibleBid {
    pub bid_id: String,
    pub name: String,
    pub country: String,
    pub language_ids: Vec<String>,
    pub state: String,
    pub survey_type: String,
    pub statistics: BidStatistics,
    pub quotas: Vec<EligibleQuota>,
}

impl EligibleBid {
    /// Highest quota CPI, or 0 for a bid without quotas.
    pub fn max_cpi(&self) -> i64 {
        self.quotas.iter().map(|q| q.cpi).max().unwrap_or(0).max(0)
    }

    /// Longest quota LOI in seconds, or 0.
    pub fn max_loi(&self) -> i64 {
        self.quotas.iter().map(|q| q.loi).max().unwrap_or(0).max(0)
    }

    pub fn is_active(&self) -> bool {
        self.state == "active"
    }
}

impl From<ApiBid> for EligibleBid {
    fn from(bid: ApiBid) -> Self {
        let statistics = bid.statistics.unwrap_or_default();
        Self {
            bid_id: bid.id.unwrap_or_default(),
            name: bid.name.unwrap_or_default(),
            country: bid.country_id.unwrap_or_default(),
            language_ids: bid.language_ids.unwrap_or_default(),
            state: bid.state.unwrap_or_default().to_ascii_lowercase(),
            survey_type: bid.survey_type.unwrap_or_default(),
            statistics: BidStatistics {
                loi: statistics.length_of_interview.unwrap_or(0),
                num_available: statistics.num_available.unwrap_or(0),
                incidence_rate: statistics.incidence_rate.unwrap_or(0.0),
            },
            quotas: bid
                .quotas
                .unwrap_or_default()
                .into_iter()
                .map(EligibleQuota::from)
                .collect(),
        }
    }
}

impl From<ApiQuota> for EligibleQuota {
    fn from(quota: ApiQuota) -> Self {
        let statistics = quota.statistics.unwrap_or_default();
        Self {
            quota_id: quota.id.unwrap_or_default(),
            cpi: quota.cost_per_interview.unwrap_or(0),
            loi: statistics.length_of_interview.unwrap_or(0),
            num_available: statistics.num_available.unwrap_or(0),
            num_completes: statistics.num_completes.unwrap_or(0),
            is_open: quota
                .state
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case("active")),
            qualifications: quota
                .qualifications
                .unwrap_or_default()
                .into_iter()
                .map(|q| QuotaCriterion {
                    question_id: q.id.unwrap_or_default(),
                    answers: q.response_ids.unwrap_or_default(),
                })
                .collect(),
        }
    }
}

/// Filters for one page of the bid listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BidQuery {
    pub page_size: Option<u32>,
    pub pagination_token: Option<String>,
    pub state: Option<String>,
    pub country_id: Option<String>,
    pub minimum_cpi_cents: Option<i64>,
}

impl BidQuery {
    /// Requested page size capped at [`MAX_PAGE_SIZE`].
    pub fn effective_page_size(&self) -> u32 {
        self.page_size.unwrap_or(MAX_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }
}

/// One page of normalized bids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BidPage {
    pub bids: Vec<EligibleBid>,
    /// Absent on the last page.
    pub pagination_token: Option<String>,
}

/// Partner gender code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum GenderCode {
    M,
    F,
    O,
}

impl GenderCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenderCode::M => "M",
            GenderCode::F => "F",
            GenderCode::O => "O",
        }
    }
}

/// Demographics sent to the eligibility endpoint and the entry URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserQualifications {
    pub age: u32,
    pub gender: GenderCode,
}

impl UserQualifications {
    /// Eligibility request form: `age` and `gender` questions.
    pub fn to_answers(&self) -> Vec<ApiQualificationAnswer> {
        vec![
            ApiQualificationAnswer {
                question_id: "age".to_string(),
                answers: vec![self.age.to_string()],
            },
            ApiQualificationAnswer {
                question_id: "gender".to_string(),
                answers: vec![self.gender.as_str().to_string()],
            },
        ]
    }

    /// Entry URL form: `age,<n>,gender,<M|F|O>`.
    pub fn to_entry_string(&self) -> String {
        format!("age,{},gender,{}", self.age, self.gender.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_bid_is_normalized() {
        let raw = serde_json::json!({
            "id": "bid-1",
            "name": "Coffee habits",
            "country_id": "us",
            "language_ids": ["en"],
            "state": "ACTIVE",
            "survey_type": "ad_hoc",
            "statistics": { "length_of_interview": 600, "num_available": 40, "incidence_rate": 0.35 },
            "quotas": [{
                "id": "quota-1",
                "cost_per_interview": 325,
                "state": "active",
                "statistics": { "length_of_interview": 540, "num_available": 12, "num_completes": 3 },
                "qualifications": [{ "id": "gender", "response_ids": ["1", "2"], "scope": "bid" }]
            }, {
                "id": "quota-2",
                "cost_per_interview": 150,
                "state": "paused"
            }]
        });

        let bid: EligibleBid = serde_json::from_value::<ApiBid>(raw).unwrap().into();
        assert_eq!(bid.bid_id, "bid-1");
        assert_eq!(bid.country, "us");
        assert_eq!(bid.state, "active");
        assert!(bid.is_active());
        assert_eq!(bid.statistics.loi, 600);
        assert_eq!(bid.max_cpi(), 325);
        assert_eq!(bid.max_loi(), 540);

        let q1 = &bid.quotas[0];
        assert_eq!(q1.quota_id, "quota-1");
        assert_eq!(q1.num_available, 12);
        assert_eq!(q1.num_completes, 3);
        assert!(q1.is_open);
        assert_eq!(q1.qualifications[0].question_id, "gender");
        assert_eq!(q1.qualifications[0].answers, vec!["1", "2"]);

        let q2 = &bid.quotas[1];
        assert!(!q2.is_open);
        assert_eq!(q2.loi, 0);
        assert!(q2.qualifications.is_empty());
    }

    #[test]
    fn nulls_and_missing_fields_default() {
        let raw = serde_json::json!({ "id": null, "quotas": null, "statistics": null });
        let bid: EligibleBid = serde_json::from_value::<ApiBid>(raw).unwrap().into();
        assert_eq!(bid.bid_id, "");
        assert!(bid.quotas.is_empty());
        assert_eq!(bid.max_cpi(), 0);
        assert!(!bid.is_active());
    }

    #[test]
    fn page_size_is_capped() {
        assert_eq!(BidQuery::default().effective_page_size(), 20);
        let query = BidQuery {
            page_size: Some(100),
            ..Default::default()
        };
        assert_eq!(query.effective_page_size(), 20);
        let query = BidQuery {
            page_size: Some(5),
            ..Default::default()
        };
        assert_eq!(query.effective_page_size(), 5);
    }

    #[test]
    fn qualification_forms() {
        let user = UserQualifications {
            age: 34,
            gender: GenderCode::F,
        };
        assert_eq!(user.to_entry_string(), "age,34,gender,F");

        let body = serde_json::to_value(ApiEligibilityRequest {
            qualifications: user.to_answers(),
            bid_ids: vec!["b1".into()],
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "qualifications": [
                    { "question_id": "age", "answers": ["34"] },
                    { "question_id": "gender", "answers": ["F"] }
                ],
                "bid_ids": ["b1"]
            })
        );
    }
}
