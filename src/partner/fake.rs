// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Scripted in-memory partner for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::client::{PartnerApi, PartnerConnector, PartnerError};
use super::types::{
    BidPage, BidQuery, BidStatistics, EligibleBid, EligibleQuota, QuotaCriterion,
    UserQualifications,
};
use crate::storage::Provider;

/// Build an active bid whose quotas have the given CPIs (cents).
pub fn bid(bid_id: &str, quota_cpis: &[i64]) -> EligibleBid {
    EligibleBid {
        bid_id: bid_id.to_string(),
        name: format!("Survey {bid_id}"),
        country: "us".to_string(),
        language_ids: vec!["en".to_string()],
        state: "active".to_string(),
        survey_type: "ad_hoc".to_string(),
        statistics: BidStatistics {
            loi: 600,
            num_available: 100,
            incidence_rate: 0.5,
        },
        quotas: quota_cpis
            .iter()
            .enumerate()
            .map(|(i, cpi)| EligibleQuota {
                quota_id: format!("{bid_id}-q{i}"),
                cpi: *cpi,
                loi: 610,
                num_available: 50,
                num_completes: 5,
                is_open: true,
                qualifications: vec![
                    QuotaCriterion {
                        question_id: "age".to_string(),
                        answers: vec!["18".to_string(), "65".to_string()],
                    },
                    QuotaCriterion {
                        question_id: "gender".to_string(),
                        answers: vec!["M".to_string(), "F".to_string()],
                    },
                ],
            })
            .collect(),
    }
}

#[derive(Default)]
pub struct FakePartner {
    inventory: Mutex<Vec<EligibleBid>>,
    eligible: Mutex<Vec<EligibleBid>>,
    public_keys: Mutex<Vec<String>>,
    failure: Mutex<Option<u16>>,
    bid_queries: Mutex<Vec<BidQuery>>,
    eligibility_requests: Mutex<Vec<(UserQualifications, Vec<String>)>>,
    registered_keys: Mutex<Vec<String>>,
    redirect_urls: Mutex<Vec<(String, String)>>,
    public_key_calls: AtomicUsize,
}

impl FakePartner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Partner listing `count` single-quota bids named `bid-000`...
    pub fn with_inventory(count: usize) -> Self {
        let partner = Self::new();
        partner.set_inventory(
            (0..count)
                .map(|i| bid(&format!("bid-{i:03}"), &[300]))
                .collect(),
        );
        partner
    }

    pub fn set_inventory(&self, bids: Vec<EligibleBid>) {
        *self.inventory.lock().unwrap() = bids;
    }

    pub fn set_eligible(&self, bids: Vec<EligibleBid>) {
        *self.eligible.lock().unwrap() = bids;
    }

    /// Keys served by successive public-key lookups. The last one repeats.
    pub fn set_public_keys(&self, keys: Vec<String>) {
        *self.public_keys.lock().unwrap() = keys;
    }

    /// Make every call fail with the given HTTP status.
    pub fn fail_with(&self, status: u16) {
        *self.failure.lock().unwrap() = Some(status);
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn bid_page_calls(&self) -> usize {
        self.bid_queries.lock().unwrap().len()
    }

    pub fn bid_queries(&self) -> Vec<BidQuery> {
        self.bid_queries.lock().unwrap().clone()
    }

    pub fn eligibility_calls(&self) -> usize {
        self.eligibility_requests.lock().unwrap().len()
    }

    pub fn eligibility_requests(&self) -> Vec<(UserQualifications, Vec<String>)> {
        self.eligibility_requests.lock().unwrap().clone()
    }

    pub fn public_key_calls(&self) -> usize {
        self.public_key_calls.load(Ordering::SeqCst)
    }

    pub fn registered_keys(&self) -> Vec<String> {
        self.registered_keys.lock().unwrap().clone()
    }

    pub fn redirect_urls(&self) -> Vec<(String, String)> {
        self.redirect_urls.lock().unwrap().clone()
    }

    fn check_failure(&self, endpoint: &str) -> Result<(), PartnerError> {
        match *self.failure.lock().unwrap() {
            Some(status) => Err(PartnerError::Status {
                endpoint: endpoint.to_string(),
                status,
                body: "scripted failure".to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PartnerApi for FakePartner {
    async fn fetch_bids_page(&self, query: &BidQuery) -> Result<BidPage, PartnerError> {
        self.bid_queries.lock().unwrap().push(query.clone());
        self.check_failure("GET /v1/supplier/bids")?;

        let inventory = self.inventory.lock().unwrap();
        let start: usize = query
            .pagination_token
            .as_deref()
            .and_then(|t| t.parse().ok())
            .unwrap_or(0);
        let end = (start + query.effective_page_size() as usize).min(inventory.len());
        let bids = inventory.get(start..end).unwrap_or_default().to_vec();

        Ok(BidPage {
            bids,
            pagination_token: (end < inventory.len()).then(|| end.to_string()),
        })
    }

    async fn check_eligibility(
        &self,
        user: &UserQualifications,
        bid_ids: &[String],
    ) -> Result<Vec<EligibleBid>, PartnerError> {
        self.eligibility_requests
            .lock()
            .unwrap()
            .push((*user, bid_ids.to_vec()));
        self.check_failure("POST /v1/supplier/eligibility")?;
        Ok(self.eligible.lock().unwrap().clone())
    }

    async fn fetch_public_key(&self) -> Result<String, PartnerError> {
        let call = self.public_key_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure("GET /v1/lookup/public-key")?;

        let keys = self.public_keys.lock().unwrap();
        keys.get(call)
            .or_else(|| keys.last())
            .cloned()
            .ok_or_else(|| PartnerError::InvalidResponse("no public key scripted".to_string()))
    }

    async fn register_public_key(&self, public_key: &str) -> Result<(), PartnerError> {
        self.check_failure("POST /v1/user/public-keys")?;
        self.registered_keys
            .lock()
            .unwrap()
            .push(public_key.to_string());
        Ok(())
    }

    async fn set_redirect_url(&self, outcome: &str, url: &str) -> Result<(), PartnerError> {
        self.check_failure("PUT /v1/user/redirect-urls")?;
        self.redirect_urls
            .lock()
            .unwrap()
            .push((outcome.to_string(), url.to_string()));
        Ok(())
    }
}

/// Connector serving a scripted partner per provider id.
#[derive(Default)]
pub struct FakeConnector {
    partners: Mutex<HashMap<String, Arc<FakePartner>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, provider_id: &str, partner: Arc<FakePartner>) {
        self.partners
            .lock()
            .unwrap()
            .insert(provider_id.to_string(), partner);
    }
}

impl PartnerConnector for FakeConnector {
    fn connect(&self, provider: &Provider) -> Result<Arc<dyn PartnerApi>, PartnerError> {
        let partner = self
            .partners
            .lock()
            .unwrap()
            .get(&provider.id)
            .cloned()
            .ok_or_else(|| {
                PartnerError::MissingConfig(format!("provider {} has no API base URL", provider.slug))
            })?;
        Ok(partner)
    }
}
