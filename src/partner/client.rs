// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP client for the partner survey marketplace.
//!
//! ## Endpoints
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | GET | `/v1/supplier/bids` | paginated bid listing |
//! | POST | `/v1/supplier/eligibility` | eligible bids for a user |
//! | GET | `/v1/lookup/public-key` | partner's callback signing key |
//! | POST | `/v1/user/public-keys` | register our entry-URL signing key |
//! | PUT | `/v1/user/redirect-urls/{status}` | per-outcome callback URL |
//!
//! Every call carries `Authorization: Bearer <credential>` and the bounded
//! timeout from `PARTNER_TIMEOUT_SECS`. Calls are logged with method, path,
//! status and elapsed time. Credentials never reach the log.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Method};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{info, warn};
use url::Url;

use super::types::{
    ApiBidsResponse, ApiEligibilityRequest, ApiEligibilityResponse, ApiPublicKeyResponse, BidPage,
    BidQuery, EligibleBid, UserQualifications,
};
use crate::crypto::CredentialVault;
use crate::storage::Provider;

const BIDS_PATH: &str = "/v1/supplier/bids";
const ELIGIBILITY_PATH: &str = "/v1/supplier/eligibility";
const PUBLIC_KEY_PATH: &str = "/v1/lookup/public-key";
const REGISTER_KEY_PATH: &str = "/v1/user/public-keys";
const REDIRECT_URLS_PATH: &str = "/v1/user/redirect-urls";

/// Query parameters whose values are masked in logs.
const SENSITIVE_QUERY_PARAMS: &[&str] = &["api_key", "token", "key", "secret"];

#[derive(Debug, thiserror::Error)]
pub enum PartnerError {
    #[error("partner configuration missing: {0}")]
    MissingConfig(String),

    #[error("partner credential unusable: {0}")]
    Credential(String),

    #[error("partner request failed: {0}")]
    Request(String),

    #[error("partner {endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("partner response was invalid: {0}")]
    InvalidResponse(String),
}

/// Partner marketplace operations used by the engines.
#[async_trait]
pub trait PartnerApi: Send + Sync {
    async fn fetch_bids_page(&self, query: &BidQuery) -> Result<BidPage, PartnerError>;

    async fn check_eligibility(
        &self,
        user: &UserQualifications,
        bid_ids: &[String],
    ) -> Result<Vec<EligibleBid>, PartnerError>;

    async fn fetch_public_key(&self) -> Result<String, PartnerError>;

    async fn register_public_key(&self, public_key: &str) -> Result<(), PartnerError>;

    /// `outcome` is a session status or `default`.
    async fn set_redirect_url(&self, outcome: &str, url: &str) -> Result<(), PartnerError>;
}

/// Builds a [`PartnerApi`] for a provider's stored configuration.
pub trait PartnerConnector: Send + Sync {
    fn connect(&self, provider: &Provider) -> Result<Arc<dyn PartnerApi>, PartnerError>;
}

/// Follow pagination tokens until the partner omits one. A token seen
/// before means the partner is cycling and fails the listing.
pub async fn fetch_all_bids(
    api: &dyn PartnerApi,
    query: &BidQuery,
) -> Result<Vec<EligibleBid>, PartnerError> {
    let mut all_bids = Vec::new();
    let mut seen_tokens = HashSet::new();
    let mut query = BidQuery {
        page_size: Some(query.effective_page_size()),
        pagination_token: None,
        ..query.clone()
    };

    loop {
        let page = api.fetch_bids_page(&query).await?;
        all_bids.extend(page.bids);

        match page.pagination_token.filter(|t| !t.is_empty()) {
            Some(token) if !seen_tokens.insert(token.clone()) => {
                return Err(PartnerError::InvalidResponse(format!(
                    "pagination token {token} repeated"
                )));
            }
            Some(token) => query.pagination_token = Some(token),
            None => break,
        }
    }

    Ok(all_bids)
}

// =============================================================================
// HTTP implementation
// =============================================================================

/// Connector that decrypts the provider credential and builds an HTTP client.
#[derive(Clone)]
pub struct HttpPartnerConnector {
    vault: Arc<CredentialVault>,
    http: Client,
}

impl HttpPartnerConnector {
    pub fn new(vault: Arc<CredentialVault>, timeout: Duration) -> Result<Self, PartnerError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PartnerError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { vault, http })
    }
}

impl PartnerConnector for HttpPartnerConnector {
    fn connect(&self, provider: &Provider) -> Result<Arc<dyn PartnerApi>, PartnerError> {
        let base_url = provider
            .api_base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                PartnerError::MissingConfig(format!("provider {} has no API base URL", provider.slug))
            })?;
        let blob = provider
            .api_credential_encrypted
            .as_deref()
            .filter(|blob| !blob.is_empty())
            .ok_or_else(|| {
                PartnerError::MissingConfig(format!("provider {} has no API credential", provider.slug))
            })?;
        let api_key = self
            .vault
            .decrypt(blob)
            .map_err(|e| PartnerError::Credential(e.to_string()))?;

        Ok(Arc::new(PartnerClient {
            provider_id: provider.id.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            http: self.http.clone(),
        }))
    }
}

/// reqwest client bound to one provider.
pub struct PartnerClient {
    provider_id: String,
    base_url: String,
    api_key: SecretString,
    http: Client,
}

impl PartnerClient {
    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url, PartnerError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| PartnerError::MissingConfig(format!("invalid API base URL: {e}")))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, PartnerError> {
        let url = self.url(path, query)?;
        let logged_url = redact_url(&url);
        let started = Instant::now();

        let mut request = self
            .http
            .request(method.clone(), url)
            .bearer_auth(self.api_key.expose_secret());
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            warn!(
                provider_id = %self.provider_id,
                method = %method,
                endpoint = %path,
                url = %logged_url,
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %e,
                "Partner request failed"
            );
            PartnerError::Request(format!("{method} {path} failed: {e}"))
        })?;

        let status = response.status();
        info!(
            provider_id = %self.provider_id,
            method = %method,
            endpoint = %path,
            url = %logged_url,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Partner request"
        );

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PartnerError::Status {
                endpoint: format!("{method} {path}"),
                status: status.as_u16(),
                body: truncate(&body, 512),
            });
        }

        Ok(response)
    }

    async fn json<T: DeserializeOwned>(
        response: reqwest::Response,
        path: &str,
    ) -> Result<T, PartnerError> {
        response
            .json()
            .await
            .map_err(|e| PartnerError::InvalidResponse(format!("{path} invalid JSON: {e}")))
    }
}

#[async_trait]
impl PartnerApi for PartnerClient {
    async fn fetch_bids_page(&self, query: &BidQuery) -> Result<BidPage, PartnerError> {
        let mut params = vec![("page_size", query.effective_page_size().to_string())];
        if let Some(token) = &query.pagination_token {
            params.push(("pagination_token", token.clone()));
        }
        if let Some(state) = &query.state {
            params.push(("state", state.clone()));
        }
        if let Some(country) = &query.country_id {
            params.push(("country_id", country.clone()));
        }
        if let Some(min_cpi) = query.minimum_cpi_cents.filter(|c| *c > 0) {
            params.push(("minimum_cost_per_interview", min_cpi.to_string()));
        }

        let response = self.send(Method::GET, BIDS_PATH, &params, None).await?;
        let body: ApiBidsResponse = Self::json(response, BIDS_PATH).await?;

        Ok(BidPage {
            bids: body
                .bids
                .unwrap_or_default()
                .into_iter()
                .map(EligibleBid::from)
                .collect(),
            pagination_token: body.pagination_token.filter(|t| !t.is_empty()),
        })
    }

    async fn check_eligibility(
        &self,
        user: &UserQualifications,
        bid_ids: &[String],
    ) -> Result<Vec<EligibleBid>, PartnerError> {
        let request = ApiEligibilityRequest {
            qualifications: user.to_answers(),
            bid_ids: bid_ids.to_vec(),
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| PartnerError::Request(format!("serialize body failed: {e}")))?;

        let response = self
            .send(Method::POST, ELIGIBILITY_PATH, &[], Some(body))
            .await?;
        let body: ApiEligibilityResponse = Self::json(response, ELIGIBILITY_PATH).await?;

        Ok(body
            .eligible_bids
            .unwrap_or_default()
            .into_iter()
            .map(EligibleBid::from)
            .collect())
    }

    async fn fetch_public_key(&self) -> Result<String, PartnerError> {
        let response = self.send(Method::GET, PUBLIC_KEY_PATH, &[], None).await?;
        let body: ApiPublicKeyResponse = Self::json(response, PUBLIC_KEY_PATH).await?;
        body.public_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                PartnerError::InvalidResponse("missing public_key in response".to_string())
            })
    }

    async fn register_public_key(&self, public_key: &str) -> Result<(), PartnerError> {
        self.send(
            Method::POST,
            REGISTER_KEY_PATH,
            &[],
            Some(json!({ "public_key": public_key })),
        )
        .await?;
        Ok(())
    }

    async fn set_redirect_url(&self, outcome: &str, url: &str) -> Result<(), PartnerError> {
        let path = format!("{REDIRECT_URLS_PATH}/{outcome}");
        self.send(Method::PUT, &path, &[], Some(json!({ "url": url })))
            .await?;
        Ok(())
    }
}

/// Render a URL for logging with sensitive query values masked.
pub fn redact_url(url: &Url) -> String {
    let mut redacted = url.clone();
    if url.query().is_some() {
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(name, value)| {
                let sensitive = SENSITIVE_QUERY_PARAMS
                    .iter()
                    .any(|s| name.eq_ignore_ascii_case(s));
                let value = if sensitive {
                    "[REDACTED]".to_string()
                } else {
                    value.into_owned()
                };
                (name.into_owned(), value)
            })
            .collect();
        redacted.query_pairs_mut().clear().extend_pairs(pairs);
    }
    redacted.to_string()
}

fn truncate(body: &str, max_chars: usize) -> String {
    if body.chars().count() <= max_chars {
        return body.to_string();
    }
    let mut cut: String = body.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}
