// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Operator API endpoints for partner provisioning and inventory sync.
//!
//! These endpoints provide:
//! - Provider configuration (credentials are sealed before they are stored)
//! - Signing key rotation, key registration and redirect configuration
//! - Partner public key lookup
//! - Manual sync trigger, sync job history and the qualification legend

use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use url::Url;

use crate::{
    error::ApiError,
    state::AppState,
    storage::{ExternalSurvey, Provider, ProviderResponse, QualificationLegend, SyncJobLog},
    surveys::SyncSummary,
};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to create a provider.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProviderRequest {
    pub name: String,
    /// Unique lowercase identifier, e.g. `marketplace`.
    pub slug: String,
    pub api_base_url: Option<String>,
    /// Partner API credential. Sealed with the vault before it is stored.
    pub api_credential: Option<String>,
    pub supplier_id: Option<String>,
    pub prescreener_url: Option<String>,
    pub min_cpi_cents: Option<i64>,
    /// Share of the CPI credited to users (0-100).
    pub user_payout_pct: Option<u32>,
    pub eligibility_cache_ttl_secs: Option<i64>,
    pub is_active: Option<bool>,
}

/// Partial provider update. Absent fields are left unchanged.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateProviderRequest {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub api_base_url: Option<String>,
    pub api_credential: Option<String>,
    pub supplier_id: Option<String>,
    pub prescreener_url: Option<String>,
    pub min_cpi_cents: Option<i64>,
    pub user_payout_pct: Option<u32>,
    pub eligibility_cache_ttl_secs: Option<i64>,
    pub is_active: Option<bool>,
}

/// Response for provider list.
#[derive(Debug, Serialize, ToSchema)]
pub struct ProviderListResponse {
    pub providers: Vec<ProviderResponse>,
    pub total: usize,
}

/// Public half of a signing key pair.
#[derive(Debug, Serialize, ToSchema)]
pub struct PublicKeyResponse {
    /// Base64 Ed25519 public key.
    pub public_key: String,
}

/// Redirect URL per outcome (`default`, `complete`, `screenout`, ...).
#[derive(Debug, Deserialize, ToSchema)]
pub struct RedirectUrlsRequest {
    pub redirect_urls: BTreeMap<String, String>,
}

/// Query parameters for the sync job history.
#[derive(Debug, Deserialize, IntoParams)]
pub struct SyncJobsQuery {
    /// Maximum number of jobs (default 50, max 500).
    pub limit: Option<usize>,
}

/// Response for the sync job history.
#[derive(Debug, Serialize, ToSchema)]
pub struct SyncJobsResponse {
    /// Newest first.
    pub jobs: Vec<SyncJobLog>,
}

/// Response for the qualification legend.
#[derive(Debug, Serialize, ToSchema)]
pub struct LegendResponse {
    pub entries: Vec<QualificationLegend>,
}

/// Response for the synced inventory of a provider.
#[derive(Debug, Serialize, ToSchema)]
pub struct SurveyListResponse {
    pub surveys: Vec<ExternalSurvey>,
    pub total: usize,
}

const DEFAULT_JOB_LIMIT: usize = 50;
const MAX_JOB_LIMIT: usize = 500;

// ============================================================================
// Validation
// ============================================================================

fn validate_slug(slug: &str) -> Result<(), ApiError> {
    let valid = !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ApiError::bad_request(
            "slug must be non-empty lowercase letters, digits, '-' or '_'",
        ))
    }
}

fn validate_url(field: &str, value: &str) -> Result<(), ApiError> {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(ApiError::bad_request(format!(
            "{field} must be an absolute http(s) URL"
        ))),
    }
}

/// Empty strings clear optional fields.
fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Thirty days.
const MAX_ELIGIBILITY_CACHE_TTL_SECS: i64 = 30 * 24 * 60 * 60;

fn apply_thresholds(
    provider: &mut Provider,
    min_cpi_cents: Option<i64>,
    user_payout_pct: Option<u32>,
    eligibility_cache_ttl_secs: Option<i64>,
) -> Result<(), ApiError> {
    if let Some(min_cpi) = min_cpi_cents {
        if min_cpi < 0 {
            return Err(ApiError::bad_request("min_cpi_cents must not be negative"));
        }
        provider.min_cpi_cents = min_cpi;
    }
    if let Some(pct) = user_payout_pct {
        if pct > 100 {
            return Err(ApiError::bad_request(
                "user_payout_pct must be between 0 and 100",
            ));
        }
        provider.user_payout_pct = pct;
    }
    if let Some(ttl) = eligibility_cache_ttl_secs {
        if !(0..=MAX_ELIGIBILITY_CACHE_TTL_SECS).contains(&ttl) {
            return Err(ApiError::bad_request(format!(
                "eligibility_cache_ttl_secs must be between 0 and {MAX_ELIGIBILITY_CACHE_TTL_SECS}"
            )));
        }
        provider.eligibility_cache_ttl_secs = ttl;
    }
    Ok(())
}

fn apply_endpoints(
    state: &AppState,
    provider: &mut Provider,
    api_base_url: Option<String>,
    api_credential: Option<String>,
    supplier_id: Option<String>,
    prescreener_url: Option<String>,
) -> Result<(), ApiError> {
    if let Some(raw) = api_base_url {
        let value = optional(Some(raw));
        if let Some(url) = &value {
            validate_url("api_base_url", url)?;
        }
        provider.api_base_url = value;
    }
    if let Some(raw) = prescreener_url {
        let value = optional(Some(raw));
        if let Some(url) = &value {
            validate_url("prescreener_url", url)?;
        }
        provider.prescreener_url = value;
    }
    if let Some(raw) = supplier_id {
        provider.supplier_id = optional(Some(raw));
    }
    if let Some(raw) = api_credential {
        provider.api_credential_encrypted = match optional(Some(raw)) {
            Some(credential) => Some(state.vault.encrypt(&credential).map_err(ApiError::internal)?),
            None => None,
        };
    }
    Ok(())
}

fn load_provider(state: &AppState, provider_id: &str) -> Result<Provider, ApiError> {
    state
        .providers
        .get(provider_id)?
        .ok_or_else(|| ApiError::not_found(format!("Provider {provider_id} not found")))
}

// ============================================================================
// Provider Handlers
// ============================================================================

/// List all providers.
#[utoipa::path(
    get,
    path = "/v1/admin/providers",
    tag = "Admin",
    responses(
        (status = 200, description = "All providers", body = ProviderListResponse)
    )
)]
pub async fn list_providers(
    State(state): State<AppState>,
) -> Result<Json<ProviderListResponse>, ApiError> {
    let providers: Vec<ProviderResponse> = state
        .providers
        .list()?
        .iter()
        .map(ProviderResponse::from)
        .collect();
    let total = providers.len();
    Ok(Json(ProviderListResponse { providers, total }))
}

/// Create a provider.
///
/// The API credential is sealed with the vault. Responses only report
/// whether a credential or signing key is present.
#[utoipa::path(
    post,
    path = "/v1/admin/providers",
    tag = "Admin",
    request_body = CreateProviderRequest,
    responses(
        (status = 201, description = "Provider created", body = ProviderResponse),
        (status = 400, description = "Invalid provider configuration"),
        (status = 409, description = "Slug already in use")
    )
)]
pub async fn create_provider(
    State(state): State<AppState>,
    Json(request): Json<CreateProviderRequest>,
) -> Result<(StatusCode, Json<ProviderResponse>), ApiError> {
    let name = request.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }
    let slug = request.slug.trim().to_string();
    validate_slug(&slug)?;

    let mut provider = Provider::new(name, slug);
    apply_thresholds(
        &mut provider,
        request.min_cpi_cents,
        request.user_payout_pct,
        request.eligibility_cache_ttl_secs,
    )?;
    apply_endpoints(
        &state,
        &mut provider,
        request.api_base_url,
        request.api_credential,
        request.supplier_id,
        request.prescreener_url,
    )?;
    if let Some(active) = request.is_active {
        provider.is_active = active;
    }

    state.providers.create(&provider)?;
    info!(provider_id = %provider.id, slug = %provider.slug, "Provider created");

    Ok((StatusCode::CREATED, Json(ProviderResponse::from(&provider))))
}

/// Get a provider.
#[utoipa::path(
    get,
    path = "/v1/admin/providers/{provider_id}",
    tag = "Admin",
    params(("provider_id" = String, Path, description = "Provider ID")),
    responses(
        (status = 200, description = "Provider", body = ProviderResponse),
        (status = 404, description = "Provider not found")
    )
)]
pub async fn get_provider(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
) -> Result<Json<ProviderResponse>, ApiError> {
    let provider = load_provider(&state, &provider_id)?;
    Ok(Json(ProviderResponse::from(&provider)))
}

/// Update a provider.
#[utoipa::path(
    put,
    path = "/v1/admin/providers/{provider_id}",
    tag = "Admin",
    params(("provider_id" = String, Path, description = "Provider ID")),
    request_body = UpdateProviderRequest,
    responses(
        (status = 200, description = "Provider updated", body = ProviderResponse),
        (status = 400, description = "Invalid provider configuration"),
        (status = 404, description = "Provider not found"),
        (status = 409, description = "Slug already in use")
    )
)]
pub async fn update_provider(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    Json(request): Json<UpdateProviderRequest>,
) -> Result<Json<ProviderResponse>, ApiError> {
    let mut provider = load_provider(&state, &provider_id)?;

    if let Some(name) = request.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(ApiError::bad_request("name must not be empty"));
        }
        provider.name = name;
    }
    if let Some(slug) = request.slug {
        let slug = slug.trim().to_string();
        validate_slug(&slug)?;
        provider.slug = slug;
    }
    apply_thresholds(
        &mut provider,
        request.min_cpi_cents,
        request.user_payout_pct,
        request.eligibility_cache_ttl_secs,
    )?;
    apply_endpoints(
        &state,
        &mut provider,
        request.api_base_url,
        request.api_credential,
        request.supplier_id,
        request.prescreener_url,
    )?;
    if let Some(active) = request.is_active {
        provider.is_active = active;
    }

    state.providers.update(&provider)?;
    info!(provider_id = %provider.id, "Provider updated");

    let stored = load_provider(&state, &provider_id)?;
    Ok(Json(ProviderResponse::from(&stored)))
}

/// List the active synced surveys of a provider.
#[utoipa::path(
    get,
    path = "/v1/admin/providers/{provider_id}/surveys",
    tag = "Admin",
    params(("provider_id" = String, Path, description = "Provider ID")),
    responses(
        (status = 200, description = "Active surveys, highest CPI first", body = SurveyListResponse),
        (status = 404, description = "Provider not found")
    )
)]
pub async fn list_provider_surveys(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
) -> Result<Json<SurveyListResponse>, ApiError> {
    load_provider(&state, &provider_id)?;
    let surveys = state.surveys.list_active_with_min_cpi(&provider_id, 0)?;
    let total = surveys.len();
    Ok(Json(SurveyListResponse { surveys, total }))
}

// ============================================================================
// Provisioning Handlers
// ============================================================================

/// Generate a new signing key pair for a provider.
///
/// The private key is sealed and stored together with the public key.
/// Register the new public key with the partner afterwards.
#[utoipa::path(
    post,
    path = "/v1/admin/providers/{provider_id}/signing-key",
    tag = "Admin",
    params(("provider_id" = String, Path, description = "Provider ID")),
    responses(
        (status = 200, description = "New public key", body = PublicKeyResponse),
        (status = 404, description = "Provider not found")
    )
)]
pub async fn rotate_signing_key(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
) -> Result<Json<PublicKeyResponse>, ApiError> {
    let public_key = state.provisioning.rotate_signing_key(&provider_id)?;
    Ok(Json(PublicKeyResponse { public_key }))
}

/// Register the provider's public key with the partner.
#[utoipa::path(
    post,
    path = "/v1/admin/providers/{provider_id}/signing-key/register",
    tag = "Admin",
    params(("provider_id" = String, Path, description = "Provider ID")),
    responses(
        (status = 204, description = "Public key registered"),
        (status = 404, description = "Provider not found"),
        (status = 502, description = "Partner API request failed"),
        (status = 503, description = "Provider configuration incomplete")
    )
)]
pub async fn register_public_key(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.provisioning.register_public_key(&provider_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Configure per-outcome redirect URLs with the partner.
#[utoipa::path(
    put,
    path = "/v1/admin/providers/{provider_id}/redirect-urls",
    tag = "Admin",
    params(("provider_id" = String, Path, description = "Provider ID")),
    request_body = RedirectUrlsRequest,
    responses(
        (status = 200, description = "Redirect URLs configured", body = ProviderResponse),
        (status = 400, description = "Unknown outcome or empty URL"),
        (status = 404, description = "Provider not found"),
        (status = 502, description = "Partner API request failed"),
        (status = 503, description = "Provider configuration incomplete")
    )
)]
pub async fn configure_redirect_urls(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    Json(request): Json<RedirectUrlsRequest>,
) -> Result<Json<ProviderResponse>, ApiError> {
    for url in request.redirect_urls.values() {
        if !url.trim().is_empty() {
            validate_url("redirect url", url)?;
        }
    }
    let provider = state
        .provisioning
        .configure_redirects(&provider_id, request.redirect_urls)
        .await?;
    Ok(Json(ProviderResponse::from(&provider)))
}

/// Look up the partner's current public key.
#[utoipa::path(
    get,
    path = "/v1/admin/providers/{provider_id}/partner-public-key",
    tag = "Admin",
    params(("provider_id" = String, Path, description = "Provider ID")),
    responses(
        (status = 200, description = "Partner public key", body = PublicKeyResponse),
        (status = 404, description = "Provider not found"),
        (status = 502, description = "Partner API request failed"),
        (status = 503, description = "Provider configuration incomplete")
    )
)]
pub async fn partner_public_key(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
) -> Result<Json<PublicKeyResponse>, ApiError> {
    let provider = load_provider(&state, &provider_id)?;
    let public_key = state.connector.connect(&provider)?.fetch_public_key().await?;
    Ok(Json(PublicKeyResponse { public_key }))
}

/// List the qualification questions seen in a provider's inventory.
#[utoipa::path(
    get,
    path = "/v1/admin/providers/{provider_id}/legend",
    tag = "Admin",
    params(("provider_id" = String, Path, description = "Provider ID")),
    responses(
        (status = 200, description = "Qualification legend", body = LegendResponse),
        (status = 404, description = "Provider not found")
    )
)]
pub async fn list_legend(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
) -> Result<Json<LegendResponse>, ApiError> {
    load_provider(&state, &provider_id)?;
    let entries = state.sync_jobs.list_legend(&provider_id)?;
    Ok(Json(LegendResponse { entries }))
}

// ============================================================================
// Sync Handlers
// ============================================================================

/// Run one inventory sync pass over all active providers.
///
/// Per-provider failures are recorded in the job log and counted in the
/// summary; they do not fail the request.
#[utoipa::path(
    post,
    path = "/v1/admin/sync",
    tag = "Admin",
    responses(
        (status = 200, description = "Sync summary", body = SyncSummary)
    )
)]
pub async fn trigger_sync(State(state): State<AppState>) -> Result<Json<SyncSummary>, ApiError> {
    let summary = state.sync_engine.sync_inventory().await?;
    Ok(Json(summary))
}

/// List recent sync jobs.
#[utoipa::path(
    get,
    path = "/v1/admin/sync/jobs",
    tag = "Admin",
    params(SyncJobsQuery),
    responses(
        (status = 200, description = "Sync jobs, newest first", body = SyncJobsResponse)
    )
)]
pub async fn list_sync_jobs(
    State(state): State<AppState>,
    Query(query): Query<SyncJobsQuery>,
) -> Result<Json<SyncJobsResponse>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_JOB_LIMIT)
        .clamp(1, MAX_JOB_LIMIT);
    let jobs = state.sync_jobs.list_jobs(limit)?;
    Ok(Json(SyncJobsResponse { jobs }))
}
