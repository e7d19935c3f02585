// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::{
    error::ApiError,
    state::AppState,
    surveys::{EligibilityResult, StartedSession},
};

/// Query parameters for an eligibility check.
#[derive(Debug, Deserialize, IntoParams)]
pub struct EligibilityQuery {
    pub user_id: String,
    pub provider_id: String,
    /// Bypass the cache and ask the partner again.
    #[serde(default)]
    pub refresh: bool,
}

/// Request to start a survey session.
#[derive(Debug, Deserialize, ToSchema)]
pub struct StartSessionRequest {
    pub user_id: String,
    pub provider_id: String,
    pub bid_id: String,
    /// Quota the user was matched to. Its CPI is recorded when present.
    pub quota_id: Option<String>,
}

fn require(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        Err(ApiError::bad_request(format!("{field} is required")))
    } else {
        Ok(())
    }
}

/// Which of a provider's surveys the user qualifies for.
///
/// Served from the per-user cache while it is fresh. Users without a date
/// of birth and gender get an empty result.
#[utoipa::path(
    get,
    path = "/v1/surveys/eligibility",
    tag = "Surveys",
    params(EligibilityQuery),
    responses(
        (status = 200, description = "Eligible surveys and best bid", body = EligibilityResult),
        (status = 404, description = "Provider not found"),
        (status = 502, description = "Partner API request failed")
    )
)]
pub async fn get_eligibility(
    State(state): State<AppState>,
    Query(query): Query<EligibilityQuery>,
) -> Result<Json<EligibilityResult>, ApiError> {
    require("user_id", &query.user_id)?;
    require("provider_id", &query.provider_id)?;

    let result = state
        .eligibility
        .get_eligibility(&query.user_id, &query.provider_id, query.refresh)
        .await?;
    Ok(Json(result))
}

/// Start a survey session and return the signed entry URL.
#[utoipa::path(
    post,
    path = "/v1/surveys/sessions",
    tag = "Surveys",
    request_body = StartSessionRequest,
    responses(
        (status = 201, description = "Session started", body = StartedSession),
        (status = 400, description = "Profile incomplete"),
        (status = 404, description = "Provider, survey or quota not found"),
        (status = 503, description = "Provider configuration incomplete")
    )
)]
pub async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<StartSessionRequest>,
) -> Result<(StatusCode, Json<StartedSession>), ApiError> {
    require("user_id", &request.user_id)?;
    require("provider_id", &request.provider_id)?;
    require("bid_id", &request.bid_id)?;

    let quota_id = request.quota_id.as_deref().filter(|q| !q.is_empty());
    let started = state.sessions.start_session(
        &request.user_id,
        &request.provider_id,
        &request.bid_id,
        quota_id,
    )?;
    Ok((StatusCode::CREATED, Json(started)))
}
