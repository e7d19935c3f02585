// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Partner redirect callback.
//!
//! The partner sends the user's browser here after a survey. A verified
//! callback settles the session and redirects to the landing page for its
//! status. An unverified one gets a JSON error and no redirect.

use axum::{
    extract::{Query, State},
    response::Redirect,
};
use tracing::info;

use crate::{error::ApiError, partner::RedirectParams, state::AppState};

/// Landing page for a settled session.
pub fn landing_url(frontend_url: &str, status: &str, payout: Option<&str>) -> String {
    let mut url = format!("{frontend_url}/surveys/redirect/{status}");
    if let Some(payout) = payout.filter(|p| !p.is_empty()) {
        url.push_str("?payout=");
        url.push_str(&url::form_urlencoded::byte_serialize(payout.as_bytes()).collect::<String>());
    }
    url
}

/// Settle a survey session from a signed partner callback.
#[utoipa::path(
    get,
    path = "/v1/surveys/redirect",
    tag = "Surveys",
    params(RedirectParams),
    responses(
        (status = 303, description = "Session settled, redirect to the landing page"),
        (status = 400, description = "Invalid signature, status or payout"),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Session already settled")
    )
)]
pub async fn partner_redirect(
    State(state): State<AppState>,
    Query(params): Query<RedirectParams>,
) -> Result<Redirect, ApiError> {
    let completed = state.sessions.complete_session(&params).await?;
    info!(
        session_id = %completed.session.id,
        status = %completed.session.status,
        credited = completed.credited,
        "Partner callback settled"
    );

    Ok(Redirect::to(&landing_url(
        &state.frontend_url,
        completed.session.status.as_str(),
        params.payout.as_deref(),
    )))
}
