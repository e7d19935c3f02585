// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    error::ApiError,
    state::AppState,
    storage::{UserProfile, WalletTransaction},
    surveys::session::format_cents,
};

const GENDERS: &[&str] = &["male", "female", "other", "m", "f", "o"];

/// Demographics used for partner qualification.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    /// `YYYY-MM-DD`.
    #[schema(value_type = Option<String>, format = Date)]
    pub date_of_birth: Option<NaiveDate>,
    /// `male`, `female` or `other`.
    pub gender: Option<String>,
}

/// Wallet balance and ledger.
#[derive(Debug, Serialize, ToSchema)]
pub struct WalletResponse {
    pub user_id: String,
    pub balance_cents: i64,
    /// Balance in currency units, e.g. `"12.50"`.
    pub balance: String,
    /// Newest first.
    pub transactions: Vec<WalletTransaction>,
}

/// Set a user's date of birth and gender.
#[utoipa::path(
    put,
    path = "/v1/users/{user_id}/profile",
    tag = "Users",
    params(("user_id" = String, Path, description = "User ID")),
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = UserProfile),
        (status = 400, description = "Invalid date of birth or gender")
    )
)]
pub async fn update_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<UserProfile>, ApiError> {
    if let Some(dob) = request.date_of_birth {
        if dob > Utc::now().date_naive() {
            return Err(ApiError::bad_request("date_of_birth is in the future"));
        }
    }

    let gender = request
        .gender
        .map(|g| g.trim().to_ascii_lowercase())
        .filter(|g| !g.is_empty());
    if let Some(g) = &gender {
        if !GENDERS.contains(&g.as_str()) {
            return Err(ApiError::bad_request(
                "gender must be male, female or other",
            ));
        }
    }

    let profile = state
        .users
        .upsert_profile(&user_id, request.date_of_birth, gender)?;
    Ok(Json(profile))
}

/// Get a user's wallet balance and ledger.
#[utoipa::path(
    get,
    path = "/v1/users/{user_id}/wallet",
    tag = "Users",
    params(("user_id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Wallet", body = WalletResponse)
    )
)]
pub async fn get_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<WalletResponse>, ApiError> {
    let balance_cents = state
        .users
        .get_profile(&user_id)?
        .map(|p| p.wallet_balance_cents)
        .unwrap_or(0);
    let transactions = state.users.list_wallet_transactions(&user_id)?;

    Ok(Json(WalletResponse {
        user_id,
        balance_cents,
        balance: format_cents(balance_cents),
        transactions,
    }))
}
