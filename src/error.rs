// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::partner::{PartnerError, ProvisioningError};
use crate::storage::StorageError;
use crate::surveys::{EligibilityError, SessionError, SyncError};

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    /// Provider configuration is incomplete.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    /// The partner API failed.
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    /// Log the cause and return a generic 500.
    pub fn internal(cause: impl std::fmt::Display) -> Self {
        error!(error = %cause, "Internal error");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(what) => Self::not_found(format!("{what} not found")),
            StorageError::AlreadyExists(what) => Self::conflict(format!("{what} already exists")),
            StorageError::Conflict(msg) => Self::conflict(msg),
            other => Self::internal(other),
        }
    }
}

impl From<PartnerError> for ApiError {
    fn from(e: PartnerError) -> Self {
        match e {
            PartnerError::MissingConfig(_) => Self::service_unavailable(e.to_string()),
            PartnerError::Credential(_) => Self::internal(e),
            _ => {
                error!(error = %e, "Partner API failure");
                Self::bad_gateway("Partner API request failed")
            }
        }
    }
}

impl From<ProvisioningError> for ApiError {
    fn from(e: ProvisioningError) -> Self {
        match e {
            ProvisioningError::ProviderNotFound(_) => Self::not_found(e.to_string()),
            ProvisioningError::NoPublicKey(_) => Self::service_unavailable(e.to_string()),
            ProvisioningError::UnknownOutcome(_) | ProvisioningError::EmptyRedirectUrl(_) => {
                Self::bad_request(e.to_string())
            }
            ProvisioningError::Partner(e) => e.into(),
            ProvisioningError::Storage(e) => e.into(),
            ProvisioningError::Vault(e) => Self::internal(e),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Partner(e) => e.into(),
            SyncError::Storage(e) => e.into(),
        }
    }
}

impl From<EligibilityError> for ApiError {
    fn from(e: EligibilityError) -> Self {
        match e {
            EligibilityError::ProviderNotFound(_) => Self::not_found(e.to_string()),
            EligibilityError::Partner(e) => e.into(),
            EligibilityError::Storage(e) => e.into(),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::ProviderNotFound(_)
            | SessionError::SurveyNotFound(_)
            | SessionError::QuotaNotFound(_)
            | SessionError::SessionNotFound(_) => Self::not_found(e.to_string()),
            SessionError::ProfileIncomplete(_)
            | SessionError::InvalidStatus(_)
            | SessionError::InvalidPayout(_) => Self::bad_request(e.to_string()),
            SessionError::InvalidSignature(_) => Self::bad_request("Invalid signature"),
            SessionError::AlreadySettled(_) => Self::conflict(e.to_string()),
            SessionError::MissingConfig(_) => Self::service_unavailable(e.to_string()),
            SessionError::Partner(e) => e.into(),
            SessionError::Storage(e) => e.into(),
            SessionError::Vault(_) | SessionError::Signing(_) => Self::internal(e),
        }
    }
}
