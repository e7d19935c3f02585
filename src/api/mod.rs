// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::HeaderName,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    partner::{EligibleBid, GenderCode},
    state::AppState,
    storage::{
        BestBid, ExternalSurvey, ProviderResponse, QualificationLegend, SessionStatus,
        SurveySession, SyncJobLog, SyncStatus, UserProfile, WalletTransaction,
    },
    surveys::{eligibility::BidSummary, EligibilityResult, StartedSession, SyncSummary},
};

pub mod admin;
pub mod health;
pub mod redirect;
pub mod surveys;
pub mod users;

const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route(
            "/admin/providers",
            get(admin::list_providers).post(admin::create_provider),
        )
        .route(
            "/admin/providers/{provider_id}",
            get(admin::get_provider).put(admin::update_provider),
        )
        .route(
            "/admin/providers/{provider_id}/surveys",
            get(admin::list_provider_surveys),
        )
        .route(
            "/admin/providers/{provider_id}/signing-key",
            post(admin::rotate_signing_key),
        )
        .route(
            "/admin/providers/{provider_id}/signing-key/register",
            post(admin::register_public_key),
        )
        .route(
            "/admin/providers/{provider_id}/redirect-urls",
            put(admin::configure_redirect_urls),
        )
        .route(
            "/admin/providers/{provider_id}/partner-public-key",
            get(admin::partner_public_key),
        )
        .route("/admin/providers/{provider_id}/legend", get(admin::list_legend))
        .route("/admin/sync", post(admin::trigger_sync))
        .route("/admin/sync/jobs", get(admin::list_sync_jobs))
        .route("/surveys/eligibility", get(surveys::get_eligibility))
        .route("/surveys/sessions", post(surveys::start_session))
        .route("/surveys/redirect", get(redirect::partner_redirect))
        .route("/users/{user_id}/profile", put(users::update_profile))
        .route("/users/{user_id}/wallet", get(users::get_wallet));

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .nest("/v1", v1_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        admin::list_providers,
        admin::create_provider,
        admin::get_provider,
        admin::update_provider,
        admin::list_provider_surveys,
        admin::rotate_signing_key,
        admin::register_public_key,
        admin::configure_redirect_urls,
        admin::partner_public_key,
        admin::list_legend,
        admin::trigger_sync,
        admin::list_sync_jobs,
        surveys::get_eligibility,
        surveys::start_session,
        redirect::partner_redirect,
        users::update_profile,
        users::get_wallet
    ),
    components(
        schemas(
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse,
            admin::CreateProviderRequest,
            admin::UpdateProviderRequest,
            admin::ProviderListResponse,
            admin::PublicKeyResponse,
            admin::RedirectUrlsRequest,
            admin::SyncJobsResponse,
            admin::LegendResponse,
            admin::SurveyListResponse,
            surveys::StartSessionRequest,
            users::UpdateProfileRequest,
            users::WalletResponse,
            ProviderResponse,
            ExternalSurvey,
            QualificationLegend,
            SyncJobLog,
            SyncStatus,
            SyncSummary,
            EligibilityResult,
            BidSummary,
            BestBid,
            EligibleBid,
            GenderCode,
            StartedSession,
            SurveySession,
            SessionStatus,
            UserProfile,
            WalletTransaction
        )
    ),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Admin", description = "Provider provisioning and inventory sync"),
        (name = "Surveys", description = "Eligibility, session start and partner callbacks"),
        (name = "Users", description = "Profiles and wallet ledger")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use axum::response::Response;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::crypto::signing::{generate_key_pair, sign, KeyPair};
    use crate::crypto::CredentialVault;
    use crate::partner::fake::{FakeConnector, FakePartner};
    use crate::partner::url_signing::redirect_message;
    use crate::partner::RedirectParams;
    use crate::state::StateSettings;
    use crate::storage::database::tests::temp_db;

    struct TestApp {
        app: Router,
        state: AppState,
        connector: Arc<FakeConnector>,
        _dir: tempfile::TempDir,
    }

    fn test_app() -> TestApp {
        let (db, dir) = temp_db();
        let vault = Arc::new(CredentialVault::from_secret("operator secret").unwrap());
        let connector = Arc::new(FakeConnector::new());
        let state = AppState::new(
            db,
            vault,
            connector.clone(),
            StateSettings {
                frontend_url: "https://app.example.com".into(),
                partner_key_cache_capacity: 16,
                partner_key_cache_ttl: Duration::from_secs(300),
                sync_claim_ttl: chrono::Duration::minutes(15),
            },
        );

        TestApp {
            app: router(state.clone()),
            state,
            connector,
            _dir: dir,
        }
    }

    impl TestApp {
        async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
            let builder = Request::builder().method(method).uri(uri);
            let request = match body {
                Some(body) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            self.app.clone().oneshot(request).await.unwrap()
        }

        /// Provider with partner config, a signing key and a synced inventory.
        async fn provisioned_provider(&self, partner: Arc<FakePartner>) -> String {
            let response = self
                .send(
                    Method::POST,
                    "/v1/admin/providers",
                    Some(json!({
                        "name": "Marketplace",
                        "slug": "marketplace",
                        "api_base_url": "https://api.partner.test",
                        "api_credential": "partner-api-key",
                        "supplier_id": "supplier-1",
                        "prescreener_url": "https://entry.partner.test",
                    })),
                )
                .await;
            assert_eq!(response.status(), StatusCode::CREATED);
            let provider_id = body_json(response).await["id"]
                .as_str()
                .unwrap()
                .to_string();
            self.connector.insert(&provider_id, partner);

            let uri = format!("/v1/admin/providers/{provider_id}/signing-key");
            let response = self.send(Method::POST, &uri, None).await;
            assert_eq!(response.status(), StatusCode::OK);

            let response = self.send(Method::POST, "/v1/admin/sync", None).await;
            assert_eq!(response.status(), StatusCode::OK);

            provider_id
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn callback_uri(keys: &KeyPair, session_id: &str, status: &str, payout: &str) -> String {
        let params = RedirectParams {
            status: status.into(),
            session: session_id.into(),
            payout: Some(payout.into()),
            status_id: Some("1".into()),
            ..Default::default()
        };
        let signature = sign(&redirect_message(&params), &keys.private_key).unwrap();

        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("status", status)
            .append_pair("session", session_id)
            .append_pair("payout", payout)
            .append_pair("status_id", "1")
            .append_pair("signature", &signature)
            .finish();
        format!("/v1/surveys/redirect?{query}")
    }

    #[tokio::test]
    async fn router_builds_with_all_routes() {
        let t = test_app();
        let _ = t.app.into_make_service();
    }

    #[tokio::test]
    async fn health_reports_ok_with_request_id() {
        let t = test_app();
        let response = t.send(Method::GET, "/health", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        let body = body_json(response).await;
        assert_eq!(body["checks"]["database"], "ok");
    }

    #[tokio::test]
    async fn provider_responses_never_carry_secrets() {
        let t = test_app();
        let provider_id = t.provisioned_provider(Arc::new(FakePartner::new())).await;

        let response = t
            .send(Method::GET, &format!("/v1/admin/providers/{provider_id}"), None)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["has_api_credential"], true);
        assert_eq!(body["has_signing_key"], true);
        assert!(body.get("api_credential_encrypted").is_none());
        assert!(body.get("signing_private_key_encrypted").is_none());
        assert!(!body.to_string().contains("partner-api-key"));

        let stored = t.state.providers.get(&provider_id).unwrap().unwrap();
        let sealed = stored.api_credential_encrypted.unwrap();
        assert_ne!(sealed, "partner-api-key");
    }

    #[tokio::test]
    async fn duplicate_slug_and_bad_payout_pct_are_rejected() {
        let t = test_app();
        let create = |pct: u32| {
            json!({ "name": "Marketplace", "slug": "marketplace", "user_payout_pct": pct })
        };

        let response = t.send(Method::POST, "/v1/admin/providers", Some(create(150))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = t.send(Method::POST, "/v1/admin/providers", Some(create(50))).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let response = t.send(Method::POST, "/v1/admin/providers", Some(create(50))).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn unknown_provider_is_404_json() {
        let t = test_app();

        let response = t
            .send(Method::GET, "/v1/admin/providers/missing", None)
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_json(response).await["error"].is_string());

        let response = t
            .send(
                Method::GET,
                "/v1/surveys/eligibility?user_id=u1&provider_id=missing",
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn sync_jobs_and_legend_are_listed() {
        let t = test_app();
        let provider_id = t
            .provisioned_provider(Arc::new(FakePartner::with_inventory(2)))
            .await;

        let response = t.send(Method::GET, "/v1/admin/sync/jobs?limit=5", None).await;
        let jobs = body_json(response).await;
        assert_eq!(jobs["jobs"].as_array().unwrap().len(), 1);
        assert_eq!(jobs["jobs"][0]["status"], "success");

        let uri = format!("/v1/admin/providers/{provider_id}/legend");
        let legend = body_json(t.send(Method::GET, &uri, None).await).await;
        assert_eq!(legend["entries"].as_array().unwrap().len(), 2);

        let uri = format!("/v1/admin/providers/{provider_id}/surveys");
        let surveys = body_json(t.send(Method::GET, &uri, None).await).await;
        assert_eq!(surveys["total"], 2);
    }

    #[tokio::test]
    async fn signed_callback_redirects_and_credits_once() {
        let t = test_app();
        let partner = Arc::new(FakePartner::with_inventory(1));
        let partner_keys = generate_key_pair();
        partner.set_public_keys(vec![partner_keys.public_key.clone()]);
        let provider_id = t.provisioned_provider(partner).await;

        let response = t
            .send(
                Method::PUT,
                "/v1/users/user-7/profile",
                Some(json!({ "date_of_birth": "1990-01-01", "gender": "female" })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = t
            .send(
                Method::POST,
                "/v1/surveys/sessions",
                Some(json!({
                    "user_id": "user-7",
                    "provider_id": provider_id,
                    "bid_id": "bid-000",
                })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let started = body_json(response).await;
        let session_id = started["session_id"].as_str().unwrap().to_string();
        assert!(started["entry_url"]
            .as_str()
            .unwrap()
            .starts_with("https://entry.partner.test/v1/survey/entry?bid_id=bid-000"));
        assert_eq!(started["expected_payout_cents"], 150);

        let uri = callback_uri(&partner_keys, &session_id, "complete", "300");
        let response = t.send(Method::GET, &uri, None).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://app.example.com/surveys/redirect/complete?payout=300"
        );

        let response = t.send(Method::GET, &uri, None).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let wallet = body_json(t.send(Method::GET, "/v1/users/user-7/wallet", None).await).await;
        assert_eq!(wallet["balance_cents"], 300);
        assert_eq!(wallet["balance"], "3.00");
        assert_eq!(wallet["transactions"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn forged_callback_is_400_without_redirect() {
        let t = test_app();
        let partner = Arc::new(FakePartner::with_inventory(1));
        partner.set_public_keys(vec![generate_key_pair().public_key]);
        let provider_id = t.provisioned_provider(partner).await;
        t.state
            .users
            .upsert_profile("user-7", chrono::NaiveDate::from_ymd_opt(1985, 6, 1), Some("m".into()))
            .unwrap();

        let started = t
            .state
            .sessions
            .start_session("user-7", &provider_id, "bid-000", None)
            .unwrap();

        let forger = generate_key_pair();
        let uri = callback_uri(&forger, &started.session_id, "complete", "300");
        let response = t.send(Method::GET, &uri, None).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!response.headers().contains_key(header::LOCATION));
        assert_eq!(body_json(response).await["error"], "Invalid signature");

        let session = t.state.users.get_session(&started.session_id).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Pending);
    }
}
