// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use secrecy::ExposeSecret;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use survey_partner_server::{
    api::router,
    config::{AppConfig, LogFormat, DEFAULT_LOG_FILTER, PARTNER_KEY_CACHE_CAPACITY},
    crypto::CredentialVault,
    partner::HttpPartnerConnector,
    scheduler::SyncScheduler,
    state::{AppState, StateSettings},
    storage::{PartnerDatabase, DATABASE_FILE},
};

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env().expect("Invalid configuration");

    // --- Tracing ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    // --- Storage ---
    std::fs::create_dir_all(&config.data_dir).expect("Failed to create data directory");
    let db_path = config.data_dir.join(DATABASE_FILE);
    let db = Arc::new(PartnerDatabase::open(&db_path).expect("Failed to open database"));
    info!(path = %db_path.display(), "Database opened");

    // --- Partner integration ---
    let vault = Arc::new(
        CredentialVault::from_secret(config.encryption_key.expose_secret())
            .expect("Failed to initialise credential vault"),
    );
    let connector = Arc::new(
        HttpPartnerConnector::new(vault.clone(), config.partner_timeout)
            .expect("Failed to build partner HTTP client"),
    );

    let state = AppState::new(
        db,
        vault,
        connector,
        StateSettings {
            frontend_url: config.frontend_url.clone(),
            partner_key_cache_capacity: PARTNER_KEY_CACHE_CAPACITY,
            partner_key_cache_ttl: config.partner_key_cache_ttl,
            sync_claim_ttl: config.sync_claim_ttl,
        },
    );

    // --- Background sync ---
    let shutdown = CancellationToken::new();
    let scheduler_handle = config.scheduler_settings().map(|settings| {
        let scheduler = SyncScheduler::new(
            state.sync_engine.clone(),
            state.sessions.clone(),
            state.sync_jobs.clone(),
            settings,
        );
        tokio::spawn(scheduler.run(shutdown.clone()))
    });
    if scheduler_handle.is_none() {
        info!("SYNC_INTERVAL_SECS unset, inventory sync is triggered externally");
    }

    // --- Start server ---
    let app = router(state);
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind address");
    info!(%addr, "Survey partner server listening (docs at /docs)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .expect("Server error");

    if let Some(handle) = scheduler_handle {
        let _ = handle.await;
    }
    info!("Server shut down");
}

/// Wait for SIGINT or SIGTERM, then cancel background work.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, starting graceful shutdown"),
        () = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
    shutdown.cancel();
}
