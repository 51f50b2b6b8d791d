// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum_server::{tls_rustls::RustlsConfig, Handle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use remit_settlement_server::{
    api::router,
    config::{LogFormat, Settings},
    providers::HttpProviderClient,
    state::{AppState, AuthConfig},
    storage::{LedgerDatabase, LEDGER_DB_FILE},
    webhooks::{ReconciliationSweeper, SignatureVerifier},
};

/// Time in-flight requests get to finish after a shutdown signal.
const GRACEFUL_SHUTDOWN: Duration = Duration::from_secs(30);

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;
    init_tracing(settings.log_format);

    // Ledger store
    std::fs::create_dir_all(&settings.data_dir)?;
    let db = Arc::new(LedgerDatabase::open(&settings.data_dir.join(LEDGER_DB_FILE))?);
    info!(data_dir = %settings.data_dir.display(), "Ledger database opened");

    // Provider client and the reconciliation sweep worker
    let provider = Arc::new(HttpProviderClient::new(&settings.provider)?);
    let (sweeper, sweep_handle) = ReconciliationSweeper::new(db.clone(), provider.clone());
    let shutdown = CancellationToken::new();
    let sweeper_task = tokio::spawn(sweeper.run(shutdown.clone()));

    let mut state = AppState::new(
        db.clone(),
        provider,
        db.clone(),
        settings.provisioning.clone(),
        Some(sweep_handle),
    )
    .with_app_env(settings.app_env)
    .with_auth_config(AuthConfig::from(&settings.auth));

    match settings.webhook.public_key.as_deref() {
        Some(key) => {
            state = state.with_verifier(SignatureVerifier::from_key_material(
                key,
                settings.webhook.max_age,
            )?);
        }
        None if settings.app_env.is_production_like() => {
            warn!("WEBHOOK_PUBLIC_KEY is not set; webhooks will be rejected");
        }
        None => warn!("WEBHOOK_PUBLIC_KEY is not set; webhook signatures are not verified"),
    }
    if settings.auth.jwt_secret.is_none() {
        warn!("AUTH_JWT_SECRET is not set; bearer tokens are decoded without verification");
    }

    let tasks = state.tasks.clone();
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port).parse()?;
    let handle: Handle<SocketAddr> = Handle::new();
    tokio::spawn({
        let handle = handle.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
            }
            handle.graceful_shutdown(Some(GRACEFUL_SHUTDOWN));
        }
    });

    match &settings.tls {
        Some(tls) => {
            // Install the ring crypto provider for rustls (must be done before any TLS operations)
            if rustls::crypto::ring::default_provider()
                .install_default()
                .is_err()
            {
                warn!("A rustls crypto provider was already installed");
            }
            let tls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path).await?;
            info!(%addr, env = settings.app_env.as_str(), "Listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            info!(%addr, env = settings.app_env.as_str(), "Listening on http (docs at /docs)");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }

    // Drain background dispatch and provisioning, then stop the sweeper
    tasks.close();
    tasks.wait().await;
    shutdown.cancel();
    sweeper_task.await?;
    info!("Server stopped");

    Ok(())
}
