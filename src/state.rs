// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use tokio_util::task::TaskTracker;

use crate::config::{AppEnv, AuthSettings, ProvisioningConfig};
use crate::providers::{ComplianceSource, ProviderApi};
use crate::provisioning::ProvisioningOrchestrator;
use crate::storage::LedgerDatabase;
use crate::webhooks::{
    EventRouter, IdempotencyGuard, SignatureVerifier, SweepHandle, TransactionReconciler,
};

/// Bearer-token verification settings.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// HS256 secret; `None` selects development decoding.
    pub jwt_secret: Option<String>,
    pub issuer: Option<String>,
}

impl From<&AuthSettings> for AuthConfig {
    fn from(settings: &AuthSettings) -> Self {
        Self {
            jwt_secret: settings.jwt_secret.clone(),
            issuer: settings.issuer.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<LedgerDatabase>,
    pub guard: Arc<IdempotencyGuard>,
    pub router: Arc<EventRouter>,
    pub orchestrator: Arc<ProvisioningOrchestrator>,
    /// `None` when no webhook public key is configured.
    pub verifier: Option<Arc<SignatureVerifier>>,
    pub app_env: AppEnv,
    pub auth_config: AuthConfig,
    /// Background work that shutdown waits for.
    pub tasks: TaskTracker,
}

impl AppState {
    /// Wire the webhook pipeline and the orchestrator over one store.
    ///
    /// Ledger write failures request a sweep through `sweep` when given.
    pub fn new(
        db: Arc<LedgerDatabase>,
        provider: Arc<dyn ProviderApi>,
        compliance: Arc<dyn ComplianceSource>,
        provisioning: ProvisioningConfig,
        sweep: Option<SweepHandle>,
    ) -> Self {
        let tasks = TaskTracker::new();
        let guard = Arc::new(IdempotencyGuard::new(db.clone()));
        let orchestrator = Arc::new(ProvisioningOrchestrator::new(
            db.clone(),
            provider,
            compliance,
            provisioning,
        ));
        let reconciler = match sweep {
            Some(handle) => TransactionReconciler::new(db.clone()).with_fallback(handle),
            None => TransactionReconciler::new(db.clone()),
        };
        let router = Arc::new(EventRouter::new(
            db.clone(),
            guard.clone(),
            reconciler,
            orchestrator.clone(),
            tasks.clone(),
        ));

        Self {
            db,
            guard,
            router,
            orchestrator,
            verifier: None,
            app_env: AppEnv::Development,
            auth_config: AuthConfig::default(),
            tasks,
        }
    }

    pub fn with_verifier(mut self, verifier: SignatureVerifier) -> Self {
        self.verifier = Some(Arc::new(verifier));
        self
    }

    pub fn with_app_env(mut self, app_env: AppEnv) -> Self {
        self.app_env = app_env;
        self
    }

    pub fn with_auth_config(mut self, auth_config: AuthConfig) -> Self {
        self.auth_config = auth_config;
        self
    }
}
