pub mod auth_manager;
pub mod config;
pub mod credential;
pub mod error;
pub mod google_translate;
pub mod logging;
pub mod orchestrator;
pub mod quota;
pub mod rate_gate;
pub mod refresher;
pub mod upstream_client;

use std::sync::Arc;
use std::time::Duration;

use crate::auth_manager::AuthManager;
use crate::config::Config;
use crate::credential::CredentialStore;
use crate::orchestrator::Orchestrator;
use crate::quota::QuotaSelector;
use crate::rate_gate::RateGate;

/// Everything a request handler needs: the orchestrator (which composes
/// auth + quota + rate gate) plus a handle back to auth for admin routes
/// (add/delete/list credentials).
pub struct AppState {
    pub config: Config,
    pub auth: Arc<AuthManager>,
    pub quota: Arc<QuotaSelector>,
    pub orchestrator: Orchestrator,
}

impl AppState {
    pub async fn bootstrap(config: Config) -> error::AppResult<Arc<Self>> {
        let store = CredentialStore::with_default_dir();
        store.load().await?;

        let gate = RateGate::for_upstream();
        let auth = Arc::new(AuthManager::new(store, gate, config.clone()));

        let quota = Arc::new(QuotaSelector::new(Duration::from_secs(config.quota_refresh_s)));
        quota.spawn_background_refresh(auth.clone());

        let orchestrator = Orchestrator::new(auth.clone(), quota.clone());

        Ok(Arc::new(Self { config, auth, quota, orchestrator }))
    }
}
