//! C5: composes C1-C4 into `getCredentials(group)` / `rotate(group)`.
//! Single-flight for refresh and project-id resolution (I3) is achieved by
//! holding each account's dedicated `tokio::sync::Mutex<()>` across the
//! whole operation — concurrent callers simply queue on the lock and, once
//! admitted, re-check whether the prior holder already did the work.

use std::sync::Arc;

use rand::Rng;

use crate::config::Config;
use crate::credential::{account_key, Account, CredentialRecord, CredentialStore, Group};
use crate::error::{AppError, AppResult};
use crate::logging::log_account;
use crate::rate_gate::RateGate;
use crate::upstream_client;

const ADJECTIVES: &[&str] = &[
    "calm", "brisk", "bold", "quiet", "amber", "cobalt", "dusty", "eager", "golden", "humble",
    "lucid", "mellow", "nimble", "ornate", "pale", "rapid", "sable", "tidy", "vivid", "wry",
];
const NOUNS: &[&str] = &[
    "otter", "falcon", "birch", "comet", "delta", "ember", "fjord", "grove", "heron", "inlet",
    "juniper", "kestrel", "lagoon", "meadow", "nebula", "oasis", "prairie", "quartz", "ridge", "summit",
];

pub struct Credentials {
    pub access_token: String,
    pub project_id: String,
    pub account_index: usize,
    pub account_key: String,
}

pub struct AuthManager {
    store: CredentialStore,
    gate: RateGate,
    config: Config,
}

impl AuthManager {
    pub fn new(store: CredentialStore, gate: RateGate, config: Config) -> Self {
        Self { store, gate, config }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn gate(&self) -> &RateGate {
        &self.gate
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// `getCredentials(group) -> {accessToken, projectId, account}`.
    pub async fn get_credentials(self: &Arc<Self>, group: &Group) -> AppResult<Credentials> {
        let index = self.current_index(group).await?;
        self.get_credentials_for_index(index).await
    }

    pub async fn current_index(&self, group: &Group) -> AppResult<usize> {
        self.store.current_index(group).await.ok_or(AppError::PoolEmpty)
    }

    pub async fn get_credentials_for_index(self: &Arc<Self>, index: usize) -> AppResult<Credentials> {
        let account = self.store.account_arc(index).await?;
        self.ensure_fresh(&account).await?;
        self.ensure_project_id(&account).await?;

        let record = account.record.read().await;
        let project_id = record
            .project_id
            .clone()
            .ok_or_else(|| AppError::AccountIneligible("missing project id".to_string()))?;
        Ok(Credentials {
            access_token: record.access_token.clone(),
            project_id,
            account_index: index,
            account_key: account_key(&record),
        })
    }

    pub async fn rotate(&self, group: &Group) {
        self.store.rotate(group).await;
    }

    /// Refresh, single-flight per account: if the token is still fresh by
    /// the time the lock is acquired, another caller already did the work.
    async fn ensure_fresh(self: &Arc<Self>, account: &Arc<Account>) -> AppResult<()> {
        let now_ms = crate::refresher::now_unix_ms();
        if account.record.read().await.expiry_ms >= now_ms {
            return Ok(());
        }
        let _guard = account.refresh_lock.lock().await;
        if account.record.read().await.expiry_ms >= now_ms {
            return Ok(());
        }
        self.do_refresh(account).await
    }

    async fn do_refresh(self: &Arc<Self>, account: &Arc<Account>) -> AppResult<()> {
        let refresh_token = account.record.read().await.refresh_token.clone();
        let token = upstream_client::refresh_token(
            &self.gate,
            &refresh_token,
            &self.config.google_oauth_client_id,
            &self.config.google_oauth_client_secret,
        )
        .await?;

        let now_ms = crate::refresher::now_unix_ms();
        let expiry_ms = now_ms + token.expires_in.unwrap_or(3600) * 1000 - 60_000;

        {
            let mut record = account.record.write().await;
            record.access_token = token.access_token;
            if let Some(refresh_token) = token.refresh_token {
                record.refresh_token = refresh_token;
            }
            record.expiry_ms = expiry_ms;
            if let Some(token_type) = token.token_type {
                record.token_type = Some(token_type);
            }
            if let Some(scope) = token.scope {
                record.scope = Some(scope);
            }
        }
        log_account(&account.file_path.to_string_lossy(), "refreshed");

        if account.record.read().await.project_id.is_none() {
            self.resolve_project_id(account).await?;
        }

        self.persist_by_path(account).await?;
        self.rearm_timer(account, expiry_ms);
        Ok(())
    }

    /// (Re-)schedules the pre-expiry timer; its callback re-enters the same
    /// single-flight refresh path a live request would use.
    fn rearm_timer(self: &Arc<Self>, account: &Arc<Account>, expiry_ms: i64) {
        let this = self.clone();
        let account = account.clone();
        let timer = account.refresh_timer.clone();
        tokio::spawn(async move {
            timer
                .schedule(expiry_ms, move || {
                    let this = this.clone();
                    let account = account.clone();
                    async move {
                        let _guard = account.refresh_lock.lock().await;
                        match this.do_refresh(&account).await {
                            Ok(()) => true,
                            Err(err) => {
                                log_account(
                                    &account.file_path.to_string_lossy(),
                                    &format!("timer refresh failed: {err}"),
                                );
                                false
                            }
                        }
                    }
                })
                .await;
        });
    }

    /// Project-id resolution, single-flight per account (I3).
    async fn ensure_project_id(self: &Arc<Self>, account: &Arc<Account>) -> AppResult<()> {
        if account.record.read().await.project_id.is_some() {
            return Ok(());
        }
        let _guard = account.project_id_lock.lock().await;
        if account.record.read().await.project_id.is_some() {
            return Ok(());
        }
        self.resolve_project_id(account).await
    }

    async fn resolve_project_id(self: &Arc<Self>, account: &Arc<Account>) -> AppResult<()> {
        let access_token = account.record.read().await.access_token.clone();
        let raw = upstream_client::load_project_id(&self.gate, &access_token).await?;
        let body_text = String::from_utf8_lossy(&raw.body).to_string();
        let parsed: serde_json::Value = raw.json().unwrap_or(serde_json::Value::Null);
        let project_id = parsed
            .get("cloudaicompanionProject")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let resolved = match project_id {
            Some(id) => id,
            None if body_text.contains("\"paidTier\"") => synthesize_project_id(),
            None => {
                return Err(AppError::AccountIneligible(
                    "no projectId and no paidTier signal".to_string(),
                ))
            }
        };

        account.record.write().await.project_id = Some(resolved);
        self.persist_by_path(account).await
    }

    async fn persist_by_path(&self, account: &Arc<Account>) -> AppResult<()> {
        let index = self
            .store
            .index_of_path(&account.file_path)
            .await
            .ok_or(AppError::PoolEmpty)?;
        self.store.persist(index).await
    }

    pub async fn add_credential(&self, record: CredentialRecord) -> AppResult<usize> {
        self.store.add(record).await
    }
}

fn synthesize_project_id() -> String {
    let mut rng = rand::rng();
    let adjective = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.random_range(0..NOUNS.len())];
    let suffix: String = (0..5)
        .map(|_| {
            let n = rng.random_range(0..36u32);
            std::char::from_digit(n, 36).unwrap_or('0')
        })
        .collect();
    format!("{adjective}-{noun}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesized_project_id_matches_shape() {
        let id = synthesize_project_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].chars().all(|c| c.is_ascii_lowercase()));
        assert!(parts[1].chars().all(|c| c.is_ascii_lowercase()));
        assert_eq!(parts[2].len(), 5);
        assert!(parts[2].chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
