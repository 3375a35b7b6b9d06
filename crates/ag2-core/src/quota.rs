//! C6: periodic quota snapshot refresh plus the account-selection tie
//! -breaking rules of §4.6.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::auth_manager::AuthManager;
use crate::credential::Group;
use crate::logging::log_quota;
use crate::refresher::now_unix_ms;
use crate::upstream_client;

const INITIAL_WAIT_MS: u64 = 3_000;
pub const FIXED_RETRY_DELAY_MS: u64 = 1_200;

#[derive(Debug, Clone, Default)]
pub struct QuotaSnapshot {
    pub remaining_percent: Option<u8>,
    pub reset_time_ms: Option<i64>,
    pub updated_at_ms: i64,
    pub cooldown_until_ms: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct LastError {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: bytes::Bytes,
}

pub enum Pick {
    FastFail(Option<LastError>),
    Wait { wait_ms: u64 },
    Pick { account_index: usize },
}

struct ModelState {
    quotas: HashMap<String, QuotaSnapshot>,
    next_start: usize,
}

impl Default for ModelState {
    fn default() -> Self {
        Self { quotas: HashMap::new(), next_start: 0 }
    }
}

pub struct QuotaSelector {
    per_model: RwLock<HashMap<String, ModelState>>,
    last_error_by_model: RwLock<HashMap<String, LastError>>,
    refresh_interval: Duration,
}

impl QuotaSelector {
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            per_model: RwLock::new(HashMap::new()),
            last_error_by_model: RwLock::new(HashMap::new()),
            refresh_interval,
        }
    }

    /// Spawns the background refresh loop; never blocks request serving.
    pub fn spawn_background_refresh(self: &Arc<Self>, auth: Arc<AuthManager>) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(INITIAL_WAIT_MS.min(3_000))).await;
            this.refresh_all(&auth).await;
            let mut ticker = tokio::time::interval(this.refresh_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                this.refresh_all(&auth).await;
            }
        });
    }

    async fn refresh_all(&self, auth: &Arc<AuthManager>) {
        let pool_len = auth.store().len().await;
        let mut handles = Vec::with_capacity(pool_len);
        for index in 0..pool_len {
            let auth = auth.clone();
            handles.push(tokio::spawn(async move {
                let creds = auth.get_credentials_for_index(index).await.ok()?;
                let raw = upstream_client::list_models(&creds.access_token).await.ok()?;
                let body: JsonValue = raw.json().ok()?;
                Some((creds.account_key, body))
            }));
        }
        for handle in handles {
            if let Ok(Some((account_key, body))) = handle.await {
                self.ingest_models(&account_key, &body).await;
            }
        }
    }

    async fn ingest_models(&self, account_key: &str, body: &JsonValue) {
        let Some(models) = body.get("models").and_then(|v| v.as_array()) else { return };
        let now_ms = now_unix_ms();
        for model in models {
            let Some(model_id) = model.get("name").and_then(|v| v.as_str()) else { continue };
            let Some(quota_info) = model.get("quotaInfo") else { continue };
            let remaining_fraction = quota_info.get("remainingFraction").and_then(|v| v.as_f64());
            let remaining_percent = remaining_fraction.map(|f| (f * 100.0).round().clamp(0.0, 100.0) as u8);
            let reset_time_ms = quota_info
                .get("resetTime")
                .and_then(|v| v.as_str())
                .and_then(|s| time::OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339).ok())
                .map(|dt| (dt.unix_timestamp_nanos() / 1_000_000) as i64);

            let mut per_model = self.per_model.write().await;
            let state = per_model.entry(model_id.to_string()).or_default();
            let snapshot = state.quotas.entry(account_key.to_string()).or_default();
            snapshot.remaining_percent = remaining_percent.or(snapshot.remaining_percent);
            snapshot.reset_time_ms = reset_time_ms.or(snapshot.reset_time_ms);
            snapshot.updated_at_ms = now_ms;
            log_quota(model_id, account_key, snapshot.remaining_percent);
        }
    }

    pub async fn record_cooldown(&self, model_id: &str, account_key: &str, delay_ms: Option<u64>) {
        let now_ms = now_unix_ms();
        let cooldown_until = now_ms + delay_ms.unwrap_or(FIXED_RETRY_DELAY_MS) as i64;
        let mut per_model = self.per_model.write().await;
        let state = per_model.entry(model_id.to_string()).or_default();
        let snapshot = state.quotas.entry(account_key.to_string()).or_default();
        snapshot.cooldown_until_ms = Some(cooldown_until);
    }

    pub async fn record_last_error(&self, model_id: &str, error: LastError) {
        self.last_error_by_model.write().await.insert(model_id.to_string(), error);
    }

    pub async fn cached_error(&self, model_id: &str) -> Option<LastError> {
        self.last_error_by_model.read().await.get(model_id).cloned()
    }

    /// `pick(modelId, {now, excluded, cooldownWaitThresholdMs})`.
    pub async fn pick(
        &self,
        model_id: &str,
        account_keys: &[String],
        excluded: &[usize],
        cooldown_wait_threshold_ms: u64,
    ) -> Pick {
        let now_ms = now_unix_ms();
        let mut per_model = self.per_model.write().await;
        let state = per_model.entry(model_id.to_string()).or_default();

        let candidates: Vec<usize> = (0..account_keys.len()).filter(|i| !excluded.contains(i)).collect();
        if candidates.is_empty() {
            return Pick::FastFail(self.cached_error(model_id).await);
        }

        let snapshot_of = |i: usize| state.quotas.get(&account_keys[i]).cloned().unwrap_or_default();

        if candidates.iter().all(|&i| snapshot_of(i).remaining_percent == Some(0)) {
            return Pick::FastFail(self.cached_error(model_id).await);
        }

        let eligible: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&i| {
                let snap = snapshot_of(i);
                if snap.remaining_percent == Some(0) {
                    return false;
                }
                match snap.cooldown_until_ms {
                    Some(until) if until > now_ms => false,
                    _ => true,
                }
            })
            .collect();

        if eligible.is_empty() {
            let nearest_cooldown_end = candidates
                .iter()
                .filter_map(|&i| snapshot_of(i).cooldown_until_ms)
                .filter(|&until| until > now_ms)
                .min();
            return match nearest_cooldown_end {
                Some(until) => {
                    let wait_ms = (until - now_ms).max(0) as u64;
                    if wait_ms <= cooldown_wait_threshold_ms {
                        Pick::Wait { wait_ms }
                    } else {
                        Pick::FastFail(self.cached_error(model_id).await)
                    }
                }
                None => Pick::FastFail(self.cached_error(model_id).await),
            };
        }

        let positive: Vec<usize> = eligible
            .iter()
            .copied()
            .filter(|&i| matches!(snapshot_of(i).remaining_percent, Some(p) if p > 0))
            .collect();

        let finalists: Vec<usize> = if !positive.is_empty() {
            let max_remaining = positive.iter().map(|&i| snapshot_of(i).remaining_percent.unwrap()).max().unwrap();
            positive.into_iter().filter(|&i| snapshot_of(i).remaining_percent == Some(max_remaining)).collect()
        } else {
            eligible
        };

        let cursor = state.next_start;
        let chosen = finalists
            .iter()
            .copied()
            .find(|&i| i >= cursor)
            .or_else(|| finalists.first().copied())
            .expect("finalists is non-empty");

        state.next_start = chosen + 1;
        Pick::Pick { account_index: chosen }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(remaining: Option<u8>, cooldown_until: Option<i64>) -> QuotaSnapshot {
        QuotaSnapshot { remaining_percent: remaining, reset_time_ms: None, updated_at_ms: 0, cooldown_until_ms: cooldown_until }
    }

    #[tokio::test]
    async fn fast_fails_when_all_exhausted() {
        let selector = QuotaSelector::new(Duration::from_secs(300));
        {
            let mut per_model = selector.per_model.write().await;
            let state = per_model.entry("m".to_string()).or_default();
            state.quotas.insert("a".to_string(), snap(Some(0), None));
            state.quotas.insert("b".to_string(), snap(Some(0), None));
        }
        let keys = vec!["a".to_string(), "b".to_string()];
        let result = selector.pick("m", &keys, &[], 5_000).await;
        assert!(matches!(result, Pick::FastFail(_)));
    }

    #[tokio::test]
    async fn prefers_max_remaining_percent() {
        let selector = QuotaSelector::new(Duration::from_secs(300));
        {
            let mut per_model = selector.per_model.write().await;
            let state = per_model.entry("m".to_string()).or_default();
            state.quotas.insert("a".to_string(), snap(Some(20), None));
            state.quotas.insert("b".to_string(), snap(Some(80), None));
        }
        let keys = vec!["a".to_string(), "b".to_string()];
        let result = selector.pick("m", &keys, &[], 5_000).await;
        assert!(matches!(result, Pick::Pick { account_index: 1 }));
    }

    #[tokio::test]
    async fn round_robins_among_tied_finalists_from_cursor() {
        let selector = QuotaSelector::new(Duration::from_secs(300));
        {
            let mut per_model = selector.per_model.write().await;
            let state = per_model.entry("m".to_string()).or_default();
            state.quotas.insert("a".to_string(), snap(Some(50), None));
            state.quotas.insert("b".to_string(), snap(Some(50), None));
            state.next_start = 1;
        }
        let keys = vec!["a".to_string(), "b".to_string()];
        let result = selector.pick("m", &keys, &[], 5_000).await;
        assert!(matches!(result, Pick::Pick { account_index: 1 }));
    }

    #[tokio::test]
    async fn waits_for_near_cooldown_else_fast_fails() {
        let selector = QuotaSelector::new(Duration::from_secs(300));
        let now = now_unix_ms();
        {
            let mut per_model = selector.per_model.write().await;
            let state = per_model.entry("m".to_string()).or_default();
            state.quotas.insert("a".to_string(), snap(Some(10), Some(now + 2_000)));
        }
        let keys = vec!["a".to_string()];
        let result = selector.pick("m", &keys, &[], 5_000).await;
        assert!(matches!(result, Pick::Wait { .. }));

        {
            let mut per_model = selector.per_model.write().await;
            let state = per_model.entry("m".to_string()).or_default();
            state.quotas.get_mut("a").unwrap().cooldown_until_ms = Some(now + 10_000);
        }
        let result = selector.pick("m", &keys, &[], 5_000).await;
        assert!(matches!(result, Pick::FastFail(_)));
    }
}
