//! C7: retry/rotate policy layered on top of C5 (auth) + C6 (quota).

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::auth_manager::AuthManager;
use crate::credential::Group;
use crate::error::AppResult;
use crate::logging::{log_retry, log_upstream};
use crate::quota::{LastError, Pick, QuotaSelector};
use crate::upstream_client::{self, RawResponse};

pub const FIXED_RETRY_DELAY_MS: u64 = 1_200;
const SHORT_RETRY_HINT_THRESHOLD_MS: u64 = 5_000;
const COOLDOWN_WAIT_THRESHOLD_MS: u64 = 5_000;

/// Resolves to the "claude" or "gemini" cohort by substring on the model id.
pub fn group_for_model(model: &str) -> Group {
    if model.contains("gemini") {
        Group::Gemini
    } else {
        Group::Claude
    }
}

pub struct CallParams<'a> {
    pub method: &'a str,
    pub model: Option<&'a str>,
    pub query: Option<&'a str>,
}

pub struct Orchestrator {
    auth: Arc<AuthManager>,
    quota: Arc<QuotaSelector>,
}

impl Orchestrator {
    pub fn new(auth: Arc<AuthManager>, quota: Arc<QuotaSelector>) -> Self {
        Self { auth, quota }
    }

    /// `callV1Internal(method, {group, model, query, buildBody(projectId)})`.
    /// `build_body` is invoked fresh per attempt since `projectId` varies by
    /// account; it must return a JSON body plus the freshly generated
    /// `requestId` it was stamped with.
    pub async fn call_v1_internal(
        &self,
        params: CallParams<'_>,
        mut build_body: impl FnMut(&str) -> JsonValue,
    ) -> AppResult<RawResponse> {
        let pool_size = self.auth.store().len().await.max(1);
        let attempt_budget = pool_size;
        let mut excluded: Vec<usize> = Vec::new();
        let mut last_429: Option<RawResponse> = None;

        for attempt in 0..attempt_budget {
            let account_index = match self.select_account(&params, &excluded).await? {
                Selection::Account(index) => index,
                Selection::FastFail(cached) => {
                    return Ok(fast_fail_response(cached));
                }
            };

            let creds = self.auth.get_credentials_for_index(account_index).await?;
            let body = build_body(&creds.project_id);
            let request_id = Uuid::new_v4().to_string();
            let envelope = ag2_protocol::internal::V1InternalEnvelope::new(
                params.model.unwrap_or_default(),
                body,
            )
            .with_project(creds.project_id.clone())
            .with_request_id(request_id);

            let outcome = upstream_client::call_v1_internal(
                self.auth.gate(),
                &creds.access_token,
                params.method,
                &envelope,
                params.query,
            )
            .await;

            let response = match outcome {
                Ok(response) => response,
                Err(_network_err) => {
                    tokio::time::sleep(Duration::from_millis(FIXED_RETRY_DELAY_MS)).await;
                    if pool_size > 1 {
                        excluded.push(account_index);
                    }
                    continue;
                }
            };

            log_upstream(params.method, params.model.unwrap_or(""), &creds.account_key, response.status);

            if response.status != 429 {
                return Ok(response);
            }

            let model_id = params.model.unwrap_or("").to_string();
            let retry_delay_ms = parse_retry_delay_from_body(&response.body);
            self.quota
                .record_cooldown(&model_id, &creds.account_key, retry_delay_ms)
                .await;
            self.quota
                .record_last_error(
                    &model_id,
                    LastError { status: response.status, headers: response.headers.clone(), body: response.body.clone() },
                )
                .await;
            last_429 = Some(response.clone());

            if pool_size == 1 {
                match retry_delay_ms {
                    Some(ms) if ms <= SHORT_RETRY_HINT_THRESHOLD_MS => {
                        log_retry(&model_id, &creds.account_key, attempt as u32, ms + 200);
                        tokio::time::sleep(Duration::from_millis(ms + 200)).await;
                        continue;
                    }
                    _ => return Ok(response),
                }
            } else {
                match retry_delay_ms {
                    Some(ms) if ms <= SHORT_RETRY_HINT_THRESHOLD_MS => {
                        tokio::time::sleep(Duration::from_millis(FIXED_RETRY_DELAY_MS)).await;
                    }
                    None => {
                        tokio::time::sleep(Duration::from_millis(FIXED_RETRY_DELAY_MS)).await;
                    }
                    _ => {}
                }
                excluded.push(account_index);
                continue;
            }
        }

        if let Some(last) = last_429 {
            return Ok(last);
        }
        if let Some(model) = params.model {
            if let Some(cached) = self.quota.cached_error(model).await {
                return Ok(fast_fail_response(Some(cached)));
            }
        }
        Err(crate::error::AppError::Internal("upstream attempts exhausted".to_string()))
    }

    /// Same retry/rotate policy as [`Self::call_v1_internal`], but for SSE
    /// passthrough: a 2xx response is handed back live and unconsumed so the
    /// caller can stream its body straight to the client. 429s and network
    /// errors still need the body buffered to classify and cache them, so
    /// those paths fall back to reading it eagerly.
    pub async fn call_v1_internal_streaming(
        &self,
        params: CallParams<'_>,
        mut build_body: impl FnMut(&str) -> JsonValue,
    ) -> AppResult<StreamingOutcome> {
        let pool_size = self.auth.store().len().await.max(1);
        let attempt_budget = pool_size;
        let mut excluded: Vec<usize> = Vec::new();
        let mut last_429: Option<RawResponse> = None;

        for attempt in 0..attempt_budget {
            let account_index = match self.select_account(&params, &excluded).await? {
                Selection::Account(index) => index,
                Selection::FastFail(cached) => {
                    return Ok(StreamingOutcome::Buffered(fast_fail_response(cached)));
                }
            };

            let creds = self.auth.get_credentials_for_index(account_index).await?;
            let body = build_body(&creds.project_id);
            let request_id = Uuid::new_v4().to_string();
            let envelope = ag2_protocol::internal::V1InternalEnvelope::new(
                params.model.unwrap_or_default(),
                body,
            )
            .with_project(creds.project_id.clone())
            .with_request_id(request_id);

            let outcome = upstream_client::call_v1_internal_raw(
                self.auth.gate(),
                &creds.access_token,
                params.method,
                &envelope,
                params.query,
            )
            .await;

            let response = match outcome {
                Ok(response) => response,
                Err(_network_err) => {
                    tokio::time::sleep(Duration::from_millis(FIXED_RETRY_DELAY_MS)).await;
                    if pool_size > 1 {
                        excluded.push(account_index);
                    }
                    continue;
                }
            };

            let status = response.status().as_u16();
            log_upstream(params.method, params.model.unwrap_or(""), &creds.account_key, status);

            if status != 429 {
                return Ok(StreamingOutcome::Live(response));
            }

            let buffered = upstream_client::buffer_response(response).await?;
            let model_id = params.model.unwrap_or("").to_string();
            let retry_delay_ms = parse_retry_delay_from_body(&buffered.body);
            self.quota
                .record_cooldown(&model_id, &creds.account_key, retry_delay_ms)
                .await;
            self.quota
                .record_last_error(
                    &model_id,
                    LastError {
                        status: buffered.status,
                        headers: buffered.headers.clone(),
                        body: buffered.body.clone(),
                    },
                )
                .await;
            last_429 = Some(buffered.clone());

            if pool_size == 1 {
                match retry_delay_ms {
                    Some(ms) if ms <= SHORT_RETRY_HINT_THRESHOLD_MS => {
                        log_retry(&model_id, &creds.account_key, attempt as u32, ms + 200);
                        tokio::time::sleep(Duration::from_millis(ms + 200)).await;
                        continue;
                    }
                    _ => return Ok(StreamingOutcome::Buffered(buffered)),
                }
            } else {
                match retry_delay_ms {
                    Some(ms) if ms <= SHORT_RETRY_HINT_THRESHOLD_MS => {
                        tokio::time::sleep(Duration::from_millis(FIXED_RETRY_DELAY_MS)).await;
                    }
                    None => {
                        tokio::time::sleep(Duration::from_millis(FIXED_RETRY_DELAY_MS)).await;
                    }
                    _ => {}
                }
                excluded.push(account_index);
                continue;
            }
        }

        if let Some(last) = last_429 {
            return Ok(StreamingOutcome::Buffered(last));
        }
        if let Some(model) = params.model {
            if let Some(cached) = self.quota.cached_error(model).await {
                return Ok(StreamingOutcome::Buffered(fast_fail_response(Some(cached))));
            }
        }
        Err(crate::error::AppError::Internal("upstream attempts exhausted".to_string()))
    }

    async fn select_account(&self, params: &CallParams<'_>, excluded: &[usize]) -> AppResult<Selection> {
        let Some(model) = params.model else {
            let group = Group::Claude;
            let index = self.auth.current_index(&group).await?;
            return Ok(Selection::Account(index));
        };

        let group = group_for_model(model);
        let pool_len = self.auth.store().len().await;
        if pool_len == 0 {
            return Err(crate::error::AppError::PoolEmpty);
        }

        let account_keys = self.account_keys().await;
        let wait_deadline = Duration::from_millis(3_000);
        let mut waited_once = false;
        let start = tokio::time::Instant::now();
        loop {
            if start.elapsed() > wait_deadline {
                break;
            }
            match self.quota.pick(model, &account_keys, excluded, COOLDOWN_WAIT_THRESHOLD_MS).await {
                Pick::Pick { account_index } => return Ok(Selection::Account(account_index)),
                Pick::FastFail(cached) => return Ok(Selection::FastFail(cached)),
                Pick::Wait { wait_ms } => {
                    if waited_once {
                        return Ok(Selection::FastFail(self.quota.cached_error(model).await));
                    }
                    waited_once = true;
                    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                }
            }
        }

        let index = self.auth.current_index(&group).await?;
        Ok(Selection::Account(index))
    }

    async fn account_keys(&self) -> Vec<String> {
        let len = self.auth.store().len().await;
        let mut keys = Vec::with_capacity(len);
        for index in 0..len {
            let key = self
                .auth
                .store()
                .with_account(index, |account| {
                    account.record.try_read().ok().map(|r| crate::credential::account_key(&r))
                })
                .await
                .ok()
                .flatten()
                .unwrap_or_else(|| format!("account-{index}"));
            keys.push(key);
        }
        keys
    }
}

enum Selection {
    Account(usize),
    FastFail(Option<LastError>),
}

/// Result of a streaming-path call: either the live upstream response ready
/// to pipe through, or a fully buffered one (error/fast-fail paths).
pub enum StreamingOutcome {
    Live(wreq::Response),
    Buffered(RawResponse),
}

fn fast_fail_response(cached: Option<LastError>) -> RawResponse {
    match cached {
        Some(err) => RawResponse { status: err.status, headers: err.headers, body: err.body },
        None => {
            let body = serde_json::json!({
                "error": { "code": 429, "message": "resource exhausted", "status": "RESOURCE_EXHAUSTED" }
            });
            RawResponse {
                status: 429,
                headers: vec![("content-type".to_string(), "application/json".to_string())],
                body: bytes::Bytes::from(body.to_string()),
            }
        }
    }
}

fn parse_retry_delay_from_body(body: &bytes::Bytes) -> Option<u64> {
    let parsed: JsonValue = serde_json::from_slice(body).ok()?;
    let envelope: ag2_protocol::internal::UpstreamErrorEnvelope = serde_json::from_value(parsed).ok()?;

    let retry_info = envelope.error.retry_delay().and_then(ag2_transform::duration::parse_duration_ms);
    let quota_reset = envelope.error.quota_reset_delay().and_then(ag2_transform::duration::parse_duration_ms);

    match (retry_info, quota_reset) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_by_model_substring() {
        assert!(matches!(group_for_model("gemini-2.5-pro"), Group::Gemini));
        assert!(matches!(group_for_model("claude-sonnet-4-5"), Group::Claude));
    }
}
