//! C2: low-level, stateless bearer-authenticated HTTP helpers. No retry or
//! rotation logic lives here — that's [`crate::orchestrator`]'s job. Every
//! call goes through the caller-supplied [`RateGate`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::AppError;
use crate::rate_gate::RateGate;

pub const UPSTREAM_HOST: &str = "https://daily-cloudcode-pa.sandbox.googleapis.com";
const USER_AGENT: &str = "ag2api/0.1 (+https://github.com/ag2api/ag2api)";
const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Result<JsonValue, AppError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

fn build_client() -> Result<wreq::Client, AppError> {
    wreq::Client::builder()
        .build()
        .map_err(|err| AppError::Internal(format!("failed to build http client: {err}")))
}

/// Reads a still-live response into a [`RawResponse`]. Exposed so streaming
/// callers can fall back to buffering on error/fast-fail paths.
pub async fn buffer_response(response: wreq::Response) -> Result<RawResponse, AppError> {
    to_raw_response(response).await
}

async fn to_raw_response(response: wreq::Response) -> Result<RawResponse, AppError> {
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.as_str().to_string(), value.to_string()))
        })
        .collect();
    let body = response.bytes().await?;
    Ok(RawResponse { status, headers, body })
}

/// `POST https://<host>/v1internal:<method>[?<query>]`, buffering the body.
pub async fn call_v1_internal<T: Serialize>(
    gate: &RateGate,
    access_token: &str,
    method: &str,
    body: &T,
    query: Option<&str>,
) -> Result<RawResponse, AppError> {
    let response = call_v1_internal_raw(gate, access_token, method, body, query).await?;
    to_raw_response(response).await
}

/// Same request, but returns the live [`wreq::Response`] unconsumed so a
/// caller can pipe its body straight through as an SSE stream instead of
/// buffering it.
pub async fn call_v1_internal_raw<T: Serialize>(
    gate: &RateGate,
    access_token: &str,
    method: &str,
    body: &T,
    query: Option<&str>,
) -> Result<wreq::Response, AppError> {
    gate.wait().await;
    let client = build_client()?;
    let mut url = format!("{UPSTREAM_HOST}/v1internal:{method}");
    if let Some(query) = query {
        url.push('?');
        url.push_str(query);
    }
    let response = client
        .post(url)
        .header("Authorization", format!("Bearer {access_token}"))
        .header("Content-Type", "application/json")
        .header("User-Agent", USER_AGENT)
        .header("Accept-Encoding", "gzip")
        .json(body)
        .send()
        .await?;
    Ok(response)
}

/// `loadCodeAssist`: a missing `projectId` in a 200 body is not an error —
/// the caller may fall back to synthesizing one.
pub async fn load_project_id(gate: &RateGate, access_token: &str) -> Result<RawResponse, AppError> {
    let body = serde_json::json!({ "metadata": {} });
    call_v1_internal(gate, access_token, "loadCodeAssist", &body, None).await
}

/// Not routed through [`RateGate`] — catalog refreshes are infrequent
/// background polls, not on the request-serving path §4.7 paces.
pub async fn list_models(access_token: &str) -> Result<RawResponse, AppError> {
    let client = build_client()?;
    let response = client
        .get(format!("{UPSTREAM_HOST}/v1internal:fetchAvailableModels"))
        .header("Authorization", format!("Bearer {access_token}"))
        .header("User-Agent", USER_AGENT)
        .send()
        .await?;
    to_raw_response(response).await
}

pub async fn user_info(gate: &RateGate, access_token: &str) -> Result<JsonValue, AppError> {
    gate.wait().await;
    let client = build_client()?;
    let response = client
        .get(USERINFO_URL)
        .header("Authorization", format!("Bearer {access_token}"))
        .send()
        .await?;
    let raw = to_raw_response(response).await?;
    raw.json()
}

#[derive(Serialize)]
struct AuthCodeExchangeForm<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    code: &'a str,
    redirect_uri: &'a str,
    grant_type: &'static str,
}

pub async fn exchange_auth_code(
    gate: &RateGate,
    code: &str,
    redirect_uri: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<TokenResponse, AppError> {
    gate.wait().await;
    let client = build_client()?;
    let form = AuthCodeExchangeForm {
        client_id,
        client_secret,
        code,
        redirect_uri,
        grant_type: "authorization_code",
    };
    let response = client.post(OAUTH_TOKEN_URL).form(&form).send().await?;
    let raw = to_raw_response(response).await?;
    if !raw.is_success() {
        return Err(AppError::Internal(format!(
            "auth code exchange failed: {} {}",
            raw.status,
            String::from_utf8_lossy(&raw.body)
        )));
    }
    Ok(serde_json::from_slice(&raw.body)?)
}

#[derive(Serialize)]
struct RefreshTokenForm<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    refresh_token: &'a str,
    grant_type: &'static str,
}

pub async fn refresh_token(
    gate: &RateGate,
    refresh_token_value: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<TokenResponse, AppError> {
    gate.wait().await;
    let client = build_client()?;
    let form = RefreshTokenForm {
        client_id,
        client_secret,
        refresh_token: refresh_token_value,
        grant_type: "refresh_token",
    };
    let response = client.post(OAUTH_TOKEN_URL).form(&form).send().await?;
    let raw = to_raw_response(response).await?;
    if !raw.is_success() {
        return Err(AppError::Internal(format!(
            "refresh_token failed: {} {}",
            raw.status,
            String::from_utf8_lossy(&raw.body)
        )));
    }
    Ok(serde_json::from_slice(&raw.body)?)
}
