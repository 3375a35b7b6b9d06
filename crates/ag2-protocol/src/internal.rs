//! The `v1internal:*` wire envelope used against the Code Assist backend.
//!
//! Every call (`generateContent`, `streamGenerateContent`, `countTokens`,
//! `loadCodeAssist`, `onboardUser`) is wrapped in an outer object carrying
//! the resolved GCP project, a request id, and the inner provider-shaped
//! request keyed under `request`.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Serialize)]
pub struct V1InternalEnvelope<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub model: String,
    pub request: T,
    #[serde(rename = "userAgent", skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl<T> V1InternalEnvelope<T> {
    pub fn new(model: impl Into<String>, request: T) -> Self {
        Self {
            project: None,
            request_id: None,
            model: model.into(),
            request,
            user_agent: None,
        }
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoadCodeAssistResponse {
    #[serde(default, rename = "cloudaicompanionProject")]
    pub cloudaicompanion_project: Option<String>,
    #[serde(default, rename = "currentTier")]
    pub current_tier: Option<JsonValue>,
    #[serde(default, rename = "allowedTiers")]
    pub allowed_tiers: Vec<JsonValue>,
}

/// Deserialized body of a non-2xx response from the Code Assist backend.
///
/// Google's error envelope wraps everything in `{"error": {...}}`; the
/// `details[]` array may carry a `RetryInfo` (gRPC-style, `@type` suffix
/// `google.rpc.RetryInfo`) with a `retryDelay` duration string, or a
/// `quotaResetDelay` field surfaced directly in `error.metadata` map.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamErrorEnvelope {
    pub error: UpstreamErrorBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamErrorBody {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub details: Vec<JsonValue>,
}

impl UpstreamErrorBody {
    /// Locates the `retryDelay` field of a `google.rpc.RetryInfo` detail, if
    /// present, as a raw duration string (e.g. `"12.5s"`).
    pub fn retry_delay(&self) -> Option<&str> {
        self.details.iter().find_map(|detail| {
            let ty = detail.get("@type")?.as_str()?;
            if !ty.ends_with("RetryInfo") {
                return None;
            }
            detail.get("retryDelay")?.as_str()
        })
    }

    /// Locates a `quotaResetDelay` string nested in any detail's `metadata`
    /// map, regardless of the detail's `@type`.
    pub fn quota_reset_delay(&self) -> Option<&str> {
        self.details.iter().find_map(|detail| {
            detail.get("metadata")?.get("quotaResetDelay")?.as_str()
        })
    }
}
