//! Model listings for `GET /v1/models` and `GET /v1beta/models[/:name]`.
//!
//! The Claude-facing list is the fixed alias table C8 maps through (spec
//! §4.8's "fixed table"); the Gemini-facing list is fetched live from the
//! same `fetchAvailableModels` call C6's quota refresher uses, filtered to
//! IDs containing "gemini", with a static fallback if no account can serve
//! the request yet.

use std::sync::Arc;

use ag2_core::credential::Group;
use ag2_core::AppState;
use ag2_protocol::anthropic::types::ModelInfo as ClaudeModelInfo;
use ag2_protocol::gemini::types::ModelInfo as GeminiModelInfo;
use ag2_transform::model_table;
use serde_json::Value as JsonValue;

const FALLBACK_CREATED_AT: &str = "2025-01-01T00:00:00Z";

pub fn claude_models() -> Vec<ClaudeModelInfo> {
    let mut seen = std::collections::HashSet::new();
    let mut models = Vec::new();
    for (alias, upstream) in model_table::aliases() {
        if !seen.insert(*upstream) {
            continue;
        }
        models.push(ClaudeModelInfo {
            id: alias.to_string(),
            display_name: upstream.to_string(),
            r#type: "model".to_string(),
            created_at: FALLBACK_CREATED_AT.to_string(),
        });
    }
    models
}

pub async fn gemini_models(state: &Arc<AppState>) -> Vec<GeminiModelInfo> {
    let raw = fetch_raw_models(state).await;
    let mut models: Vec<GeminiModelInfo> = raw
        .iter()
        .filter_map(parse_gemini_model)
        .filter(|model| model.name.contains("gemini"))
        .collect();
    if models.is_empty() {
        models.push(fallback_gemini_model(model_table::FLASH_MODEL));
        models.push(fallback_gemini_model("gemini-2.5-pro"));
    }
    models
}

async fn fetch_raw_models(state: &Arc<AppState>) -> Vec<JsonValue> {
    let Ok(index) = state.auth.current_index(&Group::Gemini).await else {
        return Vec::new();
    };
    let Ok(creds) = state.auth.get_credentials_for_index(index).await else {
        return Vec::new();
    };
    let Ok(raw) = ag2_core::upstream_client::list_models(&creds.access_token).await else {
        return Vec::new();
    };
    let Ok(body) = raw.json() else {
        return Vec::new();
    };
    body.get("models").and_then(|v| v.as_array()).cloned().unwrap_or_default()
}

fn parse_gemini_model(raw: &JsonValue) -> Option<GeminiModelInfo> {
    let name = raw.get("name")?.as_str()?.to_string();
    Some(GeminiModelInfo {
        display_name: raw
            .get("displayName")
            .and_then(|v| v.as_str())
            .unwrap_or(&name)
            .to_string(),
        description: raw.get("description").and_then(|v| v.as_str()).unwrap_or("").to_string(),
        input_token_limit: raw.get("inputTokenLimit").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        output_token_limit: raw.get("outputTokenLimit").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        name,
    })
}

fn fallback_gemini_model(id: &str) -> GeminiModelInfo {
    GeminiModelInfo {
        name: format!("models/{id}"),
        display_name: id.to_string(),
        description: String::new(),
        input_token_limit: 0,
        output_token_limit: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_models_dedups_by_upstream_id() {
        let models = claude_models();
        let mut seen = std::collections::HashSet::new();
        for model in &models {
            assert!(seen.insert(model.display_name.clone()), "duplicate upstream id {}", model.display_name);
        }
        assert!(!models.is_empty());
    }

    #[test]
    fn fallback_gemini_model_prefixes_name() {
        let model = fallback_gemini_model("gemini-2.5-flash");
        assert_eq!(model.name, "models/gemini-2.5-flash");
    }
}
