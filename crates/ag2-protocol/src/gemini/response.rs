use serde::{Deserialize, Serialize};

use super::types::{Candidate, UsageMetadata};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(
        default,
        rename = "usageMetadata",
        skip_serializing_if = "Option::is_none"
    )]
    pub usage_metadata: Option<UsageMetadata>,
    #[serde(
        default,
        rename = "modelVersion",
        skip_serializing_if = "Option::is_none"
    )]
    pub model_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountTokensResponse {
    #[serde(rename = "totalTokens")]
    pub total_tokens: u32,
}
