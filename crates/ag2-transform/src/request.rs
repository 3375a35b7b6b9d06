//! Anthropic request → upstream `generateContent` body.
//!
//! See module-level docs on [`crate::response`] for the inverse direction
//! and the thought-signature invariant both directions must respect.

use std::collections::HashMap;

use ag2_protocol::anthropic::request::CreateMessageRequest;
use ag2_protocol::anthropic::types::{
    ContentBlockParam, ImageSource, MessageContent, Role, SystemBlock, SystemParam, ThinkingConfigParam,
    Tool, ToolResultContent,
};
use ag2_protocol::gemini::request::GenerateContentRequest;
use ag2_protocol::gemini::types::{
    Blob, Content, ContentRole, FunctionCall, FunctionDeclaration, FunctionResponse, GenerationConfig,
    GoogleSearch, HarmBlockThreshold, Part, SafetySetting, ThinkingConfig,
    Tool as UpstreamTool,
};
use serde_json::{json, Value as JsonValue};

use crate::model_table;
use crate::schema_clean::clean_input_schema;

const NO_CONTENT_SENTINEL: &str = "(no content)";
const FLASH_THINKING_BUDGET_CAP: u32 = 24_576;
const MAX_OUTPUT_TOKENS: u32 = 64_000;

pub struct BuiltRequest {
    pub upstream_model: String,
    pub request_type: &'static str,
    pub body: GenerateContentRequest,
}

/// Builds the upstream body for a single Anthropic `CreateMessageRequest`.
///
/// `buildBody` in the orchestrator's sense (the `project`/`requestId`
/// wrapping) is deliberately not done here — see [`ag2_protocol::internal`].
pub fn build_request(request: &CreateMessageRequest) -> BuiltRequest {
    let mut tool_use_names: HashMap<String, String> = HashMap::new();
    let mut contents = Vec::new();

    if let Some(system) = &request.system {
        let text = flatten_system(system);
        if !text.is_empty() {
            contents.push(Content {
                parts: vec![Part::text(text)],
                role: Some(ContentRole::User),
            });
        }
    }

    for message in &request.messages {
        let role = match message.role {
            Role::User => ContentRole::User,
            Role::Assistant => ContentRole::Model,
        };
        let parts = map_message_content(&message.content, &mut tool_use_names);
        if !parts.is_empty() {
            contents.push(Content {
                parts,
                role: Some(role),
            });
        }
    }

    let tools_in = request.tools.as_deref().unwrap_or(&[]);
    let has_web_search = tools_in.iter().any(Tool::is_web_search);

    let upstream_model = if has_web_search {
        model_table::FLASH_MODEL.to_string()
    } else {
        model_table::resolve_upstream_model(&request.model).to_string()
    };

    let tools = map_tools(tools_in, has_web_search);
    let generation_config = build_generation_config(request, &upstream_model, has_web_search);

    let body = GenerateContentRequest {
        contents,
        system_instruction: None,
        tools,
        tool_config: None,
        generation_config: Some(generation_config),
        safety_settings: Some(all_safety_off()),
    };

    BuiltRequest {
        upstream_model,
        request_type: if has_web_search {
            "web_search"
        } else {
            "generate_content"
        },
        body,
    }
}

fn flatten_system(system: &SystemParam) -> String {
    match system {
        SystemParam::Text(text) => text.clone(),
        SystemParam::Blocks(blocks) => blocks
            .iter()
            .map(|SystemBlock { text, .. }| text.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn map_message_content(content: &MessageContent, tool_use_names: &mut HashMap<String, String>) -> Vec<Part> {
    match content {
        MessageContent::Text(text) => {
            if text == NO_CONTENT_SENTINEL {
                Vec::new()
            } else {
                vec![Part::text(text.clone())]
            }
        }
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|block| map_block(block, tool_use_names))
            .collect(),
    }
}

fn map_block(block: &ContentBlockParam, tool_use_names: &mut HashMap<String, String>) -> Option<Part> {
    match block {
        ContentBlockParam::Text { text } => {
            if text == NO_CONTENT_SENTINEL {
                None
            } else {
                Some(Part::text(text.clone()))
            }
        }
        ContentBlockParam::Image { source } => match source {
            ImageSource::Base64 { data, media_type } => Some(Part {
                inline_data: Some(Blob {
                    mime_type: media_type_to_str(media_type).to_string(),
                    data: data.clone(),
                }),
                ..Default::default()
            }),
            ImageSource::Url { .. } => None,
        },
        ContentBlockParam::Thinking { thinking, signature } => Some(Part {
            text: Some(thinking.clone()),
            thought: Some(true),
            thought_signature: signature.clone(),
            ..Default::default()
        }),
        ContentBlockParam::RedactedThinking { data } => Some(Part {
            text: Some(data.clone()),
            thought: Some(true),
            ..Default::default()
        }),
        ContentBlockParam::ToolUse {
            id,
            name,
            input,
            thought_signature,
        } => {
            tool_use_names.insert(id.clone(), name.clone());
            let args = serde_json::to_value(input).unwrap_or(JsonValue::Null);
            Some(Part {
                function_call: Some(FunctionCall {
                    id: Some(id.clone()),
                    name: name.clone(),
                    args: Some(args),
                }),
                thought_signature: thought_signature.clone(),
                ..Default::default()
            })
        }
        ContentBlockParam::ToolResult {
            tool_use_id,
            content,
            ..
        } => {
            let name = tool_use_names
                .get(tool_use_id)
                .cloned()
                .unwrap_or_else(|| tool_use_id.clone());
            let result_text = flatten_tool_result(content.as_ref());
            Some(Part {
                function_response: Some(FunctionResponse {
                    id: Some(tool_use_id.clone()),
                    name,
                    response: json!({ "result": result_text }),
                }),
                ..Default::default()
            })
        }
    }
}

fn flatten_tool_result(content: Option<&ToolResultContent>) -> String {
    match content {
        None => String::new(),
        Some(ToolResultContent::Text(text)) => text.clone(),
        Some(ToolResultContent::Blocks(blocks)) => blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlockParam::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn media_type_to_str(media_type: &ag2_protocol::anthropic::types::ImageMediaType) -> &'static str {
    use ag2_protocol::anthropic::types::ImageMediaType::*;
    match media_type {
        ImageJpeg => "image/jpeg",
        ImagePng => "image/png",
        ImageGif => "image/gif",
        ImageWebp => "image/webp",
    }
}

fn map_tools(tools: &[Tool], has_web_search: bool) -> Option<Vec<UpstreamTool>> {
    if has_web_search {
        return Some(vec![UpstreamTool {
            function_declarations: None,
            google_search: Some(GoogleSearch {}),
        }]);
    }
    if tools.is_empty() {
        return None;
    }
    let declarations: Vec<FunctionDeclaration> = tools
        .iter()
        .filter_map(|tool| match tool {
            Tool::Custom(custom) => Some(FunctionDeclaration {
                name: custom.name.clone(),
                description: custom.description.clone(),
                parameters_json_schema: Some(clean_input_schema(
                    &serde_json::to_value(&custom.input_schema).unwrap_or(JsonValue::Null),
                )),
            }),
            Tool::WebSearch(_) => None,
        })
        .collect();
    if declarations.is_empty() {
        None
    } else {
        Some(vec![UpstreamTool {
            function_declarations: Some(declarations),
            google_search: None,
        }])
    }
}

fn build_generation_config(
    request: &CreateMessageRequest,
    upstream_model: &str,
    has_web_search: bool,
) -> GenerationConfig {
    let thinking_enabled = matches!(request.thinking, Some(ThinkingConfigParam::Enabled { .. })) || has_web_search;

    let mut thinking_budget = match &request.thinking {
        Some(ThinkingConfigParam::Enabled { budget_tokens }) => Some(*budget_tokens),
        _ => None,
    };
    if has_web_search {
        thinking_budget = Some(thinking_budget.unwrap_or(FLASH_THINKING_BUDGET_CAP));
    }
    if upstream_model.contains("flash") {
        thinking_budget = thinking_budget.map(|budget| budget.min(FLASH_THINKING_BUDGET_CAP));
    }

    let thinking_config = if thinking_enabled || thinking_budget.is_some() {
        Some(ThinkingConfig {
            include_thoughts: thinking_enabled,
            thinking_budget,
        })
    } else {
        None
    };

    GenerationConfig {
        max_output_tokens: Some(MAX_OUTPUT_TOKENS),
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: request.top_k,
        stop_sequences: request.stop_sequences.clone(),
        thinking_config,
    }
}

fn all_safety_off() -> Vec<SafetySetting> {
    [
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
    ]
    .into_iter()
    .map(|category| SafetySetting {
        category: category.to_string(),
        threshold: HarmBlockThreshold::BlockNone,
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag2_protocol::anthropic::types::MessageParam;

    fn user_text(text: &str) -> MessageParam {
        MessageParam {
            role: Role::User,
            content: MessageContent::Text(text.to_string()),
        }
    }

    #[test]
    fn drops_no_content_sentinel() {
        let request = CreateMessageRequest {
            model: "claude-sonnet-4-5".to_string(),
            messages: vec![user_text(NO_CONTENT_SENTINEL)],
            system: None,
            max_tokens: 0,
            stream: false,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            thinking: None,
            tools: None,
        };
        let built = build_request(&request);
        assert!(built.body.contents.is_empty());
    }

    #[test]
    fn web_search_tool_forces_flash_and_request_type() {
        let request = CreateMessageRequest {
            model: "claude-sonnet-4-5".to_string(),
            messages: vec![user_text("search the web")],
            system: None,
            max_tokens: 0,
            stream: false,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            thinking: None,
            tools: Some(vec![Tool::WebSearch(
                ag2_protocol::anthropic::types::WebSearchTool {
                    name: "web_search".to_string(),
                    r#type: "web_search_20250305".to_string(),
                },
            )]),
        };
        let built = build_request(&request);
        assert_eq!(built.upstream_model, model_table::FLASH_MODEL);
        assert_eq!(built.request_type, "web_search");
        let thinking = built.body.generation_config.unwrap().thinking_config.unwrap();
        assert_eq!(thinking.thinking_budget, Some(FLASH_THINKING_BUDGET_CAP));
    }
}
