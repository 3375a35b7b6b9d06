//! Non-streaming upstream `GenerateContentResponse` → Anthropic response.
//!
//! The governing rule (invariant U1) is that a thought signature must land
//! in the exact block position where the upstream produced it — see the
//! module tests for the edge cases this walk has to get right, and
//! [`crate::stream`] for the streaming twin of this state machine.

use ag2_protocol::anthropic::response::CreateMessageResponse;
use ag2_protocol::anthropic::types::{ContentBlock, JsonObject, StopReason, Usage};
use ag2_protocol::gemini::response::GenerateContentResponse;
use ag2_protocol::gemini::types::{FinishReason, Part};
use serde_json::Value as JsonValue;

enum CurrentBlock {
    Text(String),
    Thinking { text: String, signature: Option<String> },
}

struct Walk {
    current: Option<CurrentBlock>,
    trailing_signature: Option<String>,
    blocks: Vec<ContentBlock>,
    saw_tool_use: bool,
}

impl Walk {
    fn new() -> Self {
        Self {
            current: None,
            trailing_signature: None,
            blocks: Vec::new(),
            saw_tool_use: false,
        }
    }

    fn flush_current(&mut self) {
        match self.current.take() {
            Some(CurrentBlock::Text(text)) => self.blocks.push(ContentBlock::Text { text }),
            Some(CurrentBlock::Thinking { text, signature }) => self.blocks.push(ContentBlock::Thinking {
                thinking: text,
                signature: signature.unwrap_or_default(),
            }),
            None => {}
        }
    }

    fn flush_trailing(&mut self) {
        if let Some(signature) = self.trailing_signature.take() {
            self.blocks.push(ContentBlock::Thinking {
                thinking: String::new(),
                signature,
            });
        }
    }

    fn process_part(&mut self, part: &Part) {
        let has_text = part.text.as_deref().map(|t| !t.is_empty()).unwrap_or(false);
        let is_thought = part.thought.unwrap_or(false);
        let signature = part.thought_signature.clone();

        if let Some(call) = &part.function_call {
            self.flush_current();
            self.flush_trailing();
            self.saw_tool_use = true;
            self.blocks.push(ContentBlock::ToolUse {
                id: call.id.clone().unwrap_or_default(),
                name: call.name.clone(),
                input: value_to_json_object(call.args.clone().unwrap_or(JsonValue::Null)),
                thought_signature: signature,
            });
            return;
        }

        if !has_text && !is_thought && signature.is_some() {
            self.trailing_signature = signature;
            return;
        }

        if has_text && is_thought {
            match &mut self.current {
                Some(CurrentBlock::Thinking { text, signature: sig_slot }) => {
                    text.push_str(part.text.as_deref().unwrap_or(""));
                    if signature.is_some() {
                        *sig_slot = signature;
                    }
                }
                _ => {
                    self.flush_current();
                    self.current = Some(CurrentBlock::Thinking {
                        text: part.text.clone().unwrap_or_default(),
                        signature,
                    });
                }
            }
            return;
        }

        if has_text && signature.is_some() {
            self.flush_current();
            self.blocks.push(ContentBlock::Thinking {
                thinking: String::new(),
                signature: signature.unwrap(),
            });
            self.current = Some(CurrentBlock::Text(part.text.clone().unwrap_or_default()));
            return;
        }

        if has_text {
            match &mut self.current {
                Some(CurrentBlock::Text(text)) => text.push_str(part.text.as_deref().unwrap_or("")),
                _ => {
                    self.flush_current();
                    self.current = Some(CurrentBlock::Text(part.text.clone().unwrap_or_default()));
                }
            }
        }
    }

    fn finish(mut self, finish_reason: Option<FinishReason>) -> (Vec<ContentBlock>, StopReason) {
        self.flush_current();
        self.flush_trailing();
        let stop_reason = if self.saw_tool_use {
            StopReason::ToolUse
        } else if finish_reason == Some(FinishReason::MaxTokens) {
            StopReason::MaxTokens
        } else {
            StopReason::EndTurn
        };
        (self.blocks, stop_reason)
    }
}

fn value_to_json_object(value: JsonValue) -> JsonObject {
    match value {
        JsonValue::Object(map) => map.into_iter().collect(),
        _ => JsonObject::new(),
    }
}

pub fn build_response(
    upstream: &GenerateContentResponse,
    response_id: impl Into<String>,
    client_model: impl Into<String>,
) -> CreateMessageResponse {
    let candidate = upstream.candidates.first();
    let mut walk = Walk::new();
    let finish_reason = candidate.and_then(|c| c.finish_reason);
    if let Some(candidate) = candidate {
        for part in &candidate.content.parts {
            walk.process_part(part);
        }
    }
    let (content, stop_reason) = walk.finish(finish_reason);

    let usage = upstream
        .usage_metadata
        .as_ref()
        .map(map_usage)
        .unwrap_or_default();

    CreateMessageResponse {
        id: response_id.into(),
        r#type: "message".to_string(),
        role: "assistant".to_string(),
        model: client_model.into(),
        content,
        stop_reason: Some(stop_reason),
        stop_sequence: None,
        usage,
    }
}

/// Exposed for [`crate::stream`]'s callers, which need the same
/// prompt/total-vs-candidates fallback while accumulating usage across
/// chunks instead of from a single response.
pub fn map_usage(usage: &ag2_protocol::gemini::types::UsageMetadata) -> Usage {
    let prompt = usage.prompt_token_count.unwrap_or(0);
    let total = usage.total_token_count.unwrap_or(0);
    let output = if total >= prompt {
        total - prompt
    } else {
        usage.candidates_token_count.unwrap_or(0) + usage.thoughts_token_count.unwrap_or(0)
    };
    Usage {
        input_tokens: prompt,
        output_tokens: output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag2_protocol::gemini::types::{Candidate, Content, FunctionCall, UsageMetadata};
    use serde_json::json;

    fn part_text(text: &str) -> Part {
        Part {
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn happy_path_single_text_part() {
        let upstream = GenerateContentResponse {
            candidates: vec![Candidate {
                content: Content {
                    parts: vec![part_text("hello")],
                    role: None,
                },
                finish_reason: Some(FinishReason::Stop),
                index: Some(0),
            }],
            usage_metadata: Some(UsageMetadata {
                prompt_token_count: Some(3),
                total_token_count: Some(5),
                ..Default::default()
            }),
            model_version: None,
        };
        let response = build_response(&upstream, "msg_1", "claude-sonnet-4-5");
        assert_eq!(response.content.len(), 1);
        match &response.content[0] {
            ContentBlock::Text { text } => assert_eq!(text, "hello"),
            other => panic!("unexpected block {other:?}"),
        }
        assert_eq!(response.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(response.usage.input_tokens, 3);
        assert_eq!(response.usage.output_tokens, 2);
    }

    #[test]
    fn trailing_signature_before_function_call_emits_standalone_thinking_block() {
        let signature_only = Part {
            text: Some(String::new()),
            thought_signature: Some("SIG1".to_string()),
            ..Default::default()
        };
        let call_part = Part {
            function_call: Some(FunctionCall {
                id: Some("t1".to_string()),
                name: "x".to_string(),
                args: Some(json!({})),
            }),
            ..Default::default()
        };
        let upstream = GenerateContentResponse {
            candidates: vec![Candidate {
                content: Content {
                    parts: vec![signature_only, call_part],
                    role: None,
                },
                finish_reason: None,
                index: Some(0),
            }],
            usage_metadata: None,
            model_version: None,
        };
        let response = build_response(&upstream, "msg_2", "claude-sonnet-4-5");
        assert_eq!(response.content.len(), 2);
        match &response.content[0] {
            ContentBlock::Thinking { thinking, signature } => {
                assert_eq!(thinking, "");
                assert_eq!(signature, "SIG1");
            }
            other => panic!("unexpected block {other:?}"),
        }
        match &response.content[1] {
            ContentBlock::ToolUse { name, id, .. } => {
                assert_eq!(name, "x");
                assert_eq!(id, "t1");
            }
            other => panic!("unexpected block {other:?}"),
        }
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
    }
}
