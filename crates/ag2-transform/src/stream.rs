//! SSE streaming twin of [`crate::response`]: a mutable state machine fed
//! one upstream [`Part`] at a time, emitting Anthropic [`StreamEvent`]s.
//!
//! No async is required here (see the Design Notes' "coroutine stream
//! semantics" note) — the state machine is a plain struct plus a method
//! that returns the events produced by each new part; the caller owns
//! pumping bytes off the wire and driving this with whatever I/O model it
//! likes.

use ag2_protocol::anthropic::stream::{ContentBlockDelta, StreamContentBlock, StreamEvent, StreamMessage, StreamMessageDelta};
use ag2_protocol::anthropic::types::{StopReason, Usage};
use ag2_protocol::gemini::types::{FinishReason, Part};
use serde_json::Value as JsonValue;

enum CurrentBlock {
    None,
    Text,
    Thinking { signature: Option<String> },
    Function,
}

pub struct StreamTranslator {
    message_id: String,
    client_model: String,
    index: u32,
    current: CurrentBlock,
    trailing_signature: Option<String>,
    saw_tool_use: bool,
}

impl StreamTranslator {
    pub fn new(message_id: impl Into<String>, client_model: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            client_model: client_model.into(),
            index: 0,
            current: CurrentBlock::None,
            trailing_signature: None,
            saw_tool_use: false,
        }
    }

    /// Emits the single `message_start` event. `initial_usage` is typically
    /// `{input_tokens, output_tokens: 0}` — the full output count isn't
    /// known until the stream closes.
    pub fn start(&mut self, initial_usage: Usage) -> Vec<StreamEvent> {
        vec![StreamEvent::MessageStart {
            message: StreamMessage {
                id: self.message_id.clone(),
                r#type: "message".to_string(),
                role: "assistant".to_string(),
                model: self.client_model.clone(),
                content: Vec::new(),
                stop_reason: None,
                stop_sequence: None,
                usage: initial_usage,
            },
        }]
    }

    pub fn process_part(&mut self, part: &Part) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let has_text = part.text.as_deref().map(|t| !t.is_empty()).unwrap_or(false);
        let is_thought = part.thought.unwrap_or(false);
        let signature = part.thought_signature.clone();

        if let Some(call) = &part.function_call {
            events.extend(self.close_current());
            events.extend(self.flush_trailing());
            self.saw_tool_use = true;
            let args = call.args.clone().unwrap_or(JsonValue::Object(Default::default()));
            let index = self.index;
            events.push(StreamEvent::ContentBlockStart {
                index,
                content_block: StreamContentBlock::ToolUse {
                    id: call.id.clone().unwrap_or_default(),
                    name: call.name.clone(),
                    input: JsonValue::Object(Default::default()),
                    thought_signature: signature,
                },
            });
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: ContentBlockDelta::InputJsonDelta {
                    partial_json: serde_json::to_string(&args).unwrap_or_default(),
                },
            });
            self.current = CurrentBlock::Function;
            events.extend(self.close_current());
            return events;
        }

        if !has_text && !is_thought && signature.is_some() {
            self.trailing_signature = signature;
            return events;
        }

        if has_text && is_thought {
            if !matches!(self.current, CurrentBlock::Thinking { .. }) {
                events.extend(self.close_current());
                let index = self.index;
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: StreamContentBlock::Thinking {
                        thinking: String::new(),
                    },
                });
                self.current = CurrentBlock::Thinking { signature: None };
            }
            events.push(StreamEvent::ContentBlockDelta {
                index: self.index,
                delta: ContentBlockDelta::ThinkingDelta {
                    thinking: part.text.clone().unwrap_or_default(),
                },
            });
            if let CurrentBlock::Thinking { signature: slot } = &mut self.current {
                if signature.is_some() {
                    *slot = signature;
                }
            }
            return events;
        }

        if has_text && signature.is_some() {
            events.extend(self.close_current());
            let index = self.index;
            events.push(StreamEvent::ContentBlockStart {
                index,
                content_block: StreamContentBlock::Thinking {
                    thinking: String::new(),
                },
            });
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: ContentBlockDelta::SignatureDelta {
                    signature: signature.unwrap(),
                },
            });
            events.push(StreamEvent::ContentBlockStop { index });
            self.index += 1;
            self.current = CurrentBlock::None;

            events.extend(self.open_text_and_emit(part.text.as_deref().unwrap_or("")));
            return events;
        }

        if has_text {
            events.extend(self.open_text_and_emit(part.text.as_deref().unwrap_or("")));
        }

        events
    }

    fn open_text_and_emit(&mut self, text: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if !matches!(self.current, CurrentBlock::Text) {
            events.extend(self.close_current());
            let index = self.index;
            events.push(StreamEvent::ContentBlockStart {
                index,
                content_block: StreamContentBlock::Text {
                    text: String::new(),
                },
            });
            self.current = CurrentBlock::Text;
        }
        events.push(StreamEvent::ContentBlockDelta {
            index: self.index,
            delta: ContentBlockDelta::TextDelta {
                text: text.to_string(),
            },
        });
        events
    }

    fn close_current(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        match std::mem::replace(&mut self.current, CurrentBlock::None) {
            CurrentBlock::None => {}
            CurrentBlock::Text | CurrentBlock::Function => {
                events.push(StreamEvent::ContentBlockStop { index: self.index });
                self.index += 1;
            }
            CurrentBlock::Thinking { signature } => {
                if let Some(signature) = signature {
                    events.push(StreamEvent::ContentBlockDelta {
                        index: self.index,
                        delta: ContentBlockDelta::SignatureDelta { signature },
                    });
                }
                events.push(StreamEvent::ContentBlockStop { index: self.index });
                self.index += 1;
            }
        }
        events
    }

    fn flush_trailing(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if let Some(signature) = self.trailing_signature.take() {
            let index = self.index;
            events.push(StreamEvent::ContentBlockStart {
                index,
                content_block: StreamContentBlock::Thinking {
                    thinking: String::new(),
                },
            });
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: ContentBlockDelta::SignatureDelta { signature },
            });
            events.push(StreamEvent::ContentBlockStop { index });
            self.index += 1;
        }
        events
    }

    pub fn finish(&mut self, finish_reason: Option<FinishReason>, usage: Usage) -> Vec<StreamEvent> {
        let mut events = self.close_current();
        events.extend(self.flush_trailing());
        let stop_reason = if self.saw_tool_use {
            StopReason::ToolUse
        } else if finish_reason == Some(FinishReason::MaxTokens) {
            StopReason::MaxTokens
        } else {
            StopReason::EndTurn
        };
        events.push(StreamEvent::MessageDelta {
            delta: StreamMessageDelta {
                stop_reason: Some(stop_reason),
                stop_sequence: None,
            },
            usage,
        });
        events.push(StreamEvent::MessageStop);
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag2_protocol::gemini::types::FunctionCall;
    use serde_json::json;

    fn part_text(text: &str) -> Part {
        Part {
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn simple_text_stream_closes_before_message_stop() {
        let mut translator = StreamTranslator::new("msg_1", "claude-sonnet-4-5");
        let mut events = translator.start(Usage { input_tokens: 3, output_tokens: 0 });
        events.extend(translator.process_part(&part_text("hello")));
        events.extend(translator.finish(Some(FinishReason::Stop), Usage { input_tokens: 3, output_tokens: 1 }));

        let names: Vec<&str> = events.iter().map(StreamEvent::event_name).collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
    }

    #[test]
    fn trailing_signature_then_function_call_emits_thinking_then_tool_use() {
        let mut translator = StreamTranslator::new("msg_2", "claude-sonnet-4-5");
        let mut events = translator.start(Usage::default());
        events.extend(translator.process_part(&Part {
            text: Some(String::new()),
            thought_signature: Some("SIG1".to_string()),
            ..Default::default()
        }));
        events.extend(translator.process_part(&Part {
            function_call: Some(FunctionCall {
                id: Some("t1".to_string()),
                name: "x".to_string(),
                args: Some(json!({})),
            }),
            ..Default::default()
        }));
        events.extend(translator.finish(None, Usage::default()));

        let names: Vec<&str> = events.iter().map(StreamEvent::event_name).collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        match &events[7] {
            StreamEvent::MessageDelta { delta, .. } => {
                assert_eq!(delta.stop_reason, Some(StopReason::ToolUse));
            }
            other => panic!("expected message_delta, got {other:?}"),
        }
    }
}
