//! C9: the Google-compatible surface is a thin wrap/unwrap over the
//! v1internal envelope, plus a streaming-to-non-streaming aggregator for
//! "pro" models that must always stream upstream.

use ag2_protocol::gemini::response::GenerateContentResponse;
use ag2_protocol::gemini::types::{Candidate, Content, Part};
use ag2_transform::model_table::is_pro_variant;

/// `chunk.response || chunk` — some upstream SSE framings nest the payload
/// one level deeper under `response`.
pub fn unwrap_chunk(value: &serde_json::Value) -> serde_json::Value {
    value.get("response").cloned().unwrap_or_else(|| value.clone())
}

/// Pro-variant models must be asked with `alt=sse` even for non-streaming
/// calls; the caller aggregates the resulting chunk stream with
/// [`aggregate_chunks`].
pub fn must_force_stream(upstream_model: &str) -> bool {
    is_pro_variant(upstream_model)
}

fn is_plain_text(part: &Part) -> bool {
    part.text.is_some()
        && part.thought != Some(true)
        && part.inline_data.is_none()
        && part.function_call.is_none()
        && part.function_response.is_none()
}

fn is_thought_text(part: &Part) -> bool {
    part.text.is_some()
        && part.thought == Some(true)
        && part.inline_data.is_none()
        && part.function_call.is_none()
        && part.function_response.is_none()
}

fn merge_part(parts: &mut Vec<Part>, incoming: Part) {
    if let Some(last) = parts.last_mut() {
        if is_thought_text(last) && is_thought_text(&incoming) {
            if let (Some(last_text), Some(incoming_text)) = (&mut last.text, &incoming.text) {
                last_text.push_str(incoming_text);
            }
            if incoming.thought_signature.is_some() {
                last.thought_signature = incoming.thought_signature;
            }
            return;
        }
        if is_plain_text(last) && is_plain_text(&incoming) {
            if let (Some(last_text), Some(incoming_text)) = (&mut last.text, &incoming.text) {
                last_text.push_str(incoming_text);
            }
            if incoming.thought_signature.is_some() {
                last.thought_signature = incoming.thought_signature;
            }
            return;
        }
    }
    parts.push(incoming);
}

/// Merges a sequence of streamed [`GenerateContentResponse`] chunks into a
/// single response: within each candidate, consecutive plain-text parts
/// merge into one, and consecutive `thought:true` parts merge into one
/// (keeping the latest non-empty signature).
pub fn aggregate_chunks(chunks: Vec<GenerateContentResponse>) -> Option<GenerateContentResponse> {
    let mut candidates_by_index: Vec<Candidate> = Vec::new();
    let mut usage = None;
    let mut model_version = None;

    for chunk in chunks {
        if chunk.usage_metadata.is_some() {
            usage = chunk.usage_metadata;
        }
        if chunk.model_version.is_some() {
            model_version = chunk.model_version;
        }
        for candidate in chunk.candidates {
            let index = candidate.index.unwrap_or(0) as usize;
            while candidates_by_index.len() <= index {
                let next_index = candidates_by_index.len() as u32;
                candidates_by_index.push(Candidate {
                    content: Content { role: None, parts: Vec::new() },
                    finish_reason: None,
                    index: Some(next_index),
                });
            }
            let target = &mut candidates_by_index[index];
            if candidate.finish_reason.is_some() {
                target.finish_reason = candidate.finish_reason;
            }
            if candidate.content.role.is_some() {
                target.content.role = candidate.content.role;
            }
            for part in candidate.content.parts {
                merge_part(&mut target.content.parts, part);
            }
        }
    }

    if candidates_by_index.is_empty() {
        return None;
    }
    Some(GenerateContentResponse { candidates: candidates_by_index, usage_metadata: usage, model_version })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_part(text: &str, thought: Option<bool>) -> Part {
        Part { text: Some(text.to_string()), thought, ..Default::default() }
    }

    #[test]
    fn merges_consecutive_plain_text_parts() {
        let mut parts = vec![text_part("hello ", None)];
        merge_part(&mut parts, text_part("world", None));
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].text.as_deref(), Some("hello world"));
    }

    #[test]
    fn keeps_latest_signature_when_merging_thoughts() {
        let mut parts = vec![Part {
            text: Some("a".into()),
            thought: Some(true),
            thought_signature: Some("sig1".into()),
            ..Default::default()
        }];
        merge_part(
            &mut parts,
            Part {
                text: Some("b".into()),
                thought: Some(true),
                thought_signature: Some("sig2".into()),
                ..Default::default()
            },
        );
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].text.as_deref(), Some("ab"));
        assert_eq!(parts[0].thought_signature.as_deref(), Some("sig2"));
    }

    #[test]
    fn does_not_merge_text_with_thought() {
        let mut parts = vec![text_part("hello", None)];
        merge_part(&mut parts, text_part("thinking", Some(true)));
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn does_not_merge_function_call_into_text() {
        let mut parts = vec![text_part("hello", None)];
        merge_part(
            &mut parts,
            Part {
                function_call: Some(ag2_protocol::gemini::types::FunctionCall {
                    id: None,
                    name: "f".into(),
                    args: None,
                }),
                ..Default::default()
            },
        );
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn unwraps_nested_response_field() {
        let nested = serde_json::json!({ "response": { "candidates": [] } });
        let unwrapped = unwrap_chunk(&nested);
        assert_eq!(unwrapped, serde_json::json!({ "candidates": [] }));

        let bare = serde_json::json!({ "candidates": [] });
        assert_eq!(unwrap_chunk(&bare), bare);
    }
}
