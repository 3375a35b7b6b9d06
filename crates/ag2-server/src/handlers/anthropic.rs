//! `/v1/messages`, `/v1/messages/count_tokens`, `/v1/models` — C8's
//! translator driven by the orchestrator, wired to axum.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use uuid::Uuid;

use ag2_core::google_translate::unwrap_chunk;
use ag2_core::orchestrator::{CallParams, StreamingOutcome};
use ag2_core::AppState;
use ag2_protocol::anthropic::models::ListModelsResponse;
use ag2_protocol::anthropic::request::{CountTokensRequest, CreateMessageRequest};
use ag2_protocol::anthropic::response::CountTokensResponse;
use ag2_protocol::anthropic::stream::StreamEvent;
use ag2_protocol::anthropic::types::Usage;
use ag2_protocol::gemini::response::GenerateContentResponse;
use ag2_protocol::gemini::types::FinishReason;
use ag2_protocol::sse::{encode_named, SseEvent, SseParser};
use ag2_transform::response::{build_response, map_usage};
use ag2_transform::stream::StreamTranslator;

use crate::response::{json, json_error, raw_to_response, write_response, ResponseBody};

pub async fn list_models(State(_state): State<Arc<AppState>>) -> Response {
    let data = crate::catalog::claude_models();
    let first_id = data.first().map(|m| m.id.clone());
    let last_id = data.last().map(|m| m.id.clone());
    json(StatusCode::OK, &ListModelsResponse { data, has_more: false, first_id, last_id })
}

pub async fn create_message(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: CreateMessageRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(_) => return json_error(StatusCode::BAD_REQUEST, "Invalid JSON body"),
    };

    let built = ag2_transform::request::build_request(&request);
    let client_model = request.model.clone();
    let message_id = format!("msg_{}", Uuid::new_v4().simple());
    let body_value = serde_json::to_value(&built.body).unwrap_or(JsonValue::Null);

    if request.stream {
        let params = CallParams {
            method: "streamGenerateContent",
            model: Some(&built.upstream_model),
            query: Some("alt=sse"),
        };
        let outcome = state
            .orchestrator
            .call_v1_internal_streaming(params, move |_project| body_value.clone())
            .await;
        match outcome {
            Ok(StreamingOutcome::Live(response)) => {
                let (tx, rx) = mpsc::channel(32);
                tokio::spawn(pump_anthropic_stream(response, message_id, client_model, tx));
                write_response(
                    200,
                    vec![("content-type".to_string(), "text/event-stream".to_string())],
                    ResponseBody::Stream(rx),
                )
            }
            Ok(StreamingOutcome::Buffered(raw)) => raw_to_response(raw),
            Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        }
    } else {
        let params = CallParams { method: "generateContent", model: Some(&built.upstream_model), query: None };
        let outcome = state.orchestrator.call_v1_internal(params, move |_project| body_value.clone()).await;
        match outcome {
            Ok(raw) if raw.is_success() => match raw.json() {
                Ok(value) => match serde_json::from_value::<GenerateContentResponse>(unwrap_chunk(&value)) {
                    Ok(upstream) => json(StatusCode::OK, &build_response(&upstream, message_id, client_model)),
                    Err(err) => {
                        tracing::warn!(%err, "upstream generateContent body did not match expected shape");
                        json_error(StatusCode::INTERNAL_SERVER_ERROR, "malformed upstream response")
                    }
                },
                Err(err) => {
                    tracing::warn!(%err, "upstream generateContent body was not valid json");
                    json_error(StatusCode::INTERNAL_SERVER_ERROR, "malformed upstream response")
                }
            },
            Ok(raw) => raw_to_response(raw),
            Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        }
    }
}

pub async fn count_tokens(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: CountTokensRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(_) => return json_error(StatusCode::BAD_REQUEST, "Invalid JSON body"),
    };
    let as_message = CreateMessageRequest {
        model: request.model,
        messages: request.messages,
        system: request.system,
        max_tokens: 0,
        stream: false,
        temperature: None,
        top_p: None,
        top_k: None,
        stop_sequences: None,
        thinking: None,
        tools: request.tools,
    };
    let built = ag2_transform::request::build_request(&as_message);
    let body_value = serde_json::to_value(&built.body).unwrap_or(JsonValue::Null);
    let params = CallParams { method: "countTokens", model: Some(&built.upstream_model), query: None };

    match state.orchestrator.call_v1_internal(params, move |_project| body_value.clone()).await {
        Ok(raw) if raw.is_success() => match raw.json() {
            Ok(value) => {
                let unwrapped = unwrap_chunk(&value);
                let total = unwrapped.get("totalTokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                json(StatusCode::OK, &CountTokensResponse { input_tokens: total })
            }
            Err(_) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "malformed upstream response"),
        },
        Ok(raw) => raw_to_response(raw),
        Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn pump_anthropic_stream(
    response: wreq::Response,
    message_id: String,
    client_model: String,
    tx: mpsc::Sender<Bytes>,
) {
    let mut translator = StreamTranslator::new(message_id, client_model);
    if !send_all(&tx, translator.start(Usage::default())).await {
        return;
    }

    let mut parser = SseParser::new();
    let mut stream = response.bytes_stream();
    let mut finish_reason: Option<FinishReason> = None;
    let mut usage = Usage::default();

    while let Some(item) = stream.next().await {
        let Ok(chunk) = item else { break };
        for event in parser.push_bytes(&chunk) {
            if !handle_sse_event(&event, &mut translator, &mut finish_reason, &mut usage, &tx).await {
                return;
            }
        }
    }
    for event in parser.finish() {
        if !handle_sse_event(&event, &mut translator, &mut finish_reason, &mut usage, &tx).await {
            return;
        }
    }

    let _ = send_all(&tx, translator.finish(finish_reason, usage)).await;
}

async fn handle_sse_event(
    event: &SseEvent,
    translator: &mut StreamTranslator,
    finish_reason: &mut Option<FinishReason>,
    usage: &mut Usage,
    tx: &mpsc::Sender<Bytes>,
) -> bool {
    let Ok(value) = serde_json::from_str::<JsonValue>(&event.data) else { return true };
    let Ok(parsed) = serde_json::from_value::<GenerateContentResponse>(unwrap_chunk(&value)) else { return true };

    if let Some(meta) = &parsed.usage_metadata {
        *usage = map_usage(meta);
    }
    if let Some(candidate) = parsed.candidates.first() {
        if candidate.finish_reason.is_some() {
            *finish_reason = candidate.finish_reason;
        }
        for part in &candidate.content.parts {
            if !send_all(tx, translator.process_part(part)).await {
                return false;
            }
        }
    }
    true
}

async fn send_all(tx: &mpsc::Sender<Bytes>, events: Vec<StreamEvent>) -> bool {
    for event in events {
        let Some(bytes) = encode_named(event.event_name(), &event) else { continue };
        if tx.send(bytes).await.is_err() {
            return false;
        }
    }
    true
}
