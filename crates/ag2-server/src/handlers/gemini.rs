//! `/v1beta/models`, `/v1beta/models/:name`,
//! `/v1beta/models/:name:{generateContent|streamGenerateContent|countTokens}`
//! — C9's thin wrap/unwrap plus the pro-variant forced-stream aggregation.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use ag2_core::google_translate::{aggregate_chunks, must_force_stream, unwrap_chunk};
use ag2_core::orchestrator::{CallParams, StreamingOutcome};
use ag2_core::AppState;
use ag2_protocol::gemini::models::ListModelsResponse;
use ag2_protocol::gemini::response::GenerateContentResponse;
use ag2_protocol::sse::{encode_data_only, SseEvent, SseParser};

use crate::response::{json, json_error, raw_to_response, write_response, ResponseBody};

pub async fn list_models(State(state): State<Arc<AppState>>) -> Response {
    let models = crate::catalog::gemini_models(&state).await;
    json(StatusCode::OK, &ListModelsResponse { models, next_page_token: None })
}

pub async fn get_model(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    let target = name.trim_start_matches("models/").to_string();
    let models = crate::catalog::gemini_models(&state).await;
    match models.into_iter().find(|model| model.name.trim_start_matches("models/") == target) {
        Some(model) => json(StatusCode::OK, &model),
        None => json_error(StatusCode::NOT_FOUND, "model not found"),
    }
}

pub async fn dispatch_action(
    State(state): State<Arc<AppState>>,
    Path(name_action): Path<String>,
    body: Bytes,
) -> Response {
    let name_action = name_action.trim_start_matches('/');
    let Some((model, action)) = name_action.split_once(':') else {
        return json_error(StatusCode::BAD_REQUEST, "missing model action");
    };
    let model = model.trim_start_matches("models/");
    let body_value: JsonValue = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => return json_error(StatusCode::BAD_REQUEST, "Invalid JSON body"),
    };

    match action {
        "generateContent" => generate_content(&state, model, body_value, false).await,
        "streamGenerateContent" => generate_content(&state, model, body_value, true).await,
        "countTokens" => count_tokens(&state, model, body_value).await,
        _ => json_error(StatusCode::NOT_FOUND, "unknown model action"),
    }
}

async fn generate_content(state: &Arc<AppState>, model: &str, body: JsonValue, client_wants_stream: bool) -> Response {
    let upstream_method = if client_wants_stream || must_force_stream(model) {
        "streamGenerateContent"
    } else {
        "generateContent"
    };
    let query = (upstream_method == "streamGenerateContent").then_some("alt=sse");
    let params = CallParams { method: upstream_method, model: Some(model), query };

    let outcome = state.orchestrator.call_v1_internal_streaming(params, move |_project| body.clone()).await;

    match outcome {
        Ok(StreamingOutcome::Live(response)) if client_wants_stream => {
            let rx = pump_gemini_stream(response);
            write_response(
                200,
                vec![("content-type".to_string(), "text/event-stream".to_string())],
                ResponseBody::Stream(rx),
            )
        }
        Ok(StreamingOutcome::Live(response)) => match aggregate_chunks(collect_gemini_chunks(response).await) {
            Some(aggregated) => json(StatusCode::OK, &aggregated),
            None => {
                tracing::warn!(model, "forced-stream aggregation produced no chunks");
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "empty upstream stream")
            }
        },
        Ok(StreamingOutcome::Buffered(raw)) => raw_to_response(raw),
        Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn count_tokens(state: &Arc<AppState>, model: &str, body: JsonValue) -> Response {
    let params = CallParams { method: "countTokens", model: Some(model), query: None };
    match state.orchestrator.call_v1_internal(params, move |_project| body.clone()).await {
        Ok(raw) if raw.is_success() => match raw.json() {
            Ok(value) => json(StatusCode::OK, &unwrap_chunk(&value)),
            Err(err) => {
                tracing::warn!(%err, model, "upstream countTokens body was not valid json");
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "malformed upstream response")
            }
        },
        Ok(raw) => raw_to_response(raw),
        Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

fn pump_gemini_stream(response: wreq::Response) -> mpsc::Receiver<Bytes> {
    let (tx, rx) = mpsc::channel::<Bytes>(32);
    tokio::spawn(async move {
        let mut parser = SseParser::new();
        let mut stream = response.bytes_stream();
        while let Some(item) = stream.next().await {
            let Ok(chunk) = item else { break };
            for event in parser.push_bytes(&chunk) {
                if !forward_gemini_event(&event, &tx).await {
                    return;
                }
            }
        }
        for event in parser.finish() {
            if !forward_gemini_event(&event, &tx).await {
                return;
            }
        }
    });
    rx
}

async fn forward_gemini_event(event: &SseEvent, tx: &mpsc::Sender<Bytes>) -> bool {
    let Ok(value) = serde_json::from_str::<JsonValue>(&event.data) else { return true };
    let unwrapped = unwrap_chunk(&value);
    match encode_data_only(&unwrapped) {
        Some(bytes) => tx.send(bytes).await.is_ok(),
        None => true,
    }
}

async fn collect_gemini_chunks(response: wreq::Response) -> Vec<GenerateContentResponse> {
    let mut parser = SseParser::new();
    let mut stream = response.bytes_stream();
    let mut chunks = Vec::new();

    while let Some(item) = stream.next().await {
        let Ok(chunk) = item else { break };
        for event in parser.push_bytes(&chunk) {
            push_parsed_chunk(&event, &mut chunks);
        }
    }
    for event in parser.finish() {
        push_parsed_chunk(&event, &mut chunks);
    }
    chunks
}

fn push_parsed_chunk(event: &SseEvent, chunks: &mut Vec<GenerateContentResponse>) {
    let Ok(value) = serde_json::from_str::<JsonValue>(&event.data) else { return };
    if let Ok(parsed) = serde_json::from_value(unwrap_chunk(&value)) {
        chunks.push(parsed);
    }
}
