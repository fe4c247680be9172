//! §4.2 ChatHandler: OpenAI wire format in/out, §6.2 request/response
//! framing, §6.1 `/v1/models` and `/v1/chat/completions`.

use crate::respond::error_response;
use crate::state::GatewayState;
use async_stream::stream;
use axum::extract::{Extension, State};
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use chatgate_core::{tokens, ChatRequest, GatewayError, Identity, StreamChunk};
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

static PROCESS_START: OnceLock<Instant> = OnceLock::new();
static CHUNK_ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn stream_id() -> String {
    let start = PROCESS_START.get_or_init(Instant::now);
    let nanos = start.elapsed().as_nanos();
    let seq = CHUNK_ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("chatcmpl-{nanos}-{seq}")
}

/// §4.2 parse/validate: hard boundary checks (§8) that reject rather than
/// clamp; temperature/top_p/max_tokens clamping itself lives in
/// `ChatRequest::resolved_*` and runs only after these checks pass.
fn validate(request: &ChatRequest) -> Result<(), GatewayError> {
    if request.model.trim().is_empty() {
        return Err(GatewayError::BadRequest("model must not be empty".to_string()));
    }
    if request.messages.is_empty() {
        return Err(GatewayError::BadRequest("messages must not be empty".to_string()));
    }
    if let Some(t) = request.temperature {
        if !(0.0..=2.0).contains(&t) {
            return Err(GatewayError::BadRequest("temperature must be within [0, 2]".to_string()));
        }
    }
    if let Some(p) = request.top_p {
        if !(0.0..=1.0).contains(&p) {
            return Err(GatewayError::BadRequest("top_p must be within [0, 1]".to_string()));
        }
    }
    if let Some(m) = request.max_tokens {
        if m < 1 {
            return Err(GatewayError::BadRequest("max_tokens must be at least 1".to_string()));
        }
    }
    Ok(())
}

/// §4.2 ListModels: union of models across healthy drivers, deterministic
/// (provider, id) order (§8 property 4).
pub async fn list_models(State(state): State<Arc<GatewayState>>) -> Response {
    let models = state.orchestrator.available_models().await;
    Json(serde_json::json!({ "data": models })).into_response()
}

fn chunk_json(
    id: &str,
    model: &str,
    delta: serde_json::Value,
    finish_reason: Option<&str>,
    usage: Option<serde_json::Value>,
) -> String {
    let mut payload = serde_json::json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }],
    });
    if let Some(usage) = usage {
        payload["usage"] = usage;
    }
    payload.to_string()
}

/// §4.2 CreateCompletion. Dispatches to the Orchestrator and shapes either a
/// JSON `ChatResponse` or an SSE stream depending on `stream`.
pub async fn create_completion(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Json(mut request): Json<ChatRequest>,
) -> Response {
    if let Err(e) = validate(&request) {
        return error_response(&e);
    }
    if request.temperature.is_none() {
        request.temperature = Some(state.config.default_temperature);
    }

    let cancel = CancellationToken::new();

    if !request.stream {
        return match state.orchestrator.complete(&identity, &request, cancel).await {
            Ok(outcome) => {
                state.metrics.increment_counter(
                    "chat_completions",
                    &[
                        ("outcome", "success"),
                        ("fallback_used", if outcome.fallback_used { "true" } else { "false" }),
                    ],
                );
                Json(outcome.response).into_response()
            }
            Err(e) => {
                state
                    .metrics
                    .increment_counter("chat_completions", &[("outcome", "error"), ("code", e.code_str())]);
                error_response(&e)
            }
        };
    }

    let rx = match state.orchestrator.stream(&identity, &request, cancel).await {
        Ok(rx) => {
            state
                .metrics
                .increment_counter("chat_completion_streams", &[("outcome", "opened")]);
            rx
        }
        Err(e) => {
            state
                .metrics
                .increment_counter("chat_completion_streams", &[("outcome", "error"), ("code", e.code_str())]);
            return error_response(&e);
        }
    };

    let id = stream_id();
    let model = request.model.clone();
    let rendered_prompt = tokens::render_prompt(&request.messages, request.system_prompt.as_deref());

    let body = stream! {
        let mut rx = rx;
        let mut completion = String::new();
        while let Some(chunk) = rx.recv().await {
            if chunk.is_terminal() {
                yield terminal_event(&id, &model, &chunk, &rendered_prompt, &completion);
                break;
            }
            completion.push_str(&chunk.content);
            yield Ok::<Event, Infallible>(Event::default().data(chunk_json(&id, &model, serde_json::json!({ "content": chunk.content }), None, None)))
                .unwrap_or_else(|never: Infallible| match never {});
        }
        yield Event::default().data("[DONE]");
    };

    let mut response = Sse::new(body.map(Ok::<Event, Infallible>)).keep_alive(KeepAlive::default()).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, "no-cache".parse().unwrap());
    headers.insert(header::CONNECTION, "keep-alive".parse().unwrap());
    response
}

/// §4.6: usage is only attached to the terminal event, and only on a clean
/// stop — an error chunk carries no completion to count tokens against.
fn terminal_event(
    id: &str,
    model: &str,
    chunk: &StreamChunk,
    rendered_prompt: &str,
    completion: &str,
) -> Event {
    let finish_reason = if chunk.error.is_some() { "error" } else { "stop" };
    let usage = if chunk.error.is_some() {
        None
    } else {
        let prompt_tokens = tokens::approximate_tokens(rendered_prompt);
        let completion_tokens = tokens::approximate_tokens(completion);
        Some(serde_json::json!({
            "prompt_tokens": prompt_tokens,
            "completion_tokens": completion_tokens,
            "total_tokens": prompt_tokens + completion_tokens,
        }))
    };
    Event::default().data(chunk_json(id, model, serde_json::json!({}), Some(finish_reason), usage))
}
