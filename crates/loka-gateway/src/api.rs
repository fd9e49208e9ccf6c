// crates/loka-gateway/src/api.rs

//! OpenAI-compatible wire types
//!
//! Request and response bodies for `/v1/chat/completions` and friends,
//! including the streaming chunk grammar: one role chunk, content deltas,
//! a stop chunk, then the `[DONE]` sentinel.

use chrono::Utc;
use futures::Stream;
use loka_core::types::{CompletionResult, Message};
use loka_engines::TokenStream;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub stream: bool,
    /// Accepted for wire compatibility; routing picks the actual model
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    pub messages: Vec<Message>,
}

pub fn completion_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4())
}

/// The non-streaming response body
pub fn completion_body(id: &str, result: &CompletionResult, finish_reason: &str) -> Value {
    json!({
        "id": id,
        "object": "chat.completion",
        "created": Utc::now().timestamp(),
        "model": result.model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": result.content},
            "finish_reason": finish_reason,
        }],
        "usage": {
            "prompt_tokens": result.prompt_tokens,
            "completion_tokens": result.completion_tokens,
            "total_tokens": result.prompt_tokens + result.completion_tokens,
        },
    })
}

fn chunk(id: &str, model: &str, created: i64, delta: Value, finish_reason: Option<&str>) -> String {
    json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }],
    })
    .to_string()
}

/// SSE payload sequence for one streamed completion
///
/// Chunk order is fixed: role announcement, one delta per fragment in
/// provider order, a stop chunk, then the literal `[DONE]`. A mid-stream
/// provider error closes the stream with `finish_reason: "error"`.
pub fn chunk_payloads(
    id: String,
    model: String,
    mut tokens: TokenStream,
) -> impl Stream<Item = String> {
    async_stream::stream! {
        use futures::StreamExt;
        let created = Utc::now().timestamp();
        yield chunk(&id, &model, created, json!({"role": "assistant"}), None);

        let mut failed = false;
        while let Some(fragment) = tokens.next().await {
            match fragment {
                Ok(text) => {
                    yield chunk(&id, &model, created, json!({"content": text}), None);
                }
                Err(e) => {
                    log::warn!("stream interrupted: {}", e);
                    failed = true;
                    break;
                }
            }
        }

        let finish = if failed { "error" } else { "stop" };
        yield chunk(&id, &model, created, json!({}), Some(finish));
        yield "[DONE]".to_string();
    }
}
