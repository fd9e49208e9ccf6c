// crates/loka-engines/src/streaming.rs

//! Line-oriented stream parsing shared by the adapters
//!
//! Cloud vendors emit SSE (`data: <json>` lines, `[DONE]` sentinel for the
//! OpenAI family); the local engine emits newline-delimited JSON. Both are
//! folded into a [`TokenStream`] here. Malformed lines are skipped rather
//! than failing the stream; transport errors propagate.

use crate::TokenStream;
use async_stream::try_stream;
use futures_util::StreamExt;
use log::debug;
use serde_json::Value;

/// What one wire line means to the chunk assembler
#[derive(Debug, PartialEq)]
pub enum SseLine {
    /// A JSON payload to extract a fragment from
    Data(Value),
    /// End-of-stream sentinel
    Done,
    /// Comment, empty line, event name or unparseable payload
    Skip,
}

/// Classify one SSE line
pub fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim();
    if line.is_empty() || !line.starts_with("data:") {
        return SseLine::Skip;
    }
    let data = line[5..].trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str(data) {
        Ok(value) => SseLine::Data(value),
        Err(e) => {
            debug!("skipping malformed SSE payload: {}", e);
            SseLine::Skip
        }
    }
}

/// Fold an SSE response body into a stream of text fragments
///
/// `extract` maps one JSON payload onto an optional fragment; `None` means
/// the event carries no text (role announcements, pings, stop events).
pub fn sse_token_stream(
    response: reqwest::Response,
    extract: fn(&Value) -> Option<String>,
) -> TokenStream {
    Box::pin(try_stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer = String::new();
        'outer: while let Some(chunk) = bytes.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=pos).collect();
                match parse_sse_line(&line) {
                    SseLine::Done => break 'outer,
                    SseLine::Skip => {}
                    SseLine::Data(value) => {
                        if let Some(text) = extract(&value) {
                            if !text.is_empty() {
                                yield text;
                            }
                        }
                    }
                }
            }
        }
    })
}

/// Fold a newline-delimited JSON body (the local engine protocol) into a
/// stream of text fragments; a payload with `"done": true` ends the stream
pub fn ndjson_token_stream(
    response: reqwest::Response,
    extract: fn(&Value) -> Option<String>,
) -> TokenStream {
    Box::pin(try_stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer = String::new();
        'outer: while let Some(chunk) = bytes.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=pos).collect();
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let value: Value = match serde_json::from_str(line) {
                    Ok(value) => value,
                    Err(e) => {
                        debug!("skipping malformed NDJSON line: {}", e);
                        continue;
                    }
                };
                if let Some(text) = extract(&value) {
                    if !text.is_empty() {
                        yield text;
                    }
                }
                if value["done"].as_bool() == Some(true) {
                    break 'outer;
                }
            }
        }
    })
}
