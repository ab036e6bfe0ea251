//! Extraction of call context from provider request and response payloads
//!
//! Works on the JSON bodies of OpenAI-style chat/responses requests and
//! Anthropic-style message requests. Anything unrecognized yields empty
//! values rather than an error.

use crate::event::EventContext;
use serde_json::Value;

const TEXT_TYPES: [&str; 3] = ["text", "input_text", "output_text"];

/// Model name used when neither payload carries one
pub const UNKNOWN_MODEL: &str = "unknown";

fn text_from_block(block: &Value) -> String {
    let object = match block {
        Value::String(s) => return s.clone(),
        Value::Object(object) => object,
        _ => return String::new(),
    };

    if let Some(Value::String(text)) = object.get("text") {
        let typed_as_text = match object.get("type") {
            None => true,
            Some(kind) => kind.as_str().is_some_and(|k| TEXT_TYPES.contains(&k)),
        };
        if typed_as_text {
            return text.clone();
        }
    }

    match object.get("content") {
        Some(Value::String(content)) => content.clone(),
        Some(Value::Array(items)) => join_non_empty(items.iter().map(text_from_block), " "),
        _ => String::new(),
    }
}

fn join_non_empty(parts: impl Iterator<Item = String>, separator: &str) -> String {
    parts
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}

fn has_cache_control(value: &Value) -> bool {
    value.get("cache_control").is_some_and(|c| !c.is_null())
}

/// Flatten the prompt text of a request.
///
/// Returns the text and the index of the first message carrying a
/// `cache_control` marker, on the message itself or on one of its blocks.
pub fn extract_prompt(request: &Value) -> (String, Option<usize>) {
    if let Some(Value::Array(messages)) = request.get("messages") {
        let mut parts = Vec::new();
        let mut cache_position = None;

        for (index, message) in messages.iter().enumerate() {
            if !message.is_object() {
                continue;
            }

            let content = message.get("content");
            let text = match content {
                Some(Value::Array(blocks)) => join_non_empty(blocks.iter().map(text_from_block), " "),
                Some(block @ Value::Object(_)) => text_from_block(block),
                Some(Value::String(s)) => s.clone(),
                _ => String::new(),
            };
            // Plain string content is kept even when empty
            if !text.is_empty() || matches!(content, Some(Value::String(_))) {
                parts.push(text);
            }

            if cache_position.is_none() {
                let block_marked = match content {
                    Some(Value::Array(blocks)) => blocks.iter().any(has_cache_control),
                    _ => false,
                };
                if has_cache_control(message) || block_marked {
                    cache_position = Some(index);
                }
            }
        }

        return (parts.join("\n"), cache_position);
    }

    let input = request.get("input");
    if let Some(Value::Array(items)) = input {
        return (join_non_empty(items.iter().map(text_from_block), "\n"), None);
    }

    if let Some(Value::String(prompt)) = request.get("prompt") {
        return (prompt.clone(), None);
    }

    if let Some(Value::String(input)) = input {
        return (input.clone(), None);
    }

    (String::new(), None)
}

fn token_count(usage: &Value, keys: [&str; 2]) -> u64 {
    let value = keys.iter().find_map(|key| usage.get(*key));
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        _ => 0,
    }
}

/// Prompt and completion token counts from a response's `usage` block
pub fn extract_token_counts(response: &Value) -> (u64, u64) {
    match response.get("usage") {
        Some(usage) if usage.is_object() => (
            token_count(usage, ["prompt_tokens", "input_tokens"]),
            token_count(usage, ["completion_tokens", "output_tokens"]),
        ),
        _ => (0, 0),
    }
}

/// Model from the request, else the response, else [`UNKNOWN_MODEL`]
pub fn extract_model(request: &Value, response: &Value) -> String {
    if let Some(model) = request.get("model").and_then(Value::as_str) {
        if !model.is_empty() {
            return model.to_string();
        }
    }

    response
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(UNKNOWN_MODEL)
        .to_string()
}

/// Assemble an [`EventContext`] from raw payloads
pub fn context_from_payloads(
    provider: &str,
    request: &Value,
    response: &Value,
    latency_ms: u64,
) -> EventContext {
    let (prompt, cache_position) = extract_prompt(request);
    let (prompt_tokens, completion_tokens) = extract_token_counts(response);

    EventContext::new(provider, extract_model(request, response), prompt)
        .with_tokens(prompt_tokens, completion_tokens)
        .with_latency_ms(latency_ms)
        .with_cache_control_position(cache_position)
}
