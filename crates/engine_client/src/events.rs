use engine_contract::{StreamEvent, TokenUsage};
use serde_json::Value;

use crate::decoder::{Frame, SkipReason};

const DEFAULT_ERROR_MESSAGE: &str = "engine reported an error";

/// Map one parsed JSON record onto a protocol event.
///
/// Records carry a `type` tag. Records without one fall back to the key-shaped
/// form (`token`, `tool_call`, `tool_result`, `error`) some engine builds emit.
/// Unknown types are skipped so the protocol can grow without breaking clients.
pub(crate) fn map_payload(value: Value) -> Frame {
    match value.get("type").and_then(Value::as_str) {
        Some(kind) => map_typed(kind, &value),
        None => map_keyed(&value),
    }
}

fn map_typed(kind: &str, value: &Value) -> Frame {
    match kind {
        "content" => match value.get("content").and_then(Value::as_str) {
            Some(text) => Frame::Event(StreamEvent::content(text)),
            None => Frame::Skip(SkipReason::MissingField {
                kind: "content",
                field: "content",
            }),
        },
        "tool_call" => Frame::Event(StreamEvent::ToolCall {
            name: string_field(value, "name").unwrap_or_default(),
            args: value.get("args").map(text_or_json).unwrap_or_default(),
        }),
        "tool_result" => Frame::Event(StreamEvent::ToolResult {
            name: string_field(value, "name").unwrap_or_default(),
            result: value.get("result").map(text_or_json).unwrap_or_default(),
        }),
        "usage" => {
            let counters = value.get("usage").unwrap_or(value);
            Frame::Event(StreamEvent::Usage(usage_from(counters)))
        }
        "error" => Frame::Event(StreamEvent::error(
            string_field(value, "content")
                .or_else(|| string_field(value, "message"))
                .or_else(|| value.get("error").and_then(error_text))
                .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_owned()),
        )),
        "done" => Frame::Event(StreamEvent::Done),
        other => Frame::Skip(SkipReason::UnknownType(other.to_owned())),
    }
}

fn map_keyed(value: &Value) -> Frame {
    if let Some(token) = value.get("token").and_then(Value::as_str) {
        return Frame::Event(StreamEvent::content(token));
    }

    if let Some(call) = value.get("tool_call") {
        let (name, args) = match call {
            Value::String(name) => (name.clone(), String::new()),
            _ => (
                string_field(call, "name").unwrap_or_default(),
                call.get("args")
                    .or_else(|| call.get("arguments"))
                    .map(text_or_json)
                    .unwrap_or_default(),
            ),
        };
        return Frame::Event(StreamEvent::ToolCall { name, args });
    }

    if let Some(result) = value.get("tool_result") {
        let (name, result) = match result {
            Value::String(text) => (String::new(), text.clone()),
            _ => (
                string_field(result, "name").unwrap_or_default(),
                result
                    .get("result")
                    .or_else(|| result.get("content"))
                    .map(text_or_json)
                    .unwrap_or_default(),
            ),
        };
        return Frame::Event(StreamEvent::ToolResult { name, result });
    }

    if let Some(error) = value.get("error") {
        let message = error_text(error).unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_owned());
        return Frame::Event(StreamEvent::error(message));
    }

    Frame::Skip(SkipReason::Unrecognized)
}

fn usage_from(counters: &Value) -> TokenUsage {
    let count = |key: &str| counters.get(key).and_then(Value::as_u64).unwrap_or(0);
    TokenUsage::new(
        count("prompt_tokens"),
        count("completion_tokens"),
        count("total_tokens"),
    )
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn error_text(error: &Value) -> Option<String> {
    match error {
        Value::String(text) => Some(text.clone()),
        Value::Object(_) => string_field(error, "message"),
        _ => None,
    }
}

/// Strings pass through verbatim; any other JSON is re-serialized compactly.
fn text_or_json(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
