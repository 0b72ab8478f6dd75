use serde::Deserialize;
use serde_json::{Map, Value};

/// Longest argument summary kept per tool call.
const SUMMARY_LIMIT: usize = 160;

/// Argument keys tried, in order, when summarising a tool invocation.
const SUMMARY_KEYS: &[&str] = &["command", "path", "pattern", "query", "url", "globPattern"];

/// One event of the worker's stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Session/init metadata.
    System { subtype: Option<String>, model: Option<String> },

    /// Incremental reasoning text. `done` marks the end of a thinking block.
    Thinking { text: String, done: bool },

    ToolCallStarted(ToolCall),

    ToolCallCompleted { call: ToolCall, result: ToolResult },

    Assistant { text: String },

    /// The final result event. Its error flag alone decides the verdict.
    Result {
        is_error: bool,
        text: Option<String>,
        duration_ms: Option<u64>,
    },

    /// Valid JSON with a `type` we do not know.
    Unknown { kind: String, raw: String },

    /// Not JSON (or JSON without a `type`): kept verbatim.
    Unparsed { raw: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub call_id: Option<String>,
    /// Short tool name, e.g. `shell` for a `shellToolCall`.
    pub tool: String,
    /// One-line summary of the arguments.
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolResult {
    Ok(Option<String>),
    Failed(String),
    Unknown,
}

/// Only `type` is strict. The other fields are taken as loose JSON so that one
/// oddly typed field never hides the rest of the event.
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    subtype: Option<Value>,
    #[serde(default)]
    text: Option<Value>,
    #[serde(default)]
    model: Option<Value>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    call_id: Option<Value>,
    #[serde(default)]
    tool_call: Option<Value>,
    #[serde(default)]
    is_error: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    duration_ms: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    content: Vec<RawContent>,
}

#[derive(Debug, Deserialize)]
struct RawContent {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

/// Classify one line of output. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Option<StreamEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let raw: RawEvent = match serde_json::from_str(trimmed) {
        Ok(raw) => raw,
        Err(_) => {
            return Some(StreamEvent::Unparsed {
                raw: line.to_string(),
            });
        }
    };

    let subtype = string_field(raw.subtype);
    let payload = raw.tool_call.as_ref().and_then(Value::as_object);
    let event = match (raw.kind.as_str(), subtype.as_deref()) {
        ("system", _) => StreamEvent::System {
            subtype: subtype.clone(),
            model: string_field(raw.model),
        },
        ("thinking", sub) => StreamEvent::Thinking {
            done: sub == Some("completed"),
            text: string_field(raw.text).unwrap_or_default(),
        },
        ("assistant", _) => StreamEvent::Assistant {
            text: raw
                .message
                .and_then(|m| serde_json::from_value::<RawMessage>(m).ok())
                .map(|m| message_text(&m))
                .or_else(|| string_field(raw.text))
                .unwrap_or_default(),
        },
        ("tool_call", Some("started")) | ("tool_call_started", _) => {
            StreamEvent::ToolCallStarted(tool_call(string_field(raw.call_id), payload))
        }
        ("tool_call", Some("completed")) | ("tool_call_completed", _) => StreamEvent::ToolCallCompleted {
            call: tool_call(string_field(raw.call_id), payload),
            result: tool_result(payload),
        },
        ("result", sub) => StreamEvent::Result {
            is_error: raw
                .is_error
                .as_ref()
                .and_then(Value::as_bool)
                .unwrap_or(sub.is_some_and(|s| s != "success")),
            text: raw.result.as_ref().and_then(value_text),
            duration_ms: raw.duration_ms.as_ref().and_then(millis),
        },
        (other, _) => StreamEvent::Unknown {
            kind: other.to_string(),
            raw: trimmed.to_string(),
        },
    };
    Some(event)
}

fn string_field(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s),
        _ => None,
    }
}

/// Whole or fractional milliseconds; anything else is dropped.
fn millis(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|ms| ms.is_finite() && *ms >= 0.0).map(|ms| ms.round() as u64))
}

fn message_text(message: &RawMessage) -> String {
    message
        .content
        .iter()
        .filter(|c| c.kind.as_deref().is_none_or(|k| k == "text"))
        .filter_map(|c| c.text.as_deref())
        .collect::<Vec<_>>()
        .join("")
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// The tool payload is an object with a single `<name>ToolCall` key.
fn tool_entry(tool_call: Option<&Map<String, Value>>) -> Option<(&str, &Value)> {
    tool_call?.iter().next().map(|(k, v)| (k.as_str(), v))
}

fn tool_call(call_id: Option<String>, tool_call: Option<&Map<String, Value>>) -> ToolCall {
    let Some((key, body)) = tool_entry(tool_call) else {
        return ToolCall {
            call_id,
            tool: "unknown".to_string(),
            summary: String::new(),
        };
    };

    let tool = key.strip_suffix("ToolCall").unwrap_or(key).to_string();
    let summary = body
        .get("args")
        .map(summarize_args)
        .unwrap_or_default();
    ToolCall {
        call_id,
        tool,
        summary,
    }
}

fn summarize_args(args: &Value) -> String {
    let summary = SUMMARY_KEYS
        .iter()
        .find_map(|k| args.get(*k).and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| args.to_string());
    truncate(&summary, SUMMARY_LIMIT)
}

fn tool_result(tool_call: Option<&Map<String, Value>>) -> ToolResult {
    let Some(result) = tool_entry(tool_call).and_then(|(_, body)| body.get("result")) else {
        return ToolResult::Unknown;
    };

    if let Some(success) = result.get("success") {
        let detail = ["stdout", "content", "message"]
            .iter()
            .find_map(|k| success.get(*k).and_then(Value::as_str))
            .map(|s| truncate(s.lines().next().unwrap_or(""), SUMMARY_LIMIT));
        return ToolResult::Ok(detail);
    }

    for key in ["error", "failure", "rejected"] {
        if let Some(err) = result.get(key) {
            let message = err
                .get("error")
                .or_else(|| err.get("message"))
                .or_else(|| err.get("stderr"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            return ToolResult::Failed(truncate(&message, SUMMARY_LIMIT));
        }
    }
    ToolResult::Unknown
}

fn truncate(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        return s.to_string();
    }
    let mut out: String = s.chars().take(limit).collect();
    out.push('…');
    out
}
