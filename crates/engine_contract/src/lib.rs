//! Shared contract types for the engine host.
//!
//! This crate defines only the conversation data model, the protocol event
//! vocabulary, and the engine endpoint address. It intentionally contains no
//! transport, process, or persistence code so every other crate can depend on
//! it without pulling in I/O.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Milliseconds since the Unix epoch, the timestamp unit used by persisted messages.
pub type TimestampMs = i64;

/// Returns the current wall-clock time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> TimestampMs {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX)
}

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one tool invocation inside a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Running,
    Done,
}

/// Display record for one tool call reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments_preview: String,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_preview: Option<String>,
}

impl ToolInvocation {
    /// Opens a new invocation in the `running` state.
    #[must_use]
    pub fn running(name: impl Into<String>, arguments_preview: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments_preview: arguments_preview.into(),
            status: ToolStatus::Running,
            result_preview: None,
        }
    }

    pub fn complete(&mut self, result_preview: impl Into<String>) {
        self.status = ToolStatus::Done;
        self.result_preview = Some(result_preview.into());
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == ToolStatus::Running
    }
}

/// Cumulative token counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt: u64,
    #[serde(default)]
    pub completion: u64,
    #[serde(default)]
    pub total: u64,
}

impl TokenUsage {
    #[must_use]
    pub fn new(prompt: u64, completion: u64, total: u64) -> Self {
        Self {
            prompt,
            completion,
            total,
        }
    }

    /// Adds `other` into `self`, saturating on overflow.
    pub fn accumulate(&mut self, other: TokenUsage) {
        self.prompt = self.prompt.saturating_add(other.prompt);
        self.completion = self.completion.saturating_add(other.completion);
        self.total = self.total.saturating_add(other.total);
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.prompt == 0 && self.completion == 0 && self.total == 0
    }
}

/// One conversation message.
///
/// Assistant messages carry the tool invocations observed during their turn.
/// `cancelled` marks a partial reply kept only as a visible artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub timestamp: TimestampMs,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolInvocation>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub cancelled: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Message {
    #[must_use]
    pub fn user(content: impl Into<String>, timestamp: TimestampMs) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp,
            tools: Vec::new(),
            cancelled: false,
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>, timestamp: TimestampMs) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp,
            tools: Vec::new(),
            cancelled: false,
        }
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolInvocation>) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn mark_cancelled(mut self) -> Self {
        self.cancelled = true;
        self
    }
}

/// Protocol event decoded from one engine response frame.
///
/// Events for one request arrive in a single total order. `Done` (or stream
/// termination) ends the sequence; `Error` may still be followed by `Done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Content { text: String },
    ToolCall { name: String, args: String },
    ToolResult { name: String, result: String },
    Usage(TokenUsage),
    Error { message: String },
    Done,
}

impl StreamEvent {
    #[must_use]
    pub fn content(text: impl Into<String>) -> Self {
        Self::Content { text: text.into() }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Short stable name used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Content { .. } => "content",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Usage(_) => "usage",
            Self::Error { .. } => "error",
            Self::Done => "done",
        }
    }
}

/// Loopback address of a ready engine.
///
/// Valid only while the owning engine process is ready; a supervisor restart
/// invalidates previously handed-out endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineEndpoint {
    pub host: IpAddr,
    pub port: u16,
}

impl EngineEndpoint {
    #[must_use]
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self { host, port }
    }

    #[must_use]
    pub fn loopback(port: u16) -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// `http://host:port` with no trailing slash.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.socket_addr())
    }
}

impl fmt::Display for EngineEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn usage_accumulates_and_saturates() {
        let mut usage = TokenUsage::new(1, 2, 3);
        usage.accumulate(TokenUsage::new(10, 20, 30));
        assert_eq!(usage, TokenUsage::new(11, 22, 33));

        usage.accumulate(TokenUsage::new(u64::MAX, 0, 0));
        assert_eq!(usage.prompt, u64::MAX);
    }

    #[test]
    fn message_serializes_without_empty_optional_fields() {
        let message = Message::user("hi", 42);
        let value = serde_json::to_value(&message).expect("message should serialize");
        assert_eq!(
            value,
            json!({"role": "user", "content": "hi", "timestamp": 42})
        );
    }

    #[test]
    fn cancelled_assistant_message_round_trips_flag() {
        let message = Message::assistant("partial", 7).mark_cancelled();
        let encoded = serde_json::to_string(&message).expect("message should serialize");
        let decoded: Message = serde_json::from_str(&encoded).expect("message should parse");
        assert!(decoded.cancelled);
        assert_eq!(decoded.content, "partial");
    }

    #[test]
    fn message_without_timestamp_parses_with_zero() {
        let decoded: Message =
            serde_json::from_value(json!({"role": "assistant", "content": "x"}))
                .expect("legacy message should parse");
        assert_eq!(decoded.timestamp, 0);
        assert!(decoded.tools.is_empty());
    }

    #[test]
    fn tool_invocation_completes_once_result_arrives() {
        let mut tool = ToolInvocation::running("read_file", "{}");
        assert!(tool.is_running());
        tool.complete("contents");
        assert_eq!(tool.status, ToolStatus::Done);
        assert_eq!(tool.result_preview.as_deref(), Some("contents"));
    }

    #[test]
    fn endpoint_formats_loopback_url() {
        let endpoint = EngineEndpoint::loopback(5123);
        assert_eq!(endpoint.base_url(), "http://127.0.0.1:5123");
        assert_eq!(endpoint.to_string(), "127.0.0.1:5123");
    }
}
