use engine_contract::{Message, StreamEvent, TimestampMs, TokenUsage, ToolInvocation};

use crate::preview::{arguments_preview, result_preview};

/// Final state of one assistant turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Streaming,
    Done,
    Cancelled,
}

/// Result of folding one turn's events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    pub content: String,
    pub tools: Vec<ToolInvocation>,
    pub usage: TokenUsage,
    /// First error reported by the engine or the transport.
    pub error: Option<String>,
}

impl TurnOutcome {
    /// The assistant message to keep in the session, if any.
    ///
    /// Completed turns are always kept, even when empty. Failed turns keep
    /// whatever arrived before the failure. Cancelled turns keep a non-empty
    /// partial reply flagged as cancelled.
    pub fn durable_message(&self, timestamp: TimestampMs) -> Option<Message> {
        let has_output = !self.content.is_empty() || !self.tools.is_empty();
        let message =
            Message::assistant(self.content.clone(), timestamp).with_tools(self.tools.clone());
        match self.status {
            TurnStatus::Completed => Some(message),
            TurnStatus::Failed if has_output => Some(message),
            // Tool calls alone do not keep a cancelled reply.
            TurnStatus::Cancelled if !self.content.is_empty() => Some(message.mark_cancelled()),
            TurnStatus::Failed | TurnStatus::Cancelled => None,
        }
    }
}

/// Folds the ordered events of one turn into an assistant message.
#[derive(Debug)]
pub struct SessionReducer {
    phase: Phase,
    content: String,
    tools: Vec<ToolInvocation>,
    usage: TokenUsage,
    error: Option<String>,
    applied: usize,
}

impl Default for SessionReducer {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionReducer {
    pub fn new() -> Self {
        Self {
            phase: Phase::Streaming,
            content: String::new(),
            tools: Vec::new(),
            usage: TokenUsage::default(),
            error: None,
            applied: 0,
        }
    }

    /// Applies one event; returns `false` when the turn is already over and the
    /// event was ignored.
    pub fn apply(&mut self, event: StreamEvent) -> bool {
        if self.phase != Phase::Streaming {
            tracing::debug!(kind = event.kind(), "ignoring event after turn ended");
            return false;
        }
        self.applied += 1;

        match event {
            StreamEvent::Content { text } => self.content.push_str(&text),
            StreamEvent::ToolCall { name, args } => {
                self.tools
                    .push(ToolInvocation::running(name, arguments_preview(&args)));
            }
            StreamEvent::ToolResult { name, result } => {
                match self.tools.iter_mut().rev().find(|tool| tool.is_running()) {
                    Some(tool) => {
                        if tool.name != name {
                            tracing::debug!(
                                expected = %tool.name,
                                got = %name,
                                "tool result name differs from open invocation"
                            );
                        }
                        tool.complete(result_preview(&result));
                    }
                    None => tracing::debug!(%name, "tool result without a running invocation"),
                }
            }
            StreamEvent::Usage(usage) => self.usage.accumulate(usage),
            StreamEvent::Error { message } => self.record_error(message),
            StreamEvent::Done => self.phase = Phase::Done,
        }
        true
    }

    /// Stops the turn; later events are ignored. No effect once `done` arrived.
    pub fn cancel(&mut self) -> bool {
        if self.phase != Phase::Streaming {
            return false;
        }
        self.phase = Phase::Cancelled;
        true
    }

    /// Ends the turn after the connection failed.
    pub fn fail_transport(&mut self, message: impl Into<String>) {
        if self.phase != Phase::Streaming {
            return;
        }
        self.record_error(message.into());
        self.phase = Phase::Done;
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn tools(&self) -> &[ToolInvocation] {
        &self.tools
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    pub fn is_streaming(&self) -> bool {
        self.phase == Phase::Streaming
    }

    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Closes the turn. A stream that ended without `done` counts as completed
    /// unless an error was seen.
    pub fn finish(self) -> TurnOutcome {
        let status = match (self.phase, &self.error) {
            (Phase::Cancelled, _) => TurnStatus::Cancelled,
            (_, Some(_)) => TurnStatus::Failed,
            _ => TurnStatus::Completed,
        };
        TurnOutcome {
            status,
            content: self.content,
            tools: self.tools,
            usage: self.usage,
            error: self.error,
        }
    }

    fn record_error(&mut self, message: String) {
        match &self.error {
            None => self.error = Some(message),
            Some(first) => {
                tracing::debug!(first = %first, later = %message, "additional turn error")
            }
        }
    }
}
