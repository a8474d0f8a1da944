//! Agent glue around the tool registry: pulls tool calls out of a model
//! output, runs them against the turn, and reports progress to a sink.
//!
//! The conversation loop and the LLM call stay with the caller. A typical turn:
//!
//! ```ignore
//! let turn = TurnContext::new();
//! loop {
//!     let output = llm.complete(&messages, agent.registry().definitions()).await?;
//!     if agent.parser().parse(&output).is_empty() {
//!         let done = agent.finish(&turn, &output.text);
//!         break;
//!     }
//!     for msg in agent.run_tool_step(&turn, &output).await {
//!         messages.push(msg.into());
//!     }
//! }
//! ```

use futures::channel::mpsc;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{LazyLock, Mutex};

use crate::citations::{finalize_citations_with_collector, BibliographyEntry, FinalizedCitations};
use crate::tools::{ToolCall, ToolRegistry};
use crate::turn::TurnContext;

static TOOL_CALL_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<ToolCall>(.*?)</ToolCall>").expect("invalid TOOL_CALL_BLOCK_RE regex")
});
static TOOL_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<Name>\s*(.*?)\s*</Name>").expect("invalid TOOL_NAME_RE regex")
});
static TOOL_PARAMS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<Parameters>(.*?)</Parameters>").expect("invalid TOOL_PARAMS_RE regex")
});

/// What the model produced in one step.
#[derive(Debug, Clone, Default)]
pub struct ModelOutput {
    pub text: String,
    /// Structured function calls, for providers that return them natively.
    pub tool_calls: Vec<ToolCall>,
}

impl ModelOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }
}

pub trait ToolCallParser: Send + Sync {
    fn parse(&self, output: &ModelOutput) -> Vec<ToolCall>;
}

/// Use the provider's structured function-call list as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeToolCalls;

impl ToolCallParser for NativeToolCalls {
    fn parse(&self, output: &ModelOutput) -> Vec<ToolCall> {
        output.tool_calls.clone()
    }
}

/// Parse `<ToolCall><Name>..</Name><Parameters>{json}</Parameters></ToolCall>`
/// blocks out of the text, for models prompted to emit tool calls inline.
///
/// Ids are `call_<n>`, numbered across every step parsed by this instance so
/// tool messages in one conversation never share an id.
#[derive(Debug, Default)]
pub struct InlineMarkupToolCalls {
    next_id: AtomicUsize,
}

impl InlineMarkupToolCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// The text with every tool-call block removed.
    pub fn visible_text(&self, text: &str) -> String {
        TOOL_CALL_BLOCK_RE.replace_all(text, "").trim().to_string()
    }
}

impl ToolCallParser for InlineMarkupToolCalls {
    fn parse(&self, output: &ModelOutput) -> Vec<ToolCall> {
        let mut calls = Vec::new();
        for (i, block) in TOOL_CALL_BLOCK_RE
            .captures_iter(&output.text)
            .filter_map(|c| c.get(1))
            .enumerate()
        {
            let body = block.as_str();
            let Some(name) = TOOL_NAME_RE
                .captures(body)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .filter(|n| !n.is_empty())
            else {
                tracing::debug!(block = i, "inline tool call without a name");
                continue;
            };
            // Left as a string when it is not JSON, so the call fails with an
            // argument error the model can see.
            let arguments = TOOL_PARAMS_RE
                .captures(body)
                .and_then(|c| c.get(1))
                .map(|m| {
                    let raw = m.as_str().trim();
                    serde_json::from_str::<Value>(raw)
                        .unwrap_or_else(|_| Value::String(raw.to_string()))
                })
                .unwrap_or(Value::Null);
            let n = self.next_id.fetch_add(1, Ordering::Relaxed);
            calls.push(ToolCall::new(format!("call_{n}"), name, arguments));
        }
        calls
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    ToolCall {
        call_id: String,
        name: String,
        arguments: Value,
    },
    ToolResult {
        call_id: String,
        name: String,
        is_error: bool,
        content: String,
    },
    Citation(BibliographyEntry),
    Final {
        text: String,
        unresolved: Vec<String>,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: AgentEvent);
}

/// Keeps every event until [`BufferedSink::drain`].
#[derive(Debug, Default)]
pub struct BufferedSink {
    events: Mutex<Vec<AgentEvent>>,
}

impl BufferedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<AgentEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl EventSink for BufferedSink {
    fn emit(&self, event: AgentEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

/// Forwards events as they happen.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: AgentEvent) {
        if self.tx.unbounded_send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }
}

/// A tool result (or failure) addressed back to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolMessage {
    pub call_id: String,
    pub name: String,
    pub content: String,
    pub is_error: bool,
}

pub struct RagAgent<P, S> {
    registry: ToolRegistry,
    parser: P,
    sink: S,
}

impl<P: ToolCallParser, S: EventSink> RagAgent<P, S> {
    pub fn new(registry: ToolRegistry, parser: P, sink: S) -> Self {
        Self {
            registry,
            parser,
            sink,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn parser(&self) -> &P {
        &self.parser
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Execute every tool call in `output` concurrently and return one message
    /// per call, in request order. Failures become error messages for the
    /// model; they do not abort the step.
    pub async fn run_tool_step(&self, turn: &TurnContext, output: &ModelOutput) -> Vec<ToolMessage> {
        let calls = self.parser.parse(output);
        for call in &calls {
            self.sink.emit(AgentEvent::ToolCall {
                call_id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            });
        }

        let results = self.registry.execute_all(turn, &calls).await;
        let mut messages = Vec::with_capacity(calls.len());
        for (call, result) in calls.iter().zip(results) {
            let (content, is_error) = match result {
                Ok(r) => (r.llm_text, false),
                Err(e) => (format!("Tool {} failed: {e}", call.name), true),
            };
            self.sink.emit(AgentEvent::ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                is_error,
                content: content.clone(),
            });
            messages.push(ToolMessage {
                call_id: call.id.clone(),
                name: call.name.clone(),
                content,
                is_error,
            });
        }
        messages
    }

    /// Finalize citations in the model's answer and emit one `Citation` event
    /// per cited source followed by `Final`.
    pub fn finish(&self, turn: &TurnContext, text: &str) -> FinalizedCitations {
        let done = finalize_citations_with_collector(text, turn.collector());
        for entry in &done.bibliography {
            self.sink.emit(AgentEvent::Citation(entry.clone()));
        }
        self.sink.emit(AgentEvent::Final {
            text: done.text.clone(),
            unresolved: done.unresolved.iter().map(|m| m.id.clone()).collect(),
        });
        done
    }
}

impl<P: std::fmt::Debug, S: std::fmt::Debug> std::fmt::Debug for RagAgent<P, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagAgent")
            .field("registry", &self.registry)
            .field("parser", &self.parser)
            .field("sink", &self.sink)
            .finish()
    }
}
