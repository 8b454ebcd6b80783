use std::collections::HashMap;

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::types::ToolCall;

#[derive(Debug, Default)]
struct PendingToolCall {
    tool_name: String,
    arguments: String,
}

/// Merges tool-call fragments that share a `toolCallId` into complete calls.
///
/// Providers never interleave fragments of two incomplete calls, so a fragment
/// for a new id completes every call still open.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    open: HashMap<String, PendingToolCall>,
    order: Vec<String>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Buffers one fragment and returns the calls its arrival completed.
    pub fn push(
        &mut self,
        tool_call_id: &str,
        tool_name: Option<&str>,
        args_fragment: Option<&str>,
    ) -> Vec<ToolCall> {
        let mut completed = Vec::new();
        if !self.open.contains_key(tool_call_id) {
            completed = self.finish();
            self.order.push(tool_call_id.to_string());
        }

        let pending = self.open.entry(tool_call_id.to_string()).or_default();
        if let Some(name) = tool_name.filter(|name| !name.is_empty()) {
            pending.tool_name = name.to_string();
        }
        if let Some(fragment) = args_fragment {
            pending.arguments.push_str(fragment);
        }

        completed
    }

    /// Completes a single call when the provider marks it finished.
    pub fn complete(&mut self, tool_call_id: &str) -> Option<ToolCall> {
        let pending = self.open.remove(tool_call_id)?;
        self.order.retain(|id| id != tool_call_id);
        Some(into_tool_call(tool_call_id.to_string(), pending))
    }

    /// Completes every open call in arrival order.
    pub fn finish(&mut self) -> Vec<ToolCall> {
        let order = std::mem::take(&mut self.order);
        order
            .into_iter()
            .filter_map(|id| {
                let pending = self.open.remove(&id)?;
                Some(into_tool_call(id, pending))
            })
            .collect()
    }
}

fn into_tool_call(tool_call_id: String, pending: PendingToolCall) -> ToolCall {
    if pending.tool_name.is_empty() {
        debug!(tool_call_id = %tool_call_id, "completing tool call without a name");
    }
    ToolCall {
        args: parse_tool_arguments(&pending.arguments),
        tool_call_id,
        tool_name: pending.tool_name,
    }
}

/// Parses buffered argument text, wrapping unparseable text as `{"text": raw}`.
pub fn parse_tool_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(arguments) => arguments,
        Err(error) => {
            warn!(%error, "tool call arguments are not valid JSON; keeping raw text");
            json!({ "text": raw })
        }
    }
}
