use serde_json::{Value, json};
use tracing::debug;

use crate::data_stream::DataStream;
use crate::error::StreamError;
use crate::types::{
    DataStreamPart, FinishReason, Message, Part, Role, ToolInvocation, ToolInvocationState,
};

/// Rebuilds finalized messages from a canonical event sequence.
///
/// Feeding is strictly sequential; the same event sequence always yields the
/// same messages.
#[derive(Debug, Clone, Default)]
pub struct DataStreamAccumulator {
    current: Option<Message>,
    step_pending: bool,
    messages: Vec<Message>,
    last_finish_reason: Option<FinishReason>,
}

impl DataStreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains `stream` into a fresh accumulator and returns its messages.
    pub fn accumulate(stream: DataStream<'_>) -> Result<Vec<Message>, StreamError> {
        let mut accumulator = Self::new();
        stream.with_accumulator(&mut accumulator).run()?;
        Ok(accumulator.into_messages())
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn in_progress(&self) -> Option<&Message> {
        self.current.as_ref()
    }

    pub fn last_finish_reason(&self) -> Option<FinishReason> {
        self.last_finish_reason
    }

    pub fn push(&mut self, part: &DataStreamPart) -> Result<(), StreamError> {
        match part {
            DataStreamPart::Error { cause } => {
                if self.current.take().is_some() {
                    debug!("discarding in-progress message after stream error");
                }
                self.step_pending = false;
                return Err(cause.clone());
            }
            DataStreamPart::ToolResult {
                tool_call_id,
                result,
            } => return self.apply_tool_result(tool_call_id, result),
            _ => {}
        }

        let message = self.current.get_or_insert_with(|| Message {
            role: Role::Assistant,
            content: String::new(),
            parts: vec![Part::StepStart],
        });

        match part {
            DataStreamPart::TextDelta { text } => {
                begin_content(message, &mut self.step_pending);
                match message.parts.last_mut() {
                    Some(Part::Text { text: existing }) => existing.push_str(text),
                    _ => message.parts.push(Part::Text { text: text.clone() }),
                }
                message.content.push_str(text);
            }
            DataStreamPart::ToolCallDelta {
                tool_call_id,
                tool_name,
                ..
            } => match message.tool_invocation_mut(tool_call_id) {
                Some(invocation) if invocation.state == ToolInvocationState::PartialCall => {
                    if let Some(name) = tool_name.as_ref().filter(|name| !name.is_empty()) {
                        invocation.tool_name = name.clone();
                    }
                }
                Some(_) => {
                    debug!(
                        tool_call_id = %tool_call_id,
                        "ignoring delta for a completed tool call"
                    );
                }
                None => {
                    begin_content(message, &mut self.step_pending);
                    message.parts.push(Part::ToolInvocation(ToolInvocation {
                        state: ToolInvocationState::PartialCall,
                        tool_call_id: tool_call_id.clone(),
                        tool_name: tool_name.clone().unwrap_or_default(),
                        args: Value::Null,
                        result: None,
                    }));
                }
            },
            DataStreamPart::ToolCall(call) => match message.tool_invocation_mut(&call.tool_call_id)
            {
                Some(invocation) if invocation.state == ToolInvocationState::Result => {
                    return Err(StreamError::protocol_violation(format!(
                        "Tool call '{}' arrived after its result",
                        call.tool_call_id
                    ))
                    .with_details(json!({ "toolCallId": call.tool_call_id })));
                }
                Some(invocation) => {
                    invocation.state = ToolInvocationState::Call;
                    if !call.tool_name.is_empty() {
                        invocation.tool_name = call.tool_name.clone();
                    }
                    invocation.args = call.args.clone();
                }
                None => {
                    begin_content(message, &mut self.step_pending);
                    message.parts.push(Part::ToolInvocation(ToolInvocation {
                        state: ToolInvocationState::Call,
                        tool_call_id: call.tool_call_id.clone(),
                        tool_name: call.tool_name.clone(),
                        args: call.args.clone(),
                        result: None,
                    }));
                }
            },
            DataStreamPart::File { mime_type, data } => {
                begin_content(message, &mut self.step_pending);
                message.parts.push(Part::File {
                    mime_type: mime_type.clone(),
                    data: data.clone(),
                });
            }
            DataStreamPart::FinishStep { continued, .. } => {
                if *continued {
                    self.step_pending = true;
                }
            }
            DataStreamPart::FinishMessage { reason, .. } => {
                if let Some(mut finished) = self.current.take() {
                    finished.role = Role::Assistant;
                    self.messages.push(finished);
                }
                self.step_pending = false;
                self.last_finish_reason = Some(*reason);
            }
            DataStreamPart::ToolResult { .. } | DataStreamPart::Error { .. } => {}
        }

        Ok(())
    }

    fn apply_tool_result(
        &mut self,
        tool_call_id: &str,
        result: &Value,
    ) -> Result<(), StreamError> {
        let invocation = self
            .current
            .as_mut()
            .and_then(|message| message.tool_invocation_mut(tool_call_id))
            .ok_or_else(|| {
                StreamError::protocol_violation(format!(
                    "Tool result for unknown tool call '{tool_call_id}'"
                ))
                .with_details(json!({ "toolCallId": tool_call_id }))
            })?;

        invocation.state = ToolInvocationState::Result;
        invocation.result = Some(result.clone());
        Ok(())
    }
}

fn begin_content(message: &mut Message, step_pending: &mut bool) {
    if std::mem::take(step_pending) {
        message.parts.push(Part::StepStart);
    }
}
