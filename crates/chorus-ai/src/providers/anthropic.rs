use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::adapter_registry::ProviderAdapter;
use crate::assembler::ToolCallAssembler;
use crate::config::AdapterConfig;
use crate::data_stream::DataStream;
use crate::error::{StreamError, StreamErrorCode};
use crate::types::{
    DataStreamPart, FinishReason, Message, Part, Role, Tool, ToolInvocationState, ToolKind, Usage,
};

use super::common::{
    ChunkReducer, drive, encode_base64, ensure_replayable, finish_tool_calls, null_as_default,
    push_finish, push_tool_fragment, tool_result_text, unsupported_content, unsupported_tool,
};

const PROVIDER: &str = "anthropic";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicStreamEvent {
    MessageStart {
        message: MessageStartBody,
    },
    ContentBlockStart {
        index: u32,
        content_block: ContentBlockStart,
    },
    ContentBlockDelta {
        index: u32,
        delta: ContentBlockDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: AnthropicError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageStartBody {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub usage: Option<AnthropicUsage>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlockStart {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageDeltaBody {
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AnthropicUsage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnthropicError {
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<AnthropicTool>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnthropicMessage {
    pub role: &'static str,
    pub content: AnthropicContent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: Base64Source,
    },
    Document {
        source: Base64Source,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Base64Source {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub media_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnthropicTool {
    Custom {
        name: String,
        description: String,
        input_schema: Value,
    },
    ProviderDefined {
        #[serde(rename = "type")]
        kind: String,
        name: String,
    },
}

/// Adapter for the Anthropic Messages API event stream.
#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    config: AdapterConfig,
}

impl AnthropicAdapter {
    pub fn new(config: AdapterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }
}

impl ProviderAdapter for AnthropicAdapter {
    type Chunk = AnthropicStreamEvent;
    type Request = MessagesRequest;

    fn provider(&self) -> &str {
        PROVIDER
    }

    fn to_canonical<'a, I>(&self, chunks: I) -> DataStream<'a>
    where
        I: IntoIterator<Item = Result<Self::Chunk, StreamError>> + 'a,
    {
        DataStream::new(move |consumer| drive(chunks, AnthropicEventReducer::default(), consumer))
    }

    fn to_native(
        &self,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<Self::Request, StreamError> {
        let tools = tools
            .iter()
            .map(convert_tool)
            .collect::<Result<Vec<_>, _>>()?;

        let mut system = Vec::new();
        let mut converted = Vec::new();
        for message in messages {
            match message.role {
                Role::System => {
                    if !message.is_text_only() {
                        return Err(unsupported_content(
                            PROVIDER,
                            "system prompts accept text only",
                        ));
                    }
                    system.push(message.content.clone());
                }
                Role::User => {
                    if message.tool_invocations().next().is_some() {
                        return Err(StreamError::protocol_violation(
                            "user message carries tool invocations",
                        ));
                    }
                    converted.push(AnthropicMessage {
                        role: "user",
                        content: convert_content(message)?,
                    });
                }
                Role::Assistant => {
                    let mut results = Vec::new();
                    for invocation in message.tool_invocations() {
                        ensure_replayable(PROVIDER, invocation)?;
                        if invocation.state == ToolInvocationState::Result {
                            results.push(ContentBlock::ToolResult {
                                tool_use_id: invocation.tool_call_id.clone(),
                                content: invocation
                                    .result
                                    .as_ref()
                                    .map(tool_result_text)
                                    .unwrap_or_default(),
                            });
                        }
                    }
                    if message.parts.iter().any(|part| matches!(part, Part::File { .. })) {
                        return Err(unsupported_content(
                            PROVIDER,
                            "assistant messages cannot carry files",
                        ));
                    }

                    converted.push(AnthropicMessage {
                        role: "assistant",
                        content: convert_content(message)?,
                    });
                    if !results.is_empty() {
                        converted.push(AnthropicMessage {
                            role: "user",
                            content: AnthropicContent::Blocks(results),
                        });
                    }
                }
                Role::Tool => {
                    return Err(StreamError::protocol_violation(
                        "Tool results must be carried as tool invocations on the assistant message",
                    ));
                }
            }
        }

        Ok(MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages: converted,
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            tools,
            stream: self.config.stream,
            temperature: self.config.temperature,
        })
    }
}

fn convert_content(message: &Message) -> Result<AnthropicContent, StreamError> {
    if message.is_text_only() {
        return Ok(AnthropicContent::Text(message.content.clone()));
    }

    let mut blocks = Vec::new();
    for part in &message.parts {
        match part {
            Part::StepStart => {}
            Part::Text { text } => blocks.push(ContentBlock::Text { text: text.clone() }),
            Part::File { mime_type, data } => {
                let source = Base64Source {
                    kind: "base64",
                    media_type: mime_type.clone(),
                    data: encode_base64(data),
                };
                if mime_type.starts_with("image/") {
                    blocks.push(ContentBlock::Image { source });
                } else if mime_type == "application/pdf" {
                    blocks.push(ContentBlock::Document { source });
                } else {
                    return Err(unsupported_content(
                        PROVIDER,
                        format!("unsupported file type '{mime_type}'"),
                    ));
                }
            }
            Part::ToolInvocation(invocation) => blocks.push(ContentBlock::ToolUse {
                id: invocation.tool_call_id.clone(),
                name: invocation.tool_name.clone(),
                input: match &invocation.args {
                    Value::Null => json!({}),
                    args => args.clone(),
                },
            }),
        }
    }
    Ok(AnthropicContent::Blocks(blocks))
}

fn convert_tool(tool: &Tool) -> Result<AnthropicTool, StreamError> {
    match &tool.kind {
        ToolKind::Function => Ok(AnthropicTool::Custom {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.schema.to_json_schema(),
        }),
        ToolKind::ProviderDefined { id } if !id.is_empty() => Ok(AnthropicTool::ProviderDefined {
            kind: id.clone(),
            name: tool.name.clone(),
        }),
        ToolKind::ProviderDefined { .. } => Err(unsupported_tool(PROVIDER, tool)),
    }
}

#[derive(Default)]
struct AnthropicEventReducer {
    assembler: ToolCallAssembler,
    tool_blocks: HashMap<u32, String>,
    finish_reason: Option<FinishReason>,
    usage: Usage,
}

impl AnthropicEventReducer {
    fn record_usage(&mut self, usage: AnthropicUsage) {
        if let Some(input) = usage.input_tokens {
            self.usage.prompt_tokens = input;
        }
        if let Some(output) = usage.output_tokens {
            self.usage.completion_tokens = output;
        }
    }
}

impl ChunkReducer<AnthropicStreamEvent> for AnthropicEventReducer {
    fn apply(
        &mut self,
        event: AnthropicStreamEvent,
        out: &mut Vec<DataStreamPart>,
    ) -> Result<(), StreamError> {
        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.record_usage(usage);
                }
            }
            AnthropicStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ContentBlockStart::Text { text } => {
                    if !text.is_empty() {
                        out.push(DataStreamPart::TextDelta { text });
                    }
                }
                ContentBlockStart::ToolUse { id, name } => {
                    push_tool_fragment(&mut self.assembler, &id, Some(name.as_str()), None, out);
                    self.tool_blocks.insert(index, id);
                }
                ContentBlockStart::Other => {
                    debug!(index, "skipping unsupported anthropic content block");
                }
            },
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                ContentBlockDelta::TextDelta { text } => {
                    if !text.is_empty() {
                        out.push(DataStreamPart::TextDelta { text });
                    }
                }
                ContentBlockDelta::InputJsonDelta { partial_json } => {
                    let tool_call_id = self.tool_blocks.get(&index).cloned().ok_or_else(|| {
                        StreamError::new(
                            StreamErrorCode::ProviderProtocol,
                            format!("input_json_delta for unknown content block {index}"),
                        )
                    })?;
                    push_tool_fragment(
                        &mut self.assembler,
                        &tool_call_id,
                        None,
                        Some(partial_json.as_str()),
                        out,
                    );
                }
                ContentBlockDelta::Other => {
                    debug!(index, "skipping unsupported anthropic delta");
                }
            },
            AnthropicStreamEvent::ContentBlockStop { index } => {
                if let Some(tool_call_id) = self.tool_blocks.remove(&index) {
                    let completed = self.assembler.complete(&tool_call_id);
                    out.extend(completed.map(DataStreamPart::ToolCall));
                }
            }
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason.as_deref() {
                    self.finish_reason = Some(map_stop_reason(reason));
                }
                if let Some(usage) = usage {
                    self.record_usage(usage);
                }
            }
            AnthropicStreamEvent::MessageStop
            | AnthropicStreamEvent::Ping
            | AnthropicStreamEvent::Unknown => {}
            AnthropicStreamEvent::Error { error } => {
                let cause = StreamError::new(
                    StreamErrorCode::ProviderReported,
                    format!("anthropic reported an error: {}", error.message),
                )
                .with_details(json!({ "type": error.kind }));
                out.push(DataStreamPart::Error { cause });
            }
        }
        Ok(())
    }

    fn finish(mut self, out: &mut Vec<DataStreamPart>) {
        finish_tool_calls(&mut self.assembler, out);
        push_finish(self.finish_reason.unwrap_or_default(), self.usage, out);
    }
}

fn map_stop_reason(reason: &str) -> FinishReason {
    match reason {
        "end_turn" | "stop_sequence" | "pause_turn" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        "refusal" => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(value: Value) -> Result<AnthropicStreamEvent, StreamError> {
        Ok(serde_json::from_value(value).expect("valid event"))
    }

    #[test]
    fn stop_reasons_map_to_canonical_reasons() {
        assert_eq!(map_stop_reason("end_turn"), FinishReason::Stop);
        assert_eq!(map_stop_reason("stop_sequence"), FinishReason::Stop);
        assert_eq!(map_stop_reason("max_tokens"), FinishReason::Length);
        assert_eq!(map_stop_reason("tool_use"), FinishReason::ToolCalls);
        assert_eq!(map_stop_reason("refusal"), FinishReason::ContentFilter);
        assert_eq!(map_stop_reason("model_context_window_exceeded"), FinishReason::Unknown);
    }

    #[test]
    fn unknown_event_types_deserialize_as_unknown() {
        let parsed: AnthropicStreamEvent =
            serde_json::from_value(json!({ "type": "citations_delta_v9" })).expect("parses");
        assert_eq!(parsed, AnthropicStreamEvent::Unknown);
    }

    #[test]
    fn content_block_stop_completes_the_tool_call() {
        let parts = AnthropicAdapter::new(AdapterConfig::new("claude-sonnet-4"))
            .to_canonical(vec![
                event(json!({ "type": "message_start", "message": { "id": "msg_1", "usage": { "input_tokens": 12 } } })),
                event(json!({ "type": "content_block_start", "index": 0, "content_block": { "type": "tool_use", "id": "toolu_1", "name": "read", "input": {} } })),
                event(json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "input_json_delta", "partial_json": "{\"path\":" } })),
                event(json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "input_json_delta", "partial_json": "\"a.txt\"}" } })),
                event(json!({ "type": "content_block_stop", "index": 0 })),
                event(json!({ "type": "message_delta", "delta": { "stop_reason": "tool_use" }, "usage": { "output_tokens": 7 } })),
                event(json!({ "type": "message_stop" })),
            ])
            .collect_parts()
            .expect("stream succeeds");

        assert_eq!(parts.len(), 6);
        assert!(matches!(
            &parts[3],
            DataStreamPart::ToolCall(call) if call.tool_call_id == "toolu_1" && call.args == json!({ "path": "a.txt" })
        ));
        assert_eq!(
            parts[5],
            DataStreamPart::FinishMessage {
                reason: FinishReason::ToolCalls,
                usage: Usage {
                    prompt_tokens: 12,
                    completion_tokens: 7,
                },
            }
        );
    }

    #[test]
    fn error_events_become_error_parts() {
        let mut items = Vec::new();
        AnthropicAdapter::new(AdapterConfig::new("claude-sonnet-4"))
            .to_canonical(vec![
                event(json!({ "type": "error", "error": { "type": "overloaded_error", "message": "Overloaded" } })),
                event(json!({ "type": "message_stop" })),
            ])
            .for_each(|item| {
                items.push(item);
                true
            });

        assert_eq!(items.len(), 1);
        let Ok(DataStreamPart::Error { cause }) = &items[0] else {
            panic!("expected an error part, got {items:?}");
        };
        assert_eq!(cause.code, StreamErrorCode::ProviderReported);
        assert_eq!(cause.details, Some(json!({ "type": "overloaded_error" })));
    }

    #[test]
    fn system_prompt_and_provider_tools_use_native_fields() {
        let request = AnthropicAdapter::new(AdapterConfig::new("claude-sonnet-4"))
            .to_native(
                &[Message::system("Be brief."), Message::user("Hello")],
                &[Tool {
                    name: "web_search".to_string(),
                    description: String::new(),
                    kind: ToolKind::ProviderDefined {
                        id: "web_search_20250305".to_string(),
                    },
                    schema: Default::default(),
                }],
            )
            .expect("request builds");

        let value = serde_json::to_value(&request).expect("serialize request");
        assert_eq!(
            value,
            json!({
                "model": "claude-sonnet-4",
                "max_tokens": 4096,
                "messages": [{ "role": "user", "content": "Hello" }],
                "system": "Be brief.",
                "tools": [{ "type": "web_search_20250305", "name": "web_search" }],
                "stream": true,
            })
        );
    }
}
