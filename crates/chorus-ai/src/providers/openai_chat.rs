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
    ChunkReducer, data_url, drive, ensure_replayable, finish_tool_calls, null_as_default,
    push_finish, push_tool_fragment, tool_result_text, unsupported_content, unsupported_tool,
};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
    #[serde(default)]
    pub error: Option<ChatError>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChunkChoice {
    #[serde(default, deserialize_with = "null_as_default")]
    pub index: u32,
    #[serde(default)]
    pub delta: Option<ChunkDelta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tool_calls: Vec<ToolCallChunk>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCallChunk {
    #[serde(default, deserialize_with = "null_as_default")]
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionChunk>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionChunk {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ChatUsage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub prompt_tokens: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatError {
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ChatTool>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<ChatContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ChatToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Parts(Vec<ChatContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    File { file: InlineFile },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlineFile {
    pub file_data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: ChatFunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: ChatFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Adapter for OpenAI-compatible chat completion streams.
#[derive(Debug, Clone)]
pub struct OpenAiChatAdapter {
    provider: String,
    config: AdapterConfig,
}

impl OpenAiChatAdapter {
    pub fn new(config: AdapterConfig) -> Self {
        Self::named("openai", config)
    }

    /// Grok speaks the same wire format under its own provider name.
    pub fn xai(config: AdapterConfig) -> Self {
        Self::named("xai", config)
    }

    pub fn named(provider: impl Into<String>, config: AdapterConfig) -> Self {
        Self {
            provider: provider.into(),
            config,
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    fn convert_message(
        &self,
        message: &Message,
        out: &mut Vec<ChatMessage>,
    ) -> Result<(), StreamError> {
        match message.role {
            Role::System | Role::User => {
                if message.tool_invocations().next().is_some() {
                    return Err(StreamError::protocol_violation(format!(
                        "{} message carries tool invocations",
                        message.role
                    )));
                }
                let content = if message.is_text_only() {
                    ChatContent::Text(message.content.clone())
                } else if message.role == Role::System {
                    return Err(unsupported_content(
                        &self.provider,
                        "system messages accept text only",
                    ));
                } else {
                    ChatContent::Parts(self.content_parts(&message.parts)?)
                };
                out.push(ChatMessage {
                    role: message.role.as_str().to_string(),
                    content: Some(content),
                    tool_calls: Vec::new(),
                    tool_call_id: None,
                });
            }
            Role::Assistant => {
                if message.parts.iter().any(|part| matches!(part, Part::File { .. })) {
                    return Err(unsupported_content(
                        &self.provider,
                        "assistant messages cannot carry files",
                    ));
                }

                let mut tool_calls = Vec::new();
                let mut results = Vec::new();
                for invocation in message.tool_invocations() {
                    ensure_replayable(&self.provider, invocation)?;
                    tool_calls.push(ChatToolCall {
                        id: invocation.tool_call_id.clone(),
                        kind: "function",
                        function: ChatFunctionCall {
                            name: invocation.tool_name.clone(),
                            arguments: invocation.args.to_string(),
                        },
                    });
                    if invocation.state == ToolInvocationState::Result {
                        results.push(ChatMessage {
                            role: Role::Tool.as_str().to_string(),
                            content: invocation
                                .result
                                .as_ref()
                                .map(|result| ChatContent::Text(tool_result_text(result))),
                            tool_calls: Vec::new(),
                            tool_call_id: Some(invocation.tool_call_id.clone()),
                        });
                    }
                }

                let content = if message.content.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(ChatContent::Text(message.content.clone()))
                };
                out.push(ChatMessage {
                    role: Role::Assistant.as_str().to_string(),
                    content,
                    tool_calls,
                    tool_call_id: None,
                });
                out.extend(results);
            }
            Role::Tool => {
                return Err(StreamError::protocol_violation(
                    "Tool results must be carried as tool invocations on the assistant message",
                ));
            }
        }
        Ok(())
    }

    fn content_parts(&self, parts: &[Part]) -> Result<Vec<ChatContentPart>, StreamError> {
        let mut converted = Vec::new();
        for part in parts {
            match part {
                Part::StepStart => {}
                Part::Text { text } => converted.push(ChatContentPart::Text { text: text.clone() }),
                Part::File { mime_type, data } if mime_type.starts_with("image/") => {
                    converted.push(ChatContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: data_url(mime_type, data),
                        },
                    });
                }
                Part::File { mime_type, data } => converted.push(ChatContentPart::File {
                    file: InlineFile {
                        file_data: data_url(mime_type, data),
                    },
                }),
                Part::ToolInvocation(invocation) => {
                    return Err(unsupported_content(
                        &self.provider,
                        format!("unexpected tool invocation '{}'", invocation.tool_call_id),
                    ));
                }
            }
        }
        Ok(converted)
    }

    fn convert_tool(&self, tool: &Tool) -> Result<ChatTool, StreamError> {
        match tool.kind {
            ToolKind::Function => Ok(ChatTool {
                kind: "function",
                function: ChatFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.schema.to_json_schema(),
                },
            }),
            ToolKind::ProviderDefined { .. } => Err(unsupported_tool(&self.provider, tool)),
        }
    }
}

impl ProviderAdapter for OpenAiChatAdapter {
    type Chunk = ChatCompletionChunk;
    type Request = ChatCompletionRequest;

    fn provider(&self) -> &str {
        &self.provider
    }

    fn to_canonical<'a, I>(&self, chunks: I) -> DataStream<'a>
    where
        I: IntoIterator<Item = Result<Self::Chunk, StreamError>> + 'a,
    {
        let reducer = ChatChunkReducer::new(self.provider.clone());
        DataStream::new(move |consumer| drive(chunks, reducer, consumer))
    }

    fn to_native(
        &self,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<Self::Request, StreamError> {
        let tools = tools
            .iter()
            .map(|tool| self.convert_tool(tool))
            .collect::<Result<Vec<_>, _>>()?;

        let mut converted = Vec::new();
        for message in messages {
            self.convert_message(message, &mut converted)?;
        }

        Ok(ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: converted,
            tools,
            stream: self.config.stream,
            stream_options: self
                .config
                .stream
                .then(|| json!({ "include_usage": true })),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        })
    }
}

struct ChatChunkReducer {
    provider: String,
    assembler: ToolCallAssembler,
    call_ids: HashMap<u32, String>,
    finish_reason: Option<FinishReason>,
    usage: Usage,
}

impl ChatChunkReducer {
    fn new(provider: String) -> Self {
        Self {
            provider,
            assembler: ToolCallAssembler::new(),
            call_ids: HashMap::new(),
            finish_reason: None,
            usage: Usage::default(),
        }
    }

    fn call_id(&mut self, fragment: &ToolCallChunk) -> String {
        match fragment.id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => {
                self.call_ids.insert(fragment.index, id.to_string());
                id.to_string()
            }
            None => self
                .call_ids
                .entry(fragment.index)
                .or_insert_with(|| format!("call_{}", fragment.index))
                .clone(),
        }
    }
}

impl ChunkReducer<ChatCompletionChunk> for ChatChunkReducer {
    fn apply(
        &mut self,
        chunk: ChatCompletionChunk,
        out: &mut Vec<DataStreamPart>,
    ) -> Result<(), StreamError> {
        if let Some(error) = chunk.error {
            let cause = StreamError::new(
                StreamErrorCode::ProviderReported,
                format!("{} reported an error: {}", self.provider, error.message),
            )
            .with_details(json!({ "code": error.code, "type": error.kind }));
            out.push(DataStreamPart::Error { cause });
            return Ok(());
        }

        if let Some(usage) = chunk.usage {
            self.usage = Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            };
        }

        for choice in chunk.choices {
            if choice.index != 0 {
                debug!(
                    provider = %self.provider,
                    index = choice.index,
                    "ignoring alternate choice"
                );
                continue;
            }

            if let Some(delta) = choice.delta {
                if let Some(text) = delta.content.filter(|text| !text.is_empty()) {
                    out.push(DataStreamPart::TextDelta { text });
                }
                for fragment in &delta.tool_calls {
                    let tool_call_id = self.call_id(fragment);
                    let function = fragment.function.as_ref();
                    push_tool_fragment(
                        &mut self.assembler,
                        &tool_call_id,
                        function.and_then(|function| function.name.as_deref()),
                        function.and_then(|function| function.arguments.as_deref()),
                        out,
                    );
                }
            }

            if let Some(reason) = choice.finish_reason.as_deref() {
                finish_tool_calls(&mut self.assembler, out);
                self.finish_reason = Some(map_finish_reason(reason));
            }
        }

        Ok(())
    }

    fn finish(mut self, out: &mut Vec<DataStreamPart>) {
        finish_tool_calls(&mut self.assembler, out);
        push_finish(self.finish_reason.unwrap_or_default(), self.usage, out);
    }
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(value: Value) -> Result<ChatCompletionChunk, StreamError> {
        Ok(serde_json::from_value(value).expect("valid chunk"))
    }

    #[test]
    fn finish_codes_map_to_canonical_reasons() {
        assert_eq!(map_finish_reason("stop"), FinishReason::Stop);
        assert_eq!(map_finish_reason("length"), FinishReason::Length);
        assert_eq!(map_finish_reason("function_call"), FinishReason::ToolCalls);
        assert_eq!(map_finish_reason("content_filter"), FinishReason::ContentFilter);
        assert_eq!(map_finish_reason("eos"), FinishReason::Unknown);
    }

    #[test]
    fn fragments_without_ids_reuse_the_id_seen_at_their_index() {
        let adapter = OpenAiChatAdapter::new(AdapterConfig::new("gpt-4o-mini"));
        let parts = adapter
            .to_canonical(vec![
                chunk(json!({ "choices": [{ "index": 0, "delta": { "tool_calls": [
                    { "index": 0, "id": "call_abc", "function": { "name": "lookup", "arguments": "" } }
                ] } }] })),
                chunk(json!({ "choices": [{ "index": 0, "delta": { "tool_calls": [
                    { "index": 0, "function": { "arguments": "{\"q\":\"rust\"}" } }
                ] } }] })),
                chunk(json!({ "choices": [{ "index": 0, "delta": {}, "finish_reason": "tool_calls" }] })),
            ])
            .collect_parts()
            .expect("stream succeeds");

        let ids = parts
            .iter()
            .filter_map(|part| match part {
                DataStreamPart::ToolCallDelta { tool_call_id, .. } => Some(tool_call_id.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["call_abc", "call_abc"]);
        assert!(parts.iter().any(|part| matches!(
            part,
            DataStreamPart::ToolCall(call) if call.tool_name == "lookup" && call.args == json!({ "q": "rust" })
        )));
        assert_eq!(
            parts.last(),
            Some(&DataStreamPart::FinishMessage {
                reason: FinishReason::ToolCalls,
                usage: Usage::default(),
            })
        );
    }

    #[test]
    fn in_band_error_ends_the_stream() {
        let adapter = OpenAiChatAdapter::xai(AdapterConfig::new("grok-2-1212"));
        let error = adapter
            .to_canonical(vec![
                chunk(json!({ "choices": [{ "index": 0, "delta": { "content": "Hi" } }] })),
                chunk(json!({ "error": { "message": "rate limited", "code": 429 } })),
            ])
            .collect_parts()
            .expect_err("provider error surfaces");
        assert_eq!(error.code, StreamErrorCode::ProviderReported);
        assert_eq!(error.details, Some(json!({ "code": 429, "type": null })));
    }

    #[test]
    fn streaming_requests_ask_for_usage() {
        let config = AdapterConfig::new("gpt-4o-mini").with_temperature(0.2);
        let adapter = OpenAiChatAdapter::new(config);
        let request = adapter
            .to_native(&[Message::user("hi")], &[])
            .expect("request builds");
        let value = serde_json::to_value(&request).expect("serialize request");
        assert_eq!(value["stream_options"], json!({ "include_usage": true }));
        assert_eq!(value["temperature"], json!(0.2));
        assert!(value.get("tools").is_none());
        assert!(value.get("max_tokens").is_none());
    }
}
