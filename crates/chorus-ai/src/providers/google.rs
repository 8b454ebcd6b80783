use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::adapter_registry::ProviderAdapter;
use crate::assembler::ToolCallAssembler;
use crate::config::AdapterConfig;
use crate::data_stream::DataStream;
use crate::error::StreamError;
use crate::types::{
    DataStreamPart, FinishReason, Message, Part, Role, Tool, ToolInvocationState, ToolKind, Usage,
};

use super::common::{
    ChunkReducer, decode_base64, drive, encode_base64, ensure_replayable, finish_tool_calls,
    null_as_default, push_finish, push_tool_fragment, unsupported_content, unsupported_tool,
};

const PROVIDER: &str = "google";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default)]
    pub response_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub index: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default, deserialize_with = "null_as_default")]
    pub prompt_token_count: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub candidates_token_count: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub role: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parts: Vec<GooglePart>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GooglePart {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub thought: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub inline_data: Option<Blob>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub function_response: Option<FunctionResponse>,
}

impl GooglePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<GoogleTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleTool {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub function_declarations: Vec<FunctionDeclaration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_search: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_execution: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

/// Adapter for the Gemini `generateContent` stream.
#[derive(Debug, Clone)]
pub struct GoogleAdapter {
    config: AdapterConfig,
}

impl GoogleAdapter {
    pub fn new(config: AdapterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    fn convert_tools(&self, tools: &[Tool]) -> Result<Vec<GoogleTool>, StreamError> {
        let mut declarations = Vec::new();
        let mut builtins = Vec::new();
        for tool in tools {
            match &tool.kind {
                ToolKind::Function => declarations.push(FunctionDeclaration {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: (!tool.schema.is_empty()).then(|| tool.schema.to_json_schema()),
                }),
                ToolKind::ProviderDefined { id } if id == "google_search" => {
                    builtins.push(GoogleTool {
                        google_search: Some(json!({})),
                        ..GoogleTool::default()
                    });
                }
                ToolKind::ProviderDefined { id } if id == "code_execution" => {
                    builtins.push(GoogleTool {
                        code_execution: Some(json!({})),
                        ..GoogleTool::default()
                    });
                }
                ToolKind::ProviderDefined { .. } => return Err(unsupported_tool(PROVIDER, tool)),
            }
        }

        let mut converted = Vec::new();
        if !declarations.is_empty() {
            converted.push(GoogleTool {
                function_declarations: declarations,
                ..GoogleTool::default()
            });
        }
        converted.extend(builtins);
        Ok(converted)
    }
}

impl ProviderAdapter for GoogleAdapter {
    type Chunk = GenerateContentResponse;
    type Request = GenerateContentRequest;

    fn provider(&self) -> &str {
        PROVIDER
    }

    fn to_canonical<'a, I>(&self, chunks: I) -> DataStream<'a>
    where
        I: IntoIterator<Item = Result<Self::Chunk, StreamError>> + 'a,
    {
        DataStream::new(move |consumer| drive(chunks, GoogleChunkReducer::default(), consumer))
    }

    fn to_native(
        &self,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<Self::Request, StreamError> {
        let tools = self.convert_tools(tools)?;

        let mut system_parts = Vec::new();
        let mut contents: Vec<Content> = Vec::new();
        for message in messages {
            match message.role {
                Role::System => {
                    if !message.is_text_only() {
                        return Err(unsupported_content(
                            PROVIDER,
                            "system instructions accept text only",
                        ));
                    }
                    system_parts.push(GooglePart::text(message.content.clone()));
                }
                Role::User => {
                    if message.tool_invocations().next().is_some() {
                        return Err(StreamError::protocol_violation(
                            "user message carries tool invocations",
                        ));
                    }
                    contents.push(Content {
                        role: Some("user".to_string()),
                        parts: convert_parts(message)?,
                    });
                }
                Role::Assistant => {
                    let mut responses = Vec::new();
                    for invocation in message.tool_invocations() {
                        ensure_replayable(PROVIDER, invocation)?;
                        if invocation.state == ToolInvocationState::Result {
                            responses.push(GooglePart {
                                function_response: Some(FunctionResponse {
                                    id: Some(invocation.tool_call_id.clone()),
                                    name: invocation.tool_name.clone(),
                                    response: wrap_response(invocation.result.clone()),
                                }),
                                ..GooglePart::default()
                            });
                        }
                    }

                    contents.push(Content {
                        role: Some("model".to_string()),
                        parts: convert_parts(message)?,
                    });
                    if !responses.is_empty() {
                        contents.push(Content {
                            role: Some("user".to_string()),
                            parts: responses,
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

        let generation_config = (self.config.temperature.is_some()
            || self.config.max_tokens.is_some())
        .then(|| GenerationConfig {
            temperature: self.config.temperature,
            max_output_tokens: self.config.max_tokens,
        });

        Ok(GenerateContentRequest {
            contents,
            system_instruction: (!system_parts.is_empty()).then(|| Content {
                role: None,
                parts: system_parts,
            }),
            tools,
            generation_config,
        })
    }
}

/// Text-only messages collapse into a single text part carrying `content`.
fn convert_parts(message: &Message) -> Result<Vec<GooglePart>, StreamError> {
    if message.is_text_only() {
        return Ok(vec![GooglePart::text(message.content.clone())]);
    }

    let mut parts = Vec::new();
    for part in &message.parts {
        match part {
            Part::StepStart => {}
            Part::Text { text } => parts.push(GooglePart::text(text.clone())),
            Part::File { mime_type, data } => parts.push(GooglePart {
                inline_data: Some(Blob {
                    mime_type: mime_type.clone(),
                    data: encode_base64(data),
                }),
                ..GooglePart::default()
            }),
            Part::ToolInvocation(invocation) => parts.push(GooglePart {
                function_call: Some(FunctionCall {
                    id: Some(invocation.tool_call_id.clone()),
                    name: invocation.tool_name.clone(),
                    args: invocation.args.clone(),
                }),
                ..GooglePart::default()
            }),
        }
    }
    Ok(parts)
}

fn wrap_response(result: Option<Value>) -> Value {
    match result {
        Some(Value::Object(object)) => Value::Object(object),
        Some(other) => json!({ "output": other }),
        None => json!({}),
    }
}

#[derive(Default)]
struct GoogleChunkReducer {
    assembler: ToolCallAssembler,
    next_call: usize,
    saw_tool_calls: bool,
    finish_reason: Option<FinishReason>,
    usage: Usage,
}

impl GoogleChunkReducer {
    fn apply_part(
        &mut self,
        part: GooglePart,
        out: &mut Vec<DataStreamPart>,
    ) -> Result<(), StreamError> {
        if part.thought == Some(true) {
            debug!("skipping google thought part");
            return Ok(());
        }

        if let Some(text) = part.text.filter(|text| !text.is_empty()) {
            out.push(DataStreamPart::TextDelta { text });
        }

        if let Some(blob) = part.inline_data {
            out.push(DataStreamPart::File {
                data: decode_base64(PROVIDER, &blob.data)?,
                mime_type: blob.mime_type,
            });
        }

        if let Some(call) = part.function_call {
            let tool_call_id = match call.id.filter(|id| !id.is_empty()) {
                Some(id) => id,
                None => {
                    self.next_call += 1;
                    format!("call_{}", self.next_call)
                }
            };
            let arguments = (!call.args.is_null()).then(|| call.args.to_string());
            push_tool_fragment(
                &mut self.assembler,
                &tool_call_id,
                Some(call.name.as_str()),
                arguments.as_deref(),
                out,
            );
            out.extend(self.assembler.complete(&tool_call_id).map(DataStreamPart::ToolCall));
            self.saw_tool_calls = true;
        }

        if part.function_response.is_some() {
            debug!("ignoring function response echoed in a model turn");
        }

        Ok(())
    }
}

impl ChunkReducer<GenerateContentResponse> for GoogleChunkReducer {
    fn apply(
        &mut self,
        chunk: GenerateContentResponse,
        out: &mut Vec<DataStreamPart>,
    ) -> Result<(), StreamError> {
        if let Some(usage) = chunk.usage_metadata {
            self.usage = Usage {
                prompt_tokens: usage.prompt_token_count,
                completion_tokens: usage.candidates_token_count,
            };
        }

        if chunk.candidates.is_empty() {
            if let Some(reason) = chunk.prompt_feedback.and_then(|feedback| feedback.block_reason) {
                debug!(%reason, "google blocked the prompt");
                self.finish_reason = Some(FinishReason::ContentFilter);
            }
            return Ok(());
        }

        for candidate in chunk.candidates {
            if candidate.index.unwrap_or(0) != 0 {
                debug!(index = ?candidate.index, "ignoring alternate candidate");
                continue;
            }
            if let Some(content) = candidate.content {
                for part in content.parts {
                    self.apply_part(part, out)?;
                }
            }
            if let Some(reason) = candidate.finish_reason.as_deref() {
                finish_tool_calls(&mut self.assembler, out);
                self.finish_reason = Some(map_finish_reason(reason));
            }
        }

        Ok(())
    }

    fn finish(mut self, out: &mut Vec<DataStreamPart>) {
        finish_tool_calls(&mut self.assembler, out);
        let reason = match self.finish_reason.unwrap_or_default() {
            FinishReason::Stop if self.saw_tool_calls => FinishReason::ToolCalls,
            reason => reason,
        };
        push_finish(reason, self.usage, out);
    }
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII"
        | "IMAGE_SAFETY" => FinishReason::ContentFilter,
        "MALFORMED_FUNCTION_CALL" => FinishReason::Error,
        _ => FinishReason::Unknown,
    }
}
