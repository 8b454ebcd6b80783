use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};

use crate::assembler::ToolCallAssembler;
use crate::data_stream::StreamItem;
use crate::error::{StreamError, StreamErrorCode};
use crate::types::{DataStreamPart, FinishReason, Tool, ToolInvocation, ToolInvocationState, Usage};

/// Reads an explicit `null` the same way as a missing field. OpenAI-compatible
/// servers send `"tool_calls": null` on plain text deltas.
pub(super) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Per-stream ingest state of one provider: turns each native chunk into zero
/// or more canonical parts.
pub(super) trait ChunkReducer<C> {
    fn apply(&mut self, chunk: C, out: &mut Vec<DataStreamPart>) -> Result<(), StreamError>;

    /// Called once after the last chunk; emits pending completions and the
    /// terminal finish pair.
    fn finish(self, out: &mut Vec<DataStreamPart>);
}

/// Pulls native chunks through `reducer`, handing parts to `consumer` as soon
/// as each chunk is reduced. Stops pulling once the consumer declines.
pub(super) fn drive<C, I, R>(
    chunks: I,
    mut reducer: R,
    consumer: &mut dyn FnMut(StreamItem) -> bool,
) where
    I: IntoIterator<Item = Result<C, StreamError>>,
    R: ChunkReducer<C>,
{
    let mut parts = Vec::new();
    for chunk in chunks {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(error) => {
                consumer(Err(error));
                return;
            }
        };

        let reduced = reducer.apply(chunk, &mut parts);
        for part in parts.drain(..) {
            if !consumer(Ok(part)) {
                return;
            }
        }
        if let Err(error) = reduced {
            consumer(Err(error));
            return;
        }
    }

    reducer.finish(&mut parts);
    for part in parts {
        if !consumer(Ok(part)) {
            return;
        }
    }
}

/// Runs one native fragment through the assembler: completions it caused come
/// first, then the fragment itself as a delta.
pub(super) fn push_tool_fragment(
    assembler: &mut ToolCallAssembler,
    tool_call_id: &str,
    tool_name: Option<&str>,
    args_fragment: Option<&str>,
    out: &mut Vec<DataStreamPart>,
) {
    let completed = assembler.push(tool_call_id, tool_name, args_fragment);
    out.extend(completed.into_iter().map(DataStreamPart::ToolCall));
    out.push(DataStreamPart::ToolCallDelta {
        tool_call_id: tool_call_id.to_string(),
        tool_name: tool_name
            .filter(|name| !name.is_empty())
            .map(str::to_string),
        args_fragment: args_fragment
            .filter(|fragment| !fragment.is_empty())
            .map(str::to_string),
    });
}

pub(super) fn finish_tool_calls(assembler: &mut ToolCallAssembler, out: &mut Vec<DataStreamPart>) {
    out.extend(assembler.finish().into_iter().map(DataStreamPart::ToolCall));
}

pub(super) fn push_finish(reason: FinishReason, usage: Usage, out: &mut Vec<DataStreamPart>) {
    out.push(DataStreamPart::FinishStep {
        reason,
        continued: false,
        usage,
    });
    out.push(DataStreamPart::FinishMessage { reason, usage });
}

pub(super) fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub(super) fn decode_base64(provider: &str, encoded: &str) -> Result<Vec<u8>, StreamError> {
    STANDARD.decode(encoded.as_bytes()).map_err(|error| {
        StreamError::new(
            StreamErrorCode::ProviderProtocol,
            format!("Invalid base64 inline data from {provider}: {error}"),
        )
    })
}

pub(super) fn data_url(mime_type: &str, data: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", encode_base64(data))
}

/// Text form of a tool result for providers that only accept strings.
pub(super) fn tool_result_text(result: &Value) -> String {
    match result {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub(super) fn unsupported_tool(provider: &str, tool: &Tool) -> StreamError {
    StreamError::new(
        StreamErrorCode::UnsupportedTool,
        format!("{provider} cannot express tool '{}'", tool.name),
    )
    .with_details(json!({ "toolName": tool.name, "kind": tool.kind }))
}

pub(super) fn unsupported_content(provider: &str, message: impl Into<String>) -> StreamError {
    StreamError::new(
        StreamErrorCode::UnsupportedContent,
        format!("{provider}: {}", message.into()),
    )
}

/// Rejects invocations that never finished streaming; only `call` and `result`
/// states can be replayed to a provider.
pub(super) fn ensure_replayable(
    provider: &str,
    invocation: &ToolInvocation,
) -> Result<(), StreamError> {
    if invocation.state == ToolInvocationState::PartialCall {
        return Err(unsupported_content(
            provider,
            format!("tool call '{}' is incomplete", invocation.tool_call_id),
        )
        .with_details(json!({ "toolCallId": invocation.tool_call_id })));
    }
    Ok(())
}
