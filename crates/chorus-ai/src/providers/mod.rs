use std::sync::Arc;

use crate::adapter_registry::{AdapterRef, clear_adapters, register_adapter};
use crate::config::AdapterConfig;

mod anthropic;
mod common;
mod google;
mod openai_chat;

pub use anthropic::{
    AnthropicAdapter, AnthropicContent, AnthropicError, AnthropicMessage, AnthropicStreamEvent,
    AnthropicTool, AnthropicUsage, Base64Source, ContentBlock, ContentBlockDelta,
    ContentBlockStart, MessageDeltaBody, MessageStartBody, MessagesRequest,
};
pub use google::{
    Blob, Candidate, Content, FunctionCall, FunctionDeclaration, FunctionResponse,
    GenerateContentRequest, GenerateContentResponse, GenerationConfig, GoogleAdapter, GooglePart,
    GoogleTool, PromptFeedback, UsageMetadata,
};
pub use openai_chat::{
    ChatCompletionChunk, ChatCompletionRequest, ChatContent, ChatContentPart, ChatError,
    ChatFunction, ChatFunctionCall, ChatMessage, ChatTool, ChatToolCall, ChatUsage, ChunkChoice,
    ChunkDelta, FunctionChunk, ImageUrl, InlineFile, OpenAiChatAdapter, ToolCallChunk,
};

pub const BUILTIN_SOURCE_ID: &str = "chorus-ai-builtins";

fn register_builtin_adapter(adapter: AdapterRef) {
    register_adapter(adapter, Some(BUILTIN_SOURCE_ID.to_string()));
}

/// Registers the OpenAI, xAI, Google and Anthropic adapters, all sharing
/// `config`.
pub fn register_builtin_adapters(config: &AdapterConfig) {
    register_builtin_adapter(Arc::new(OpenAiChatAdapter::new(config.clone())));
    register_builtin_adapter(Arc::new(OpenAiChatAdapter::xai(config.clone())));
    register_builtin_adapter(Arc::new(GoogleAdapter::new(config.clone())));
    register_builtin_adapter(Arc::new(AnthropicAdapter::new(config.clone())));
}

pub fn reset_adapters(config: &AdapterConfig) {
    clear_adapters();
    register_builtin_adapters(config);
}
