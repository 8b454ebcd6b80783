//! Provider-agnostic streaming chat primitives: a canonical event model, a
//! lazy cancellable pipeline over it, an accumulator that rebuilds messages,
//! and adapters that translate each provider's native shapes.

mod accumulator;
mod adapter_registry;
mod assembler;
mod channel;
mod config;
mod data_stream;
mod error;
pub mod providers;
pub mod sse;
mod types;
mod validation;

pub use accumulator::DataStreamAccumulator;
pub use adapter_registry::{
    AdapterRef, DynProviderAdapter, JsonChunks, ProviderAdapter, clear_adapters, get_adapter,
    get_adapters, register_adapter, unregister_adapters,
};
pub use assembler::{ToolCallAssembler, parse_tool_arguments};
pub use channel::{ChunkReceiver, ChunkSender, chunk_channel};
pub use config::AdapterConfig;
pub use data_stream::{DataStream, StreamItem};
pub use error::{StreamError, StreamErrorCode};
pub use providers::{
    AnthropicAdapter, BUILTIN_SOURCE_ID, GoogleAdapter, OpenAiChatAdapter,
    register_builtin_adapters, reset_adapters,
};
pub use types::{
    DataStreamPart, FinishReason, Message, Part, Role, Tool, ToolCall, ToolInvocation,
    ToolInvocationState, ToolKind, ToolSchema, Usage,
};
pub use validation::ToolValidator;
