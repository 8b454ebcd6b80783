use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::data_stream::DataStream;
use crate::error::{StreamError, StreamErrorCode};
use crate::types::{Message, Tool};

/// Translates one provider's native shapes to and from canonical values.
pub trait ProviderAdapter: Send + Sync {
    type Chunk: DeserializeOwned + 'static;
    type Request: Serialize;

    fn provider(&self) -> &str;

    /// Ingest: native streaming chunks in, canonical events out.
    fn to_canonical<'a, I>(&self, chunks: I) -> DataStream<'a>
    where
        I: IntoIterator<Item = Result<Self::Chunk, StreamError>> + 'a;

    /// Egress: canonical conversation in, native request payload out. Fails as
    /// a whole when any message or tool cannot be expressed natively.
    fn to_native(
        &self,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<Self::Request, StreamError>;
}

pub type JsonChunks<'a> = Box<dyn Iterator<Item = Result<Value, StreamError>> + 'a>;

/// Object-safe, JSON-level view of a [`ProviderAdapter`].
pub trait DynProviderAdapter: Send + Sync {
    fn provider_name(&self) -> &str;
    fn to_canonical_json<'a>(&self, chunks: JsonChunks<'a>) -> DataStream<'a>;
    fn to_native_json(&self, messages: &[Message], tools: &[Tool]) -> Result<Value, StreamError>;
}

impl<A: ProviderAdapter> DynProviderAdapter for A {
    fn provider_name(&self) -> &str {
        self.provider()
    }

    fn to_canonical_json<'a>(&self, chunks: JsonChunks<'a>) -> DataStream<'a> {
        let provider = self.provider().to_string();
        let typed = chunks.map(move |chunk| {
            chunk.and_then(|value| {
                serde_json::from_value::<A::Chunk>(value.clone()).map_err(|error| {
                    StreamError::new(
                        StreamErrorCode::ProviderProtocol,
                        format!("Invalid {provider} chunk: {error}"),
                    )
                    .with_details(json!({ "chunk": value }))
                })
            })
        });
        self.to_canonical(typed)
    }

    fn to_native_json(&self, messages: &[Message], tools: &[Tool]) -> Result<Value, StreamError> {
        let request = self.to_native(messages, tools)?;
        serde_json::to_value(request).map_err(|error| {
            StreamError::new(
                StreamErrorCode::ProviderProtocol,
                format!("Failed to serialize {} request: {error}", self.provider()),
            )
        })
    }
}

pub type AdapterRef = Arc<dyn DynProviderAdapter>;

#[derive(Clone)]
struct RegisteredAdapter {
    adapter: AdapterRef,
    source_id: Option<String>,
}

fn adapter_registry() -> &'static RwLock<HashMap<String, RegisteredAdapter>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, RegisteredAdapter>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

pub fn register_adapter(adapter: AdapterRef, source_id: Option<String>) {
    let mut registry = adapter_registry()
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    registry.insert(
        adapter.provider_name().to_string(),
        RegisteredAdapter { adapter, source_id },
    );
}

pub fn get_adapter(provider: &str) -> Option<AdapterRef> {
    let registry = adapter_registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner);
    registry.get(provider).map(|entry| entry.adapter.clone())
}

pub fn get_adapters() -> Vec<AdapterRef> {
    let registry = adapter_registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner);
    registry
        .values()
        .map(|entry| entry.adapter.clone())
        .collect()
}

pub fn unregister_adapters(source_id: &str) {
    let mut registry = adapter_registry()
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    registry.retain(|_, entry| entry.source_id.as_deref() != Some(source_id));
}

pub fn clear_adapters() {
    let mut registry = adapter_registry()
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    registry.clear();
}
