use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamErrorCode {
    Transport,
    ProviderProtocol,
    ProviderReported,
    ProtocolViolation,
    UnsupportedTool,
    UnsupportedContent,
    ToolExecutionFailed,
    ToolNotFound,
    ToolArgumentsInvalid,
    SchemaInvalid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{code:?}: {message}")]
pub struct StreamError {
    pub code: StreamErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl StreamError {
    pub fn new(code: StreamErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(StreamErrorCode::Transport, message)
    }

    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::new(StreamErrorCode::ProtocolViolation, message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_snake_case_codes_and_skips_empty_details() {
        let error = StreamError::new(StreamErrorCode::UnsupportedTool, "unsupported tool kind");
        assert_eq!(
            serde_json::to_value(&error).expect("serialize"),
            json!({ "code": "unsupported_tool", "message": "unsupported tool kind" })
        );
    }

    #[test]
    fn display_includes_code_and_message() {
        let error = StreamError::transport("connection reset")
            .with_details(json!({ "attempt": 1 }));
        assert_eq!(error.to_string(), "Transport: connection reset");
        assert_eq!(error.details, Some(json!({ "attempt": 1 })));
    }
}
