use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{StreamError, StreamErrorCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    #[serde(alias = "model")]
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses canonical role names and the provider aliases that map onto them.
impl FromStr for Role {
    type Err = StreamError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "system" | "developer" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" | "model" => Ok(Role::Assistant),
            "tool" | "function" => Ok(Role::Tool),
            other => Err(StreamError::new(
                StreamErrorCode::ProviderProtocol,
                format!("Unknown message role: {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolInvocationState {
    PartialCall,
    Call,
    Result,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub state: ToolInvocationState,
    #[serde(rename = "toolCallId")]
    pub tool_call_id: String,
    #[serde(rename = "toolName")]
    pub tool_name: String,
    pub args: Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    StepStart,
    Text {
        text: String,
    },
    File {
        #[serde(rename = "mimeType")]
        mime_type: String,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    ToolInvocation(ToolInvocation),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn file(mime_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Part::File {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Message {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            content: String::new(),
            parts: Vec::new(),
        }
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        let mut message = Self::new(role);
        message.push_part(Part::text(text));
        message
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    /// Appends a part, keeping `content` equal to the concatenated text parts.
    pub fn push_part(&mut self, part: Part) {
        if let Part::Text { text } = &part {
            self.content.push_str(text);
        }
        self.parts.push(part);
    }

    pub fn with_part(mut self, part: Part) -> Self {
        self.push_part(part);
        self
    }

    /// True when the message carries nothing but text (step markers aside).
    pub fn is_text_only(&self) -> bool {
        self.parts
            .iter()
            .all(|part| matches!(part, Part::StepStart | Part::Text { .. }))
    }

    pub fn tool_invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.parts.iter().filter_map(|part| match part {
            Part::ToolInvocation(invocation) => Some(invocation),
            _ => None,
        })
    }

    pub fn tool_invocation(&self, tool_call_id: &str) -> Option<&ToolInvocation> {
        self.tool_invocations()
            .find(|invocation| invocation.tool_call_id == tool_call_id)
    }

    pub fn tool_invocation_mut(&mut self, tool_call_id: &str) -> Option<&mut ToolInvocation> {
        self.parts.iter_mut().find_map(|part| match part {
            Part::ToolInvocation(invocation) if invocation.tool_call_id == tool_call_id => {
                Some(invocation)
            }
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(rename = "toolCallId")]
    pub tool_call_id: String,
    #[serde(rename = "toolName")]
    pub tool_name: String,
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ToolKind {
    #[default]
    Function,
    /// A tool the provider implements itself, e.g. `google_search`.
    ProviderDefined { id: String },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolSchema {
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default)]
    pub required: BTreeSet<String>,
}

impl ToolSchema {
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.required.is_empty()
    }

    pub fn to_json_schema(&self) -> Value {
        let properties = self
            .properties
            .iter()
            .map(|(name, fragment)| (name.clone(), fragment.clone()))
            .collect::<Map<String, Value>>();
        let mut schema = json!({
            "type": "object",
            "properties": properties,
        });
        if !self.required.is_empty() {
            schema["required"] = json!(self.required);
        }
        schema
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub kind: ToolKind,
    #[serde(default)]
    pub schema: ToolSchema,
}

impl Tool {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: ToolSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: ToolKind::Function,
            schema,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(rename = "promptTokens")]
    pub prompt_tokens: u64,
    #[serde(rename = "completionTokens")]
    pub completion_tokens: u64,
}

impl Usage {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DataStreamPart {
    TextDelta {
        text: String,
    },
    ToolCallDelta {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName", skip_serializing_if = "Option::is_none", default)]
        tool_name: Option<String>,
        #[serde(
            rename = "argsFragment",
            skip_serializing_if = "Option::is_none",
            default
        )]
        args_fragment: Option<String>,
    },
    ToolCall(ToolCall),
    ToolResult {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        result: Value,
    },
    File {
        #[serde(rename = "mimeType")]
        mime_type: String,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    FinishStep {
        reason: FinishReason,
        continued: bool,
        #[serde(default)]
        usage: Usage,
    },
    FinishMessage {
        reason: FinishReason,
        #[serde(default)]
        usage: Usage,
    },
    Error {
        cause: StreamError,
    },
}

impl DataStreamPart {
    pub fn text(text: impl Into<String>) -> Self {
        DataStreamPart::TextDelta { text: text.into() }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, DataStreamPart::Error { .. })
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parsing_normalizes_provider_aliases() {
        assert_eq!("model".parse::<Role>().expect("model role"), Role::Assistant);
        assert_eq!("developer".parse::<Role>().expect("developer role"), Role::System);
        assert!("narrator".parse::<Role>().is_err());

        let role: Role = serde_json::from_value(json!("model")).expect("deserialize alias");
        assert_eq!(role, Role::Assistant);
    }

    #[test]
    fn data_stream_parts_carry_stable_type_tags() {
        let parts = vec![
            DataStreamPart::text("hi"),
            DataStreamPart::ToolCallDelta {
                tool_call_id: "call_1".to_string(),
                tool_name: Some("get_weather".to_string()),
                args_fragment: None,
            },
            DataStreamPart::FinishStep {
                reason: FinishReason::ToolCalls,
                continued: false,
                usage: Usage::default(),
            },
            DataStreamPart::FinishMessage {
                reason: FinishReason::ContentFilter,
                usage: Usage::default(),
            },
        ];
        let tags = parts
            .iter()
            .map(|part| serde_json::to_value(part).expect("serialize part")["type"].clone())
            .collect::<Vec<_>>();
        assert_eq!(
            tags,
            vec![
                json!("text-delta"),
                json!("tool-call-delta"),
                json!("finish-step"),
                json!("finish-message"),
            ]
        );

        let finish = serde_json::to_value(&parts[3]).expect("serialize finish");
        assert_eq!(finish["reason"], json!("content-filter"));
    }

    #[test]
    fn file_data_serializes_as_base64() {
        let part = Part::file("image/png", vec![0x89, 0x50, 0x4e, 0x47]);
        let value = serde_json::to_value(&part).expect("serialize file part");
        assert_eq!(
            value,
            json!({ "type": "file", "mimeType": "image/png", "data": "iVBORw==" })
        );
        let decoded: Part = serde_json::from_value(value).expect("deserialize file part");
        assert_eq!(decoded, part);
    }

    #[test]
    fn push_part_keeps_content_equal_to_text_parts() {
        let message = Message::new(Role::Assistant)
            .with_part(Part::StepStart)
            .with_part(Part::text("Hello, "))
            .with_part(Part::file("text/plain", b"ignored".to_vec()))
            .with_part(Part::text("world"));
        assert_eq!(message.content, "Hello, world");
        assert!(!message.is_text_only());
        assert!(Message::user("hi").is_text_only());
    }

    #[test]
    fn tool_schema_renders_object_schema() {
        let schema = ToolSchema {
            properties: BTreeMap::from([(
                "location".to_string(),
                json!({ "type": "string" }),
            )]),
            required: BTreeSet::from(["location".to_string()]),
        };
        assert_eq!(
            schema.to_json_schema(),
            json!({
                "type": "object",
                "properties": { "location": { "type": "string" } },
                "required": ["location"],
            })
        );
        assert_eq!(
            ToolSchema::default().to_json_schema(),
            json!({ "type": "object", "properties": {} })
        );
    }
}
