use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

use jsonschema::JSONSchema;
use serde_json::json;

use crate::error::{StreamError, StreamErrorCode};
use crate::types::{Tool, ToolCall, ToolKind};

/// Checks completed tool calls against the JSON schemas of the declared
/// function tools.
///
/// Schemas are compiled once in [`ToolValidator::new`]; provider-defined tools
/// carry no schema and accept any arguments.
pub struct ToolValidator {
    schemas: HashMap<String, Option<JSONSchema>>,
}

impl Debug for ToolValidator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut names = self.schemas.keys().collect::<Vec<_>>();
        names.sort();
        f.debug_struct("ToolValidator").field("tools", &names).finish()
    }
}

impl ToolValidator {
    pub fn new(tools: &[Tool]) -> Result<Self, StreamError> {
        let mut schemas = HashMap::with_capacity(tools.len());
        for tool in tools {
            let compiled = match tool.kind {
                ToolKind::Function => Some(compile_schema(tool)?),
                ToolKind::ProviderDefined { .. } => None,
            };
            schemas.insert(tool.name.clone(), compiled);
        }
        Ok(Self { schemas })
    }

    pub fn validate(&self, call: &ToolCall) -> Result<(), StreamError> {
        let Some(schema) = self.schemas.get(&call.tool_name) else {
            let mut available = self.schemas.keys().cloned().collect::<Vec<_>>();
            available.sort();
            return Err(StreamError::new(
                StreamErrorCode::ToolNotFound,
                format!("Tool '{}' not found", call.tool_name),
            )
            .with_details(json!({
                "toolCallId": call.tool_call_id,
                "toolName": call.tool_name,
                "availableTools": available,
            })));
        };
        let Some(schema) = schema else {
            return Ok(());
        };

        let violations = match schema.validate(&call.args) {
            Ok(()) => return Ok(()),
            Err(errors) => errors
                .map(|error| {
                    json!({
                        "path": error.instance_path.to_string(),
                        "message": error.to_string(),
                    })
                })
                .collect::<Vec<_>>(),
        };
        Err(StreamError::new(
            StreamErrorCode::ToolArgumentsInvalid,
            format!("Arguments for tool '{}' do not match its schema", call.tool_name),
        )
        .with_details(json!({
            "toolCallId": call.tool_call_id,
            "toolName": call.tool_name,
            "args": call.args,
            "validationErrors": violations,
        })))
    }
}

fn compile_schema(tool: &Tool) -> Result<JSONSchema, StreamError> {
    JSONSchema::compile(&tool.schema.to_json_schema()).map_err(|error| {
        StreamError::new(
            StreamErrorCode::SchemaInvalid,
            format!("Tool '{}' has an invalid schema: {error}", tool.name),
        )
        .with_details(json!({ "toolName": tool.name }))
    })
}
