//! Tool definitions attached to assistant runs.

use serde::{Deserialize, Serialize};

/// The only function the orchestrator knows how to carry out.
pub const SAVE_VALUE: &str = "save_value";

/// Longest value name the store accepts.
pub const MAX_VALUE_NAME_CHARS: usize = 100;

/// Tool definition as the assistants API expects it.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolDefinition {
    Function { function: FunctionDefinition },
    FileSearch,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Arguments of a `save_value` call. Both keys are required.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SaveValueArgs {
    pub name: String,
    pub description: String,
}

impl SaveValueArgs {
    /// Trimmed name, if it is non-empty and fits the store column.
    pub fn checked_name(&self) -> Option<&str> {
        let name = self.name.trim();
        if name.is_empty() || name.chars().count() > MAX_VALUE_NAME_CHARS {
            None
        } else {
            Some(name)
        }
    }
}

pub fn save_value_tool() -> ToolDefinition {
    ToolDefinition::Function {
        function: FunctionDefinition {
            name: SAVE_VALUE.to_string(),
            description: "Save identified user value to database".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "description": "Short name of the value (1-3 words)"
                    },
                    "description": {
                        "type": "string",
                        "description": "Brief explanation of the value (max 100 chars)"
                    }
                },
                "required": ["name", "description"]
            }),
        },
    }
}

/// Tools for the value-identification flow.
///
/// With a knowledge store configured, runs override the assistant's tools, so
/// `file_search` has to be repeated here to stay available.
pub fn value_tools(with_file_search: bool) -> Vec<ToolDefinition> {
    let mut tools = vec![save_value_tool()];
    if with_file_search {
        tools.push(ToolDefinition::FileSearch);
    }
    tools
}
