use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON-encoded argument object as returned by the provider.
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub def_type: String,
    pub function: FunctionDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The oracle's answer for one iteration: at most one selected tool, plus
/// whatever free-form reasoning accompanied it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Synthesized when the provider returned none.
    pub tool_call_id: String,
    /// Empty when the response carried no tool call at all.
    pub tool_name: String,
    pub raw_arguments: serde_json::Value,
    pub reasoning: String,
    pub content: String,
}

impl Decision {
    pub fn has_tool_call(&self) -> bool {
        !self.tool_name.is_empty()
    }
}
