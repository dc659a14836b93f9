//! Tool-calling types shared between the provider layer and the tool
//! executor.

use serde::{Deserialize, Serialize};

/// An assembled tool call emitted by a model (provider-agnostic; every
/// adapter converts its wire format to this).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Tool definition exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}
