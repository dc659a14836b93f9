use cg_domain::conversation::ToolOutput;
use cg_domain::error::Result;
use cg_domain::tool::ToolDefinition;

/// One capability the model may invoke.
///
/// Implementations declare a typed parameter schema and an execute
/// function. Failures stay inside the invocation record — a failing
/// tool never aborts sibling calls in the same step.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters.
    fn parameters(&self) -> serde_json::Value;

    async fn execute(&self, args: &serde_json::Value) -> Result<ToolOutput>;

    /// The definition advertised to the model.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Pull a required string argument out of a tool-call payload.
pub(crate) fn required_str<'a>(
    args: &'a serde_json::Value,
    key: &str,
    tool: &str,
) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| cg_domain::error::Error::Tool {
            name: tool.to_string(),
            message: format!("missing required argument '{key}'"),
        })
}
