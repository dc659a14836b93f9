//! Tool registry and executor.
//!
//! Enumerates the tools available to one request, builds their
//! definitions for the model, and executes named calls. Every failure is
//! folded into the returned [`ToolInvocation`] — one failing tool must
//! not fail sibling tool calls in the same step.

use std::collections::HashMap;
use std::sync::Arc;

use cg_domain::conversation::ToolInvocation;
use cg_domain::tool::{ToolCall, ToolDefinition};

use crate::traits::Tool;

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Definitions advertised to the model, sorted by name for a stable
    /// wire order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute one named call and return its invocation record.
    ///
    /// Calls without a correlation id are inert: they are returned
    /// unexecuted and every consumer skips them. Unknown tools and
    /// execution failures land in the record's `error` field.
    pub async fn execute(&self, call: &ToolCall) -> ToolInvocation {
        let mut invocation = ToolInvocation {
            invocation_id: call.call_id.clone(),
            name: call.tool_name.clone(),
            argument_values: call
                .arguments
                .as_object()
                .cloned()
                .unwrap_or_default(),
            output: None,
            error: None,
        };

        if invocation.is_inert() {
            tracing::warn!(tool = %call.tool_name, "tool call without invocation id ignored");
            return invocation;
        }

        let Some(tool) = self.get(&call.tool_name) else {
            invocation.error = Some(format!("unknown tool: {}", call.tool_name));
            return invocation;
        };

        tracing::debug!(tool = %call.tool_name, call_id = %call.call_id, "executing tool");

        match tool.execute(&call.arguments).await {
            Ok(output) => invocation.output = Some(output),
            Err(e) => {
                tracing::warn!(tool = %call.tool_name, error = %e, "tool execution failed");
                invocation.error = Some(e.to_string());
            }
        }

        invocation
    }
}
