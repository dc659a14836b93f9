//! External workflow invocation tool.
//!
//! Proxies a named workflow to the automation backend. Upstream
//! failures surface as the invocation's error — never as an abort of
//! the agent loop or of sibling tool calls — and non-2xx/non-JSON
//! responses are classified through the shared rules (JSON `error`
//! field extraction, explicit "HTML" marker, no raw markup).

use std::sync::Arc;

use cg_domain::conversation::ToolOutput;
use cg_domain::error::{classify_upstream_response, Error, Result};

use crate::traits::{required_str, Tool};

pub const INVOKE_WORKFLOW: &str = "invoke_workflow";

/// Consumed contract of the workflow automation backend.
pub struct WorkflowClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl WorkflowClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout_ms: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Invoke a named workflow and return its JSON result.
    pub async fn invoke(
        &self,
        workflow_name: &str,
        args: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let url = format!("{}/webhook/{workflow_name}", self.base_url);

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(args)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::UpstreamTimeout(format!("workflow {workflow_name}: {e}"))
                } else {
                    Error::Tool {
                        name: INVOKE_WORKFLOW.into(),
                        message: format!("workflow transport: {e}"),
                    }
                }
            })?;

        let status = resp.status();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(classify_upstream_response(status.as_u16(), &content_type, &body));
        }

        serde_json::from_str(&body).map_err(|_| {
            Error::UpstreamMalformed(format!(
                "workflow {workflow_name} returned a non-JSON body"
            ))
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct InvokeWorkflowTool {
    client: Arc<WorkflowClient>,
}

impl InvokeWorkflowTool {
    pub fn new(client: Arc<WorkflowClient>) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Tool for InvokeWorkflowTool {
    fn name(&self) -> &str {
        INVOKE_WORKFLOW
    }

    fn description(&self) -> &str {
        "Run a named automation workflow with the given parameters and \
         return its JSON result."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "workflow_name": {
                    "type": "string",
                    "description": "Name of the workflow to invoke"
                },
                "parameters": {
                    "type": "object",
                    "description": "Arguments passed to the workflow"
                }
            },
            "required": ["workflow_name"]
        })
    }

    async fn execute(&self, args: &serde_json::Value) -> Result<ToolOutput> {
        let workflow_name = required_str(args, "workflow_name", INVOKE_WORKFLOW)?;
        let parameters = args
            .get("parameters")
            .cloned()
            .unwrap_or(serde_json::Value::Object(Default::default()));

        let result = self.client.invoke(workflow_name, &parameters).await?;
        Ok(ToolOutput::Data(result))
    }
}
