//! Shared application state passed to all API handlers.

use std::sync::Arc;

use cg_conversations::{ConversationLockMap, ConversationStore, JsonFileStore};
use cg_domain::config::Config;
use cg_domain::error::Result;
use cg_domain::model::ProviderKind;
use cg_providers::anthropic::AnthropicAdapter;
use cg_providers::bedrock::BedrockAdapter;
use cg_providers::credentials::ConfigCredentialStore;
use cg_providers::gemini::GeminiAdapter;
use cg_providers::local::LocalAdapter;
use cg_providers::openai_compat::OpenAiCompatAdapter;
use cg_providers::{Dispatcher, ModelRegistry};
use cg_tools::retrieval::{DocumentRetriever, HttpDocumentRetriever, RetrieveDocumentsTool};
use cg_tools::vision::DescribeImageTool;
use cg_tools::workflow::{InvokeWorkflowTool, WorkflowClient};
use cg_tools::ToolRegistry;

use crate::runtime::CancelMap;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub dispatcher: Arc<Dispatcher>,
    pub store: Arc<dyn ConversationStore>,
    pub conversation_locks: Arc<ConversationLockMap>,
    pub cancel_map: Arc<CancelMap>,
    pub retriever: Option<Arc<dyn DocumentRetriever>>,
    pub workflow: Option<Arc<WorkflowClient>>,
}

impl AppState {
    /// Wire up the full application: every adapter registered under its
    /// provider key, credential store, dispatcher, persistence, and the
    /// tool collaborators the deployment configures.
    pub fn build(config: Arc<Config>) -> Result<Self> {
        let timeout_ms = config.llm.default_timeout_ms;

        let mut registry = ModelRegistry::new(config.clone());
        for kind in [
            ProviderKind::OpenAi,
            ProviderKind::Azure,
            ProviderKind::SambaNova,
            ProviderKind::SelfHosted,
            ProviderKind::OpenAiCompat,
        ] {
            registry.register(Arc::new(OpenAiCompatAdapter::new(kind, timeout_ms)?));
        }
        registry.register(Arc::new(AnthropicAdapter::new(timeout_ms)?));
        registry.register(Arc::new(GeminiAdapter::new(timeout_ms)?));
        registry.register(Arc::new(BedrockAdapter::new(timeout_ms)?));
        registry.register(Arc::new(LocalAdapter::new()));

        let credentials = Arc::new(ConfigCredentialStore::new(config.clone())?);
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(registry), credentials));

        let store: Arc<dyn ConversationStore> =
            Arc::new(JsonFileStore::new(&config.storage.state_path)?);

        let retriever: Option<Arc<dyn DocumentRetriever>> = config
            .tools
            .retrieval_base_url
            .as_ref()
            .map(|url| HttpDocumentRetriever::new(url.clone(), timeout_ms))
            .transpose()?
            .map(|r| Arc::new(r) as Arc<dyn DocumentRetriever>);

        let workflow = match (&config.tools.workflow_base_url, &config.tools.workflow_api_key) {
            (Some(url), Some(key)) => Some(Arc::new(WorkflowClient::new(
                url.clone(),
                key.clone(),
                timeout_ms,
            )?)),
            _ => None,
        };

        Ok(Self {
            config,
            dispatcher,
            store,
            conversation_locks: Arc::new(ConversationLockMap::new()),
            cancel_map: Arc::new(CancelMap::new()),
            retriever,
            workflow,
        })
    }

    /// Assemble the tool registry for one request.
    ///
    /// Tools appear only when their collaborator is configured; the
    /// request's `enabledTools` filter (None = all) narrows further.
    pub fn tools_for_request(
        &self,
        course_name: &str,
        conversation_id: &str,
        enabled_tools: Option<&[String]>,
        doc_groups: &[String],
    ) -> ToolRegistry {
        let allowed = |name: &str| {
            enabled_tools
                .map(|list| list.iter().any(|t| t == name))
                .unwrap_or(true)
        };

        let mut registry = ToolRegistry::new();

        if let Some(retriever) = &self.retriever {
            if allowed(cg_tools::retrieval::RETRIEVE_DOCUMENTS) {
                registry.register(Arc::new(RetrieveDocumentsTool::new(
                    retriever.clone(),
                    course_name,
                    self.config.tools.retrieval_token_limit,
                    doc_groups.to_vec(),
                    Some(conversation_id.to_string()),
                )));
            }
        }

        if let Some(vision_model) = &self.config.tools.vision_model {
            if allowed(cg_tools::vision::DESCRIBE_IMAGE) {
                registry.register(Arc::new(DescribeImageTool::new(
                    self.dispatcher.clone(),
                    course_name,
                    vision_model.clone(),
                )));
            }
        }

        if let Some(workflow) = &self.workflow {
            if allowed(cg_tools::workflow::INVOKE_WORKFLOW) {
                registry.register(Arc::new(InvokeWorkflowTool::new(workflow.clone())));
            }
        }

        registry
    }
}
