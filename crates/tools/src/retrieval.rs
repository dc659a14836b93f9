//! Document retrieval tool.
//!
//! Calls the external search collaborator and wraps its results as
//! `{"contexts": [...]}` for the model. The collaborator is an opaque
//! network call; its timeout/error surface folds into the invocation's
//! error field.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use cg_domain::conversation::ToolOutput;
use cg_domain::error::{classify_upstream_response, Error, Result};

use crate::traits::{required_str, Tool};

pub const RETRIEVE_DOCUMENTS: &str = "retrieve_documents";

/// One retrieved passage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentContext {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Consumed contract of the document retrieval service.
#[async_trait::async_trait]
pub trait DocumentRetriever: Send + Sync {
    async fn retrieve(
        &self,
        course: &str,
        query: &str,
        token_limit: u32,
        doc_groups: &[String],
        conversation_id: Option<&str>,
    ) -> Result<Vec<DocumentContext>>;
}

/// HTTP implementation against the retrieval collaborator.
pub struct HttpDocumentRetriever {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDocumentRetriever {
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl DocumentRetriever for HttpDocumentRetriever {
    async fn retrieve(
        &self,
        course: &str,
        query: &str,
        token_limit: u32,
        doc_groups: &[String],
        conversation_id: Option<&str>,
    ) -> Result<Vec<DocumentContext>> {
        let url = format!("{}/retrieve", self.base_url);
        let body = serde_json::json!({
            "course_name": course,
            "search_query": query,
            "token_limit": token_limit,
            "doc_groups": doc_groups,
            "conversation_id": conversation_id,
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::UpstreamTimeout(format!("retrieval: {e}"))
                } else {
                    Error::Tool {
                        name: RETRIEVE_DOCUMENTS.into(),
                        message: format!("retrieval transport: {e}"),
                    }
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_upstream_response(status.as_u16(), &content_type, &body));
        }

        resp.json::<Vec<DocumentContext>>().await.map_err(|e| Error::Tool {
            name: RETRIEVE_DOCUMENTS.into(),
            message: format!("retrieval returned an unexpected shape: {e}"),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The per-request retrieval tool. Course scope and document-group
/// filters are fixed at construction from the inbound request.
pub struct RetrieveDocumentsTool {
    retriever: Arc<dyn DocumentRetriever>,
    course_name: String,
    token_limit: u32,
    doc_groups: Vec<String>,
    conversation_id: Option<String>,
}

impl RetrieveDocumentsTool {
    pub fn new(
        retriever: Arc<dyn DocumentRetriever>,
        course_name: impl Into<String>,
        token_limit: u32,
        doc_groups: Vec<String>,
        conversation_id: Option<String>,
    ) -> Self {
        Self {
            retriever,
            course_name: course_name.into(),
            token_limit,
            doc_groups,
            conversation_id,
        }
    }
}

#[async_trait::async_trait]
impl Tool for RetrieveDocumentsTool {
    fn name(&self) -> &str {
        RETRIEVE_DOCUMENTS
    }

    fn description(&self) -> &str {
        "Search the course materials for passages relevant to a query. \
         Returns the matching contexts with their source metadata."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query over the course materials"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: &serde_json::Value) -> Result<ToolOutput> {
        let query = required_str(args, "query", RETRIEVE_DOCUMENTS)?;
        let contexts = self
            .retriever
            .retrieve(
                &self.course_name,
                query,
                self.token_limit,
                &self.doc_groups,
                self.conversation_id.as_deref(),
            )
            .await?;

        tracing::debug!(
            course = %self.course_name,
            results = contexts.len(),
            "retrieval complete"
        );

        Ok(ToolOutput::Data(serde_json::json!({ "contexts": contexts })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticRetriever(Vec<DocumentContext>);

    #[async_trait::async_trait]
    impl DocumentRetriever for StaticRetriever {
        async fn retrieve(
            &self,
            _course: &str,
            _query: &str,
            _token_limit: u32,
            _doc_groups: &[String],
            _conversation_id: Option<&str>,
        ) -> Result<Vec<DocumentContext>> {
            Ok(self.0.clone())
        }
    }

    fn tool() -> RetrieveDocumentsTool {
        RetrieveDocumentsTool::new(
            Arc::new(StaticRetriever(vec![DocumentContext {
                id: "doc-1".into(),
                text: "SVD factors a matrix".into(),
                metadata: serde_json::json!({"page": 12}),
            }])),
            "CS101",
            8_192,
            vec!["lectures".into()],
            Some("c1".into()),
        )
    }

    #[tokio::test]
    async fn wraps_results_as_contexts() {
        let output = tool()
            .execute(&serde_json::json!({"query": "svd"}))
            .await
            .unwrap();
        match output {
            ToolOutput::Data(v) => {
                assert_eq!(v["contexts"][0]["id"], "doc-1");
                assert_eq!(v["contexts"][0]["metadata"]["page"], 12);
            }
            other => panic!("expected data output, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_query_is_a_tool_error() {
        let err = tool().execute(&serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Tool { .. }));
        assert!(err.to_string().contains("query"));
    }
}
