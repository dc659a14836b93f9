//! Image description tool.
//!
//! Routes an image through the deployment's configured vision model via
//! the normal dispatcher path, so credential, timeout, and error rules
//! apply exactly as they do for chat turns.

use std::sync::Arc;

use cg_domain::conversation::{ContentPart, ImageRef, MessageContent, Role, ToolOutput};
use cg_domain::error::{Error, Result};
use cg_providers::traits::NormalizedMessage;
use cg_providers::Dispatcher;

use crate::traits::{required_str, Tool};

pub const DESCRIBE_IMAGE: &str = "describe_image";

const DEFAULT_INSTRUCTION: &str =
    "Describe the image in enough detail that a reader who cannot see it \
     understands its content.";

pub struct DescribeImageTool {
    dispatcher: Arc<Dispatcher>,
    course_name: String,
    vision_model: String,
}

impl DescribeImageTool {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        course_name: impl Into<String>,
        vision_model: impl Into<String>,
    ) -> Self {
        Self {
            dispatcher,
            course_name: course_name.into(),
            vision_model: vision_model.into(),
        }
    }
}

#[async_trait::async_trait]
impl Tool for DescribeImageTool {
    fn name(&self) -> &str {
        DESCRIBE_IMAGE
    }

    fn description(&self) -> &str {
        "Describe the contents of an image so it can be used as text \
         context for answering a question."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "image_url": {
                    "type": "string",
                    "description": "URL of the image to describe"
                },
                "question": {
                    "type": "string",
                    "description": "Optional question to focus the description on"
                }
            },
            "required": ["image_url"]
        })
    }

    async fn execute(&self, args: &serde_json::Value) -> Result<ToolOutput> {
        let image_url = required_str(args, "image_url", DESCRIBE_IMAGE)?;
        let instruction = args
            .get("question")
            .and_then(|q| q.as_str())
            .filter(|q| !q.is_empty())
            .unwrap_or(DEFAULT_INSTRUCTION);

        let messages = vec![NormalizedMessage::plain(
            Role::User,
            MessageContent::Parts(vec![
                ContentPart::Text {
                    text: instruction.to_string(),
                },
                ContentPart::Image {
                    image_url: ImageRef {
                        url: image_url.to_string(),
                    },
                },
            ]),
        )];

        let doc = self
            .dispatcher
            .complete(&self.course_name, &self.vision_model, messages, vec![], None)
            .await
            .map_err(|e| Error::Tool {
                name: DESCRIBE_IMAGE.into(),
                message: e.to_string(),
            })?;

        if doc.content.is_empty() {
            return Err(Error::Tool {
                name: DESCRIBE_IMAGE.into(),
                message: "vision model returned no description".into(),
            });
        }
        Ok(ToolOutput::Text(doc.content))
    }
}
