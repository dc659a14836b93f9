//! Model descriptors and provider identity.
//!
//! Every {provider, model} pair advertises capability flags; the registry
//! and dispatcher consult these instead of branching on provider names.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider identity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The backend family a model belongs to. Adapters register themselves
/// under one of these keys at startup; callers rely on the key set being
/// stable across deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "azure")]
    Azure,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "bedrock")]
    Bedrock,
    #[serde(rename = "gemini")]
    Gemini,
    #[serde(rename = "samba_nova")]
    SambaNova,
    /// Self-hosted vision/LLM server speaking the OpenAI wire format.
    #[serde(rename = "self_hosted")]
    SelfHosted,
    /// In-process model with no network boundary.
    #[serde(rename = "local")]
    Local,
    /// Any other OpenAI-compatible endpoint.
    #[serde(rename = "openai_compat")]
    OpenAiCompat,
}

impl ProviderKind {
    /// Every known provider key, in listing order. `list_enabled`
    /// synthesizes an entry for each of these even when a deployment has
    /// no override stored.
    pub const ALL: [ProviderKind; 9] = [
        ProviderKind::OpenAi,
        ProviderKind::Azure,
        ProviderKind::Anthropic,
        ProviderKind::Bedrock,
        ProviderKind::Gemini,
        ProviderKind::SambaNova,
        ProviderKind::SelfHosted,
        ProviderKind::Local,
        ProviderKind::OpenAiCompat,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Azure => "azure",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Bedrock => "bedrock",
            ProviderKind::Gemini => "gemini",
            ProviderKind::SambaNova => "samba_nova",
            ProviderKind::SelfHosted => "self_hosted",
            ProviderKind::Local => "local",
            ProviderKind::OpenAiCompat => "openai_compat",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model descriptor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One model in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    pub token_limit: u32,
    pub provider: ProviderKind,
    #[serde(default)]
    pub supports_vision: bool,
    #[serde(default)]
    pub supports_tools: bool,
    #[serde(default = "d_true")]
    pub supports_streaming: bool,
    #[serde(default = "d_true")]
    pub supports_temperature: bool,
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub default: bool,
}

fn d_true() -> bool {
    true
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>, provider: ProviderKind, token_limit: u32) -> Self {
        let id = id.into();
        let supports_temperature = accepts_temperature(&id);
        Self {
            display_name: id.clone(),
            id,
            token_limit,
            provider,
            supports_vision: false,
            supports_tools: false,
            supports_streaming: true,
            supports_temperature,
            enabled: true,
            default: false,
        }
    }

    pub fn vision(mut self) -> Self {
        self.supports_vision = true;
        self
    }
    pub fn tools(mut self) -> Self {
        self.supports_tools = true;
        self
    }
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capability probe
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Reasoning-tier model families that reject sampling parameters.
const REASONING_MODEL_PREFIXES: [&str; 4] = ["o1", "o3", "o4", "gpt-5"];

/// Whether a model accepts a `temperature` parameter.
///
/// Pure function of the model identifier — consulted before attaching
/// the parameter, so an unsupported one is never sent even as a no-op.
pub fn accepts_temperature(model_id: &str) -> bool {
    !REASONING_MODEL_PREFIXES
        .iter()
        .any(|p| model_id.starts_with(p))
}
