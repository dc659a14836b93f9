//! Deployment configuration, deserialized from `config.toml`.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::ProviderKind;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(format!("config parse: {e}")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// CORS origin for the web frontend. `None` disables CORS headers.
    #[serde(default)]
    pub cors_allow_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            cors_allow_origin: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider system
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Per-call budget for provider requests. On expiry the call is
    /// classified as a timeout, never retried.
    #[serde(default = "d_20000u")]
    pub default_timeout_ms: u64,
    /// Bounded retries for the conversation persistence write path
    /// (transient errors only). Model calls are never auto-retried.
    #[serde(default = "d_2")]
    pub max_retries: u32,
    /// Per-deployment symmetric key (base64) for the sealed-secret
    /// envelope. Falls back to the `COURSEGATE_ENVELOPE_KEY` env var.
    #[serde(default)]
    pub envelope_key: Option<String>,
    /// Deployment-wide provider entries (data-driven: adding a provider
    /// = adding config).
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,
    /// Per-course overrides keyed by course name. Courses absent here
    /// get the deployment-wide defaults.
    #[serde(default)]
    pub courses: HashMap<String, CourseOverride>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: d_20000u(),
            max_retries: d_2(),
            envelope_key: None,
            providers: Vec::new(),
            courses: HashMap::new(),
        }
    }
}

/// One configured provider. The `api_key` may be plaintext or a sealed
/// `v1:` envelope blob; it is decrypted lazily and never logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub kind: ProviderKind,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Env var to read the key from when `api_key` is absent.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "d_true")]
    pub enabled: bool,
}

/// Per-course provider/model adjustments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourseOverride {
    /// Course-scoped provider entries; override deployment-wide ones of
    /// the same kind.
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,
    /// Per-model enablement tweaks against the built-in catalog.
    #[serde(default)]
    pub models: Vec<ModelOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelOverride {
    pub id: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub default: Option<bool>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools & storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Base URL of the document retrieval collaborator.
    #[serde(default)]
    pub retrieval_base_url: Option<String>,
    /// Token budget passed to retrieval calls.
    #[serde(default = "d_8192")]
    pub retrieval_token_limit: u32,
    /// Base URL of the workflow automation backend.
    #[serde(default)]
    pub workflow_base_url: Option<String>,
    #[serde(default)]
    pub workflow_api_key: Option<String>,
    /// Model id used by the image-description tool. Must resolve to a
    /// vision-capable descriptor.
    #[serde(default)]
    pub vision_model: Option<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            retrieval_base_url: None,
            retrieval_token_limit: d_8192(),
            workflow_base_url: None,
            workflow_api_key: None,
            vision_model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for the JSON-file conversation store.
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    8640
}
fn d_20000u() -> u64 {
    20_000
}
fn d_2() -> u32 {
    2
}
fn d_true() -> bool {
    true
}
fn d_8192() -> u32 {
    8_192
}
fn d_state_path() -> PathBuf {
    PathBuf::from("./data")
}
