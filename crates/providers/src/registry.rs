//! Model registry.
//!
//! Maps model identifiers to the owning provider adapter and descriptor.
//! Adapters implement the common [`ModelAdapter`] interface and register
//! themselves under their provider key at startup — dispatch is a map
//! lookup, not a branch cascade.
//!
//! The catalog is read-mostly: lookups clone an `Arc` snapshot, and
//! configuration updates replace the snapshot atomically instead of
//! mutating in place while readers may be iterating.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use cg_domain::config::{Config, ModelOverride};
use cg_domain::error::{Error, Result};
use cg_domain::model::{ModelDescriptor, ProviderKind};

use crate::traits::ModelAdapter;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ModelRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Holds the registered adapters and the model catalog.
pub struct ModelRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ModelAdapter>>,
    catalog: RwLock<Arc<Vec<ModelDescriptor>>>,
    config: Arc<Config>,
}

impl ModelRegistry {
    /// Create a registry over the built-in catalog with no adapters
    /// registered yet.
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            adapters: HashMap::new(),
            catalog: RwLock::new(Arc::new(built_in_catalog())),
            config,
        }
    }

    /// Register an adapter under its provider key. Later registrations
    /// replace earlier ones of the same kind.
    pub fn register(&mut self, adapter: Arc<dyn ModelAdapter>) {
        let kind = adapter.kind();
        tracing::info!(provider = %kind, "registered model adapter");
        self.adapters.insert(kind, adapter);
    }

    /// Look up an adapter by provider key.
    pub fn adapter(&self, kind: ProviderKind) -> Option<Arc<dyn ModelAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    /// Number of registered adapters.
    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    /// Atomically replace the catalog (configuration update). Readers
    /// holding the previous snapshot are unaffected.
    pub fn replace_catalog(&self, catalog: Vec<ModelDescriptor>) {
        *self.catalog.write() = Arc::new(catalog);
    }

    fn snapshot(&self) -> Arc<Vec<ModelDescriptor>> {
        self.catalog.read().clone()
    }

    /// Resolve a model id to its adapter and effective descriptor for a
    /// course. Fails with `UnknownModel` when no enabled descriptor
    /// matches or the owning adapter is not registered.
    pub fn resolve(
        &self,
        course_name: &str,
        model_id: &str,
    ) -> Result<(Arc<dyn ModelAdapter>, ModelDescriptor)> {
        let catalog = self.snapshot();
        let overrides = self.course_model_overrides(course_name);

        let descriptor = catalog
            .iter()
            .find(|d| d.id == model_id)
            .map(|d| apply_override(d.clone(), overrides.get(model_id).copied()))
            .filter(|d| d.enabled)
            .ok_or_else(|| Error::UnknownModel(model_id.to_string()))?;

        let adapter = self.adapter(descriptor.provider).ok_or_else(|| {
            tracing::warn!(
                model = %model_id,
                provider = %descriptor.provider,
                "model resolves to an unregistered provider"
            );
            Error::UnknownModel(model_id.to_string())
        })?;

        Ok((adapter, descriptor))
    }

    /// List the enabled models for a course, grouped by provider.
    ///
    /// Every known provider key appears in the result — providers with
    /// no configuration for this deployment are present with an empty
    /// model list, never omitted (callers rely on a stable key set).
    pub fn list_enabled(
        &self,
        course_name: &str,
    ) -> BTreeMap<ProviderKind, Vec<ModelDescriptor>> {
        let catalog = self.snapshot();
        let overrides = self.course_model_overrides(course_name);

        let mut listing: BTreeMap<ProviderKind, Vec<ModelDescriptor>> = ProviderKind::ALL
            .iter()
            .map(|k| (*k, Vec::new()))
            .collect();

        for descriptor in catalog.iter() {
            if !self.provider_configured(course_name, descriptor.provider) {
                continue;
            }
            let effective = apply_override(
                descriptor.clone(),
                overrides.get(descriptor.id.as_str()).copied(),
            );
            if effective.enabled {
                listing
                    .entry(effective.provider)
                    .or_default()
                    .push(effective);
            }
        }

        listing
    }

    /// Whether a provider has an enabled config entry visible to this
    /// course (course-scoped entries shadow deployment-wide ones).
    fn provider_configured(&self, course_name: &str, kind: ProviderKind) -> bool {
        if let Some(course) = self.config.llm.courses.get(course_name) {
            if let Some(entry) = course.providers.iter().find(|p| p.kind == kind) {
                return entry.enabled;
            }
        }
        self.config
            .llm
            .providers
            .iter()
            .find(|p| p.kind == kind)
            .map(|p| p.enabled)
            .unwrap_or(false)
    }

    fn course_model_overrides(&self, course_name: &str) -> HashMap<&str, &ModelOverride> {
        self.config
            .llm
            .courses
            .get(course_name)
            .map(|c| {
                c.models
                    .iter()
                    .map(|m| (m.id.as_str(), m))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn apply_override(mut descriptor: ModelDescriptor, ov: Option<&ModelOverride>) -> ModelDescriptor {
    if let Some(ov) = ov {
        if let Some(enabled) = ov.enabled {
            descriptor.enabled = enabled;
        }
        if let Some(default) = ov.default {
            descriptor.default = default;
        }
    }
    descriptor
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Built-in catalog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The static model catalog merged with per-course overrides at lookup
/// time. Token limits are the providers' published context windows.
pub fn built_in_catalog() -> Vec<ModelDescriptor> {
    use ProviderKind::*;
    let mut catalog = vec![
        // OpenAI
        ModelDescriptor::new("gpt-4o-mini", OpenAi, 128_000)
            .named("GPT-4o mini")
            .vision()
            .tools(),
        ModelDescriptor::new("gpt-4o", OpenAi, 128_000)
            .named("GPT-4o")
            .vision()
            .tools(),
        ModelDescriptor::new("gpt-4.1", OpenAi, 1_047_576)
            .named("GPT-4.1")
            .vision()
            .tools(),
        ModelDescriptor::new("o3-mini", OpenAi, 200_000)
            .named("o3-mini")
            .tools(),
        // Azure deployments (distinct ids; the deployment name rides in
        // the request URL)
        ModelDescriptor::new("azure/gpt-4o", Azure, 128_000)
            .named("GPT-4o (Azure)")
            .vision()
            .tools(),
        ModelDescriptor::new("azure/gpt-4o-mini", Azure, 128_000)
            .named("GPT-4o mini (Azure)")
            .vision()
            .tools(),
        // Anthropic
        ModelDescriptor::new("claude-sonnet-4-20250514", Anthropic, 200_000)
            .named("Claude Sonnet 4")
            .vision()
            .tools(),
        ModelDescriptor::new("claude-3-5-haiku-20241022", Anthropic, 200_000)
            .named("Claude 3.5 Haiku")
            .tools(),
        // Bedrock
        ModelDescriptor::new("anthropic.claude-3-5-sonnet-20241022-v2:0", Bedrock, 200_000)
            .named("Claude 3.5 Sonnet (Bedrock)")
            .vision()
            .tools(),
        ModelDescriptor::new("meta.llama3-1-70b-instruct-v1:0", Bedrock, 128_000)
            .named("Llama 3.1 70B (Bedrock)"),
        // Gemini
        ModelDescriptor::new("gemini-2.0-flash", Gemini, 1_048_576)
            .named("Gemini 2.0 Flash")
            .vision()
            .tools(),
        ModelDescriptor::new("gemini-1.5-pro", Gemini, 2_097_152)
            .named("Gemini 1.5 Pro")
            .vision()
            .tools(),
        // SambaNova
        ModelDescriptor::new("Meta-Llama-3.1-70B-Instruct", SambaNova, 128_000)
            .named("Llama 3.1 70B (SambaNova)")
            .tools(),
        ModelDescriptor::new("Llama-3.2-11B-Vision-Instruct", SambaNova, 128_000)
            .named("Llama 3.2 11B Vision (SambaNova)")
            .vision(),
        // Self-hosted vision/LLM server
        ModelDescriptor::new("llava-v1.6-vicuna-13b", SelfHosted, 4_096)
            .named("LLaVA 1.6 13B")
            .vision(),
        ModelDescriptor::new("qwen2.5-14b-instruct", SelfHosted, 32_768)
            .named("Qwen 2.5 14B")
            .tools(),
        // In-process local model
        ModelDescriptor::new("Llama-3.2-1B-Instruct", Local, 8_192)
            .named("Llama 3.2 1B (local)"),
    ];

    if let Some(first) = catalog.first_mut() {
        first.default = true;
    }
    catalog
}
