//! Provider registry — a keyed map of backends.
//!
//! Explicit construction, no singleton: tests build fresh registries with
//! `new()` + `register()`, the binary builds one from config. When no cloud
//! credential is present and no locally-authenticated cloud CLI is found,
//! the registry restricts itself to the local backend.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use roost_config::AppConfig;
use roost_core::{Provider, ProviderKind};
use tracing::{debug, info};

use crate::anthropic::AnthropicProvider;
use crate::ollama::OllamaProvider;
use crate::openai::OpenAiProvider;
use crate::slots::LocalSlots;

/// The set of registered providers for this process.
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn Provider>>,
    local_only: bool,
}

impl ProviderRegistry {
    /// An empty registry. Cloud mode by default.
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            local_only: false,
        }
    }

    /// Register a provider under its kind.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.kind(), provider);
    }

    /// Get a provider by kind.
    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn Provider>> {
        self.providers.get(&kind).cloned()
    }

    /// Whether a provider is registered.
    pub fn contains(&self, kind: ProviderKind) -> bool {
        self.providers.contains_key(&kind)
    }

    /// All registered kinds.
    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.providers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Whether routing is restricted to the local backend.
    pub fn local_only(&self) -> bool {
        self.local_only
    }

    /// Force local-only mode (test support and CLI overrides).
    pub fn set_local_only(&mut self, local_only: bool) {
        self.local_only = local_only;
    }

    /// Build the registry from configuration.
    ///
    /// Honors ENABLED_PROVIDERS; cloud providers additionally need their API
    /// key. With no cloud credential and no authenticated cloud CLI on the
    /// machine, routing is restricted to ollama.
    pub fn from_config(config: &AppConfig, slots: LocalSlots) -> Self {
        let mut registry = Self::new();

        let home = std::env::var("HOME").unwrap_or_default();
        let local_only =
            !config.has_cloud_credentials() && !cloud_cli_evidence(Path::new(&home));
        registry.local_only = local_only;
        if local_only {
            info!("No cloud credentials found, routing restricted to local models");
        }

        for kind in config.enabled_providers() {
            match kind {
                ProviderKind::Anthropic => {
                    if let Some(key) = &config.providers.anthropic_api_key {
                        registry.register(Arc::new(AnthropicProvider::new(key)));
                    } else {
                        debug!("Anthropic enabled but ANTHROPIC_API_KEY missing, skipping");
                    }
                }
                ProviderKind::Openai => {
                    if let Some(key) = &config.providers.openai_api_key {
                        registry.register(Arc::new(OpenAiProvider::new(key)));
                    } else {
                        debug!("OpenAI enabled but OPENAI_API_KEY missing, skipping");
                    }
                }
                ProviderKind::Ollama => {
                    registry.register(Arc::new(OllamaProvider::new(
                        &config.ollama,
                        slots.clone(),
                    )));
                }
            }
        }

        registry
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a cloud CLI has left credentials on this machine.
///
/// Mirrors the local-only heuristic: a developer signed into a cloud CLI can
/// still reach cloud models even without API keys in the environment.
pub fn cloud_cli_evidence(home: &Path) -> bool {
    [
        ".claude/.credentials.json",
        ".claude.json",
        ".codex/auth.json",
    ]
    .iter()
    .any(|rel| home.join(rel).exists())
}
