//! Model router — picks the cheapest capable model for a prompt.
//!
//! Candidates come from the static catalog, filtered by registration,
//! provider health, the complexity tier floor, capability flags, and any
//! caller price cap. Survivors are ordered by output price and the head
//! wins. When nothing survives, the globally cheapest registered model is
//! used and a warning logged rather than failing the request.

use std::sync::Arc;

use roost_core::ProviderKind;
use roost_telemetry::pricing::{self, ModelEntry};
use tracing::{debug, warn};

use crate::complexity::{ComplexityEstimate, ComplexityLevel, estimate_complexity};
use crate::fallback::ChainName;
use crate::health::HealthTracker;
use crate::registry::ProviderRegistry;

/// Caller preferences for a single selection.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    /// Only models that can drive subagents.
    pub require_subagents: bool,
    /// Only models with web-search support.
    pub require_web_search: bool,
    /// Upper bound on output price per million tokens.
    pub max_output_price: Option<f64>,
    /// Prefer this provider when it has at least one viable candidate.
    pub preferred_provider: Option<ProviderKind>,
    /// In local-only mode, ask for the cloud chain anyway.
    pub prefer_cloud: bool,
}

/// A routing decision.
#[derive(Debug, Clone)]
pub struct SelectedModel {
    pub entry: &'static ModelEntry,
    pub estimate: ComplexityEstimate,
}

/// Routes prompts to models using the catalog, registry, and health state.
pub struct ModelRouter {
    registry: Arc<ProviderRegistry>,
    health: Arc<HealthTracker>,
}

impl ModelRouter {
    pub fn new(registry: Arc<ProviderRegistry>, health: Arc<HealthTracker>) -> Self {
        Self { registry, health }
    }

    /// Pick a model for `prompt`.
    ///
    /// Returns None only when the registry is empty.
    pub fn select_model(&self, prompt: &str, options: &RouteOptions) -> Option<SelectedModel> {
        let estimate = estimate_complexity(prompt);
        let floor = estimate.level.tier_floor();
        let signals = &estimate.signals;

        let mut candidates: Vec<&'static ModelEntry> = pricing::catalog()
            .iter()
            .filter(|m| {
                self.registry.contains(m.provider)
                    && self.health.is_available(m.provider)
                    && m.tier <= floor
                    && (!signals.requires_tools || m.supports_tools)
                    && (!signals.requires_thinking || m.supports_thinking)
                    && (!options.require_subagents || m.supports_subagents)
                    && (!options.require_web_search || m.supports_web_search)
                    && options.max_output_price.is_none_or(|cap| m.output_per_m <= cap)
                    && (!self.registry.local_only() || m.provider == ProviderKind::Ollama)
            })
            .collect();

        if let Some(preferred) = options.preferred_provider {
            let preferred_only: Vec<_> = candidates
                .iter()
                .copied()
                .filter(|m| m.provider == preferred)
                .collect();
            if !preferred_only.is_empty() {
                candidates = preferred_only;
            }
        }

        let chosen = candidates.into_iter().min_by(|a, b| {
            a.output_per_m
                .partial_cmp(&b.output_per_m)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let entry = match chosen {
            Some(entry) => {
                debug!(
                    model = entry.id,
                    provider = %entry.provider,
                    level = %estimate.level,
                    "Model selected"
                );
                entry
            }
            None => {
                let fallback = pricing::cheapest(|m| {
                    self.registry.contains(m.provider)
                        && (!self.registry.local_only() || m.provider == ProviderKind::Ollama)
                })?;
                warn!(
                    level = %estimate.level,
                    fallback = fallback.id,
                    "No model satisfies the selection filters, using cheapest registered model"
                );
                fallback
            }
        };

        Some(SelectedModel { entry, estimate })
    }

    /// The fallback chain appropriate for a complexity level.
    pub fn chain_for_complexity(
        &self,
        level: ComplexityLevel,
        options: &RouteOptions,
    ) -> ChainName {
        if self.registry.local_only() {
            return if options.prefer_cloud {
                ChainName::Cloud
            } else {
                ChainName::Local
            };
        }
        match level {
            ComplexityLevel::Expert => ChainName::HighCapability,
            ComplexityLevel::Complex => ChainName::Balanced,
            ComplexityLevel::Simple | ComplexityLevel::Moderate => ChainName::CostOptimized,
        }
    }
}
