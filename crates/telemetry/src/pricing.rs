//! Built-in model catalog.
//!
//! Prices are in USD per 1 million tokens. Capability tier runs 1..=4 with
//! 1 strongest; the router never picks a weaker tier than the task's floor.
//! Local models are free and flagged `cloud: false`.

use roost_core::ProviderKind;
use serde::Serialize;

/// One row of the model catalog.
#[derive(Debug, Clone, Serialize)]
pub struct ModelEntry {
    /// Unique model identifier as sent to the provider.
    pub id: &'static str,
    /// Which backend serves this model.
    pub provider: ProviderKind,
    /// Human-readable name.
    pub display_name: &'static str,
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
    /// Maximum context window in tokens.
    pub max_context: u32,
    /// Maximum output tokens.
    pub max_output: u32,
    /// Capability tier, 1 (strongest) ..= 4.
    pub tier: u8,
    pub supports_tools: bool,
    pub supports_thinking: bool,
    pub supports_subagents: bool,
    pub supports_web_search: bool,
    /// Whether this model requires cloud credentials.
    pub cloud: bool,
}

impl ModelEntry {
    /// Compute cost for the given token counts.
    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 * self.input_per_m + output_tokens as f64 * self.output_per_m)
            / 1_000_000.0
    }
}

/// The compile-time model catalog. Identifiers are unique.
pub const MODEL_CATALOG: &[ModelEntry] = &[
    // ── Anthropic ──────────────────────────────────────────────
    ModelEntry {
        id: "claude-opus-4",
        provider: ProviderKind::Anthropic,
        display_name: "Claude Opus 4",
        input_per_m: 15.0,
        output_per_m: 75.0,
        max_context: 200_000,
        max_output: 32_000,
        tier: 1,
        supports_tools: true,
        supports_thinking: true,
        supports_subagents: true,
        supports_web_search: true,
        cloud: true,
    },
    ModelEntry {
        id: "claude-sonnet-4",
        provider: ProviderKind::Anthropic,
        display_name: "Claude Sonnet 4",
        input_per_m: 3.0,
        output_per_m: 15.0,
        max_context: 200_000,
        max_output: 64_000,
        tier: 2,
        supports_tools: true,
        supports_thinking: true,
        supports_subagents: true,
        supports_web_search: true,
        cloud: true,
    },
    ModelEntry {
        id: "claude-3-5-haiku",
        provider: ProviderKind::Anthropic,
        display_name: "Claude 3.5 Haiku",
        input_per_m: 0.8,
        output_per_m: 4.0,
        max_context: 200_000,
        max_output: 8_192,
        tier: 3,
        supports_tools: true,
        supports_thinking: false,
        supports_subagents: false,
        supports_web_search: false,
        cloud: true,
    },
    // ── OpenAI ─────────────────────────────────────────────────
    ModelEntry {
        id: "o1",
        provider: ProviderKind::Openai,
        display_name: "OpenAI o1",
        input_per_m: 15.0,
        output_per_m: 60.0,
        max_context: 200_000,
        max_output: 100_000,
        tier: 1,
        supports_tools: true,
        supports_thinking: true,
        supports_subagents: false,
        supports_web_search: false,
        cloud: true,
    },
    ModelEntry {
        id: "gpt-4o",
        provider: ProviderKind::Openai,
        display_name: "GPT-4o",
        input_per_m: 2.5,
        output_per_m: 10.0,
        max_context: 128_000,
        max_output: 16_384,
        tier: 2,
        supports_tools: true,
        supports_thinking: false,
        supports_subagents: false,
        supports_web_search: true,
        cloud: true,
    },
    ModelEntry {
        id: "gpt-4o-mini",
        provider: ProviderKind::Openai,
        display_name: "GPT-4o mini",
        input_per_m: 0.15,
        output_per_m: 0.6,
        max_context: 128_000,
        max_output: 16_384,
        tier: 3,
        supports_tools: true,
        supports_thinking: false,
        supports_subagents: false,
        supports_web_search: false,
        cloud: true,
    },
    // ── Ollama (local, free) ───────────────────────────────────
    ModelEntry {
        id: "deepseek-r1:70b",
        provider: ProviderKind::Ollama,
        display_name: "DeepSeek R1 70B",
        input_per_m: 0.0,
        output_per_m: 0.0,
        max_context: 64_000,
        max_output: 8_192,
        tier: 1,
        supports_tools: false,
        supports_thinking: true,
        supports_subagents: false,
        supports_web_search: false,
        cloud: false,
    },
    ModelEntry {
        id: "llama3:70b",
        provider: ProviderKind::Ollama,
        display_name: "Llama 3 70B",
        input_per_m: 0.0,
        output_per_m: 0.0,
        max_context: 8_192,
        max_output: 4_096,
        tier: 2,
        supports_tools: true,
        supports_thinking: false,
        supports_subagents: false,
        supports_web_search: false,
        cloud: false,
    },
    ModelEntry {
        id: "qwen2.5:14b",
        provider: ProviderKind::Ollama,
        display_name: "Qwen 2.5 14B",
        input_per_m: 0.0,
        output_per_m: 0.0,
        max_context: 32_000,
        max_output: 8_192,
        tier: 3,
        supports_tools: true,
        supports_thinking: false,
        supports_subagents: false,
        supports_web_search: false,
        cloud: false,
    },
    ModelEntry {
        id: "llama3:8b",
        provider: ProviderKind::Ollama,
        display_name: "Llama 3 8B",
        input_per_m: 0.0,
        output_per_m: 0.0,
        max_context: 8_192,
        max_output: 4_096,
        tier: 3,
        supports_tools: true,
        supports_thinking: false,
        supports_subagents: false,
        supports_web_search: false,
        cloud: false,
    },
    ModelEntry {
        id: "llama3.2:3b",
        provider: ProviderKind::Ollama,
        display_name: "Llama 3.2 3B",
        input_per_m: 0.0,
        output_per_m: 0.0,
        max_context: 8_192,
        max_output: 2_048,
        tier: 4,
        supports_tools: false,
        supports_thinking: false,
        supports_subagents: false,
        supports_web_search: false,
        cloud: false,
    },
];

/// The full catalog.
pub fn catalog() -> &'static [ModelEntry] {
    MODEL_CATALOG
}

/// Look up a model by identifier.
pub fn find(id: &str) -> Option<&'static ModelEntry> {
    MODEL_CATALOG.iter().find(|m| m.id == id)
}

/// All models served by one provider.
pub fn models_for(provider: ProviderKind) -> Vec<&'static ModelEntry> {
    MODEL_CATALOG.iter().filter(|m| m.provider == provider).collect()
}

/// Cost of a call against a model, 0.0 when the model is unknown.
pub fn estimate_cost(model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
    find(model).map_or(0.0, |m| m.cost(input_tokens, output_tokens))
}

/// The cheapest entry (by output price) satisfying `filter`.
pub fn cheapest(filter: impl Fn(&ModelEntry) -> bool) -> Option<&'static ModelEntry> {
    MODEL_CATALOG
        .iter()
        .filter(|m| filter(m))
        .min_by(|a, b| {
            a.output_per_m
                .partial_cmp(&b.output_per_m)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn identifiers_are_unique() {
        let mut seen = HashSet::new();
        for entry in MODEL_CATALOG {
            assert!(seen.insert(entry.id), "duplicate model id: {}", entry.id);
        }
    }

    #[test]
    fn table_invariants_hold() {
        for entry in MODEL_CATALOG {
            assert!(entry.input_per_m >= 0.0, "{}", entry.id);
            assert!(entry.output_per_m >= 0.0, "{}", entry.id);
            assert!((1..=4).contains(&entry.tier), "{}", entry.id);
            assert!(entry.max_context > 0, "{}", entry.id);
            assert!(entry.max_output > 0, "{}", entry.id);
            assert_eq!(entry.cloud, entry.provider.is_cloud(), "{}", entry.id);
        }
    }

    #[test]
    fn known_model_cost() {
        // Claude Sonnet 4: $3/M input, $15/M output
        let cost = estimate_cost("claude-sonnet-4", 1000, 500);
        assert!((cost - 0.0105).abs() < 1e-10);
    }

    #[test]
    fn zero_token_call_costs_nothing() {
        for entry in MODEL_CATALOG {
            assert_eq!(entry.cost(0, 0), 0.0, "{}", entry.id);
        }
    }

    #[test]
    fn free_models_cost_nothing_at_any_volume() {
        for entry in MODEL_CATALOG.iter().filter(|m| m.input_per_m == 0.0 && m.output_per_m == 0.0)
        {
            assert_eq!(entry.cost(1_000_000, 1_000_000), 0.0, "{}", entry.id);
        }
    }

    #[test]
    fn unknown_model_returns_zero() {
        assert_eq!(estimate_cost("no-such-model", 1000, 500), 0.0);
    }

    #[test]
    fn models_for_partitions_catalog() {
        let total: usize = ProviderKind::all()
            .iter()
            .map(|&p| models_for(p).len())
            .sum();
        assert_eq!(total, MODEL_CATALOG.len());
        assert!(!models_for(ProviderKind::Ollama).is_empty());
    }

    #[test]
    fn cheapest_respects_filter() {
        let entry = cheapest(|m| m.provider == ProviderKind::Anthropic && m.tier <= 2).unwrap();
        assert_eq!(entry.id, "claude-sonnet-4");

        let free = cheapest(|m| !m.cloud).unwrap();
        assert_eq!(free.output_per_m, 0.0);

        assert!(cheapest(|m| m.tier == 0).is_none());
    }
}
