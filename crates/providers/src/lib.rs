//! LLM provider implementations for Roost.
//!
//! All providers implement the `roost_core::Provider` trait. The router
//! picks a model from the catalog, the fallback manager walks a chain of
//! (provider, model) entries with health tracking, and the slot scheduler
//! gates the local backend.

pub mod anthropic;
pub mod complexity;
pub mod fallback;
pub mod health;
pub mod ollama;
pub mod openai;
pub mod registry;
pub mod router;
pub mod slots;

pub use anthropic::AnthropicProvider;
pub use complexity::{ComplexityEstimate, ComplexityLevel, estimate_complexity};
pub use fallback::{ChainEntry, ChainName, FallbackManager};
pub use health::{HealthTracker, ProviderHealth};
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use registry::ProviderRegistry;
pub use router::{ModelRouter, RouteOptions, SelectedModel};
pub use slots::{LocalSlots, SlotAcquire, SlotConfig, SlotPermit, ollama_vram_probe, weight_for_model};
