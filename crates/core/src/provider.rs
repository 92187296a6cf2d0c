//! Provider trait — the abstraction over LLM backends.
//!
//! A Provider knows how to send a conversation to an LLM and get a response
//! back. The fallback manager calls `complete()` without knowing which
//! backend is being used.
//!
//! Implementations: Anthropic (native Messages API), OpenAI
//! (chat completions), Ollama (local inference over HTTP).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{Message, MessageToolCall};

/// The closed set of provider backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    Openai,
    Ollama,
}

impl ProviderKind {
    /// The wire tag for this provider (`anthropic` | `openai` | `ollama`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Openai => "openai",
            Self::Ollama => "ollama",
        }
    }

    /// Parse a tag, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" => Some(Self::Anthropic),
            "openai" => Some(Self::Openai),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }

    /// Whether this backend requires cloud credentials.
    pub fn is_cloud(&self) -> bool {
        !matches!(self, Self::Ollama)
    }

    /// All known provider kinds.
    pub fn all() -> [Self; 3] {
        [Self::Anthropic, Self::Openai, Self::Ollama]
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Configuration for a completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The model to use (e.g., "claude-sonnet-4", "gpt-4o", "llama3:8b")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Whether extended thinking may be enabled for capable models
    #[serde(default)]
    pub allow_thinking: bool,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

fn default_temperature() -> f32 {
    0.7
}

impl CompletionRequest {
    /// Create a minimal request from a model and messages.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: default_temperature(),
            max_tokens: None,
            tools: Vec::new(),
            allow_thinking: false,
            stop: Vec::new(),
        }
    }

    /// Replace the target model, keeping everything else.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Validate caller-supplied input before any dispatch.
    ///
    /// An invalid request must never advance a fallback chain; callers check
    /// this once, up front.
    pub fn validate(&self) -> std::result::Result<(), ProviderError> {
        if self.model.trim().is_empty() {
            return Err(ProviderError::InvalidRequest("model must not be empty".into()));
        }
        if self.messages.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "messages must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// The generated text
    pub content: String,

    /// Tool calls requested by the model
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    /// Which provider served the request (filled by the fallback manager)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_provider: Option<ProviderKind>,

    /// Which chain-entry model served the request (filled by the fallback manager)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_model: Option<String>,
}

/// Static facts about a provider instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub kind: ProviderKind,
    pub display_name: String,
    /// Whether credentials/endpoint configuration is present.
    pub configured: bool,
}

/// The core Provider trait.
///
/// Every LLM backend implements this trait. The fallback manager calls
/// `complete()` per chain entry; the router consults `kind()` and the
/// registry for candidate filtering.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> ProviderKind;

    /// A human-readable name for this provider.
    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<CompletionResponse, ProviderError>;

    /// Health check — can we reach the provider?
    async fn is_available(&self) -> bool {
        true
    }

    /// Static facts about this instance.
    fn info(&self) -> ProviderInfo;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrip() {
        for kind in ProviderKind::all() {
            assert_eq!(ProviderKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ProviderKind::parse("ANTHROPIC"), Some(ProviderKind::Anthropic));
        assert_eq!(ProviderKind::parse(" Ollama "), Some(ProviderKind::Ollama));
        assert_eq!(ProviderKind::parse("mistral"), None);
    }

    #[test]
    fn cloud_flags() {
        assert!(ProviderKind::Anthropic.is_cloud());
        assert!(ProviderKind::Openai.is_cloud());
        assert!(!ProviderKind::Ollama.is_cloud());
    }

    #[test]
    fn request_defaults() {
        let req = CompletionRequest::new("gpt-4o", vec![Message::user("hello")]);
        assert!((req.temperature - 0.7).abs() < f32::EPSILON);
        assert!(req.max_tokens.is_none());
        assert!(!req.allow_thinking);
    }

    #[test]
    fn validate_rejects_empty_model() {
        let req = CompletionRequest::new("  ", vec![Message::user("hello")]);
        let err = req.validate().unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn validate_rejects_empty_messages() {
        let req = CompletionRequest::new("gpt-4o", vec![]);
        assert!(req.validate().is_err());
    }

    #[test]
    fn with_model_replaces_target() {
        let req = CompletionRequest::new("a", vec![Message::user("x")]).with_model("b");
        assert_eq!(req.model, "b");
        assert_eq!(req.messages.len(), 1);
    }
}
