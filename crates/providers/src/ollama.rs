//! Ollama provider — local inference over the Ollama HTTP API.
//!
//! Every completion holds a weighted slot from [`LocalSlots`] for its whole
//! duration, so concurrent local inference never exceeds what the host can
//! take. Requests go to `/api/chat` with streaming disabled; generation
//! knobs (`num_ctx`, `num_predict`, `num_batch`, `num_gpu`) pass through
//! from the environment.

use async_trait::async_trait;
use roost_config::OllamaConfig;
use roost_core::error::ProviderError;
use roost_core::message::{Message, Role};
use roost_core::provider::*;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::slots::{LocalSlots, SlotAcquire};

/// Local inference provider backed by an Ollama daemon.
pub struct OllamaProvider {
    base_url: String,
    client: reqwest::Client,
    slots: LocalSlots,
    num_ctx: Option<u32>,
    num_predict: Option<u32>,
    num_batch: Option<u32>,
    num_gpu: Option<u32>,
}

impl OllamaProvider {
    /// Create a provider from the Ollama settings and a slot scheduler.
    pub fn new(config: &OllamaConfig, slots: LocalSlots) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .read_timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: config.host.trim_end_matches('/').to_string(),
            client,
            slots,
            num_ctx: config.num_ctx,
            num_predict: config.num_predict,
            num_batch: config.num_batch,
            num_gpu: config.num_gpu,
        }
    }

    /// The slot scheduler gating this backend.
    pub fn slots(&self) -> &LocalSlots {
        &self.slots
    }

    /// Complete with an explicit abort signal.
    ///
    /// The signal is observed while queued for a slot. Once inference is in
    /// flight the request runs to completion (bounded by the HTTP timeouts);
    /// the slot is released when the response or error comes back.
    pub async fn complete_with_cancel(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, ProviderError> {
        request.validate()?;

        let _permit = match self.slots.acquire(&request.model, cancel).await {
            SlotAcquire::Acquired(permit) => permit,
            SlotAcquire::Aborted => {
                return Err(ProviderError::Aborted(
                    "cancelled while waiting for a local inference slot".into(),
                ));
            }
        };

        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest {
            model: request.model.clone(),
            messages: Self::to_api_messages(&request.messages),
            stream: false,
            options: self.build_options(&request),
        };

        debug!(provider = "ollama", model = %request.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(format!("Ollama request timed out: {e}"))
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status == 404 {
            return Err(ProviderError::ModelNotFound(format!(
                "{} (pull it with `ollama pull`)",
                request.model
            )));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Ollama API error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_resp: ChatResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse Ollama response: {e}"),
            })?;

        let prompt_tokens = api_resp.prompt_eval_count.unwrap_or(0);
        let completion_tokens = api_resp.eval_count.unwrap_or(0);

        Ok(CompletionResponse {
            content: api_resp.message.map(|m| m.content).unwrap_or_default(),
            tool_calls: Vec::new(),
            usage: Some(Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
            model: api_resp.model,
            used_provider: None,
            used_model: None,
        })
    }

    /// Ollama's chat endpoint knows user/assistant/system; tool results go
    /// back in as user turns.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| match m.role {
                Role::User => ApiMessage {
                    role: "user".into(),
                    content: m.content.clone(),
                },
                Role::Assistant => ApiMessage {
                    role: "assistant".into(),
                    content: m.content.clone(),
                },
                Role::System => ApiMessage {
                    role: "system".into(),
                    content: m.content.clone(),
                },
                Role::Tool => ApiMessage {
                    role: "user".into(),
                    content: format!("[Tool Result] {}", m.content),
                },
            })
            .collect()
    }

    fn build_options(&self, request: &CompletionRequest) -> ChatOptions {
        ChatOptions {
            temperature: Some(request.temperature),
            num_ctx: self.num_ctx,
            num_predict: request.max_tokens.or(self.num_predict),
            num_batch: self.num_batch,
            num_gpu: self.num_gpu,
            stop: if request.stop.is_empty() {
                None
            } else {
                Some(request.stop.clone())
            },
        }
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        // No external abort signal on the plain trait path.
        self.complete_with_cancel(request, &CancellationToken::new())
            .await
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            kind: ProviderKind::Ollama,
            display_name: "Ollama".into(),
            configured: true,
        }
    }
}

// --- Ollama API types ---

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ApiMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_batch: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_gpu: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: String,
    message: Option<ApiMessage>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::SlotConfig;

    fn test_provider() -> OllamaProvider {
        let config = OllamaConfig::default();
        OllamaProvider::new(&config, LocalSlots::new(SlotConfig::default(), None))
    }

    #[test]
    fn tool_results_become_user_turns() {
        let messages = vec![
            Message::system("rules"),
            Message::user("hi"),
            Message::tool_result("call_1", "42"),
        ];
        let api = OllamaProvider::to_api_messages(&messages);
        assert_eq!(api[0].role, "system");
        assert_eq!(api[1].role, "user");
        assert_eq!(api[2].role, "user");
        assert!(api[2].content.starts_with("[Tool Result]"));
    }

    #[test]
    fn request_max_tokens_overrides_num_predict() {
        let config = OllamaConfig {
            num_predict: Some(256),
            ..OllamaConfig::default()
        };
        let provider = OllamaProvider::new(&config, LocalSlots::new(SlotConfig::default(), None));

        let mut request = CompletionRequest::new("llama3:8b", vec![Message::user("hi")]);
        assert_eq!(provider.build_options(&request).num_predict, Some(256));

        request.max_tokens = Some(64);
        assert_eq!(provider.build_options(&request).num_predict, Some(64));
    }

    #[test]
    fn unset_options_are_omitted_from_json() {
        let provider = test_provider();
        let request = CompletionRequest::new("llama3:8b", vec![Message::user("hi")]);
        let json = serde_json::to_value(provider.build_options(&request)).unwrap();
        assert!(json.get("num_ctx").is_none());
        assert!(json.get("stop").is_none());
        assert!(json.get("temperature").is_some());
    }

    #[test]
    fn parse_chat_response() {
        let resp: ChatResponse = serde_json::from_str(
            r#"{
                "model": "llama3:8b",
                "created_at": "2025-01-01T00:00:00Z",
                "message": {"role": "assistant", "content": "Hello!"},
                "done": true,
                "prompt_eval_count": 12,
                "eval_count": 4
            }"#,
        )
        .unwrap();
        assert_eq!(resp.message.unwrap().content, "Hello!");
        assert_eq!(resp.prompt_eval_count, Some(12));
    }

    #[tokio::test]
    async fn aborted_slot_wait_maps_to_aborted_error() {
        let provider = test_provider();

        // Occupy the only slot, then cancel a second caller while queued.
        let cancel_a = CancellationToken::new();
        let grant = provider
            .slots()
            .acquire("llama3.2:3b", &cancel_a)
            .await;
        assert!(grant.is_acquired());

        let cancel_b = CancellationToken::new();
        cancel_b.cancel();
        let request = CompletionRequest::new("llama3.2:3b", vec![Message::user("hi")]);
        let err = provider
            .complete_with_cancel(request, &cancel_b)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Aborted(_)));
        assert_eq!(provider.slots().active_weight(), 1);
    }
}
