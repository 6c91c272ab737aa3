//! Research and text-generation capabilities.
//!
//! The pipeline depends on the [`ResearchProvider`] and [`CompletionProvider`]
//! traits. [`ChatClient`] implements both against any OpenAI-compatible
//! `/chat/completions` endpoint; research services that speak the same
//! protocol (with their own base URL and model) use the same client.

mod types;

use std::time::Duration;

use async_trait::async_trait;
use leadflow_shared::{LeadflowError, Result, classify_status};
use reqwest::Client;
use tracing::{debug, instrument, warn};

use types::{ChatRequest, ChatResponseRaw, Message};

/// User-Agent string for capability requests.
const USER_AGENT: &str = concat!("leadflow/", env!("CARGO_PKG_VERSION"));

/// System prompt for research calls.
const RESEARCH_SYSTEM_PROMPT: &str = "You are a business research assistant. \
     Answer with concise, factual findings suitable for personalizing a sales email.";

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Looks up research text about a company or person.
#[async_trait]
pub trait ResearchProvider: Send + Sync {
    async fn research(&self, subject: &str) -> Result<String>;
}

/// Parameters for one completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Produces text from a prompt.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Chat-completions client
// ---------------------------------------------------------------------------

/// Client for an OpenAI-compatible chat-completions endpoint.
#[derive(Clone)]
pub struct ChatClient {
    http: Client,
    base_url: String,
    api_key: String,
    /// Model used for research calls.
    research_model: String,
    /// Label used in classified errors: "research" or "generation".
    capability: &'static str,
}

impl ChatClient {
    /// Client for the research capability.
    pub fn research(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Self::build(base_url.into(), api_key.into(), model.into(), "research", timeout)
    }

    /// Client for the generation capability. The model comes with each request.
    pub fn generation(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Self::build(base_url.into(), api_key.into(), String::new(), "generation", timeout)
    }

    fn build(
        base_url: String,
        api_key: String,
        research_model: String,
        capability: &'static str,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| LeadflowError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            research_model,
            capability,
        })
    }

    async fn chat(&self, request: &ChatRequest<'_>) -> Result<String> {
        let start = std::time::Instant::now();
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, capability = self.capability, "chat request failed");
                LeadflowError::transient(self.capability, e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(self.capability, status.as_u16(), body.trim()));
        }

        let raw: ChatResponseRaw = response.json().await.map_err(|e| {
            LeadflowError::permanent(self.capability, format!("unexpected response body: {e}"))
        })?;

        let content = raw
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| LeadflowError::permanent(self.capability, "empty completion"))?;

        debug!(
            model = request.model,
            duration_ms = start.elapsed().as_millis() as u64,
            chars = content.len(),
            "chat completion"
        );
        Ok(content)
    }
}

#[async_trait]
impl ResearchProvider for ChatClient {
    #[instrument(skip_all, fields(model = %self.research_model))]
    async fn research(&self, subject: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.research_model,
            messages: vec![Message::system(RESEARCH_SYSTEM_PROMPT), Message::user(subject)],
            max_tokens: None,
            temperature: None,
        };
        self.chat(&request).await
    }
}

#[async_trait]
impl CompletionProvider for ChatClient {
    #[instrument(skip_all, fields(model = %request.model, max_tokens = request.max_tokens))]
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let chat = ChatRequest {
            model: &request.model,
            messages: vec![Message::user(&request.prompt)],
            max_tokens: Some(request.max_tokens),
            temperature: Some(request.temperature),
        };
        self.chat(&chat).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion_body(text: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": text } }]
        })
    }

    #[tokio::test]
    async fn complete_sends_model_and_parameters() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer gen-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4",
                "max_tokens": 500
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(completion_body("Subject: Hi\n\nHello")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatClient::generation(server.uri(), "gen-key", Duration::from_secs(5)).unwrap();
        let text = client
            .complete(&CompletionRequest {
                model: "gpt-4".into(),
                prompt: "Write an email".into(),
                max_tokens: 500,
                temperature: 0.7,
            })
            .await
            .unwrap();
        assert_eq!(text, "Subject: Hi\n\nHello");
    }

    #[tokio::test]
    async fn research_uses_configured_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({ "model": "sonar" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(
                "  Analytical Engines builds mechanical computers.  ",
            )))
            .mount(&server)
            .await;

        let client =
            ChatClient::research(server.uri(), "research-key", "sonar", Duration::from_secs(5))
                .unwrap();
        let text = client.research("Company: Analytical Engines").await.unwrap();
        assert_eq!(text, "Analytical Engines builds mechanical computers.");
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client =
            ChatClient::research(server.uri(), "k", "sonar", Duration::from_secs(5)).unwrap();
        let err = client.research("anything").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("research"));
    }

    #[tokio::test]
    async fn slow_response_times_out_as_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_body("late"))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client =
            ChatClient::research(server.uri(), "k", "sonar", Duration::from_millis(50)).unwrap();
        let err = client.research("anything").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn empty_choices_are_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })))
            .mount(&server)
            .await;

        let client = ChatClient::generation(server.uri(), "k", Duration::from_secs(5)).unwrap();
        let err = client
            .complete(&CompletionRequest {
                model: "gpt-4".into(),
                prompt: "p".into(),
                max_tokens: 10,
                temperature: 0.0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LeadflowError::Permanent { .. }));
    }

    #[tokio::test]
    async fn bad_request_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_string("context length exceeded"))
            .mount(&server)
            .await;

        let client = ChatClient::generation(server.uri(), "k", Duration::from_secs(5)).unwrap();
        let err = client
            .complete(&CompletionRequest {
                model: "gpt-4".into(),
                prompt: "p".into(),
                max_tokens: 10,
                temperature: 0.0,
            })
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("context length exceeded"));
    }
}
