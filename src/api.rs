use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::models::{Message, Settings};

/// Everything that can go wrong talking to the chat API, as typed variants.
/// Callers branch on the variant, never on the rendered text.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("API key is not set")]
    NoApiKey,
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
    #[error("invalid API key (401)")]
    InvalidKey,
    #[error("payment required (402)")]
    PaymentRequired { hint: Option<String> },
    #[error("endpoint not found (404)")]
    EndpointNotFound,
    #[error("rate limited (429)")]
    RateLimited,
    #[error("server error ({status})")]
    Server { status: u16 },
    #[error("unexpected HTTP status {status}")]
    Http { status: u16 },
    #[error("malformed response body")]
    MalformedResponse,
}

impl ApiError {
    /// Short tag for the status indicator.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::NoApiKey => "no-api-key",
            ApiError::Network(_) => "network",
            ApiError::InvalidKey => "invalid-key",
            ApiError::PaymentRequired { .. } => "payment-required",
            ApiError::EndpointNotFound => "endpoint-not-found",
            ApiError::RateLimited => "rate-limited",
            ApiError::Server { .. } => "server-error",
            ApiError::Http { .. } => "http-error",
            ApiError::MalformedResponse => "malformed-response",
        }
    }

    /// User-facing message with a remediation hint. For 402 the
    /// server-supplied hint text is surfaced verbatim when present.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::NoApiKey => "API key is not set. Open settings to add one.".to_string(),
            ApiError::Network(_) => "Network error. Check your connection and try again.".to_string(),
            ApiError::InvalidKey => "Invalid API key. Check it in settings.".to_string(),
            ApiError::PaymentRequired { hint: Some(hint) } => hint.clone(),
            ApiError::PaymentRequired { hint: None } => {
                "Payment required (402). Check your provider balance and that the key is active."
                    .to_string()
            }
            ApiError::EndpointNotFound => {
                "Endpoint not found (404). Check the API base URL in settings.".to_string()
            }
            ApiError::RateLimited => "Too many requests (429). Wait a moment and retry.".to_string(),
            ApiError::Server { status } => {
                format!("AI server error ({status}). Try again later.")
            }
            ApiError::Http { status } => format!("Request failed with HTTP status {status}."),
            ApiError::MalformedResponse => "Unexpected response from the server.".to_string(),
        }
    }
}

/// Outcome of the lightweight "test connection" probe. Never an error: all
/// failures reduce to `ok: false` plus whatever status was available.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyTest {
    pub ok: bool,
    pub status: Option<u16>,
}

// Trait boundary for the remote chat API, so the controller can be driven
// by a mock in tests.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// One completion round-trip: system prompt + history + the new user
    /// message in, reply text out.
    async fn complete(
        &self,
        user_text: &str,
        history: &[Message],
        settings: &Settings,
    ) -> Result<String, ApiError>;

    /// Probe used by the "test connection" action.
    async fn test_key(&self, settings: &Settings) -> KeyTest;
}

#[derive(Serialize, Debug)]
struct ChatRequestBody {
    model: String,
    messages: Vec<ApiMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Deserialize, Debug)]
struct ChatResponseBody {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
}

#[derive(Deserialize, Debug)]
struct ResponseChoice {
    message: Option<ApiMessage>,
}

pub struct ChatCompletionClient {
    client: Client,
}

impl Default for ChatCompletionClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatCompletionClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn completions_url(settings: &Settings) -> String {
        format!(
            "{}/chat/completions",
            settings.api_base_url.trim_end_matches('/')
        )
    }

    fn models_url(settings: &Settings) -> String {
        format!("{}/models", settings.api_base_url.trim_end_matches('/'))
    }

    fn build_messages(user_text: &str, history: &[Message], settings: &Settings) -> Vec<ApiMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if !settings.system_prompt.trim().is_empty() {
            messages.push(ApiMessage {
                role: "system".to_string(),
                content: settings.system_prompt.clone(),
            });
        }
        for msg in history {
            messages.push(ApiMessage {
                role: msg.role.as_api_str().to_string(),
                content: msg.text.clone(),
            });
        }
        messages.push(ApiMessage {
            role: "user".to_string(),
            content: user_text.to_string(),
        });
        messages
    }

    fn classify_status(status: u16, body: &str) -> ApiError {
        match status {
            401 => ApiError::InvalidKey,
            402 => ApiError::PaymentRequired {
                hint: extract_error_hint(body),
            },
            404 => ApiError::EndpointNotFound,
            429 => ApiError::RateLimited,
            500..=599 => ApiError::Server { status },
            _ => ApiError::Http { status },
        }
    }
}

/// Pulls the server's own explanation out of an error body: the
/// conventional `error.message` field when the body is JSON, otherwise the
/// raw text. Empty bodies yield no hint.
fn extract_error_hint(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(message) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return Some(message.to_string());
        }
    }
    Some(trimmed.to_string())
}

#[async_trait]
impl ChatApi for ChatCompletionClient {
    async fn complete(
        &self,
        user_text: &str,
        history: &[Message],
        settings: &Settings,
    ) -> Result<String, ApiError> {
        if settings.api_key.trim().is_empty() {
            return Err(ApiError::NoApiKey);
        }

        let url = Self::completions_url(settings);
        let body = ChatRequestBody {
            model: settings.model.clone(),
            messages: Self::build_messages(user_text, history, settings),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            stream: false,
        };
        log::info!(
            "Sending completion request to {} using model {}",
            url,
            body.model
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&settings.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                log::error!("Completion request failed before a response: {e}");
                ApiError::Network(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            log::error!("Completion request failed with status {status}: {error_body}");
            return Err(Self::classify_status(status.as_u16(), &error_body));
        }

        let parsed: ChatResponseBody = response.json().await.map_err(|e| {
            log::error!("Failed to parse completion response body: {e}");
            ApiError::MalformedResponse
        })?;

        // Conventional shape: choices[0].message.content. Anything else is
        // a malformed response, not something to guess around.
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .map(|message| message.content)
            .ok_or(ApiError::MalformedResponse)
    }

    async fn test_key(&self, settings: &Settings) -> KeyTest {
        if settings.api_key.trim().is_empty() {
            return KeyTest {
                ok: false,
                status: None,
            };
        }

        let url = Self::models_url(settings);
        log::info!("Testing API key against {url}");
        match self
            .client
            .get(&url)
            .bearer_auth(&settings.api_key)
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status();
                KeyTest {
                    ok: status.is_success(),
                    status: Some(status.as_u16()),
                }
            }
            Err(e) => {
                log::warn!("Key test failed without a response: {e}");
                KeyTest {
                    ok: false,
                    status: None,
                }
            }
        }
    }
}
