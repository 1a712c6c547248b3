use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Deserialize;

use crate::dispatch::read_capped;
use crate::error::SketchbookError;

const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024; // 2MB

/// Per-request timeout for chat completions.
const CHAT_TIMEOUT: Duration = Duration::from_secs(120);

/// An OpenAI-compatible chat-completions endpoint plus credentials.
#[derive(Clone)]
pub struct ChatEndpoint {
    pub provider: String,
    /// Full chat-completions URL.
    pub url: String,
    pub model: String,
    pub api_key: String,
}

impl std::fmt::Debug for ChatEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatEndpoint")
            .field("provider", &self.provider)
            .field("url", &self.url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Sampling parameters for a single completion.
#[derive(Debug, Clone, Copy)]
pub struct ChatOptions {
    pub temperature: f64,
    pub max_tokens: u64,
}

pub struct HttpDispatch {
    client: Client,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
}

impl Default for HttpDispatch {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpDispatch {
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(4)
            .build()
            .expect("failed to build HTTP client");

        Self { client }
    }

    /// Single-shot chat completion. Returns the first choice's text.
    pub async fn complete(
        &self,
        endpoint: &ChatEndpoint,
        prompt: &str,
        options: ChatOptions,
    ) -> Result<String, SketchbookError> {
        let start = Instant::now();
        let provider = endpoint.provider.as_str();

        let body = serde_json::json!({
            "model": endpoint.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        });

        let response = self
            .client
            .post(&endpoint.url)
            .header("Authorization", format!("Bearer {}", endpoint.api_key))
            .header("Content-Type", "application/json")
            .timeout(CHAT_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        // Cap error body reads to MAX_RESPONSE_BYTES to prevent memory exhaustion
        if !status.is_success() {
            let (error_bytes, _) = read_capped(response, MAX_RESPONSE_BYTES)
                .await
                .unwrap_or_default();
            return Err(SketchbookError::Http {
                provider: provider.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&error_bytes).into_owned(),
            });
        }

        let (bytes, truncated) = read_capped(response, MAX_RESPONSE_BYTES).await?;
        if truncated {
            return Err(SketchbookError::protocol(
                provider,
                format!("response too large (max {MAX_RESPONSE_BYTES} bytes)"),
            ));
        }

        let completion: ChatCompletion = serde_json::from_slice(&bytes).map_err(|e| {
            SketchbookError::protocol(provider, format!("failed to parse response: {e}"))
        })?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| SketchbookError::protocol(provider, "empty choices or null content"))?;

        tracing::info!(
            provider,
            model = endpoint.model,
            latency_ms = start.elapsed().as_millis() as u64,
            "chat completion finished"
        );

        Ok(text)
    }
}
