use reqwest::Method;
use serde::Deserialize;

use crate::dispatch::GenerationRequest;
use crate::dispatch::async_poll::{JobApi, JobCall, SubmitOutcome, json_call};
use crate::error::SketchbookError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ImageData {
    url: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
}

// ---------------------------------------------------------------------------
// OpenAI Images API (dall-e-3): synchronous, never queues a job
// ---------------------------------------------------------------------------

pub struct OpenAiImagesApi {
    base_url: String,
}

impl Default for OpenAiImagesApi {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenAiImagesApi {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl JobApi for OpenAiImagesApi {
    fn provider(&self) -> &str {
        "openai"
    }

    fn build_submit_request(&self, req: &GenerationRequest, api_key: &str) -> JobCall {
        let url = format!("{}/images/generations", self.base_url);
        let headers = vec![("Authorization".to_string(), format!("Bearer {api_key}"))];
        let body = serde_json::json!({
            "model": req.model,
            "prompt": req.prompt,
            "size": req.size.as_deref().unwrap_or("1024x1024"),
            "n": 1,
        });
        json_call(Method::POST, url, headers, Some(body))
    }

    fn build_fetch_request(&self, _job_id: &str, _api_key: &str) -> Option<JobCall> {
        None
    }

    fn parse_submit_response(&self, body: &[u8]) -> SubmitOutcome {
        let parsed: ImagesResponse = match serde_json::from_slice(body) {
            Ok(parsed) => parsed,
            Err(e) => {
                return SubmitOutcome::Failed(SketchbookError::protocol(
                    self.provider(),
                    format!("invalid JSON: {e}"),
                ));
            }
        };

        if let Some(err) = parsed.error {
            return SubmitOutcome::Failed(SketchbookError::Provider {
                provider: self.provider().to_string(),
                message: err.message.unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        match parsed
            .data
            .into_iter()
            .next()
            .and_then(|d| d.url)
            .filter(|u| !u.is_empty())
        {
            Some(url) => SubmitOutcome::Immediate(url),
            None => SubmitOutcome::Failed(SketchbookError::protocol(
                self.provider(),
                "images response without a URL",
            )),
        }
    }

    /// OpenAI image failures are not retried.
    fn is_transient(&self, _err: &SketchbookError) -> bool {
        false
    }
}
