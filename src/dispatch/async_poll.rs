use std::time::Duration;

use reqwest::{Client, Method};
use serde::Deserialize;

use crate::dispatch::retry::{AttemptResult, RetryPolicy, run_with_retry};
use crate::dispatch::{GenerationRequest, JobHandle, read_capped};
use crate::error::SketchbookError;

/// Max response body size for submit/fetch responses (4MB).
const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

/// Max bytes of an error body kept in `SketchbookError::Http`.
const MAX_ERROR_BODY_BYTES: usize = 4 * 1024;

/// Per-request timeout for a single submit or fetch call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Immediate classification of a submit call.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Provider answered synchronously with a result URL.
    Immediate(String),
    /// Provider queued the job; poll with this id.
    Accepted(String),
    Failed(SketchbookError),
}

/// Result of one fetch call against a queued job.
#[derive(Debug)]
pub enum PollStatus {
    /// Job is still running.
    InProgress,
    /// Job completed with a result URL.
    Completed(String),
    Failed(SketchbookError),
}

/// A fully built HTTP call: method, URL, headers and optional JSON body.
#[derive(Debug, Clone)]
pub struct JobCall {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

/// Provider-specific request/response handling for generation APIs that may
/// answer synchronously or hand back a job id to poll.
///
/// The parse methods default to the common `{status, message, id, output}`
/// envelope; providers with a different shape override them.
pub trait JobApi: Send + Sync {
    /// Provider name used in logs and errors.
    fn provider(&self) -> &str;

    fn build_submit_request(&self, req: &GenerationRequest, api_key: &str) -> JobCall;

    /// Fetch-by-id call. `None` for providers that only answer synchronously.
    fn build_fetch_request(&self, job_id: &str, api_key: &str) -> Option<JobCall>;

    fn parse_submit_response(&self, body: &[u8]) -> SubmitOutcome {
        classify_submit(self.provider(), body)
    }

    fn parse_fetch_response(&self, body: &[u8]) -> PollStatus {
        classify_fetch(self.provider(), body)
    }

    /// Whether a failed attempt is worth a fresh submission.
    fn is_transient(&self, err: &SketchbookError) -> bool;
}

/// Common response envelope: `status` ("error" | "processing" | other),
/// `message`, `id` (string or number) and `output` (result URLs).
///
/// Every field is kept as raw JSON; a field of an unexpected type reads as
/// absent instead of failing the whole body.
#[derive(Debug, Default, Deserialize)]
pub struct JobEnvelope {
    #[serde(default)]
    pub status: Option<serde_json::Value>,
    #[serde(default)]
    pub message: Option<serde_json::Value>,
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
}

impl JobEnvelope {
    pub fn parse(provider: &str, body: &[u8]) -> Result<Self, SketchbookError> {
        serde_json::from_slice(body)
            .map_err(|e| SketchbookError::protocol(provider, format!("invalid JSON: {e}")))
    }

    fn status(&self) -> Option<&str> {
        self.status.as_ref().and_then(|v| v.as_str())
    }

    /// Provider message as text. Some providers send an object or list here.
    pub fn message_text(&self) -> String {
        match &self.message {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => "unknown error".to_string(),
            Some(other) => other.to_string(),
        }
    }

    pub fn job_id(&self) -> Option<String> {
        match &self.id {
            Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    /// First result URL. Anything but a non-empty list of strings is no output.
    pub fn first_output(&self) -> Option<String> {
        self.output
            .as_ref()
            .and_then(|v| v.as_array())
            .and_then(|items| items.first())
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
    }

    fn provider_error(&self, provider: &str) -> SketchbookError {
        SketchbookError::Provider {
            provider: provider.to_string(),
            message: self.message_text(),
        }
    }
}

/// Classify a submit response body using the common envelope.
pub fn classify_submit(provider: &str, body: &[u8]) -> SubmitOutcome {
    let env = match JobEnvelope::parse(provider, body) {
        Ok(env) => env,
        Err(e) => return SubmitOutcome::Failed(e),
    };

    match env.status() {
        Some("error" | "failed") => SubmitOutcome::Failed(env.provider_error(provider)),
        Some("processing") => match env.job_id() {
            Some(id) => SubmitOutcome::Accepted(id),
            None => SubmitOutcome::Failed(SketchbookError::protocol(
                provider,
                "processing response without a job id",
            )),
        },
        _ => match env.first_output() {
            Some(url) => SubmitOutcome::Immediate(url),
            None => SubmitOutcome::Failed(SketchbookError::protocol(
                provider,
                "response carried neither a job id nor an output",
            )),
        },
    }
}

/// Classify a fetch response body using the common envelope.
pub fn classify_fetch(provider: &str, body: &[u8]) -> PollStatus {
    let env = match JobEnvelope::parse(provider, body) {
        Ok(env) => env,
        Err(e) => return PollStatus::Failed(e),
    };

    if matches!(env.status(), Some("error" | "failed")) {
        return PollStatus::Failed(env.provider_error(provider));
    }
    if let Some(url) = env.first_output() {
        return PollStatus::Completed(url);
    }
    match env.status() {
        Some("processing") => PollStatus::InProgress,
        _ => PollStatus::Failed(env.provider_error(provider)),
    }
}

/// Fixed-interval polling budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// Wait before every fetch.
    pub interval: Duration,
    /// Fetches before giving up with `Timeout`.
    pub max_polls: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_polls: 7,
        }
    }
}

impl PollPolicy {
    /// Longest a poller sleeps before reporting a timeout.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_polls
    }
}

/// Lifecycle of one submit+poll cycle.
enum JobState<'a> {
    Submitting(&'a GenerationRequest),
    Polling { handle: JobHandle, polls: u32 },
    Done(Result<String, SketchbookError>),
}

// ---------------------------------------------------------------------------
// Async Poll Dispatcher
// ---------------------------------------------------------------------------

pub struct AsyncPollDispatch {
    client: Client,
    policy: PollPolicy,
}

impl Default for AsyncPollDispatch {
    fn default() -> Self {
        Self::new(PollPolicy::default())
    }
}

impl AsyncPollDispatch {
    pub fn new(policy: PollPolicy) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .expect("failed to build async-poll HTTP client");
        Self::with_client(client, policy)
    }

    pub fn with_client(client: Client, policy: PollPolicy) -> Self {
        Self { client, policy }
    }

    /// Issue one call and return the body of a 2xx response.
    async fn send(&self, provider: &str, call: JobCall) -> Result<Vec<u8>, SketchbookError> {
        let mut builder = self
            .client
            .request(call.method, &call.url)
            .timeout(REQUEST_TIMEOUT);
        for (k, v) in &call.headers {
            builder = builder.header(k, v);
        }
        if let Some(body) = &call.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let (error_bytes, _) = read_capped(response, MAX_ERROR_BODY_BYTES)
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
                format!("response larger than {MAX_RESPONSE_BYTES} bytes"),
            ));
        }
        Ok(bytes)
    }

    /// Submit a generation request and classify the immediate answer.
    pub async fn submit(
        &self,
        api: &dyn JobApi,
        req: &GenerationRequest,
        api_key: &str,
    ) -> SubmitOutcome {
        let provider = api.provider();
        let call = api.build_submit_request(req, api_key);

        tracing::info!(provider, model = req.model, "submitting generation job");

        let body = match self.send(provider, call).await {
            Ok(body) => body,
            Err(e) => return SubmitOutcome::Failed(e),
        };

        let outcome = api.parse_submit_response(&body);
        match &outcome {
            SubmitOutcome::Immediate(_) => {
                tracing::info!(provider, "generation finished synchronously");
            }
            SubmitOutcome::Accepted(job_id) => {
                tracing::info!(
                    provider,
                    job_id,
                    budget_ms = self.policy.budget().as_millis() as u64,
                    "generation job accepted"
                );
            }
            SubmitOutcome::Failed(e) => {
                tracing::warn!(provider, reason = e.reason(), "submit failed: {e}");
            }
        }
        outcome
    }

    /// Fetch the job's status once.
    async fn fetch(&self, api: &dyn JobApi, job_id: &str, api_key: &str) -> PollStatus {
        let provider = api.provider();
        let Some(call) = api.build_fetch_request(job_id, api_key) else {
            return PollStatus::Failed(SketchbookError::protocol(
                provider,
                format!("job {job_id} was queued but the provider has no fetch endpoint"),
            ));
        };

        match self.send(provider, call).await {
            Ok(body) => api.parse_fetch_response(&body),
            Err(e) => PollStatus::Failed(e),
        }
    }

    /// Poll an accepted job until it completes, fails, or the budget runs out.
    pub async fn poll(
        &self,
        api: &dyn JobApi,
        handle: JobHandle,
        api_key: &str,
    ) -> Result<String, SketchbookError> {
        self.drive(api, api_key, JobState::Polling { handle, polls: 0 })
            .await
    }

    /// One full attempt: submit, then poll if the provider queued the job.
    pub async fn run_attempt(
        &self,
        api: &dyn JobApi,
        req: &GenerationRequest,
        api_key: &str,
    ) -> Result<String, SketchbookError> {
        self.drive(api, api_key, JobState::Submitting(req)).await
    }

    /// Run attempts under `retry`, resubmitting from scratch after transient
    /// failures. Returns the remote result URL.
    pub async fn generate(
        &self,
        api: &dyn JobApi,
        req: &GenerationRequest,
        api_key: &str,
        retry: &RetryPolicy,
    ) -> Result<String, SketchbookError> {
        let provider = api.provider();
        run_with_retry(retry, provider, move |attempt| async move {
            tracing::info!(
                provider,
                attempt,
                max_attempts = retry.max_attempts,
                "generation attempt"
            );
            let result = self.run_attempt(api, req, api_key).await;
            AttemptResult::classify(result, |e| api.is_transient(e))
        })
        .await
    }

    async fn drive(
        &self,
        api: &dyn JobApi,
        api_key: &str,
        mut state: JobState<'_>,
    ) -> Result<String, SketchbookError> {
        let provider = api.provider();

        loop {
            state = match state {
                JobState::Submitting(req) => match self.submit(api, req, api_key).await {
                    SubmitOutcome::Immediate(url) => JobState::Done(Ok(url)),
                    SubmitOutcome::Accepted(job_id) => JobState::Polling {
                        handle: JobHandle::new(job_id),
                        polls: 0,
                    },
                    SubmitOutcome::Failed(e) => JobState::Done(Err(e)),
                },
                JobState::Polling { handle, polls } if polls >= self.policy.max_polls => {
                    tracing::warn!(
                        provider,
                        job_id = handle.job_id,
                        polls,
                        elapsed_ms = handle.submitted_at.elapsed().as_millis() as u64,
                        "poll budget exhausted"
                    );
                    JobState::Done(Err(SketchbookError::Timeout {
                        provider: provider.to_string(),
                        job_id: handle.job_id,
                        polls,
                    }))
                }
                JobState::Polling { handle, polls } => {
                    tokio::time::sleep(self.policy.interval).await;
                    let polls = polls + 1;

                    match self.fetch(api, &handle.job_id, api_key).await {
                        PollStatus::InProgress => {
                            tracing::debug!(
                                provider,
                                job_id = handle.job_id,
                                polls,
                                max_polls = self.policy.max_polls,
                                "job still in progress"
                            );
                            JobState::Polling { handle, polls }
                        }
                        PollStatus::Completed(url) => {
                            tracing::info!(
                                provider,
                                job_id = handle.job_id,
                                polls,
                                elapsed_ms = handle.submitted_at.elapsed().as_millis() as u64,
                                "generation job completed"
                            );
                            JobState::Done(Ok(url))
                        }
                        PollStatus::Failed(e) => {
                            tracing::warn!(
                                provider,
                                job_id = handle.job_id,
                                polls,
                                reason = e.reason(),
                                "poll failed: {e}"
                            );
                            JobState::Done(Err(e))
                        }
                    }
                }
                JobState::Done(result) => return result,
            };
        }
    }
}

/// Whether `err` carries the provider's "generation failed" signature in its
/// message or HTTP body.
pub fn has_signature(err: &SketchbookError, signature: &str) -> bool {
    err.provider_message()
        .is_some_and(|msg| msg.contains(signature))
}

/// Shorthand for a GET/POST call with a JSON content type.
pub(crate) fn json_call(
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<serde_json::Value>,
) -> JobCall {
    let mut headers = headers;
    if body.is_some() {
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
    }
    JobCall {
        method,
        url,
        headers,
        body,
    }
}
