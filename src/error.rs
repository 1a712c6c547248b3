use thiserror::Error;

#[derive(Debug, Error)]
pub enum SketchbookError {
    /// Missing credentials, CDN domain, or an invalid storage policy.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP {status} from {provider}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("provider error from {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("unexpected response from {provider}: {message}")]
    Protocol { provider: String, message: String },

    #[error("{provider} job {job_id} still running after {polls} polls")]
    Timeout {
        provider: String,
        job_id: String,
        polls: u32,
    },

    #[error("download of {url} failed: {message}")]
    Download { url: String, message: String },

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("failed to parse diary text: {0}")]
    Parse(String),
}

impl SketchbookError {
    pub fn protocol(provider: &str, message: impl Into<String>) -> Self {
        Self::Protocol {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    /// Extract provider name from structured error variants.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Http { provider, .. } => Some(provider),
            Self::Provider { provider, .. } => Some(provider),
            Self::Protocol { provider, .. } => Some(provider),
            Self::Timeout { provider, .. } => Some(provider),
            _ => None,
        }
    }

    /// Text a provider attached to the failure, if any. Transient-failure
    /// predicates match against this.
    pub fn provider_message(&self) -> Option<&str> {
        match self {
            Self::Http { body, .. } => Some(body),
            Self::Provider { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Short machine-readable tag for logs and responses.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Http { .. } => "http",
            Self::Provider { .. } => "provider",
            Self::Protocol { .. } => "protocol",
            Self::Timeout { .. } => "timeout",
            Self::Download { .. } => "download",
            Self::Upload(_) => "upload",
            Self::Request(_) => "request",
            Self::Parse(_) => "parse",
        }
    }

    /// Status code the web layer answers with when this error ends a request.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Config(_) => 503,
            Self::Timeout { .. } => 504,
            Self::Upload(_) => 500,
            _ => 502,
        }
    }

    /// Produce a sanitized error message safe for returning to callers.
    /// Never includes API keys; upstream bodies are cut to a short preview.
    pub fn user_message(&self) -> String {
        match self {
            Self::Config(msg) => format!("service not configured: {msg}"),
            Self::Http {
                provider,
                status,
                body,
            } => {
                if body.trim().is_empty() {
                    format!("{provider} returned HTTP {status}")
                } else {
                    format!("{provider} returned HTTP {status}: {}", preview(body, 200))
                }
            }
            Self::Provider { provider, message } => {
                format!("{provider} failed: {}", preview(message, 200))
            }
            Self::Protocol { provider, .. } => {
                format!("unexpected response from {provider}")
            }
            Self::Timeout { provider, polls, .. } => {
                format!("{provider} did not finish after {polls} status checks")
            }
            Self::Download { message, .. } => format!("failed to download result: {message}"),
            Self::Upload(msg) => format!("failed to store result: {msg}"),
            Self::Request(_) => "request to provider failed".to_string(),
            Self::Parse(msg) => format!("failed to parse generated diary: {msg}"),
        }
    }
}

/// First `max` chars of `s`, with a trailing ellipsis when cut.
fn preview(s: &str, max: usize) -> String {
    let mut out: String = s.chars().take(max).collect();
    if out.len() < s.len() {
        out.push_str("...");
    }
    out
}
