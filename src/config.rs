use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::batch::BatchPolicy;
use crate::dispatch::async_poll::PollPolicy;
use crate::dispatch::retry::RetryPolicy;
use crate::error::SketchbookError;
use crate::storage::{Delivery, StoragePolicy};

/// Default config file, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "sketchbook.toml";

/// Which provider draws diary illustrations.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IllustrationBackend {
    /// OpenAI Images (synchronous).
    #[default]
    OpenAi,
    /// ModelsLab text2img (may queue and poll).
    ModelsLab,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Fs,
    Memory,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextConfig {
    /// Full OpenAI-compatible chat-completions URL.
    pub url: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllustrationConfig {
    pub backend: IllustrationBackend,
    pub model: String,
    pub size: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory of the filesystem backend.
    pub root: PathBuf,
    pub policy: StoragePolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Serve the filesystem storage root under `/media`.
    pub serve_media: bool,
}

/// Process-wide configuration, built once at startup and passed into the
/// service. Absent provider keys leave the matching pipelines unconfigured.
#[derive(Clone)]
pub struct Config {
    pub modelslab_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub modelslab_base_url: String,
    pub openai_base_url: String,
    pub text: TextConfig,
    pub illustration: IllustrationConfig,
    /// ModelsLab model for image-to-video.
    pub video_model: String,
    /// ModelsLab model for character stylization.
    pub character_model: String,
    pub poll: PollPolicy,
    pub retry: RetryPolicy,
    pub batch: BatchPolicy,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |k: &Option<String>| if k.is_some() { "[REDACTED]" } else { "<unset>" };
        f.debug_struct("Config")
            .field("modelslab_api_key", &redact(&self.modelslab_api_key))
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("modelslab_base_url", &self.modelslab_base_url)
            .field("openai_base_url", &self.openai_base_url)
            .field("text", &self.text)
            .field("illustration", &self.illustration)
            .field("video_model", &self.video_model)
            .field("character_model", &self.character_model)
            .field("poll", &self.poll)
            .field("retry", &self.retry)
            .field("batch", &self.batch)
            .field("storage", &self.storage)
            .field("server", &self.server)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            modelslab_api_key: None,
            openai_api_key: None,
            modelslab_base_url: crate::dispatch::modelslab::DEFAULT_BASE_URL.to_string(),
            openai_base_url: crate::dispatch::openai::DEFAULT_BASE_URL.to_string(),
            text: TextConfig {
                url: format!("{}/chat/completions", crate::dispatch::openai::DEFAULT_BASE_URL),
                model: "gpt-4o".to_string(),
                temperature: 0.7,
                max_tokens: 300,
            },
            illustration: IllustrationConfig {
                backend: IllustrationBackend::OpenAi,
                model: "dall-e-3".to_string(),
                size: "1792x1024".to_string(),
            },
            video_model: "seedance-i2v".to_string(),
            character_model: "flux-kontext-dev".to_string(),
            poll: PollPolicy::default(),
            retry: RetryPolicy::default(),
            batch: BatchPolicy::default(),
            storage: StorageConfig {
                backend: StorageBackend::Fs,
                root: PathBuf::from("media"),
                policy: StoragePolicy::default(),
            },
            server: ServerConfig {
                bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
                serve_media: true,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// TOML file layout. Every field is optional; unset fields keep defaults.
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub providers: ProvidersSection,
    pub text: TextSection,
    pub illustration: IllustrationSection,
    pub jobs: JobsSection,
    pub batch: BatchSection,
    pub storage: StorageSection,
    pub server: ServerSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvidersSection {
    pub modelslab_base_url: Option<String>,
    pub openai_base_url: Option<String>,
    pub video_model: Option<String>,
    pub character_model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TextSection {
    pub url: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IllustrationSection {
    pub backend: Option<IllustrationBackend>,
    pub model: Option<String>,
    pub size: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobsSection {
    pub poll_interval_secs: Option<u64>,
    pub max_polls: Option<u32>,
    pub max_attempts: Option<u32>,
    pub retry_delay_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchSection {
    pub group_size: Option<usize>,
    pub cooldown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    pub backend: Option<StorageBackend>,
    pub root: Option<PathBuf>,
    pub public_base_url: Option<String>,
    pub cdn_domain: Option<String>,
    pub temp_prefix: Option<String>,
    pub permanent_delivery: Option<Delivery>,
    pub temporary_delivery: Option<Delivery>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub bind_addr: Option<String>,
    pub serve_media: Option<bool>,
}

impl FileConfig {
    pub fn parse(text: &str) -> Result<Self, SketchbookError> {
        toml::from_str(text)
            .map_err(|e| SketchbookError::Config(format!("invalid config file: {e}")))
    }

    /// Read `path`; a missing file yields the defaults.
    pub fn read(path: &Path) -> Result<Self, SketchbookError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(SketchbookError::Config(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }
}

impl Config {
    /// Load from the TOML file named by `SKETCHBOOK_CONFIG` (or
    /// `sketchbook.toml`) and the process environment.
    pub fn load() -> Result<Self, SketchbookError> {
        let path = env::var("SKETCHBOOK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        let file = FileConfig::read(&path)?;
        tracing::info!(path = %path.display(), "configuration loaded");
        Self::from_sources(file, |key| env::var(key).ok())
    }

    /// Merge defaults, file values, then environment overrides. `lookup`
    /// reads one environment variable, so tests can supply their own.
    pub fn from_sources(
        file: FileConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, SketchbookError> {
        let env = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Config::default();

        // --- Provider keys ---

        config.modelslab_api_key = env("MODELSLAB_API_KEY");
        if config.modelslab_api_key.is_none() {
            tracing::warn!(
                "MODELSLAB_API_KEY not set; animation and character pipelines unavailable"
            );
        }

        config.openai_api_key = env("CHAT_GPT_API_KEY").or_else(|| env("OPENAI_API_KEY"));
        if config.openai_api_key.is_none() {
            tracing::warn!("CHAT_GPT_API_KEY not set; diary generation unavailable");
        }

        // --- Providers ---

        let p = file.providers;
        if let Some(url) = p.modelslab_base_url {
            config.modelslab_base_url = url;
        }
        if let Some(url) = p.openai_base_url {
            config.text.url = format!("{}/chat/completions", url.trim_end_matches('/'));
            config.openai_base_url = url;
        }
        if let Some(model) = p.video_model {
            config.video_model = model;
        }
        if let Some(model) = p.character_model {
            config.character_model = model;
        }

        // --- Text ---

        let t = file.text;
        if let Some(url) = t.url {
            config.text.url = url;
        }
        if let Some(model) = t.model {
            config.text.model = model;
        }
        if let Some(temperature) = t.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(SketchbookError::Config(format!(
                    "text.temperature must be within 0.0..=2.0, got {temperature}"
                )));
            }
            config.text.temperature = temperature;
        }
        if let Some(max_tokens) = t.max_tokens {
            config.text.max_tokens = max_tokens;
        }

        // --- Illustration ---

        let i = file.illustration;
        if let Some(backend) = i.backend {
            config.illustration.backend = backend;
            if backend == IllustrationBackend::ModelsLab {
                config.illustration.model = "flux".to_string();
                config.illustration.size = "1024x768".to_string();
            }
        }
        if let Some(model) = i.model {
            config.illustration.model = model;
        }
        if let Some(size) = i.size {
            config.illustration.size = size;
        }

        // --- Jobs ---

        let j = file.jobs;
        if let Some(secs) = j.poll_interval_secs {
            config.poll.interval = Duration::from_secs(secs);
        }
        if let Some(max_polls) = j.max_polls {
            config.poll.max_polls = max_polls;
        }
        if let Some(max_attempts) = j.max_attempts {
            config.retry.max_attempts = max_attempts;
        }
        if let Some(secs) = j.retry_delay_secs {
            config.retry.initial_delay = Duration::from_secs(secs);
        }

        // --- Batch ---

        if let Some(group_size) = file.batch.group_size {
            if group_size == 0 {
                return Err(SketchbookError::Config(
                    "batch.group_size must be at least 1".to_string(),
                ));
            }
            config.batch.group_size = group_size;
        }
        if let Some(secs) = file.batch.cooldown_secs {
            config.batch.cooldown = Duration::from_secs(secs);
        }

        // --- Storage ---

        let s = file.storage;
        if let Some(backend) = s.backend {
            config.storage.backend = backend;
        }
        if let Some(backend) = env("STORAGE_BACKEND") {
            config.storage.backend = match backend.to_ascii_lowercase().as_str() {
                "fs" => StorageBackend::Fs,
                "memory" => StorageBackend::Memory,
                other => {
                    return Err(SketchbookError::Config(format!(
                        "unknown STORAGE_BACKEND: {other}"
                    )));
                }
            };
        }
        if let Some(root) = env("STORAGE_ROOT").map(PathBuf::from).or(s.root) {
            config.storage.root = root;
        }
        if let Some(url) = env("STORAGE_PUBLIC_BASE_URL").or(s.public_base_url) {
            config.storage.policy.public_base_url = url;
        }
        config.storage.policy.cdn_domain = env("STORAGE_CDN_DOMAIN").or(s.cdn_domain);
        if let Some(prefix) = s.temp_prefix {
            config.storage.policy.temp_prefix = prefix;
        }
        if let Some(delivery) = s.permanent_delivery {
            config.storage.policy.permanent_delivery = delivery;
        }
        if let Some(delivery) = s.temporary_delivery {
            config.storage.policy.temporary_delivery = delivery;
        }

        // --- Server ---

        if let Some(addr) = env("BIND_ADDR").or(file.server.bind_addr) {
            config.server.bind_addr = addr
                .parse()
                .map_err(|e| SketchbookError::Config(format!("invalid bind address {addr}: {e}")))?;
        }
        if let Some(serve) = file.server.serve_media {
            config.server.serve_media = serve;
        }

        Ok(config)
    }
}
