//! Generation pipelines exposed to the web layer.
//!
//! Each pipeline is generate (submit, poll, retry) followed by transfer into
//! durable storage. Pipelines own their request data; they share only the
//! pooled HTTP clients and the storage handle.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::batch::{BatchPolicy, run_batch};
use crate::config::{Config, IllustrationBackend, StorageBackend};
use crate::diary::{diary_prompt, illustration_prompt, parse_diary};
use crate::dispatch::async_poll::{AsyncPollDispatch, JobApi};
use crate::dispatch::http::{ChatEndpoint, ChatOptions, HttpDispatch};
use crate::dispatch::modelslab::{ModelsLabApi, ModelsLabEndpoint};
use crate::dispatch::openai::OpenAiImagesApi;
use crate::dispatch::retry::RetryPolicy;
use crate::dispatch::{AssetKind, GenerationRequest};
use crate::error::SketchbookError;
use crate::response::{AnimationResponse, BatchDiaryItem, CharacterResponse, DiaryEntry};
use crate::storage::fs::FsObjectStore;
use crate::storage::memory::MemoryObjectStore;
use crate::storage::{ObjectStore, Placement, Storage, StoredAsset};
use crate::transfer::ArtifactTransfer;

pub const VIDEO_DIR: &str = "videos";
pub const CHARACTER_DIR: &str = "characters";
pub const DIARY_DIR: &str = "diaries";
pub const UPLOAD_DIR: &str = "uploads";

/// A configured generation provider: API adapter, credentials and model.
#[derive(Clone)]
pub struct JobProvider {
    pub api: Arc<dyn JobApi>,
    pub api_key: String,
    pub model: String,
}

impl std::fmt::Debug for JobProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobProvider")
            .field("provider", &self.api.provider())
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Which pipelines have credentials.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct PipelineStatus {
    pub diary: bool,
    pub animation: bool,
    pub character: bool,
}

pub struct GenerationService {
    jobs: AsyncPollDispatch,
    chat: HttpDispatch,
    transfer: ArtifactTransfer,
    retry: RetryPolicy,
    batch: BatchPolicy,
    text: Option<ChatEndpoint>,
    text_options: ChatOptions,
    illustration: Option<JobProvider>,
    illustration_size: String,
    video: Option<JobProvider>,
    character: Option<JobProvider>,
}

impl GenerationService {
    /// Build every pipeline from `config`, including the storage backend.
    pub fn from_config(config: &Config) -> Result<Self, SketchbookError> {
        let store: Arc<dyn ObjectStore> = match config.storage.backend {
            StorageBackend::Fs => Arc::new(FsObjectStore::new(config.storage.root.clone())),
            StorageBackend::Memory => Arc::new(MemoryObjectStore::new()),
        };
        Self::with_store(config, store)
    }

    /// Build every pipeline from `config` on top of an existing store.
    pub fn with_store(
        config: &Config,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self, SketchbookError> {
        let storage = Arc::new(Storage::new(store, config.storage.policy.clone())?);

        let modelslab = |endpoint: ModelsLabEndpoint, model: &str| {
            config.modelslab_api_key.as_ref().map(|key| JobProvider {
                api: Arc::new(ModelsLabApi::with_base_url(
                    endpoint,
                    config.modelslab_base_url.clone(),
                )) as Arc<dyn JobApi>,
                api_key: key.clone(),
                model: model.to_string(),
            })
        };

        let text = config.openai_api_key.as_ref().map(|key| ChatEndpoint {
            provider: "openai".to_string(),
            url: config.text.url.clone(),
            model: config.text.model.clone(),
            api_key: key.clone(),
        });

        let illustration = match config.illustration.backend {
            IllustrationBackend::OpenAi => config.openai_api_key.as_ref().map(|key| JobProvider {
                api: Arc::new(OpenAiImagesApi::with_base_url(config.openai_base_url.clone()))
                    as Arc<dyn JobApi>,
                api_key: key.clone(),
                model: config.illustration.model.clone(),
            }),
            IllustrationBackend::ModelsLab => {
                modelslab(ModelsLabEndpoint::TextToImage, &config.illustration.model)
            }
        };

        Ok(Self {
            jobs: AsyncPollDispatch::new(config.poll.clone()),
            chat: HttpDispatch::new(),
            transfer: ArtifactTransfer::new(storage),
            retry: config.retry.clone(),
            batch: config.batch.clone(),
            text,
            text_options: ChatOptions {
                temperature: config.text.temperature,
                max_tokens: config.text.max_tokens,
            },
            illustration,
            illustration_size: config.illustration.size.clone(),
            video: modelslab(ModelsLabEndpoint::ImageToVideo, &config.video_model),
            character: modelslab(ModelsLabEndpoint::ImageToImage, &config.character_model),
        })
    }

    pub fn storage(&self) -> &Arc<Storage> {
        self.transfer.storage()
    }

    pub fn pipelines(&self) -> PipelineStatus {
        PipelineStatus {
            diary: self.text.is_some() && self.illustration.is_some(),
            animation: self.video.is_some(),
            character: self.character.is_some(),
        }
    }

    /// Generate with retries, then move the result into storage.
    async fn generate_and_store(
        &self,
        provider: &JobProvider,
        req: GenerationRequest,
        kind: AssetKind,
        placement: &Placement,
    ) -> Result<StoredAsset, SketchbookError> {
        let remote = self
            .jobs
            .generate(&*provider.api, &req, &provider.api_key, &self.retry)
            .await?;
        self.transfer.transfer(&remote, kind, placement).await
    }

    // -----------------------------------------------------------------------
    // Diary
    // -----------------------------------------------------------------------

    /// Write a picture-diary entry for `text` and illustrate it. Text and
    /// image are generated concurrently.
    pub async fn generate_illustration(&self, text: &str) -> Result<DiaryEntry, SketchbookError> {
        let endpoint = self.text.as_ref().ok_or_else(|| {
            SketchbookError::Config("CHAT_GPT_API_KEY is not set".to_string())
        })?;
        let illustrator = self.illustration.as_ref().ok_or_else(|| {
            SketchbookError::Config("no illustration provider credentials".to_string())
        })?;

        let diary = async {
            let reply = self
                .chat
                .complete(endpoint, &diary_prompt(text), self.text_options)
                .await?;
            parse_diary(&reply)
        };

        let request = GenerationRequest::new(&illustrator.model, illustration_prompt(text))
            .with_size(&self.illustration_size);
        let placement = Placement::permanent(DIARY_DIR);
        let image = self.generate_and_store(illustrator, request, AssetKind::Image, &placement);

        match tokio::join!(diary, image) {
            (Ok(diary), Ok(stored)) => Ok(DiaryEntry {
                title: diary.title,
                content: diary.content,
                image_url: stored.url,
            }),
            (Err(e), Ok(stored)) => {
                // The entry is unusable without its text; drop the orphaned image.
                self.storage().delete_by_url(&stored.url).await;
                Err(e)
            }
            (_, Err(e)) => Err(e),
        }
    }

    /// Diary entries for many texts, in input order. Failed items carry the
    /// failure placeholder instead of aborting the batch.
    pub async fn run_batch(&self, texts: Vec<String>) -> Vec<BatchDiaryItem> {
        tracing::info!(count = texts.len(), "diary batch received");

        run_batch(&self.batch, texts, |index, text| async move {
            match self.generate_illustration(&text).await {
                Ok(entry) => BatchDiaryItem::success(index, entry),
                Err(e) => {
                    tracing::error!(
                        text_index = index,
                        provider = e.provider().unwrap_or("none"),
                        reason = e.reason(),
                        "diary generation failed: {e}"
                    );
                    BatchDiaryItem::failed(index)
                }
            }
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Animation
    // -----------------------------------------------------------------------

    pub async fn try_animate(
        &self,
        image_url: &str,
        prompt: &str,
    ) -> Result<StoredAsset, SketchbookError> {
        let provider = self.video.as_ref().ok_or_else(|| {
            SketchbookError::Config("MODELSLAB_API_KEY is not set".to_string())
        })?;
        let request = GenerationRequest::new(&provider.model, prompt).with_init_image(image_url);
        self.generate_and_store(
            provider,
            request,
            AssetKind::Video,
            &Placement::permanent(VIDEO_DIR),
        )
        .await
    }

    /// Animate the image at `image_url`. Always answers with an explicit status.
    pub async fn animate(&self, image_url: &str, prompt: &str) -> AnimationResponse {
        let start = Instant::now();
        tracing::info!(image_url, prompt = preview(prompt), "animation started");

        match self.try_animate(image_url, prompt).await {
            Ok(stored) => {
                tracing::info!(
                    url = stored.url,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "animation finished"
                );
                AnimationResponse::success(stored.url)
            }
            Err(e) => {
                tracing::error!(
                    provider = e.provider().unwrap_or("none"),
                    reason = e.reason(),
                    "animation failed: {e}"
                );
                AnimationResponse::error(e.user_message())
            }
        }
    }

    /// Stage an uploaded image so the provider can fetch it, animate it, then
    /// delete the staged copy.
    pub async fn animate_upload(
        &self,
        image: Vec<u8>,
        content_type: &str,
        prompt: &str,
    ) -> AnimationResponse {
        let staged = match self.stage_upload(image, content_type).await {
            Ok(staged) => staged,
            Err(e) => return AnimationResponse::error(e.user_message()),
        };
        let response = self.animate(&staged.url, prompt).await;
        self.release_upload(&staged).await;
        response
    }

    // -----------------------------------------------------------------------
    // Character
    // -----------------------------------------------------------------------

    pub async fn try_stylize(
        &self,
        image_url: &str,
        prompt: &str,
    ) -> Result<StoredAsset, SketchbookError> {
        let provider = self.character.as_ref().ok_or_else(|| {
            SketchbookError::Config("MODELSLAB_API_KEY is not set".to_string())
        })?;
        let request = GenerationRequest::new(&provider.model, prompt).with_init_image(image_url);
        self.generate_and_store(
            provider,
            request,
            AssetKind::Image,
            &Placement::permanent(CHARACTER_DIR),
        )
        .await
    }

    /// Turn the image at `image_url` into a character image.
    pub async fn stylize(&self, image_url: &str, prompt: &str) -> CharacterResponse {
        let start = Instant::now();
        tracing::info!(image_url, prompt = preview(prompt), "character generation started");

        match self.try_stylize(image_url, prompt).await {
            Ok(stored) => {
                tracing::info!(
                    url = stored.url,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "character generation finished"
                );
                CharacterResponse::success(stored.url)
            }
            Err(e) => {
                tracing::error!(
                    provider = e.provider().unwrap_or("none"),
                    reason = e.reason(),
                    "character generation failed: {e}"
                );
                CharacterResponse::error(e.user_message())
            }
        }
    }

    pub async fn stylize_upload(
        &self,
        image: Vec<u8>,
        content_type: &str,
        prompt: &str,
    ) -> CharacterResponse {
        let staged = match self.stage_upload(image, content_type).await {
            Ok(staged) => staged,
            Err(e) => return CharacterResponse::error(e.user_message()),
        };
        let response = self.stylize(&staged.url, prompt).await;
        self.release_upload(&staged).await;
        response
    }

    // -----------------------------------------------------------------------
    // Storage
    // -----------------------------------------------------------------------

    async fn stage_upload(
        &self,
        image: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredAsset, SketchbookError> {
        let ext = upload_extension(content_type).ok_or_else(|| {
            SketchbookError::Upload(format!("unsupported image type: {content_type}"))
        })?;
        if image.is_empty() {
            return Err(SketchbookError::Upload("empty image".to_string()));
        }
        self.storage()
            .store(image, &Placement::temporary(UPLOAD_DIR), ext, content_type)
            .await
    }

    /// Single delete of a staged upload; failure is logged, not raised.
    async fn release_upload(&self, staged: &StoredAsset) {
        if !self.storage().delete_by_url(&staged.url).await {
            tracing::warn!(key = staged.backing_key, "failed to delete staged upload");
        }
    }

    /// Delete a stored asset by its URL. False when nothing was deleted.
    pub async fn delete_asset(&self, url: &str) -> bool {
        self.storage().delete_by_url(url).await
    }
}

/// File extension for an accepted upload content type.
pub fn upload_extension(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next().unwrap_or("").trim();
    match mime.to_ascii_lowercase().as_str() {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

fn preview(prompt: &str) -> String {
    prompt.chars().take(100).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_extension_accepts_common_images() {
        assert_eq!(upload_extension("image/png"), Some("png"));
        assert_eq!(upload_extension("IMAGE/JPEG; charset=binary"), Some("jpg"));
        assert_eq!(upload_extension("image/webp"), Some("webp"));
        assert_eq!(upload_extension("image/gif"), None);
        assert_eq!(upload_extension(""), None);
    }
}
