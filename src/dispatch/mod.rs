pub mod async_poll;
pub mod http;
pub mod modelslab;
pub mod openai;
pub mod retry;

use std::time::Instant;

/// Read `response` to the end but keep at most `cap` bytes. The flag is set
/// when the body was longer and reading stopped at the cap.
pub(crate) async fn read_capped(
    mut response: reqwest::Response,
    cap: usize,
) -> Result<(Vec<u8>, bool), reqwest::Error> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let room = cap - body.len();
        if chunk.len() > room {
            body.extend_from_slice(&chunk[..room]);
            return Ok((body, true));
        }
        body.extend_from_slice(&chunk);
    }
    Ok((body, false))
}

/// Provider-agnostic generation payload. Each `JobApi` maps it onto its own
/// request body; fields a provider does not understand are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    /// Publicly fetchable source image (image-to-video, image-to-image).
    pub init_image: Option<String>,
    /// Output size hint, e.g. "1024x1024".
    pub size: Option<String>,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            init_image: None,
            size: None,
        }
    }

    pub fn with_init_image(mut self, url: impl Into<String>) -> Self {
        self.init_image = Some(url.into());
        self
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }
}

/// A provider job that was accepted for background processing.
/// Owned by exactly one poller and dropped when polling ends.
#[derive(Debug)]
pub struct JobHandle {
    pub job_id: String,
    pub submitted_at: Instant,
}

impl JobHandle {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            submitted_at: Instant::now(),
        }
    }
}

/// Kind of media a pipeline produces. Drives content type and file extension
/// when the result is re-uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Image,
    Video,
}

impl AssetKind {
    /// Extension and content type for an asset at `url`. The URL's own
    /// extension wins when it is one we recognize for this kind.
    pub fn file_type_for(&self, url: &str) -> (&'static str, &'static str) {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let ext = path
            .rsplit('/')
            .next()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());

        let known = match (self, ext.as_deref()) {
            (Self::Image, Some("png")) => Some(("png", "image/png")),
            (Self::Image, Some("jpg" | "jpeg")) => Some(("jpg", "image/jpeg")),
            (Self::Image, Some("webp")) => Some(("webp", "image/webp")),
            (Self::Image, Some("gif")) => Some(("gif", "image/gif")),
            (Self::Video, Some("mp4")) => Some(("mp4", "video/mp4")),
            (Self::Video, Some("webm")) => Some(("webm", "video/webm")),
            (Self::Video, Some("mov")) => Some(("mov", "video/quicktime")),
            (Self::Video, Some("gif")) => Some(("gif", "image/gif")),
            _ => None,
        };

        known.unwrap_or(match self {
            Self::Image => ("png", "image/png"),
            Self::Video => ("mp4", "video/mp4"),
        })
    }
}
