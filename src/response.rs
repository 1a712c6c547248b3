use serde::Serialize;

/// Field value used for every text field of a batch item that failed.
pub const FAILURE_PLACEHOLDER: &str = "처리 실패";

/// A generated picture-diary entry.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DiaryEntry {
    pub title: String,
    pub content: String,
    pub image_url: String,
}

/// One slot of a batch diary response, tagged with its input position.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BatchDiaryItem {
    pub text_index: usize,
    pub title: String,
    pub content: String,
    pub image_url: String,
}

impl BatchDiaryItem {
    pub fn success(text_index: usize, entry: DiaryEntry) -> Self {
        Self {
            text_index,
            title: entry.title,
            content: entry.content,
            image_url: entry.image_url,
        }
    }

    /// Placeholder for an input whose generation failed.
    pub fn failed(text_index: usize) -> Self {
        Self {
            text_index,
            title: FAILURE_PLACEHOLDER.to_string(),
            content: FAILURE_PLACEHOLDER.to_string(),
            image_url: FAILURE_PLACEHOLDER.to_string(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.title == FAILURE_PLACEHOLDER && self.image_url == FAILURE_PLACEHOLDER
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BatchDiaryResponse {
    pub results: Vec<BatchDiaryItem>,
}

/// Outcome of a pipeline that always answers with an explicit status.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AnimationResponse {
    pub video_url: String,
    pub status: Status,
    pub message: String,
}

impl AnimationResponse {
    pub fn success(video_url: String) -> Self {
        Self {
            video_url,
            status: Status::Success,
            message: "animation completed".to_string(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            video_url: String::new(),
            status: Status::Error,
            message: format!("animation failed: {message}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CharacterResponse {
    pub character_image_url: String,
    pub status: Status,
    pub message: String,
}

impl CharacterResponse {
    pub fn success(character_image_url: String) -> Self {
        Self {
            character_image_url,
            status: Status::Success,
            message: "character image created".to_string(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            character_image_url: String::new(),
            status: Status::Error,
            message: format!("character generation failed: {message}"),
        }
    }
}

/// Uniform error body for failed web requests.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub status: Status,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status: Status::Error,
            message: if message.trim().is_empty() {
                "unknown error".to_string()
            } else {
                message
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeleteResponse {
    pub deleted: bool,
}
