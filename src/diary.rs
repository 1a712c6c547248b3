//! Picture-diary prompts and parsing of the generated diary text.

use serde::Deserialize;

use crate::error::SketchbookError;

/// Title and body of a generated diary entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiaryText {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

/// Prompt asking a chat model for a child's picture-diary entry as bare JSON.
pub fn diary_prompt(text: &str) -> String {
    format!(
        r#"{text}
내용을 바탕으로 초등학생 그림일기를 작성해줘. ~했다. 식으로 적어줘

예시처럼 **JSON만** 응답해줘. (맨 앞에 json, 설명, 코드블록, 마크다운, 줄바꿈 등 아무것도 붙이지 마!)
{{
    "title": "제목 (15자 이내)",
    "content": "일기 내용 (100자 이내)"
}}"#
    )
}

/// Prompt for the diary illustration.
pub fn illustration_prompt(text: &str) -> String {
    format!(
        "{text}의 내용에 맞는 2D 만화 그림체로 그림을 그려줘.\n\
         둥글둥글하고 따뜻한 색감, 동화적인 스타일로 표현해줘.\n\
         내용에 들어가지 않는 가상의 인물들은 추가하지 마세요.\n\
         최대한 그림에 글자를 넣지 마세요."
    )
}

/// Parse a model reply into a diary entry. Tolerates a surrounding
/// ```json fence and leading/trailing chatter around the JSON object.
pub fn parse_diary(reply: &str) -> Result<DiaryText, SketchbookError> {
    let cleaned = strip_code_fence(reply);

    let diary: DiaryText = match serde_json::from_str(cleaned) {
        Ok(diary) => diary,
        Err(first_err) => {
            // Fall back to the outermost {...} span.
            let span = cleaned
                .find('{')
                .zip(cleaned.rfind('}'))
                .filter(|(start, end)| start < end)
                .map(|(start, end)| &cleaned[start..=end])
                .ok_or_else(|| SketchbookError::Parse(first_err.to_string()))?;
            serde_json::from_str(span).map_err(|e| SketchbookError::Parse(e.to_string()))?
        }
    };

    if diary.title.trim().is_empty() && diary.content.trim().is_empty() {
        return Err(SketchbookError::Parse(
            "reply has neither a title nor content".to_string(),
        ));
    }
    Ok(diary)
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}
