//! Wire types for the `generateContent` family of endpoints.

use serde::{Deserialize, Serialize};

use crate::domain::ports::{LanguageModelError, Role, Turn};

#[derive(Debug, Serialize)]
pub(super) struct GenerateRequestDto<'a> {
    pub(super) contents: Vec<ContentDto<'a>>,
}

#[derive(Debug, Serialize)]
pub(super) struct ContentDto<'a> {
    pub(super) role: &'static str,
    pub(super) parts: [PartDto<'a>; 1],
}

#[derive(Debug, Serialize)]
pub(super) struct PartDto<'a> {
    pub(super) text: &'a str,
}

impl<'a> GenerateRequestDto<'a> {
    /// History in order, then `prompt` as the newest user turn.
    pub(super) fn new(prompt: &'a str, history: &'a [Turn]) -> Self {
        let turn = |role: Role, text: &'a str| ContentDto {
            role: match role {
                Role::User => "user",
                Role::Model => "model",
            },
            parts: [PartDto { text }],
        };
        let contents = history
            .iter()
            .map(|entry| turn(entry.role, entry.text.as_str()))
            .chain(std::iter::once(turn(Role::User, prompt)))
            .collect();
        Self { contents }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GenerateResponseDto {
    #[serde(default)]
    candidates: Vec<CandidateDto>,
    prompt_feedback: Option<PromptFeedbackDto>,
}

#[derive(Debug, Deserialize)]
struct CandidateDto {
    content: Option<CandidateContentDto>,
}

#[derive(Debug, Deserialize)]
struct CandidateContentDto {
    #[serde(default)]
    parts: Vec<ResponsePartDto>,
}

#[derive(Debug, Deserialize)]
struct ResponsePartDto {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedbackDto {
    block_reason: Option<String>,
}

impl GenerateResponseDto {
    /// Text of the first candidate; empty when the chunk carries none.
    pub(super) fn into_text(self) -> Result<String, LanguageModelError> {
        if let Some(reason) = self
            .prompt_feedback
            .and_then(|feedback| feedback.block_reason)
        {
            return Err(LanguageModelError::blocked(reason));
        }
        Ok(self
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Decode one response document.
pub(super) fn parse_response(body: &[u8]) -> Result<String, LanguageModelError> {
    let decoded: GenerateResponseDto = serde_json::from_slice(body).map_err(|err| {
        LanguageModelError::response(format!("invalid generateContent payload: {err}"))
    })?;
    decoded.into_text()
}
