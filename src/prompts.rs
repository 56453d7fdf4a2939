//! System prompts for structured exam extraction.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — adjusting what the model is asked to
//!    extract for a section means editing exactly one constant.
//!
//! 2. **Testability** — unit tests can inspect prompts directly without a
//!    live LLM, so prompt regressions are caught cheaply.
//!
//! [`PromptProvider`] is the collaborator seam: the built-in
//! [`BuiltinPrompts`] serves the compiled-in constants, while
//! [`DirPromptProvider`] loads `<dir>/<section>.txt` for deployments that
//! manage prompts in external storage.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::ExtractError;
use crate::model::Section;

/// System prompt for Listening-section papers.
pub const LISTENING_PROMPT: &str = r#"You are an exam digitisation assistant. Convert the OCR text of an IELTS-style Listening paper into JSON.

Produce a single JSON object with this shape:
{"test": "<test number>", "section": "Listening", "parts": [{"part": <n>, "instructions": "<text>", "questionsRange": "<start>-<end>", "questions": [...]}]}

Each question object carries: "questionId" ("listening-<test>-<part>-<number>"), "number", "type" (one of form-fill, multiple-choice, multi-select, matching, map-labelling, short-answer, sentence-completion), "questionText", and "answer" ({"correct": "", "accepted": []}).

Rules:
1. Keep every question you find; never invent questions that are not in the text.
2. Copy instruction lines (e.g. "Write NO MORE THAN TWO WORDS") into the part's "instructions".
3. For matching exercises, emit one question per numbered item and a {"type": "divider", "draggableVariants": [...]} entry listing the shared options once.
4. For multiple-choice questions list the choices under "options".
5. Output ONLY the JSON object. No commentary, no markdown fences."#;

/// System prompt for Reading-section papers.
pub const READING_PROMPT: &str = r#"You are an exam digitisation assistant. Convert the OCR text of an IELTS-style Reading paper into JSON.

Produce a single JSON object with this shape:
{"test": "<test number>", "section": "Reading", "parts": [{"part": <n>, "instructions": "<text>", "questionsRange": "<start>-<end>", "questions": [...]}]}

Each question object carries: "questionId" ("reading-<test>-<part>-<number>"), "number", "type", "questionText", and "answer" ({"correct": "", "accepted": []}). The passage text itself belongs in the part's "instructions", not in question text.

Rules:
1. Keep every question you find; never invent questions that are not in the text.
2. True/False/Not Given items are "multiple-choice" with those three options.
3. Summary and sentence completion gaps are "sentence-completion".
4. Output ONLY the JSON object. No commentary, no markdown fences."#;

/// System prompt for Writing-section papers.
pub const WRITING_PROMPT: &str = r#"You are an exam digitisation assistant. Convert the OCR text of an IELTS-style Writing paper into JSON.

Produce a single JSON object with this shape:
{"test": "<test number>", "section": "Writing", "parts": [{"part": <n>, "instructions": "<task prompt>", "questionsRange": "<n>-<n>", "questions": [...]}]}

Each task is one question: "questionId" ("writing-<test>-<part>-<number>"), "number", "type": "short-answer", "questionText" (the full task statement), and "answer" ({"correct": "", "accepted": []}).

Rules:
1. A Writing paper has exactly one task per part.
2. Include word-count requirements in "answerConstraints".
3. Output ONLY the JSON object. No commentary, no markdown fences."#;

/// Collaborator that supplies the section-specific extraction prompt.
#[async_trait]
pub trait PromptProvider: Send + Sync {
    async fn prompt_for(&self, section: Section) -> Result<String, ExtractError>;
}

/// Serves the compiled-in prompt constants.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinPrompts;

#[async_trait]
impl PromptProvider for BuiltinPrompts {
    async fn prompt_for(&self, section: Section) -> Result<String, ExtractError> {
        let prompt = match section {
            Section::Listening => LISTENING_PROMPT,
            Section::Reading => READING_PROMPT,
            Section::Writing => WRITING_PROMPT,
        };
        Ok(prompt.to_string())
    }
}

/// Loads prompts from `<dir>/<section>.txt`, for deployments that edit
/// prompts without recompiling.
pub struct DirPromptProvider {
    dir: PathBuf,
}

impl DirPromptProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl PromptProvider for DirPromptProvider {
    async fn prompt_for(&self, section: Section) -> Result<String, ExtractError> {
        let path = self.dir.join(format!("{}.txt", section.slug()));
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ExtractError::PromptUnavailable {
                section: section.slug().to_string(),
                detail: format!("{}: {e}", path.display()),
            })
    }
}
