//! The exam document schema.
//!
//! These types are the contract between the extraction core and its
//! downstream consumers (grading, rendering, the persistence layer). Field
//! names and nesting on the wire are fixed — everything serializes with
//! camelCase names, and [`ExtractionResponse`] reproduces the exact
//! `{success, structure, uploadedImages, validation}` /
//! `{success: false, error}` envelope those consumers depend on.
//!
//! Most fields are `Option` on purpose: the structs are populated directly
//! from repaired-but-untrusted LLM output, and the post-processing pipeline
//! (not serde) is responsible for filling defaults and reporting what is
//! still missing. Deserialisation therefore never fails on an absent field,
//! and unknown fields from the model are ignored.

use serde::{Deserialize, Serialize};

/// Exam section a document belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    #[default]
    Listening,
    Reading,
    Writing,
}

impl Section {
    /// Lowercase identifier used in question ids and prompt lookup.
    pub fn slug(&self) -> &'static str {
        match self {
            Section::Listening => "listening",
            Section::Reading => "reading",
            Section::Writing => "writing",
        }
    }

    /// Display name as it appears in the document's `section` field.
    pub fn display_name(&self) -> &'static str {
        match self {
            Section::Listening => "Listening",
            Section::Reading => "Reading",
            Section::Writing => "Writing",
        }
    }
}

impl std::str::FromStr for Section {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "listening" => Ok(Section::Listening),
            "reading" => Ok(Section::Reading),
            "writing" => Ok(Section::Writing),
            other => Err(format!("unknown section '{other}'")),
        }
    }
}

/// Discriminant of the question union.
///
/// `Unknown` absorbs any unrecognized string the model invents; the
/// defaulting stage replaces it via heuristic type inference, so a finished
/// document never contains it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionType {
    FormFill,
    MultipleChoice,
    MultiSelect,
    Matching,
    MapLabelling,
    ShortAnswer,
    SentenceCompletion,
    Divider,
    Image,
    #[serde(other)]
    Unknown,
}

impl QuestionType {
    /// Structural pseudo-questions that carry no answer of their own.
    pub fn is_structural(&self) -> bool {
        matches!(self, QuestionType::Divider | QuestionType::Image)
    }
}

/// How the test-taker enters an answer, derived from the question type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Text,
    Radio,
    Checkbox,
    Drag,
}

/// The correct answer plus accepted alternative spellings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Answer {
    pub correct: String,
    pub accepted: Vec<String>,
}

/// A single question (or divider/image pseudo-question) within a part.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Question {
    /// Hyphen-delimited id: `<section>-<test>-<part>-<number|range>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,

    /// Global question number; absent for divider/image questions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<u32>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub question_type: Option<QuestionType>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_type: Option<InputType>,

    /// Human-readable answer instruction, e.g. "Write NO MORE THAN TWO WORDS".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_constraints: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_interactive: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<Answer>,

    /// Drag labels shared across a part's matching questions; defined once
    /// on a divider and copied onto each matching question by the pipeline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draggable_variants: Option<Vec<String>>,

    /// Choice texts for multiple-choice / multi-select questions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,

    /// Covered range like "15-16" when one prompt spans several numbers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_range: Option<String>,

    // ── Image-type fields ────────────────────────────────────────────────
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,

    /// Inline base64 payload occasionally emitted by the model; stripped and
    /// persisted to storage by the pipeline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,

    // ── Content fields ───────────────────────────────────────────────────
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_text: Option<String>,
}

impl Question {
    /// True for questions a test-taker actually answers (not divider/image).
    pub fn is_interactive_kind(&self) -> bool {
        !self
            .question_type
            .map(|t| t.is_structural())
            .unwrap_or(false)
    }
}

/// A numbered section of the exam grouping questions and shared instructions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Covered question numbers, format `"<start>-<end>"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub questions_range: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub questions: Option<Vec<Question>>,
}

/// One extracted exam test, the unit the whole pipeline operates on.
///
/// Owned exclusively by a single extraction request; every pipeline stage
/// consumes the document by value and returns a new one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExamDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<Part>>,
}

/// A page image persisted for this request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedImage {
    pub url: String,
    pub filename: String,
    pub is_map: bool,
}

/// Outcome of the final validation stage.
///
/// `valid == false` does not abort the response; the document is returned
/// alongside the error list so a human editor can repair it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// The response envelope handed back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResponse {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub structure: Option<ExamDocument>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_images: Option<Vec<UploadedImage>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractionResponse {
    /// Successful envelope: `{success, structure, uploadedImages, validation}`.
    pub fn success(
        structure: ExamDocument,
        uploaded_images: Vec<UploadedImage>,
        validation: ValidationReport,
    ) -> Self {
        Self {
            success: true,
            structure: Some(structure),
            uploaded_images: Some(uploaded_images),
            validation: Some(validation),
            error: None,
        }
    }

    /// Failure envelope: `{success: false, error}`.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            structure: None,
            uploaded_images: None,
            validation: None,
            error: Some(error.into()),
        }
    }
}
