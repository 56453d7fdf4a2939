//! Error types for the examscan library.
//!
//! Three layers reflect three distinct failure scopes:
//!
//! * [`ExtractError`] — **Fatal**: the extraction request cannot produce a
//!   document at all (bad input file, both OCR backends down, LLM retry
//!   budget exhausted). Returned as `Err(ExtractError)` from the top-level
//!   [`crate::extract::Extractor`] entry points.
//!
//! * [`OcrError`] / [`LlmError`] — **Leaf**: a single backend call failed.
//!   These are retried or routed to a fallback by the OCR gateway and the
//!   extraction orchestrator; only exhaustion of the whole policy promotes
//!   them into an `ExtractError`.
//!
//! Defects the pipeline can repair locally (missing fields, bad punctuation,
//! inconsistent numbering) never appear here at all — they are fixed
//! silently or reported in [`crate::model::ValidationReport`] with the
//! response still returned.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the examscan library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// pdfium returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── OCR errors ────────────────────────────────────────────────────────
    /// Both the primary and fallback OCR backends are exhausted.
    ///
    /// Carries the last underlying error message from each backend that was
    /// actually attempted, so operators can tell a dead remote service from
    /// a missing local binary.
    #[error("All OCR backends exhausted.\nPrimary ({primary}): {primary_error}\nFallback: {fallback_error}")]
    OcrUnavailable {
        primary: String,
        primary_error: String,
        fallback_error: String,
    },

    // ── LLM / parsing errors ──────────────────────────────────────────────
    /// All four JSON-repair stages failed on the LLM output.
    ///
    /// `excerpt` holds at most 200 characters of the offending text.
    #[error("Failed to parse JSON ({context}): {excerpt}")]
    JsonParse { context: String, excerpt: String },

    /// The chat completion returned no content.
    #[error("LLM returned an empty completion")]
    EmptyLlmResponse,

    /// The orchestrator's retry budget is exhausted.
    #[error("Structured extraction failed after {attempts} attempts: {last_error}")]
    ExtractionFailed { attempts: u32, last_error: String },

    /// The configured prompt for a section could not be loaded.
    #[error("No extraction prompt available for section '{section}': {detail}")]
    PromptUnavailable { section: String, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A single OCR backend call failure.
///
/// Handled by [`crate::ocr::OcrGateway`]; promoted to
/// [`ExtractError::OcrUnavailable`] only when every backend is exhausted.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The backend cannot run at all (binary missing, endpoint unset).
    #[error("OCR backend not available: {0}")]
    BackendUnavailable(String),

    /// The backend ran but extraction failed.
    #[error("OCR extraction failed: {0}")]
    ExtractionFailed(String),

    /// The remote backend answered with a non-success HTTP status.
    #[error("OCR service returned HTTP {status}: {body}")]
    ServiceError { status: u16, body: String },

    /// Network-level failure talking to the remote backend.
    #[error("OCR service unreachable: {0}")]
    Connection(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A single chat-completion call failure.
///
/// Handled by the extraction orchestrator's retry loop.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Network-level failure reaching the completion endpoint.
    #[error("LLM endpoint unreachable: {0}")]
    Connection(String),

    /// The endpoint answered with a non-success HTTP status.
    #[error("LLM API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    /// The completion response body did not match the expected shape.
    #[error("Malformed LLM response: {0}")]
    MalformedResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ocr_unavailable_carries_both_errors() {
        let e = ExtractError::OcrUnavailable {
            primary: "remote".into(),
            primary_error: "connection refused".into(),
            fallback_error: "tesseract not found".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("connection refused"));
        assert!(msg.contains("tesseract not found"));
    }

    #[test]
    fn json_parse_display_includes_context() {
        let e = ExtractError::JsonParse {
            context: "listening extraction".into(),
            excerpt: "not json at all".into(),
        };
        assert!(e.to_string().contains("listening extraction"));
    }

    #[test]
    fn extraction_failed_display() {
        let e = ExtractError::ExtractionFailed {
            attempts: 3,
            last_error: "empty completion".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("empty completion"));
    }

    #[test]
    fn ocr_service_error_display() {
        let e = OcrError::ServiceError {
            status: 503,
            body: "overloaded".into(),
        };
        assert!(e.to_string().contains("503"));
    }
}
