//! # examscan
//!
//! Extract structured exam questions from scanned exam-paper PDFs via OCR
//! and LLMs.
//!
//! ## Why this crate?
//!
//! Scanned exam papers are images of forms, tables, maps, and numbered
//! questions — far beyond what template-based parsers can handle reliably.
//! Instead this crate OCRs each page, hands the cleaned text to an LLM with
//! a section-specific extraction prompt, and then *repairs* the model's
//! output: an eight-stage deterministic pipeline merges duplicated parts,
//! fills missing fields, wires map images into place, and renumbers every
//! question, so callers always receive a schema-consistent document plus an
//! explicit list of anything a human still needs to fix.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Rasterise  pdfium renders pages to PNG (CPU-bound, spawn_blocking)
//!  ├─ 2. OCR        gateway picks remote/local backend, health-checked,
//!  │                bounded retries with fallback
//!  ├─ 3. Images     map/diagram detection + centre crop + upload
//!  ├─ 4. Clean      deterministic OCR text repair (idempotent)
//!  ├─ 5. LLM        structured extraction, 3 attempts, 4-stage JSON repair
//!  ├─ 6. Normalise  8-stage post-processing to a consistent schema
//!  └─ 7. Respond    {success, structure, uploadedImages, validation}
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use examscan::{
//!     BuiltinPrompts, ChatApiClient, ChatApiConfig, ExtractionConfig, Extractor,
//!     LocalImageStore, LocalOcrBackend, OcrGateway, PdfiumRasterizer, RemoteOcrBackend,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractionConfig::default();
//!     let remote = Arc::new(RemoteOcrBackend::new("http://ocr.internal:8080")?);
//!     let local = Arc::new(LocalOcrBackend::new());
//!     let gateway = Arc::new(OcrGateway::new(remote, Some(local), config.ocr.clone()));
//!
//!     let llm = Arc::new(ChatApiClient::new(ChatApiConfig {
//!         base_url: "http://localhost:11434/v1".into(),
//!         model: "llama3.2".into(),
//!         api_key: None,
//!     })?);
//!
//!     let extractor = Extractor::new(
//!         Arc::new(PdfiumRasterizer),
//!         gateway,
//!         llm,
//!         Arc::new(BuiltinPrompts),
//!         Arc::new(LocalImageStore::new("./uploads", "/uploads")),
//!         config,
//!     );
//!
//!     let response = extractor.extract("listening-test-1.pdf").await?;
//!     println!("{}", serde_json::to_string_pretty(&response)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Error model
//!
//! Anything repairable is repaired silently (missing fields, dash
//! punctuation, fabricated numbering). Only the total failure of an external
//! dependency — both OCR backends exhausted, LLM retry budget spent — is an
//! `Err`; per-field gaps come back inside `validation.errors` on a success
//! response for a human reviewer.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod llm;
pub mod model;
pub mod ocr;
pub mod pipeline;
pub mod prompts;
pub mod rasterize;
pub mod storage;
pub mod textrepair;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder};
pub use error::{ExtractError, LlmError, OcrError};
pub use extract::{extract_structure, Extractor};
pub use llm::{ChatApiClient, ChatApiConfig, ChatCompletion, CompletionOptions};
pub use model::{
    Answer, ExamDocument, ExtractionResponse, InputType, Part, Question, QuestionType, Section,
    UploadedImage, ValidationReport,
};
pub use ocr::{
    LocalOcrBackend, OcrBackend, OcrGateway, OcrGatewayConfig, OcrOutcome, RemoteOcrBackend,
    ServiceStatus,
};
pub use prompts::{BuiltinPrompts, DirPromptProvider, PromptProvider};
pub use rasterize::{PageRasterizer, PdfiumRasterizer};
pub use storage::{ImageStore, LocalImageStore};
pub use textrepair::{clean_ocr_text, parse_json_safely};
