//! The extraction orchestrator: PDF in, validated exam document out.
//!
//! ## Request flow
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Validate   magic-byte check on the input file
//!  ├─ 2. Rasterise  pdfium renders every page to PNG in a temp dir
//!  ├─ 3. OCR        gateway extracts text per page (retry + fallback)
//!  ├─ 4. Images     map detection, crop, upload per page
//!  ├─ 5. Clean      OCR text normalised into one line
//!  ├─ 6. LLM        structured extraction with retry + JSON repair
//!  ├─ 7. Pipeline   eight-stage normalisation + validation
//!  └─ 8. Response   {success, structure, uploadedImages, validation}
//! ```
//!
//! One request is one logical worker: pages are OCR'd sequentially and the
//! LLM call is a single in-flight request with sequential retries. All
//! collaborators are injected and stateless, so any number of requests can
//! run concurrently against the same `Extractor`. The page-image temp
//! directory is removed on success and failure alike — it lives in a
//! `TempDir` whose drop runs on every exit path.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::llm::{ChatCompletion, CompletionOptions};
use crate::model::{ExamDocument, ExtractionResponse, UploadedImage};
use crate::ocr::OcrGateway;
use crate::pipeline::images::{classify_as_map, crop_map_region};
use crate::pipeline::postprocess::{normalize_document, PipelineContext};
use crate::prompts::PromptProvider;
use crate::rasterize::PageRasterizer;
use crate::storage::ImageStore;
use crate::textrepair::{clean_ocr_text, parse_json_safely};

/// Drives one extraction request end to end.
///
/// Every external capability is a constructor-injected trait object — no
/// ambient singletons — so tests swap in fakes and deployments swap real
/// backends without touching the flow.
pub struct Extractor {
    rasterizer: Arc<dyn PageRasterizer>,
    ocr: Arc<OcrGateway>,
    llm: Arc<dyn ChatCompletion>,
    prompts: Arc<dyn PromptProvider>,
    store: Arc<dyn ImageStore>,
    config: ExtractionConfig,
}

impl Extractor {
    pub fn new(
        rasterizer: Arc<dyn PageRasterizer>,
        ocr: Arc<OcrGateway>,
        llm: Arc<dyn ChatCompletion>,
        prompts: Arc<dyn PromptProvider>,
        store: Arc<dyn ImageStore>,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            rasterizer,
            ocr,
            llm,
            prompts,
            store,
            config,
        }
    }

    /// Extract a structured exam document from a PDF file.
    ///
    /// Returns `Ok` with the response envelope even when validation found
    /// gaps — only total failures of an external dependency (both OCR
    /// backends down, LLM retries exhausted, unreadable input) are `Err`.
    pub async fn extract(&self, pdf_path: impl AsRef<Path>) -> Result<ExtractionResponse, ExtractError> {
        let total_start = Instant::now();
        let pdf_path = pdf_path.as_ref();
        info!("starting extraction: {}", pdf_path.display());

        // ── Step 1: Validate input ───────────────────────────────────────
        validate_pdf(pdf_path)?;

        // ── Step 2: Rasterise pages ──────────────────────────────────────
        // The TempDir is dropped (and deleted) on every path out of this
        // function, including errors.
        let page_dir = tempfile::tempdir()
            .map_err(|e| ExtractError::Internal(format!("temp dir: {e}")))?;
        let pages = self.rasterizer.rasterize(pdf_path, page_dir.path()).await?;
        info!("rasterised {} pages", pages.len());

        // ── Steps 3–4: OCR + page image handling, sequential per page ───
        let mut raw_text = String::new();
        let mut uploads: Vec<UploadedImage> = Vec::new();

        for (i, page_path) in pages.iter().enumerate() {
            let outcome = self.ocr.extract_text(page_path).await?;
            debug!(
                "page {}: {} chars via {} (confidence {:.2})",
                i + 1,
                outcome.text.len(),
                outcome.service,
                outcome.confidence
            );
            if !raw_text.is_empty() {
                raw_text.push_str("\n\n");
            }
            raw_text.push_str(&outcome.text);

            // Page image failures are logged and skipped, never fatal.
            if let Some(upload) = self.process_page_image(page_path, &outcome.text).await {
                uploads.push(upload);
            }
        }

        // ── Step 5: Clean OCR text ───────────────────────────────────────
        let cleaned = clean_ocr_text(&raw_text);
        debug!("cleaned OCR text: {} chars", cleaned.len());

        // ── Step 6: Structured extraction via LLM ────────────────────────
        let prompt = self.prompts.prompt_for(self.config.section).await?;
        let context = format!("{} extraction", self.config.section.slug());
        let raw_structure =
            extract_structure(self.llm.as_ref(), &prompt, &cleaned, &context, &self.config).await?;

        // The parsed value is untrusted; a shape mismatch degrades to an
        // empty document that the pipeline fills with defaults and the
        // validator reports on.
        let document: ExamDocument = serde_json::from_value(raw_structure).unwrap_or_else(|e| {
            warn!("LLM structure did not match the document shape: {e}");
            ExamDocument::default()
        });

        // ── Step 7: Post-processing pipeline ─────────────────────────────
        let ctx = PipelineContext {
            section: self.config.section,
            test: self.config.test.clone(),
        };
        let (document, validation) =
            normalize_document(document, &uploads, self.store.as_ref(), &ctx).await;
        if !validation.valid {
            warn!(
                "validation found {} issue(s); returning document for review",
                validation.errors.len()
            );
        }

        info!(
            "extraction complete: {} part(s), {} upload(s), {}ms",
            document.parts.as_ref().map_or(0, Vec::len),
            uploads.len(),
            total_start.elapsed().as_millis()
        );

        Ok(ExtractionResponse::success(document, uploads, validation))
    }

    /// Extract from PDF bytes in memory.
    ///
    /// Writes the bytes to a managed temp file that is cleaned up on return
    /// or panic. Recommended when the PDF arrives from an upload or a
    /// database rather than the filesystem.
    pub async fn extract_from_bytes(&self, bytes: &[u8]) -> Result<ExtractionResponse, ExtractError> {
        use std::io::Write;

        let mut tmp = tempfile::NamedTempFile::new()
            .map_err(|e| ExtractError::Internal(format!("tempfile: {e}")))?;
        tmp.write_all(bytes)
            .map_err(|e| ExtractError::Internal(format!("tempfile write: {e}")))?;
        let path = tmp.path().to_path_buf();
        // `tmp` is dropped (and the file deleted) when extract returns
        self.extract(&path).await
    }

    /// Classify, optionally crop, and upload one page image.
    ///
    /// Returns `None` on any failure — the page's text has already been
    /// captured, so a lost image only degrades the result.
    async fn process_page_image(&self, page_path: &Path, ocr_text: &str) -> Option<UploadedImage> {
        let is_map = classify_as_map(ocr_text);

        let upload_path = if is_map {
            let path = page_path.to_path_buf();
            match tokio::task::spawn_blocking(move || crop_map_region(&path)).await {
                Ok(cropped) => cropped,
                Err(e) => {
                    warn!("map crop task panicked: {e}");
                    page_path.to_path_buf()
                }
            }
        } else {
            page_path.to_path_buf()
        };

        let bytes = match tokio::fs::read(&upload_path).await {
            Ok(b) => b,
            Err(e) => {
                warn!("failed to read page image {}: {e}", upload_path.display());
                return None;
            }
        };

        let filename = upload_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "page.png".to_string());

        match self.store.store(&bytes, &filename).await {
            Ok(url) => Some(UploadedImage {
                url,
                filename,
                is_map,
            }),
            Err(e) => {
                warn!("failed to upload page image {filename}: {e}");
                None
            }
        }
    }
}

/// Drive the LLM call-and-parse loop.
///
/// Each attempt is a fresh completion — the model can produce parseable
/// output where the previous call did not. Delays are fixed and depend on
/// what failed: 1 s after a parse failure (a model quirk, nothing to wait
/// out), 2 s after a transport/API failure or an empty completion (give the
/// endpoint a moment). Exhausting the budget returns
/// [`ExtractError::ExtractionFailed`] with the attempt count and last error.
pub async fn extract_structure(
    llm: &dyn ChatCompletion,
    system_prompt: &str,
    ocr_text: &str,
    context: &str,
    config: &ExtractionConfig,
) -> Result<Value, ExtractError> {
    let options = CompletionOptions {
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };

    let mut last_error = String::new();
    let mut delay = config.transport_retry_delay;

    for attempt in 1..=config.llm_max_attempts {
        if attempt > 1 {
            tokio::time::sleep(delay).await;
        }

        match llm.complete(system_prompt, ocr_text, &options).await {
            Err(e) => {
                warn!("LLM attempt {attempt}/{}: {e}", config.llm_max_attempts);
                last_error = e.to_string();
                delay = config.transport_retry_delay;
            }
            Ok(text) if text.trim().is_empty() => {
                let e = ExtractError::EmptyLlmResponse;
                warn!("LLM attempt {attempt}/{}: {e}", config.llm_max_attempts);
                last_error = e.to_string();
                delay = config.transport_retry_delay;
            }
            Ok(text) => match parse_json_safely(&text, context) {
                Ok(value) => {
                    debug!("LLM attempt {attempt}: parsed structure");
                    return Ok(value);
                }
                Err(e) => {
                    warn!("LLM attempt {attempt}/{}: {e}", config.llm_max_attempts);
                    last_error = e.to_string();
                    delay = config.parse_retry_delay;
                }
            },
        }
    }

    Err(ExtractError::ExtractionFailed {
        attempts: config.llm_max_attempts,
        last_error,
    })
}

/// Check the file exists and starts with the PDF magic bytes.
fn validate_pdf(path: &Path) -> Result<(), ExtractError> {
    use std::io::Read;

    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => {
            return Err(ExtractError::FileNotFound {
                path: path.to_path_buf(),
            })
        }
    };

    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_err() || &magic != b"%PDF" {
        return Err(ExtractError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}
