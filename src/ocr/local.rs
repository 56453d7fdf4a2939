//! Local OCR backend: tesseract via its command-line interface.
//!
//! The CLI is used instead of linking libtesseract so the backend works with
//! whatever tesseract the host has installed. TSV output gives per-word
//! confidences, which are averaged into the 0..1 confidence the gateway
//! contract requires. The subprocess call is CPU-bound and runs under
//! `spawn_blocking` so it never stalls the async runtime.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::{OcrBackend, OcrOutcome};
use crate::error::OcrError;

/// Tesseract-based OCR backend.
pub struct LocalOcrBackend {
    language: String,
}

impl LocalOcrBackend {
    pub fn new() -> Self {
        Self {
            language: "eng".to_string(),
        }
    }

    pub fn with_language(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }

    /// Whether the tesseract binary can be found on PATH.
    pub fn binary_available() -> bool {
        Command::new("tesseract")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn run_tesseract(image_path: &Path, language: &str) -> Result<(String, f32, usize), OcrError> {
        let output = Command::new("tesseract")
            .arg(image_path)
            .arg("stdout")
            .args(["-l", language])
            .arg("tsv")
            .output();

        let output = match output {
            Ok(o) => o,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OcrError::BackendUnavailable(
                    "tesseract not found (install tesseract-ocr)".to_string(),
                ));
            }
            Err(e) => return Err(OcrError::Io(e)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::ExtractionFailed(format!(
                "tesseract failed: {}",
                stderr.trim()
            )));
        }

        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
    }
}

impl Default for LocalOcrBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse tesseract TSV output into (text, mean confidence 0..1, word count).
///
/// TSV columns: level, page, block, par, line, word, left, top, width,
/// height, conf, text. Word rows are level 5; rows with conf -1 are layout
/// markers. Line numbers drive newline placement so the reconstructed text
/// keeps the page's line structure.
fn parse_tsv(tsv: &str) -> (String, f32, usize) {
    let mut text = String::new();
    let mut conf_sum = 0f32;
    let mut words = 0usize;
    let mut last_line: Option<(&str, &str, &str)> = None;

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let conf: f32 = cols[10].parse().unwrap_or(-1.0);
        let word = cols[11].trim();
        if conf < 0.0 || word.is_empty() {
            continue;
        }

        let line_key = (cols[2], cols[3], cols[4]);
        match last_line {
            Some(prev) if prev == line_key => text.push(' '),
            Some(_) => text.push('\n'),
            None => {}
        }
        last_line = Some(line_key);

        text.push_str(word);
        conf_sum += conf;
        words += 1;
    }

    let confidence = if words > 0 {
        (conf_sum / words as f32 / 100.0).clamp(0.0, 1.0)
    } else {
        0.0
    };
    (text, confidence, words)
}

#[async_trait]
impl OcrBackend for LocalOcrBackend {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn is_always_available(&self) -> bool {
        true
    }

    async fn check_health(&self) -> bool {
        true
    }

    async fn extract_text(&self, image_path: &Path) -> Result<OcrOutcome, OcrError> {
        let start = Instant::now();
        let path: PathBuf = image_path.to_path_buf();
        let language = self.language.clone();

        let (text, confidence, words) =
            tokio::task::spawn_blocking(move || Self::run_tesseract(&path, &language))
                .await
                .map_err(|e| OcrError::ExtractionFailed(format!("OCR task panicked: {e}")))??;

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(
            "tesseract: {} words, confidence {:.2}, {}ms",
            words, confidence, elapsed
        );

        Ok(OcrOutcome {
            text,
            confidence,
            processing_time_ms: elapsed,
            service: self.name().to_string(),
            metadata: json!({ "wordCount": words, "language": self.language }),
        })
    }
}
