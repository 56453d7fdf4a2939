//! Remote OCR backend: a networked extraction service over HTTP.
//!
//! The service exposes `GET /health` and `POST /ocr` (base64 image in,
//! text + confidence out). Health is probed with a short 5-second timeout
//! before every use — the gateway, not this backend, decides what an
//! unhealthy probe means. Extraction calls get a longer 30-second budget
//! since large scanned pages are slow to process server-side.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{OcrBackend, OcrOutcome};
use crate::error::OcrError;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const EXTRACT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP OCR service backend.
pub struct RemoteOcrBackend {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct OcrRequest {
    image: String,
    filename: String,
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    text: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    metadata: serde_json::Value,
}

impl RemoteOcrBackend {
    /// Create a backend for the service at `base_url` (no trailing slash).
    pub fn new(base_url: impl Into<String>) -> Result<Self, OcrError> {
        let client = reqwest::Client::builder()
            .timeout(EXTRACT_TIMEOUT)
            .build()
            .map_err(|e| OcrError::BackendUnavailable(format!("HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl OcrBackend for RemoteOcrBackend {
    fn name(&self) -> &'static str {
        "remote-ocr"
    }

    fn is_always_available(&self) -> bool {
        false
    }

    async fn check_health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => {
                let healthy = resp.status().is_success();
                debug!("OCR health check {}: {}", url, resp.status());
                healthy
            }
            Err(e) => {
                warn!("OCR health check failed: {e}");
                false
            }
        }
    }

    async fn extract_text(&self, image_path: &Path) -> Result<OcrOutcome, OcrError> {
        let start = Instant::now();
        let bytes = tokio::fs::read(image_path).await?;
        let filename = image_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "page.png".to_string());

        let request = OcrRequest {
            image: STANDARD.encode(&bytes),
            filename,
        };

        let resp = self
            .client
            .post(format!("{}/ocr", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| OcrError::Connection(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(OcrError::ServiceError {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let parsed: OcrResponse = resp
            .json()
            .await
            .map_err(|e| OcrError::ExtractionFailed(format!("malformed OCR response: {e}")))?;

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(
            "remote OCR: {} chars, confidence {:.2}, {}ms",
            parsed.text.len(),
            parsed.confidence,
            elapsed
        );

        Ok(OcrOutcome {
            text: parsed.text,
            confidence: parsed.confidence.clamp(0.0, 1.0),
            processing_time_ms: elapsed,
            service: self.name().to_string(),
            metadata: if parsed.metadata.is_null() {
                json!({})
            } else {
                parsed.metadata
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_normalised() {
        let backend = RemoteOcrBackend::new("http://ocr.internal:8080/").unwrap();
        assert_eq!(backend.base_url, "http://ocr.internal:8080");
    }

    #[test]
    fn remote_backend_must_be_probed() {
        let backend = RemoteOcrBackend::new("http://ocr.internal:8080").unwrap();
        assert!(!backend.is_always_available());
        assert_eq!(backend.name(), "remote-ocr");
    }
}
