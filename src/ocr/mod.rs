//! OCR backends and the health-checked gateway that selects between them.
//!
//! Two interchangeable backends implement [`OcrBackend`]:
//!
//! - [`LocalOcrBackend`] — in-process tesseract invocation, always available
//!   wherever the binary is installed
//! - [`RemoteOcrBackend`] — a networked OCR service, health-checked before
//!   every use because service health changes between calls
//!
//! [`OcrGateway`] owns the selection policy: bounded retries on the primary
//! backend with a fixed inter-attempt delay, then a single attempt on a
//! distinct fallback. Backends are stateless and `Send + Sync`, so one
//! gateway serves any number of concurrent extraction requests.

mod gateway;
mod local;
mod remote;

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::OcrError;

pub use gateway::{OcrGateway, OcrGatewayConfig, ServiceStatus};
pub use local::LocalOcrBackend;
pub use remote::RemoteOcrBackend;

/// Result of one OCR extraction call.
#[derive(Debug, Clone)]
pub struct OcrOutcome {
    /// Raw extracted text, uncleaned.
    pub text: String,
    /// Backend confidence in `0..=1`.
    pub confidence: f32,
    pub processing_time_ms: u64,
    /// Name of the backend that produced this result.
    pub service: String,
    /// Backend-specific extras (word counts, model info, …).
    pub metadata: Value,
}

/// Capability contract shared by all OCR backends.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    /// Stable backend name used in results, status reports, and errors.
    fn name(&self) -> &'static str;

    /// True when availability is a static property of the host (a local
    /// binary) rather than something that must be probed per call.
    fn is_always_available(&self) -> bool;

    /// Probe the backend's health. Called before every use for networked
    /// backends; trivially true for local ones.
    async fn check_health(&self) -> bool;

    /// Extract text from a single page image.
    async fn extract_text(&self, image_path: &Path) -> Result<OcrOutcome, OcrError>;
}
