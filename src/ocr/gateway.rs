//! Backend selection policy: retries on the primary, fallback on exhaustion.
//!
//! ## Why health-check before every use?
//!
//! The remote OCR service sits behind a network that can partition, restart,
//! or saturate between two requests. A startup-only probe would route every
//! later request into a dead backend's retry loop, so the gateway probes
//! immediately before each use and skips straight to the fallback — without
//! consuming any retry budget — when the probe fails.
//!
//! Retry delays are fixed (1 s), not exponential: there is exactly one
//! in-flight OCR call per request, so there is no herd to spread out, and a
//! bounded worst-case latency matters more than politeness here.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{OcrBackend, OcrOutcome};
use crate::error::ExtractError;

/// Retry policy knobs for the gateway.
#[derive(Debug, Clone)]
pub struct OcrGatewayConfig {
    /// Extraction attempts on the primary backend. Default: 2.
    pub max_retries: u32,
    /// Fixed delay between primary attempts. Default: 1 s.
    pub retry_delay: Duration,
}

impl Default for OcrGatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Operational snapshot for health dashboards. Not used for correctness.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub primary: String,
    pub fallback: Option<String>,
    /// Probe result for the networked backend, if one is configured.
    pub remote_reachable: Option<bool>,
    /// Whether an always-available (local) backend is configured.
    pub local_available: bool,
}

/// Selects between the configured OCR backends with retry and fallback.
pub struct OcrGateway {
    primary: Arc<dyn OcrBackend>,
    fallback: Option<Arc<dyn OcrBackend>>,
    config: OcrGatewayConfig,
}

impl OcrGateway {
    pub fn new(
        primary: Arc<dyn OcrBackend>,
        fallback: Option<Arc<dyn OcrBackend>>,
        config: OcrGatewayConfig,
    ) -> Self {
        Self {
            primary,
            fallback,
            config,
        }
    }

    /// Extract text from one page image.
    ///
    /// Attempts the primary backend up to `max_retries` times with a fixed
    /// inter-attempt delay. A networked primary that fails its health probe
    /// is skipped entirely — no retry budget is spent on a backend known to
    /// be down. A distinct fallback backend gets exactly one attempt.
    /// Returns [`ExtractError::OcrUnavailable`] carrying the last error from
    /// each attempted backend only when everything is exhausted.
    pub async fn extract_text(&self, image_path: &std::path::Path) -> Result<OcrOutcome, ExtractError> {
        let primary_error: String;

        if !self.primary.is_always_available() && !self.primary.check_health().await {
            warn!(
                "primary OCR backend '{}' unhealthy, skipping to fallback",
                self.primary.name()
            );
            primary_error = "health check failed".to_string();
        } else {
            let mut last_error = String::new();
            for attempt in 1..=self.config.max_retries {
                match self.primary.extract_text(image_path).await {
                    Ok(outcome) => {
                        debug!(
                            "OCR succeeded on '{}' (attempt {attempt})",
                            self.primary.name()
                        );
                        return Ok(outcome);
                    }
                    Err(e) => {
                        warn!(
                            "OCR attempt {attempt}/{} on '{}' failed: {e}",
                            self.config.max_retries,
                            self.primary.name()
                        );
                        last_error = e.to_string();
                    }
                }
                if attempt < self.config.max_retries {
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
            primary_error = last_error;
        }

        let fallback_error = match self.distinct_fallback() {
            Some(fallback) => {
                if !fallback.is_always_available() && !fallback.check_health().await {
                    warn!("fallback OCR backend '{}' unhealthy", fallback.name());
                    "health check failed".to_string()
                } else {
                    info!("falling back to OCR backend '{}'", fallback.name());
                    match fallback.extract_text(image_path).await {
                        Ok(outcome) => return Ok(outcome),
                        Err(e) => e.to_string(),
                    }
                }
            }
            None => "no fallback configured".to_string(),
        };

        Err(ExtractError::OcrUnavailable {
            primary: self.primary.name().to_string(),
            primary_error,
            fallback_error,
        })
    }

    /// Report backend configuration and reachability.
    pub async fn service_status(&self) -> ServiceStatus {
        let mut remote_reachable = None;
        for backend in self.backends() {
            if !backend.is_always_available() {
                remote_reachable = Some(backend.check_health().await);
            }
        }
        ServiceStatus {
            primary: self.primary.name().to_string(),
            fallback: self.fallback.as_ref().map(|b| b.name().to_string()),
            remote_reachable,
            local_available: self.backends().any(|b| b.is_always_available()),
        }
    }

    /// The fallback, unless it is the same backend as the primary.
    fn distinct_fallback(&self) -> Option<&Arc<dyn OcrBackend>> {
        self.fallback
            .as_ref()
            .filter(|f| f.name() != self.primary.name())
    }

    fn backends(&self) -> impl Iterator<Item = &Arc<dyn OcrBackend>> {
        std::iter::once(&self.primary).chain(self.fallback.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OcrError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeBackend {
        name: &'static str,
        always_available: bool,
        healthy: bool,
        succeed: bool,
        extract_calls: AtomicUsize,
        health_calls: AtomicUsize,
    }

    impl FakeBackend {
        fn new(name: &'static str, always_available: bool, healthy: bool, succeed: bool) -> Self {
            Self {
                name,
                always_available,
                healthy,
                succeed,
                extract_calls: AtomicUsize::new(0),
                health_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OcrBackend for FakeBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        fn is_always_available(&self) -> bool {
            self.always_available
        }

        async fn check_health(&self) -> bool {
            self.health_calls.fetch_add(1, Ordering::SeqCst);
            self.healthy
        }

        async fn extract_text(&self, _image_path: &Path) -> Result<OcrOutcome, OcrError> {
            self.extract_calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                Ok(OcrOutcome {
                    text: format!("text from {}", self.name),
                    confidence: 0.9,
                    processing_time_ms: 5,
                    service: self.name.to_string(),
                    metadata: json!({}),
                })
            } else {
                Err(OcrError::ExtractionFailed(format!("{} boom", self.name)))
            }
        }
    }

    fn fast_config() -> OcrGatewayConfig {
        OcrGatewayConfig {
            max_retries: 2,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn primary_success_never_touches_fallback() {
        let primary = Arc::new(FakeBackend::new("remote-ocr", false, true, true));
        let fallback = Arc::new(FakeBackend::new("tesseract", true, true, true));
        let gateway = OcrGateway::new(primary.clone(), Some(fallback.clone()), fast_config());

        let outcome = gateway.extract_text(Path::new("/tmp/p.png")).await.unwrap();
        assert_eq!(outcome.service, "remote-ocr");
        assert_eq!(fallback.extract_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unhealthy_remote_skips_to_fallback_without_extraction() {
        let primary = Arc::new(FakeBackend::new("remote-ocr", false, false, true));
        let fallback = Arc::new(FakeBackend::new("tesseract", true, true, true));
        let gateway = OcrGateway::new(primary.clone(), Some(fallback.clone()), fast_config());

        let outcome = gateway.extract_text(Path::new("/tmp/p.png")).await.unwrap();
        assert_eq!(outcome.service, "tesseract");
        // the unhealthy remote backend's extraction was never attempted
        assert_eq!(primary.extract_calls.load(Ordering::SeqCst), 0);
        assert_eq!(primary.health_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn primary_retried_then_fallback_attempted_once() {
        let primary = Arc::new(FakeBackend::new("remote-ocr", false, true, false));
        let fallback = Arc::new(FakeBackend::new("tesseract", true, true, true));
        let gateway = OcrGateway::new(primary.clone(), Some(fallback.clone()), fast_config());

        let outcome = gateway.extract_text(Path::new("/tmp/p.png")).await.unwrap();
        assert_eq!(outcome.service, "tesseract");
        assert_eq!(primary.extract_calls.load(Ordering::SeqCst), 2);
        assert_eq!(fallback.extract_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_reports_both_backend_errors() {
        let primary = Arc::new(FakeBackend::new("remote-ocr", false, true, false));
        let fallback = Arc::new(FakeBackend::new("tesseract", true, true, false));
        let gateway = OcrGateway::new(primary, Some(fallback), fast_config());

        let err = gateway
            .extract_text(Path::new("/tmp/p.png"))
            .await
            .unwrap_err();
        match err {
            ExtractError::OcrUnavailable {
                primary,
                primary_error,
                fallback_error,
            } => {
                assert_eq!(primary, "remote-ocr");
                assert!(primary_error.contains("remote-ocr boom"));
                assert!(fallback_error.contains("tesseract boom"));
            }
            other => panic!("expected OcrUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_fallback_configured_is_reported() {
        let primary = Arc::new(FakeBackend::new("remote-ocr", false, false, true));
        let gateway = OcrGateway::new(primary, None, fast_config());

        let err = gateway
            .extract_text(Path::new("/tmp/p.png"))
            .await
            .unwrap_err();
        match err {
            ExtractError::OcrUnavailable {
                primary_error,
                fallback_error,
                ..
            } => {
                assert_eq!(primary_error, "health check failed");
                assert_eq!(fallback_error, "no fallback configured");
            }
            other => panic!("expected OcrUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn same_backend_is_not_its_own_fallback() {
        let primary = Arc::new(FakeBackend::new("tesseract", true, true, false));
        let fallback = Arc::new(FakeBackend::new("tesseract", true, true, true));
        let gateway = OcrGateway::new(primary, Some(fallback.clone()), fast_config());

        let err = gateway.extract_text(Path::new("/tmp/p.png")).await;
        assert!(err.is_err());
        assert_eq!(fallback.extract_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn service_status_probes_remote() {
        let primary = Arc::new(FakeBackend::new("remote-ocr", false, false, true));
        let fallback = Arc::new(FakeBackend::new("tesseract", true, true, true));
        let gateway = OcrGateway::new(primary, Some(fallback), fast_config());

        let status = gateway.service_status().await;
        assert_eq!(status.primary, "remote-ocr");
        assert_eq!(status.fallback.as_deref(), Some("tesseract"));
        assert_eq!(status.remote_reachable, Some(false));
        assert!(status.local_available);
    }
}
