//! Configuration for an extraction request.
//!
//! All tunable behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Keeping every knob in one struct
//! makes it trivial to share configs across requests, log them, and diff
//! two runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A ten-field constructor is unreadable and breaks on every new field. The
//! builder lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

use std::time::Duration;

use crate::error::ExtractError;
use crate::model::Section;
use crate::ocr::OcrGatewayConfig;

/// Configuration for a single exam-paper extraction.
///
/// Built via [`ExtractionConfig::builder()`] or
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use examscan::{ExtractionConfig, Section};
///
/// let config = ExtractionConfig::builder()
///     .section(Section::Reading)
///     .test("3")
///     .llm_max_attempts(3)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Which exam section this paper belongs to. Default: Listening.
    ///
    /// Drives prompt selection, the document's default `section` field, and
    /// the section slug in generated question ids.
    pub section: Section,

    /// Test identifier within its series. Default: `"1"`.
    pub test: String,

    /// OCR retry policy handed to the gateway: attempts on the primary
    /// backend (default 2) and the fixed delay between them (default 1 s).
    pub ocr: OcrGatewayConfig,

    /// Total LLM call attempts, including the first. Default: 3.
    ///
    /// Each attempt is a fresh completion — a new call can return different
    /// (and parseable) output where the last one did not.
    pub llm_max_attempts: u32,

    /// Delay before retrying after a JSON parse failure. Default: 1 s.
    ///
    /// Parse failures are model quirks, not service problems; there is
    /// nothing to wait out, so the delay is short.
    pub parse_retry_delay: Duration,

    /// Delay before retrying after a transport/API failure or an empty
    /// completion. Default: 2 s.
    ///
    /// Long enough for a briefly overloaded endpoint to recover, short
    /// enough to keep the worst case (two failures) under five seconds.
    pub transport_retry_delay: Duration,

    /// Sampling temperature for the extraction completion. Default: 0.1.
    ///
    /// Extraction wants transcription, not creativity; near-zero keeps the
    /// output stable across runs of the same paper.
    pub temperature: f32,

    /// Output token cap per completion. Default: 4096.
    ///
    /// A dense 40-question paper serialises to roughly 3 000 tokens of
    /// JSON; setting this too low truncates mid-object and forces a retry.
    pub max_tokens: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            section: Section::Listening,
            test: "1".to_string(),
            ocr: OcrGatewayConfig::default(),
            llm_max_attempts: 3,
            parse_retry_delay: Duration::from_secs(1),
            transport_retry_delay: Duration::from_secs(2),
            temperature: 0.1,
            max_tokens: 4096,
        }
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn section(mut self, section: Section) -> Self {
        self.config.section = section;
        self
    }

    pub fn test(mut self, test: impl Into<String>) -> Self {
        self.config.test = test.into();
        self
    }

    pub fn ocr_max_retries(mut self, n: u32) -> Self {
        self.config.ocr.max_retries = n.max(1);
        self
    }

    pub fn ocr_retry_delay(mut self, delay: Duration) -> Self {
        self.config.ocr.retry_delay = delay;
        self
    }

    pub fn llm_max_attempts(mut self, n: u32) -> Self {
        self.config.llm_max_attempts = n.max(1);
        self
    }

    pub fn parse_retry_delay(mut self, delay: Duration) -> Self {
        self.config.parse_retry_delay = delay;
        self
    }

    pub fn transport_retry_delay(mut self, delay: Duration) -> Self {
        self.config.transport_retry_delay = delay;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.config.max_tokens = n;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.test.trim().is_empty() {
            return Err(ExtractError::InvalidConfig(
                "test identifier must not be empty".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(ExtractError::InvalidConfig(
                "max_tokens must be at least 1".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let c = ExtractionConfig::default();
        assert_eq!(c.section, Section::Listening);
        assert_eq!(c.test, "1");
        assert_eq!(c.ocr.max_retries, 2);
        assert_eq!(c.ocr.retry_delay, Duration::from_secs(1));
        assert_eq!(c.llm_max_attempts, 3);
        assert_eq!(c.parse_retry_delay, Duration::from_secs(1));
        assert_eq!(c.transport_retry_delay, Duration::from_secs(2));
        assert_eq!(c.temperature, 0.1);
    }

    #[test]
    fn builder_clamps_attempts_to_minimum_one() {
        let c = ExtractionConfig::builder()
            .llm_max_attempts(0)
            .ocr_max_retries(0)
            .build()
            .unwrap();
        assert_eq!(c.llm_max_attempts, 1);
        assert_eq!(c.ocr.max_retries, 1);
    }

    #[test]
    fn empty_test_id_rejected() {
        let err = ExtractionConfig::builder().test("  ").build().unwrap_err();
        assert!(matches!(err, ExtractError::InvalidConfig(_)));
    }
}
