//! CLI binary for examscan.
//!
//! A thin shim over the library crate that maps CLI flags to the extraction
//! collaborators and prints the response JSON.

use anyhow::{Context, Result};
use clap::Parser;
use examscan::{
    BuiltinPrompts, ChatApiClient, ChatApiConfig, DirPromptProvider, ExtractionConfig, Extractor,
    LocalImageStore, LocalOcrBackend, OcrBackend, OcrGateway, PdfiumRasterizer, PromptProvider,
    RemoteOcrBackend, Section,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "examscan",
    version,
    about = "Extract structured exam questions from scanned exam-paper PDFs"
)]
struct Cli {
    /// Path to the exam-paper PDF. Optional with --status.
    pdf: Option<PathBuf>,

    /// Exam section of the paper.
    #[arg(short, long, default_value = "listening")]
    section: Section,

    /// Test identifier within its series.
    #[arg(short, long, default_value = "1")]
    test: String,

    /// Remote OCR service base URL. When unset, only local tesseract runs.
    #[arg(long, env = "EXAMSCAN_OCR_ENDPOINT")]
    ocr_endpoint: Option<String>,

    /// Chat-completion endpoint base URL (OpenAI-compatible).
    #[arg(long, env = "EXAMSCAN_LLM_ENDPOINT", default_value = "http://localhost:11434/v1")]
    llm_endpoint: String,

    /// Model name for the chat completion.
    #[arg(short, long, env = "EXAMSCAN_MODEL", default_value = "llama3.2")]
    model: String,

    /// API key for the chat endpoint, if it needs one.
    #[arg(long, env = "EXAMSCAN_API_KEY")]
    api_key: Option<String>,

    /// Directory for stored page and inline images.
    #[arg(long, default_value = "./uploads")]
    upload_dir: PathBuf,

    /// Public URL prefix for stored images.
    #[arg(long, default_value = "/uploads")]
    upload_base: String,

    /// Directory of per-section prompt files (<section>.txt); built-in
    /// prompts are used when unset.
    #[arg(long)]
    prompt_dir: Option<PathBuf>,

    /// Write the response JSON here instead of stdout.
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Report OCR backend status and exit.
    #[arg(long)]
    status: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = ExtractionConfig::builder()
        .section(cli.section)
        .test(&cli.test)
        .build()
        .context("invalid configuration")?;

    if cli.ocr_endpoint.is_none() && !LocalOcrBackend::binary_available() {
        eprintln!("warning: tesseract not found on PATH and no --ocr-endpoint set; OCR will fail");
    }

    let local: Arc<dyn OcrBackend> = Arc::new(LocalOcrBackend::new());
    let gateway = match &cli.ocr_endpoint {
        Some(endpoint) => {
            let remote: Arc<dyn OcrBackend> =
                Arc::new(RemoteOcrBackend::new(endpoint.clone()).context("OCR endpoint")?);
            Arc::new(OcrGateway::new(remote, Some(local), config.ocr.clone()))
        }
        None => Arc::new(OcrGateway::new(local, None, config.ocr.clone())),
    };

    if cli.status {
        let status = gateway.service_status().await;
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let pdf = cli
        .pdf
        .clone()
        .context("a PDF path is required (or pass --status)")?;

    let llm = Arc::new(
        ChatApiClient::new(ChatApiConfig {
            base_url: cli.llm_endpoint.clone(),
            model: cli.model.clone(),
            api_key: cli.api_key.clone(),
        })
        .context("LLM client")?,
    );

    let prompts: Arc<dyn PromptProvider> = match &cli.prompt_dir {
        Some(dir) => Arc::new(DirPromptProvider::new(dir)),
        None => Arc::new(BuiltinPrompts),
    };

    let extractor = Extractor::new(
        Arc::new(PdfiumRasterizer),
        gateway,
        llm,
        prompts,
        Arc::new(LocalImageStore::new(&cli.upload_dir, &cli.upload_base)),
        config,
    );

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("Extracting {}", pdf.display()));
    spinner.enable_steady_tick(Duration::from_millis(80));

    let result = extractor.extract(&pdf).await;
    spinner.finish_and_clear();

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            eprintln!("extraction failed: {e}");
            let failure = examscan::ExtractionResponse::failure(e.to_string());
            println!("{}", serde_json::to_string_pretty(&failure)?);
            std::process::exit(1);
        }
    };

    if let Some(ref validation) = response.validation {
        if !validation.valid {
            eprintln!(
                "validation found {} issue(s); document returned for review:",
                validation.errors.len()
            );
            for error in &validation.errors {
                eprintln!("  - {error}");
            }
        }
    }

    let json = serde_json::to_string_pretty(&response)?;
    match cli.out {
        Some(path) => {
            std::fs::write(&path, &json)
                .with_context(|| format!("writing {}", path.display()))?;
            eprintln!("wrote {}", path.display());
        }
        None => println!("{json}"),
    }

    Ok(())
}
