//! PDF rasterisation: render every page to a PNG file on disk.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async
//! contexts. `tokio::task::spawn_blocking` moves the work onto the blocking
//! thread pool so rendering never stalls the Tokio worker threads.
//!
//! ## Why files rather than in-memory images?
//!
//! The OCR backends take an image *path* — the local backend hands it to a
//! subprocess, the remote backend streams it off disk — and the request's
//! temp directory already exists for cleanup purposes. Writing each page
//! once keeps every downstream consumer (OCR, map cropping, upload) working
//! from the same artifact.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pdfium_render::prelude::*;
use tracing::{debug, info};

use crate::error::ExtractError;

/// Longest rendered edge in pixels. Caps memory for oversized scans while
/// staying sharp enough for OCR.
const MAX_RENDER_PIXELS: i32 = 2000;

/// Rasteriser collaborator contract: one PDF in, ordered page images out.
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    async fn rasterize(
        &self,
        pdf_path: &Path,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, ExtractError>;
}

/// Built-in rasteriser backed by pdfium.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumRasterizer;

#[async_trait]
impl PageRasterizer for PdfiumRasterizer {
    async fn rasterize(
        &self,
        pdf_path: &Path,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, ExtractError> {
        let pdf = pdf_path.to_path_buf();
        let out = output_dir.to_path_buf();

        tokio::task::spawn_blocking(move || rasterize_blocking(&pdf, &out))
            .await
            .map_err(|e| ExtractError::Internal(format!("render task panicked: {e}")))?
    }
}

fn rasterize_blocking(pdf_path: &Path, output_dir: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let pdfium = Pdfium::default();

    let document =
        pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| ExtractError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: format!("{e:?}"),
            })?;

    let pages = document.pages();
    let total = pages.len() as usize;
    info!("PDF loaded: {} pages", total);

    let render_config = PdfRenderConfig::new()
        .set_target_width(MAX_RENDER_PIXELS)
        .set_maximum_height(MAX_RENDER_PIXELS);

    let mut paths = Vec::with_capacity(total);
    for idx in 0..total {
        let page = pages
            .get(idx as u16)
            .map_err(|e| ExtractError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{e:?}"),
            })?;

        let bitmap =
            page.render_with_config(&render_config)
                .map_err(|e| ExtractError::RasterisationFailed {
                    page: idx + 1,
                    detail: format!("{e:?}"),
                })?;

        let image = bitmap.as_image();
        let path = output_dir.join(format!("page-{}.png", idx + 1));
        image
            .save_with_format(&path, image::ImageFormat::Png)
            .map_err(|e| ExtractError::RasterisationFailed {
                page: idx + 1,
                detail: format!("save failed: {e}"),
            })?;

        debug!(
            "rendered page {} -> {} ({}x{} px)",
            idx + 1,
            path.display(),
            image.width(),
            image.height()
        );
        paths.push(path);
    }

    Ok(paths)
}
