//! Map/diagram detection and cropping for page images.
//!
//! Listening papers embed maps and floor plans that map-labelling questions
//! refer to. Detection is a fixed keyword table over the page's OCR text —
//! deliberately dumb, deliberately replaceable: the table lives in one const
//! and the match in one function, so a trained classifier can slot in
//! without touching the pipeline.
//!
//! Cropping assumes the map sits centred on the page with margin noise
//! (headers, question numbers) around it, and cuts the centred 80 %-width ×
//! 60 %-height region. Any processing failure falls back to the original
//! image — a full page with margins still beats no image.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Keywords whose presence in a page's OCR text flags it as a map/diagram
/// candidate. Matched case-insensitively as substrings.
pub const MAP_KEYWORDS: &[&str] = &[
    "map",
    "plan",
    "diagram",
    "floor plan",
    "museum",
    "entrance",
    "reception",
    "corridor",
    "stairs",
    "lift",
    "car park",
    "parking",
    "north",
    "south",
    "east",
    "west",
];

/// Fraction of the page width kept by the crop.
const CROP_WIDTH_RATIO: f64 = 0.8;
/// Fraction of the page height kept by the crop.
const CROP_HEIGHT_RATIO: f64 = 0.6;

/// Classify a page as a map/diagram candidate from its OCR text.
pub fn classify_as_map(ocr_text: &str) -> bool {
    let lower = ocr_text.to_lowercase();
    MAP_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Crop the centred map region out of a page image.
///
/// Writes `<stem>-map.png` next to the source image and returns its path.
/// On any failure (unreadable image, unwritable directory) the original
/// path is returned unchanged — cropping is an enhancement, never a
/// requirement.
pub fn crop_map_region(image_path: &Path) -> PathBuf {
    match try_crop(image_path) {
        Ok(cropped) => cropped,
        Err(e) => {
            warn!(
                "map crop failed for {}, using original: {e}",
                image_path.display()
            );
            image_path.to_path_buf()
        }
    }
}

fn try_crop(image_path: &Path) -> Result<PathBuf, image::ImageError> {
    let img = image::open(image_path)?;
    let (width, height) = (img.width(), img.height());

    let crop_w = (width as f64 * CROP_WIDTH_RATIO) as u32;
    let crop_h = (height as f64 * CROP_HEIGHT_RATIO) as u32;
    let x = (width - crop_w) / 2;
    let y = (height - crop_h) / 2;

    let cropped = img.crop_imm(x, y, crop_w, crop_h);

    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "page".to_string());
    let out = image_path.with_file_name(format!("{stem}-map.png"));
    cropped.save_with_format(&out, image::ImageFormat::Png)?;

    debug!(
        "cropped map region {}x{} at ({x},{y}) -> {}",
        crop_w,
        crop_h,
        out.display()
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbaImage};

    #[test]
    fn keyword_match_is_case_insensitive() {
        assert!(classify_as_map("Label the MAP below"));
        assert!(classify_as_map("The Floor Plan of the museum"));
        assert!(classify_as_map("turn left at the entrance"));
    }

    #[test]
    fn plain_question_text_is_not_a_map() {
        assert!(!classify_as_map("Complete the sentences with ONE WORD ONLY"));
        assert!(!classify_as_map(""));
    }

    #[test]
    fn crop_keeps_centered_region() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page-1.png");
        let img = DynamicImage::ImageRgba8(RgbaImage::new(1000, 500));
        img.save_with_format(&path, image::ImageFormat::Png).unwrap();

        let cropped_path = crop_map_region(&path);
        assert_eq!(cropped_path, dir.path().join("page-1-map.png"));

        let cropped = image::open(&cropped_path).unwrap();
        assert_eq!(cropped.width(), 800);
        assert_eq!(cropped.height(), 300);
    }

    #[test]
    fn crop_failure_returns_original_path() {
        let missing = Path::new("/nonexistent/page.png");
        assert_eq!(crop_map_region(missing), missing.to_path_buf());
    }
}
