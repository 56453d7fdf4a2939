//! Pipeline stages between the LLM's raw output and the finished document.
//!
//! ## Data Flow
//!
//! ```text
//! pages ──▶ images ──────────────▶ uploads ─┐
//! (OCR'd)  (map detect + crop)              │
//!                                           ▼
//! LLM JSON ──▶ postprocess (8 stages) ──▶ document + validation
//! ```
//!
//! 1. [`images`] — classify each OCR'd page as map/diagram, crop the map
//!    region, hand the result to the image store
//! 2. [`postprocess`] — merge, default, inject, materialise, link,
//!    normalise, renumber, validate: one stage per defect class the model
//!    is known to produce

pub mod images;
pub mod postprocess;
