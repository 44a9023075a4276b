//! Pipeline stages for certificate extraction.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets the
//! native collaborators (pdfium, tesseract) be swapped for scripted fakes
//! without touching the parsing stages.
//!
//! ## Data Flow
//!
//! ```text
//!  Document ──▶ render ──▶ ocr ──▶ normalize ──┬─▶ metadata ──┐
//!  (bytes)     (cache)   (text)    (lines)     └─▶ weights  ──┴─▶ assemble ──▶ validate
//! ```
//!
//! 1. [`cache`]     : single-flight page-image cache keyed by fingerprint, page and DPI
//! 2. [`render`]    : rasterise pages through pdfium on the blocking pool
//! 3. [`ocr`]       : recognise page images; engine missing is fatal, empty text is not
//! 4. [`normalize`] : deterministic cleanup of raw OCR text into lines
//! 5. [`metadata`]  : ordered field rules over the page text
//! 6. [`weights`]   : line-oriented state machine rebuilding weights and sets
//! 7. [`assemble`]  : compose the record
//! 8. [`validate`]  : optional JSON Schema check

pub mod assemble;
pub mod cache;
pub mod metadata;
pub mod normalize;
pub mod ocr;
pub mod render;
pub mod validate;
pub mod weights;
