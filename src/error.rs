//! Error types for the weightcert library.
//!
//! Two distinct types reflect two distinct failure modes:
//!
//! * [`CertError`] — **Fatal**: the run cannot produce a record at all
//!   (no OCR engine, corrupt PDF, no text anywhere). Returned as
//!   `Err(CertError)` from the top-level `extract*` functions.
//!
//! * [`Warning`] — **Non-fatal**: something was degraded (a field did not
//!   match, a table line was unreadable, a row was read twice) but the record
//!   is still produced. Warnings travel inside
//!   [`crate::record::ExtractionOutput`] in the order they were recorded.
//!
//! There is no third "partial failure" shape: partiality is expressed inside
//! the record itself as absent fields plus warnings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which external collaborator an [`CertError::EngineUnavailable`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// The OCR engine (tesseract).
    Ocr,
    /// The PDF rasterizer (pdfium).
    Rasterizer,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Ocr => f.write_str("OCR engine"),
            EngineKind::Rasterizer => f.write_str("PDF rasterizer"),
        }
    }
}

/// All fatal errors returned by the weightcert library.
#[derive(Debug, Error)]
pub enum CertError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    // ── Engine errors ─────────────────────────────────────────────────────
    /// OCR engine or rasterizer is missing, failed, or timed out.
    ///
    /// No retry helps without operator intervention.
    #[error("{engine} unavailable: {detail}")]
    EngineUnavailable { engine: EngineKind, detail: String },

    /// The document could not be rasterized (corrupt, encrypted, no pages).
    #[error("Rasterization failed{}: {detail}", .page.map(|p| format!(" for page {p}")).unwrap_or_default())]
    Rasterization { page: Option<usize>, detail: String },

    // ── Parsing errors ────────────────────────────────────────────────────
    /// OCR produced no text on any page.
    #[error("No text could be recognised on any of the {pages} pages")]
    EmptyDocumentText { pages: usize },

    // ── Validation errors ─────────────────────────────────────────────────
    /// The JSON Schema document itself is malformed.
    #[error("Invalid JSON Schema: {0}")]
    Schema(String),

    // ── Run control ───────────────────────────────────────────────────────
    /// The run was cancelled before every page was processed.
    #[error("Extraction cancelled")]
    Cancelled,

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CertError {
    pub(crate) fn ocr(detail: impl Into<String>) -> Self {
        CertError::EngineUnavailable {
            engine: EngineKind::Ocr,
            detail: detail.into(),
        }
    }

    pub(crate) fn rasterizer(detail: impl Into<String>) -> Self {
        CertError::EngineUnavailable {
            engine: EngineKind::Rasterizer,
            detail: detail.into(),
        }
    }

    pub(crate) fn raster_page(page: usize, detail: impl Into<String>) -> Self {
        CertError::Rasterization {
            page: Some(page),
            detail: detail.into(),
        }
    }
}

/// Machine-readable category of a [`Warning`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    /// A metadata field had no matching rule.
    MissingField,
    /// The declared page count differs from the rasterized page count.
    PageCountMismatch,
    /// A date matched but could not be normalised; the raw text was kept.
    UnparsedDate,
    /// Table-like lines were dropped because no valid weight id was found.
    DroppedLines,
    /// A weight id appeared twice in one collection; the later row won.
    DuplicateWeightId,
    /// OCR recognised nothing on a page.
    EmptyPage,
    /// The schema could not be compiled, so the record was not validated.
    SchemaError,
}

/// A non-fatal condition recorded alongside the extracted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub code: WarningCode,
    pub message: String,
    /// 1-indexed page the warning relates to, when it relates to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
}

impl Warning {
    pub fn new(code: WarningCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            page: None,
        }
    }

    pub fn on_page(mut self, page: usize) -> Self {
        self.page = Some(page);
        self
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.page {
            Some(p) => write!(f, "page {}: {}", p, self.message),
            None => f.write_str(&self.message),
        }
    }
}
