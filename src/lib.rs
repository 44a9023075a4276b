//! # weightcert
//!
//! Extract structured records from scanned weight-calibration certificates.
//!
//! ## Why this crate?
//!
//! Calibration labs issue certificates as scanned PDFs: a page-1 header with
//! the certificate number, lab, customer and dates, followed by tables of
//! weights with their nominal mass, measured value and uncertainty. There is
//! no text layer to read. This crate rasterises each page, OCRs it, and
//! rebuilds the header fields and weight tables from the recognised lines into
//! a single JSON-serialisable [`CertificateRecord`], optionally checked against
//! a JSON Schema.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Render    rasterise pages via pdfium (spawn_blocking, cached per fingerprint/DPI)
//!  ├─ 2. OCR       tesseract per page, bounded concurrency
//!  ├─ 3. Clean     normalise lines, repair O/0 and l/1 confusion
//!  ├─ 4. Metadata  ordered field rules over the page text
//!  ├─ 5. Weights   state machine: top-level weights + weight sets
//!  ├─ 6. Assemble  CertificateRecord
//!  └─ 7. Validate  optional JSON Schema check → ValidationResult
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use weightcert::{extract_file, ExtractionConfig, SchemaChoice};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractionConfig::builder()
//!         .schema(SchemaChoice::BuiltIn)
//!         .build()?;
//!     let output = extract_file("CM-25-181B.pdf", &config).await?;
//!     println!("{}", output.record.to_json_pretty()?);
//!     for warning in &output.warnings {
//!         eprintln!("warning: {warning}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Native dependencies
//!
//! Rendering needs the pdfium shared library (system path, or
//! `ExtractionConfig::pdfium_library`). OCR needs the `tesseract` binary on
//! `PATH`, or libtesseract when built with the `tesseract` feature. Both are
//! probed before any page is processed; a missing engine is a fatal
//! [`CertError::EngineUnavailable`].
//!
//! ## Feature Flags
//!
//! | Feature     | Default | Description |
//! |-------------|---------|-------------|
//! | `cli`       | on      | Enables the `weightcert` binary (clap + anyhow + indicatif + tracing-subscriber) |
//! | `tesseract` | off     | OCR in-process through libtesseract instead of spawning the binary |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! weightcert = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod document;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod progress;
pub mod record;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{CacheMode, ExtractionConfig, ExtractionConfigBuilder, SchemaChoice};
pub use document::{Document, Fingerprint};
pub use error::{CertError, EngineKind, Warning, WarningCode};
pub use extract::{
    default_output_path, extract_file, extract_sync, extract_to_file, write_record, CancelToken, Engines, Extractor,
};
pub use pipeline::cache::{CacheStats, PageCache, PageImage};
pub use pipeline::metadata::extract_metadata;
pub use pipeline::ocr::{OcrEngine, PageText, ScriptedOcr, TesseractCommand};
pub use pipeline::render::{PdfiumRasterizer, RasterBackend, ScriptedRasterizer};
pub use pipeline::validate::{SchemaValidator, ValidationResult, Violation, BUILT_IN_SCHEMA};
pub use pipeline::weights::{ParsedTables, WeightTableParser};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use record::{CertificateMetadata, CertificateRecord, ExtractionOutput, ExtractionStats, WeightEntry, WeightSet};

#[cfg(feature = "tesseract")]
pub use pipeline::ocr::LibTesseract;
