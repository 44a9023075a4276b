//! Extraction entry points: one PDF in, one [`ExtractionOutput`] out.
//!
//! ## Page pool
//!
//! Rasterization and OCR of page *i* do not depend on page *i−1*, so pages
//! run through a bounded `buffer_unordered` pool of `config.concurrency`
//! workers. Results arrive in completion order and are re-sorted by page
//! index before the parsing stages, which need reading order and run
//! single-threaded.
//!
//! ## Fatal vs. recorded
//!
//! Any page failing to rasterize or OCR aborts the run: the record would be
//! missing an unknown amount of table data. Everything softer (empty pages,
//! unmatched fields, dropped lines, duplicate ids, a malformed schema) is
//! recorded as a [`Warning`] on the output instead.
//!
//! ## Cancellation
//!
//! A [`CancelToken`] stops new pages from being dispatched. Pages already in
//! flight are not interrupted; their blocking tasks run to completion in the
//! background and the run returns [`CertError::Cancelled`].

use crate::config::{ExtractionConfig, SchemaChoice, MAX_DPI, MIN_DPI};
use crate::document::Document;
use crate::error::{CertError, Warning, WarningCode};
use crate::pipeline::assemble::RecordAssembler;
use crate::pipeline::cache::PageCache;
use crate::pipeline::metadata::MetadataExtractor;
use crate::pipeline::ocr::{OcrEngine, PageText, TesseractCommand, TextExtractor};
use crate::pipeline::render::{PageRasterizer, PdfiumRasterizer, RasterBackend};
use crate::pipeline::validate::{SchemaValidator, ValidationResult, BUILT_IN_SCHEMA};
use crate::pipeline::weights::WeightTableParser;
use crate::record::{CertificateRecord, ExtractionOutput, ExtractionStats};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ── Engines ──────────────────────────────────────────────────────────────────

/// The two native collaborators a run needs.
#[derive(Clone)]
pub struct Engines {
    pub rasterizer: Arc<dyn RasterBackend>,
    pub ocr: Arc<dyn OcrEngine>,
}

impl Engines {
    pub fn new(rasterizer: Arc<dyn RasterBackend>, ocr: Arc<dyn OcrEngine>) -> Self {
        Self { rasterizer, ocr }
    }

    /// The default engines for `config`, without checking they run.
    ///
    /// With the `tesseract` feature and no explicit binary configured, OCR
    /// runs in-process through libtesseract.
    pub fn from_config(config: &ExtractionConfig) -> Self {
        let rasterizer: Arc<dyn RasterBackend> = Arc::new(PdfiumRasterizer::new(
            config.pdfium_library.clone(),
            config.max_rendered_pixels,
        ));

        #[cfg(feature = "tesseract")]
        let ocr: Arc<dyn OcrEngine> = match config.tesseract_binary {
            Some(ref binary) => Arc::new(TesseractCommand::new(Some(binary.clone()), &config.ocr_language)),
            None => Arc::new(crate::pipeline::ocr::LibTesseract::new(None, &config.ocr_language)),
        };
        #[cfg(not(feature = "tesseract"))]
        let ocr: Arc<dyn OcrEngine> = Arc::new(TesseractCommand::new(
            config.tesseract_binary.clone(),
            &config.ocr_language,
        ));

        Self { rasterizer, ocr }
    }

    /// The default engines for `config`, failing fast when either is missing.
    pub fn detect(config: &ExtractionConfig) -> Result<Self, CertError> {
        let engines = Self::from_config(config);
        engines.probe()?;
        Ok(engines)
    }

    /// Check both engines can run.
    pub fn probe(&self) -> Result<(), CertError> {
        self.rasterizer.probe()?;
        self.ocr.probe()?;
        debug!(
            "Engines ready: rasterizer={}, ocr={}",
            self.rasterizer.name(),
            self.ocr.name()
        );
        Ok(())
    }
}

// ── Cancellation ─────────────────────────────────────────────────────────────

/// Cooperative cancellation flag shared between a caller and a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Extractor ────────────────────────────────────────────────────────────────

/// Runs the full pipeline for one configuration and one set of engines.
///
/// The page cache lives as long as the extractor (or longer, when shared
/// via [`Extractor::with_cache`]), so extracting the same document twice
/// rasterizes it once.
pub struct Extractor {
    config: ExtractionConfig,
    rasterizer: PageRasterizer,
    text: TextExtractor,
    metadata: MetadataExtractor,
    parser: WeightTableParser,
    assembler: RecordAssembler,
    validator: SchemaValidator,
}

impl Extractor {
    pub fn new(config: ExtractionConfig, engines: Engines) -> Self {
        let cache = Arc::new(PageCache::new(config.cache.clone()));
        Self::with_cache(config, engines, cache)
    }

    /// Use a cache shared with other extractors.
    pub fn with_cache(config: ExtractionConfig, engines: Engines, cache: Arc<PageCache>) -> Self {
        let timeout = Duration::from_secs(config.page_timeout_secs);
        Self {
            rasterizer: PageRasterizer::new(engines.rasterizer, cache, timeout),
            text: TextExtractor::new(engines.ocr, timeout),
            metadata: MetadataExtractor::new(),
            parser: WeightTableParser::new(),
            assembler: RecordAssembler::new(),
            validator: SchemaValidator::new(),
            config,
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<PageCache> {
        self.rasterizer.cache()
    }

    /// Extract at the configured DPI.
    pub async fn extract(&self, document: &Document) -> Result<ExtractionOutput, CertError> {
        self.run(document, self.config.dpi, None).await
    }

    /// Extract at a caller-chosen DPI, e.g. to re-OCR a document whose first
    /// pass produced too many dropped lines. Clamped to 72–600.
    pub async fn extract_at_dpi(&self, document: &Document, dpi: u32) -> Result<ExtractionOutput, CertError> {
        self.run(document, dpi.clamp(MIN_DPI, MAX_DPI), None).await
    }

    /// Extract at the configured DPI, stopping early when `cancel` fires.
    pub async fn extract_with_cancel(
        &self,
        document: &Document,
        cancel: &CancelToken,
    ) -> Result<ExtractionOutput, CertError> {
        self.run(document, self.config.dpi, Some(cancel)).await
    }

    async fn run(
        &self,
        document: &Document,
        dpi: u32,
        cancel: Option<&CancelToken>,
    ) -> Result<ExtractionOutput, CertError> {
        let total_start = Instant::now();
        info!(
            "Starting extraction: {} bytes, fingerprint {}, {} DPI",
            document.len(),
            document.fingerprint(),
            dpi
        );
        let renders_before = self.cache().stats().renders;

        // ── Step 1: Count pages ──────────────────────────────────────────
        let total_pages = self.rasterizer.page_count(document).await?;
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_extraction_start(total_pages);
        }

        // ── Step 2: Rasterize + OCR through the page pool ────────────────
        let page_start = Instant::now();
        let mut pages: Vec<PageText> = stream::iter(0..total_pages)
            .map(|page_index| self.process_page(document, page_index, dpi, total_pages, cancel))
            .buffer_unordered(self.config.concurrency)
            .try_collect()
            .await?;
        pages.sort_by_key(|p| p.page_index);
        let page_duration_ms = page_start.elapsed().as_millis() as u64;
        info!("Read {} pages in {}ms", pages.len(), page_duration_ms);

        // ── Step 3: Empty pages ──────────────────────────────────────────
        let mut warnings = Vec::new();
        for page in pages.iter().filter(|p| p.is_empty()) {
            let w = Warning::new(WarningCode::EmptyPage, "OCR recognised no text").on_page(page.page_index + 1);
            warn!("{}", w);
            warnings.push(w);
        }
        let empty_pages = warnings.len();

        // ── Step 4: Weight tables ────────────────────────────────────────
        let tables = self.parser.parse(&pages)?;
        warnings.extend(tables.warnings);

        // ── Step 5: Metadata ─────────────────────────────────────────────
        let (metadata, meta_warnings) = self.metadata.extract(&pages, total_pages);
        warnings.extend(meta_warnings);

        // ── Step 6: Assemble ─────────────────────────────────────────────
        let record = self.assembler.assemble(metadata, tables.weights, tables.sets);

        // ── Step 7: Validate ─────────────────────────────────────────────
        let validation = self.validate(&record, &mut warnings)?;

        let stats = ExtractionStats {
            total_pages,
            empty_pages,
            pages_rendered: self.cache().stats().renders.saturating_sub(renders_before),
            top_level_weights: record.weights.len(),
            weight_sets: record.sets.len(),
            set_weights: record.sets.iter().map(|s| s.weights.len()).sum(),
            dropped_lines: tables.dropped_lines,
            page_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };

        info!(
            "Extraction complete: {} weights in {} sets + {} top-level, {} warnings, {}ms",
            record.total_weights(),
            stats.weight_sets,
            stats.top_level_weights,
            warnings.len(),
            stats.total_duration_ms
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_extraction_complete(total_pages, record.total_weights());
        }

        Ok(ExtractionOutput {
            record,
            warnings,
            validation,
            stats,
        })
    }

    async fn process_page(
        &self,
        document: &Document,
        page_index: usize,
        dpi: u32,
        total_pages: usize,
        cancel: Option<&CancelToken>,
    ) -> Result<PageText, CertError> {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            debug!("Cancelled before page {}", page_index + 1);
            return Err(CertError::Cancelled);
        }
        let page_num = page_index + 1;
        let cb = self.config.progress_callback.as_ref();
        if let Some(cb) = cb {
            cb.on_page_start(page_num, total_pages);
        }

        let result = match self.rasterizer.rasterize_page(document, page_index, dpi).await {
            Ok(image) => self.text.extract(image).await,
            Err(e) => Err(e),
        };

        if let Some(cb) = cb {
            match &result {
                Ok(text) => cb.on_page_complete(page_num, total_pages, text.lines.len()),
                Err(e) => cb.on_page_error(page_num, total_pages, &e.to_string()),
            }
        }
        result
    }

    fn validate(
        &self,
        record: &CertificateRecord,
        warnings: &mut Vec<Warning>,
    ) -> Result<Option<ValidationResult>, CertError> {
        let result = match self.config.schema {
            SchemaChoice::None => return Ok(None),
            SchemaChoice::BuiltIn => self.validator.validate(record, &BUILT_IN_SCHEMA),
            SchemaChoice::Custom(ref schema) => self.validator.validate(record, schema),
        };
        match result {
            Ok(validation) => {
                if let ValidationResult::Invalid(ref violations) = validation {
                    info!("Record does not conform to the schema: {} violation(s)", violations.len());
                }
                Ok(Some(validation))
            }
            Err(CertError::Schema(detail)) => {
                let w = Warning::new(
                    WarningCode::SchemaError,
                    format!("Schema is not valid JSON Schema, record not validated: {detail}"),
                );
                warn!("{}", w);
                warnings.push(w);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

// ── Convenience entry points ─────────────────────────────────────────────────

/// Extract a certificate from a PDF on disk using the default engines.
///
/// This is the primary entry point for the library.
///
/// # Errors
/// Returns `Err(CertError)` only for fatal conditions:
/// - file not found / permission denied
/// - pdfium or tesseract unavailable
/// - the PDF cannot be rasterized
/// - no page yielded any text
pub async fn extract_file(
    path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, CertError> {
    let document = Document::from_path(path).await?;
    let engines = Engines::detect(config)?;
    Extractor::new(config.clone(), engines).extract(&document).await
}

/// Synchronous wrapper around [`extract_file`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(path: impl AsRef<Path>, config: &ExtractionConfig) -> Result<ExtractionOutput, CertError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CertError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract_file(path, config))
}

/// Extract and write the record as pretty JSON to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn extract_to_file(
    input: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, CertError> {
    let output = extract_file(input, config).await?;
    write_record(output_path, &output.record).await?;
    Ok(output)
}

/// `<dir>/<stem>_converted.json` next to the input PDF.
pub fn default_output_path(input: impl AsRef<Path>) -> PathBuf {
    let input = input.as_ref();
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "certificate".to_string());
    input.with_file_name(format!("{stem}_converted.json"))
}

/// Write `record` as pretty JSON, atomically.
pub async fn write_record(path: impl AsRef<Path>, record: &CertificateRecord) -> Result<(), CertError> {
    let path = path.as_ref();
    let write_err = |e: std::io::Error| CertError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    let json = record
        .to_json_pretty()
        .map_err(|e| CertError::Internal(format!("Record serialisation failed: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    info!("Wrote {}", path.display());
    Ok(())
}
