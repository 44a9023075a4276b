//! Configuration types for certificate extraction.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. One struct for every knob keeps
//! configs shareable across page workers and easy to log.

use crate::error::CertError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use tracing::warn;

/// Lowest accepted rendering DPI.
pub const MIN_DPI: u32 = 72;
/// Highest accepted rendering DPI.
pub const MAX_DPI: u32 = 600;

/// Configuration for one extraction pipeline.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use weightcert::{CacheMode, ExtractionConfig};
///
/// let config = ExtractionConfig::builder()
///     .dpi(240)
///     .concurrency(2)
///     .cache(CacheMode::Disabled)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 240);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Rendering DPI for each page. Range: 72–600. Default: 180.
    ///
    /// 150–300 is the useful band for scanned certificates: below it digits
    /// and weight ids start to misread, above it OCR latency grows faster
    /// than accuracy.
    pub dpi: u32,

    /// Longest-edge cap in pixels for a rendered page. Default: 8000.
    pub max_rendered_pixels: u32,

    /// Where rasterized pages are cached. Default: [`CacheMode::Memory`].
    pub cache: CacheMode,

    /// Number of pages rasterized and OCR'd at once. Default: 4.
    pub concurrency: usize,

    /// Timeout applied to each rasterize call and each OCR call. Default: 120.
    pub page_timeout_secs: u64,

    /// Schema to validate the assembled record against. Default: none.
    pub schema: SchemaChoice,

    /// Tesseract language(s), e.g. "eng" or "eng+afr". Default: "eng".
    pub ocr_language: String,

    /// Path to the `tesseract` binary. `None` resolves it from `PATH`.
    pub tesseract_binary: Option<PathBuf>,

    /// Directory or file of the pdfium shared library. `None` uses the system library.
    pub pdfium_library: Option<PathBuf>,

    /// Optional per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: 180,
            max_rendered_pixels: 8000,
            cache: CacheMode::default(),
            concurrency: 4,
            page_timeout_secs: 120,
            schema: SchemaChoice::default(),
            ocr_language: "eng".to_string(),
            tesseract_binary: None,
            pdfium_library: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("cache", &self.cache)
            .field("concurrency", &self.concurrency)
            .field("page_timeout_secs", &self.page_timeout_secs)
            .field("schema", &self.schema)
            .field("ocr_language", &self.ocr_language)
            .field("tesseract_binary", &self.tesseract_binary)
            .field("pdfium_library", &self.pdfium_library)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn ExtractionProgressCallback>"),
            )
            .finish()
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
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(MIN_DPI, MAX_DPI);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn cache(mut self, mode: CacheMode) -> Self {
        self.config.cache = mode;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn page_timeout_secs(mut self, secs: u64) -> Self {
        self.config.page_timeout_secs = secs;
        self
    }

    pub fn schema(mut self, schema: SchemaChoice) -> Self {
        self.config.schema = schema;
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn tesseract_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tesseract_binary = Some(path.into());
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, CertError> {
        let c = &self.config;
        if c.dpi < MIN_DPI || c.dpi > MAX_DPI {
            return Err(CertError::InvalidConfig(format!(
                "DPI must be {MIN_DPI}–{MAX_DPI}, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(CertError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.page_timeout_secs == 0 {
            return Err(CertError::InvalidConfig(
                "Page timeout must be at least one second".into(),
            ));
        }
        if c.ocr_language.trim().is_empty() {
            return Err(CertError::InvalidConfig("OCR language must not be empty".into()));
        }
        if let CacheMode::Directory(ref dir) = c.cache {
            if dir.as_os_str().is_empty() {
                return Err(CertError::InvalidConfig(
                    "Cache directory path must not be empty".into(),
                ));
            }
        }
        if !(150..=300).contains(&c.dpi) {
            warn!(
                "DPI {} is outside the recommended 150–300 range; expect {}",
                c.dpi,
                if c.dpi < 150 { "more misreads" } else { "slower OCR" }
            );
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Where the page cache keeps rasterized images.
///
/// Caching is purely an optimisation: every mode yields the same record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CacheMode {
    /// Render every page on every request.
    Disabled,
    /// Keep rendered pages in memory for the lifetime of the cache. (default)
    #[default]
    Memory,
    /// Keep rendered pages in memory and persist them as PNG files here.
    Directory(PathBuf),
}

/// Which JSON Schema, if any, the assembled record is checked against.
#[derive(Debug, Clone, Default)]
pub enum SchemaChoice {
    /// Skip validation. (default)
    #[default]
    None,
    /// Use the schema bundled with the crate.
    BuiltIn,
    /// Use a caller-supplied schema document.
    Custom(serde_json::Value),
}
