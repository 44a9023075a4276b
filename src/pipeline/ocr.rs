//! OCR: page image → ordered text lines.
//!
//! [`OcrEngine`] is the seam to the recogniser. The default engine,
//! [`TesseractCommand`], runs the `tesseract` binary on a temporary PNG; with
//! the `tesseract` cargo feature, [`LibTesseract`] links libtesseract and
//! recognises in-process. [`ScriptedOcr`] returns canned text for tests.
//!
//! An engine that cannot run is fatal ([`CertError::EngineUnavailable`]). A
//! page on which the engine ran but recognised nothing is not: it yields an
//! empty [`PageText`] and the caller records a warning.

use crate::error::CertError;
use crate::pipeline::cache::PageImage;
use crate::pipeline::normalize::clean_page_text;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Cleaned text lines of one page, in reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// 0-indexed page number.
    pub page_index: usize,
    pub lines: Vec<String>,
}

impl PageText {
    pub fn new(page_index: usize, lines: Vec<String>) -> Self {
        Self { page_index, lines }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Recognises text in a PNG page image. Implementations block; callers run
/// them on the blocking pool.
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Check the engine can run at all.
    fn probe(&self) -> Result<(), CertError>;

    /// Raw recognised text for one page.
    fn recognize(&self, image: &PageImage) -> Result<String, CertError>;
}

// ── tesseract binary ─────────────────────────────────────────────────────────

/// Runs the `tesseract` command-line program.
#[derive(Debug, Clone)]
pub struct TesseractCommand {
    binary: PathBuf,
    language: String,
    /// Page segmentation mode. 6 = "single uniform block of text", which keeps
    /// table rows on one line far more often than the default automatic mode.
    psm: u8,
}

impl TesseractCommand {
    pub fn new(binary: Option<PathBuf>, language: impl Into<String>) -> Self {
        Self {
            binary: binary.unwrap_or_else(|| PathBuf::from("tesseract")),
            language: language.into(),
            psm: 6,
        }
    }

    fn spawn_error(&self, e: std::io::Error) -> CertError {
        if e.kind() == std::io::ErrorKind::NotFound {
            CertError::ocr(format!(
                "'{}' not found. Install tesseract-ocr or pass --tesseract <path>",
                self.binary.display()
            ))
        } else {
            CertError::ocr(format!("Failed to run '{}': {e}", self.binary.display()))
        }
    }
}

impl OcrEngine for TesseractCommand {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn probe(&self) -> Result<(), CertError> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .map_err(|e| self.spawn_error(e))?;
        if !output.status.success() {
            return Err(CertError::ocr(format!(
                "'{} --version' exited with {}",
                self.binary.display(),
                output.status
            )));
        }
        Ok(())
    }

    fn recognize(&self, image: &PageImage) -> Result<String, CertError> {
        let mut input = tempfile::Builder::new()
            .prefix("weightcert-page-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| CertError::Internal(format!("Could not create temp file: {e}")))?;
        input
            .write_all(&image.png)
            .and_then(|_| input.flush())
            .map_err(|e| CertError::Internal(format!("Could not write temp file: {e}")))?;

        let output = Command::new(&self.binary)
            .arg(input.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("--psm")
            .arg(self.psm.to_string())
            .output()
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CertError::ocr(format!(
                "tesseract failed on page {}: {}",
                image.page_index + 1,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

// ── libtesseract ─────────────────────────────────────────────────────────────

/// In-process recogniser linked against libtesseract.
#[cfg(feature = "tesseract")]
#[derive(Debug, Clone)]
pub struct LibTesseract {
    tessdata_dir: Option<String>,
    language: String,
}

#[cfg(feature = "tesseract")]
impl LibTesseract {
    pub fn new(tessdata_dir: Option<String>, language: impl Into<String>) -> Self {
        Self {
            tessdata_dir,
            language: language.into(),
        }
    }

    fn init(&self) -> Result<tesseract::Tesseract, CertError> {
        tesseract::Tesseract::new(self.tessdata_dir.as_deref(), Some(&self.language))
            .map_err(|e| CertError::ocr(format!("libtesseract init failed: {e:?}")))
    }
}

#[cfg(feature = "tesseract")]
impl OcrEngine for LibTesseract {
    fn name(&self) -> &str {
        "libtesseract"
    }

    fn probe(&self) -> Result<(), CertError> {
        self.init().map(|_| ())
    }

    fn recognize(&self, image: &PageImage) -> Result<String, CertError> {
        let mut tess = self
            .init()?
            .set_variable("tessedit_pageseg_mode", "6")
            .map_err(|e| CertError::ocr(format!("{e:?}")))?
            .set_image_from_mem(&image.png)
            .map_err(|e| CertError::ocr(format!("page {}: {e:?}", image.page_index + 1)))?;
        tess.get_text()
            .map_err(|e| CertError::ocr(format!("page {}: {e:?}", image.page_index + 1)))
    }
}

// ── Scripted engine ──────────────────────────────────────────────────────────

/// Returns fixed text per page index; pages beyond the script read as empty.
#[derive(Debug, Clone, Default)]
pub struct ScriptedOcr {
    pages: Vec<String>,
    unavailable: bool,
    delay: Option<Duration>,
}

impl ScriptedOcr {
    pub fn new<I, S>(pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pages: pages.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// An engine whose every call fails as if tesseract were not installed.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Block for `delay` inside every `recognize` call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl OcrEngine for ScriptedOcr {
    fn name(&self) -> &str {
        "scripted"
    }

    fn probe(&self) -> Result<(), CertError> {
        if self.unavailable {
            return Err(CertError::ocr("scripted engine marked unavailable"));
        }
        Ok(())
    }

    fn recognize(&self, image: &PageImage) -> Result<String, CertError> {
        self.probe()?;
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        Ok(self.pages.get(image.page_index).cloned().unwrap_or_default())
    }
}

// ── Extractor ────────────────────────────────────────────────────────────────

/// Runs an [`OcrEngine`] off the async runtime with a deadline, then cleans
/// the output into lines.
#[derive(Clone)]
pub struct TextExtractor {
    engine: Arc<dyn OcrEngine>,
    timeout: Duration,
}

impl TextExtractor {
    pub fn new(engine: Arc<dyn OcrEngine>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    pub async fn extract(&self, image: PageImage) -> Result<PageText, CertError> {
        let page_index = image.page_index;
        let engine = Arc::clone(&self.engine);
        let task = tokio::task::spawn_blocking(move || engine.recognize(&image));

        let raw = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => {
                return Err(CertError::ocr(format!(
                    "OCR of page {} timed out after {:?}",
                    page_index + 1,
                    self.timeout
                )))
            }
            Ok(joined) => joined.map_err(|e| CertError::Internal(format!("OCR task panicked: {e}")))??,
        };

        let lines = clean_page_text(&raw);
        debug!("OCR page {} → {} lines", page_index + 1, lines.len());
        Ok(PageText::new(page_index, lines))
    }
}
