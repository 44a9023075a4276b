//! PDF rasterisation: render pages to PNG [`PageImage`]s via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves each render onto the blocking pool so
//! Tokio worker threads keep serving the other pages in flight.
//!
//! ## Why a backend trait?
//!
//! [`RasterBackend`] is the seam between the pipeline and pdfium. The
//! pipeline only ever sees PNG bytes keyed by page and DPI, so tests drive it
//! with [`ScriptedRasterizer`] and never need a pdfium shared library.
//!
//! ## Why cap pixels as well as DPI?
//!
//! Certificates are mostly A4, but the odd A3 fold-out at 300 DPI yields a
//! 5,000 px bitmap that slows tesseract without improving accuracy.
//! `max_rendered_pixels` bounds the longest edge whatever the page size.

use crate::document::Document;
use crate::error::CertError;
use crate::pipeline::cache::{PageCache, PageImage};
use image::{DynamicImage, Rgba, RgbaImage};
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Renders PDF pages to bitmaps. Implementations must be deterministic:
/// the same bytes, page and DPI always give the same pixels.
pub trait RasterBackend: Send + Sync {
    /// Short human-readable name used in logs.
    fn name(&self) -> &str;

    /// Check the backend can run at all.
    fn probe(&self) -> Result<(), CertError>;

    /// Number of pages in the PDF.
    fn page_count(&self, pdf: &[u8]) -> Result<usize, CertError>;

    /// Render one 0-indexed page at `dpi`.
    fn render_page(&self, pdf: &[u8], page_index: usize, dpi: u32) -> Result<DynamicImage, CertError>;
}

// ── pdfium backend ───────────────────────────────────────────────────────────

/// [`RasterBackend`] backed by the pdfium shared library.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    /// The pdfium library file, or a directory holding it. System search
    /// path when `None`.
    library: Option<PathBuf>,
    max_pixels: u32,
}

impl PdfiumRasterizer {
    pub fn new(library: Option<PathBuf>, max_pixels: u32) -> Self {
        Self { library, max_pixels }
    }

    fn bind(&self) -> Result<Pdfium, CertError> {
        let bindings = match self.library {
            Some(ref file) if file.is_file() => Pdfium::bind_to_library(file),
            Some(ref dir) => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
            }
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| CertError::rasterizer(format!("Could not load pdfium: {e:?}")))?;
        Ok(Pdfium::new(bindings))
    }
}

/// Map a pdfium load failure to a fatal error with a readable detail.
fn load_error(e: PdfiumError) -> CertError {
    let detail = format!("{e:?}");
    let detail = if detail.to_lowercase().contains("password") {
        "Document is password-protected".to_string()
    } else {
        format!("Could not open PDF: {detail}")
    };
    CertError::Rasterization { page: None, detail }
}

impl RasterBackend for PdfiumRasterizer {
    fn name(&self) -> &str {
        "pdfium"
    }

    fn probe(&self) -> Result<(), CertError> {
        self.bind().map(|_| ())
    }

    fn page_count(&self, pdf: &[u8]) -> Result<usize, CertError> {
        let pdfium = self.bind()?;
        let document = pdfium.load_pdf_from_byte_slice(pdf, None).map_err(load_error)?;
        Ok(document.pages().len() as usize)
    }

    fn render_page(&self, pdf: &[u8], page_index: usize, dpi: u32) -> Result<DynamicImage, CertError> {
        let pdfium = self.bind()?;
        let document = pdfium.load_pdf_from_byte_slice(pdf, None).map_err(load_error)?;
        let pages = document.pages();
        let total = pages.len() as usize;
        if page_index >= total {
            return Err(CertError::raster_page(
                page_index + 1,
                format!("Page out of range (document has {total} pages)"),
            ));
        }

        let page = pages
            .get(page_index as _)
            .map_err(|e| CertError::raster_page(page_index + 1, format!("{e:?}")))?;

        // PDF user space is 72 units per inch.
        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(dpi as f32 / 72.0)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| CertError::raster_page(page_index + 1, format!("{e:?}")))?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px @ {} DPI",
            page_index + 1,
            image.width(),
            image.height(),
            dpi
        );
        Ok(image)
    }
}

// ── Encoding ─────────────────────────────────────────────────────────────────

/// Encode a rendered page as PNG.
///
/// PNG is lossless: JPEG ringing around glyph edges measurably hurts
/// tesseract on small table digits.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded {}x{} image → {} bytes PNG", img.width(), img.height(), buf.len());
    Ok(buf)
}

// ── Cached rasterizer ────────────────────────────────────────────────────────

/// Turns a [`Document`] into page images, going through the [`PageCache`].
#[derive(Clone)]
pub struct PageRasterizer {
    backend: Arc<dyn RasterBackend>,
    cache: Arc<PageCache>,
    timeout: Duration,
}

impl PageRasterizer {
    pub fn new(backend: Arc<dyn RasterBackend>, cache: Arc<PageCache>, timeout: Duration) -> Self {
        Self {
            backend,
            cache,
            timeout,
        }
    }

    pub fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    /// Number of pages in `document`. Zero pages is a rasterization error.
    pub async fn page_count(&self, document: &Document) -> Result<usize, CertError> {
        if !document.has_pdf_header() {
            return Err(CertError::Rasterization {
                page: None,
                detail: "Input is not a PDF (missing %PDF header)".into(),
            });
        }
        let backend = Arc::clone(&self.backend);
        let bytes = document.shared_bytes();
        let task = tokio::task::spawn_blocking(move || backend.page_count(&bytes));
        let count = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => {
                return Err(CertError::Rasterization {
                    page: None,
                    detail: format!("Opening the document timed out after {:?}", self.timeout),
                })
            }
            Ok(joined) => joined.map_err(|e| CertError::Internal(format!("Render task panicked: {e}")))??,
        };
        if count == 0 {
            return Err(CertError::Rasterization {
                page: None,
                detail: "Document has no pages".into(),
            });
        }
        info!("PDF loaded: {} pages", count);
        Ok(count)
    }

    /// Render one page, answering from the cache when possible.
    pub async fn rasterize_page(
        &self,
        document: &Document,
        page_index: usize,
        dpi: u32,
    ) -> Result<PageImage, CertError> {
        self.cache
            .get_or_render(document, page_index, dpi, || self.render_uncached(document, page_index, dpi))
            .await
    }

    /// Render every page in page order.
    pub async fn rasterize(&self, document: &Document, dpi: u32) -> Result<Vec<PageImage>, CertError> {
        let count = self.page_count(document).await?;
        let mut images = Vec::with_capacity(count);
        for page_index in 0..count {
            images.push(self.rasterize_page(document, page_index, dpi).await?);
        }
        Ok(images)
    }

    async fn render_uncached(
        &self,
        document: &Document,
        page_index: usize,
        dpi: u32,
    ) -> Result<PageImage, CertError> {
        let backend = Arc::clone(&self.backend);
        let bytes = document.shared_bytes();
        let task = tokio::task::spawn_blocking(move || {
            let image = backend.render_page(&bytes, page_index, dpi)?;
            let png = encode_png(&image)
                .map_err(|e| CertError::raster_page(page_index + 1, format!("PNG encoding failed: {e}")))?;
            Ok::<_, CertError>(PageImage {
                page_index,
                dpi,
                width: image.width(),
                height: image.height(),
                png: png.into(),
            })
        });

        match tokio::time::timeout(self.timeout, task).await {
            Err(_) => Err(CertError::raster_page(
                page_index + 1,
                format!("Rendering timed out after {:?}", self.timeout),
            )),
            Ok(joined) => joined.map_err(|e| CertError::Internal(format!("Render task panicked: {e}")))?,
        }
    }
}

// ── Scripted backend ─────────────────────────────────────────────────────────

/// Deterministic in-memory [`RasterBackend`] for tests and dry runs.
///
/// Every page renders as a small solid image whose colour encodes the page
/// index, so images of different pages never compare equal.
#[derive(Debug, Default)]
pub struct ScriptedRasterizer {
    pages: usize,
    fail_page: Option<usize>,
    fail_load: bool,
    delay: Option<Duration>,
    renders: AtomicUsize,
}

impl ScriptedRasterizer {
    pub fn new(pages: usize) -> Self {
        Self {
            pages,
            ..Default::default()
        }
    }

    /// Make rendering of one 0-indexed page fail.
    pub fn failing_on(mut self, page_index: usize) -> Self {
        self.fail_page = Some(page_index);
        self
    }

    /// Make every operation fail as if the PDF were corrupt.
    pub fn corrupt(mut self) -> Self {
        self.fail_load = true;
        self
    }

    /// Sleep this long inside every render.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `render_page` has run.
    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

impl RasterBackend for ScriptedRasterizer {
    fn name(&self) -> &str {
        "scripted"
    }

    fn probe(&self) -> Result<(), CertError> {
        Ok(())
    }

    fn page_count(&self, _pdf: &[u8]) -> Result<usize, CertError> {
        if self.fail_load {
            return Err(CertError::Rasterization {
                page: None,
                detail: "Could not open PDF: corrupt xref table".into(),
            });
        }
        Ok(self.pages)
    }

    fn render_page(&self, pdf: &[u8], page_index: usize, dpi: u32) -> Result<DynamicImage, CertError> {
        self.page_count(pdf)?;
        self.renders.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if page_index >= self.pages || self.fail_page == Some(page_index) {
            return Err(CertError::raster_page(page_index + 1, "Page could not be rendered"));
        }
        let side = (dpi / 36).max(1);
        let shade = (page_index % 256) as u8;
        Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            side,
            side,
            Rgba([shade, 255 - shade, 0, 255]),
        )))
    }
}
