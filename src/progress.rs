//! Progress-callback trait for per-page extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the pipeline rasterizes and OCRs each page. Front ends forward
//! them to a progress bar, a websocket or a log without the library knowing
//! how the host application communicates.
//!
//! # Example
//!
//! ```rust
//! use weightcert::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, line_count: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} read ({} lines)", page_num, total_pages, line_count);
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { completed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the extraction pipeline as it processes each page.
///
/// Pages are processed by a bounded worker pool, so `on_page_start`,
/// `on_page_complete` and `on_page_error` may be called concurrently and out
/// of page order. Implementations must protect shared mutable state with
/// appropriate synchronisation (e.g. `Mutex`, `AtomicUsize`). All methods
/// default to no-ops.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once the page count is known, before any page work.
    fn on_extraction_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before a page is rasterized.
    ///
    /// # Arguments
    /// * `page_num`    — 1-indexed page number
    /// * `total_pages` — total pages in the document
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page has been rasterized and OCR'd.
    ///
    /// `line_count` is the number of non-empty text lines recognised; zero
    /// means the page produced no usable text.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, line_count: usize) {
        let _ = (page_num, total_pages, line_count);
    }

    /// Called when a page fails fatally (rasterizer or OCR error).
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after the record has been assembled.
    ///
    /// # Arguments
    /// * `total_pages`   — pages in the document
    /// * `weights_found` — top-level weights plus weights inside sets
    fn on_extraction_complete(&self, total_pages: usize, weights_found: usize) {
        let _ = (total_pages, weights_found);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
