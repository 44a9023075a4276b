//! Content-addressed page-image cache with single-flight rendering.
//!
//! Entries are keyed by `(document fingerprint, page index, DPI)`. Each key
//! owns a [`tokio::sync::OnceCell`]: the first requester runs the render
//! closure while concurrent requesters for the same key await the same
//! cell, so a page is never rasterized twice at once. A failed render leaves
//! the cell empty, so the next request retries instead of seeing a cached
//! failure.
//!
//! In [`CacheMode::Directory`] mode each rendered page is also written as a
//! PNG under `<dir>/<fingerprint>/<dpi>/page_<n>.png` and read back on later
//! runs. Nothing is evicted automatically; [`PageCache::clear`] and
//! [`PageCache::invalidate`] are the only ways entries go away.

use crate::config::CacheMode;
use crate::document::{Document, Fingerprint};
use crate::error::CertError;
use std::collections::HashMap;
use std::future::Future;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

/// A rendered page: lossless PNG bytes plus where they came from.
///
/// Immutable once produced; clones share the pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 0-indexed page number.
    pub page_index: usize,
    pub dpi: u32,
    pub width: u32,
    pub height: u32,
    /// PNG-encoded pixels.
    pub png: Arc<[u8]>,
}

impl PageImage {
    /// Wrap PNG bytes, reading the dimensions from the PNG header.
    pub fn from_png(page_index: usize, dpi: u32, png: Vec<u8>) -> Result<Self, CertError> {
        let (width, height) = image::ImageReader::with_format(Cursor::new(&png), image::ImageFormat::Png)
            .into_dimensions()
            .map_err(|e| CertError::raster_page(page_index + 1, format!("Invalid PNG: {e}")))?;
        Ok(Self {
            page_index,
            dpi,
            width,
            height,
            png: png.into(),
        })
    }
}

/// Cache key: one rendered page of one document at one resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub fingerprint: Fingerprint,
    pub page_index: usize,
    pub dpi: u32,
}

/// Counters describing cache behaviour since construction (or the last clear).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Times the render closure actually ran.
    pub renders: usize,
    /// Requests answered from memory.
    pub memory_hits: usize,
    /// Requests answered from the cache directory.
    pub disk_hits: usize,
}

/// Shared store of rendered pages.
///
/// Construct one per process (or per run) and share it via `Arc`; tests get
/// deterministic behaviour from a fresh instance each.
pub struct PageCache {
    mode: CacheMode,
    slots: Mutex<HashMap<PageKey, Arc<OnceCell<PageImage>>>>,
    renders: AtomicUsize,
    memory_hits: AtomicUsize,
    disk_hits: AtomicUsize,
}

impl PageCache {
    pub fn new(mode: CacheMode) -> Self {
        Self {
            mode,
            slots: Mutex::new(HashMap::new()),
            renders: AtomicUsize::new(0),
            memory_hits: AtomicUsize::new(0),
            disk_hits: AtomicUsize::new(0),
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self::new(CacheMode::Disabled)
    }

    pub fn mode(&self) -> &CacheMode {
        &self.mode
    }

    /// Return the cached page, or run `render` once and remember its result.
    ///
    /// Errors from `render` propagate unchanged and are not cached.
    pub async fn get_or_render<F, Fut>(
        &self,
        document: &Document,
        page_index: usize,
        dpi: u32,
        render: F,
    ) -> Result<PageImage, CertError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PageImage, CertError>>,
    {
        if self.mode == CacheMode::Disabled {
            self.renders.fetch_add(1, Ordering::SeqCst);
            return render().await;
        }

        let key = PageKey {
            fingerprint: document.fingerprint().clone(),
            page_index,
            dpi,
        };
        let cell = {
            let mut slots = self.slots.lock().await;
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        if let Some(image) = cell.get() {
            self.memory_hits.fetch_add(1, Ordering::SeqCst);
            debug!("Cache hit (memory) for page {} @ {} DPI", page_index + 1, dpi);
            return Ok(image.clone());
        }

        let image = cell
            .get_or_try_init(|| async {
                if let Some(image) = self.load_from_disk(&key).await {
                    self.disk_hits.fetch_add(1, Ordering::SeqCst);
                    return Ok(image);
                }
                self.renders.fetch_add(1, Ordering::SeqCst);
                let image = render().await?;
                self.store_to_disk(&key, &image).await;
                Ok::<_, CertError>(image)
            })
            .await?;
        Ok(image.clone())
    }

    /// Drop every entry for one document (memory and directory).
    pub async fn invalidate(&self, fingerprint: &Fingerprint) {
        self.slots
            .lock()
            .await
            .retain(|key, _| &key.fingerprint != fingerprint);
        if let CacheMode::Directory(ref root) = self.mode {
            let dir = root.join(fingerprint.as_str());
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Could not remove cache directory {}: {}", dir.display(), e);
                }
            }
        }
    }

    /// Drop every entry and reset the counters.
    ///
    /// In directory mode only fingerprint-named subdirectories are removed;
    /// anything else the caller keeps in the directory is left alone.
    pub async fn clear(&self) {
        self.slots.lock().await.clear();
        self.renders.store(0, Ordering::SeqCst);
        self.memory_hits.store(0, Ordering::SeqCst);
        self.disk_hits.store(0, Ordering::SeqCst);

        let CacheMode::Directory(ref root) = self.mode else {
            return;
        };
        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(_) => return,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            if Fingerprint::looks_like(&name.to_string_lossy()) {
                if let Err(e) = tokio::fs::remove_dir_all(entry.path()).await {
                    warn!("Could not remove {}: {}", entry.path().display(), e);
                }
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            renders: self.renders.load(Ordering::SeqCst),
            memory_hits: self.memory_hits.load(Ordering::SeqCst),
            disk_hits: self.disk_hits.load(Ordering::SeqCst),
        }
    }

    fn page_path(root: &Path, key: &PageKey) -> PathBuf {
        root.join(key.fingerprint.as_str())
            .join(key.dpi.to_string())
            .join(format!("page_{}.png", key.page_index + 1))
    }

    async fn load_from_disk(&self, key: &PageKey) -> Option<PageImage> {
        let CacheMode::Directory(ref root) = self.mode else {
            return None;
        };
        let path = Self::page_path(root, key);
        let bytes = tokio::fs::read(&path).await.ok()?;
        match PageImage::from_png(key.page_index, key.dpi, bytes) {
            Ok(image) => {
                debug!("Loaded cached page {} from {}", key.page_index + 1, path.display());
                Some(image)
            }
            Err(e) => {
                warn!("Ignoring unreadable cache file {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Persist a page; failures only cost a re-render next time.
    async fn store_to_disk(&self, key: &PageKey, image: &PageImage) {
        let CacheMode::Directory(ref root) = self.mode else {
            return;
        };
        let path = Self::page_path(root, key);
        if let Err(e) = write_atomic(&path, &image.png).await {
            warn!("Could not cache page {} to {}: {}", key.page_index + 1, path.display(), e);
        } else {
            debug!("Cached page {} to {}", key.page_index + 1, path.display());
        }
    }
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new(CacheMode::Memory)
    }
}

/// Write via a temp file + rename so readers never see a half-written PNG.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension("png.tmp");
    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, path).await
}
