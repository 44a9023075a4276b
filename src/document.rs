//! Input documents: immutable PDF bytes plus their content fingerprint.
//!
//! The fingerprint is a SHA-256 digest of the bytes. It is computed once
//! when the [`Document`] is built and keys every page-cache entry, so two
//! copies of the same scan under different file names share cached pages.

use crate::error::CertError;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Stable identifier of a document's byte content (lowercase hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of `data`.
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when `s` has the shape of a fingerprint (64 lowercase hex digits).
    pub fn looks_like(s: &str) -> bool {
        s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A PDF supplied by the caller. Never mutated by the pipeline.
///
/// Cloning is cheap: the bytes are shared.
#[derive(Clone)]
pub struct Document {
    bytes: Arc<[u8]>,
    fingerprint: Fingerprint,
}

impl Document {
    /// Wrap PDF bytes already in memory.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        let fingerprint = Fingerprint::of(&bytes);
        Self {
            bytes: bytes.into(),
            fingerprint,
        }
    }

    /// Read a PDF from disk.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CertError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => CertError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => CertError::FileNotFound {
                path: path.to_path_buf(),
            },
        })?;
        debug!("Read {} bytes from {}", bytes.len(), path.display());
        Ok(Self::from_bytes(bytes))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Shared handle on the bytes, for moving into blocking workers.
    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// True when the bytes start with the `%PDF` magic.
    pub fn has_pdf_header(&self) -> bool {
        self.bytes.starts_with(b"%PDF")
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("len", &self.bytes.len())
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// SHA-256 of the empty byte slice (well-known constant).
    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn fingerprint_of_empty_input() {
        assert_eq!(Fingerprint::of(b"").as_str(), EMPTY_SHA256);
        assert!(Fingerprint::looks_like(EMPTY_SHA256));
    }

    #[test]
    fn same_bytes_same_fingerprint() {
        let a = Document::from_bytes(b"%PDF-1.4 certificate".to_vec());
        let b = Document::from_bytes(b"%PDF-1.4 certificate".to_vec());
        let c = Document::from_bytes(b"%PDF-1.4 other".to_vec());
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn pdf_header_detection() {
        assert!(Document::from_bytes(b"%PDF-1.7".to_vec()).has_pdf_header());
        assert!(!Document::from_bytes(b"PK\x03\x04".to_vec()).has_pdf_header());
    }

    #[test]
    fn looks_like_rejects_non_hex() {
        assert!(!Fingerprint::looks_like("page_1.png"));
        assert!(!Fingerprint::looks_like(&"G".repeat(64)));
    }

    #[tokio::test]
    async fn from_path_missing_file() {
        let err = Document::from_path("/definitely/not/a/real/cert.pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, CertError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn from_path_reads_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cert.pdf");
        std::fs::write(&path, b"%PDF-1.4 scan").unwrap();
        let doc = Document::from_path(&path).await.unwrap();
        assert_eq!(doc.bytes(), b"%PDF-1.4 scan");
        assert_eq!(doc.fingerprint(), &Fingerprint::of(b"%PDF-1.4 scan"));
    }
}
