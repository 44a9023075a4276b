//! End-to-end integration tests for weightcert.
//!
//! These tests rasterise real scanned certificates in `./test_cases/` with
//! pdfium and OCR them with tesseract. They are gated behind the
//! `E2E_ENABLED` environment variable so they do not run in CI unless
//! explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 cargo test --test e2e -- --nocapture
//!
//! To restrict to a specific test:
//!   E2E_ENABLED=1 cargo test --test e2e test_cache -- --nocapture

use std::path::PathBuf;
use std::sync::Arc;
use weightcert::{
    default_output_path, extract_file, extract_sync, extract_to_file, CacheMode, CertError, CertificateRecord,
    Document, Engines, ExtractionConfig, Extractor, PageCache, SchemaChoice, ValidationResult,
};

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

fn output_dir() -> PathBuf {
    let d = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases/output");
    std::fs::create_dir_all(&d).ok();
    d
}

/// Every `*.pdf` directly under `test_cases/`, sorted by name.
fn sample_pdfs() -> Vec<PathBuf> {
    let mut pdfs: Vec<PathBuf> = std::fs::read_dir(test_cases_dir())
        .map(|entries| {
            entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("pdf")))
                .collect()
        })
        .unwrap_or_default();
    pdfs.sort();
    pdfs
}

/// Skip this test if E2E_ENABLED is not set *or* there is no sample PDF.
macro_rules! e2e_skip_unless_ready {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        match sample_pdfs().into_iter().next() {
            Some(p) => p,
            None => {
                println!("SKIP: no sample certificate in {}", test_cases_dir().display());
                return;
            }
        }
    }};
}

/// Structural checks every extracted record must pass.
fn assert_record_shape(record: &CertificateRecord, context: &str) {
    assert!(
        record.total_weights() > 0,
        "[{context}] no weights recovered from any table"
    );

    for set in &record.sets {
        assert!(!set.id.is_empty(), "[{context}] set with empty id");
        for entry in &set.weights {
            assert!(
                entry.weight_id.starts_with(&set.id),
                "[{context}] {} filed under set {}",
                entry.weight_id,
                set.id
            );
            assert!(
                record.weights.iter().all(|w| w.weight_id != entry.weight_id),
                "[{context}] {} is both top-level and in set {}",
                entry.weight_id,
                set.id
            );
        }
    }

    for entry in record.weights.iter().chain(record.sets.iter().flat_map(|s| &s.weights)) {
        assert!(entry.nominal.is_finite(), "[{context}] {} nominal not finite", entry.weight_id);
        if let Some(u) = entry.uncertainty {
            assert!(u >= 0.0, "[{context}] {} has negative uncertainty", entry.weight_id);
        }
    }

    let mut ids: Vec<&str> = record.weights.iter().map(|w| w.weight_id.as_str()).collect();
    let before = ids.len();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(before, ids.len(), "[{context}] duplicate top-level weight ids");
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_engines_available() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
        return;
    }
    let engines = Engines::detect(&ExtractionConfig::default()).expect("pdfium and tesseract must be installed");
    println!(
        "rasterizer: {}, ocr: {}",
        engines.rasterizer.name(),
        engines.ocr.name()
    );
}

#[tokio::test]
async fn test_extract_all_samples() {
    let _first = e2e_skip_unless_ready!();
    let config = ExtractionConfig::builder().schema(SchemaChoice::BuiltIn).build().unwrap();

    for pdf in sample_pdfs() {
        let name = pdf.file_name().unwrap().to_string_lossy().into_owned();
        let output = extract_file(&pdf, &config)
            .await
            .unwrap_or_else(|e| panic!("[{name}] extraction failed: {e}"));

        assert_record_shape(&output.record, &name);
        assert!(output.stats.total_pages > 0, "[{name}] zero pages");
        assert!(output.validation.is_some(), "[{name}] built-in schema did not run");

        println!(
            "[{name}] {} pages, {} top-level + {} in {} sets, {} warnings, {}ms",
            output.stats.total_pages,
            output.stats.top_level_weights,
            output.stats.set_weights,
            output.stats.weight_sets,
            output.warnings.len(),
            output.stats.total_duration_ms
        );
        for w in &output.warnings {
            println!("    {w}");
        }
        if let Some(ValidationResult::Invalid(ref violations)) = output.validation {
            for v in violations {
                println!("    schema: {} {}", v.path, v.message);
            }
        }
    }
}

#[tokio::test]
async fn test_certificate_number_found() {
    let pdf = e2e_skip_unless_ready!();
    let output = extract_file(&pdf, &ExtractionConfig::default()).await.unwrap();
    let number = output
        .record
        .metadata
        .certificate_number
        .as_deref()
        .expect("certificate number on page 1");
    assert!(
        number.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '/'),
        "unexpected characters in certificate number {number:?}"
    );
}

#[tokio::test]
async fn test_cache_second_run_renders_nothing() {
    let pdf = e2e_skip_unless_ready!();
    let config = ExtractionConfig::default();
    let document = Document::from_path(&pdf).await.unwrap();
    let engines = Engines::detect(&config).unwrap();
    let extractor = Extractor::new(config, engines);

    let first = extractor.extract(&document).await.unwrap();
    let second = extractor.extract(&document).await.unwrap();

    assert_eq!(first.record, second.record, "same input must give the same record");
    assert_eq!(second.stats.pages_rendered, 0);
    assert_eq!(first.stats.pages_rendered, first.stats.total_pages);
}

#[tokio::test]
async fn test_directory_cache_between_extractors() {
    let pdf = e2e_skip_unless_ready!();
    let dir = tempfile::tempdir().unwrap();
    let config = ExtractionConfig::builder()
        .cache(CacheMode::Directory(dir.path().to_path_buf()))
        .build()
        .unwrap();
    let document = Document::from_path(&pdf).await.unwrap();

    let first = Extractor::new(config.clone(), Engines::detect(&config).unwrap())
        .extract(&document)
        .await
        .unwrap();

    let cache = Arc::new(PageCache::new(config.cache.clone()));
    let second = Extractor::with_cache(config.clone(), Engines::detect(&config).unwrap(), cache.clone())
        .extract(&document)
        .await
        .unwrap();

    assert_eq!(first.record, second.record);
    assert_eq!(cache.stats().renders, 0);
    assert_eq!(cache.stats().disk_hits, first.stats.total_pages);
}

#[tokio::test]
async fn test_higher_dpi_rerun() {
    let pdf = e2e_skip_unless_ready!();
    let config = ExtractionConfig::default();
    let document = Document::from_path(&pdf).await.unwrap();
    let extractor = Extractor::new(config.clone(), Engines::detect(&config).unwrap());

    let base = extractor.extract(&document).await.unwrap();
    let high = extractor.extract_at_dpi(&document, 300).await.unwrap();

    assert_eq!(high.stats.pages_rendered, high.stats.total_pages);
    println!(
        "180 DPI: {} weights, {} dropped; 300 DPI: {} weights, {} dropped",
        base.record.total_weights(),
        base.stats.dropped_lines,
        high.record.total_weights(),
        high.stats.dropped_lines
    );
}

#[tokio::test]
async fn test_extract_to_file_writes_json() {
    let pdf = e2e_skip_unless_ready!();
    let stem = pdf.file_stem().unwrap().to_string_lossy().into_owned();
    let out_path = output_dir().join(format!("{stem}_converted.json"));
    let _ = std::fs::remove_file(&out_path);

    let output = extract_to_file(&pdf, &out_path, &ExtractionConfig::default())
        .await
        .unwrap();

    let written: CertificateRecord = serde_json::from_str(&std::fs::read_to_string(&out_path).unwrap()).unwrap();
    assert_eq!(written, output.record);
    assert!(!out_path.with_extension("json.tmp").exists());
    assert_eq!(
        default_output_path(&pdf).file_name().unwrap().to_string_lossy(),
        format!("{stem}_converted.json")
    );
}

#[test]
fn test_sync_wrapper() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
        return;
    }
    let Some(pdf) = sample_pdfs().into_iter().next() else {
        println!("SKIP: no sample certificate in {}", test_cases_dir().display());
        return;
    };
    let output = extract_sync(&pdf, &ExtractionConfig::default()).unwrap();
    assert_record_shape(&output.record, "sync");
}

#[tokio::test]
async fn test_missing_file() {
    let err = extract_file(test_cases_dir().join("does-not-exist.pdf"), &ExtractionConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CertError::FileNotFound { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_missing_tesseract_binary() {
    let pdf = e2e_skip_unless_ready!();
    let config = ExtractionConfig::builder()
        .tesseract_binary("/nonexistent/bin/tesseract")
        .build()
        .unwrap();
    let err = extract_file(&pdf, &config).await.unwrap_err();
    assert!(
        matches!(err, CertError::EngineUnavailable { .. }),
        "got {err:?}"
    );
}
