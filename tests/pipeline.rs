//! Pipeline tests over the public API with scripted engines.
//!
//! No pdfium or tesseract needed: `ScriptedRasterizer` stands in for the
//! rasterizer and `ScriptedOcr` returns fixed text per page.

use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use weightcert::pipeline::assemble::RecordAssembler;
use weightcert::pipeline::ocr::TextExtractor;
use weightcert::pipeline::render::PageRasterizer;
use weightcert::{
    CacheMode, CancelToken, CertError, CertificateMetadata, CertificateRecord, Document, EngineKind, Engines,
    ExtractionConfig, ExtractionProgressCallback, Extractor, PageCache, SchemaChoice, SchemaValidator,
    ScriptedOcr, ScriptedRasterizer, ValidationResult, WarningCode, WeightEntry, WeightSet,
};

// ── Helpers ──────────────────────────────────────────────────────────────────

const PAGE_ONE: &str = "\
MASS CALIBRATION CERTIFICATE
Certificate No. CM-25-181B
Issued by: ACME MASS LABORATORY
Date of Issue: 14/03/2025
Customer: Harbour Scales Ltd
Page 1 of 2
W1
W1-500  500  500.02  0.05
WFS001 20000 20000.12 0.15";

const PAGE_TWO: &str = "\
Certificate No. CM-25-181B  Page 2 of 2
WES123 20000
20000.09 0.12
WES124 20000 20000.11 0.12";

fn pdf() -> Document {
    Document::from_bytes(b"%PDF-1.7\nscripted certificate".to_vec())
}

fn engines(rasterizer: ScriptedRasterizer, pages: &[&str]) -> Engines {
    Engines::new(Arc::new(rasterizer), Arc::new(ScriptedOcr::new(pages.iter().copied())))
}

fn extractor(pages: &[&str]) -> Extractor {
    Extractor::new(
        ExtractionConfig::default(),
        engines(ScriptedRasterizer::new(pages.len()), pages),
    )
}

// ── Weight tables ────────────────────────────────────────────────────────────

#[tokio::test]
async fn sets_and_top_level_weights_are_separated() {
    let out = extractor(&["W1\nW1-500  500  500.02  0.05\nWFS001 20000 20000.12 0.15"])
        .extract(&pdf())
        .await
        .unwrap();

    let v = serde_json::to_value(&out.record).unwrap();
    assert_eq!(
        v["sets"],
        json!([{
            "id": "W1",
            "weights": [{ "weight_id": "W1-500", "nominal": 500.0, "actual_after": 500.02, "uncertainty": 0.05 }]
        }])
    );
    assert_eq!(
        v["weights"],
        json!([{ "weight_id": "WFS001", "nominal": 20000.0, "actual_after": 20000.12, "uncertainty": 0.15 }])
    );
}

#[tokio::test]
async fn split_row_parses_like_single_line() {
    let split = extractor(&["WES123 20000\n20000.09 0.12"]).extract(&pdf()).await.unwrap();
    let joined = extractor(&["WES123 20000 20000.09 0.12"]).extract(&pdf()).await.unwrap();

    assert_eq!(split.record.weights, joined.record.weights);
    assert_eq!(
        split.record.weights,
        vec![WeightEntry::new("WES123", 20000.0)
            .with_actual(20000.09)
            .with_uncertainty(0.12)]
    );
}

#[tokio::test]
async fn duplicate_ids_keep_last_occurrence() {
    let out = extractor(&[
        "WFS001 20000 20000.10 0.15\nWFS002 20000 20000.20 0.15",
        "WFS001 20000 20000.12 0.15",
    ])
    .extract(&pdf())
    .await
    .unwrap();

    let ids: Vec<_> = out.record.weights.iter().map(|w| w.weight_id.as_str()).collect();
    assert_eq!(ids, vec!["WFS001", "WFS002"]);
    assert_eq!(out.record.weights[0].actual_after, Some(20000.12));
    let dup = out
        .warnings
        .iter()
        .find(|w| w.code == WarningCode::DuplicateWeightId)
        .unwrap();
    assert_eq!(dup.page, Some(2));
}

#[tokio::test]
async fn no_entry_is_in_both_collections() {
    let out = extractor(&[
        "Set No. W1\nW1-500 500 500.02 0.05\nW1-200 200 200.01 0.03\nWFS001 20000 20000.12 0.15",
        "W2\nW2-100 100 100.004 0.002\n50 50.001 0.001\nWES001 20000 20000.05 0.12",
    ])
    .extract(&pdf())
    .await
    .unwrap();
    let record = &out.record;

    for set in &record.sets {
        for entry in &set.weights {
            assert!(entry.weight_id.starts_with(&set.id), "{} in {}", entry.weight_id, set.id);
            assert!(record.weights.iter().all(|w| w.weight_id != entry.weight_id));
        }
    }
    assert_eq!(record.find_set("W2").unwrap().weights[1].weight_id, "W2-50");
    // A row without the open set's prefix closes the set.
    assert_eq!(record.weights.last().unwrap().weight_id, "WES001");
    assert_eq!(record.total_weights(), 6);
}

#[tokio::test]
async fn set_continues_across_pages() {
    let out = extractor(&["W1\nW1-500 500 500.02 0.05", "W1-200 200 200.01 0.03"])
        .extract(&pdf())
        .await
        .unwrap();
    assert_eq!(out.record.sets.len(), 1);
    assert_eq!(out.record.sets[0].weights.len(), 2);
    assert!(out.record.weights.is_empty());
}

#[tokio::test]
async fn orphaned_rows_are_counted_and_warned() {
    let out = extractor(&["WFS001 20000 20000.12 0.15\nW?S0#1 20000 20000.13 0.15\n20000.14 0.15"])
        .extract(&pdf())
        .await
        .unwrap();
    assert_eq!(out.record.weights.len(), 1);
    assert!(out.stats.dropped_lines >= 1);
    assert!(out
        .warnings
        .iter()
        .any(|w| w.code == WarningCode::DroppedLines && w.page == Some(1)));
}

// ── Metadata ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn header_fields_are_extracted() {
    let out = extractor(&[PAGE_ONE, PAGE_TWO]).extract(&pdf()).await.unwrap();
    let meta = &out.record.metadata;

    assert_eq!(meta.certificate_number.as_deref(), Some("CM-25-181B"));
    assert_eq!(meta.title.as_deref(), Some("MASS CALIBRATION CERTIFICATE"));
    assert_eq!(meta.date_issued.as_deref(), Some("2025-03-14"));
    assert_eq!(meta.customer_name.as_deref(), Some("Harbour Scales Ltd"));
    assert_eq!(meta.pages, Some(2));
    assert!(meta.issuing_lab.as_deref().unwrap().contains("ACME MASS LABORATORY"));
    assert_eq!(out.record.weights.len(), 3);
    assert_eq!(out.record.sets.len(), 1);
}

#[tokio::test]
async fn unmatched_fields_are_absent_not_errors() {
    let out = extractor(&["WFS001 20000 20000.12 0.15"]).extract(&pdf()).await.unwrap();
    let meta = &out.record.metadata;
    assert!(meta.certificate_number.is_none());
    assert!(meta.date_issued.is_none());
    assert!(out
        .warnings
        .iter()
        .any(|w| w.code == WarningCode::MissingField && w.message.contains("certificate_number")));

    let v = serde_json::to_value(&out.record).unwrap();
    assert!(v["certificate_number"].is_null());
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rasterizer_failure_is_fatal_with_no_record() {
    let pages = ["WFS001 20000 20000.12 0.15", "WFS002 20000 20000.20 0.15", "x"];
    let ex = Extractor::new(
        ExtractionConfig::default(),
        engines(ScriptedRasterizer::new(3).failing_on(1), &pages),
    );
    match ex.extract(&pdf()).await {
        Err(CertError::Rasterization { page, .. }) => assert_eq!(page, Some(2)),
        other => panic!("expected a rasterization error, got {other:?}"),
    }
}

#[tokio::test]
async fn corrupt_pdf_is_a_rasterization_error() {
    let ex = Extractor::new(
        ExtractionConfig::default(),
        engines(ScriptedRasterizer::new(1).corrupt(), &["x"]),
    );
    let err = ex.extract(&pdf()).await.unwrap_err();
    assert!(matches!(err, CertError::Rasterization { page: None, .. }));
}

#[tokio::test]
async fn non_pdf_bytes_are_rejected_before_rendering() {
    let raster = Arc::new(ScriptedRasterizer::new(1));
    let ex = Extractor::new(
        ExtractionConfig::default(),
        Engines::new(raster.clone(), Arc::new(ScriptedOcr::new(["x"]))),
    );
    let err = ex
        .extract(&Document::from_bytes(b"PK\x03\x04 not a pdf".to_vec()))
        .await
        .unwrap_err();
    assert!(matches!(err, CertError::Rasterization { .. }));
    assert_eq!(raster.render_count(), 0);
}

#[tokio::test]
async fn all_empty_pages_is_fatal() {
    let err = extractor(&["", "   \n\t"]).extract(&pdf()).await.unwrap_err();
    assert!(matches!(err, CertError::EmptyDocumentText { pages: 2 }));
}

#[tokio::test]
async fn missing_ocr_engine_is_fatal() {
    let engines = Engines::new(Arc::new(ScriptedRasterizer::new(1)), Arc::new(ScriptedOcr::unavailable()));
    let err = engines.probe().unwrap_err();
    assert!(matches!(err, CertError::EngineUnavailable { engine: EngineKind::Ocr, .. }));

    let err = Extractor::new(ExtractionConfig::default(), engines)
        .extract(&pdf())
        .await
        .unwrap_err();
    assert!(matches!(err, CertError::EngineUnavailable { engine: EngineKind::Ocr, .. }));
}

#[tokio::test]
async fn slow_page_times_out_as_rasterization_error() {
    let config = ExtractionConfig::builder().page_timeout_secs(1).build().unwrap();
    let ex = Extractor::new(
        config,
        engines(ScriptedRasterizer::new(1).with_delay(Duration::from_millis(1500)), &["x"]),
    );
    let err = ex.extract(&pdf()).await.unwrap_err();
    assert!(matches!(err, CertError::Rasterization { page: Some(1), .. }));
}

#[tokio::test]
async fn cancelled_token_stops_the_run() {
    let token = CancelToken::new();
    token.cancel();
    let raster = Arc::new(ScriptedRasterizer::new(4));
    let ex = Extractor::new(
        ExtractionConfig::default(),
        Engines::new(raster.clone(), Arc::new(ScriptedOcr::new(["a", "b", "c", "d"]))),
    );
    let err = ex.extract_with_cancel(&pdf(), &token).await.unwrap_err();
    assert!(matches!(err, CertError::Cancelled));
    assert_eq!(raster.render_count(), 0);
}

/// Cancels the token as soon as page 1 starts.
struct CancelOnFirstPage(CancelToken);

impl ExtractionProgressCallback for CancelOnFirstPage {
    fn on_page_start(&self, page: usize, _total: usize) {
        if page == 1 {
            self.0.cancel();
        }
    }
}

#[tokio::test]
async fn cancelling_mid_run_stops_new_pages() {
    let token = CancelToken::new();
    let raster = Arc::new(ScriptedRasterizer::new(4));
    let config = ExtractionConfig::builder()
        .concurrency(1)
        .progress_callback(Arc::new(CancelOnFirstPage(token.clone())))
        .build()
        .unwrap();
    let ex = Extractor::new(
        config,
        Engines::new(raster.clone(), Arc::new(ScriptedOcr::new(["a", "b", "c", "d"]))),
    );
    let err = ex.extract_with_cancel(&pdf(), &token).await.unwrap_err();
    assert!(matches!(err, CertError::Cancelled));
    // Page 1 was already in flight and finished; nothing after it started.
    assert_eq!(raster.render_count(), 1);
}

#[tokio::test]
async fn slow_ocr_times_out_as_engine_unavailable() {
    let config = ExtractionConfig::builder().page_timeout_secs(1).build().unwrap();
    let ex = Extractor::new(
        config,
        Engines::new(
            Arc::new(ScriptedRasterizer::new(1)),
            Arc::new(ScriptedOcr::new(["WFS001 20000 20000.12 0.15"]).with_delay(Duration::from_millis(1500))),
        ),
    );
    let err = ex.extract(&pdf()).await.unwrap_err();
    assert!(matches!(err, CertError::EngineUnavailable { engine: EngineKind::Ocr, .. }));
}

// ── Caching ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn second_rasterization_is_identical_and_free() {
    let backend = Arc::new(ScriptedRasterizer::new(3));
    let rasterizer = PageRasterizer::new(backend.clone(), Arc::new(PageCache::default()), Duration::from_secs(5));
    let doc = pdf();

    let first = rasterizer.rasterize(&doc, 180).await.unwrap();
    let second = rasterizer.rasterize(&doc, 180).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(backend.render_count(), 3);
    assert_eq!(rasterizer.cache().stats().memory_hits, 3);

    // A different DPI is a different key.
    rasterizer.rasterize(&doc, 300).await.unwrap();
    assert_eq!(backend.render_count(), 6);
}

#[tokio::test]
async fn disabled_cache_renders_every_time() {
    let backend = Arc::new(ScriptedRasterizer::new(2));
    let rasterizer = PageRasterizer::new(backend.clone(), Arc::new(PageCache::disabled()), Duration::from_secs(5));
    rasterizer.rasterize(&pdf(), 180).await.unwrap();
    rasterizer.rasterize(&pdf(), 180).await.unwrap();
    assert_eq!(backend.render_count(), 4);
}

#[tokio::test]
async fn directory_cache_survives_a_new_cache_instance() {
    let dir = tempfile::tempdir().unwrap();
    let mode = CacheMode::Directory(dir.path().to_path_buf());
    let doc = pdf();

    let first_backend = Arc::new(ScriptedRasterizer::new(2));
    let first = PageRasterizer::new(
        first_backend.clone(),
        Arc::new(PageCache::new(mode.clone())),
        Duration::from_secs(5),
    );
    let images = first.rasterize(&doc, 150).await.unwrap();

    let second_backend = Arc::new(ScriptedRasterizer::new(2));
    let cache = Arc::new(PageCache::new(mode));
    let second = PageRasterizer::new(second_backend.clone(), cache.clone(), Duration::from_secs(5));
    let reloaded = second.rasterize(&doc, 150).await.unwrap();

    assert_eq!(images, reloaded);
    assert_eq!(second_backend.render_count(), 0);
    assert_eq!(cache.stats().disk_hits, 2);
    assert!(dir
        .path()
        .join(doc.fingerprint().as_str())
        .join("150")
        .join("page_1.png")
        .exists());
}

#[tokio::test]
async fn shared_cache_spans_extractors() {
    let cache = Arc::new(PageCache::default());
    let backend = Arc::new(ScriptedRasterizer::new(2));
    let pages = ["WFS001 20000 20000.12 0.15", "WFS002 20000 20000.20 0.15"];
    let make = || {
        Extractor::with_cache(
            ExtractionConfig::default(),
            Engines::new(backend.clone(), Arc::new(ScriptedOcr::new(pages))),
            cache.clone(),
        )
    };

    let a = make().extract(&pdf()).await.unwrap();
    let b = make().extract(&pdf()).await.unwrap();
    assert_eq!(a.record, b.record);
    assert_eq!(a.stats.pages_rendered, 2);
    assert_eq!(b.stats.pages_rendered, 0);
    assert_eq!(backend.render_count(), 2);
}

// ── Concurrency and progress ─────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    started: AtomicUsize,
    completed: Mutex<Vec<usize>>,
    finished: Mutex<Option<(usize, usize)>>,
}

impl ExtractionProgressCallback for Recorder {
    fn on_page_start(&self, _page: usize, _total: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_page_complete(&self, page: usize, _total: usize, _lines: usize) {
        self.completed.lock().unwrap().push(page);
    }

    fn on_extraction_complete(&self, total_pages: usize, weights_found: usize) {
        *self.finished.lock().unwrap() = Some((total_pages, weights_found));
    }
}

#[tokio::test]
async fn concurrent_pages_keep_reading_order() {
    let pages: Vec<String> = (1..=8)
        .map(|i| format!("WFS{i:03} 20000 20000.{i:02} 0.15"))
        .collect();
    let recorder = Arc::new(Recorder::default());
    let config = ExtractionConfig::builder()
        .concurrency(4)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let ex = Extractor::new(
        config,
        Engines::new(
            Arc::new(ScriptedRasterizer::new(8).with_delay(Duration::from_millis(10))),
            Arc::new(ScriptedOcr::new(pages)),
        ),
    );

    let out = ex.extract(&pdf()).await.unwrap();
    let ids: Vec<_> = out.record.weights.iter().map(|w| w.weight_id.clone()).collect();
    let expected: Vec<_> = (1..=8).map(|i| format!("WFS{i:03}")).collect();
    assert_eq!(ids, expected);

    assert_eq!(recorder.started.load(Ordering::SeqCst), 8);
    let mut completed = recorder.completed.lock().unwrap().clone();
    completed.sort_unstable();
    assert_eq!(completed, (1..=8).collect::<Vec<_>>());
    assert_eq!(*recorder.finished.lock().unwrap(), Some((8, 8)));
}

#[tokio::test]
async fn text_extractor_reports_empty_page_as_empty() {
    let text = TextExtractor::new(Arc::new(ScriptedOcr::new(["", "x"])), Duration::from_secs(5));
    let backend = Arc::new(ScriptedRasterizer::new(2));
    let rasterizer = PageRasterizer::new(backend, Arc::new(PageCache::default()), Duration::from_secs(5));
    let image = rasterizer.rasterize_page(&pdf(), 0, 180).await.unwrap();
    assert!(text.extract(image).await.unwrap().is_empty());
}

// ── Assembly and validation ──────────────────────────────────────────────────

#[test]
fn assembled_record_round_trips_through_json() {
    let metadata = CertificateMetadata {
        certificate_number: Some("CM-25-181B".into()),
        title: Some("MASS CALIBRATION CERTIFICATE".into()),
        pages: Some(12),
        date_issued: Some("2025-03-14".into()),
        ..Default::default()
    };
    let weights = vec![
        WeightEntry::new("WFS001", 20000.0)
            .with_actual(20000.000000000004)
            .with_uncertainty(0.15),
        WeightEntry::new("WFS002", 20000.0),
    ];
    let mut set = WeightSet::new("W1");
    set.weights.push(WeightEntry::new("W1-0.001", 0.001).with_actual(0.0010000021));

    let record = RecordAssembler::new().assemble(metadata.clone(), weights.clone(), vec![set.clone()]);
    let json = record.to_json_pretty().unwrap();
    let back: CertificateRecord = serde_json::from_str(&json).unwrap();

    assert_eq!(back.into_parts(), (metadata, weights, vec![set]));
}

#[test]
fn missing_certificate_number_is_reported_not_raised() {
    let record = CertificateRecord {
        weights: vec![WeightEntry::new("WFS001", 20000.0)],
        ..Default::default()
    };
    let schema = json!({
        "type": "object",
        "required": ["certificate_number"],
        "properties": { "certificate_number": { "type": "string" } }
    });

    let result = SchemaValidator::new().validate(&record, &schema).unwrap();
    match result {
        ValidationResult::Invalid(violations) => {
            assert!(violations.iter().any(|v| v.path == "/certificate_number"));
        }
        ValidationResult::Valid => panic!("record without certificate_number must not validate"),
    }
}

#[tokio::test]
async fn built_in_schema_runs_inside_extraction() {
    let config = ExtractionConfig::builder().schema(SchemaChoice::BuiltIn).build().unwrap();
    let ex = Extractor::new(config, engines(ScriptedRasterizer::new(2), &[PAGE_ONE, PAGE_TWO]));
    let out = ex.extract(&pdf()).await.unwrap();
    assert_eq!(out.validation, Some(ValidationResult::Valid));
    assert!(out.is_valid());

    let config = ExtractionConfig::builder().schema(SchemaChoice::BuiltIn).build().unwrap();
    let ex = Extractor::new(
        config,
        engines(ScriptedRasterizer::new(1), &["WFS001 20000 20000.12 0.15"]),
    );
    let out = ex.extract(&pdf()).await.unwrap();
    let violations = out.validation.as_ref().unwrap().violations();
    assert!(violations.iter().any(|v| v.path == "/certificate_number"));
    assert!(!out.is_valid());
}
