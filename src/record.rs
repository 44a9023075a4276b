//! Output types: the certificate record and the per-run envelope around it.
//!
//! [`CertificateRecord`] is the only externally meaningful artifact. Its JSON
//! form is flat: metadata keys sit next to `weights` and `sets`.
//!
//! ```json
//! {
//!   "certificate_number": "CM-25-181B", "title": "ON-SITE CALIBRATION CERTIFICATE",
//!   "pages": 12, "issuing_lab": "CM LAB (Pty) Ltd", "date_issued": "2025-03-14",
//!   "date_expiry": "2026-03-13", "customer_name": "Bloem Water",
//!   "weights": [{"weight_id": "WFS001", "nominal": 20000.0, "actual_after": 20000.12, "uncertainty": 0.15}],
//!   "sets": [{"id": "W1", "weights": [ ... ]}]
//! }
//! ```

use crate::error::Warning;
use crate::pipeline::validate::ValidationResult;
use serde::{Deserialize, Serialize};

/// Certificate-level fields. Every field is optional: unmatched means absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateMetadata {
    pub certificate_number: Option<String>,
    pub title: Option<String>,
    /// Declared page count, or the rasterized count when none is declared.
    pub pages: Option<u32>,
    pub issuing_lab: Option<String>,
    /// Canonical `YYYY-MM-DD` when the source date could be parsed.
    pub date_issued: Option<String>,
    pub date_expiry: Option<String>,
    pub customer_name: Option<String>,
    pub accreditation_body: Option<String>,
    pub contact_person: Option<String>,
    /// Every distinct date on the first page, in reading order.
    pub calibration_dates: Vec<String>,
}

impl CertificateMetadata {
    /// Names of the core fields that are absent, in output order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        let fields: [(&'static str, bool); 7] = [
            ("certificate_number", self.certificate_number.is_none()),
            ("title", self.title.is_none()),
            ("pages", self.pages.is_none()),
            ("issuing_lab", self.issuing_lab.is_none()),
            ("date_issued", self.date_issued.is_none()),
            ("date_expiry", self.date_expiry.is_none()),
            ("customer_name", self.customer_name.is_none()),
        ];
        for (name, absent) in fields {
            if absent {
                missing.push(name);
            }
        }
        missing
    }
}

/// One calibrated weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightEntry {
    pub weight_id: String,
    /// Nominal mass.
    pub nominal: f64,
    /// Measured mass after calibration.
    pub actual_after: Option<f64>,
    /// Expanded uncertainty, never negative.
    pub uncertainty: Option<f64>,
}

impl WeightEntry {
    pub fn new(weight_id: impl Into<String>, nominal: f64) -> Self {
        Self {
            weight_id: weight_id.into(),
            nominal,
            actual_after: None,
            uncertainty: None,
        }
    }

    pub fn with_actual(mut self, actual_after: f64) -> Self {
        self.actual_after = Some(actual_after);
        self
    }

    pub fn with_uncertainty(mut self, uncertainty: f64) -> Self {
        self.uncertainty = Some(uncertainty.abs());
        self
    }

    /// True when every measured field was recovered.
    pub fn is_complete(&self) -> bool {
        self.actual_after.is_some() && self.uncertainty.is_some()
    }
}

/// A named group of weights reported together, e.g. `W1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightSet {
    pub id: String,
    pub weights: Vec<WeightEntry>,
}

impl WeightSet {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            weights: Vec::new(),
        }
    }
}

/// Metadata plus top-level weights plus weight sets, built once per document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CertificateRecord {
    #[serde(flatten)]
    pub metadata: CertificateMetadata,
    #[serde(default)]
    pub weights: Vec<WeightEntry>,
    #[serde(default)]
    pub sets: Vec<WeightSet>,
}

impl CertificateRecord {
    /// Top-level weights plus every weight inside a set.
    pub fn total_weights(&self) -> usize {
        self.weights.len() + self.sets.iter().map(|s| s.weights.len()).sum::<usize>()
    }

    pub fn find_set(&self, id: &str) -> Option<&WeightSet> {
        self.sets.iter().find(|s| s.id == id)
    }

    /// Split back into the triple the record was assembled from.
    pub fn into_parts(self) -> (CertificateMetadata, Vec<WeightEntry>, Vec<WeightSet>) {
        (self.metadata, self.weights, self.sets)
    }

    /// Pretty-printed JSON in the published record shape.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Timing and count statistics for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Pages in the document.
    pub total_pages: usize,
    /// Pages where OCR recognised nothing.
    pub empty_pages: usize,
    /// Pages rendered during this run (cache misses).
    pub pages_rendered: usize,
    pub top_level_weights: usize,
    pub weight_sets: usize,
    pub set_weights: usize,
    /// Table-like lines discarded for lack of a valid weight id.
    pub dropped_lines: usize,
    /// Wall-clock time spent rasterizing and OCRing.
    pub page_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything one run hands back: the record and what happened producing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub record: CertificateRecord,
    /// Non-fatal conditions in the order they were recorded.
    pub warnings: Vec<Warning>,
    /// Present when a schema was configured and could be compiled.
    pub validation: Option<ValidationResult>,
    pub stats: ExtractionStats,
}

impl ExtractionOutput {
    /// False only when a schema was applied and the record failed it.
    pub fn is_valid(&self) -> bool {
        self.validation.as_ref().map_or(true, ValidationResult::is_valid)
    }
}
