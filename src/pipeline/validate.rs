//! JSON Schema verification of an assembled record.
//!
//! Validation is advisory: a non-conforming record yields
//! [`ValidationResult::Invalid`] with one [`Violation`] per problem, never an
//! error. Only a schema that is not itself valid JSON Schema fails, with
//! [`CertError::Schema`].
//!
//! Absent metadata fields serialise as `null`. They are removed from the
//! instance before validation so that `required` reports them as missing
//! rather than a `type` keyword reporting a null.

use crate::error::CertError;
use crate::record::CertificateRecord;
use jsonschema::error::ValidationErrorKind;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

/// One schema violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// JSON pointer to the offending value (`/certificate_number`,
    /// `/sets/0/weights/2/uncertainty`).
    pub path: String,
    pub message: String,
}

/// Outcome of validating one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "violations", rename_all = "snake_case")]
pub enum ValidationResult {
    Valid,
    /// Violations in the order the validator reported them.
    Invalid(Vec<Violation>),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            ValidationResult::Valid => &[],
            ValidationResult::Invalid(v) => v,
        }
    }
}

/// Schema used when the caller asks for validation without supplying one.
pub static BUILT_IN_SCHEMA: Lazy<Value> = Lazy::new(|| {
    let weight = json!({
        "type": "object",
        "required": ["weight_id", "nominal"],
        "properties": {
            "weight_id": { "type": "string", "minLength": 1 },
            "nominal": { "type": "number" },
            "actual_after": { "type": ["number", "null"] },
            "uncertainty": { "type": ["number", "null"], "minimum": 0 }
        }
    });
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "Weight calibration certificate",
        "type": "object",
        "required": ["certificate_number", "pages", "weights", "sets"],
        "properties": {
            "certificate_number": { "type": "string", "minLength": 1 },
            "title": { "type": "string" },
            "pages": { "type": "integer", "minimum": 1 },
            "issuing_lab": { "type": "string" },
            "date_issued": { "type": "string" },
            "date_expiry": { "type": "string" },
            "customer_name": { "type": "string" },
            "accreditation_body": { "type": "string" },
            "contact_person": { "type": "string" },
            "calibration_dates": { "type": "array", "items": { "type": "string" } },
            "weights": { "type": "array", "items": weight },
            "sets": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["id", "weights"],
                    "properties": {
                        "id": { "type": "string", "minLength": 1 },
                        "weights": { "type": "array", "items": weight }
                    }
                }
            }
        }
    })
});

#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaValidator;

impl SchemaValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate `record` against `schema`.
    pub fn validate(&self, record: &CertificateRecord, schema: &Value) -> Result<ValidationResult, CertError> {
        let validator = jsonschema::validator_for(schema).map_err(|e| CertError::Schema(e.to_string()))?;
        let instance = record_instance(record)?;

        let violations: Vec<Violation> = validator
            .iter_errors(&instance)
            .map(|error| {
                let mut path = error.instance_path.to_string();
                if let ValidationErrorKind::Required { property } = &error.kind {
                    let name = property
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| property.to_string());
                    path = format!("{path}/{name}");
                }
                Violation {
                    path,
                    message: error.to_string(),
                }
            })
            .collect();

        debug!("Schema validation: {} violation(s)", violations.len());
        if violations.is_empty() {
            Ok(ValidationResult::Valid)
        } else {
            Ok(ValidationResult::Invalid(violations))
        }
    }

    /// Validate against [`BUILT_IN_SCHEMA`].
    pub fn validate_built_in(&self, record: &CertificateRecord) -> Result<ValidationResult, CertError> {
        self.validate(record, &BUILT_IN_SCHEMA)
    }
}

/// The record as JSON with top-level nulls removed.
fn record_instance(record: &CertificateRecord) -> Result<Value, CertError> {
    let mut instance =
        serde_json::to_value(record).map_err(|e| CertError::Internal(format!("Record serialisation failed: {e}")))?;
    if let Value::Object(ref mut map) = instance {
        map.retain(|_, v| !v.is_null());
    }
    Ok(instance)
}
