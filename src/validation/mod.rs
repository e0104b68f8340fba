//! Metadata validation.
//!
//! Turns the loosely typed metadata produced by extraction into the flat,
//! scalar-only [`Metadata`] that the vector store can persist. Invalid fields
//! are dropped and logged; validation itself never fails.

use serde_json::Value;
use thiserror::Error;
use tracing::error;

use crate::models::{Metadata, MetadataValue, RawMetadata, BIBTEX_CITATION, PAGE_NUM, PAPER_NAME};

/// Fields that must be present and non-empty.
pub const REQUIRED_FIELDS: [&str; 3] = [PAPER_NAME, PAGE_NUM, BIBTEX_CITATION];

/// Reason a metadata field was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is absent or empty
    #[error("Missing or empty {field} in metadata")]
    MissingField { field: String },

    /// The field's value has a type the store cannot hold
    #[error("Unsupported metadata type for key {field}: {kind}")]
    UnsupportedType { field: String, kind: &'static str },
}

impl ValidationError {
    pub fn field(&self) -> &str {
        match self {
            ValidationError::MissingField { field } => field,
            ValidationError::UnsupportedType { field, .. } => field,
        }
    }
}

/// Validate metadata, logging every dropped field.
pub fn validate_metadata(raw: &RawMetadata) -> Metadata {
    let (metadata, errors) = validate_metadata_with_report(raw);
    let paper = metadata.paper_name().unwrap_or("<unknown>");
    for err in &errors {
        error!(paper = %paper, field = err.field(), "{}", err);
    }
    metadata
}

/// Validate metadata and return the dropped fields instead of logging them.
pub fn validate_metadata_with_report(raw: &RawMetadata) -> (Metadata, Vec<ValidationError>) {
    let mut metadata = Metadata::new();
    let mut errors = Vec::new();

    for field in REQUIRED_FIELDS {
        if !raw.contains_key(field) {
            errors.push(ValidationError::MissingField {
                field: field.to_string(),
            });
        }
    }

    for (key, value) in raw {
        if REQUIRED_FIELDS.contains(&key.as_str()) && is_empty(value) {
            errors.push(ValidationError::MissingField { field: key.clone() });
            continue;
        }

        match to_scalar(value) {
            Ok(scalar) => metadata.insert(key.clone(), scalar),
            Err(kind) => errors.push(ValidationError::UnsupportedType {
                field: key.clone(),
                kind,
            }),
        }
    }

    (metadata, errors)
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn to_scalar(value: &Value) -> Result<MetadataValue, &'static str> {
    match value {
        Value::String(s) => Ok(MetadataValue::Text(s.clone())),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(MetadataValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(MetadataValue::Float(f))
            } else {
                Err("number")
            }
        }
        // Nested records are flattened into their JSON text.
        Value::Object(_) => Ok(MetadataValue::Text(value.to_string())),
        Value::Array(_) => Err("array"),
        Value::Bool(_) => Err("bool"),
        Value::Null => Err("null"),
    }
}
