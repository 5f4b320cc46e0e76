//! Noise-field removal applied to every page before persistence.

use serde_json::{Map, Value};

/// Fields dropped by default: bulky nested objects the downstream pipeline
/// never looks at.
pub const DEFAULT_NOISE_FIELDS: [&str; 3] = ["image", "insertUser", "attributes"];

pub fn default_noise_fields() -> Vec<String> {
    DEFAULT_NOISE_FIELDS.iter().map(|s| s.to_string()).collect()
}

/// Remove the configured noise fields from each record. Records that do not
/// carry a given noise field are left untouched; every other key passes
/// through unchanged. Returns the sanitized rows.
pub fn strip_noise_fields(
    records: Vec<Map<String, Value>>,
    noise_fields: &[String],
) -> Vec<Map<String, Value>> {
    records
        .into_iter()
        .map(|mut record| {
            for field in noise_fields {
                record.remove(field);
            }
            record
        })
        .collect()
}
