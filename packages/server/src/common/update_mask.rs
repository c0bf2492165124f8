//! Update-mask validation shared by every partial-update operation.
//!
//! Callers submit a list of field names plus a JSON object of new values. Only the
//! named fields are applied; any other field in the payload is ignored. A field
//! name that isn't recognized for the target entity, or a required field that's in
//! the mask but has no value supplied, is a validation error.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MaskError {
    #[error("unknown field '{0}' in update mask")]
    UnknownField(String),
    #[error("field '{0}' is required but present in the mask without a value")]
    MissingValue(String),
}

/// Describes one field recognized by an entity's update mask.
pub struct FieldSpec {
    pub name: &'static str,
    pub required: bool,
}

pub const fn field(name: &'static str, required: bool) -> FieldSpec {
    FieldSpec { name, required }
}

/// Validates `mask` against `recognized` fields, using `values` to check that
/// required fields carry a non-null value. Returns the subset of `mask` entries
/// that are safe to apply, in the caller's original order.
pub fn validate<'a>(
    mask: &'a [String],
    recognized: &[FieldSpec],
    values: &Value,
) -> Result<Vec<&'a str>, MaskError> {
    let mut applied = Vec::with_capacity(mask.len());

    for name in mask {
        let spec = recognized
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| MaskError::UnknownField(name.clone()))?;

        if spec.required {
            let has_value = values
                .get(name)
                .map(|v| !v.is_null())
                .unwrap_or(false);
            if !has_value {
                return Err(MaskError::MissingValue(name.clone()));
            }
        }

        applied.push(name.as_str());
    }

    Ok(applied)
}
