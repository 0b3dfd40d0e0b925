//! Field extraction and coercion shared by the record decoders.

use crate::error::{RecordError, Result};
use crate::model::value::{Value, ValueMap};
use chrono::{DateTime, Utc};

/// Returns the field when it is present and not `Nil`.
pub(crate) fn optional<'a>(map: &'a ValueMap, field: &str) -> Option<&'a Value> {
    map.get(field).filter(|v| !v.is_nil())
}

pub(crate) fn required<'a>(map: &'a ValueMap, field: &'static str) -> Result<&'a Value> {
    optional(map, field).ok_or(RecordError::MissingField(field))
}

pub(crate) fn string(value: &Value, field: &'static str) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| RecordError::invalid(field, format!("expected string, got {}", value)))
}

pub(crate) fn float(value: &Value, field: &'static str) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| RecordError::invalid(field, format!("expected number, got {}", value)))
}

pub(crate) fn integer(value: &Value, field: &'static str) -> Result<i64> {
    value
        .as_i64()
        .ok_or_else(|| RecordError::invalid(field, format!("expected integer, got {}", value)))
}

pub(crate) fn time(value: &Value, field: &'static str) -> Result<DateTime<Utc>> {
    value
        .as_time()
        .ok_or_else(|| RecordError::invalid(field, format!("expected timestamp, got {}", value)))
}

/// Checks a positional tuple's arity and returns its items.
pub(crate) fn tuple<'a>(
    value: &'a Value,
    record: &'static str,
    min: usize,
    max: usize,
) -> Result<&'a [Value]> {
    let items = value
        .as_list()
        .ok_or_else(|| RecordError::malformed(record, format!("expected list, got {}", value)))?;
    if items.len() < min || items.len() > max {
        return Err(RecordError::malformed(
            record,
            format!("expected {}..={} items, got {}", min, max, items.len()),
        ));
    }
    Ok(items)
}

/// Positional item that may be missing or `Nil`.
pub(crate) fn nth(items: &[Value], index: usize) -> Option<&Value> {
    items.get(index).filter(|v| !v.is_nil())
}
