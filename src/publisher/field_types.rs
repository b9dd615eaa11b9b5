//! Typed construction of device configuration payloads.
//!
//! Field types are declared once in [`FIELD_TYPES`]; every raw text value is
//! converted at the boundary according to that table. Names missing from the
//! table are sent as plain strings.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Number, Value};

use crate::error_handling::types::PublishError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Integer,
    Float,
    Boolean,
    Text,
    /// Arbitrary JSON (arrays, objects).
    Structured,
}

/// Known locator configuration keys.
pub const FIELD_TYPES: &[(&str, FieldType)] = &[
    ("version", FieldType::Integer),
    ("angleCorrectionTimeout", FieldType::Integer),
    ("angleCorrectionDelay", FieldType::Integer),
    ("cteSamplingInterval", FieldType::Integer),
    ("cteLength", FieldType::Integer),
    ("slotDuration", FieldType::Integer),
    ("angleFilteringWeight", FieldType::Float),
    ("angleFiltering", FieldType::Boolean),
    ("aoxMode", FieldType::Text),
    ("antennaMode", FieldType::Text),
    ("cteMode", FieldType::Text),
    ("reportMode", FieldType::Text),
    ("antennaArray", FieldType::Structured),
    ("allowlist", FieldType::Structured),
    ("azimuthMask", FieldType::Structured),
    ("elevationMask", FieldType::Structured),
];

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([A-Za-z0-9_]+)>").expect("placeholder pattern is valid"));

pub fn field_type(name: &str) -> FieldType {
    FIELD_TYPES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, t)| *t)
        .unwrap_or(FieldType::Text)
}

/// Converts one raw value to JSON according to its declared type.
pub fn coerce(name: &str, raw: &str) -> Result<Value, PublishError> {
    let invalid = |reason: String| PublishError::InvalidField {
        name: name.to_string(),
        reason,
    };
    let trimmed = raw.trim();

    match field_type(name) {
        FieldType::Integer => trimmed
            .parse::<i64>()
            .map(Value::from)
            .map_err(|e| invalid(format!("{:?} is not an integer: {}", raw, e))),
        FieldType::Float => {
            let f = trimmed
                .parse::<f64>()
                .map_err(|e| invalid(format!("{:?} is not a number: {}", raw, e)))?;
            Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| invalid(format!("{:?} is not a finite number", raw)))
        }
        // anything other than "true" (any case) is false
        FieldType::Boolean => Ok(Value::Bool(trimmed.eq_ignore_ascii_case("true"))),
        FieldType::Text => Ok(Value::String(raw.to_string())),
        FieldType::Structured => serde_json::from_str(trimmed)
            .map_err(|e| invalid(format!("not valid JSON: {}", e))),
    }
}

/// Builds the JSON object sent to the device. Stops at the first invalid field.
pub fn build_payload(entries: &[(String, String)]) -> Result<Map<String, Value>, PublishError> {
    let mut payload = Map::new();
    for (name, raw) in entries {
        payload.insert(name.clone(), coerce(name, raw)?);
    }
    Ok(payload)
}

/// Splits a `name=value` command-line pair.
pub fn parse_assignment(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected name=value, got {:?}", arg)),
    }
}

/// Replaces `<name>` placeholders in a topic template.
///
/// ```
/// use std::collections::HashMap;
/// use telemetry_ingest::publisher::field_types::resolve_topic;
///
/// let vars = HashMap::from([("locator_id".to_string(), "ble-pd-0C4314F46ABD".to_string())]);
/// let topic = resolve_topic("silabs/aoa/config/<locator_id>", &vars).unwrap();
/// assert_eq!(topic, "silabs/aoa/config/ble-pd-0C4314F46ABD");
/// ```
pub fn resolve_topic(
    template: &str,
    vars: &HashMap<String, String>,
) -> Result<String, PublishError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        let name = &caps[1];
        let value = vars
            .get(name)
            .ok_or_else(|| PublishError::UnknownPlaceholder(name.to_string()))?;
        out.push_str(&template[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}
