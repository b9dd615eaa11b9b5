use log::trace;
use serde::Deserialize;
use serde_json::Value;

use super::types::InboundMessage;
use crate::error_handling::types::DecodeError;

/// Decodes one raw broker payload.
///
/// The payload must be UTF-8 JSON with an object at the top level. `samples`,
/// when present and not `null`, must be an array of numbers.
pub fn decode_payload(payload: &[u8]) -> Result<InboundMessage, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(DecodeError::InvalidUtf8)?;
    trace!(
        "decoding payload ({} bytes): {}{}",
        payload.len(),
        preview(text),
        if text.len() > 64 { " ..." } else { "" }
    );

    let value: Value = serde_json::from_str(text).map_err(DecodeError::Malformed)?;
    let mut object = match value {
        Value::Object(map) => map,
        _ => return Err(DecodeError::NotAnObject),
    };

    if let Some(samples) = object.get("samples") {
        match samples {
            Value::Null => {
                object.remove("samples");
            }
            Value::Array(items) => {
                if let Some(pos) = items.iter().position(|v| !v.is_number()) {
                    return Err(DecodeError::InvalidSamples(format!(
                        "element {} is not a number",
                        pos
                    )));
                }
            }
            other => {
                return Err(DecodeError::InvalidSamples(format!(
                    "expected an array, found {}",
                    kind(other)
                )))
            }
        }
    }

    InboundMessage::deserialize(Value::Object(object)).map_err(DecodeError::Malformed)
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(64) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_full_message() {
        let msg = decode_payload(
            br#"{"channel": 37, "rssi": -62, "sequence": 5, "samples": [1.0, 2.0, 3.0], "extra": "x"}"#,
        )
        .unwrap();
        assert_eq!(msg.channel, Some(json!(37)));
        assert_eq!(msg.rssi, Some(json!(-62)));
        assert_eq!(msg.sequence, Some(json!(5)));
        assert_eq!(msg.samples.len(), 3);
    }

    #[test]
    fn missing_fields_are_absent() {
        let msg = decode_payload(b"{}").unwrap();
        assert_eq!(msg, InboundMessage::default());

        let msg = decode_payload(br#"{"channel": null, "samples": null}"#).unwrap();
        assert_eq!(msg.channel, None);
        assert!(msg.samples.is_empty());
    }

    #[test]
    fn rejects_non_utf8() {
        assert!(matches!(
            decode_payload(&[0xff, 0xfe, 0x7b]),
            Err(DecodeError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            decode_payload(b"{\"channel\": "),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_non_object() {
        assert!(matches!(
            decode_payload(b"[37, -62, 5]"),
            Err(DecodeError::NotAnObject)
        ));
        assert!(matches!(decode_payload(b"42"), Err(DecodeError::NotAnObject)));
    }

    #[test]
    fn rejects_bad_samples() {
        assert!(matches!(
            decode_payload(br#"{"samples": 3}"#),
            Err(DecodeError::InvalidSamples(_))
        ));
        assert!(matches!(
            decode_payload(br#"{"samples": [1, "two"]}"#),
            Err(DecodeError::InvalidSamples(_))
        ));
    }
}
