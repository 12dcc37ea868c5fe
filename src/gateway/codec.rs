//! Text frame codec.
//!
//! Frames travel as JSON objects `{"op", "d", "s", "t"}`. Decoding only checks
//! the envelope; whether an opcode means anything is the registry's business.

use crate::error::GatewayError;

use super::events::Frame;

/// Decode one raw text frame.
pub fn decode(raw: &str) -> Result<Frame, GatewayError> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let Some(object) = value.as_object() else {
        return Err(GatewayError::MalformedFrame(
            "frame is not a JSON object".to_string(),
        ));
    };
    match object.get("op") {
        Some(op) if op.as_u64().is_some_and(|op| op <= u64::from(u8::MAX)) => {}
        Some(op) => {
            return Err(GatewayError::MalformedFrame(format!(
                "opcode {op} is not a valid integer opcode"
            )))
        }
        None => {
            return Err(GatewayError::MalformedFrame(
                "frame has no opcode".to_string(),
            ))
        }
    }
    Ok(serde_json::from_value(value)?)
}

/// Encode a frame for sending.
pub fn encode(frame: &Frame) -> String {
    // Frame holds only JSON-native fields, so serialization cannot fail.
    serde_json::to_string(frame).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::events::opcode;
    use serde_json::json;

    #[test]
    fn test_decode_dispatch() {
        let frame = decode(r#"{"op":0,"d":{"id":"1"},"s":12,"t":"MESSAGE_CREATE"}"#).unwrap();
        assert_eq!(frame.op, opcode::DISPATCH);
        assert_eq!(frame.s, Some(12));
        assert_eq!(frame.t.as_deref(), Some("MESSAGE_CREATE"));
        assert_eq!(frame.d, json!({"id": "1"}));
    }

    #[test]
    fn test_decode_tolerates_null_and_missing_fields() {
        let frame = decode(r#"{"op":11,"d":null,"s":null,"t":null}"#).unwrap();
        assert_eq!(frame.op, opcode::HEARTBEAT_ACK);
        assert!(frame.d.is_null());
        assert_eq!(frame.s, None);
        assert_eq!(frame.t, None);

        let bare = decode(r#"{"op":11}"#).unwrap();
        assert!(bare.d.is_null());
    }

    #[test]
    fn test_decode_keeps_unknown_numeric_opcodes() {
        let frame = decode(r#"{"op":42,"d":true}"#).unwrap();
        assert_eq!(frame.op, 42);
    }

    #[test]
    fn test_decode_rejects_missing_opcode() {
        let err = decode(r#"{"d":{},"s":1}"#).unwrap_err();
        assert_eq!(
            err,
            GatewayError::MalformedFrame("frame has no opcode".to_string())
        );
    }

    #[test]
    fn test_decode_rejects_non_integer_opcodes() {
        for raw in [r#"{"op":"10"}"#, r#"{"op":-1}"#, r#"{"op":1.5}"#, r#"{"op":256}"#] {
            assert!(
                matches!(decode(raw), Err(GatewayError::MalformedFrame(_))),
                "expected {raw} to be rejected"
            );
        }
    }

    #[test]
    fn test_decode_rejects_non_objects_and_garbage() {
        assert!(matches!(decode("[1,2]"), Err(GatewayError::MalformedFrame(_))));
        assert!(matches!(decode("not json"), Err(GatewayError::MalformedFrame(_))));
        assert!(matches!(decode(""), Err(GatewayError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_rejects_bad_sequence_type() {
        assert!(matches!(
            decode(r#"{"op":0,"s":"seven","t":"READY"}"#),
            Err(GatewayError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_encode_omits_absent_sequence_and_name() {
        let raw = encode(&Frame::heartbeat(Some(3)));
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value, json!({"op": 1, "d": 3}));
    }
}
