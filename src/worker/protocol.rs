//! Payload serialization for worker communication.
//!
//! Requests and responses are JSON. Requests travel inside a length-prefixed
//! frame; responses are written bare, so the master decides completion by
//! whether the bytes gathered so far parse as one JSON value.

use crate::error::Result;
use serde::Serialize;
use serde_json::Value;

/// Serialize a request payload.
pub fn encode_payload<T: Serialize + ?Sized>(payload: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(payload)?)
}

/// Classification of the response bytes accumulated for one task.
#[derive(Debug)]
pub enum ResponseParse {
    /// A complete JSON value.
    Complete(Value),
    /// Valid so far but truncated; more output is expected.
    Incomplete,
    /// Not JSON at all.
    Malformed(serde_json::Error),
}

/// Try to parse accumulated response bytes.
pub fn parse_response(bytes: &[u8]) -> ResponseParse {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => ResponseParse::Complete(value),
        Err(e) if e.is_eof() => ResponseParse::Incomplete,
        Err(e) => ResponseParse::Malformed(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_payload_is_json() {
        let bytes = encode_payload(&json!({"id": "A", "n": 3})).unwrap();
        let back: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back["id"], "A");
        assert_eq!(back["n"], 3);
    }

    #[test]
    fn test_parse_complete_response() {
        match parse_response(br#"{"id":"B","pid":42}"#) {
            ResponseParse::Complete(v) => assert_eq!(v["pid"], 42),
            other => panic!("expected complete, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_truncated_response() {
        assert!(matches!(
            parse_response(br#"{"id":"B","pid""#),
            ResponseParse::Incomplete
        ));
        assert!(matches!(parse_response(b"[1, 2"), ResponseParse::Incomplete));
    }

    #[test]
    fn test_parse_garbage_response() {
        assert!(matches!(
            parse_response(b"Segmentation fault"),
            ResponseParse::Malformed(_)
        ));
        assert!(matches!(
            parse_response(br#"{"a":1}}"#),
            ResponseParse::Malformed(_)
        ));
    }

    #[test]
    fn test_parse_scalar_responses() {
        assert!(matches!(
            parse_response(b"null"),
            ResponseParse::Complete(Value::Null)
        ));
        assert!(matches!(
            parse_response(b"\"done\""),
            ResponseParse::Complete(Value::String(_))
        ));
    }
}
