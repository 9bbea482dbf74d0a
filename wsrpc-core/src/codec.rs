//! Codec for envelope serialization and deserialization
//!
//! Thin wrappers over `serde_json` that map failures onto the wsrpc error
//! taxonomy:
//!
//! - inbound bytes that are not a valid envelope → [`Error::Decode`]
//! - a response without result or error → [`Error::Marshal`]
//! - any other encoding failure → [`Error::Encoding`]
//!
//! Frames may arrive as WebSocket text or binary; the `*_slice` variants
//! accept raw bytes.
//!
//! # Examples
//!
//! ```rust
//! use wsrpc_core::{codec, Request};
//!
//! let request = Request::new("ping", 1);
//! let json = codec::encode_request(&request).unwrap();
//!
//! let decoded = codec::decode_request(&json).unwrap();
//! assert_eq!(decoded.method, "ping");
//! assert_eq!(decoded.id, 1);
//! ```

use crate::error::{Error, Result};
use crate::types::{Request, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Encode any serializable value to a JSON string
///
/// # Errors
///
/// Returns [`Error::Encoding`] if the value cannot be serialized.
pub fn encode<T: Serialize + ?Sized>(msg: &T) -> Result<String> {
    serde_json::to_string(msg).map_err(|e| Error::Encoding(e.to_string()))
}

/// Encode a request
pub fn encode_request(request: &Request) -> Result<String> {
    encode(request)
}

/// Decode a request from a text frame
///
/// # Errors
///
/// Returns [`Error::Decode`] for malformed JSON or a missing `method`.
pub fn decode_request(text: &str) -> Result<Request> {
    serde_json::from_str(text).map_err(|e| Error::Decode(e.to_string()))
}

/// Decode a request from a binary frame
pub fn decode_request_slice(bytes: &[u8]) -> Result<Request> {
    serde_json::from_slice(bytes).map_err(|e| Error::Decode(e.to_string()))
}

/// Encode a response
///
/// # Errors
///
/// Returns [`Error::Marshal`] when the response has neither result nor error.
///
/// ```rust
/// use wsrpc_core::{codec, Error, Response};
///
/// let empty = Response { method: "m".into(), id: 1, result: None, error: None };
/// assert!(matches!(codec::encode_response(&empty), Err(Error::Marshal(_))));
/// ```
pub fn encode_response(response: &Response) -> Result<String> {
    if !response.has_payload() {
        return Err(Error::Marshal(format!(
            "can't marshal response [{}] id {}: must have result or error",
            response.method, response.id
        )));
    }
    encode(response)
}

/// Decode a response from a text frame
pub fn decode_response(text: &str) -> Result<Response> {
    serde_json::from_str(text).map_err(|e| Error::Decode(e.to_string()))
}

/// Decode a response from a binary frame
pub fn decode_response_slice(bytes: &[u8]) -> Result<Response> {
    serde_json::from_slice(bytes).map_err(|e| Error::Decode(e.to_string()))
}

/// Convert a payload into a concrete type
///
/// Used to bind params into a handler's argument type and to decode call
/// results on the client.
///
/// ```rust
/// use wsrpc_core::codec;
/// use serde_json::json;
///
/// let n: i32 = codec::decode_as(json!(7)).unwrap();
/// assert_eq!(n, 7);
/// ```
pub fn decode_as<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorObject;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_request_round_trip_keeps_absent_params() {
        let request = Request::new("ping", 42);
        let text = encode_request(&request).unwrap();
        assert!(!text.contains("params"));

        let back = decode_request(&text).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_request_round_trip_keeps_null_params() {
        let text = r#"{"method":"ping","params":null,"id":1}"#;
        let req = decode_request(text).unwrap();
        assert_eq!(req.params, Some(Value::Null));
        assert_eq!(encode_request(&req).unwrap(), text);
    }

    #[test]
    fn test_decode_request_from_binary() {
        let req = decode_request_slice(br#"{"method":"b","params":{"x":1},"id":3}"#).unwrap();
        assert_eq!(req.method, "b");
        assert_eq!(req.params, Some(json!({"x": 1})));
    }

    #[test]
    fn test_decode_request_missing_id_is_notification() {
        let req = decode_request(r#"{"method":"log","params":"hi"}"#).unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(decode_request("{not json"), Err(Error::Decode(_))));
        assert!(matches!(decode_request(r#"{"id":1}"#), Err(Error::Decode(_))));
        assert!(matches!(decode_response("[]"), Err(Error::Decode(_))));
        assert!(matches!(decode_request(r#"["ping",null,7]"#), Err(Error::Decode(_))));
        assert!(matches!(decode_request_slice(b"[]"), Err(Error::Decode(_))));
    }

    #[test]
    fn test_encode_response_marshal_guard() {
        let empty = Response {
            method: "m".into(),
            id: 4,
            result: None,
            error: None,
        };
        match encode_response(&empty) {
            Err(Error::Marshal(msg)) => assert!(msg.contains("must have result or error")),
            other => panic!("Expected Marshal error, got {:?}", other),
        }
    }

    #[test]
    fn test_error_response_round_trip() {
        let resp = Response::failure("m", 5, ErrorObject::with_data(409, "conflict", json!("v2")));
        let text = encode_response(&resp).unwrap();
        let back = decode_response(&text).unwrap();

        assert_eq!(back, resp);
        assert!(back.result.is_none());
    }

    #[test]
    fn test_decode_as_struct() {
        #[derive(Deserialize)]
        struct Pair {
            a: i32,
            b: i32,
        }

        let pair: Pair = decode_as(json!({"a": 1, "b": 2})).unwrap();
        assert_eq!(pair.a + pair.b, 3);

        let bad = decode_as::<Pair>(json!("nope"));
        assert!(matches!(bad, Err(Error::Decode(_))));
    }
}
