//! Wire envelope types
//!
//! Every frame on a wsrpc connection carries exactly one JSON document, either a
//! [`Request`] (client to server) or a [`Response`] (server to client).
//!
//! # Ids
//!
//! Ids are signed 64-bit integers assigned by the caller. Id `0` is reserved:
//!
//! - a request with id `0` is a **notification**: the server never replies
//! - a response with id `0` is a **push**: the client routes it by `method`
//!
//! # Payloads
//!
//! `params` and `result` are tri-state. A payload can be absent (field omitted),
//! explicitly `null`, or a value, and the three states survive a decode/encode
//! round trip:
//!
//! | wire                  | Rust                     |
//! |-----------------------|--------------------------|
//! | field omitted         | `None`                   |
//! | `"params": null`      | `Some(Value::Null)`      |
//! | `"params": {...}`     | `Some(Value::Object(..))`|
//!
//! An absent payload is normalized to `null` when it is bound into a handler's
//! parameter type, see [`Request::params_or_null`].

use crate::error::{Error, ErrorObject, Result};
use serde::de::{DeserializeOwned, Error as _};
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Deserialize a payload field so that a present `null` stays distinguishable
/// from an omitted field (which falls back to `#[serde(default)]`).
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Deserialize `T` from a JSON object only
///
/// Derived impls also accept a sequence of fields (`["ping", null, 7]`),
/// which is not a valid envelope.
fn from_object<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let object = Map::deserialize(deserializer)?;
    serde_json::from_value(Value::Object(object)).map_err(D::Error::custom)
}

/// A call (nonzero id) or notification (id `0`)
///
/// # Examples
///
/// ```rust
/// use wsrpc_core::Request;
/// use serde_json::json;
///
/// let mut call = Request::new("add", 1);
/// call.set_params(&json!({"a": 1, "b": 2})).unwrap();
/// assert!(!call.is_notification());
///
/// let note = Request::notification("log");
/// assert!(note.is_notification());
/// assert!(note.params.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    /// Method name, possibly prefixed by a route group (`"user/get"`)
    pub method: String,

    /// Tri-state payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    /// Correlation id, `0` for notifications
    pub id: i64,
}

#[derive(Deserialize)]
struct WireRequest {
    method: String,
    #[serde(default, deserialize_with = "present")]
    params: Option<Value>,
    #[serde(default)]
    id: i64,
}

impl<'de> Deserialize<'de> for Request {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let wire: WireRequest = from_object(deserializer)?;
        Ok(Self {
            method: wire.method,
            params: wire.params,
            id: wire.id,
        })
    }
}

impl Request {
    /// Create a call with no params
    pub fn new(method: impl Into<String>, id: i64) -> Self {
        Self {
            method: method.into(),
            params: None,
            id,
        }
    }

    /// Create a notification (id `0`) with no params
    pub fn notification(method: impl Into<String>) -> Self {
        Self::new(method, 0)
    }

    /// Builder-style params setter taking an already encoded value
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    /// Encode `value` into the params payload
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] when `value` is not representable as JSON.
    pub fn set_params<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let encoded = serde_json::to_value(value).map_err(|e| Error::Encoding(e.to_string()))?;
        self.params = Some(encoded);
        Ok(())
    }

    /// `true` when no reply is expected
    pub fn is_notification(&self) -> bool {
        self.id == 0
    }

    /// Params with the absent state normalized to `null`
    pub fn params_or_null(&self) -> Value {
        self.params.clone().unwrap_or(Value::Null)
    }
}

/// A reply (nonzero id) or server push (id `0`)
///
/// A response must carry a result, an error, or both. Serializing one that
/// carries neither fails, which the codec surfaces as [`Error::Marshal`].
///
/// ```rust
/// use wsrpc_core::Response;
///
/// let empty = Response { method: "x".into(), id: 1, result: None, error: None };
/// assert!(serde_json::to_string(&empty).is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Method of the request being answered, or the push topic
    pub method: String,

    /// Id of the request being answered, `0` for pushes
    pub id: i64,

    /// Tri-state result payload
    pub result: Option<Value>,

    /// Error object, when the call failed
    pub error: Option<ErrorObject>,
}

#[derive(Deserialize)]
struct InboundResponse {
    #[serde(default)]
    method: String,
    #[serde(default)]
    id: i64,
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

impl<'de> Deserialize<'de> for Response {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let wire: InboundResponse = from_object(deserializer)?;
        Ok(Self {
            method: wire.method,
            id: wire.id,
            result: wire.result,
            error: wire.error,
        })
    }
}

#[derive(Serialize)]
struct WireResponse<'a> {
    method: &'a str,
    id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ErrorObject>,
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if !self.has_payload() {
            return Err(S::Error::custom(format!(
                "can't marshal response [{}] id {}: must have result or error",
                self.method, self.id
            )));
        }
        WireResponse {
            method: &self.method,
            id: self.id,
            result: self.result.as_ref(),
            error: self.error.as_ref(),
        }
        .serialize(serializer)
    }
}

impl Response {
    /// Successful reply to request `id`
    pub fn reply(method: impl Into<String>, id: i64, result: Value) -> Self {
        Self {
            method: method.into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error reply to request `id`
    pub fn failure(method: impl Into<String>, id: i64, error: ErrorObject) -> Self {
        Self {
            method: method.into(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Server push routed by `method` on the client
    pub fn push(method: impl Into<String>, result: Value) -> Self {
        Self::reply(method, 0, result)
    }

    /// Encode `value` into the result payload
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] when `value` is not representable as JSON.
    pub fn set_result<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let encoded = serde_json::to_value(value).map_err(|e| Error::Encoding(e.to_string()))?;
        self.result = Some(encoded);
        Ok(())
    }

    /// `true` for server pushes
    pub fn is_push(&self) -> bool {
        self.id == 0
    }

    /// `true` when the response carries a result or an error
    pub fn has_payload(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }
}
