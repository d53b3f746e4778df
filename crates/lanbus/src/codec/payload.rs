//! # Payload Encoding
//!
//! Serializes the ordered list `(event, args)` into one self-describing
//! binary frame via bincode. Every supported argument shape round-trips
//! exactly through `decode(encode(..))`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::EmitterError;

/// A single positional event argument.
///
/// Arguments are passed to handlers in the order they were emitted.
/// Nested lists and maps are supported to arbitrary depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventValue {
    /// Absent / nil argument.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Opaque binary blob.
    Bytes(Vec<u8>),
    /// Ordered list of values.
    List(Vec<EventValue>),
    /// String-keyed map of values.
    Map(BTreeMap<String, EventValue>),
}

impl From<bool> for EventValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for EventValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for EventValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for EventValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for EventValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<u8>> for EventValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

/// Encode an event name and its arguments into a binary frame.
pub fn encode(event: &str, args: &[EventValue]) -> Result<Vec<u8>, EmitterError> {
    bincode::serialize(&(event, args)).map_err(|e| EmitterError::Format(e.to_string()))
}

/// Decode a binary frame back into `(event, args)`.
///
/// Fails with [`EmitterError::Format`] when the bytes are not a well-formed
/// frame (truncated, or carrying unknown type tags).
pub fn decode(bytes: &[u8]) -> Result<(String, Vec<EventValue>), EmitterError> {
    bincode::deserialize(bytes).map_err(|e| EmitterError::Format(e.to_string()))
}
