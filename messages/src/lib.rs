//! Typed text envelopes carried between fleet nodes over the broker.
//!
//! Every topic carries UTF-8 JSON. Encoding is total; decoding fails with
//! [MalformedMessage] when a required field is missing or has the wrong
//! kind, and `decode(encode(m)) == m` holds for every well-formed envelope.
//! Nested envelopes (a [VideoRequest] inside a reliable-broadcast
//! `initial`) travel as opaque strings and are re-decoded by the consumer.
mod heartbeat;
mod rb;
mod video;

pub use heartbeat::Heartbeat;
pub use rb::{RbMessage, RbState};
pub use video::VideoRequest;

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// An inbound payload that does not decode as the envelope its topic carries.
#[derive(Debug, Error)]
pub enum MalformedMessage {
    /// Not valid JSON, a required field is missing, or a field has the
    /// wrong kind.
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    /// The payload is not valid UTF-8.
    #[error("malformed message: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),
    /// A base64 field does not decode.
    #[error("malformed message: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Symmetric text encoding shared by all envelopes.
pub trait Envelope: Serialize + DeserializeOwned {
    /// Serializes the envelope to its wire form. Total for every value
    /// constructible in safe code.
    fn encode(&self) -> String {
        serde_json::to_string(self).expect("envelope types serialize without error")
    }

    /// Parses the wire form back into the envelope.
    fn decode(payload: &str) -> Result<Self, MalformedMessage> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Parses a raw broker payload, rejecting non-UTF-8 input.
    fn decode_bytes(payload: &[u8]) -> Result<Self, MalformedMessage> {
        Self::decode(std::str::from_utf8(payload)?)
    }
}
