//! Versioned envelope for published execution data.
//!
//! Everything that leaves the engine (event records handed to an
//! [`EventSink`](crate::shared::EventSink)) is wrapped in an envelope so
//! consumers can check the format version before decoding the payload.

use serde::{Deserialize, Serialize};

/// The current envelope version.
pub const CURRENT_VERSION: u32 = 1;

/// A payload tagged with the format version it was written in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub version: u32,
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Wraps a payload at the current version.
    #[must_use]
    pub fn new(payload: T) -> Self {
        Self {
            version: CURRENT_VERSION,
            payload,
        }
    }

    #[must_use]
    pub fn payload(&self) -> &T {
        &self.payload
    }

    #[must_use]
    pub fn into_payload(self) -> T {
        self.payload
    }
}

impl<T: Serialize> Envelope<T> {
    /// Serializes the envelope to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// An envelope whose payload has not been decoded yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEnvelope {
    pub version: u32,
    pub payload: serde_json::Value,
}

impl RawEnvelope {
    /// Parses the envelope without decoding the payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not an envelope.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Returns true if this reader understands the envelope's version.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.version <= CURRENT_VERSION
    }

    /// Decodes the payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not decode into `T`.
    pub fn decode<T: for<'de> Deserialize<'de>>(self) -> Result<Envelope<T>, serde_json::Error> {
        Ok(Envelope {
            version: self.version,
            payload: serde_json::from_value(self.payload)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{ExecutionEvent, InstanceKey};

    #[test]
    fn envelope_wraps_at_current_version() {
        let envelope = Envelope::new(ExecutionEvent::NodeDispatched {
            key: InstanceKey::node("n1"),
        });
        let json = serde_json::to_value(&envelope).expect("to_value");
        assert_eq!(json["version"], CURRENT_VERSION);
        assert_eq!(json["payload"]["type"], "node_dispatched");
    }

    #[test]
    fn raw_envelope_checks_version_before_decoding() {
        let event = ExecutionEvent::Aborted {
            reason: "shutdown".to_string(),
        };
        let bytes = Envelope::new(event.clone()).to_json_bytes().expect("serialize");

        let raw = RawEnvelope::from_json_bytes(&bytes).expect("parse");
        assert!(raw.is_supported());
        let decoded: Envelope<ExecutionEvent> = raw.decode().expect("decode");
        assert_eq!(decoded.into_payload(), event);
    }

    #[test]
    fn future_versions_are_not_supported() {
        let raw = RawEnvelope::from_json_bytes(br#"{"version": 99, "payload": {}}"#).expect("parse");
        assert!(!raw.is_supported());
    }
}
