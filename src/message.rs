//! Message protocol definitions
//!
//! JSON envelope exchanged over the relay: `{"type": ..., "text": ...}`.
//! Only `status` and `ping` are generated by the server; `chat` payloads are
//! forwarded byte-for-byte and never re-encoded.

use serde::{Deserialize, Serialize};

use crate::connection::Frame;

/// Notice sent to a client when its partner leaves
pub const PEER_DISCONNECTED: &str = "The other user has disconnected.";

/// Envelope type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// Server notice (pairing confirmation, peer disconnected)
    Status,
    /// User payload, relayed verbatim
    Chat,
    /// Keepalive probe sent to queued clients
    Ping,
    /// Client asks to leave the session
    Disconnect,
}

/// Wire message envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
}

impl Envelope {
    /// Server status notice
    pub fn status(text: impl Into<String>) -> Self {
        Self {
            kind: EnvelopeKind::Status,
            text: text.into(),
        }
    }

    /// Keepalive probe, serialized as `{"type":"ping"}`
    pub fn ping() -> Self {
        Self {
            kind: EnvelopeKind::Ping,
            text: String::new(),
        }
    }

    /// Pairing confirmation carrying a conversation starter
    pub fn paired(topic: &str) -> Self {
        Self::status(format!("Now connected! Let's talk about {}", topic))
    }

    /// Encode as a text frame
    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Frame::Text)
    }
}

/// Check whether a relayed frame is a client's graceful-leave request
///
/// Text and binary payloads are both parsed. Anything that is not a valid
/// `disconnect` envelope is relayed opaquely.
pub fn is_disconnect(frame: &Frame) -> bool {
    let bytes = match frame {
        Frame::Text(text) => text.as_bytes(),
        Frame::Binary(data) => data.as_slice(),
        Frame::Close => return false,
    };
    matches!(
        serde_json::from_slice::<Envelope>(bytes),
        Ok(Envelope {
            kind: EnvelopeKind::Disconnect,
            ..
        })
    )
}
