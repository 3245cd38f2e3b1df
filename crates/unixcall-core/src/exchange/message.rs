//! The record exchanged in both directions of a call.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single request or reply payload.
///
/// Encoded on the wire as `{"text": <string>, "id": <integer>}`. Both
/// members are required when decoding; unknown members are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Free-form message text.
    pub text: String,

    /// Caller-chosen identifier. A reply's id is whatever the peer sent back.
    pub id: i64,
}

impl Message {
    pub fn new(text: impl Into<String>, id: i64) -> Self {
        Self {
            text: text.into(),
            id,
        }
    }

    /// Serialize to the JSON wire payload (no trailing newline).
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Deserialize a JSON wire payload.
    ///
    /// Trailing whitespace is accepted, any other trailing bytes are not.
    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{text: {:?}, id: {}}}", self.text, self.id)
    }
}
