//! Opaque relay payloads and best-effort diagnostic classification.
//!
//! The relay never inspects payloads to make forwarding decisions. The only
//! reading it does is [`classify`], which tries to pull a kind string out of a
//! JSON object so log lines can say *what* was relayed.

use bytes::Bytes;
use serde_json::Value;

/// Fields probed, in order, when classifying a JSON object.
const KIND_FIELDS: [&str; 4] = ["type", "kind", "event", "action"];

/// One message received on either leg, forwarded verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
}

impl Payload {
    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(t) => t.len(),
            Self::Binary(b) => b.len(),
        }
    }

    /// Whether the payload carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw bytes of the payload.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(t) => t.as_bytes(),
            Self::Binary(b) => b,
        }
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(v))
    }
}

/// Diagnostic classification of a payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// A JSON object carrying a string kind field.
    Structured(String),
    /// Valid JSON without a recognizable kind field.
    UntypedJson,
    /// Anything that does not decode as JSON.
    Unstructured,
}

impl MessageKind {
    /// Short label for log fields.
    pub fn label(&self) -> &str {
        match self {
            Self::Structured(kind) => kind,
            Self::UntypedJson => "json",
            Self::Unstructured => "non-structured",
        }
    }
}

/// Classify a payload for logging. Decode failures are swallowed.
pub fn classify(payload: &Payload) -> MessageKind {
    let Ok(value) = serde_json::from_slice::<Value>(payload.as_bytes()) else {
        return MessageKind::Unstructured;
    };
    let Some(obj) = value.as_object() else {
        return MessageKind::UntypedJson;
    };
    KIND_FIELDS
        .iter()
        .find_map(|field| obj.get(*field).and_then(Value::as_str))
        .map_or(MessageKind::UntypedJson, |kind| {
            MessageKind::Structured(kind.to_owned())
        })
}
