use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message type carrying a [`FormState`].
pub const STATE: &str = "state";

/// Message type of the clock-sync ping.
pub const TS: &str = "ts";

/// Error produced while encoding or decoding wire envelopes.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The frame was not a valid `{type, message}` object.
    #[error("malformed envelope: {0}")]
    Decode(#[source] serde_json::Error),
    /// The payload did not have the shape the message type requires.
    #[error("malformed `{kind}` payload: {source}")]
    Payload {
        /// Envelope type whose payload failed to parse.
        kind: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// A value could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
}

/// The only unit ever sent over a connection: a typed, opaque payload.
///
/// On the wire an envelope is a single JSON text frame:
///
/// ```
/// use formsync::Envelope;
///
/// let env = Envelope::decode(r#"{"type":"ts","message":{"id":"a1"}}"#).unwrap();
/// assert_eq!(env.kind, "ts");
/// assert_eq!(env.message["id"], "a1");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type, e.g. `"state"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload, interpreted according to `kind`.
    #[serde(default)]
    pub message: Value,
}

impl Envelope {
    /// Wrap a serializable payload.
    pub fn new(kind: impl Into<String>, message: &impl Serialize) -> Result<Self, EnvelopeError> {
        Ok(Self {
            kind: kind.into(),
            message: serde_json::to_value(message).map_err(EnvelopeError::Encode)?,
        })
    }

    /// Build a `"state"` envelope.
    pub fn state(state: &FormState) -> Result<Self, EnvelopeError> {
        Self::new(STATE, state)
    }

    /// Parse a text frame.
    pub fn decode(text: &str) -> Result<Self, EnvelopeError> {
        serde_json::from_str(text).map_err(EnvelopeError::Decode)
    }

    /// Render as a text frame.
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(self).map_err(EnvelopeError::Encode)
    }

    /// Interpret the payload as `T`.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        T::deserialize(&self.message).map_err(|source| EnvelopeError::Payload {
            kind: self.kind.clone(),
            source,
        })
    }
}

/// State of a single form: a bitmask of its boolean inputs plus the logical
/// timestamp of the write that produced it.
///
/// `ts` is chosen by the originating client. It is only meaningful for
/// ordering: a larger value is a newer write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormState {
    /// Form name.
    pub form: String,
    /// Bit `i` is the checked flag of input `i`.
    pub state: u64,
    /// Logical timestamp.
    pub ts: u64,
}

impl FormState {
    /// Create a form state.
    pub fn new(form: impl Into<String>, state: u64, ts: u64) -> Self {
        Self {
            form: form.into(),
            state,
            ts,
        }
    }

    /// Returns `true` if `self` should replace `incumbent`.
    ///
    /// Equal timestamps are not newer: the incumbent wins ties.
    #[must_use]
    pub fn supersedes(&self, incumbent: &FormState) -> bool {
        self.ts > incumbent.ts
    }
}
