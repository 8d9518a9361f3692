use serde::{Deserialize, Serialize};

/// Codec used to encode/decode payload bytes. `input`, `result`, and
/// event payloads (§3.1, §3.2) are all opaque `Payload`s tagged with one
/// of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Codec {
    Json,
    Cbor,
}

/// Opaque, serialized bytes with an associated codec. Instance input,
/// history-entry results, and event payloads all round-trip as `Payload`;
/// the engine never inspects the bytes, only the user's registered
/// handlers do (via `GetInput<T>`/typed wrappers).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub bytes: Vec<u8>,
    pub codec: Codec,
}

impl Payload {
    /// Create a payload from raw bytes and their codec.
    pub fn new(bytes: Vec<u8>, codec: Codec) -> Self {
        Self { bytes, codec }
    }

    /// Serialize a value as a JSON-codec payload.
    pub fn json(value: &impl Serialize) -> serde_json::Result<Self> {
        Ok(Self {
            bytes: serde_json::to_vec(value)?,
            codec: Codec::Json,
        })
    }

    /// Deserialize this payload's bytes as JSON.
    pub fn as_json<T: for<'de> Deserialize<'de>>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
