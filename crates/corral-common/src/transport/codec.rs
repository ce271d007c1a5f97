use crate::protocol::error::Result;
use crate::protocol::Message;

/// Codec for encoding/decoding protocol messages.
///
/// Currently only JSON is supported, but the enum allows for future
/// extensibility (e.g., MessagePack, CBOR, etc.).
pub enum Codec {
    /// JSON codec (currently the only supported format)
    Json(JsonCodec),
}

impl Codec {
    /// Create a new codec (JSON is the only supported format).
    pub fn new() -> Self {
        Codec::Json(JsonCodec)
    }

    /// Encode a message to bytes.
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        match self {
            Codec::Json(_) => JsonCodec::encode(message),
        }
    }

    /// Decode a message from bytes.
    pub fn decode(&self, data: &[u8]) -> Result<Message> {
        match self {
            Codec::Json(_) => JsonCodec::decode(data),
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

/// JSON codec for protocol messages.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a message to bytes.
    pub fn encode(message: &Message) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(message)?)
    }

    /// Decode a message from bytes.
    pub fn decode(data: &[u8]) -> Result<Message> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_codec_round_trip() {
        let call = Message::method_call(3, "/p", "i.face", "Member", json!({"x": [1, 2, 3]}));

        let encoded = JsonCodec::encode(&call).unwrap();
        let decoded = JsonCodec::decode(&encoded).unwrap();

        assert_eq!(call, decoded);
    }

    #[test]
    fn test_codec_enum_json() {
        let signal = Message::signal("/p", "i.face", "Changed", json!({"State": "running"}));
        let codec = Codec::new();

        let encoded = codec.encode(&signal).unwrap();
        let decoded = codec.decode(&encoded).unwrap();

        assert_eq!(signal, decoded);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(JsonCodec::decode(b"not json").is_err());
    }
}
