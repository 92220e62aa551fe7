//! Payload serialization
//!
//! Encodes outbound payloads and decodes inbound frames. JSON is always
//! available; ETF needs an erlpack-compatible pack/unpack primitive, which
//! this build does not carry, so selecting it fails at construction with a
//! configuration error.
//!
//! A decode failure is a per-frame condition: the shard reports it and
//! drops the frame without touching the connection.

use crate::protocol::GatewayPayload;
use gateway_common::{GatewayError, GatewayResult};

/// Wire encoding selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// JSON text frames
    Json,
    /// Erlang External Term Format binary frames
    Etf,
}

impl Encoding {
    /// The `encoding` query parameter value for the gateway URL
    #[must_use]
    pub const fn query_value(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Etf => "etf",
        }
    }
}

/// An encoded outbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedFrame {
    /// UTF-8 text (JSON)
    Text(String),
    /// Binary (ETF)
    Binary(Vec<u8>),
}

/// Inbound frame content handed to the codec
///
/// The decompressor may hand over a single buffer or a fragmented list;
/// text frames arrive directly from the socket.
#[derive(Debug, Clone, Copy)]
pub enum WireInput<'a> {
    /// A text frame
    Text(&'a str),
    /// A contiguous binary frame
    Binary(&'a [u8]),
    /// A fragmented binary frame, concatenated before parsing
    Fragments(&'a [Vec<u8>]),
}

/// Payload codec
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    encoding: Encoding,
}

impl Codec {
    /// Create a codec for the requested encoding
    ///
    /// # Errors
    /// Returns a configuration error for [`Encoding::Etf`]: no
    /// erlpack-compatible pack/unpack primitive is available in this build.
    pub fn new(encoding: Encoding) -> GatewayResult<Self> {
        match encoding {
            Encoding::Json => Ok(Self { encoding }),
            Encoding::Etf => Err(GatewayError::configuration(
                "etf encoding requires an erlpack-compatible pack/unpack primitive, \
                 which is not available; use json",
            )),
        }
    }

    /// The encoding this codec was built with
    #[must_use]
    pub const fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Encode an outbound payload
    ///
    /// # Errors
    /// Returns a serialization error if the payload cannot be encoded.
    pub fn encode(&self, payload: &GatewayPayload) -> GatewayResult<EncodedFrame> {
        match self.encoding {
            Encoding::Json => serde_json::to_string(payload)
                .map(EncodedFrame::Text)
                .map_err(GatewayError::serialization),
            // unreachable: construction rejects Etf
            Encoding::Etf => Err(GatewayError::configuration("etf codec not available")),
        }
    }

    /// Decode an inbound frame
    ///
    /// # Errors
    /// Returns a serialization error if the frame is not a valid payload;
    /// the caller drops the frame and keeps the connection.
    pub fn decode(&self, input: WireInput<'_>) -> GatewayResult<GatewayPayload> {
        match input {
            WireInput::Text(text) => {
                serde_json::from_str(text).map_err(GatewayError::serialization)
            }
            WireInput::Binary(bytes) => {
                serde_json::from_slice(bytes).map_err(GatewayError::serialization)
            }
            WireInput::Fragments(parts) => {
                tracing::debug!(fragments = parts.len(), "decoding fragmented frame");
                let total = parts.iter().map(Vec::len).sum();
                let mut joined = Vec::with_capacity(total);
                for part in parts {
                    joined.extend_from_slice(part);
                }
                serde_json::from_slice(&joined).map_err(GatewayError::serialization)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OpCode;

    #[test]
    fn test_etf_construction_fails() {
        let err = Codec::new(Encoding::Etf).unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
        assert!(err.to_string().contains("erlpack"));
    }

    #[test]
    fn test_json_roundtrip() {
        let codec = Codec::new(Encoding::Json).unwrap();
        let payload = GatewayPayload::heartbeat(Some(7));

        let frame = codec.encode(&payload).unwrap();
        let EncodedFrame::Text(text) = frame else {
            panic!("json must encode to text");
        };

        let decoded = codec.decode(WireInput::Text(&text)).unwrap();
        assert_eq!(decoded.op, OpCode::Heartbeat);
        assert_eq!(decoded.d, Some(serde_json::json!(7)));
    }

    #[test]
    fn test_decode_binary_and_fragments() {
        let codec = Codec::new(Encoding::Json).unwrap();
        let raw = br#"{"op":0,"t":"GUILD_CREATE","s":3,"d":{"id":"A"}}"#;

        let decoded = codec.decode(WireInput::Binary(raw)).unwrap();
        assert_eq!(decoded.s, Some(3));

        let parts = vec![raw[..10].to_vec(), raw[10..30].to_vec(), raw[30..].to_vec()];
        let decoded = codec.decode(WireInput::Fragments(&parts)).unwrap();
        assert_eq!(decoded.t.as_deref(), Some("GUILD_CREATE"));
    }

    #[test]
    fn test_decode_failure_is_serialization_error() {
        let codec = Codec::new(Encoding::Json).unwrap();
        let err = codec.decode(WireInput::Text("{not json")).unwrap_err();
        assert!(err.is_recoverable_in_place());
    }

    #[test]
    fn test_query_value() {
        assert_eq!(Encoding::Json.query_value(), "json");
        assert_eq!(Encoding::Etf.query_value(), "etf");
    }
}
