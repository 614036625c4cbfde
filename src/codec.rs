//! Conversion between application messages and opaque [Payload]s.
use crate::envelope::Payload;

/// Error returned by a [Codec].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Failed to encode message")]
    Encode(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
    #[error("Failed to decode message of type \"{type_url}\"")]
    Decode {
        type_url: String,
        #[source]
        error: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

/// Turns typed messages into [Payload]s and back.
///
/// The session never looks into a payload. Both peers of a session must use
/// the same codec.
pub trait Codec: Send + Sync + 'static {
    fn encode<T: serde::Serialize>(value: &T) -> Result<Payload, CodecError>;

    fn decode<T: serde::de::DeserializeOwned>(payload: &Payload) -> Result<T, CodecError>;
}

/// Encodes messages as JSON with an empty type tag.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: serde::Serialize>(value: &T) -> Result<Payload, CodecError> {
        let value = serde_json::to_vec(value).map_err(|error| CodecError::Encode(Box::new(error)))?;
        Ok(Payload::new(value))
    }

    fn decode<T: serde::de::DeserializeOwned>(payload: &Payload) -> Result<T, CodecError> {
        serde_json::from_slice(&payload.value).map_err(|error| CodecError::Decode {
            type_url: payload.type_url.clone(),
            error: Box::new(error),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct EchoMessage {
        data: String,
    }

    #[test]
    fn json_message() {
        let payload = JsonCodec::encode(&EchoMessage {
            data: "foo".to_string(),
        })
        .unwrap();
        assert_eq!(payload.type_url, "");
        assert_eq!(payload.value, br#"{"data":"foo"}"#.to_vec());
        let message = JsonCodec::decode::<EchoMessage>(&payload).unwrap();
        assert_eq!(message.data, "foo");
    }

    #[test]
    fn json_decode_invalid() {
        let payload = Payload::new(b"{".to_vec()).with_type_url("echo.Message");
        match JsonCodec::decode::<EchoMessage>(&payload) {
            Err(CodecError::Decode { type_url, .. }) => assert_eq!(type_url, "echo.Message"),
            result => panic!("Unexpected result {:?}", result),
        }
    }

    #[test]
    fn json_encode_invalid() {
        let mut map = std::collections::HashMap::new();
        map.insert(vec![1u8], 1u8);
        assert!(matches!(JsonCodec::encode(&map), Err(CodecError::Encode(_))));
    }
}
