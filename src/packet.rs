//! Binary encoding of [Envelope]s for byte oriented transports.
use bytes::{Buf as _, BufMut as _};
use std::convert::TryFrom as _;

use crate::envelope::{Envelope, Payload, Request, Response, ResponseContent};
use crate::error::Error;

pub use crate::header::{EnvelopeKind, Header, HeaderParseError};

#[derive(Debug, thiserror::Error)]
pub enum PacketParseError {
    #[error("Failed to decode error response body")]
    ErrorResponseBody {
        body: String,
        #[source]
        error: serde_json::Error,
    },
    #[error("Invalid string in {field}")]
    StringEncoding {
        field: &'static str,
        #[source]
        error: std::string::FromUtf8Error,
    },
    #[error("Body of {kind:?} envelope ends after {len} bytes")]
    Truncated { kind: EnvelopeKind, len: usize },
    #[error("Unexpected body for {kind:?} envelope")]
    UnexpectedBody { kind: EnvelopeKind },
}

/// Error returned when an [Envelope] cannot be encoded.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("{field} is {len} bytes long, at most {max} bytes are allowed", max = u16::MAX)]
    FieldTooLong { field: &'static str, len: usize },
    #[error("Body is {len} bytes long, at most {max} bytes are allowed", max = u32::MAX)]
    BodyTooLong { len: usize },
    #[error("Failed to encode error response body")]
    ErrorResponseBody(
        #[source]
        #[from]
        serde_json::Error,
    ),
}

/// Error returned by [decode] for a complete encoded envelope.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Message is shorter than the envelope header")]
    MissingHeader,
    #[error("Failed to parse envelope header")]
    Header(
        #[source]
        #[from]
        HeaderParseError,
    ),
    #[error("Message body length {actual} does not match header length {expected}")]
    BodyLength { expected: u32, actual: usize },
    #[error("Failed to parse envelope")]
    Packet(
        #[source]
        #[from]
        PacketParseError,
    ),
}

/// Encode a single envelope including its header.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, EncodeError> {
    RawPacket::from_envelope(envelope)?.build()
}

/// Decode a single envelope from a buffer that contains exactly one encoded
/// envelope, for example a websocket binary frame.
pub fn decode(data: &[u8]) -> Result<Envelope, DecodeError> {
    if data.len() < Header::SIZE {
        return Err(DecodeError::MissingHeader);
    }
    let (header_data, body) = data.split_at(Header::SIZE);
    let mut header_bytes = [0u8; Header::SIZE];
    header_bytes.copy_from_slice(header_data);
    let header = Header::parse(header_bytes)?;
    if header.body_len as usize != body.len() {
        return Err(DecodeError::BodyLength {
            expected: header.body_len,
            actual: body.len(),
        });
    }
    Ok(parse(header, body.to_vec())?)
}

/// Build an [Envelope] from a parsed header and its body.
pub fn parse(header: Header, body: Vec<u8>) -> Result<Envelope, PacketParseError> {
    let Header { kind, flag, id, .. } = header;
    let mut body = bytes::Bytes::from(body);
    let envelope = match kind {
        EnvelopeKind::Request => {
            let method = read_string(kind, "method", &mut body)?;
            let payload = read_payload(kind, body)?;
            Envelope::Request(Request {
                id,
                method,
                payload,
                is_stream: flag,
            })
        }
        EnvelopeKind::ResponsePayload => {
            Envelope::Response(Response::payload(id, read_payload(kind, body)?))
        }
        EnvelopeKind::ResponseError => {
            let error = serde_json::from_slice::<Error>(&body).map_err(|error| {
                PacketParseError::ErrorResponseBody {
                    body: String::from_utf8_lossy(&body).into_owned(),
                    error,
                }
            })?;
            Envelope::Response(Response::error(id, error.normalized()))
        }
        EnvelopeKind::ResponseClose => {
            expect_empty(kind, &body)?;
            Envelope::Response(Response {
                id,
                content: ResponseContent::Close(flag),
            })
        }
        EnvelopeKind::ResponseStreamReady => {
            expect_empty(kind, &body)?;
            Envelope::Response(Response {
                id,
                content: ResponseContent::StreamReady(flag),
            })
        }
        EnvelopeKind::StreamClose => {
            expect_empty(kind, &body)?;
            Envelope::StreamClose { id }
        }
        EnvelopeKind::Bye => {
            expect_empty(kind, &body)?;
            Envelope::Bye
        }
        EnvelopeKind::Open => {
            expect_empty(kind, &body)?;
            Envelope::Open(flag)
        }
        EnvelopeKind::OpenAck => {
            expect_empty(kind, &body)?;
            Envelope::OpenAck(flag)
        }
    };
    Ok(envelope)
}

fn expect_empty(kind: EnvelopeKind, body: &bytes::Bytes) -> Result<(), PacketParseError> {
    if body.is_empty() {
        Ok(())
    } else {
        Err(PacketParseError::UnexpectedBody { kind })
    }
}

fn read_string(
    kind: EnvelopeKind,
    field: &'static str,
    body: &mut bytes::Bytes,
) -> Result<String, PacketParseError> {
    let truncated = PacketParseError::Truncated {
        kind,
        len: body.len(),
    };
    if body.remaining() < 2 {
        return Err(truncated);
    }
    let len = body.get_u16() as usize;
    if body.remaining() < len {
        return Err(truncated);
    }
    let data = body.split_to(len);
    String::from_utf8(data.to_vec())
        .map_err(|error| PacketParseError::StringEncoding { field, error })
}

fn read_payload(kind: EnvelopeKind, mut body: bytes::Bytes) -> Result<Payload, PacketParseError> {
    let type_url = read_string(kind, "type_url", &mut body)?;
    Ok(Payload {
        type_url,
        value: body.to_vec(),
    })
}

fn put_string(
    field: &'static str,
    value: &str,
    buffer: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    let len = u16::try_from(value.len()).map_err(|_| EncodeError::FieldTooLong {
        field,
        len: value.len(),
    })?;
    buffer.put_u16(len);
    buffer.put_slice(value.as_bytes());
    Ok(())
}

fn put_payload(payload: &Payload, buffer: &mut Vec<u8>) -> Result<(), EncodeError> {
    put_string("type_url", &payload.type_url, buffer)?;
    buffer.put_slice(&payload.value);
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RawPacket {
    kind: EnvelopeKind,
    flag: bool,
    id: i32,
    body: Vec<u8>,
}

impl RawPacket {
    fn from_envelope(envelope: &Envelope) -> Result<Self, EncodeError> {
        let mut body = Vec::new();
        let (kind, flag, id) = match envelope {
            Envelope::Request(Request {
                id,
                method,
                payload,
                is_stream,
            }) => {
                put_string("method", method, &mut body)?;
                put_payload(payload, &mut body)?;
                (EnvelopeKind::Request, *is_stream, *id)
            }
            Envelope::Response(Response { id, content }) => match content {
                ResponseContent::Payload(payload) => {
                    put_payload(payload, &mut body)?;
                    (EnvelopeKind::ResponsePayload, false, *id)
                }
                ResponseContent::Error(error) => {
                    body = serde_json::to_vec(error)?;
                    (EnvelopeKind::ResponseError, false, *id)
                }
                ResponseContent::Close(value) => (EnvelopeKind::ResponseClose, *value, *id),
                ResponseContent::StreamReady(value) => {
                    (EnvelopeKind::ResponseStreamReady, *value, *id)
                }
            },
            Envelope::StreamClose { id } => (EnvelopeKind::StreamClose, false, *id),
            Envelope::Bye => (EnvelopeKind::Bye, false, 0),
            Envelope::Open(value) => (EnvelopeKind::Open, *value, 0),
            Envelope::OpenAck(value) => (EnvelopeKind::OpenAck, *value, 0),
        };
        Ok(Self {
            kind,
            flag,
            id,
            body,
        })
    }

    fn header_and_body(self) -> Result<(Header, Vec<u8>), EncodeError> {
        let Self {
            kind,
            flag,
            id,
            body,
        } = self;
        let body_len =
            u32::try_from(body.len()).map_err(|_| EncodeError::BodyTooLong { len: body.len() })?;
        let header = Header {
            kind,
            flag,
            body_len,
            id,
        };
        Ok((header, body))
    }

    fn build(self) -> Result<Vec<u8>, EncodeError> {
        let (header, mut body) = self.header_and_body()?;
        let mut data = header.build().to_vec();
        data.append(&mut body);
        Ok(data)
    }
}
