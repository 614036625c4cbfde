//! Protocol messages exchanged between two peers.
use crate::error::Error;

/// One protocol message. Exactly one variant is active.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum Envelope {
    Request(Request),
    Response(Response),
    /// The client will not send any more messages for the stream `id`.
    StreamClose {
        id: i32,
    },
    /// The remote peer is going away. Closes all open streams.
    Bye,
    /// Reserved connection handshake marker. Ignored by [crate::Session].
    Open(bool),
    /// Reserved connection handshake marker. Ignored by [crate::Session].
    OpenAck(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct Request {
    pub id: i32,
    #[cfg_attr(test, proptest(strategy = "\"[a-zA-Z]{1,12}\\\\.[a-zA-Z]{1,12}\""))]
    pub method: String,
    pub payload: Payload,
    pub is_stream: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct Response {
    pub id: i32,
    pub content: ResponseContent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum ResponseContent {
    Payload(Payload),
    Error(Error),
    Close(bool),
    StreamReady(bool),
}

impl Response {
    pub(crate) fn payload(id: i32, payload: Payload) -> Self {
        Self {
            id,
            content: ResponseContent::Payload(payload),
        }
    }

    pub(crate) fn error(id: i32, error: Error) -> Self {
        Self {
            id,
            content: ResponseContent::Error(error),
        }
    }

    pub(crate) fn close(id: i32) -> Self {
        Self {
            id,
            content: ResponseContent::Close(true),
        }
    }

    pub(crate) fn stream_ready(id: i32) -> Self {
        Self {
            id,
            content: ResponseContent::StreamReady(true),
        }
    }

    /// Returns true if the response is an explicit stream readiness marker.
    pub fn is_stream_ready(&self) -> bool {
        matches!(self.content, ResponseContent::StreamReady(true))
    }
}

impl From<Request> for Envelope {
    fn from(request: Request) -> Self {
        Envelope::Request(request)
    }
}

impl From<Response> for Envelope {
    fn from(response: Response) -> Self {
        Envelope::Response(response)
    }
}

/// Opaque application message produced by a [crate::Codec].
///
/// `type_url` optionally names the type of the encoded value. It is empty if
/// the codec does not tag its payloads.
#[derive(Clone, Default, PartialEq, Eq)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct Payload {
    #[cfg_attr(test, proptest(strategy = "\"[a-z./]{0,20}\""))]
    pub type_url: String,
    pub value: Vec<u8>,
}

impl Payload {
    pub fn new(value: Vec<u8>) -> Self {
        Self {
            type_url: String::new(),
            value,
        }
    }

    pub fn with_type_url(mut self, type_url: impl ToString) -> Self {
        self.type_url = type_url.to_string();
        self
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Payload")
            .field("type_url", &self.type_url)
            .field("value", &String::from_utf8_lossy(&self.value))
            .finish()
    }
}
