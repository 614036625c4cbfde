//! Provides [PacketStream] for parsing [Envelope]s from a byte stream.

use futures::prelude::*;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::envelope::Envelope;
use crate::header::{Header, HeaderParseError};
use crate::packet::PacketParseError;
use crate::utils::ReadBuffer;

/// Largest envelope body accepted from a byte stream.
pub const MAX_BODY_LEN: u32 = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
/// Error receiving an [Envelope].
pub enum NextPacketError {
    #[error("Failed to read bytes")]
    Source(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
    #[error("Failed to parse packet header")]
    InvalidHeader(
        #[source]
        #[from]
        HeaderParseError,
    ),
    #[error("Packet body of {len} bytes exceeds the limit of {max} bytes", max = MAX_BODY_LEN)]
    BodyTooLarge { len: u32 },
    #[error("Failed to parse packet")]
    PacketParse(
        #[source]
        #[from]
        PacketParseError,
    ),
    #[error("Unexpected end of stream while parsing packet")]
    UnexpectedEndOfStream,
}

#[pin_project::pin_project]
#[derive(Debug)]
/// [Stream] of [Envelope]s parsed from underlying [Stream] of bytes.
pub struct PacketStream<Stream> {
    #[pin]
    stream: Stream,
    reader: PacketReader,
    buffer: bytes::Bytes,
}

impl<Stream> PacketStream<Stream> {
    pub fn new(stream: Stream) -> Self {
        Self {
            stream,
            reader: PacketReader::new(),
            buffer: bytes::Bytes::new(),
        }
    }
}

impl<Stream_> Stream for PacketStream<Stream_>
where
    Stream_: TryStream<Ok = Vec<u8>>,
    Stream_::Error: std::error::Error + Send + Sync + 'static,
{
    type Item = Result<Envelope, NextPacketError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        loop {
            let mut this = self.as_mut().project();

            if this.buffer.is_empty() {
                match futures::ready!(this.stream.try_poll_next(cx)) {
                    Some(Ok(data)) => *this.buffer = bytes::Bytes::from(data),
                    Some(Err(err)) => {
                        return Poll::Ready(Some(Err(NextPacketError::Source(Box::new(err)))))
                    }
                    None => {
                        if this.reader.is_empty() {
                            return Poll::Ready(None);
                        } else {
                            return Poll::Ready(Some(Err(NextPacketError::UnexpectedEndOfStream)));
                        }
                    }
                };
            }

            if let Some(packet_result) = this.reader.put(&mut *this.buffer) {
                return Poll::Ready(Some(packet_result));
            }
        }
    }
}

/// Buffer that is fed bytes until it produces an [Envelope].
///
/// Call [PacketReader::put] repeatedly until an [Envelope] or an error is returned.
#[derive(Debug)]
enum PacketReader {
    ReadingHeader { buffer: ReadBuffer },
    ReadingBody { header: Header, buffer: ReadBuffer },
}

impl PacketReader {
    fn new() -> Self {
        Self::ReadingHeader {
            buffer: ReadBuffer::new(Header::SIZE),
        }
    }

    fn put(&mut self, data: &mut impl bytes::Buf) -> Option<Result<Envelope, NextPacketError>> {
        loop {
            match self {
                Self::ReadingHeader { buffer } => {
                    let header_data = buffer.put(data)?;
                    let mut header_bytes = [0u8; Header::SIZE];
                    header_bytes.copy_from_slice(&header_data);
                    *self = Self::new();
                    let header = match Header::parse(header_bytes) {
                        Ok(header) => header,
                        Err(err) => return Some(Err(NextPacketError::InvalidHeader(err))),
                    };
                    if header.body_len > MAX_BODY_LEN {
                        return Some(Err(NextPacketError::BodyTooLarge {
                            len: header.body_len,
                        }));
                    }
                    if header.body_len == 0 {
                        return Some(
                            crate::packet::parse(header, Vec::new())
                                .map_err(NextPacketError::PacketParse),
                        );
                    }

                    *self = Self::ReadingBody {
                        header,
                        buffer: ReadBuffer::new(header.body_len as usize),
                    };
                }
                Self::ReadingBody { header, buffer } => {
                    let body_data = buffer.put(data)?;
                    let header = *header;
                    *self = Self::new();
                    return Some(
                        crate::packet::parse(header, body_data)
                            .map_err(NextPacketError::PacketParse),
                    );
                }
            }
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            PacketReader::ReadingHeader { buffer } => buffer.is_empty(),
            PacketReader::ReadingBody { .. } => false,
        }
    }
}
