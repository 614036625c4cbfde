#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(test, derive(test_strategy::Arbitrary))]
pub struct Header {
    pub kind: EnvelopeKind,
    /// Boolean carried by the envelope: `is_stream` for requests, the value of
    /// `Close`, `StreamReady`, `Open` and `OpenAck`.
    pub flag: bool,
    #[cfg_attr(test, strategy(0u32..=u32::MAX))]
    pub body_len: u32,
    pub id: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(test, derive(test_strategy::Arbitrary))]
#[repr(u8)]
pub enum EnvelopeKind {
    Request = 1,
    ResponsePayload = 2,
    ResponseError = 3,
    ResponseClose = 4,
    ResponseStreamReady = 5,
    StreamClose = 6,
    Bye = 7,
    Open = 8,
    OpenAck = 9,
}

/// Error returned from [Header::parse].
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum HeaderParseError {
    #[error("Invalid envelope kind {value}")]
    InvalidKind { value: u8 },
}

const KIND_MASK: u8 = 0b0000_1111;
const FLAG_MASK: u8 = 0b1000_0000;

impl EnvelopeKind {
    fn from_flags(value: u8) -> Result<Self, HeaderParseError> {
        match value & KIND_MASK {
            1 => Ok(Self::Request),
            2 => Ok(Self::ResponsePayload),
            3 => Ok(Self::ResponseError),
            4 => Ok(Self::ResponseClose),
            5 => Ok(Self::ResponseStreamReady),
            6 => Ok(Self::StreamClose),
            7 => Ok(Self::Bye),
            8 => Ok(Self::Open),
            9 => Ok(Self::OpenAck),
            value => Err(HeaderParseError::InvalidKind { value }),
        }
    }
}

impl Header {
    pub const SIZE: usize = 9;

    pub fn parse(data: [u8; Self::SIZE]) -> Result<Self, HeaderParseError> {
        use bytes::Buf as _;

        let mut bytes = bytes::Bytes::copy_from_slice(&data);

        let flags = bytes.get_u8();
        let kind = EnvelopeKind::from_flags(flags)?;
        let flag = flags & FLAG_MASK != 0;
        let body_len = bytes.get_u32();
        let id = bytes.get_i32();
        debug_assert!(!bytes.has_remaining());

        Ok(Self {
            kind,
            flag,
            body_len,
            id,
        })
    }

    pub fn build(&self) -> [u8; Self::SIZE] {
        use bytes::BufMut as _;

        let mut header = [0u8; Self::SIZE];
        let cursor = &mut &mut header[..];
        let mut flags = self.kind as u8;
        if self.flag {
            flags |= FLAG_MASK;
        }
        cursor.put_u8(flags);
        cursor.put_u32(self.body_len);
        cursor.put_i32(self.id);
        debug_assert!(!cursor.has_remaining_mut());
        header
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    #[test_strategy::proptest]
    fn header_parse_build(header: Header) {
        prop_assert_eq!(Header::parse(header.build()).unwrap(), header);
    }

    #[test_strategy::proptest]
    fn header_invalid_kind(header_data: [u8; Header::SIZE]) {
        let mut header_data = header_data;
        header_data[0] |= 0b0000_1111;
        let result = Header::parse(header_data);
        prop_assert_eq!(result, Err(HeaderParseError::InvalidKind { value: 15 }));
    }

    #[test]
    fn zero_header_is_invalid() {
        let header_data = [0u8; Header::SIZE];
        assert_eq!(
            Header::parse(header_data),
            Err(HeaderParseError::InvalidKind { value: 0 })
        );
    }
}
