//! Messages exchanged with `ubusd` over its unix socket.
//!
//! Every message is an eight byte header (version, type, big-endian
//! sequence number and peer id) followed by one blob attribute whose payload
//! holds the message attributes.

use std::io::{self, Read, Write};

use super::blob::{self, ATTR_HEADER_LEN, Attr};
use crate::bus::BusError;

/// Size of the message header.
pub(crate) const HEADER_LEN: usize = 8;

/// Largest message `ubusd` accepts, headers included.
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Status code returned for unknown objects.
pub(crate) const STATUS_NOT_FOUND: u32 = 4;

pub(crate) const ATTR_STATUS: u8 = 1;
pub(crate) const ATTR_OBJPATH: u8 = 2;
pub(crate) const ATTR_OBJID: u8 = 3;
pub(crate) const ATTR_METHOD: u8 = 4;
pub(crate) const ATTR_DATA: u8 = 7;

/// Message types used by the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MessageType {
    Hello,
    Status,
    Data,
    Lookup,
    Invoke,
    Other(u8),
}

impl MessageType {
    const fn code(self) -> u8 {
        match self {
            Self::Hello => 0,
            Self::Status => 1,
            Self::Data => 2,
            Self::Lookup => 4,
            Self::Invoke => 5,
            Self::Other(code) => code,
        }
    }

    const fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Hello,
            1 => Self::Status,
            2 => Self::Data,
            4 => Self::Lookup,
            5 => Self::Invoke,
            other => Self::Other(other),
        }
    }
}

/// One bus message with its encoded attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Message {
    pub(crate) kind: MessageType,
    pub(crate) seq: u16,
    pub(crate) peer: u32,
    body: Vec<u8>,
}

impl Message {
    pub(crate) const fn new(kind: MessageType, seq: u16, peer: u32) -> Self {
        Self {
            kind,
            seq,
            peer,
            body: Vec::new(),
        }
    }

    pub(crate) fn with_string(mut self, id: u8, value: &str) -> Result<Self, BusError> {
        blob::put_string(&mut self.body, id, value)?;
        Ok(self)
    }

    pub(crate) fn with_u32(mut self, id: u8, value: u32) -> Result<Self, BusError> {
        blob::put_u32(&mut self.body, id, value)?;
        Ok(self)
    }

    /// Adds an attribute whose payload is already blob encoded.
    pub(crate) fn with_raw(mut self, id: u8, payload: &[u8]) -> Result<Self, BusError> {
        blob::put_attr(&mut self.body, id, payload)?;
        Ok(self)
    }

    /// First attribute with `id`.
    pub(crate) fn attr(&self, id: u8) -> Result<Option<Attr<'_>>, BusError> {
        Ok(blob::attrs(&self.body)?
            .into_iter()
            .find(|attr| attr.id == id))
    }

    pub(crate) fn u32_attr(&self, id: u8) -> Result<Option<u32>, BusError> {
        self.attr(id)?
            .map(|attr| {
                attr.payload
                    .try_into()
                    .map(u32::from_be_bytes)
                    .map_err(|_| BusError::Protocol(format!("attribute {id} is not a 32-bit integer")))
            })
            .transpose()
    }

    pub(crate) fn string_attr(&self, id: u8) -> Result<Option<String>, BusError> {
        self.attr(id)?
            .map(|attr| {
                let text = attr.payload.strip_suffix(&[0]).unwrap_or(attr.payload);
                String::from_utf8(text.to_vec())
                    .map_err(|_| BusError::Protocol(format!("attribute {id} is not UTF-8")))
            })
            .transpose()
    }

    /// Size of the encoded message.
    pub(crate) fn encoded_len(&self) -> usize {
        HEADER_LEN + ATTR_HEADER_LEN + self.body.len()
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, BusError> {
        let len = self.encoded_len();
        if len > MAX_MESSAGE_LEN {
            return Err(BusError::MessageTooLarge {
                len,
                limit: MAX_MESSAGE_LEN,
            });
        }
        let mut out = Vec::with_capacity(len);
        out.push(0);
        out.push(self.kind.code());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&self.peer.to_be_bytes());
        blob::put_attr(&mut out, 0, &self.body)?;
        Ok(out)
    }

    pub(crate) fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), BusError> {
        let bytes = self.encode()?;
        writer
            .write_all(&bytes)
            .and_then(|()| writer.flush())
            .map_err(|source| io_error("write", source))
    }

    pub(crate) fn read_from<R: Read>(reader: &mut R) -> Result<Self, BusError> {
        let mut head = [0_u8; HEADER_LEN + ATTR_HEADER_LEN];
        reader
            .read_exact(&mut head)
            .map_err(|source| io_error("read", source))?;
        let [_version, kind, seq_hi, seq_lo, p0, p1, p2, p3, l0, l1, l2, l3] = head;
        let blob_len = usize::try_from(u32::from_be_bytes([l0, l1, l2, l3]) & 0x00ff_ffff)
            .map_err(|_| BusError::Protocol("message length overflows".to_owned()))?;
        if blob_len < ATTR_HEADER_LEN || HEADER_LEN + blob_len > MAX_MESSAGE_LEN {
            return Err(BusError::Protocol(format!("message length {blob_len} out of range")));
        }
        let mut body = vec![0; blob_len - ATTR_HEADER_LEN];
        reader
            .read_exact(&mut body)
            .map_err(|source| io_error("read", source))?;
        Ok(Self {
            kind: MessageType::from_code(kind),
            seq: u16::from_be_bytes([seq_hi, seq_lo]),
            peer: u32::from_be_bytes([p0, p1, p2, p3]),
            body,
        })
    }
}

fn io_error(operation: &'static str, source: io::Error) -> BusError {
    match source.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => {
            BusError::Disconnected(format!("bus closed the connection during {operation}"))
        }
        _ => BusError::Io { operation, source },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Cursor;

    #[rstest]
    fn lookup_matches_the_ubusd_layout() {
        let message = Message::new(MessageType::Lookup, 1, 0)
            .with_string(ATTR_OBJPATH, "x")
            .expect("encode");
        assert_eq!(
            message.encode().expect("encode"),
            vec![
                0, 4, 0, 1, 0, 0, 0, 0, // header
                0, 0, 0, 12, // container attribute
                2, 0, 0, 6, b'x', 0, 0, 0, // object path
            ]
        );
    }

    #[rstest]
    fn messages_read_back_with_their_attributes() {
        let sent = Message::new(MessageType::Invoke, 9, 0x0102_0304)
            .with_u32(ATTR_OBJID, 42)
            .and_then(|message| message.with_string(ATTR_METHOD, "get"))
            .expect("encode");
        let mut cursor = Cursor::new(sent.encode().expect("encode"));
        let received = Message::read_from(&mut cursor).expect("decode");
        assert_eq!(received, sent);
        assert_eq!(received.u32_attr(ATTR_OBJID).expect("objid"), Some(42));
        assert_eq!(received.string_attr(ATTR_METHOD).expect("method").as_deref(), Some("get"));
        assert_eq!(received.u32_attr(ATTR_STATUS).expect("status"), None);
    }

    #[rstest]
    fn oversized_messages_are_refused_before_sending() {
        let message = Message::new(MessageType::Invoke, 1, 1)
            .with_raw(ATTR_DATA, &vec![0; MAX_MESSAGE_LEN])
            .expect("encode");
        let error = message.encode().expect_err("too large");
        assert!(matches!(error, BusError::MessageTooLarge { .. }));
    }

    #[rstest]
    fn closed_streams_read_as_disconnects() {
        let error = Message::read_from(&mut Cursor::new(vec![0, 1, 0])).expect_err("short");
        assert!(matches!(error, BusError::Disconnected(_)));
    }
}
