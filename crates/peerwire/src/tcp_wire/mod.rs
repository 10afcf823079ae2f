//! Types and codecs of the peer wire protocol.
//!
//! The connection starts with a fixed 32 byte [`Handshake`] in both
//! directions, after that every [`Message`] is a frame of the form
//! `<length prefix><message ID><payload>`, where the length prefix is a
//! four byte big-endian value that counts the ID and the payload.

mod codec;
mod handshake;

pub use codec::*;
pub use handshake::*;

use crate::{bitfield::Bitfield, error::Error};

/// The IDs of the [`Message`]s.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
}

impl TryFrom<u8> for MessageId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use MessageId::*;
        match value {
            0 => Ok(Choke),
            1 => Ok(Unchoke),
            2 => Ok(Interested),
            3 => Ok(NotInterested),
            4 => Ok(Have),
            5 => Ok(Bitfield),
            6 => Ok(Request),
            7 => Ok(Piece),
            _ => Err(Error::UnsupportedMessageKind(value)),
        }
    }
}

impl MessageId {
    /// If `len`, the value of the length prefix, is valid for this message.
    pub fn accepts_len(&self, len: usize) -> bool {
        use MessageId::*;
        match self {
            Choke | Unchoke | Interested | NotInterested => len == 1,
            Have | Request => len == 1 + 4,
            Piece => len >= 1 + 4,
            Bitfield => len >= 1,
        }
    }
}

/// Messages exchanged after a successful handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(usize),
    Bitfield(Bitfield),
    Request(usize),
    Piece { index: usize, data: Vec<u8> },
}

impl Message {
    pub fn id(&self) -> MessageId {
        match self {
            Message::Choke => MessageId::Choke,
            Message::Unchoke => MessageId::Unchoke,
            Message::Interested => MessageId::Interested,
            Message::NotInterested => MessageId::NotInterested,
            Message::Have(_) => MessageId::Have,
            Message::Bitfield(_) => MessageId::Bitfield,
            Message::Request(_) => MessageId::Request,
            Message::Piece { .. } => MessageId::Piece,
        }
    }

    /// Size of the whole frame on the wire, length prefix included.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        use Message::*;
        match self {
            Choke | Unchoke | Interested | NotInterested => 4 + 1,
            Have(_) | Request(_) => 4 + 1 + 4,
            Bitfield(b) => 4 + 1 + b.as_raw_slice().len(),
            Piece { data, .. } => 4 + 1 + 4 + data.len(),
        }
    }
}
