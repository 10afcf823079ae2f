use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use super::{Message, MessageId, PROTOCOL_HEADER};
use crate::{bitfield::Bitfield, error::Error};

/// Frames larger than this are considered garbage.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Encodes and decodes the length-prefixed [`Message`] frames.
///
/// The decoder never consumes a frame partially, it waits until the whole
/// frame is in the buffer. A frame with a bad length prefix or an unknown ID
/// is an error and the buffer is left untouched, the stream can't be trusted
/// after that.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    max_message_size: usize,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self { max_message_size: MAX_MESSAGE_SIZE }
    }
}

impl MessageCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }
}

fn wire_index(index: usize) -> Result<u32, Error> {
    u32::try_from(index).map_err(|_| Error::PieceIndexOverflow(index))
}

impl Encoder<Message> for MessageCodec {
    type Error = Error;

    fn encode(
        &mut self,
        item: Message,
        buf: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        buf.reserve(item.len());

        match item {
            Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => {
                buf.put_u32(1);
                buf.put_u8(item.id() as u8);
            }
            // <len=0005><id=4><piece index>
            Message::Have(index) => {
                let index = wire_index(index)?;
                buf.put_u32(1 + 4);
                buf.put_u8(MessageId::Have as u8);
                buf.put_u32(index);
            }
            // <len=0001+X><id=5><bitfield>
            Message::Bitfield(bitfield) => {
                let raw = bitfield.as_raw_slice();
                buf.put_u32(1 + raw.len() as u32);
                buf.put_u8(MessageId::Bitfield as u8);
                buf.extend_from_slice(raw);
            }
            // <len=0005><id=6><piece index>
            Message::Request(index) => {
                let index = wire_index(index)?;
                buf.put_u32(1 + 4);
                buf.put_u8(MessageId::Request as u8);
                buf.put_u32(index);
            }
            // <len=0005+X><id=7><piece index><data>
            Message::Piece { index, data } => {
                let index = wire_index(index)?;
                buf.put_u32(1 + 4 + data.len() as u32);
                buf.put_u8(MessageId::Piece as u8);
                buf.put_u32(index);
                buf.extend_from_slice(&data);
            }
        }
        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = Error;

    fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<Self::Item>, Self::Error> {
        // the message length header must be present at the minimum, otherwise
        // we can't determine the message type
        if buf.len() < 4 {
            return Ok(None);
        }

        // peek at length prefix without consuming
        let size =
            u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

        if size == 0 || size > self.max_message_size {
            // a handshake where a frame should be, its protocol header read
            // as a length prefix is always absurdly large.
            if buf.starts_with(&PROTOCOL_HEADER[..4]) {
                return Err(Error::DuplicateHandshake);
            }
            warn!("invalid message length {size}");
            return Err(Error::MessageLength {
                len: size,
                max: self.max_message_size,
            });
        }

        if buf.len() < 5 {
            return Ok(None);
        }

        let id = MessageId::try_from(buf[4])?;

        if !id.accepts_len(size) {
            return Err(Error::PayloadLength { id, len: size });
        }

        // incomplete message, wait for the rest of the frame without
        // advancing the cursor.
        if buf.len() < 4 + size {
            buf.reserve(4 + size - buf.len());
            return Ok(None);
        }

        // advance past the size and the msg_id, into the payload.
        buf.advance(4 + 1);
        let payload_len = size - 1;

        let msg = match id {
            MessageId::Choke => Message::Choke,
            MessageId::Unchoke => Message::Unchoke,
            MessageId::Interested => Message::Interested,
            MessageId::NotInterested => Message::NotInterested,
            MessageId::Have => Message::Have(buf.get_u32() as usize),
            // the wire has no bit count, the bitfield comes back padded to
            // whole bytes and the receiver cuts it to its piece count.
            MessageId::Bitfield => {
                let bitfield = buf.split_to(payload_len).to_vec();
                Message::Bitfield(Bitfield::from_vec(bitfield))
            }
            MessageId::Request => Message::Request(buf.get_u32() as usize),
            MessageId::Piece => {
                let index = buf.get_u32() as usize;
                let data = buf.split_to(payload_len - 4).to_vec();
                Message::Piece { index, data }
            }
        };

        Ok(Some(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bitfield::PieceBitfield,
        peer::PeerId,
        tcp_wire::{Handshake, HandshakeCodec},
    };

    fn encode(msg: Message) -> BytesMut {
        let mut buf = BytesMut::new();
        MessageCodec::default().encode(msg, &mut buf).unwrap();
        buf
    }

    fn decode(buf: &mut BytesMut) -> Result<Option<Message>, Error> {
        MessageCodec::default().decode(buf)
    }

    #[test]
    fn round_trip_every_kind() {
        let mut bitfield = Bitfield::from_piece(16);
        bitfield.set(2, true);
        bitfield.set(15, true);

        let msgs = vec![
            Message::Choke,
            Message::Unchoke,
            Message::Interested,
            Message::NotInterested,
            Message::Have(7),
            Message::Bitfield(bitfield),
            Message::Request(u32::MAX as usize),
            Message::Piece { index: 3, data: vec![9u8; 300] },
        ];

        for msg in msgs {
            let mut buf = encode(msg.clone());
            assert_eq!(buf.len(), msg.len());
            assert_eq!(decode(&mut buf).unwrap(), Some(msg));
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn bitfield_is_padded_to_bytes() {
        let mut bitfield = Bitfield::from_piece(10);
        bitfield.set(9, true);

        let mut buf = encode(Message::Bitfield(bitfield));
        assert_eq!(&buf[..], &[0, 0, 0, 3, MessageId::Bitfield as u8, 0, 0b0100_0000]);

        let Some(Message::Bitfield(decoded)) = decode(&mut buf).unwrap() else {
            panic!("expected a bitfield");
        };
        assert_eq!(decoded.len(), 16);
        assert_eq!(decoded.iter_ones().collect::<Vec<_>>(), vec![9]);
        assert_eq!(Bitfield::new_and_resize(decoded.into_vec(), 10).len(), 10);
    }

    #[test]
    fn empty_payloads() {
        let msg = Message::Bitfield(Bitfield::new());
        let mut buf = encode(msg.clone());
        assert_eq!(&buf[..], &[0, 0, 0, 1, MessageId::Bitfield as u8]);
        assert_eq!(decode(&mut buf).unwrap(), Some(msg));

        let msg = Message::Piece { index: 0, data: vec![] };
        let mut buf = encode(msg.clone());
        assert_eq!(&buf[..], &[0, 0, 0, 5, MessageId::Piece as u8, 0, 0, 0, 0]);
        assert_eq!(decode(&mut buf).unwrap(), Some(msg));
    }

    #[test]
    fn have() {
        let mut buf = encode(Message::Have(258));

        // len
        assert_eq!(buf.get_u32(), 5);
        // id
        assert_eq!(buf.get_u8(), MessageId::Have as u8);
        // index
        assert_eq!(buf.get_u32(), 258);
        assert!(buf.is_empty());
    }

    #[test]
    fn piece() {
        let mut buf = encode(Message::Piece { index: 1, data: vec![4, 2] });

        assert_eq!(buf.get_u32(), 1 + 4 + 2);
        assert_eq!(buf.get_u8(), MessageId::Piece as u8);
        assert_eq!(buf.get_u32(), 1);
        assert_eq!(&buf[..], &[4, 2]);
    }

    #[test]
    fn fragmented_message() {
        let mut codec = MessageCodec::default();
        let frame = encode(Message::Piece { index: 9, data: vec![0xAA; 50_000] });

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&frame[..3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&frame[3..20_000]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&frame[20_000..]);
        buf.extend_from_slice(&encode(Message::Interested));

        match codec.decode(&mut buf).unwrap().unwrap() {
            Message::Piece { index, data } => {
                assert_eq!(index, 9);
                assert_eq!(data.len(), 50_000);
                assert!(data.iter().all(|&b| b == 0xAA));
            }
            _ => panic!("Wrong message type"),
        }

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::Interested));
        assert!(buf.is_empty());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let mut buf = BytesMut::from(&[0, 0, 0, 1, 8][..]);
        let err = decode(&mut buf).unwrap_err();
        assert!(matches!(err, Error::UnsupportedMessageKind(8)));
        // nothing was consumed
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn bad_lengths_are_framing_errors() {
        // no room for the message id
        let mut buf = BytesMut::from(&[0, 0, 0, 0][..]);
        let err = decode(&mut buf).unwrap_err();
        assert!(err.is_framing());

        // larger than any piece we would accept
        let mut buf = BytesMut::from(&[0x7f, 0xff, 0xff, 0xff, 7][..]);
        let err = decode(&mut buf).unwrap_err();
        assert!(matches!(err, Error::MessageLength { .. }));

        // the length of a choke must be exactly 1
        let mut buf = BytesMut::from(&[0, 0, 0, 3, 0, 1, 1][..]);
        let err = decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            Error::PayloadLength { id: MessageId::Choke, len: 3 }
        ));

        // a have without the full index
        let mut buf = BytesMut::from(&[0, 0, 0, 2, 4, 1][..]);
        let err = decode(&mut buf).unwrap_err();
        assert!(matches!(err, Error::PayloadLength { id: MessageId::Have, .. }));
    }

    #[test]
    fn configured_max_size() {
        let mut codec = MessageCodec::new(8);
        let mut buf = encode(Message::Piece { index: 0, data: vec![0; 4] });
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, Error::MessageLength { len: 9, max: 8 }));
    }

    #[test]
    fn truncated_stream() {
        let mut codec = MessageCodec::default();
        let frame = encode(Message::Have(1));
        let mut buf = BytesMut::from(&frame[..4]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        // the stream ended in the middle of a frame
        assert!(matches!(codec.decode_eof(&mut buf), Err(Error::IO(_))));
    }

    #[test]
    fn second_handshake() {
        let mut buf = BytesMut::new();
        HandshakeCodec.encode(Handshake::new(PeerId(1001)), &mut buf).unwrap();

        let err = decode(&mut buf).unwrap_err();
        assert!(matches!(err, Error::DuplicateHandshake));
    }

    #[test]
    fn index_overflow() {
        if usize::BITS <= 32 {
            return;
        }
        let mut buf = BytesMut::new();
        let err = MessageCodec::default()
            .encode(Message::Have(u32::MAX as usize + 1), &mut buf)
            .unwrap_err();
        assert!(matches!(err, Error::PieceIndexOverflow(_)));
    }
}
