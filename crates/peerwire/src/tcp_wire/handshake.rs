//! Codec for encoding and decoding handshakes.
//!
//! This has to be a separate codec as the handshake has a different
//! structure than the rest of the messages. Moreover, handshakes may only
//! be sent once at the beginning of a connection, preceding all other
//! messages. Thus, after receiving and sending a handshake the codec
//! should be switched to [`MessageCodec`](super::MessageCodec), but care
//! should be taken not to discard the underlying receive and send buffers.

use bytes::BytesMut;
use speedy::{BigEndian, Readable, Writable};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::{error::Error, peer::PeerId};

/// The fixed header that opens every handshake.
pub const PROTOCOL_HEADER: [u8; 18] = *b"P2PFILESHARINGPROJ";

/// Size of a handshake on the wire.
pub const HANDSHAKE_LEN: usize = 18 + 10 + 4;

#[derive(Debug)]
pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {
    type Error = Error;

    fn encode(
        &mut self,
        handshake: Handshake,
        buf: &mut BytesMut,
    ) -> Result<(), Error> {
        // we should only be sending our own protocol header
        debug_assert_eq!(handshake.header, PROTOCOL_HEADER);

        buf.extend_from_slice(&handshake.serialize()?);
        Ok(())
    }
}

impl Decoder for HandshakeCodec {
    type Item = Handshake;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Handshake>, Error> {
        if buf.len() < HANDSHAKE_LEN {
            return Ok(None);
        }

        // only the handshake is split off, the framed messages that the peer
        // may have sent right after it stay in the buffer.
        let bytes = buf.split_to(HANDSHAKE_LEN);
        Handshake::deserialize(&bytes).map(Some)
    }
}

/// header = "P2PFILESHARINGPROJ"
/// This is the very first message exchanged, in both directions. It carries
/// the 18 byte protocol header, 10 reserved zero bytes and the big-endian
/// peer id of the sender.
#[derive(Clone, Debug, PartialEq, Eq, Writable, Readable)]
pub struct Handshake {
    pub header: [u8; 18],
    pub reserved: [u8; 10],
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(peer_id: PeerId) -> Self {
        Self { header: PROTOCOL_HEADER, reserved: [0u8; 10], peer_id }
    }

    pub fn serialize(&self) -> Result<[u8; HANDSHAKE_LEN], Error> {
        let mut buf = [0u8; HANDSHAKE_LEN];
        let temp = self.write_to_vec_with_ctx(BigEndian {})?;

        buf.copy_from_slice(&temp[..]);

        Ok(buf)
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() != HANDSHAKE_LEN {
            return Err(Error::HandshakeLength(buf.len()));
        }
        Ok(Self::read_from_buffer_with_ctx(BigEndian {}, buf)?)
    }

    pub fn validate(&self) -> bool {
        if self.header != PROTOCOL_HEADER {
            warn!("! handshake with wrong header, dropping connection");
            return false;
        }
        if self.reserved.iter().any(|b| *b != 0) {
            warn!("! handshake with non-zero reserved bytes, dropping connection");
            return false;
        }
        true
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    #[test]
    fn handshake() {
        let our_handshake = Handshake::new(PeerId(1002));

        assert_eq!(our_handshake.header, PROTOCOL_HEADER);
        assert_eq!(our_handshake.peer_id, PeerId(1002));
        assert!(our_handshake.validate());

        let our_handshake = our_handshake.serialize().unwrap();
        assert_eq!(
            our_handshake,
            [
                80, 50, 80, 70, 73, 76, 69, 83, 72, 65, 82, 73, 78, 71, 80, 82,
                79, 74, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 3, 234
            ]
        );
    }

    #[test]
    fn peer_id_round_trip() {
        for id in [0, 1, 1001, 0x0102_0304, u32::MAX - 1, u32::MAX] {
            let bytes = Handshake::new(PeerId(id)).serialize().unwrap();
            let handshake = Handshake::deserialize(&bytes).unwrap();
            assert_eq!(handshake.peer_id, PeerId(id));
            assert_eq!(handshake.header, PROTOCOL_HEADER);
        }
    }

    #[test]
    fn wrong_size() {
        let bytes = Handshake::new(PeerId(7)).serialize().unwrap();

        let err = Handshake::deserialize(&bytes[..31]).unwrap_err();
        assert!(matches!(err, Error::HandshakeLength(31)));

        let mut long = bytes.to_vec();
        long.push(0);
        let err = Handshake::deserialize(&long).unwrap_err();
        assert!(matches!(err, Error::HandshakeLength(33)));
    }

    #[test]
    fn invalid_header() {
        let mut bytes = Handshake::new(PeerId(7)).serialize().unwrap();
        bytes[0] = b'X';
        let handshake = Handshake::deserialize(&bytes).unwrap();
        assert!(!handshake.validate());

        let mut bytes = Handshake::new(PeerId(7)).serialize().unwrap();
        bytes[20] = 1;
        let handshake = Handshake::deserialize(&bytes).unwrap();
        assert!(!handshake.validate());
    }

    #[test]
    fn codec_keeps_trailing_frames() {
        let mut buf = BytesMut::new();
        HandshakeCodec.encode(Handshake::new(PeerId(5)), &mut buf).unwrap();
        buf.extend_from_slice(&[0, 0, 0, 1, 2]);

        // partial
        let mut partial = BytesMut::from(&buf[..20]);
        assert!(HandshakeCodec.decode(&mut partial).unwrap().is_none());

        let handshake = HandshakeCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(handshake.peer_id, PeerId(5));
        assert_eq!(&buf[..], &[0, 0, 0, 1, 2]);
    }
}
