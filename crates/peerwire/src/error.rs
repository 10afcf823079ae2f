use std::io;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::{peer::PeerId, tcp_wire::Message};

impl From<toml::de::Error> for Error {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigError(value.to_string())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error")]
    IO(#[from] io::Error),

    #[error("Error when serializing/deserializing")]
    SpeedyError(#[from] speedy::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("A handshake must have exactly 32 bytes, but got {0}")]
    HandshakeLength(usize),

    #[error("The handshake received is not valid")]
    HandshakeInvalid,

    #[error("The peer took to long to send the handshake")]
    HandshakeTimeout,

    #[error("The peer sent a second handshake after the exchange")]
    DuplicateHandshake,

    #[error("Message length {len} is outside of the allowed 1..={max}")]
    MessageLength { len: usize, max: usize },

    #[error("Message `{id:?}` cannot have a length of {len}")]
    PayloadLength { id: crate::tcp_wire::MessageId, len: usize },

    #[error("Unsupported message kind {0}")]
    UnsupportedMessageKind(u8),

    #[error("Piece index {0} does not fit in the 4 bytes of the wire")]
    PieceIndexOverflow(usize),

    #[error("The message took to long to arrive")]
    MessageTimeout,

    #[error("The peer closed the socket")]
    PeerClosedSocket,

    #[error("Piece index {index} is out of range for {total} pieces")]
    InvalidPieceIndex { index: usize, total: usize },

    #[error("Peer {peer} requested piece {index} which we do not have")]
    MissingPiece { peer: PeerId, index: usize },

    #[error("The piece tracker is no longer running")]
    TrackerClosed,

    #[error("Could not receive message from oneshot")]
    ReceiveErrorOneshot(#[from] oneshot::error::RecvError),

    #[error("Could not send message to Peer")]
    SendErrorPeer(#[from] mpsc::error::SendError<Message>),

    #[error("Missing `{0}` to build the peer")]
    PeerBuilder(&'static str),
}

impl Error {
    /// Malformed length, type or payload of a frame.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            Error::HandshakeLength(_)
                | Error::MessageLength { .. }
                | Error::PayloadLength { .. }
                | Error::PieceIndexOverflow(_)
        )
    }
}
