use tokio::time::Instant;

/// The lifecycle of a connection. A session only moves forward, the
/// handshake is never renegotiated.
#[derive(Clone, Default, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// The transport is up, nothing was sent yet.
    #[default]
    Connecting,

    /// Our handshake was sent, waiting for the handshake of the peer.
    HandshakePending,

    /// Handshakes were exchanged, framed messages are flowing.
    Exchanging,

    /// The transport closed or the peer misbehaved.
    Closed,
}

/// Holds and provides facilities to modify the state of a peer session.
#[derive(Debug)]
pub struct Session {
    /// The current state of the connection.
    pub connection: ConnectionState,

    /// When the transport was handed to the session.
    pub connected_time: Instant,

    /// Pieces received from the peer, duplicates included.
    pub downloaded_pieces: u64,

    /// Pieces sent to the peer.
    pub uploaded_pieces: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            connection: ConnectionState::default(),
            connected_time: Instant::now(),
            downloaded_pieces: 0,
            uploaded_pieces: 0,
        }
    }
}

impl Session {
    pub fn record_incoming_piece(&mut self) {
        self.downloaded_pieces += 1;
    }

    pub fn record_outgoing_piece(&mut self) {
        self.uploaded_pieces += 1;
    }
}
