//! Protocol events of the local peer.
//!
//! Events are write-only: they are logged under the `peerwire::events`
//! target and, if someone subscribed with [`EventLog::new`], forwarded through
//! an unbounded channel. Emitting never blocks and never fails, a subscriber
//! that went away is simply ignored.
use std::fmt::Display;

use tokio::sync::mpsc;
use tracing::info;

use crate::peer::PeerId;

/// The channel on which events are posted to the subscriber.
pub type EventSender = mpsc::UnboundedSender<Event>;
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    HandshakeReceived { peer: PeerId },
    Choked { peer: PeerId },
    Unchoked { peer: PeerId },
    Interested { peer: PeerId },
    NotInterested { peer: PeerId },
    Have { peer: PeerId, piece: usize },
    /// `downloaded` is the number of pieces the local peer has now.
    PieceDownloaded { peer: PeerId, piece: usize, downloaded: usize },
    DownloadComplete,
}

impl Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::HandshakeReceived { peer } => {
                write!(f, "received the handshake of peer {peer}")
            }
            Event::Choked { peer } => write!(f, "is choked by {peer}"),
            Event::Unchoked { peer } => write!(f, "is unchoked by {peer}"),
            Event::Interested { peer } => {
                write!(f, "received the 'interested' message from {peer}")
            }
            Event::NotInterested { peer } => {
                write!(f, "received the 'not interested' message from {peer}")
            }
            Event::Have { peer, piece } => write!(
                f,
                "received the 'have' message from {peer} for the piece {piece}"
            ),
            Event::PieceDownloaded { peer, piece, downloaded } => write!(
                f,
                "has downloaded the piece {piece} from {peer}, now the \
                 number of pieces it has is {downloaded}"
            ),
            Event::DownloadComplete => {
                write!(f, "has downloaded the complete file")
            }
        }
    }
}

/// Event log of one local peer, cheap to clone.
#[derive(Debug, Clone)]
pub struct EventLog {
    local: PeerId,
    tx: Option<EventSender>,
}

impl EventLog {
    /// An event log with a subscriber.
    pub fn new(local: PeerId) -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { local, tx: Some(tx) }, rx)
    }

    /// An event log that only writes to tracing.
    pub fn detached(local: PeerId) -> Self {
        Self { local, tx: None }
    }

    pub fn emit(&self, event: Event) {
        info!(target: "peerwire::events", "Peer {} {event}", self.local);

        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let event = Event::Have { peer: PeerId(1002), piece: 7 };
        assert_eq!(
            event.to_string(),
            "received the 'have' message from 1002 for the piece 7"
        );
    }

    #[test]
    fn forwards_to_subscriber() {
        let (log, mut rx) = EventLog::new(PeerId(1001));
        log.emit(Event::DownloadComplete);
        assert_eq!(rx.try_recv().unwrap(), Event::DownloadComplete);

        // emitting without a subscriber is fine
        drop(rx);
        log.emit(Event::DownloadComplete);
        EventLog::detached(PeerId(1)).emit(Event::DownloadComplete);
    }
}
