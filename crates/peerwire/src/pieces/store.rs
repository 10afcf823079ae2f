//! The state behind [`PieceTracker`](super::PieceTracker).
//!
//! Only the tracker task touches a `PieceStore`, so every method here runs
//! to completion without interleaving with other peers. A decision that
//! depends on a read, such as "is this the piece that completes the file",
//! is taken in the same method call that mutates the state.
use std::time::Duration;

use hashbrown::{HashMap, HashSet};
use rand::seq::SliceRandom;
use tokio::time::Instant;

use crate::{
    bitfield::{Bitfield, PieceBitfield},
    peer::PeerId,
};

/// Result of storing a downloaded piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    /// How many pieces the local peer has now.
    pub downloaded: usize,
    pub total: usize,
    /// If the piece was missing before, a piece that arrives twice is only
    /// counted once.
    pub fresh: bool,
    /// If this piece completed the file. Only one call ever sees `true`.
    pub newly_completed: bool,
}

#[derive(Debug)]
pub struct PieceStore {
    /// Pieces of the local peer.
    bitfield: Bitfield,
    data: Vec<Option<Vec<u8>>>,
    downloaded: usize,

    /// Pieces of remote peers, only present after a bitfield or a have.
    peer_pieces: HashMap<PeerId, Bitfield>,

    /// Peers that unchoked us and did not choke us again.
    unchoked: HashSet<PeerId>,

    /// Pieces requested and not yet received: who was asked, and when.
    requested: HashMap<usize, (PeerId, Instant)>,
    request_timeout: Duration,

    /// Time between the last request to a peer and its last piece, in ms.
    rates: HashMap<PeerId, u64>,
}

impl PieceStore {
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

    /// A store that has none of the `total` pieces.
    pub fn new(total: usize) -> Self {
        Self {
            bitfield: Bitfield::from_piece(total),
            data: vec![None; total],
            downloaded: 0,
            peer_pieces: HashMap::new(),
            unchoked: HashSet::new(),
            requested: HashMap::new(),
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
            rates: HashMap::new(),
        }
    }

    /// A store that has all pieces, used to seed a file.
    pub fn seeded(pieces: Vec<Vec<u8>>) -> Self {
        let mut store = Self::new(pieces.len());
        for (index, data) in pieces.into_iter().enumerate() {
            store.report_received(index, data);
        }
        store
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn total(&self) -> usize {
        self.data.len()
    }

    pub fn downloaded(&self) -> usize {
        self.downloaded
    }

    pub fn is_complete(&self) -> bool {
        self.downloaded == self.total()
    }

    pub fn bitfield(&self) -> &Bitfield {
        &self.bitfield
    }

    pub fn have_piece(&self, index: usize) -> bool {
        self.bitfield.get(index).map(|b| *b).unwrap_or(false)
    }

    pub fn piece_data(&self, index: usize) -> Option<Vec<u8>> {
        self.data.get(index).cloned().flatten()
    }

    /// Replace what we know about the pieces of `peer`. Returns true if the
    /// peer has at least one piece that we don't.
    pub fn set_peer_bitfield(&mut self, peer: PeerId, bitfield: Bitfield) -> bool {
        let bitfield = Bitfield::new_and_resize(bitfield.into_vec(), self.total());
        self.peer_pieces.insert(peer, bitfield);
        self.has_interesting_piece(peer)
    }

    /// Mark `index` as available from `peer`. Returns true if we don't have
    /// this piece.
    pub fn peer_have(&mut self, peer: PeerId, index: usize) -> bool {
        if index >= self.total() {
            return false;
        }
        let total = self.total();
        self.peer_pieces
            .entry(peer)
            .or_insert_with(|| Bitfield::from_piece(total))
            .set(index, true);

        !self.have_piece(index)
    }

    pub fn peer_piece_count(&self, peer: PeerId) -> usize {
        self.peer_pieces.get(&peer).map(|b| b.count_ones()).unwrap_or(0)
    }

    pub fn has_interesting_piece(&self, peer: PeerId) -> bool {
        self.peer_pieces
            .get(&peer)
            .is_some_and(|b| b.has_piece_not_in(&self.bitfield))
    }

    /// The peers of `peers` from which there is nothing left to download.
    pub fn uninteresting_peers(&self, peers: &[PeerId]) -> Vec<PeerId> {
        peers
            .iter()
            .filter(|p| !self.has_interesting_piece(**p))
            .copied()
            .collect()
    }

    /// `peer` unchoked us, pieces can be requested from it.
    pub fn peer_unchoked(&mut self, peer: PeerId) {
        self.unchoked.insert(peer);
    }

    pub fn is_unchoked(&self, peer: PeerId) -> bool {
        self.unchoked.contains(&peer)
    }

    /// Pick a random piece that `peer` has, that we don't have, and that is
    /// not being requested from anyone. The piece is marked as requested by
    /// `peer` until it arrives or the request times out.
    ///
    /// A peer that is choking us gets nothing, so it can't hold pieces that
    /// an unchoked peer would send.
    pub fn next_desired_piece(&mut self, peer: PeerId, now: Instant) -> Option<usize> {
        if !self.unchoked.contains(&peer) {
            return None;
        }
        let pieces = self.peer_pieces.get(&peer)?;

        let candidates: Vec<usize> = pieces
            .pieces_not_in(&self.bitfield)
            .into_iter()
            .filter(|i| match self.requested.get(i) {
                Some((_, at)) => now.saturating_duration_since(*at) >= self.request_timeout,
                None => true,
            })
            .collect();

        let piece = *candidates.choose(&mut rand::thread_rng())?;
        self.requested.insert(piece, (peer, now));

        Some(piece)
    }

    /// Store a downloaded piece.
    pub fn report_received(&mut self, index: usize, data: Vec<u8>) -> Received {
        self.requested.remove(&index);

        let fresh = index < self.total() && !self.have_piece(index);
        let mut newly_completed = false;

        if fresh {
            self.data[index] = Some(data);
            self.bitfield.set(index, true);
            self.downloaded += 1;
            newly_completed = self.is_complete();
        }

        Received {
            downloaded: self.downloaded,
            total: self.total(),
            fresh,
            newly_completed,
        }
    }

    pub fn record_rate(&mut self, peer: PeerId, millis: u64) {
        self.rates.insert(peer, millis);
    }

    /// `peer` choked us: forget its rate and free the pieces requested from
    /// it, it won't send them while it chokes us.
    pub fn reset_rate(&mut self, peer: PeerId) {
        self.rates.remove(&peer);
        self.unchoked.remove(&peer);
        self.free_requests(peer);
    }

    pub fn rates(&self) -> &HashMap<PeerId, u64> {
        &self.rates
    }

    pub fn remove_peer(&mut self, peer: PeerId) {
        self.peer_pieces.remove(&peer);
        self.rates.remove(&peer);
        self.unchoked.remove(&peer);
        self.free_requests(peer);
    }

    fn free_requests(&mut self, peer: PeerId) {
        self.requested.retain(|_, (p, _)| *p != peer);
    }
}
