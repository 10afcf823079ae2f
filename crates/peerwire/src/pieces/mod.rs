//! Piece availability shared by all the peer sessions of the node.
//!
//! The [`PieceStore`] is owned by a single [`PieceTracker`] task, peer
//! sessions talk to it with [`TrackerMsg`]s through a [`TrackerHandle`].
//! Messages of one handle are processed in the order they were sent.
pub mod store;

pub use store::{PieceStore, Received};

use hashbrown::HashMap;
use tokio::{
    spawn,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::Instant,
};
use tracing::debug;

use crate::{bitfield::Bitfield, error::Error, peer::PeerId};

#[derive(Debug)]
pub enum TrackerMsg {
    /// Replace the known pieces of a peer, answer if the peer has a piece
    /// that the local peer doesn't.
    SetPeerBitfield(PeerId, Bitfield, oneshot::Sender<bool>),
    /// A peer announced a new piece, answer if the local peer lacks it.
    PeerHave(PeerId, usize, oneshot::Sender<bool>),
    HasInterestingPiece(PeerId, oneshot::Sender<bool>),
    HavePiece(usize, oneshot::Sender<bool>),
    ReadBitfield(oneshot::Sender<Bitfield>),
    /// The peer unchoked us.
    PeerUnchoked(PeerId),
    /// Pick the next piece to request from a peer and mark it as requested.
    NextDesiredPiece(PeerId, oneshot::Sender<Option<usize>>),
    ReadPiece(usize, oneshot::Sender<Option<Vec<u8>>>),
    ReportReceived {
        index: usize,
        data: Vec<u8>,
        recipient: oneshot::Sender<Received>,
    },
    DownloadedCount(oneshot::Sender<usize>),
    PeerPieceCount(PeerId, oneshot::Sender<usize>),
    TotalPieceCount(oneshot::Sender<usize>),
    IsComplete(oneshot::Sender<bool>),
    RecordRate(PeerId, u64),
    /// The peer choked us.
    ResetRate(PeerId),
    DownloadRates(oneshot::Sender<HashMap<PeerId, u64>>),
    /// Filter the given peers, leaving those that have nothing we need.
    UninterestingPeers(Vec<PeerId>, oneshot::Sender<Vec<PeerId>>),
    /// The session of a peer ended.
    RemovePeer(PeerId),
    Quit,
}

/// The task that owns the [`PieceStore`].
#[derive(Debug)]
pub struct PieceTracker {
    store: PieceStore,
    rx: mpsc::Receiver<TrackerMsg>,
}

impl PieceTracker {
    pub fn new(store: PieceStore) -> (Self, TrackerHandle) {
        let (tx, rx) = mpsc::channel::<TrackerMsg>(100);
        (Self { store, rx }, TrackerHandle { tx })
    }

    /// Create the tracker and run it in a new task.
    pub fn spawn(store: PieceStore) -> (TrackerHandle, JoinHandle<PieceStore>) {
        let (mut tracker, handle) = Self::new(store);
        let join = spawn(async move {
            tracker.run().await;
            tracker.store
        });
        (handle, join)
    }

    /// Runs until [`TrackerMsg::Quit`] or until every handle is dropped.
    #[tracing::instrument(skip(self), name = "tracker::run")]
    pub async fn run(&mut self) {
        debug!("tracker started event loop");

        while let Some(msg) = self.rx.recv().await {
            let store = &mut self.store;
            match msg {
                TrackerMsg::SetPeerBitfield(peer, bitfield, recipient) => {
                    let _ = recipient.send(store.set_peer_bitfield(peer, bitfield));
                }
                TrackerMsg::PeerHave(peer, index, recipient) => {
                    let _ = recipient.send(store.peer_have(peer, index));
                }
                TrackerMsg::HasInterestingPiece(peer, recipient) => {
                    let _ = recipient.send(store.has_interesting_piece(peer));
                }
                TrackerMsg::HavePiece(index, recipient) => {
                    let _ = recipient.send(store.have_piece(index));
                }
                TrackerMsg::ReadBitfield(recipient) => {
                    let _ = recipient.send(store.bitfield().clone());
                }
                TrackerMsg::PeerUnchoked(peer) => {
                    store.peer_unchoked(peer);
                }
                TrackerMsg::NextDesiredPiece(peer, recipient) => {
                    let _ = recipient
                        .send(store.next_desired_piece(peer, Instant::now()));
                }
                TrackerMsg::ReadPiece(index, recipient) => {
                    let _ = recipient.send(store.piece_data(index));
                }
                TrackerMsg::ReportReceived { index, data, recipient } => {
                    let received = store.report_received(index, data);
                    debug!(
                        "received piece {index}, {}/{}",
                        received.downloaded, received.total
                    );
                    let _ = recipient.send(received);
                }
                TrackerMsg::DownloadedCount(recipient) => {
                    let _ = recipient.send(store.downloaded());
                }
                TrackerMsg::PeerPieceCount(peer, recipient) => {
                    let _ = recipient.send(store.peer_piece_count(peer));
                }
                TrackerMsg::TotalPieceCount(recipient) => {
                    let _ = recipient.send(store.total());
                }
                TrackerMsg::IsComplete(recipient) => {
                    let _ = recipient.send(store.is_complete());
                }
                TrackerMsg::RecordRate(peer, millis) => {
                    store.record_rate(peer, millis);
                }
                TrackerMsg::ResetRate(peer) => {
                    store.reset_rate(peer);
                }
                TrackerMsg::DownloadRates(recipient) => {
                    let _ = recipient.send(store.rates().clone());
                }
                TrackerMsg::UninterestingPeers(peers, recipient) => {
                    let _ = recipient.send(store.uninteresting_peers(&peers));
                }
                TrackerMsg::RemovePeer(peer) => {
                    debug!("removing peer {peer}");
                    store.remove_peer(peer);
                }
                TrackerMsg::Quit => {
                    debug!("tracker quit");
                    break;
                }
            }
        }
    }
}

/// A cheap, cloneable handle to the [`PieceTracker`] task.
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    tx: mpsc::Sender<TrackerMsg>,
}

impl TrackerHandle {
    async fn send(&self, msg: TrackerMsg) -> Result<(), Error> {
        self.tx.send(msg).await.map_err(|_| Error::TrackerClosed)
    }

    async fn ask<T>(
        &self,
        msg: impl FnOnce(oneshot::Sender<T>) -> TrackerMsg,
    ) -> Result<T, Error> {
        let (otx, orx) = oneshot::channel();
        self.send(msg(otx)).await?;
        orx.await.map_err(|_| Error::TrackerClosed)
    }

    pub async fn set_peer_bitfield(
        &self,
        peer: PeerId,
        bitfield: Bitfield,
    ) -> Result<bool, Error> {
        self.ask(|tx| TrackerMsg::SetPeerBitfield(peer, bitfield, tx)).await
    }

    pub async fn peer_have(&self, peer: PeerId, index: usize) -> Result<bool, Error> {
        self.ask(|tx| TrackerMsg::PeerHave(peer, index, tx)).await
    }

    pub async fn has_interesting_piece(&self, peer: PeerId) -> Result<bool, Error> {
        self.ask(|tx| TrackerMsg::HasInterestingPiece(peer, tx)).await
    }

    pub async fn have_piece(&self, index: usize) -> Result<bool, Error> {
        self.ask(|tx| TrackerMsg::HavePiece(index, tx)).await
    }

    pub async fn bitfield(&self) -> Result<Bitfield, Error> {
        self.ask(TrackerMsg::ReadBitfield).await
    }

    pub async fn peer_unchoked(&self, peer: PeerId) -> Result<(), Error> {
        self.send(TrackerMsg::PeerUnchoked(peer)).await
    }

    /// `None` means there is nothing we want from this peer right now, or
    /// that it is choking us.
    pub async fn next_desired_piece(&self, peer: PeerId) -> Result<Option<usize>, Error> {
        self.ask(|tx| TrackerMsg::NextDesiredPiece(peer, tx)).await
    }

    pub async fn piece_data(&self, index: usize) -> Result<Option<Vec<u8>>, Error> {
        self.ask(|tx| TrackerMsg::ReadPiece(index, tx)).await
    }

    pub async fn report_received(
        &self,
        index: usize,
        data: Vec<u8>,
    ) -> Result<Received, Error> {
        self.ask(|recipient| TrackerMsg::ReportReceived { index, data, recipient })
            .await
    }

    /// How many pieces the local peer has.
    pub async fn downloaded_count(&self) -> Result<usize, Error> {
        self.ask(TrackerMsg::DownloadedCount).await
    }

    /// How many pieces a remote peer is known to have.
    pub async fn peer_piece_count(&self, peer: PeerId) -> Result<usize, Error> {
        self.ask(|tx| TrackerMsg::PeerPieceCount(peer, tx)).await
    }

    pub async fn total_piece_count(&self) -> Result<usize, Error> {
        self.ask(TrackerMsg::TotalPieceCount).await
    }

    pub async fn is_complete(&self) -> Result<bool, Error> {
        self.ask(TrackerMsg::IsComplete).await
    }

    pub async fn record_rate(&self, peer: PeerId, millis: u64) -> Result<(), Error> {
        self.send(TrackerMsg::RecordRate(peer, millis)).await
    }

    pub async fn reset_rate(&self, peer: PeerId) -> Result<(), Error> {
        self.send(TrackerMsg::ResetRate(peer)).await
    }

    pub async fn download_rates(&self) -> Result<HashMap<PeerId, u64>, Error> {
        self.ask(TrackerMsg::DownloadRates).await
    }

    pub async fn uninteresting_peers(
        &self,
        peers: Vec<PeerId>,
    ) -> Result<Vec<PeerId>, Error> {
        self.ask(|tx| TrackerMsg::UninterestingPeers(peers, tx)).await
    }

    pub async fn remove_peer(&self, peer: PeerId) -> Result<(), Error> {
        self.send(TrackerMsg::RemovePeer(peer)).await
    }

    pub async fn quit(&self) -> Result<(), Error> {
        self.send(TrackerMsg::Quit).await
    }
}
