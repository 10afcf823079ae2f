//! A remote peer in the network that downloads and uploads pieces
pub mod scheduler;
pub mod session;
mod types;

// re-exports
pub use types::*;

use std::sync::{atomic::Ordering, Arc};

use futures::StreamExt;
use tokio::{select, time::timeout};
use tracing::{debug, warn};

use crate::{
    error::Error,
    events::Event,
    peer::{scheduler::RequestScheduler, session::ConnectionState},
    tcp_wire::Message,
};

/// A peer session, `S` is the stage of the connection.
pub struct Peer<S: PeerState> {
    pub state: S,
}

impl Peer<Connected> {
    pub fn id(&self) -> PeerId {
        self.state.ctx.id
    }

    pub fn ctx(&self) -> Arc<PeerCtx> {
        self.state.ctx.clone()
    }

    /// Run the session until the peer disconnects or misbehaves. The returned
    /// error, if any, only concerns this session.
    #[tracing::instrument(skip(self), name = "peer::run", fields(remote = %self.state.ctx.id))]
    pub async fn run(mut self) -> Result<(), Error> {
        let r = self.exchange().await;

        match &r {
            Err(Error::PeerClosedSocket) => debug!("peer closed the socket"),
            Err(e) => warn!("closing session: {e}"),
            Ok(_) => {}
        }

        self.teardown().await;
        r
    }

    async fn exchange(&mut self) -> Result<(), Error> {
        let ctx = self.state.ctx.clone();
        let node = self.state.node.clone();

        node.swarm.register_connection(ctx.clone()).await;
        self.state.session.connection = ConnectionState::Exchanging;

        let bitfield = node.tracker.bitfield().await?;
        if bitfield.any() {
            debug!("> bitfield");
            ctx.send(Message::Bitfield(bitfield)).await?;
        }

        let read_timeout = node.config.read_timeout();

        loop {
            select! {
                // the writer only stops on its own when the socket fails.
                r = &mut self.state.writer => {
                    return match r {
                        Ok(Err(e)) => Err(e),
                        _ => Err(Error::PeerClosedSocket),
                    };
                }
                msg = timeout(read_timeout, self.state.stream.next()) => {
                    let msg = match msg {
                        Err(_) => return Err(Error::MessageTimeout),
                        Ok(None) => return Err(Error::PeerClosedSocket),
                        Ok(Some(msg)) => msg?,
                    };
                    self.handle_message(msg).await?;
                }
            }
        }
    }

    async fn handle_message(&mut self, msg: Message) -> Result<(), Error> {
        let ctx = self.state.ctx.clone();
        let node = self.state.node.clone();
        let remote = ctx.id;

        match msg {
            Message::Choke => {
                debug!("{remote} < choke");
                ctx.am_choked.store(true, Ordering::Release);
                node.tracker.reset_rate(remote).await?;
                node.events.emit(Event::Choked { peer: remote });
            }
            Message::Unchoke => {
                debug!("{remote} < unchoke");
                ctx.am_choked.store(false, Ordering::Release);
                node.tracker.peer_unchoked(remote).await?;
                node.events.emit(Event::Unchoked { peer: remote });

                if !ctx.scheduler_started.swap(true, Ordering::AcqRel) {
                    debug!("starting request scheduler");
                    let scheduler = RequestScheduler::new(ctx.clone(), node.clone());
                    self.state.scheduler = Some(scheduler.spawn());
                }
            }
            Message::Interested => {
                debug!("{remote} < interested");
                node.swarm.report_interested(remote).await;
                node.events.emit(Event::Interested { peer: remote });
            }
            Message::NotInterested => {
                debug!("{remote} < not_interested");
                node.swarm.report_not_interested(remote).await;
                node.events.emit(Event::NotInterested { peer: remote });
            }
            Message::Have(index) => {
                debug!("{remote} < have {index}");
                self.check_index(index)?;
                node.events.emit(Event::Have { peer: remote, piece: index });

                if node.tracker.peer_have(remote, index).await? {
                    node.swarm.report_interested(remote).await;
                    debug!("> interested");
                    ctx.send(Message::Interested).await?;
                }
            }
            Message::Bitfield(bitfield) => {
                debug!("{remote} < bitfield");

                if node.tracker.set_peer_bitfield(remote, bitfield).await? {
                    debug!("> interested");
                    ctx.send(Message::Interested).await?;
                } else {
                    debug!("> not_interested");
                    ctx.send(Message::NotInterested).await?;
                }
            }
            Message::Request(index) => {
                debug!("{remote} < request {index}");
                self.check_index(index)?;

                let Some(data) = node.tracker.piece_data(index).await? else {
                    return Err(Error::MissingPiece { peer: remote, index });
                };

                debug!("> piece {index}");
                ctx.send(Message::Piece { index, data }).await?;
                self.state.session.record_outgoing_piece();
            }
            Message::Piece { index, data } => {
                debug!("{remote} < piece {index}");
                self.check_index(index)?;
                self.state.session.record_incoming_piece();

                if let Some(elapsed) = ctx.since_last_request() {
                    node.tracker
                        .record_rate(remote, elapsed.as_millis() as u64)
                        .await?;
                }

                let received = node.tracker.report_received(index, data).await?;

                if received.fresh {
                    node.events.emit(Event::PieceDownloaded {
                        peer: remote,
                        piece: index,
                        downloaded: received.downloaded,
                    });
                }

                if received.newly_completed {
                    node.events.emit(Event::DownloadComplete);
                    node.swarm.broadcast_all(Message::NotInterested).await;
                }

                if !ctx.am_choked.load(Ordering::Acquire) {
                    if let Some(next) = node.tracker.next_desired_piece(remote).await? {
                        debug!("> request {next}");
                        ctx.mark_request_sent();
                        ctx.send(Message::Request(next)).await?;
                    }
                }

                if received.fresh {
                    node.swarm.broadcast_all(Message::Have(index)).await;
                }

                // after completion every peer already got a not interested
                if !received.newly_completed {
                    let waste = node.swarm.waste_peers().await?;
                    node.swarm.broadcast(&waste, Message::NotInterested).await;
                }
            }
        }

        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<(), Error> {
        let total = self.state.total_pieces;
        if index >= total {
            return Err(Error::InvalidPieceIndex { index, total });
        }
        Ok(())
    }

    /// Stop the tasks of this session and forget the peer.
    async fn teardown(&mut self) {
        let ctx = self.state.ctx.clone();
        let node = self.state.node.clone();

        self.state.session.connection = ConnectionState::Closed;
        ctx.close();

        if let Some(scheduler) = self.state.scheduler.take() {
            scheduler.abort();
        }
        self.state.writer.abort();

        node.swarm.unregister(&ctx).await;
        let _ = node.tracker.remove_peer(ctx.id).await;

        let session = &self.state.session;
        debug!(
            "session closed after {:?}, {} pieces downloaded, {} uploaded",
            session.connected_time.elapsed(),
            session.downloaded_pieces,
            session.uploaded_pieces,
        );
    }
}
