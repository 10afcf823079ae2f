//! The loop that keeps a peer busy with requests.
//!
//! Started on the first unchoke of a session and running next to its
//! receive loop. It asks the tracker for a piece that the peer has and that
//! nobody is downloading yet, and queues a request for it. The tracker knows
//! which peers are choking us and gives them nothing, so the loop keeps
//! ticking through a choke without reserving pieces.
use std::sync::Arc;

use tokio::{spawn, task::JoinHandle, time::sleep};
use tracing::{debug, warn};

use crate::{error::Error, peer::PeerCtx, swarm::NodeCtx, tcp_wire::Message};

pub struct RequestScheduler {
    ctx: Arc<PeerCtx>,
    node: Arc<NodeCtx>,
}

impl RequestScheduler {
    pub fn new(ctx: Arc<PeerCtx>, node: Arc<NodeCtx>) -> Self {
        Self { ctx, node }
    }

    /// Run in a new task, an error that stops the loop is logged.
    pub fn spawn(self) -> JoinHandle<Result<(), Error>> {
        spawn(async move {
            let r = self.run().await;
            if let Err(e) = &r {
                warn!("request scheduler stopped: {e}");
            }
            r
        })
    }

    /// Runs until the node has every piece or the session is closed.
    #[tracing::instrument(skip(self), name = "scheduler::run", fields(peer = %self.ctx.id))]
    pub async fn run(self) -> Result<(), Error> {
        let interval = self.node.config.request_interval();

        loop {
            if self.ctx.is_closed() {
                debug!("session closed, stopping");
                break;
            }
            if self.node.tracker.is_complete().await? {
                debug!("download complete, stopping");
                break;
            }

            if let Some(index) =
                self.node.tracker.next_desired_piece(self.ctx.id).await?
            {
                debug!("> request {index}");
                self.ctx.mark_request_sent();
                self.ctx.send(Message::Request(index)).await?;
            }

            sleep(interval).await;
        }

        Ok(())
    }
}
