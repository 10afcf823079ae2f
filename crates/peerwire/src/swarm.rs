//! Registry of the connected peers of a node.
//!
//! The swarm only keeps track of who is connected and who declared
//! interest, choke decisions are taken outside of this crate by reading
//! [`Swarm::interested_peers`] and [`TrackerHandle::download_rates`].
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use tokio::sync::{mpsc::error::TrySendError, RwLock};
use tracing::{debug, warn};

use crate::{
    config::Config,
    error::Error,
    events::EventLog,
    peer::{PeerCtx, PeerId},
    pieces::TrackerHandle,
    tcp_wire::Message,
};

/// Everything a session of the node needs, handed to each peer on
/// construction.
#[derive(Debug)]
pub struct NodeCtx {
    pub local_id: PeerId,
    pub tracker: TrackerHandle,
    pub swarm: Swarm,
    pub events: EventLog,
    pub config: Config,
}

impl NodeCtx {
    pub fn new(
        local_id: PeerId,
        tracker: TrackerHandle,
        events: EventLog,
        config: Config,
    ) -> Arc<Self> {
        Arc::new(Self {
            local_id,
            swarm: Swarm::new(tracker.clone()),
            tracker,
            events,
            config,
        })
    }
}

#[derive(Debug)]
pub struct Swarm {
    peers: RwLock<HashMap<PeerId, Arc<PeerCtx>>>,
    interested: RwLock<HashSet<PeerId>>,
    tracker: TrackerHandle,
}

impl Swarm {
    pub fn new(tracker: TrackerHandle) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            interested: RwLock::new(HashSet::new()),
            tracker,
        }
    }

    pub async fn register_connection(&self, ctx: Arc<PeerCtx>) {
        debug!("registering peer {}", ctx.id);
        if self.peers.write().await.insert(ctx.id, ctx).is_some() {
            warn!("a session with the same peer id was replaced");
        }
    }

    /// Remove the session of `ctx`, a newer session of the same peer id is
    /// left untouched.
    pub async fn unregister(&self, ctx: &Arc<PeerCtx>) {
        let mut peers = self.peers.write().await;
        let is_current = peers.get(&ctx.id).is_some_and(|c| Arc::ptr_eq(c, ctx));
        if !is_current {
            return;
        }
        peers.remove(&ctx.id);
        drop(peers);

        self.interested.write().await.remove(&ctx.id);
        debug!("unregistered peer {}", ctx.id);
    }

    pub async fn report_interested(&self, peer: PeerId) {
        self.interested.write().await.insert(peer);
    }

    pub async fn report_not_interested(&self, peer: PeerId) {
        self.interested.write().await.remove(&peer);
    }

    /// Peers that told us they want some of our pieces.
    pub async fn interested_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> =
            self.interested.read().await.iter().copied().collect();
        peers.sort();
        peers
    }

    pub async fn all_known_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> =
            self.peers.read().await.keys().copied().collect();
        peers.sort();
        peers
    }

    pub async fn get(&self, peer: PeerId) -> Option<Arc<PeerCtx>> {
        self.peers.read().await.get(&peer).cloned()
    }

    /// Queue `msg` to each of `peers` that is connected. A peer whose
    /// session is closing is skipped, and so is a peer whose outgoing queue
    /// is full: a slow reader must not stall the session that broadcasts.
    pub async fn broadcast(&self, peers: &[PeerId], msg: Message) {
        let targets: Vec<Arc<PeerCtx>> = {
            let registry = self.peers.read().await;
            peers.iter().filter_map(|p| registry.get(p).cloned()).collect()
        };

        for ctx in targets {
            if ctx.is_closed() {
                continue;
            }
            match ctx.tx.try_send(msg.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(msg)) => {
                    warn!("outgoing queue of {} is full, dropping {msg:?}", ctx.id);
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }

    pub async fn broadcast_all(&self, msg: Message) {
        let peers = self.all_known_peers().await;
        self.broadcast(&peers, msg).await;
    }

    /// Connected peers that have nothing we still need.
    pub async fn waste_peers(&self) -> Result<Vec<PeerId>, Error> {
        let peers = self.all_known_peers().await;
        self.tracker.uninteresting_peers(peers).await
    }
}
