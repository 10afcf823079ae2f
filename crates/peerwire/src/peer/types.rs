use std::{
    fmt::Display,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::stream::SplitStream;
use speedy::{Readable, Writable};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
    task::JoinHandle,
    time::Instant,
};
use tokio_util::codec::Framed;

use crate::{
    error::Error,
    peer::session::Session,
    swarm::NodeCtx,
    tcp_wire::{Message, MessageCodec},
};

/// Identifier of a peer, sent as 4 big-endian bytes in the handshake.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    PartialOrd,
    Ord,
    Debug,
    Readable,
    Writable,
)]
pub struct PeerId(pub u32);

impl Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PeerId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// A bidirectional byte stream to a remote peer, a `TcpStream` or an
/// in-memory pipe.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

pub type BoxedTransport = Box<dyn Transport>;

/// Ctx that is shared with the Swarm and the request scheduler.
#[derive(Debug)]
pub struct PeerCtx {
    pub id: PeerId,

    /// Outgoing queue, drained by the writer task of the session.
    pub tx: mpsc::Sender<Message>,

    /// The remote peer is choking the client.
    pub am_choked: AtomicBool,

    /// Set on the first unchoke, the scheduler runs at most once.
    pub scheduler_started: AtomicBool,

    pub connected_time: Instant,

    /// Milliseconds between `connected_time` and the last request sent,
    /// `u64::MAX` when nothing was requested yet.
    last_request_ms: AtomicU64,

    closed: AtomicBool,
}

impl PeerCtx {
    pub fn new(id: PeerId, tx: mpsc::Sender<Message>) -> Self {
        Self {
            id,
            tx,
            am_choked: AtomicBool::new(true),
            scheduler_started: AtomicBool::new(false),
            connected_time: Instant::now(),
            last_request_ms: AtomicU64::new(u64::MAX),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue a message to this peer, the writer task sends frames one at
    /// a time and in order.
    pub async fn send(&self, msg: Message) -> Result<(), Error> {
        self.tx.send(msg).await?;
        Ok(())
    }

    pub fn mark_request_sent(&self) {
        let ms = self.connected_time.elapsed().as_millis() as u64;
        self.last_request_ms.store(ms, Ordering::Release);
    }

    /// Time since the last request sent to this peer.
    pub fn since_last_request(&self) -> Option<Duration> {
        let ms = self.last_request_ms.load(Ordering::Acquire);
        if ms == u64::MAX {
            return None;
        }
        let sent_at = self.connected_time + Duration::from_millis(ms);
        Some(Instant::now().saturating_duration_since(sent_at))
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// The session ended or its writer is gone.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }
}

/// A peer can be: Idle or Connected.
pub trait PeerState {}

/// A transport that didn't handshake yet.
pub struct Idle {
    pub(crate) transport: BoxedTransport,
    pub(crate) node: Arc<NodeCtx>,
}

/// The handshake is done and messages are flowing.
pub struct Connected {
    /// Context of the Peer which is shared for anyone who needs it.
    pub ctx: Arc<PeerCtx>,
    pub node: Arc<NodeCtx>,
    pub stream: SplitStream<Framed<BoxedTransport, MessageCodec>>,
    pub session: Session,

    /// Drains [`PeerCtx::tx`] into the socket.
    pub writer: JoinHandle<Result<(), Error>>,

    pub scheduler: Option<JoinHandle<Result<(), Error>>>,

    /// Cache of the total piece count of the tracker, it never changes.
    pub total_pieces: usize,
}

impl PeerState for Idle {}
impl PeerState for Connected {}
