//! Module to share types for integration tests.
//!
//! A test runs a real node (tracker, swarm, event log) and connects fake
//! remote peers to it over in-memory pipes. The remote side speaks the wire
//! protocol with the same codecs that the node uses, so each test reads like
//! a conversation between the remote and the node.
#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use peerwire::{
    bitfield::{Bitfield, PieceBitfield},
    config::Config,
    error::Error,
    events::{Event, EventLog, EventReceiver},
    handshake_peer::PeerBuilder,
    peer::PeerId,
    pieces::{PieceStore, PieceTracker, TrackerHandle},
    swarm::NodeCtx,
    tcp_wire::{Handshake, HandshakeCodec, Message, MessageCodec},
};
use tokio::{
    io::{duplex, AsyncWriteExt, DuplexStream},
    spawn,
    task::JoinHandle,
    time::{sleep, timeout, Instant},
};
use tokio_util::codec::{Framed, FramedParts};

pub const LOCAL_ID: PeerId = PeerId(1001);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The node under test.
pub struct Node {
    pub ctx: Arc<NodeCtx>,
    pub tracker: TrackerHandle,
    pub events: EventReceiver,
}

impl Node {
    pub fn new(store: PieceStore) -> Self {
        Self::with_config(store, Config { request_interval_ms: 5, ..Default::default() })
    }

    pub fn with_config(store: PieceStore, config: Config) -> Self {
        init_tracing();
        let store = store.with_request_timeout(config.request_timeout());
        let (tracker, _) = PieceTracker::spawn(store);
        let (events, rx) = EventLog::new(LOCAL_ID);
        let ctx = NodeCtx::new(LOCAL_ID, tracker.clone(), events, config);
        Self { ctx, tracker, events: rx }
    }

    /// Every event emitted so far.
    pub fn events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Start a session on the node for a new pipe, without handshaking on the
    /// remote side.
    pub fn accept(&self) -> (DuplexStream, JoinHandle<Result<(), Error>>) {
        let (local, remote) = duplex(64 * 1024);
        let node = self.ctx.clone();
        let session = spawn(async move {
            PeerBuilder::new().transport(local).node(node).build()?.start().await
        });
        (remote, session)
    }

    /// Connect a remote peer that completed the handshake.
    pub async fn connect(
        &self,
        id: u32,
    ) -> Result<(Remote, JoinHandle<Result<(), Error>>), Error> {
        let (pipe, session) = self.accept();
        let remote = Remote::handshake(pipe, PeerId(id)).await?;
        Ok((remote, session))
    }
}

/// The remote end of a session.
pub struct Remote {
    pub id: PeerId,
    pub socket: Framed<DuplexStream, MessageCodec>,
}

impl Remote {
    pub async fn handshake(pipe: DuplexStream, id: PeerId) -> Result<Self, Error> {
        let mut socket = Framed::new(pipe, HandshakeCodec);
        socket.send(Handshake::new(id)).await?;

        let theirs = socket.next().await.ok_or(Error::PeerClosedSocket)??;
        assert_eq!(theirs.peer_id, LOCAL_ID);
        assert!(theirs.validate());

        let old_parts = socket.into_parts();
        let mut new_parts = FramedParts::new(old_parts.io, MessageCodec::default());
        new_parts.read_buf = old_parts.read_buf;
        new_parts.write_buf = old_parts.write_buf;

        Ok(Self { id, socket: Framed::from_parts(new_parts) })
    }

    pub async fn send(&mut self, msg: Message) -> Result<(), Error> {
        self.socket.send(msg).await
    }

    /// Write bytes as they are, bypassing the codec.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.socket.get_mut().write_all(bytes).await?;
        Ok(())
    }

    /// The next message of the node.
    pub async fn recv(&mut self) -> Result<Message, Error> {
        timeout(Duration::from_secs(2), self.socket.next())
            .await
            .map_err(|_| Error::MessageTimeout)?
            .ok_or(Error::PeerClosedSocket)?
    }

    /// Receive messages up to, and including, the first one that matches.
    pub async fn recv_until(
        &mut self,
        f: impl Fn(&Message) -> bool,
    ) -> Result<Vec<Message>, Error> {
        let mut msgs = Vec::new();
        loop {
            let msg = self.recv().await?;
            let done = f(&msg);
            msgs.push(msg);
            if done {
                return Ok(msgs);
            }
        }
    }

    /// Every message that arrives during `window`.
    pub async fn drain(&mut self, window: Duration) -> Vec<Message> {
        let deadline = Instant::now() + window;
        let mut msgs = Vec::new();
        while let Ok(Some(Ok(msg))) =
            timeout(deadline.saturating_duration_since(Instant::now()), self.socket.next())
                .await
        {
            msgs.push(msg);
        }
        msgs
    }
}

pub fn bitfield(total: usize, pieces: &[usize]) -> Bitfield {
    let mut bitfield = Bitfield::from_piece(total);
    for piece in pieces {
        bitfield.set(*piece, true);
    }
    bitfield
}

/// A store of `total` pieces that has the pieces of `have`.
pub fn store_with(total: usize, have: &[usize]) -> PieceStore {
    let mut store = PieceStore::new(total);
    for piece in have {
        store.report_received(*piece, piece_data(*piece));
    }
    store
}

pub fn piece_data(index: usize) -> Vec<u8> {
    vec![index as u8; 8]
}

/// Wait until the node registered the session of `peer`.
pub async fn wait_registered(node: &Node, peer: PeerId) {
    for _ in 0..200 {
        if node.ctx.swarm.get(peer).await.is_some() {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("peer {peer} was never registered");
}
