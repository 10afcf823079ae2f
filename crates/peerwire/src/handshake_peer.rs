use std::sync::Arc;

use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::{spawn, sync::mpsc, time::timeout};
use tokio_util::codec::{Framed, FramedParts};
use tracing::{debug, warn};

use crate::{
    error::Error,
    events::Event,
    peer::{
        session::{ConnectionState, Session},
        BoxedTransport, Connected, Idle, Peer, PeerCtx, PeerId, Transport,
    },
    swarm::NodeCtx,
    tcp_wire::{Handshake, HandshakeCodec, Message, MessageCodec},
};

/// The requirements to begin a handshake with a peer
#[derive(Default)]
pub struct PeerBuilder {
    transport: Option<BoxedTransport>,
    node: Option<Arc<NodeCtx>>,
}

impl PeerBuilder {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn transport(mut self, v: impl Transport) -> Self {
        self.transport = Some(Box::new(v));
        self
    }
    pub fn node(mut self, v: Arc<NodeCtx>) -> Self {
        self.node = Some(v);
        self
    }
    pub fn build(self) -> Result<Peer<Idle>, Error> {
        let transport = self.transport.ok_or(Error::PeerBuilder("transport"))?;
        let node = self.node.ok_or(Error::PeerBuilder("node"))?;
        Ok(Peer::new(transport, node))
    }
}

impl Peer<Idle> {
    pub fn new(transport: BoxedTransport, node: Arc<NodeCtx>) -> Self {
        Self { state: Idle { transport, node } }
    }

    /// Exchange handshakes and run the session until it closes.
    pub async fn start(self) -> Result<(), Error> {
        self.handshake().await?.run().await
    }

    /// Send our handshake, wait for the handshake of the peer and switch the
    /// transport to framed messages.
    #[tracing::instrument(skip(self), name = "peer::handshake")]
    pub async fn handshake(self) -> Result<Peer<Connected>, Error> {
        let Idle { transport, node } = self.state;
        let mut session = Session::default();

        let mut socket = Framed::new(transport, HandshakeCodec);

        // we don't wait for the peer, both sides send their handshake as soon
        // as the connection is up.
        debug!("> handshake");
        socket.send(Handshake::new(node.local_id)).await?;
        session.connection = ConnectionState::HandshakePending;

        let their_handshake =
            match timeout(node.config.handshake_timeout(), socket.next()).await {
                Err(_) => return Err(Error::HandshakeTimeout),
                Ok(None) => return Err(Error::PeerClosedSocket),
                Ok(Some(handshake)) => handshake?,
            };

        if !their_handshake.validate() {
            return Err(Error::HandshakeInvalid);
        }

        let remote = their_handshake.peer_id;
        debug!("{remote} < handshake");
        if remote == node.local_id {
            warn!("{remote} is using our own peer id");
        }
        node.events.emit(Event::HandshakeReceived { peer: remote });

        // the peer may have sent messages right after the handshake, they are
        // in the read buffer and must not be lost.
        let old_parts = socket.into_parts();
        let mut new_parts = FramedParts::new(
            old_parts.io,
            MessageCodec::new(node.config.max_message_size),
        );
        new_parts.read_buf = old_parts.read_buf;
        new_parts.write_buf = old_parts.write_buf;
        let socket = Framed::from_parts(new_parts);

        let (sink, stream) = socket.split();
        let (tx, rx) = mpsc::channel(node.config.outgoing_queue_len);
        let writer = spawn(write_loop(sink, rx, remote));

        let ctx = Arc::new(PeerCtx::new(remote, tx));
        let total_pieces = node.tracker.total_piece_count().await?;

        Ok(Peer {
            state: Connected {
                ctx,
                node,
                stream,
                session,
                writer,
                scheduler: None,
                total_pieces,
            },
        })
    }
}

/// Owns the sink of a session, every outgoing frame goes through here and
/// is written whole before the next one.
async fn write_loop(
    mut sink: SplitSink<Framed<BoxedTransport, MessageCodec>, Message>,
    mut rx: mpsc::Receiver<Message>,
    remote: PeerId,
) -> Result<(), Error> {
    while let Some(msg) = rx.recv().await {
        debug!("{remote} > {:?}", msg.id());
        sink.send(msg).await?;
    }
    Ok(())
}
