//! The peer wire of a peer-to-peer file distribution node.
//!
//! For every connection to a remote peer this crate exchanges handshakes,
//! decodes the framed messages of the protocol and reacts to them: it keeps
//! track of the choke and interest state, serves the pieces that the peer
//! requests and requests the pieces that the node is missing.
//!
//! All the sessions of a node share a [`NodeCtx`](swarm::NodeCtx): the
//! [`PieceTracker`](pieces::PieceTracker) task that owns the pieces, the
//! [`Swarm`](swarm::Swarm) registry of connected peers, the
//! [`EventLog`](events::EventLog) and the [`Config`](config::Config).
//!
//! # Example
//!
//! ```no_run
//! use peerwire::{
//!     config::Config, events::EventLog, handshake_peer::PeerBuilder,
//!     peer::PeerId, pieces::{PieceStore, PieceTracker}, swarm::NodeCtx,
//! };
//! use tokio::net::TcpStream;
//!
//! # async fn f() -> Result<(), peerwire::error::Error> {
//! let local = PeerId(1001);
//! let config = Config::load("peerwire.toml").await?;
//! let store = PieceStore::new(10).with_request_timeout(config.request_timeout());
//! let (tracker, _) = PieceTracker::spawn(store);
//! let (events, _rx) = EventLog::new(local);
//! let node = NodeCtx::new(local, tracker, events, config);
//!
//! let socket = TcpStream::connect("127.0.0.1:6008").await?;
//! PeerBuilder::new().transport(socket).node(node).build()?.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod bitfield;
pub mod config;
pub mod error;
pub mod events;
pub mod handshake_peer;
pub mod peer;
pub mod pieces;
pub mod swarm;
pub mod tcp_wire;
