//! Events delivered to the host shell.
//!
//! The core pushes typed events into a bounded queue; the host consumes
//! them on its own schedule, so backpressure is explicit rather than
//! hidden in callback re-entrancy.

use crate::identity::PeerId;
use crate::protocol::Message;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Which side opened a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The peer dialed us.
    Inbound,
    /// We dialed the peer.
    Outbound,
}

/// Observable state changes.
#[derive(Debug, Clone)]
pub enum Event {
    /// A discovery observation named a peer and endpoint.
    PeerDiscovered {
        /// The discovered peer.
        peer_id: PeerId,
        /// Where it can be reached.
        endpoint: SocketAddr,
    },

    /// A session was established and authenticated.
    PeerConnected {
        /// The authenticated peer.
        peer_id: PeerId,
        /// Who opened the connection.
        direction: Direction,
        /// Remote socket address.
        endpoint: SocketAddr,
    },

    /// A session ended.
    PeerDisconnected {
        /// The peer whose session ended.
        peer_id: PeerId,
        /// Failure reason, absent for clean disconnects.
        reason: Option<String>,
    },

    /// An outbound connection attempt failed terminally.
    PeerConnectionFailed {
        /// The endpoint we dialed.
        endpoint: SocketAddr,
        /// The peer, when the attempt was peer-addressed.
        peer_id: Option<PeerId>,
        /// Human-readable reason derived from the error taxonomy.
        reason: String,
    },

    /// A typed message arrived that the host may care about (announces,
    /// clipboard content, pongs for latency tracking).
    MessageReceived {
        /// The sending peer.
        peer_id: PeerId,
        /// The decoded message.
        message: Message,
    },

    /// Bytes moved for an active transfer.
    TransferProgress {
        /// The transfer.
        transfer_id: String,
        /// Bytes acknowledged (sender) or durably written (receiver).
        bytes_transferred: u64,
        /// Declared file size.
        total_bytes: u64,
    },

    /// A transfer finished, successfully or not.
    TransferCompleted {
        /// The transfer.
        transfer_id: String,
        /// Whether the file was verified and placed.
        success: bool,
        /// Final inbox path on success (receiver side).
        path: Option<PathBuf>,
        /// Failure reason otherwise.
        reason: Option<String>,
    },
}
