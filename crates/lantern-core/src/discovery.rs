//! Discovery adapter.
//!
//! The LAN responder (DNS-SD or equivalent) is owned by the host shell;
//! the core only consumes its `(peer_id, endpoint)` observations. The
//! adapter is a bounded channel: the host publishes through a
//! [`DiscoveryHandle`], the peer manager consumes the receiver and turns
//! observations into endpoint knowledge and auto-connect attempts.

use crate::identity::PeerId;
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// One observation from the LAN discovery service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A peer was seen (or re-seen) at an endpoint.
    Found {
        /// The advertised peer id.
        peer_id: PeerId,
        /// The advertised endpoint.
        endpoint: SocketAddr,
    },
    /// A previously seen peer stopped advertising.
    Lost {
        /// The peer that disappeared.
        peer_id: PeerId,
    },
}

/// Publishing side handed to the host's discovery service.
#[derive(Clone)]
pub struct DiscoveryHandle {
    tx: mpsc::Sender<DiscoveryEvent>,
}

impl DiscoveryHandle {
    /// Publish a sighting. Awaits if the core is momentarily behind.
    pub async fn found(&self, peer_id: PeerId, endpoint: SocketAddr) {
        let _ = self.tx.send(DiscoveryEvent::Found { peer_id, endpoint }).await;
    }

    /// Publish a disappearance.
    pub async fn lost(&self, peer_id: PeerId) {
        let _ = self.tx.send(DiscoveryEvent::Lost { peer_id }).await;
    }
}

/// Create the bounded observation channel between the host's discovery
/// service and the peer manager.
#[must_use]
pub fn discovery_channel(capacity: usize) -> (DiscoveryHandle, mpsc::Receiver<DiscoveryEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (DiscoveryHandle { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::LocalIdentity;

    #[tokio::test]
    async fn test_observations_flow_through() {
        let (handle, mut rx) = discovery_channel(4);
        let peer = LocalIdentity::generate().unwrap().peer_id();
        let endpoint: SocketAddr = "192.168.1.20:4817".parse().unwrap();

        handle.found(peer, endpoint).await;
        handle.lost(peer).await;

        assert_eq!(
            rx.recv().await,
            Some(DiscoveryEvent::Found {
                peer_id: peer,
                endpoint
            })
        );
        assert_eq!(rx.recv().await, Some(DiscoveryEvent::Lost { peer_id: peer }));
    }
}
