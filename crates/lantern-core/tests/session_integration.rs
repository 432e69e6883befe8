//! Two real nodes over loopback TCP: connection lifecycle, ping/pong, and
//! the simultaneous-open tie-break.

use lantern_core::{Config, Event, LocalIdentity, Message, PeerManager};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;
use tokio::time::timeout;

fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::new(dir.to_path_buf());
    config.keepalive_interval = None;
    config
}

async fn start_node(dir: &std::path::Path) -> (PeerManager, Receiver<Event>, SocketAddr) {
    let identity = LocalIdentity::generate().unwrap();
    let (manager, events) = PeerManager::new(identity, test_config(dir));
    let port = manager.start().await.unwrap();
    let addr = format!("127.0.0.1:{port}").parse().unwrap();
    (manager, events, addr)
}

async fn wait_for(
    events: &mut Receiver<Event>,
    mut predicate: impl FnMut(&Event) -> bool,
) -> Event {
    timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn test_connect_and_ping() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let (a, mut events_a, _) = start_node(dir_a.path()).await;
    let (b, mut events_b, addr_b) = start_node(dir_b.path()).await;

    let peer_b = a.connect_to_addr(addr_b).await.unwrap();
    assert_eq!(peer_b, b.local_peer_id());

    let connected_a = wait_for(&mut events_a, |e| {
        matches!(e, Event::PeerConnected { .. })
    })
    .await;
    match connected_a {
        Event::PeerConnected {
            peer_id, direction, ..
        } => {
            assert_eq!(peer_id, b.local_peer_id());
            assert_eq!(direction, lantern_core::Direction::Outbound);
        }
        _ => unreachable!(),
    }
    wait_for(&mut events_b, |e| {
        matches!(e, Event::PeerConnected { direction: lantern_core::Direction::Inbound, .. })
    })
    .await;

    assert!(a.is_connected(&peer_b));
    assert!(b.is_connected(&a.local_peer_id()));

    // Ping comes back as a pong with the echoed timestamp and sequence.
    let before = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64;
    a.ping(peer_b).await.unwrap();
    let pong = wait_for(&mut events_a, |e| {
        matches!(
            e,
            Event::MessageReceived {
                message: Message::Pong(_),
                ..
            }
        )
    })
    .await;
    match pong {
        Event::MessageReceived {
            message: Message::Pong(pong),
            ..
        } => {
            assert!(pong.ping_timestamp_ms >= before);
            let latency = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_millis() as i64
                - pong.ping_timestamp_ms;
            assert!(latency >= 0);
        }
        _ => unreachable!(),
    }

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let (a, mut events_a, _) = start_node(dir_a.path()).await;
    let (b, _events_b, addr_b) = start_node(dir_b.path()).await;

    let peer_b = a.connect_to_addr(addr_b).await.unwrap();
    wait_for(&mut events_a, |e| matches!(e, Event::PeerConnected { .. })).await;

    // A peer-addressed connect to an already connected peer succeeds
    // without a second session.
    a.connect_to_peer(peer_b).await.unwrap();
    assert_eq!(a.connected_peers().len(), 1);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_graceful_disconnect() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let (a, mut events_a, _) = start_node(dir_a.path()).await;
    let (b, mut events_b, addr_b) = start_node(dir_b.path()).await;

    let peer_b = a.connect_to_addr(addr_b).await.unwrap();
    wait_for(&mut events_a, |e| matches!(e, Event::PeerConnected { .. })).await;
    wait_for(&mut events_b, |e| matches!(e, Event::PeerConnected { .. })).await;

    a.disconnect(peer_b).await.unwrap();

    // The remote side observes a clean disconnect.
    let event = wait_for(&mut events_b, |e| {
        matches!(e, Event::PeerDisconnected { .. })
    })
    .await;
    match event {
        Event::PeerDisconnected { peer_id, reason } => {
            assert_eq!(peer_id, a.local_peer_id());
            assert!(reason.is_none());
        }
        _ => unreachable!(),
    }

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_simultaneous_dial_leaves_one_session() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let (a, mut events_a, addr_a) = start_node(dir_a.path()).await;
    let (b, mut events_b, addr_b) = start_node(dir_b.path()).await;

    let (from_a, from_b) = tokio::join!(a.connect_to_addr(addr_b), b.connect_to_addr(addr_a));
    assert_eq!(from_a.unwrap(), b.local_peer_id());
    assert_eq!(from_b.unwrap(), a.local_peer_id());

    // Let the tie-break settle.
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(a.connected_peers(), vec![b.local_peer_id()]);
    assert_eq!(b.connected_peers(), vec![a.local_peer_id()]);

    // Each observer saw exactly one PeerConnected and no PeerDisconnected
    // from the dropped duplicate.
    let mut connected = 0;
    let mut disconnected = 0;
    while let Ok(event) = events_a.try_recv() {
        match event {
            Event::PeerConnected { .. } => connected += 1,
            Event::PeerDisconnected { .. } => disconnected += 1,
            _ => {}
        }
    }
    assert_eq!((connected, disconnected), (1, 0));

    connected = 0;
    disconnected = 0;
    while let Ok(event) = events_b.try_recv() {
        match event {
            Event::PeerConnected { .. } => connected += 1,
            Event::PeerDisconnected { .. } => disconnected += 1,
            _ => {}
        }
    }
    assert_eq!((connected, disconnected), (1, 0));

    // The surviving session still carries traffic.
    a.ping(b.local_peer_id()).await.unwrap();
    wait_for(&mut events_a, |e| {
        matches!(
            e,
            Event::MessageReceived {
                message: Message::Pong(_),
                ..
            }
        )
    })
    .await;

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_failed_dial_emits_event() {
    let dir_a = tempfile::tempdir().unwrap();
    let (a, mut events_a, _) = start_node(dir_a.path()).await;

    // Grab a port nothing listens on.
    let unused = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = unused.local_addr().unwrap();
    drop(unused);

    assert!(a.connect_to_addr(dead_addr).await.is_err());
    let event = wait_for(&mut events_a, |e| {
        matches!(e, Event::PeerConnectionFailed { .. })
    })
    .await;
    match event {
        Event::PeerConnectionFailed { endpoint, .. } => assert_eq!(endpoint, dead_addr),
        _ => unreachable!(),
    }

    a.stop().await;
}

#[tokio::test]
async fn test_discovery_observation_surfaces_and_autoconnects() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let (a, mut events_a, _) = start_node(dir_a.path()).await;
    let (b, _events_b, addr_b) = start_node(dir_b.path()).await;

    let (handle, observations) = lantern_core::discovery_channel(8);
    a.attach_discovery(observations);

    handle.found(b.local_peer_id(), addr_b).await;

    let discovered = wait_for(&mut events_a, |e| {
        matches!(e, Event::PeerDiscovered { .. })
    })
    .await;
    match discovered {
        Event::PeerDiscovered { peer_id, endpoint } => {
            assert_eq!(peer_id, b.local_peer_id());
            assert_eq!(endpoint, addr_b);
        }
        _ => unreachable!(),
    }

    // Auto-connect kicks in after the jitter window.
    wait_for(&mut events_a, |e| matches!(e, Event::PeerConnected { .. })).await;
    assert!(a.is_connected(&b.local_peer_id()));

    a.stop().await;
    b.stop().await;
}
