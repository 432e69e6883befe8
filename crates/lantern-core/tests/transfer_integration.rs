//! End-to-end file and clipboard transfers between two real nodes.

use lantern_core::protocol::ClipboardContentType;
use lantern_core::{Config, Event, LocalIdentity, Message, PeerManager};
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::Receiver;
use tokio::time::timeout;

fn test_config(dir: &Path) -> Config {
    let mut config = Config::new(dir.to_path_buf());
    config.keepalive_interval = None;
    config
}

async fn start_node(dir: &Path) -> (PeerManager, Receiver<Event>, SocketAddr) {
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
    timeout(Duration::from_secs(10), async {
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

async fn write_patterned(path: &Path, len: usize) -> Vec<u8> {
    let data: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
    tokio::fs::write(path, &data).await.unwrap();
    data
}

#[tokio::test]
async fn test_small_file_end_to_end() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let (a, mut events_a, _) = start_node(dir_a.path()).await;
    let (b, mut events_b, addr_b) = start_node(dir_b.path()).await;

    let peer_b = a.connect_to_addr(addr_b).await.unwrap();
    assert_eq!(peer_b, b.local_peer_id());
    wait_for(&mut events_b, |e| matches!(e, Event::PeerConnected { .. })).await;

    // 1000 bytes of 0x00, 0x01, ... repeating: one 64 KiB-policy chunk.
    let source = dir_a.path().join("pattern.bin");
    let data = write_patterned(&source, 1000).await;
    let expected_hash: [u8; 32] = Sha256::digest(&data).into();

    let transfer_id = a.send_file(&source).await.unwrap();

    let announce = wait_for(&mut events_b, |e| {
        matches!(
            e,
            Event::MessageReceived {
                message: Message::FileAnnounce(_),
                ..
            }
        )
    })
    .await;
    match announce {
        Event::MessageReceived {
            message: Message::FileAnnounce(announce),
            ..
        } => {
            assert_eq!(announce.transfer_id, transfer_id);
            assert_eq!(announce.file_name, "pattern.bin");
            assert_eq!(announce.file_size, 1000);
            assert_eq!(announce.chunk_size, 64 * 1024);
            assert_eq!(announce.total_chunks, 1);
            assert_eq!(announce.file_hash, expected_hash);
        }
        _ => unreachable!(),
    }

    b.accept_file(a.local_peer_id(), &transfer_id).await.unwrap();

    let completed = wait_for(&mut events_b, |e| {
        matches!(e, Event::TransferCompleted { .. })
    })
    .await;
    let final_path = match completed {
        Event::TransferCompleted {
            success: true,
            path: Some(path),
            ..
        } => path,
        other => panic!("transfer failed: {other:?}"),
    };
    assert_eq!(final_path, dir_b.path().join("inbox").join("pattern.bin"));
    assert_eq!(tokio::fs::read(&final_path).await.unwrap(), data);

    // The sender observes completion too.
    wait_for(&mut events_a, |e| {
        matches!(e, Event::TransferCompleted { success: true, .. })
    })
    .await;

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_multi_chunk_file_end_to_end() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let (a, _events_a, _) = start_node(dir_a.path()).await;
    let (b, mut events_b, addr_b) = start_node(dir_b.path()).await;

    a.connect_to_addr(addr_b).await.unwrap();
    wait_for(&mut events_b, |e| matches!(e, Event::PeerConnected { .. })).await;

    // 640 KiB: ten 64 KiB chunks, more than one request window.
    let source = dir_a.path().join("bulk.bin");
    let data = write_patterned(&source, 640 * 1024).await;

    let transfer_id = a.send_file(&source).await.unwrap();
    wait_for(&mut events_b, |e| {
        matches!(
            e,
            Event::MessageReceived {
                message: Message::FileAnnounce(_),
                ..
            }
        )
    })
    .await;

    b.accept_file(a.local_peer_id(), &transfer_id).await.unwrap();

    let mut saw_progress = false;
    let completed = loop {
        let event = wait_for(&mut events_b, |e| {
            matches!(
                e,
                Event::TransferProgress { .. } | Event::TransferCompleted { .. }
            )
        })
        .await;
        match event {
            Event::TransferProgress {
                bytes_transferred,
                total_bytes,
                ..
            } => {
                saw_progress = true;
                assert!(bytes_transferred <= total_bytes);
            }
            done @ Event::TransferCompleted { .. } => break done,
            _ => unreachable!(),
        }
    };
    assert!(saw_progress);

    let final_path = match completed {
        Event::TransferCompleted {
            success: true,
            path: Some(path),
            ..
        } => path,
        other => panic!("transfer failed: {other:?}"),
    };
    let received = tokio::fs::read(&final_path).await.unwrap();
    assert_eq!(received.len(), data.len());
    assert_eq!(received, data);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_clipboard_broadcast_and_ack() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let (a, mut events_a, _) = start_node(dir_a.path()).await;
    let (b, mut events_b, addr_b) = start_node(dir_b.path()).await;

    a.connect_to_addr(addr_b).await.unwrap();
    wait_for(&mut events_b, |e| matches!(e, Event::PeerConnected { .. })).await;

    let clipboard_id = a
        .send_clipboard(ClipboardContentType::Text, b"shared text".to_vec())
        .await
        .unwrap();

    let received = wait_for(&mut events_b, |e| {
        matches!(
            e,
            Event::MessageReceived {
                message: Message::ClipboardData(_),
                ..
            }
        )
    })
    .await;
    match received {
        Event::MessageReceived {
            message: Message::ClipboardData(clip),
            ..
        } => {
            assert_eq!(clip.clipboard_id, clipboard_id);
            assert_eq!(clip.content_type, ClipboardContentType::Text as u8);
            assert_eq!(clip.data, b"shared text");
        }
        _ => unreachable!(),
    }

    // The sender hears the acknowledgement.
    let ack = wait_for(&mut events_a, |e| {
        matches!(
            e,
            Event::MessageReceived {
                message: Message::ClipboardAck(_),
                ..
            }
        )
    })
    .await;
    match ack {
        Event::MessageReceived {
            message: Message::ClipboardAck(ack),
            ..
        } => assert_eq!(ack.clipboard_id, clipboard_id),
        _ => unreachable!(),
    }

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_inbox_collision_second_transfer() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let (a, _events_a, _) = start_node(dir_a.path()).await;
    let (b, mut events_b, addr_b) = start_node(dir_b.path()).await;

    a.connect_to_addr(addr_b).await.unwrap();
    wait_for(&mut events_b, |e| matches!(e, Event::PeerConnected { .. })).await;

    let source = dir_a.path().join("twice.bin");
    write_patterned(&source, 500).await;

    let mut final_paths: Vec<PathBuf> = Vec::new();
    for _ in 0..2 {
        let transfer_id = a.send_file(&source).await.unwrap();
        wait_for(&mut events_b, |e| {
            matches!(
                e,
                Event::MessageReceived {
                    message: Message::FileAnnounce(a),
                    ..
                } if a.transfer_id == transfer_id
            )
        })
        .await;
        b.accept_file(a.local_peer_id(), &transfer_id).await.unwrap();
        let completed = wait_for(&mut events_b, |e| {
            matches!(e, Event::TransferCompleted { .. })
        })
        .await;
        match completed {
            Event::TransferCompleted {
                success: true,
                path: Some(path),
                ..
            } => final_paths.push(path),
            other => panic!("transfer failed: {other:?}"),
        }
    }

    let inbox = dir_b.path().join("inbox");
    assert_eq!(final_paths[0], inbox.join("twice.bin"));
    assert_eq!(final_paths[1], inbox.join("twice (1).bin"));

    a.stop().await;
    b.stop().await;
}
