//! Authenticated sessions.
//!
//! A session is born from a TCP stream by driving the Noise handshake over
//! raw frames (the three handshake messages travel as plaintext
//! handshake-kind frames), then splitting the stream into a mutex-guarded
//! sealing writer and a reader owned by the session's receive task. The
//! responder's `HandshakeComplete` is the first sealed record in the
//! responder-to-initiator direction.

use crate::error::Error;
use crate::events::Direction;
use crate::identity::{LocalIdentity, RemoteIdentity};
use crate::protocol::Message;
use lantern_crypto::aead::AeadKey;
use lantern_crypto::noise::{Handshake, HandshakeError};
use lantern_crypto::random::SecureRng;
use lantern_transport::frame;
use lantern_transport::record::{RecordReceiver, RecordSender};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Current Unix time in milliseconds, for handshake payloads and pings.
#[must_use]
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The sealing and opening halves of a freshly established session.
pub(crate) type SessionHalves = (
    RemoteIdentity,
    RecordSender<OwnedWriteHalf>,
    RecordReceiver<OwnedReadHalf>,
);

/// Dial-side handshake: drive the XX pattern as initiator and wait for the
/// responder's sealed `HandshakeComplete`.
pub(crate) async fn connect_handshake(
    stream: TcpStream,
    identity: &LocalIdentity,
) -> Result<SessionHalves, Error> {
    let mut rng = SecureRng::new();
    let mut handshake = Handshake::initiator(identity.signing().clone(), &mut rng);
    let (mut read_half, mut write_half) = stream.into_split();

    let msg1 = handshake.write_initial()?;
    frame::write_frame(&mut write_half, &Message::HandshakeInit(msg1).encode()?).await?;

    let msg2 = match Message::decode(&frame::read_frame(&mut read_half).await?)? {
        Message::HandshakeResponse(bytes) => bytes,
        _ => return Err(HandshakeError::OutOfOrder.into()),
    };
    handshake.read_response(&msg2, now_ms())?;

    let msg3 = handshake.write_final(now_ms())?;
    frame::write_frame(&mut write_half, &Message::HandshakeFinal(msg3).encode()?).await?;

    let (keys, remote_public) = handshake.finish()?;
    let remote = RemoteIdentity::from_public_key(remote_public);
    let sender = RecordSender::new(write_half, AeadKey::new(keys.send_key));
    let mut receiver = RecordReceiver::new(read_half, AeadKey::new(keys.recv_key));

    match Message::decode(&receiver.recv().await?)? {
        Message::HandshakeComplete => Ok((remote, sender, receiver)),
        _ => Err(HandshakeError::OutOfOrder.into()),
    }
}

/// Accept-side handshake: drive the XX pattern as responder and send the
/// sealed `HandshakeComplete` acknowledgement.
pub(crate) async fn accept_handshake(
    stream: TcpStream,
    identity: &LocalIdentity,
) -> Result<SessionHalves, Error> {
    let mut rng = SecureRng::new();
    let mut handshake = Handshake::responder(identity.signing().clone(), &mut rng);
    let (mut read_half, mut write_half) = stream.into_split();

    let msg1 = match Message::decode(&frame::read_frame(&mut read_half).await?)? {
        Message::HandshakeInit(bytes) => bytes,
        _ => return Err(HandshakeError::OutOfOrder.into()),
    };
    handshake.read_initial(&msg1)?;

    let msg2 = handshake.write_response(now_ms())?;
    frame::write_frame(&mut write_half, &Message::HandshakeResponse(msg2).encode()?).await?;

    let msg3 = match Message::decode(&frame::read_frame(&mut read_half).await?)? {
        Message::HandshakeFinal(bytes) => bytes,
        _ => return Err(HandshakeError::OutOfOrder.into()),
    };
    handshake.read_final(&msg3, now_ms())?;

    let (keys, remote_public) = handshake.finish()?;
    let remote = RemoteIdentity::from_public_key(remote_public);
    let mut sender = RecordSender::new(write_half, AeadKey::new(keys.send_key));
    let receiver = RecordReceiver::new(read_half, AeadKey::new(keys.recv_key));

    sender.send(&Message::HandshakeComplete.encode()?).await?;
    Ok((remote, sender, receiver))
}

/// One established session.
///
/// The receive half lives in the session's spawned receive task; this
/// handle carries the authenticated identity and the mutex-guarded sealing
/// writer shared by everything that sends on the session.
pub(crate) struct Session {
    pub(crate) remote: RemoteIdentity,
    pub(crate) endpoint: SocketAddr,
    pub(crate) direction: Direction,
    pub(crate) cancel: CancellationToken,
    writer: Mutex<RecordSender<OwnedWriteHalf>>,
    superseded: AtomicBool,
}

impl Session {
    pub(crate) fn new(
        remote: RemoteIdentity,
        endpoint: SocketAddr,
        direction: Direction,
        sender: RecordSender<OwnedWriteHalf>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            remote,
            endpoint,
            direction,
            cancel,
            writer: Mutex::new(sender),
            superseded: AtomicBool::new(false),
        }
    }

    /// Seal and send one typed message. Serialized by the writer mutex; the
    /// only suspension while holding it is the socket write itself.
    pub(crate) async fn send(&self, message: &Message) -> Result<(), Error> {
        let bytes = message.encode()?;
        let mut writer = self.writer.lock().await;
        writer.send(&bytes).await?;
        Ok(())
    }

    /// Mark this session as replaced by the simultaneous-open tie-break.
    /// A superseded session closes without emitting `PeerDisconnected`.
    pub(crate) fn supersede(&self) {
        self.superseded.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    pub(crate) fn is_superseded(&self) -> bool {
        self.superseded.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.remote.peer_id())
            .field("endpoint", &self.endpoint)
            .field("direction", &self.direction)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_handshake_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_identity = LocalIdentity::generate().unwrap();
        let server_public = server_identity.public_key();
        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            accept_handshake(stream, &server_identity).await.unwrap()
        });

        let client_identity = LocalIdentity::generate().unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();
        let (remote, mut sender, _receiver) =
            connect_handshake(stream, &client_identity).await.unwrap();

        let (server_remote, _server_sender, mut server_receiver) = accept.await.unwrap();

        assert_eq!(remote.public_key(), &server_public);
        assert_eq!(server_remote.peer_id(), client_identity.peer_id());

        // Sealed traffic flows initiator → responder.
        let msg = Message::Ping(crate::protocol::Ping {
            timestamp_ms: 1,
            sequence: 1,
        });
        sender.send(&msg.encode().unwrap()).await.unwrap();
        let received = Message::decode(&server_receiver.recv().await.unwrap()).unwrap();
        assert_eq!(received, msg);
    }

    #[tokio::test]
    async fn test_mismatched_first_message_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_identity = LocalIdentity::generate().unwrap();
        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            accept_handshake(stream, &server_identity).await
        });

        // Send a ping where HandshakeInit belongs.
        let stream = TcpStream::connect(addr).await.unwrap();
        let (_read_half, mut write_half) = stream.into_split();
        let bogus = Message::Ping(crate::protocol::Ping {
            timestamp_ms: 0,
            sequence: 0,
        })
        .encode()
        .unwrap();
        frame::write_frame(&mut write_half, &bogus).await.unwrap();

        assert!(accept.await.unwrap().is_err());
    }
}
