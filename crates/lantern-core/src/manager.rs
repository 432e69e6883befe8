//! Peer manager.
//!
//! The coordinator for everything live: it accepts inbound connections,
//! dials outbound ones, drives handshakes under their deadlines, owns the
//! connected-peers map, routes received messages to the transfer engine,
//! and fans out broadcasts. One receive task and one keepalive task run
//! per session; the engine's outbound traffic flows through a single
//! routing task so the engine never touches sockets directly.
//!
//! Connection policy:
//! - **Duplicate suppression** — a second session to an already connected
//!   peer is aborted after the handshake reveals the remote identity.
//! - **Simultaneous open** — when inbound and outbound sessions for the
//!   same peer race, the session whose initiator has the lexicographically
//!   smaller peer id wins; the loser closes silently (no
//!   `PeerDisconnected`, no second `PeerConnected`).
//! - **Auto-connect** — discovered-but-unknown peers are dialed after a
//!   uniform random delay in [100 ms, 500 ms) to reduce collisions.
//! - **Deadlines** — 15 s to dial, 30 s to complete a handshake, enforced
//!   here rather than by callers.

use crate::config::Config;
use crate::discovery::DiscoveryEvent;
use crate::error::{Error, TimeoutPhase};
use crate::events::{Direction, Event};
use crate::identity::{LocalIdentity, PeerId, RemoteIdentity};
use crate::protocol::{
    ClipboardAck, ClipboardContentType, ClipboardData, Disconnect, Message, Ping, Pong,
    ProtocolError,
};
use crate::session::{self, now_ms, Session};
use crate::transfer::{Outbound, TransferEngine};
use dashmap::DashMap;
use lantern_crypto::random::random_16;
use lantern_transport::record::RecordReceiver;
use rand::Rng;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Depth of the engine-to-router message queue. Bounded so a slow peer
/// applies backpressure to chunk production instead of buffering a file.
const OUTBOUND_QUEUE: usize = 32;

/// What the session receive loop should do after a message.
enum Flow {
    Continue,
    Close,
}

/// The peer coordination hub. Cheap to clone via its inner `Arc`.
#[derive(Clone)]
pub struct PeerManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    identity: LocalIdentity,
    config: Config,
    sessions: DashMap<PeerId, Arc<Session>>,
    endpoints: DashMap<PeerId, SocketAddr>,
    dialing: StdMutex<HashSet<PeerId>>,
    events: mpsc::Sender<Event>,
    engine: TransferEngine,
    cancel: CancellationToken,
    started: AtomicBool,
    ping_seq: AtomicI64,
    router_rx: StdMutex<Option<mpsc::Receiver<Outbound>>>,
}

impl PeerManager {
    /// Create a manager and the event queue the host consumes.
    #[must_use]
    pub fn new(identity: LocalIdentity, config: Config) -> (Self, mpsc::Receiver<Event>) {
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);

        let engine = TransferEngine::new(
            config.data_root.join("inbox"),
            events_tx.clone(),
            outbound_tx,
            config.max_in_flight,
            config.chunk_retry_budget,
        );

        let inner = Arc::new(ManagerInner {
            identity,
            config,
            sessions: DashMap::new(),
            endpoints: DashMap::new(),
            dialing: StdMutex::new(HashSet::new()),
            events: events_tx,
            engine,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            ping_seq: AtomicI64::new(0),
            router_rx: StdMutex::new(Some(outbound_rx)),
        });

        (Self { inner }, events_rx)
    }

    /// This node's peer id.
    #[must_use]
    pub fn local_peer_id(&self) -> PeerId {
        self.inner.identity.peer_id()
    }

    /// Peers with an established session.
    #[must_use]
    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.inner.sessions.iter().map(|e| *e.key()).collect()
    }

    /// Whether a session to the peer exists.
    #[must_use]
    pub fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.inner.sessions.contains_key(peer_id)
    }

    /// Bind the listener, create the inbox, and spawn the accept and
    /// routing tasks. Returns the bound port: if the configured port is
    /// unavailable an ephemeral one is chosen instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] on a second start and
    /// [`Error::Io`] if no port can be bound at all.
    pub async fn start(&self) -> Result<u16, Error> {
        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::InvalidState("manager already started".into()));
        }

        let requested = self.inner.config.listen_port;
        let listener = match TcpListener::bind(("0.0.0.0", requested)).await {
            Ok(listener) => listener,
            Err(e) if requested != 0 => {
                tracing::warn!("port {requested} unavailable ({e}), binding ephemeral port");
                TcpListener::bind(("0.0.0.0", 0)).await?
            }
            Err(e) => return Err(e.into()),
        };
        let port = listener.local_addr()?.port();

        tokio::fs::create_dir_all(self.inner.config.data_root.join("inbox")).await?;

        let router_rx = self
            .inner
            .router_rx
            .lock()
            .expect("router lock")
            .take()
            .ok_or_else(|| Error::InvalidState("router already running".into()))?;
        tokio::spawn(run_router(Arc::clone(&self.inner), router_rx));
        tokio::spawn(run_accept_loop(Arc::clone(&self.inner), listener));

        tracing::info!(
            "peer {} listening on port {port}",
            self.inner.identity.peer_id()
        );
        Ok(port)
    }

    /// Consume observations from the host's LAN discovery service.
    pub fn attach_discovery(&self, observations: mpsc::Receiver<DiscoveryEvent>) {
        tokio::spawn(run_discovery(Arc::clone(&self.inner), observations));
    }

    /// Dial an endpoint and handshake as initiator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] with the expired phase, or the terminal
    /// handshake/transport error. Failures also surface as
    /// [`Event::PeerConnectionFailed`].
    pub async fn connect_to_addr(&self, endpoint: SocketAddr) -> Result<PeerId, Error> {
        self.inner.dial(endpoint, None).await
    }

    /// Dial a discovered peer by id, idempotently.
    ///
    /// Succeeds immediately when already connected; refuses concurrent
    /// duplicate dials of the same peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] when no endpoint is known for the
    /// peer, otherwise as [`PeerManager::connect_to_addr`].
    pub async fn connect_to_peer(&self, peer_id: PeerId) -> Result<(), Error> {
        if peer_id == self.inner.identity.peer_id() {
            return Err(Error::InvalidState("refusing to dial self".into()));
        }
        if self.inner.sessions.contains_key(&peer_id) {
            return Ok(());
        }
        let endpoint = self
            .inner
            .endpoints
            .get(&peer_id)
            .map(|e| *e.value())
            .ok_or_else(|| Error::InvalidState(format!("no known endpoint for peer {peer_id}")))?;

        if !self
            .inner
            .dialing
            .lock()
            .expect("dialing lock")
            .insert(peer_id)
        {
            // A dial for this peer is already in flight.
            return Ok(());
        }
        let result = self.inner.dial(endpoint, Some(peer_id)).await;
        self.inner
            .dialing
            .lock()
            .expect("dialing lock")
            .remove(&peer_id);
        result.map(|_| ())
    }

    /// Enqueue one typed message to a connected peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] for unknown peers and the fatal
    /// transport error if sealing or writing fails.
    pub async fn send(&self, peer_id: PeerId, message: Message) -> Result<(), Error> {
        let session = self
            .inner
            .sessions
            .get(&peer_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(Error::NotConnected(peer_id))?;
        session.send(&message).await
    }

    /// Fan one message out to every connected peer, best-effort; per-peer
    /// failures are logged, not raised.
    pub async fn broadcast(&self, message: Message) {
        self.inner.broadcast(&message).await;
    }

    /// Send a latency probe; the reply surfaces as a `Pong` in
    /// [`Event::MessageReceived`].
    ///
    /// # Errors
    ///
    /// As [`PeerManager::send`].
    pub async fn ping(&self, peer_id: PeerId) -> Result<(), Error> {
        let sequence = self.inner.ping_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.send(
            peer_id,
            Message::Ping(Ping {
                timestamp_ms: now_ms() as i64,
                sequence,
            }),
        )
        .await
    }

    /// Hash, register, and announce a file to all connected peers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transfer`] for empty or unreadable files.
    pub async fn send_file(&self, path: &Path) -> Result<String, Error> {
        self.inner.engine.announce(path).await
    }

    /// Accept a previously announced transfer, resuming from its
    /// checkpoint when one exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transfer`] for unknown transfer ids.
    pub async fn accept_file(&self, peer_id: PeerId, transfer_id: &str) -> Result<(), Error> {
        self.inner.engine.accept(peer_id, transfer_id).await
    }

    /// Cancel a transfer in either direction and notify the peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transfer`] for unknown transfer ids.
    pub async fn cancel_transfer(&self, peer_id: PeerId, transfer_id: &str) -> Result<(), Error> {
        self.inner.engine.cancel(peer_id, transfer_id).await
    }

    /// Broadcast clipboard content to all connected peers. Returns the
    /// clipboard id echoed by acknowledgements.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if the CSPRNG fails.
    pub async fn send_clipboard(
        &self,
        content_type: ClipboardContentType,
        data: Vec<u8>,
    ) -> Result<String, Error> {
        let clipboard_id = hex::encode(random_16()?);
        self.broadcast(Message::ClipboardData(ClipboardData {
            clipboard_id: clipboard_id.clone(),
            content_type: content_type as u8,
            data,
            timestamp_ms: now_ms() as i64,
        }))
        .await;
        Ok(clipboard_id)
    }

    /// Gracefully close the session to one peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] for unknown peers.
    pub async fn disconnect(&self, peer_id: PeerId) -> Result<(), Error> {
        let session = self
            .inner
            .sessions
            .get(&peer_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(Error::NotConnected(peer_id))?;
        let _ = session
            .send(&Message::Disconnect(Disconnect { reason: None }))
            .await;
        session.cancel.cancel();
        Ok(())
    }

    /// Shut down: cancel every task, notify peers, and close all sessions.
    pub async fn stop(&self) {
        tracing::info!("stopping peer manager");
        self.inner.cancel.cancel();

        let sessions: Vec<_> = self
            .inner
            .sessions
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        self.inner.sessions.clear();
        for session in sessions {
            let _ = session
                .send(&Message::Disconnect(Disconnect { reason: None }))
                .await;
        }
    }
}

impl ManagerInner {
    async fn emit(&self, event: Event) {
        let _ = self.events.send(event).await;
    }

    async fn broadcast(&self, message: &Message) {
        let sessions: Vec<_> = self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
        for session in sessions {
            if let Err(e) = session.send(message).await {
                tracing::warn!(
                    "broadcast to {} failed: {e}",
                    session.remote.peer_id()
                );
            }
        }
    }

    /// Dial, handshake, and install; failures surface as events too.
    async fn dial(
        self: &Arc<Self>,
        endpoint: SocketAddr,
        expected: Option<PeerId>,
    ) -> Result<PeerId, Error> {
        match self.dial_inner(endpoint, expected).await {
            Ok(peer_id) => Ok(peer_id),
            Err(e) => {
                if !self.cancel.is_cancelled() {
                    self.emit(Event::PeerConnectionFailed {
                        endpoint,
                        peer_id: expected,
                        reason: e.to_string(),
                    })
                    .await;
                }
                Err(e)
            }
        }
    }

    async fn dial_inner(
        self: &Arc<Self>,
        endpoint: SocketAddr,
        expected: Option<PeerId>,
    ) -> Result<PeerId, Error> {
        tracing::debug!("dialing {endpoint}");
        let stream = timeout(self.config.dial_timeout, TcpStream::connect(endpoint))
            .await
            .map_err(|_| Error::Timeout {
                phase: TimeoutPhase::Dial,
            })??;

        let (remote, sender, receiver) = timeout(
            self.config.handshake_timeout,
            session::connect_handshake(stream, &self.identity),
        )
        .await
        .map_err(|_| Error::Timeout {
            phase: TimeoutPhase::Handshake,
        })??;

        let peer_id = remote.peer_id();
        if let Some(expected) = expected {
            if expected != peer_id {
                tracing::warn!("dialed {expected} but authenticated {peer_id}");
            }
        }
        self.install(remote, endpoint, Direction::Outbound, sender, receiver)
            .await;
        Ok(peer_id)
    }

    /// Install a freshly handshaken session, applying duplicate
    /// suppression and the simultaneous-open tie-break.
    async fn install(
        self: &Arc<Self>,
        remote: RemoteIdentity,
        endpoint: SocketAddr,
        direction: Direction,
        sender: lantern_transport::record::RecordSender<tokio::net::tcp::OwnedWriteHalf>,
        receiver: RecordReceiver<OwnedReadHalf>,
    ) {
        let peer_id = remote.peer_id();
        if peer_id == self.identity.peer_id() {
            tracing::debug!("dropping session to self");
            return;
        }

        let session = Arc::new(Session::new(
            remote,
            endpoint,
            direction,
            sender,
            self.cancel.child_token(),
        ));

        let mut newly_connected = false;
        let kept = match self.sessions.entry(peer_id) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let existing = Arc::clone(occupied.get());
                // The canonical session is the one whose initiator has the
                // smaller peer id.
                let local_smaller = self.identity.peer_id() < peer_id;
                let new_is_canonical = match direction {
                    Direction::Outbound => local_smaller,
                    Direction::Inbound => !local_smaller,
                };
                if existing.direction != direction && new_is_canonical {
                    existing.supersede();
                    occupied.insert(Arc::clone(&session));
                    true
                } else {
                    false
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&session));
                newly_connected = true;
                true
            }
        };

        if !kept {
            tracing::debug!("duplicate session with {peer_id} aborted ({direction:?})");
            return;
        }

        self.endpoints.insert(peer_id, endpoint);
        tokio::spawn(run_session(Arc::clone(self), Arc::clone(&session), receiver));
        if let Some(interval) = self.config.keepalive_interval {
            tokio::spawn(run_keepalive(
                Arc::clone(self),
                Arc::clone(&session),
                interval,
            ));
        }

        if newly_connected {
            tracing::info!("peer {peer_id} connected ({direction:?}, {endpoint})");
            self.emit(Event::PeerConnected {
                peer_id,
                direction,
                endpoint,
            })
            .await;
            self.engine.on_peer_connected(peer_id).await;
        } else {
            tracing::debug!("tie-break replaced session with {peer_id} ({direction:?})");
        }
    }

    /// Handle one decoded message on an established session.
    async fn dispatch(&self, session: &Arc<Session>, message: Message) -> Result<Flow, Error> {
        let peer_id = session.remote.peer_id();
        match message {
            Message::Ping(ping) => {
                session
                    .send(&Message::Pong(Pong {
                        ping_timestamp_ms: ping.timestamp_ms,
                        sequence: ping.sequence,
                    }))
                    .await?;
                Ok(Flow::Continue)
            }
            message @ Message::Pong(_) => {
                self.emit(Event::MessageReceived { peer_id, message }).await;
                Ok(Flow::Continue)
            }
            Message::Disconnect(notice) => {
                tracing::info!(
                    "peer {peer_id} disconnected{}",
                    notice
                        .reason
                        .map(|r| format!(": {r}"))
                        .unwrap_or_default()
                );
                Ok(Flow::Close)
            }
            message @ (Message::FileAnnounce(_)
            | Message::FileRequest(_)
            | Message::FileChunk(_)
            | Message::FileChunkAck(_)
            | Message::FileComplete(_)
            | Message::FileCancel(_)
            | Message::FileResume(_)) => {
                self.engine.handle_message(peer_id, message).await?;
                Ok(Flow::Continue)
            }
            Message::ClipboardData(data) => {
                session
                    .send(&Message::ClipboardAck(ClipboardAck {
                        clipboard_id: data.clipboard_id.clone(),
                    }))
                    .await?;
                self.emit(Event::MessageReceived {
                    peer_id,
                    message: Message::ClipboardData(data),
                })
                .await;
                Ok(Flow::Continue)
            }
            message @ Message::ClipboardAck(_) => {
                self.emit(Event::MessageReceived { peer_id, message }).await;
                Ok(Flow::Continue)
            }
            Message::HandshakeInit(_)
            | Message::HandshakeResponse(_)
            | Message::HandshakeFinal(_)
            | Message::HandshakeComplete => {
                Err(ProtocolError::UnexpectedHandshake.into())
            }
        }
    }

    /// Remove a finished session, notify the engine, and tell observers —
    /// unless the session lost a tie-break or we are shutting down.
    async fn teardown(&self, session: &Arc<Session>, failure: Option<Error>) {
        session.cancel.cancel();
        let peer_id = session.remote.peer_id();
        if session.is_superseded() {
            return;
        }

        let removed = self
            .sessions
            .remove_if(&peer_id, |_, current| Arc::ptr_eq(current, session));
        if removed.is_none() {
            return;
        }

        self.engine.on_peer_disconnected(peer_id);
        if self.cancel.is_cancelled() {
            return;
        }

        let reason = failure.map(|e| e.to_string());
        tracing::info!(
            "session with {peer_id} closed{}",
            reason
                .as_deref()
                .map(|r| format!(": {r}"))
                .unwrap_or_default()
        );
        self.emit(Event::PeerDisconnected { peer_id, reason }).await;
    }
}

/// Accept inbound connections and handshake each under the deadline.
async fn run_accept_loop(inner: Arc<ManagerInner>, listener: TcpListener) {
    loop {
        tokio::select! {
            () = inner.cancel.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, endpoint) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!("accept failed: {e}");
                        continue;
                    }
                };
                let inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    let handshake = timeout(
                        inner.config.handshake_timeout,
                        session::accept_handshake(stream, &inner.identity),
                    )
                    .await;
                    match handshake {
                        Ok(Ok((remote, sender, receiver))) => {
                            inner
                                .install(remote, endpoint, Direction::Inbound, sender, receiver)
                                .await;
                        }
                        Ok(Err(e)) => {
                            tracing::debug!("inbound handshake from {endpoint} failed: {e}");
                        }
                        Err(_) => {
                            tracing::debug!("inbound handshake from {endpoint} timed out");
                        }
                    }
                });
            }
        }
    }
}

/// Per-session receive loop. Owns the opening half; one socket read is in
/// flight at a time, and the next read is not issued until the previous
/// message is fully consumed.
async fn run_session(
    inner: Arc<ManagerInner>,
    session: Arc<Session>,
    mut receiver: RecordReceiver<OwnedReadHalf>,
) {
    let peer_id = session.remote.peer_id();
    let mut failure: Option<Error> = None;

    loop {
        tokio::select! {
            () = session.cancel.cancelled() => break,
            received = receiver.recv() => {
                let bytes = match received {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        failure = Some(e.into());
                        break;
                    }
                };
                let message = match Message::decode(&bytes) {
                    Ok(message) => message,
                    Err(e) => {
                        failure = Some(e.into());
                        break;
                    }
                };
                match inner.dispatch(&session, message).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Close) => break,
                    Err(e) if e.is_fatal_to_session() => {
                        failure = Some(e);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("non-fatal error on session with {peer_id}: {e}");
                    }
                }
            }
        }
    }

    inner.teardown(&session, failure).await;
}

/// Periodic keepalive pings on one session.
async fn run_keepalive(inner: Arc<ManagerInner>, session: Arc<Session>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            () = session.cancel.cancelled() => break,
            _ = ticker.tick() => {
                let sequence = inner.ping_seq.fetch_add(1, Ordering::SeqCst) + 1;
                let ping = Message::Ping(Ping {
                    timestamp_ms: now_ms() as i64,
                    sequence,
                });
                if session.send(&ping).await.is_err() {
                    // The receive loop will observe the broken socket.
                    break;
                }
            }
        }
    }
}

/// Route engine traffic onto sessions.
async fn run_router(inner: Arc<ManagerInner>, mut rx: mpsc::Receiver<Outbound>) {
    loop {
        tokio::select! {
            () = inner.cancel.cancelled() => break,
            outbound = rx.recv() => {
                match outbound {
                    None => break,
                    Some(Outbound::To(peer_id, message)) => {
                        let session = inner.sessions.get(&peer_id).map(|e| Arc::clone(e.value()));
                        match session {
                            Some(session) => {
                                if let Err(e) = session.send(&message).await {
                                    tracing::warn!("send to {peer_id} failed: {e}");
                                }
                            }
                            None => {
                                tracing::debug!("dropping message for disconnected peer {peer_id}");
                            }
                        }
                    }
                    Some(Outbound::Broadcast(message)) => {
                        inner.broadcast(&message).await;
                    }
                }
            }
        }
    }
}

/// Consume discovery observations: remember endpoints, surface sightings,
/// and schedule jittered auto-connects.
async fn run_discovery(inner: Arc<ManagerInner>, mut observations: mpsc::Receiver<DiscoveryEvent>) {
    loop {
        tokio::select! {
            () = inner.cancel.cancelled() => break,
            observation = observations.recv() => {
                match observation {
                    None => break,
                    Some(DiscoveryEvent::Found { peer_id, endpoint }) => {
                        if peer_id == inner.identity.peer_id() {
                            continue;
                        }
                        inner.endpoints.insert(peer_id, endpoint);
                        inner.emit(Event::PeerDiscovered { peer_id, endpoint }).await;

                        if inner.config.auto_connect && !inner.sessions.contains_key(&peer_id) {
                            let inner = Arc::clone(&inner);
                            tokio::spawn(async move {
                                let delay = {
                                    let mut rng = rand::thread_rng();
                                    rng.gen_range(100..500)
                                };
                                tokio::time::sleep(Duration::from_millis(delay)).await;
                                if inner.cancel.is_cancelled()
                                    || inner.sessions.contains_key(&peer_id)
                                {
                                    return;
                                }
                                if let Err(e) = inner.dial(endpoint, Some(peer_id)).await {
                                    tracing::debug!("auto-connect to {peer_id} failed: {e}");
                                }
                            });
                        }
                    }
                    Some(DiscoveryEvent::Lost { peer_id }) => {
                        inner.endpoints.remove(&peer_id);
                    }
                }
            }
        }
    }
}
