//! Chunked, resumable file transfers.
//!
//! # Transfer Flow
//!
//! ```text
//! Sender                               Receiver
//!     |                                    |
//!     |-- FileAnnounce (size, hash) ------>|  temp file preallocated
//!     |<-- FileRequest (window of 8) ------|
//!     |-- FileChunk 0..7 ----------------->|  verify, write, checkpoint, ack
//!     |<-- FileChunkAck / FileRequest -----|
//!     |          ...                       |
//!     |<-- FileComplete -------------------|  whole-file hash verified,
//!     |                                    |  temp renamed into the inbox
//! ```
//!
//! The sender reads chunks on demand and keeps only the acknowledged
//! counter; the receiver writes each chunk at its offset under the
//! transfer's exclusive lock and persists a contiguous-frontier checkpoint
//! before acking, so a killed receiver resumes from `checkpoint + 1`.
//! Per-transfer memory stays O(chunk size) regardless of file size.

use crate::error::Error;
use crate::events::Event;
use crate::identity::PeerId;
use crate::protocol::{
    FileAnnounce, FileChunk, FileChunkAck, FileRequest, FileResume, Message, TransferStatus,
};
use dashmap::DashMap;
use lantern_crypto::hash::constant_time_eq;
use lantern_crypto::random::random_16;
use lantern_files::assembler::FileAssembler;
use lantern_files::chunker::FileChunker;
use lantern_files::hash::{sha256, sha256_file};
use lantern_files::{checkpoint, chunk_count, chunk_size_for, inbox};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// A message the engine wants on the wire; the peer manager routes it.
#[derive(Debug)]
pub(crate) enum Outbound {
    /// Deliver to one connected peer.
    To(PeerId, Message),
    /// Fan out to every connected peer, best-effort.
    Broadcast(Message),
}

/// Sender-side state for one announced file.
struct OutgoingState {
    id: String,
    path: PathBuf,
    file_name: String,
    file_size: u64,
    file_hash: [u8; 32],
    chunk_size: u32,
    total_chunks: u64,
    acked: AtomicU64,
    completed: AtomicBool,
    chunker: Mutex<FileChunker>,
}

impl OutgoingState {
    fn announce(&self) -> FileAnnounce {
        FileAnnounce {
            transfer_id: self.id.clone(),
            file_name: self.file_name.clone(),
            file_size: self.file_size as i64,
            file_hash: self.file_hash,
            chunk_size: self.chunk_size as i32,
            total_chunks: self.total_chunks as i64,
            mime_type: None,
        }
    }
}

/// Receiver-side state for one announced file.
struct IncomingState {
    id: String,
    origin: PeerId,
    file_name: String,
    file_size: u64,
    file_hash: [u8; 32],
    total_chunks: u64,
    inner: Mutex<IncomingInner>,
}

/// Everything guarded by the per-transfer write lock: the file position,
/// the window bookkeeping, and the retry counters.
struct IncomingInner {
    /// `None` once completion has taken the assembler for verification.
    assembler: Option<FileAssembler>,
    /// Highest chunk index requested so far.
    last_requested: i64,
    /// Frontier already persisted to the checkpoint record.
    checkpointed: i64,
    /// Consecutive hash failures per chunk index.
    failures: HashMap<i64, u32>,
}

/// The transfer engine.
///
/// Owns every [`OutgoingState`] and [`IncomingState`], keyed by transfer
/// id. Wire traffic goes out through the manager's routing channel; state
/// changes surface as [`Event`]s.
pub(crate) struct TransferEngine {
    inbox: PathBuf,
    events: mpsc::Sender<Event>,
    outbound: mpsc::Sender<Outbound>,
    outgoing: DashMap<String, Arc<OutgoingState>>,
    incoming: DashMap<String, Arc<IncomingState>>,
    max_in_flight: i64,
    retry_budget: u32,
}

/// A transfer id is 32 lowercase hex characters (128 random bits). It is
/// embedded in temp and checkpoint file names, so anything else from the
/// network is rejected outright.
fn valid_transfer_id(id: &str) -> bool {
    id.len() == 32
        && id
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

impl TransferEngine {
    pub(crate) fn new(
        inbox: PathBuf,
        events: mpsc::Sender<Event>,
        outbound: mpsc::Sender<Outbound>,
        max_in_flight: i64,
        retry_budget: u32,
    ) -> Self {
        Self {
            inbox,
            events,
            outbound,
            outgoing: DashMap::new(),
            incoming: DashMap::new(),
            max_in_flight,
            retry_budget,
        }
    }

    async fn emit(&self, event: Event) {
        // A dropped receiver means the host is shutting down.
        let _ = self.events.send(event).await;
    }

    async fn send_to(&self, peer: PeerId, message: Message) {
        if self.outbound.send(Outbound::To(peer, message)).await.is_err() {
            tracing::debug!("outbound channel closed, dropping message");
        }
    }

    async fn broadcast(&self, message: Message) {
        if self.outbound.send(Outbound::Broadcast(message)).await.is_err() {
            tracing::debug!("outbound channel closed, dropping broadcast");
        }
    }

    /// Announce a file to every connected peer.
    ///
    /// Streams the whole-file SHA-256 first; the declared hash is the
    /// authoritative integrity root for the transfer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transfer`] for empty or unreadable files.
    pub(crate) async fn announce(&self, path: &Path) -> Result<String, Error> {
        let file_size = tokio::fs::metadata(path).await?.len();
        if file_size == 0 {
            return Err(Error::Transfer("cannot send empty file".into()));
        }
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Transfer("source path has no usable file name".into()))?
            .to_string();

        let file_hash = sha256_file(path).await?;
        let chunk_size = chunk_size_for(file_size);
        let total_chunks = chunk_count(file_size, chunk_size);
        let id = hex::encode(random_16()?);

        let chunker = FileChunker::open(path, chunk_size).await?;
        let state = Arc::new(OutgoingState {
            id: id.clone(),
            path: path.to_path_buf(),
            file_name,
            file_size,
            file_hash,
            chunk_size,
            total_chunks,
            acked: AtomicU64::new(0),
            completed: AtomicBool::new(false),
            chunker: Mutex::new(chunker),
        });

        tracing::info!(
            "announcing {} ({} bytes, {} chunks) as transfer {}",
            state.file_name,
            file_size,
            total_chunks,
            &id[..8]
        );

        let announce = state.announce();
        self.outgoing.insert(id.clone(), state);
        self.broadcast(Message::FileAnnounce(announce)).await;
        Ok(id)
    }

    /// Accept an announced transfer, resuming from the checkpoint frontier
    /// when one survived a restart.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transfer`] if the transfer is unknown or announced
    /// by a different peer.
    pub(crate) async fn accept(&self, peer: PeerId, transfer_id: &str) -> Result<(), Error> {
        let state = self
            .incoming
            .get(transfer_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::Transfer(format!("unknown transfer {transfer_id}")))?;
        if state.origin != peer {
            return Err(Error::Transfer("transfer was announced by a different peer".into()));
        }

        let mut inner = state.inner.lock().await;
        let (frontier, already_complete) = match inner.assembler.as_ref() {
            None => return Ok(()),
            Some(a) => (a.contiguous_frontier(), a.is_complete()),
        };
        if already_complete {
            let assembler = inner.assembler.take().expect("checked above");
            drop(inner);
            return self.finalize(&state, assembler).await;
        }

        let first = frontier + 1;
        let count = (state.total_chunks as i64 - first).min(self.max_in_flight);
        inner.last_requested = first + count - 1;
        drop(inner);

        if frontier >= 0 {
            tracing::info!(
                "resuming transfer {} from chunk {}",
                &state.id[..8],
                first
            );
            self.send_to(
                peer,
                Message::FileResume(FileResume {
                    transfer_id: state.id.clone(),
                    last_received_chunk: frontier,
                }),
            )
            .await;
        }
        self.send_to(
            peer,
            Message::FileRequest(FileRequest {
                transfer_id: state.id.clone(),
                first_chunk_index: first,
                chunk_count: count as i32,
            }),
        )
        .await;
        Ok(())
    }

    /// Cancel a transfer in either direction and tell the peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transfer`] if the id matches nothing.
    pub(crate) async fn cancel(&self, peer: PeerId, transfer_id: &str) -> Result<(), Error> {
        let mut found = false;

        if let Some((_, _state)) = self.outgoing.remove(transfer_id) {
            found = true;
            self.emit(Event::TransferCompleted {
                transfer_id: transfer_id.to_string(),
                success: false,
                path: None,
                reason: Some("cancelled".into()),
            })
            .await;
        }

        if let Some((_, state)) = self.incoming.remove(transfer_id) {
            found = true;
            self.discard_incoming_files(&state).await;
            self.emit(Event::TransferCompleted {
                transfer_id: transfer_id.to_string(),
                success: false,
                path: None,
                reason: Some("cancelled".into()),
            })
            .await;
        }

        if !found {
            return Err(Error::Transfer(format!("unknown transfer {transfer_id}")));
        }

        self.send_to(
            peer,
            Message::FileCancel(TransferStatus {
                transfer_id: transfer_id.to_string(),
                success: false,
                error_message: Some("cancelled".into()),
            }),
        )
        .await;
        Ok(())
    }

    /// Re-offer unfinished outgoing transfers to a newly connected peer, so
    /// a restarted receiver can accept the same transfer id and resume.
    pub(crate) async fn on_peer_connected(&self, peer: PeerId) {
        let announces: Vec<FileAnnounce> = self
            .outgoing
            .iter()
            .filter(|e| !e.completed.load(Ordering::SeqCst))
            .map(|e| e.announce())
            .collect();
        for announce in announces {
            self.send_to(peer, Message::FileAnnounce(announce)).await;
        }
    }

    /// Drop in-memory receive state for a lost session. The temp file and
    /// checkpoint stay on disk so the transfer resumes on reconnect.
    pub(crate) fn on_peer_disconnected(&self, peer: PeerId) {
        let stale: Vec<String> = self
            .incoming
            .iter()
            .filter(|e| e.origin == peer)
            .map(|e| e.id.clone())
            .collect();
        for id in stale {
            tracing::info!("suspending transfer {} (peer went away)", &id[..8]);
            self.incoming.remove(&id);
        }
    }

    /// Route one transfer-kind message.
    pub(crate) async fn handle_message(&self, peer: PeerId, message: Message) -> Result<(), Error> {
        match message {
            Message::FileAnnounce(announce) => self.handle_announce(peer, announce).await,
            Message::FileRequest(request) => self.handle_request(peer, request).await,
            Message::FileChunk(chunk) => self.handle_chunk(peer, chunk).await,
            Message::FileChunkAck(ack) => self.handle_ack(peer, ack).await,
            Message::FileComplete(status) => self.handle_complete(peer, status).await,
            Message::FileCancel(status) => self.handle_peer_cancel(peer, status).await,
            Message::FileResume(resume) => self.handle_resume(peer, resume).await,
            other => Err(Error::InvalidState(format!(
                "non-transfer message {:?} routed to the transfer engine",
                other.kind()
            ))),
        }
    }

    async fn handle_announce(&self, peer: PeerId, announce: FileAnnounce) -> Result<(), Error> {
        if !valid_transfer_id(&announce.transfer_id) {
            return Err(Error::Transfer("announce with invalid transfer id".into()));
        }
        if announce.file_size <= 0 || announce.chunk_size <= 0 {
            return Err(Error::Transfer("announce with non-positive geometry".into()));
        }
        let file_size = announce.file_size as u64;
        let chunk_size = announce.chunk_size as u32;
        let total_chunks = chunk_count(file_size, chunk_size);
        if announce.total_chunks as u64 != total_chunks {
            return Err(Error::Transfer("announce with inconsistent chunk count".into()));
        }
        if self.incoming.contains_key(&announce.transfer_id) {
            tracing::debug!(
                "duplicate announce for transfer {}, ignoring",
                &announce.transfer_id[..8]
            );
            return Ok(());
        }

        let resume_from = checkpoint::load(&self.inbox, &announce.transfer_id)
            .await?
            .map_or(-1, |c| c.last_chunk);
        let temp = inbox::temp_path(&self.inbox, &announce.transfer_id);
        let assembler = FileAssembler::create(&temp, file_size, chunk_size, resume_from).await?;

        tracing::info!(
            "incoming transfer {} from {}: {} ({} bytes, {} chunks{})",
            &announce.transfer_id[..8],
            peer,
            announce.file_name,
            file_size,
            total_chunks,
            if resume_from >= 0 {
                format!(", resumable from {resume_from}")
            } else {
                String::new()
            }
        );

        let state = Arc::new(IncomingState {
            id: announce.transfer_id.clone(),
            origin: peer,
            file_name: announce.file_name.clone(),
            file_size,
            file_hash: announce.file_hash,
            total_chunks,
            inner: Mutex::new(IncomingInner {
                assembler: Some(assembler),
                last_requested: -1,
                checkpointed: resume_from,
                failures: HashMap::new(),
            }),
        });
        self.incoming.insert(announce.transfer_id.clone(), state);

        self.emit(Event::MessageReceived {
            peer_id: peer,
            message: Message::FileAnnounce(announce),
        })
        .await;
        Ok(())
    }

    async fn handle_request(&self, peer: PeerId, request: FileRequest) -> Result<(), Error> {
        let Some(state) = self
            .outgoing
            .get(&request.transfer_id)
            .map(|e| Arc::clone(e.value()))
        else {
            tracing::warn!(
                "request for unknown transfer {}, cancelling",
                request.transfer_id
            );
            self.send_to(
                peer,
                Message::FileCancel(TransferStatus {
                    transfer_id: request.transfer_id,
                    success: false,
                    error_message: Some("unknown transfer".into()),
                }),
            )
            .await;
            return Ok(());
        };

        let first = request.first_chunk_index.max(0) as u64;
        let requested = request.chunk_count.max(0) as u64;
        let end = first.saturating_add(requested).min(state.total_chunks);
        tracing::trace!(
            "sending chunks {}..{} of transfer {}",
            first,
            end,
            &state.id[..8]
        );

        for index in first..end {
            let data = state.chunker.lock().await.read_chunk(index).await?;
            let chunk_hash = sha256(&data);
            self.send_to(
                peer,
                Message::FileChunk(FileChunk {
                    transfer_id: state.id.clone(),
                    chunk_index: index as i64,
                    data,
                    chunk_hash,
                }),
            )
            .await;
        }
        Ok(())
    }

    async fn handle_chunk(&self, peer: PeerId, chunk: FileChunk) -> Result<(), Error> {
        let Some(state) = self
            .incoming
            .get(&chunk.transfer_id)
            .map(|e| Arc::clone(e.value()))
        else {
            tracing::debug!("chunk for unknown transfer {}, dropping", chunk.transfer_id);
            return Ok(());
        };
        if peer != state.origin || chunk.chunk_index < 0 {
            return Err(Error::Transfer("chunk from unexpected source".into()));
        }
        let index = chunk.chunk_index;

        if sha256(&chunk.data) != chunk.chunk_hash {
            return self.reject_chunk(&state, index).await;
        }

        let mut inner = state.inner.lock().await;
        let Some(assembler) = inner.assembler.as_mut() else {
            return Ok(());
        };
        if let Err(e) = assembler.write_chunk(index as u64, &chunk.data).await {
            drop(inner);
            tracing::warn!("chunk {} of {} unusable: {}", index, &state.id[..8], e);
            return self.reject_chunk(&state, index).await;
        }
        inner.failures.remove(&index);

        let frontier = inner
            .assembler
            .as_ref()
            .expect("still present")
            .contiguous_frontier();
        if frontier > inner.checkpointed {
            checkpoint::save(&self.inbox, &state.id, frontier).await?;
            inner.checkpointed = frontier;
        }

        let assembler = inner.assembler.as_ref().expect("still present");
        let bytes_received = assembler.bytes_received();
        let complete = assembler.is_complete();

        // Ack only now: the chunk and its covering checkpoint are durable.
        let mut to_send = vec![Message::FileChunkAck(FileChunkAck {
            transfer_id: state.id.clone(),
            chunk_index: index,
            success: true,
        })];

        if index == inner.last_requested && inner.last_requested + 1 < state.total_chunks as i64 {
            let first = inner.last_requested + 1;
            let count = (state.total_chunks as i64 - first).min(self.max_in_flight);
            inner.last_requested = first + count - 1;
            to_send.push(Message::FileRequest(FileRequest {
                transfer_id: state.id.clone(),
                first_chunk_index: first,
                chunk_count: count as i32,
            }));
        }

        let assembler = if complete {
            inner.assembler.take()
        } else {
            None
        };
        drop(inner);

        for message in to_send {
            self.send_to(state.origin, message).await;
        }
        self.emit(Event::TransferProgress {
            transfer_id: state.id.clone(),
            bytes_transferred: bytes_received,
            total_bytes: state.file_size,
        })
        .await;

        if let Some(assembler) = assembler {
            self.finalize(&state, assembler).await?;
        }
        Ok(())
    }

    /// Negative-ack a bad chunk, aborting the transfer once the retry
    /// budget for that chunk is spent.
    async fn reject_chunk(&self, state: &Arc<IncomingState>, index: i64) -> Result<(), Error> {
        let failures = {
            let mut inner = state.inner.lock().await;
            let count = inner.failures.entry(index).or_insert(0);
            *count += 1;
            *count
        };

        if failures >= self.retry_budget {
            tracing::error!(
                "chunk {} of transfer {} failed {} times, aborting",
                index,
                &state.id[..8],
                failures
            );
            self.incoming.remove(&state.id);
            self.discard_incoming_files(state).await;
            self.send_to(
                state.origin,
                Message::FileCancel(TransferStatus {
                    transfer_id: state.id.clone(),
                    success: false,
                    error_message: Some("corrupted".into()),
                }),
            )
            .await;
            self.emit(Event::TransferCompleted {
                transfer_id: state.id.clone(),
                success: false,
                path: None,
                reason: Some("corrupted".into()),
            })
            .await;
            return Ok(());
        }

        tracing::warn!(
            "chunk {} of transfer {} failed verification ({} of {}), requesting resend",
            index,
            &state.id[..8],
            failures,
            self.retry_budget
        );
        self.send_to(
            state.origin,
            Message::FileChunkAck(FileChunkAck {
                transfer_id: state.id.clone(),
                chunk_index: index,
                success: false,
            }),
        )
        .await;
        Ok(())
    }

    /// Verify the finished temp file and move it into the inbox.
    async fn finalize(
        &self,
        state: &Arc<IncomingState>,
        assembler: FileAssembler,
    ) -> Result<(), Error> {
        let temp = assembler.close().await?;
        let actual = sha256_file(&temp).await?;

        if !constant_time_eq(&actual, &state.file_hash) {
            tracing::error!("transfer {} failed whole-file verification", &state.id[..8]);
            let _ = tokio::fs::remove_file(&temp).await;
            checkpoint::remove(&self.inbox, &state.id).await?;
            self.incoming.remove(&state.id);
            self.send_to(
                state.origin,
                Message::FileComplete(TransferStatus {
                    transfer_id: state.id.clone(),
                    success: false,
                    error_message: Some("hash mismatch".into()),
                }),
            )
            .await;
            self.emit(Event::TransferCompleted {
                transfer_id: state.id.clone(),
                success: false,
                path: None,
                reason: Some("hash mismatch".into()),
            })
            .await;
            return Ok(());
        }

        let final_path = inbox::place(&temp, &self.inbox, &state.file_name).await?;
        checkpoint::remove(&self.inbox, &state.id).await?;
        self.incoming.remove(&state.id);

        tracing::info!(
            "transfer {} complete: {}",
            &state.id[..8],
            final_path.display()
        );
        self.send_to(
            state.origin,
            Message::FileComplete(TransferStatus {
                transfer_id: state.id.clone(),
                success: true,
                error_message: None,
            }),
        )
        .await;
        self.emit(Event::TransferCompleted {
            transfer_id: state.id.clone(),
            success: true,
            path: Some(final_path),
            reason: None,
        })
        .await;
        Ok(())
    }

    async fn handle_ack(&self, peer: PeerId, ack: FileChunkAck) -> Result<(), Error> {
        let Some(state) = self
            .outgoing
            .get(&ack.transfer_id)
            .map(|e| Arc::clone(e.value()))
        else {
            tracing::debug!("ack for unknown transfer {}, dropping", ack.transfer_id);
            return Ok(());
        };

        if !ack.success {
            // Resend exactly the one rejected chunk.
            let index = ack.chunk_index.max(0) as u64;
            let data = state.chunker.lock().await.read_chunk(index).await?;
            let chunk_hash = sha256(&data);
            self.send_to(
                peer,
                Message::FileChunk(FileChunk {
                    transfer_id: state.id.clone(),
                    chunk_index: ack.chunk_index,
                    data,
                    chunk_hash,
                }),
            )
            .await;
            return Ok(());
        }

        let acked = state.acked.fetch_add(1, Ordering::SeqCst) + 1;
        self.emit(Event::TransferProgress {
            transfer_id: state.id.clone(),
            bytes_transferred: (acked * u64::from(state.chunk_size)).min(state.file_size),
            total_bytes: state.file_size,
        })
        .await;

        if acked >= state.total_chunks && !state.completed.swap(true, Ordering::SeqCst) {
            tracing::info!("transfer {} fully acknowledged", &state.id[..8]);
            self.outgoing.remove(&state.id);
            self.emit(Event::TransferCompleted {
                transfer_id: state.id.clone(),
                success: true,
                path: Some(state.path.clone()),
                reason: None,
            })
            .await;
        }
        Ok(())
    }

    async fn handle_complete(&self, _peer: PeerId, status: TransferStatus) -> Result<(), Error> {
        let Some((_, state)) = self.outgoing.remove(&status.transfer_id) else {
            // Normal after the final ack already completed the transfer.
            return Ok(());
        };
        if state.completed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.emit(Event::TransferCompleted {
            transfer_id: status.transfer_id,
            success: status.success,
            path: status.success.then(|| state.path.clone()),
            reason: status.error_message,
        })
        .await;
        Ok(())
    }

    async fn handle_peer_cancel(&self, peer: PeerId, status: TransferStatus) -> Result<(), Error> {
        let reason = status
            .error_message
            .unwrap_or_else(|| "cancelled by peer".into());
        let mut found = false;

        if self.outgoing.remove(&status.transfer_id).is_some() {
            found = true;
        }
        let from_origin = self
            .incoming
            .get(&status.transfer_id)
            .is_some_and(|e| e.origin == peer);
        if from_origin {
            if let Some((_, state)) = self.incoming.remove(&status.transfer_id) {
                self.discard_incoming_files(&state).await;
                found = true;
            }
        }

        if found {
            tracing::info!("transfer {} cancelled: {}", status.transfer_id, reason);
            self.emit(Event::TransferCompleted {
                transfer_id: status.transfer_id,
                success: false,
                path: None,
                reason: Some(reason),
            })
            .await;
        }
        Ok(())
    }

    async fn handle_resume(&self, _peer: PeerId, resume: FileResume) -> Result<(), Error> {
        if self.outgoing.contains_key(&resume.transfer_id) {
            tracing::info!(
                "peer resumes transfer {} after chunk {}",
                &resume.transfer_id[..8],
                resume.last_received_chunk
            );
        } else {
            tracing::warn!("resume notice for unknown transfer {}", resume.transfer_id);
        }
        Ok(())
    }

    /// Close and delete the temp file and checkpoint of a dropped incoming
    /// transfer.
    async fn discard_incoming_files(&self, state: &Arc<IncomingState>) {
        // Drop the write handle before unlinking.
        state.inner.lock().await.assembler = None;
        let temp = inbox::temp_path(&self.inbox, &state.id);
        let _ = tokio::fs::remove_file(&temp).await;
        let _ = checkpoint::remove(&self.inbox, &state.id).await;
    }
}
