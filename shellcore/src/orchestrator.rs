//! Composition root (spec 4.9): wires the signaling client, the transport
//! manager, and the five stores together, and carries every message
//! across the two wire boundaries (the relay's negotiation datagrams and
//! the peer-to-peer envelope stream).
//!
//! Grounded on `termchat/src/net.rs`'s supervisor/command-handler task
//! split (a background task owns I/O, `&self` methods just enqueue) and
//! `termchat/src/chat/mod.rs`'s pipeline dispatch (validate -> route ->
//! store update). The session/peer map and the wire routing table are new
//! domain content — the teacher has one peer-to-peer chat relationship,
//! not a session-multiplexed one.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use shellcore_proto::ids::{PeerId, SessionId};
use shellcore_proto::message::{EntryKind, Stream as WireStream};
use shellcore_proto::{Envelope, Message};

use crate::file_engine::{self, FileEngineError, UploadOutcome};
use crate::signaling::{SignalingClient, SignalingError, SignalingEvent};
use crate::stores::connection::{ConnectionStore, PeerStatus, SignalingStatus};
use crate::stores::device::DeviceStore;
use crate::stores::file::{EntryType, FileEntry, FileEvent, FileStore};
use crate::stores::notification::{NotificationStore, NotificationType};
use crate::stores::session::{SessionEvent, SessionStatus, SessionStore};
use crate::transport::{Channel, PeerState, TransportEvent, TransportManager};

/// Converts a wire [`EntryKind`] to the file store's own entry-type enum.
/// Two enums rather than one shared type because the wire tag is a stable
/// integer contract (spec 4.1) and the store type is free to grow fields.
const fn map_entry_kind(kind: EntryKind) -> EntryType {
    match kind {
        EntryKind::File => EntryType::File,
        EntryKind::Directory => EntryType::Directory,
        EntryKind::Symlink => EntryType::Symlink,
        EntryKind::Unknown => EntryType::Unknown,
    }
}

/// Joins a remote listing entry's name onto its parent directory,
/// collapsing the double slash that a naive join would produce at the
/// filesystem root (spec 4.9: "compose path (`/` collapsed)").
fn compose_child_path(base: &str, name: &str) -> String {
    if base == "/" {
        format!("/{name}")
    } else {
        format!("{}/{name}", base.trim_end_matches('/'))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("no active peer to route this operation to")]
    NoActivePeer,
    #[error(transparent)]
    Signaling(#[from] SignalingError),
    #[error(transparent)]
    FileEngine(#[from] FileEngineError),
}

/// The composition root. Generic over the transport backend so the same
/// wiring runs against [`crate::transport::webrtc::WebrtcTransportManager`]
/// in production and [`crate::transport::loopback::LoopbackTransportManager`]
/// in tests.
pub struct Orchestrator<T: TransportManager + 'static> {
    signaling: Arc<SignalingClient>,
    transport: Arc<T>,
    connection_store: Arc<ConnectionStore>,
    session_store: Arc<SessionStore>,
    file_store: Arc<FileStore>,
    notification_store: Arc<NotificationStore>,
    device_store: Arc<DeviceStore>,
    session_peer_map: Mutex<HashMap<SessionId, PeerId>>,
    sequence: AtomicU64,
    ice_servers: Option<Vec<String>>,
    chunk_size: u32,
    initialized: AtomicBool,
}

impl<T: TransportManager + 'static> Orchestrator<T> {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        signaling: Arc<SignalingClient>,
        transport: Arc<T>,
        connection_store: Arc<ConnectionStore>,
        session_store: Arc<SessionStore>,
        file_store: Arc<FileStore>,
        notification_store: Arc<NotificationStore>,
        device_store: Arc<DeviceStore>,
        ice_servers: Option<Vec<String>>,
        chunk_size: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            signaling,
            transport,
            connection_store,
            session_store,
            file_store,
            notification_store,
            device_store,
            session_peer_map: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            ice_servers,
            chunk_size,
            initialized: AtomicBool::new(false),
        })
    }

    /// Subscribes to every upstream event source. Idempotent: a second
    /// call is a no-op, guarding against double-subscription (spec 4.9
    /// item 1).
    pub fn initialize(self: &Arc<Self>) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }

        let this = Arc::clone(self);
        self.signaling.subscribe(move |event| this.on_signaling_event(event.clone()));

        let this = Arc::clone(self);
        self.transport.subscribe(move |event| this.on_transport_event(event.clone()));

        let this = Arc::clone(self);
        self.session_store.subscribe(move |event| this.on_session_event(event.clone()));

        let this = Arc::clone(self);
        self.file_store.subscribe(move |event| this.on_file_event(event.clone()));
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    #[must_use]
    pub fn active_peer(&self) -> Option<PeerId> {
        self.connection_store.snapshot().active_peer_id
    }

    /// Joins `room_id` on the signaling relay. Existing peers in the room
    /// are dialed as initiator once `Connected` arrives (spec 4.9 item 2).
    pub async fn connect(&self, room_id: impl Into<String>) -> Result<(), OrchestratorError> {
        self.connection_store.set_signaling_status(SignalingStatus::Connecting);
        self.signaling.join(room_id).await?;
        Ok(())
    }

    /// Tears down every peer connection and leaves signaling, without
    /// resetting subscriptions (spec 4.9: `disconnect()`).
    pub async fn disconnect(&self) -> Result<(), OrchestratorError> {
        self.transport.destroy_all().await;
        self.signaling.leave().await?;
        self.session_peer_map.lock().clear();
        Ok(())
    }

    /// Full teardown: tears down connections, leaves signaling, and
    /// allows `initialize()` to be called again (spec 4.9: `destroy()`).
    pub async fn destroy(&self) -> Result<(), OrchestratorError> {
        self.disconnect().await?;
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }

    // ---- signaling events -------------------------------------------------

    fn on_signaling_event(self: &Arc<Self>, event: SignalingEvent) {
        match event {
            SignalingEvent::Connected { existing_peers, .. } => {
                self.connection_store.set_signaling_status(SignalingStatus::Connected);
                self.connection_store.set_reconnect_attempts(0);
                for peer in existing_peers {
                    let peer_id = PeerId::new(peer);
                    self.connection_store.upsert_peer(peer_id.clone(), true);
                    self.spawn_create_connection(peer_id, true);
                }
            }
            SignalingEvent::Disconnected { reason } => {
                let status = match reason.as_deref() {
                    Some("exhausted") => SignalingStatus::Dormant,
                    None => SignalingStatus::Disconnected,
                    Some(_) => SignalingStatus::Disconnected,
                };
                self.connection_store.set_signaling_status(status);
                self.connection_store.set_signaling_error(reason);
            }
            SignalingEvent::PeerJoined { peer_id } => {
                self.connection_store.upsert_peer(PeerId::new(peer_id), false);
            }
            SignalingEvent::PeerLeft { peer_id } => {
                let peer_id = PeerId::new(peer_id);
                self.connection_store.remove_peer(&peer_id);
                self.session_store.close_by_peer(&peer_id);
                self.device_store.mark_disconnected(&peer_id, Some("peer left".to_string()));
            }
            SignalingEvent::Offer { from, desc } => {
                let peer_id = PeerId::new(from);
                self.connection_store.upsert_peer(peer_id.clone(), false);
                self.spawn_deliver_offer(peer_id, desc);
            }
            SignalingEvent::Answer { from, desc } | SignalingEvent::Ice { from, candidate: desc } => {
                self.spawn_signal(PeerId::new(from), desc);
            }
            SignalingEvent::Error { message } => {
                self.connection_store.set_signaling_error(Some(message.clone()));
                self.notification_store.push(
                    NotificationType::Error,
                    "Signaling error".to_string(),
                    message,
                    None,
                    Vec::new(),
                );
            }
        }
    }

    fn spawn_create_connection(self: &Arc<Self>, peer_id: PeerId, initiator: bool) {
        let this = Arc::clone(self);
        let ice_servers = self.ice_servers.clone();
        tokio::spawn(async move {
            if let Err(e) = this.transport.create_connection(peer_id.clone(), initiator, ice_servers).await {
                this.connection_store.set_peer_status(&peer_id, PeerStatus::Failed, Some(e.to_string()));
            }
        });
    }

    fn spawn_deliver_offer(self: &Arc<Self>, peer_id: PeerId, desc: Value) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.transport.create_connection(peer_id.clone(), false, this.ice_servers.clone()).await.ok();
            if let Err(e) = this.transport.signal(&peer_id, desc).await {
                this.connection_store.set_peer_status(&peer_id, PeerStatus::Failed, Some(e.to_string()));
            }
        });
    }

    fn spawn_signal(self: &Arc<Self>, peer_id: PeerId, desc: Value) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.transport.signal(&peer_id, desc).await {
                this.connection_store.set_peer_status(&peer_id, PeerStatus::Failed, Some(e.to_string()));
            }
        });
    }

    // ---- transport events --------------------------------------------------

    fn on_transport_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Signal { peer_id, datagram } => self.route_outbound_signal(peer_id, datagram),
            TransportEvent::Connect { peer_id } => {
                self.connection_store.set_peer_status(&peer_id, PeerStatus::Connected, None);
                self.device_store.mark_connected(&peer_id);
            }
            TransportEvent::Close { peer_id } => {
                self.connection_store.remove_peer(&peer_id);
                self.session_store.close_by_peer(&peer_id);
            }
            TransportEvent::Data { peer_id, bytes, channel } => {
                self.on_inbound_bytes(peer_id, channel, &bytes);
            }
            TransportEvent::Error { peer_id, message } => {
                self.connection_store.set_peer_status(&peer_id, PeerStatus::Failed, Some(message.clone()));
                self.session_store.close_by_peer(&peer_id);
                self.device_store.mark_failed(&peer_id, Some(message));
            }
            TransportEvent::StateChange { peer_id, new_state } => {
                self.on_peer_state_change(peer_id, new_state);
            }
        }
    }

    fn on_peer_state_change(&self, peer_id: PeerId, new_state: PeerState) {
        match new_state {
            PeerState::New | PeerState::Connecting => {
                self.connection_store.set_peer_status(&peer_id, PeerStatus::Connecting, None);
            }
            PeerState::Connected => {
                self.connection_store.set_peer_status(&peer_id, PeerStatus::Connected, None);
            }
            PeerState::Disconnected => {
                self.connection_store.set_peer_status(&peer_id, PeerStatus::Disconnected, None);
            }
            PeerState::Failed => {
                self.connection_store.set_peer_status(&peer_id, PeerStatus::Failed, None);
                self.session_store.close_by_peer(&peer_id);
            }
            PeerState::Closed => {
                self.connection_store.remove_peer(&peer_id);
                self.session_store.close_by_peer(&peer_id);
            }
        }
    }

    /// Routes an outbound negotiation datagram to the signaling relay.
    /// Datagrams carrying an `sdp` field are offer/answer, discriminated
    /// by their `type`; anything else is an ICE candidate (spec 9: design
    /// note on structural discrimination).
    fn route_outbound_signal(self: &Arc<Self>, peer_id: PeerId, datagram: Value) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let peer = peer_id.to_string();
            let result = if datagram.get("sdp").is_some() {
                let is_offer = datagram.get("type").and_then(Value::as_str) == Some("offer");
                if is_offer {
                    this.signaling.send_offer(peer, datagram).await
                } else {
                    this.signaling.send_answer(peer, datagram).await
                }
            } else {
                this.signaling.send_ice(peer, datagram).await
            };
            if let Err(e) = result {
                tracing::warn!(%peer_id, error = %e, "failed to forward negotiation datagram");
            }
        });
    }

    // ---- inbound peer-to-peer messages ------------------------------------

    fn on_inbound_bytes(self: &Arc<Self>, peer_id: PeerId, channel: Channel, bytes: &[u8]) {
        let envelope = match shellcore_proto::codec::decode_envelope(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(%peer_id, ?channel, error = ?e, "dropping undecodable envelope");
                return;
            }
        };
        self.on_inbound_message(peer_id, envelope);
    }

    fn on_inbound_message(self: &Arc<Self>, peer_id: PeerId, envelope: Envelope) {
        match envelope.payload {
            Message::SessionCreated { session_id, .. } => {
                self.session_store.set_status(session_id, SessionStatus::Connected, None);
            }
            Message::SessionData { session_id, stream, data } => match stream {
                WireStream::Stdout | WireStream::Stderr => {
                    self.session_store.write_output(session_id, data);
                }
                WireStream::Stdin => {
                    tracing::warn!(%session_id, "dropping inbound Stdin frame, not ours to receive");
                }
            },
            Message::SessionClosed { session_id, reason, .. } => {
                self.session_store.set_status(session_id, SessionStatus::Disconnected, reason);
            }
            Message::FileListResponse { path, entries } => {
                let file_entries = entries
                    .into_iter()
                    .map(|entry| {
                        FileEntry::new(
                            entry.name.clone(),
                            compose_child_path(&path, &entry.name),
                            map_entry_kind(entry.entry_type),
                            entry.size,
                            entry.modified.saturating_mul(1000),
                            entry.mode,
                        )
                    })
                    .collect();
                self.file_store.set_entries(file_entries);
            }
            Message::FileDownloadChunk { path, offset, total_size, data, is_last } => {
                let len = data.len() as u64;
                if let Err(e) = self.file_store.receive_chunk(&path, offset, &data, total_size, is_last) {
                    tracing::warn!(%path, error = %e, "download chunk rejected");
                    self.file_store.fail_by_path(&path, e.to_string());
                    return;
                }
                if !is_last {
                    self.send_message(
                        peer_id,
                        Channel::Files,
                        file_engine::next_download_request(path, offset + len, self.chunk_size),
                    );
                }
            }
            Message::Error { message, context, .. } => {
                if let Some(path) = context {
                    self.file_store.fail_by_path(&path, message);
                } else {
                    self.file_store.set_error(Some(message));
                }
            }
            Message::Ping { nonce } => {
                self.send_message(peer_id, Channel::Control, Message::Pong { nonce });
            }
            Message::DeviceInfo { name, .. } => {
                self.device_store.pair(peer_id, name);
            }
            _ => {
                tracing::debug!(%peer_id, "inbound message not handled by this pipeline");
            }
        }
    }

    fn send_message(self: &Arc<Self>, peer_id: PeerId, channel: Channel, payload: Message) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let envelope = Envelope::new(this.next_sequence(), payload);
            let bytes = shellcore_proto::codec::encode_envelope(&envelope);
            if !this.transport.send(&peer_id, &bytes, channel).await {
                tracing::warn!(%peer_id, ?channel, "send rejected, peer not writable");
            }
        });
    }

    // ---- session store write events ---------------------------------------

    fn on_session_event(self: &Arc<Self>, event: SessionEvent) {
        match event {
            SessionEvent::Created(session) => {
                self.session_peer_map.lock().insert(session.session_id, session.peer_id.clone());
                self.send_message(
                    session.peer_id,
                    Channel::Control,
                    Message::SessionCreate {
                        cols: session.cols,
                        rows: session.rows,
                        shell: None,
                        env: Vec::new(),
                        cwd: None,
                    },
                );
            }
            SessionEvent::Closed { session_id } => {
                self.session_peer_map.lock().remove(&session_id);
            }
            SessionEvent::Input { session_id, text } => {
                let Some(peer_id) = self.session_peer_map.lock().get(&session_id).cloned() else {
                    return;
                };
                self.send_message(
                    peer_id,
                    Channel::Terminal,
                    Message::SessionData {
                        session_id,
                        stream: WireStream::Stdin,
                        data: text,
                    },
                );
            }
            SessionEvent::Resize { session_id, cols, rows } => {
                let Some(peer_id) = self.session_peer_map.lock().get(&session_id).cloned() else {
                    return;
                };
                self.send_message(peer_id, Channel::Terminal, Message::SessionResize { session_id, cols, rows });
            }
            _ => {}
        }
    }

    // ---- file store write events -------------------------------------------

    fn on_file_event(self: &Arc<Self>, event: FileEvent) {
        match event {
            FileEvent::Navigated(path) => {
                let Some(peer_id) = self.active_peer() else {
                    return;
                };
                let include_hidden = self.file_store.show_hidden();
                self.send_message(peer_id, Channel::Files, Message::FileListRequest { path, include_hidden });
            }
            FileEvent::DownloadRequested { path, .. } => {
                let Some(peer_id) = self.active_peer() else {
                    return;
                };
                self.send_message(
                    peer_id,
                    Channel::Files,
                    file_engine::initial_download_request(path, self.chunk_size),
                );
            }
            _ => {}
        }
    }

    /// Drives a full chunked upload to `peer_id`, registering the transfer
    /// in the file store first so progress is observable the same way a
    /// download's is (spec 4.9 upload pipeline).
    pub async fn upload_file(
        &self,
        peer_id: &PeerId,
        local_path: impl AsRef<std::path::Path>,
        remote_path: String,
        mode: u32,
        overwrite: bool,
    ) -> Result<UploadOutcome, OrchestratorError> {
        let local_path = local_path.as_ref();
        let size = tokio::fs::metadata(local_path).await.map(|m| m.len()).unwrap_or(0);
        let file_store = Arc::clone(&self.file_store);
        let transfer_id = file_store.start_transfer(
            remote_path
                .rsplit('/')
                .next()
                .unwrap_or(&remote_path)
                .to_string(),
            remote_path.clone(),
            crate::stores::file::TransferDirection::Upload,
            size,
        );

        let chunk_size = self.chunk_size as usize;
        let failure_path = remote_path.clone();
        let outcome = file_engine::upload_file(
            self.transport.as_ref(),
            peer_id,
            &self.sequence,
            local_path,
            remote_path,
            mode,
            overwrite,
            chunk_size,
            |sent| file_store.progress(transfer_id, sent),
        )
        .await;

        match outcome {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                file_store.fail_by_path(&failure_path, e.to_string());
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use shellcore_proto::message::RemoteEntry;
    use shellcore_proto::relay_wire::{self, RelayMessage};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    use super::*;
    use crate::signaling::ReconnectPolicy;
    use crate::transport::loopback::{LoopbackHub, LoopbackTransportManager};

    #[test]
    fn compose_child_path_collapses_root_slash() {
        assert_eq!(compose_child_path("/", "etc"), "/etc");
        assert_eq!(compose_child_path("/home", "bob"), "/home/bob");
        assert_eq!(compose_child_path("/home/", "bob"), "/home/bob");
    }

    #[test]
    fn map_entry_kind_covers_every_wire_variant() {
        assert_eq!(map_entry_kind(EntryKind::File), EntryType::File);
        assert_eq!(map_entry_kind(EntryKind::Directory), EntryType::Directory);
        assert_eq!(map_entry_kind(EntryKind::Symlink), EntryType::Symlink);
        assert_eq!(map_entry_kind(EntryKind::Unknown), EntryType::Unknown);
    }

    /// Starts a minimal relay that acks `Join` with `Joined{existing_peers}`,
    /// mirroring the teacher's own `start_disconnect_server` test harness.
    async fn spawn_test_relay(existing_peers: Vec<String>) -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = format!("ws://{addr}/ws");

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(WsMessage::Binary(data))) = ws.next().await {
                if let Ok(RelayMessage::Join { .. }) = relay_wire::decode(&data) {
                    let joined = RelayMessage::Joined {
                        peer_id: "me".to_string(),
                        existing_peers: existing_peers.clone(),
                    };
                    let bytes = relay_wire::encode(&joined).unwrap();
                    let _ = ws.send(WsMessage::Binary(bytes.into())).await;
                }
            }
        });

        (url, handle)
    }

    async fn test_orchestrator(
        existing_peers: Vec<String>,
    ) -> (Arc<Orchestrator<LoopbackTransportManager>>, Arc<LoopbackHub>) {
        let (url, _relay) = spawn_test_relay(existing_peers).await;
        let signaling = Arc::new(SignalingClient::connect(url, ReconnectPolicy::default()).await.unwrap());
        let hub = LoopbackHub::new();
        let transport = LoopbackTransportManager::new(PeerId::new("me"), Arc::clone(&hub));
        let orchestrator = Orchestrator::new(
            signaling,
            transport,
            Arc::new(ConnectionStore::new()),
            Arc::new(SessionStore::new()),
            Arc::new(FileStore::new()),
            Arc::new(NotificationStore::new()),
            Arc::new(DeviceStore::new()),
            None,
            crate::file_engine::DEFAULT_CHUNK_SIZE as u32,
        );
        orchestrator.initialize();
        (orchestrator, hub)
    }

    #[tokio::test]
    async fn connect_dials_existing_peers_as_initiator() {
        let (orchestrator, hub) = test_orchestrator(vec!["peer-b".to_string()]).await;
        let _peer_b = LoopbackTransportManager::new(PeerId::new("peer-b"), hub);

        orchestrator.connect("room1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let snap = orchestrator.connection_store.snapshot();
        let peer = snap.peers.get(&PeerId::new("peer-b")).expect("peer-b recorded");
        assert_eq!(peer.status, PeerStatus::Connected);
        assert_eq!(snap.signaling_status, SignalingStatus::Connected);
    }

    /// End-to-end coverage for the gap where nothing ever called
    /// `connection_store.set_active_peer`: after a peer reaches
    /// `Connected`, `files:navigate` must route to it as the active peer
    /// and actually reach the wire as `FileListRequest` (spec 4.9 item 6).
    #[tokio::test]
    async fn navigate_after_connect_sends_file_list_request_to_the_connected_peer() {
        let (orchestrator, hub) = test_orchestrator(vec!["peer-b".to_string()]).await;
        let peer_b = LoopbackTransportManager::new(PeerId::new("peer-b"), hub);

        let received = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let r = Arc::clone(&received);
        peer_b.subscribe(move |event| {
            if let TransportEvent::Data { bytes, .. } = event {
                if let Ok(envelope) = shellcore_proto::codec::decode_envelope(bytes) {
                    r.lock().push(envelope.payload);
                }
            }
        });

        orchestrator.connect("room1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(orchestrator.active_peer(), Some(PeerId::new("peer-b")));

        orchestrator.file_store.navigate("/home".to_string());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let messages = received.lock();
        assert!(messages.iter().any(|m| matches!(
            m,
            Message::FileListRequest { path, include_hidden } if path == "/home" && !include_hidden
        )));
    }

    #[tokio::test]
    async fn inbound_file_list_response_populates_file_store() {
        let (orchestrator, _hub) = test_orchestrator(Vec::new()).await;

        let captured = Arc::new(parking_lot::Mutex::new(None));
        let c = Arc::clone(&captured);
        orchestrator.file_store.subscribe(move |event| {
            if let FileEvent::EntriesUpdated(entries) = event {
                *c.lock() = Some(entries.clone());
            }
        });

        let entries = vec![RemoteEntry {
            name: "a.txt".to_string(),
            entry_type: EntryKind::File,
            size: 10,
            mode: 0o644,
            modified: 1_700_000_000,
        }];
        orchestrator.on_inbound_message(
            PeerId::new("peer-x"),
            Envelope::new(0, Message::FileListResponse { path: "/".to_string(), entries }),
        );

        let got = captured.lock().clone().expect("entries published");
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].path, "/a.txt");
        assert_eq!(got[0].modified_at, 1_700_000_000_000);
    }

    #[tokio::test]
    async fn peer_error_closes_only_that_peers_sessions_and_leaves_signaling_alone() {
        let (orchestrator, hub) = test_orchestrator(Vec::new()).await;
        let _remote = LoopbackTransportManager::new(PeerId::new("peer-z"), Arc::clone(&hub));
        orchestrator
            .transport
            .create_connection(PeerId::new("peer-z"), true, None)
            .await
            .unwrap();
        orchestrator.connection_store.upsert_peer(PeerId::new("peer-z"), true);
        let session_id = orchestrator
            .session_store
            .create_session(PeerId::new("peer-z"), None, None, None);

        orchestrator.transport.events().emit(&TransportEvent::Error {
            peer_id: PeerId::new("peer-z"),
            message: "data channel closed".to_string(),
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let snap = orchestrator.connection_store.snapshot();
        assert_eq!(snap.peers[&PeerId::new("peer-z")].status, PeerStatus::Failed);
        assert_eq!(snap.signaling_status, SignalingStatus::Disconnected);
        assert!(orchestrator.session_store.get(session_id).is_none());
    }
}
